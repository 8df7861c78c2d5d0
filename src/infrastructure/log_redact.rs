//! 日志脱敏
//! 请求参数在写入日志前缩短长数据块（签名载荷、交易、字节数组）

use serde_json::Value;

/// 超过该长度的字符串视为数据块（32 字节哈希的 0x 十六进制为 66 字符）
const MAX_PLAIN_STRING: usize = 66;
/// 超过该长度的数字数组视为字节数组
const MAX_PLAIN_ARRAY: usize = 32;

/// 脱敏十六进制字符串（显示前缀和后缀）
pub fn redact_hex_string(hex: &str, show_chars: usize) -> String {
    if hex.len() <= show_chars * 2 || !hex.is_char_boundary(show_chars) {
        return "*".repeat(hex.chars().count());
    }

    let prefix = &hex[..show_chars];
    let suffix_start = hex.len() - show_chars;
    if !hex.is_char_boundary(suffix_start) {
        return format!("{}...", prefix);
    }
    format!("{}...{}({} chars)", prefix, &hex[suffix_start..], hex.len())
}

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &str) -> String {
    if address.len() < 10 || !address.is_ascii() {
        return "*".repeat(address.chars().count());
    }

    let prefix = &address[..6];
    let suffix = &address[address.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

/// 递归缩短请求参数中的长数据块
pub fn redact_params(params: &Value) -> Value {
    match params {
        Value::String(s) if s.len() > MAX_PLAIN_STRING => Value::String(redact_hex_string(s, 10)),
        Value::Array(items) if items.len() > MAX_PLAIN_ARRAY && items.iter().all(Value::is_u64) => {
            Value::String(format!("[{} bytes]", items.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_params).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_params(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_hex_string() {
        let long = format!("0x{}", "ab".repeat(40));
        let out = redact_hex_string(&long, 10);
        assert!(out.starts_with("0xabababab"));
        assert!(out.ends_with("(82 chars)"));
        assert_eq!(redact_hex_string("0x1234", 10), "******");
    }

    #[test]
    fn test_redact_address() {
        assert_eq!(
            redact_address("0x70997970C51812dc3A010C7d01b50e0d17dc79C8"),
            "0x7099...79C8"
        );
        assert_eq!(redact_address("short"), "*****");
    }

    #[test]
    fn test_redact_params_keeps_short_values() {
        let address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
        let blob = "A".repeat(200);
        let params = json!([{ "to": address, "data": blob, "bytes": vec![1u8; 64], "n": 3 }]);
        let out = redact_params(&params);

        assert_eq!(out[0]["to"], json!(address));
        assert_eq!(out[0]["n"], json!(3));
        assert_eq!(out[0]["bytes"], json!("[64 bytes]"));
        assert!(out[0]["data"].as_str().unwrap().len() < 40);
    }
}
