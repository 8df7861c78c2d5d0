//! 编码辅助函数
//!
//! 页面脚本传入的参数形态多样：`0x` 十六进制、十进制字符串、数字、字节数组、
//! base58 / base64 字符串。这里统一解析为字节。

use alloy_primitives::{Sign, I256, U256};
use base64::Engine;
use serde_json::Value;

use crate::error::{Result, WalletError};

/// 解码十六进制（可带 `0x` 前缀，奇数长度左补 0）
pub fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let stripped = strip_hex_prefix(input.trim());
    let padded;
    let digits = if stripped.len() % 2 == 1 {
        padded = format!("0{}", stripped);
        padded.as_str()
    } else {
        stripped
    };
    hex::decode(digits).map_err(|e| WalletError::invalid_params(format!("invalid hex: {}", e)))
}

pub fn strip_hex_prefix(input: &str) -> &str {
    input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input)
}

pub fn is_hex_prefixed(input: &str) -> bool {
    input.starts_with("0x") || input.starts_with("0X")
}

/// `0x` 前缀的小写十六进制
pub fn encode_hex_prefixed(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn encode_base64(bytes: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(input: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(input.trim())
        .map_err(|e| WalletError::invalid_params(format!("invalid base64: {}", e)))
}

/// JSON 字节数组 `[1, 2, 3]`
pub fn bytes_from_array(value: &Value) -> Result<Vec<u8>> {
    let items = value
        .as_array()
        .ok_or_else(|| WalletError::invalid_params("expected a byte array"))?;
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .filter(|b| *b <= u8::MAX as u64)
                .map(|b| b as u8)
                .ok_or_else(|| WalletError::invalid_params("byte array element out of range"))
        })
        .collect()
}

/// 去掉大端字节的前导零（RLP 整数编码要求）
pub fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// 解析 256 位无符号整数
///
/// 接受 `0x` 十六进制字符串、十进制字符串和 JSON 数字
pub fn parse_u256(value: &Value) -> Result<U256> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| WalletError::invalid_params(format!("invalid quantity: {}", n))),
        Value::String(s) => {
            let s = s.trim();
            let (digits, radix) = if is_hex_prefixed(s) {
                // 部分钱包库用 `0x` 表示 0
                if s.len() == 2 {
                    return Ok(U256::ZERO);
                }
                (strip_hex_prefix(s), 16)
            } else {
                (s, 10)
            };
            if digits.is_empty() {
                return Err(WalletError::invalid_params("empty quantity"));
            }
            U256::from_str_radix(digits, radix)
                .map_err(|e| WalletError::invalid_params(format!("invalid quantity {}: {}", s, e)))
        }
        other => Err(WalletError::invalid_params(format!(
            "invalid quantity: {}",
            other
        ))),
    }
}

/// 解析数量字段为最小大端字节（RLP 整数编码）
pub fn parse_quantity(value: &Value) -> Result<Vec<u8>> {
    let quantity = parse_u256(value)?;
    Ok(trim_leading_zeros(&quantity.to_be_bytes::<32>()))
}

/// 解析为 u64（chain id、nonce 等）
pub fn parse_u64(value: &Value) -> Result<u64> {
    let quantity = parse_u256(value)?;
    if quantity.bit_len() > 64 {
        return Err(WalletError::invalid_params("quantity exceeds 64 bits"));
    }
    Ok(quantity.as_limbs()[0])
}

/// 解析为 256 位大端字（EIP-712 整数字段）
///
/// `signed` 为 true 时允许负数，按二进制补码编码
pub fn parse_word(value: &Value, signed: bool) -> Result<[u8; 32]> {
    let (sign, magnitude) = match value {
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(v), _) => (Sign::Positive, U256::from(v)),
            (None, Some(v)) => (Sign::Negative, U256::from(v.unsigned_abs())),
            _ => {
                return Err(WalletError::invalid_params(format!(
                    "non-integer number: {}",
                    n
                )))
            }
        },
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix('-') {
                Some(rest) => (Sign::Negative, parse_u256(&Value::from(rest))?),
                None => (Sign::Positive, parse_u256(&Value::from(s))?),
            }
        }
        Value::Bool(b) => (Sign::Positive, U256::from(*b as u8)),
        other => {
            return Err(WalletError::invalid_params(format!(
                "expected integer, got {}",
                other
            )))
        }
    };

    if !signed {
        if sign == Sign::Negative && !magnitude.is_zero() {
            return Err(WalletError::invalid_params("negative value for unsigned type"));
        }
        return Ok(magnitude.to_be_bytes::<32>());
    }
    I256::checked_from_sign_and_abs(sign, magnitude)
        .map(|v| v.into_raw().to_be_bytes::<32>())
        .ok_or_else(|| WalletError::invalid_params("integer out of int256 range"))
}
