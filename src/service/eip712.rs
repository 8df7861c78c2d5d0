//! EIP-712 结构化数据哈希
//!
//! 签名哈希 = keccak256(0x19 0x01 || domainSeparator || hashStruct(message))
//! https://eips.ethereum.org/EIPS/eip-712

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WalletError};
use crate::service::evm_signer::keccak256;
use crate::utils::encoding::{bytes_from_array, decode_hex, parse_word};

pub const DOMAIN_TYPE: &str = "EIP712Domain";

/// 域字段的规范顺序（未显式声明 EIP712Domain 类型时据此推断）
const DOMAIN_FIELDS: [(&str, &str); 5] = [
    ("name", "string"),
    ("version", "string"),
    ("chainId", "uint256"),
    ("verifyingContract", "address"),
    ("salt", "bytes32"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// `eth_signTypedData_v4` 载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    pub types: BTreeMap<String, Vec<TypedField>>,
    pub primary_type: String,
    #[serde(default)]
    pub domain: Map<String, Value>,
    pub message: Value,
}

impl TypedData {
    /// 接受 JSON 对象或 JSON 字符串（页面常传 `JSON.stringify` 结果）
    pub fn from_value(value: &Value) -> Result<Self> {
        let parsed = match value {
            Value::String(s) => serde_json::from_str(s),
            other => serde_json::from_value(other.clone()),
        };
        parsed.map_err(|e| WalletError::signing(format!("invalid typed data: {}", e)))
    }

    fn fields_of(&self, name: &str) -> Result<Vec<TypedField>> {
        if let Some(fields) = self.types.get(name) {
            return Ok(fields.clone());
        }
        if name == DOMAIN_TYPE {
            return Ok(DOMAIN_FIELDS
                .iter()
                .filter(|(field, _)| self.domain.contains_key(*field))
                .map(|(field, kind)| TypedField {
                    name: field.to_string(),
                    kind: kind.to_string(),
                })
                .collect());
        }
        Err(WalletError::signing(format!("unknown struct type {}", name)))
    }

    fn is_struct(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    fn collect_dependencies(&self, name: &str, found: &mut BTreeSet<String>) -> Result<()> {
        if found.contains(name) {
            return Ok(());
        }
        found.insert(name.to_string());
        for field in self.fields_of(name)? {
            let base = base_type(&field.kind);
            if self.is_struct(base) {
                self.collect_dependencies(base, found)?;
            }
        }
        Ok(())
    }

    /// `Primary(...)Dep1(...)Dep2(...)`，依赖按名称排序
    pub fn encode_type(&self, primary: &str) -> Result<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(primary, &mut deps)?;
        deps.remove(primary);

        let mut out = String::new();
        for name in std::iter::once(primary.to_string()).chain(deps) {
            let fields = self.fields_of(&name)?;
            let members: Vec<String> = fields
                .iter()
                .map(|f| format!("{} {}", f.kind, f.name))
                .collect();
            out.push_str(&format!("{}({})", name, members.join(",")));
        }
        Ok(out)
    }

    pub fn type_hash(&self, name: &str) -> Result<[u8; 32]> {
        Ok(keccak256(self.encode_type(name)?.as_bytes()))
    }

    pub fn hash_struct(&self, name: &str, data: &Value) -> Result<[u8; 32]> {
        let object = data
            .as_object()
            .ok_or_else(|| WalletError::signing(format!("{} value must be an object", name)))?;

        let fields = self.fields_of(name)?;
        let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
        encoded.extend_from_slice(&self.type_hash(name)?);
        for field in &fields {
            let value = object.get(&field.name).ok_or_else(|| {
                WalletError::signing(format!("{}.{} is missing", name, field.name))
            })?;
            encoded.extend_from_slice(&self.encode_field(&field.kind, value)?);
        }
        Ok(keccak256(&encoded))
    }

    fn encode_field(&self, kind: &str, value: &Value) -> Result<[u8; 32]> {
        if let Some(element) = array_element_type(kind) {
            let items = value
                .as_array()
                .ok_or_else(|| WalletError::signing(format!("{} value must be an array", kind)))?;
            let mut buf = Vec::with_capacity(32 * items.len());
            for item in items {
                buf.extend_from_slice(&self.encode_field(element, item)?);
            }
            return Ok(keccak256(&buf));
        }

        if self.is_struct(kind) {
            if value.is_null() {
                return Ok([0u8; 32]);
            }
            return self.hash_struct(kind, value);
        }

        let encoding_error =
            |e: WalletError| WalletError::signing(format!("cannot encode {} value: {}", kind, e));

        match kind {
            "string" => {
                let s = value
                    .as_str()
                    .ok_or_else(|| WalletError::signing("string value expected"))?;
                Ok(keccak256(s.as_bytes()))
            }
            "bytes" => Ok(keccak256(bytes_value(value).map_err(encoding_error)?)),
            "bool" => {
                let flag = match value {
                    Value::Bool(b) => *b,
                    Value::String(s) if s == "true" || s == "false" => s == "true",
                    _ => return Err(WalletError::signing("bool value expected")),
                };
                let mut word = [0u8; 32];
                word[31] = flag as u8;
                Ok(word)
            }
            "address" => {
                let s = value
                    .as_str()
                    .ok_or_else(|| WalletError::signing("address value expected"))?;
                let bytes = decode_hex(s).map_err(encoding_error)?;
                if bytes.len() != 20 {
                    return Err(WalletError::signing(format!("invalid address {}", s)));
                }
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(&bytes);
                Ok(word)
            }
            k if k.starts_with("bytes") => {
                let size: usize = k[5..]
                    .parse()
                    .ok()
                    .filter(|n| (1..=32).contains(n))
                    .ok_or_else(|| WalletError::signing(format!("unknown type {}", k)))?;
                let bytes = bytes_value(value).map_err(encoding_error)?;
                if bytes.len() > size {
                    return Err(WalletError::signing(format!("{} value too long", k)));
                }
                let mut word = [0u8; 32];
                word[..bytes.len()].copy_from_slice(&bytes);
                Ok(word)
            }
            k if k.starts_with("uint") => parse_word(value, false).map_err(encoding_error),
            k if k.starts_with("int") => parse_word(value, true).map_err(encoding_error),
            other => Err(WalletError::signing(format!("unknown type {}", other))),
        }
    }

    pub fn domain_separator(&self) -> Result<[u8; 32]> {
        self.hash_struct(DOMAIN_TYPE, &Value::Object(self.domain.clone()))
    }

    /// 最终签名哈希
    pub fn signing_hash(&self) -> Result<[u8; 32]> {
        let mut buf = Vec::with_capacity(66);
        buf.extend_from_slice(&[0x19, 0x01]);
        buf.extend_from_slice(&self.domain_separator()?);
        if self.primary_type != DOMAIN_TYPE {
            buf.extend_from_slice(&self.hash_struct(&self.primary_type, &self.message)?);
        }
        Ok(keccak256(&buf))
    }

    /// 域中声明的 chainId（若有）
    pub fn domain_chain_id(&self) -> Option<u64> {
        let value = self.domain.get("chainId")?;
        crate::utils::encoding::parse_u64(value).ok()
    }
}

fn bytes_value(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(s) => decode_hex(s),
        Value::Array(_) => bytes_from_array(value),
        other => Err(WalletError::invalid_params(format!(
            "bytes value expected, got {}",
            other
        ))),
    }
}

/// `Person[]` → `Person`，`uint256[2][]` → `uint256[2]`
fn array_element_type(kind: &str) -> Option<&str> {
    if !kind.ends_with(']') {
        return None;
    }
    kind.rfind('[').map(|pos| &kind[..pos])
}

/// 去掉所有数组后缀
fn base_type(kind: &str) -> &str {
    match kind.find('[') {
        Some(pos) => &kind[..pos],
        None => kind,
    }
}
