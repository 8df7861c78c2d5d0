//! EVM 交易构建器
//!
//! 把页面传入的 `eth_signTransaction` 请求规范化为待签名交易，
//! 支持 legacy (EIP-155) 与 EIP-1559 (type 2) 两种格式，RLP 编码使用 `rlp` crate。

use rlp::RlpStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WalletError};
use crate::service::evm_signer::{keccak256, EvmSignature};
use crate::utils::encoding::{decode_hex, encode_hex_prefixed, parse_quantity, parse_u64};

/// 未指定 gas 时的默认值（普通转账）
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;

/// 页面提交的交易请求（字段均为 JSON-RPC 的 camelCase 命名）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, alias = "input", skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Value>,
    #[serde(default, alias = "gasLimit", skip_serializing_if = "Option::is_none")]
    pub gas: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<Value>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListItem>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: String,
    #[serde(default)]
    pub storage_keys: Vec<String>,
}

/// 交易类型相关字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    Legacy {
        gas_price: Vec<u8>,
    },
    Eip1559 {
        max_priority_fee_per_gas: Vec<u8>,
        max_fee_per_gas: Vec<u8>,
        access_list: Vec<(Vec<u8>, Vec<Vec<u8>>)>,
    },
}

/// 待签名交易
///
/// 所有整数字段都是最小大端字节（RLP 整数编码）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: Vec<u8>,
    pub gas_limit: Vec<u8>,
    /// 空表示合约创建
    pub to: Vec<u8>,
    pub value: Vec<u8>,
    pub data: Vec<u8>,
    pub kind: TransactionKind,
}

/// 已签名交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        encode_hex_prefixed(&self.raw)
    }

    pub fn hash_hex(&self) -> String {
        encode_hex_prefixed(self.hash)
    }
}

/// 交易构建器
pub struct TransactionBuilder;

impl TransactionBuilder {
    /// 规范化交易请求
    ///
    /// `chain_id` 为 provider 当前网络；请求中显式给出的 chainId 必须与之一致
    pub fn build(request: &EvmTransactionRequest, chain_id: u64) -> Result<UnsignedTransaction> {
        if let Some(requested) = &request.chain_id {
            let requested = parse_u64(requested)?;
            if requested != chain_id {
                return Err(WalletError::invalid_params(format!(
                    "transaction chainId {} does not match active chain {}",
                    requested, chain_id
                )));
            }
        }

        let quantity = |value: &Option<Value>| -> Result<Vec<u8>> {
            match value {
                Some(v) if !v.is_null() => parse_quantity(v),
                _ => Ok(Vec::new()),
            }
        };

        let to = match request.to.as_deref() {
            Some(addr) if !addr.is_empty() => {
                let bytes = decode_hex(addr)?;
                if bytes.len() != 20 {
                    return Err(WalletError::invalid_params(format!(
                        "invalid recipient address {}",
                        addr
                    )));
                }
                bytes
            }
            _ => Vec::new(),
        };

        let data = match request.data.as_deref() {
            Some(d) => decode_hex(d)?,
            None => Vec::new(),
        };

        let gas_limit = match &request.gas {
            Some(v) if !v.is_null() => parse_quantity(v)?,
            _ => parse_quantity(&Value::from(DEFAULT_GAS_LIMIT))?,
        };

        let kind = if Self::is_eip1559(request)? {
            let mut access_list = Vec::new();
            for item in request.access_list.iter().flatten() {
                let address = decode_hex(&item.address)?;
                if address.len() != 20 {
                    return Err(WalletError::invalid_params(format!(
                        "invalid access list address {}",
                        item.address
                    )));
                }
                let mut keys = Vec::with_capacity(item.storage_keys.len());
                for key in &item.storage_keys {
                    let key = decode_hex(key)?;
                    if key.len() != 32 {
                        return Err(WalletError::invalid_params("storage key must be 32 bytes"));
                    }
                    keys.push(key);
                }
                access_list.push((address, keys));
            }
            TransactionKind::Eip1559 {
                max_priority_fee_per_gas: quantity(&request.max_priority_fee_per_gas)?,
                max_fee_per_gas: quantity(&request.max_fee_per_gas)?,
                access_list,
            }
        } else {
            TransactionKind::Legacy {
                gas_price: quantity(&request.gas_price)?,
            }
        };

        Ok(UnsignedTransaction {
            chain_id,
            nonce: quantity(&request.nonce)?,
            gas_limit,
            to,
            value: quantity(&request.value)?,
            data,
            kind,
        })
    }

    fn is_eip1559(request: &EvmTransactionRequest) -> Result<bool> {
        match &request.tx_type {
            Some(t) if !t.is_null() => match parse_u64(t)? {
                0 => Ok(false),
                2 => Ok(true),
                other => Err(WalletError::invalid_params(format!(
                    "unsupported transaction type {}",
                    other
                ))),
            },
            _ => Ok(request.max_fee_per_gas.is_some() || request.max_priority_fee_per_gas.is_some()),
        }
    }
}

impl UnsignedTransaction {
    fn append_common(&self, stream: &mut RlpStream) {
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }

    fn append_access_list(stream: &mut RlpStream, list: &[(Vec<u8>, Vec<Vec<u8>>)]) {
        stream.begin_list(list.len());
        for (address, keys) in list {
            stream.begin_list(2);
            stream.append(address);
            stream.begin_list(keys.len());
            for key in keys {
                stream.append(key);
            }
        }
    }

    fn chain_id_bytes(&self) -> Vec<u8> {
        crate::utils::encoding::trim_leading_zeros(&self.chain_id.to_be_bytes())
    }

    /// 待签名的字节串
    pub fn signing_payload(&self) -> Vec<u8> {
        match &self.kind {
            TransactionKind::Legacy { gas_price } => {
                let mut stream = RlpStream::new_list(9);
                stream.append(&self.nonce);
                stream.append(gas_price);
                self.append_common(&mut stream);
                stream.append(&self.chain_id_bytes());
                stream.append(&Vec::<u8>::new());
                stream.append(&Vec::<u8>::new());
                stream.out().to_vec()
            }
            TransactionKind::Eip1559 {
                max_priority_fee_per_gas,
                max_fee_per_gas,
                access_list,
            } => {
                let mut stream = RlpStream::new_list(9);
                stream.append(&self.chain_id_bytes());
                stream.append(&self.nonce);
                stream.append(max_priority_fee_per_gas);
                stream.append(max_fee_per_gas);
                self.append_common(&mut stream);
                Self::append_access_list(&mut stream, access_list);
                let mut out = vec![0x02];
                out.extend_from_slice(&stream.out());
                out
            }
        }
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(self.signing_payload())
    }

    /// 附加签名后的完整编码
    pub fn encode_signed(&self, signature: &EvmSignature) -> Result<SignedTransaction> {
        let trim = crate::utils::encoding::trim_leading_zeros;
        let r = trim(&signature.r);
        let s = trim(&signature.s);

        let raw = match &self.kind {
            TransactionKind::Legacy { gas_price } => {
                // EIP-155: v = recid + 2 * chainId + 35
                let v = self
                    .chain_id
                    .checked_mul(2)
                    .and_then(|v| v.checked_add(35 + signature.recovery_id as u64))
                    .ok_or_else(|| {
                        WalletError::signing(format!("chain id {} too large for EIP-155", self.chain_id))
                    })?;
                let mut stream = RlpStream::new_list(9);
                stream.append(&self.nonce);
                stream.append(gas_price);
                self.append_common(&mut stream);
                stream.append(&trim(&v.to_be_bytes()));
                stream.append(&r);
                stream.append(&s);
                stream.out().to_vec()
            }
            TransactionKind::Eip1559 {
                max_priority_fee_per_gas,
                max_fee_per_gas,
                access_list,
            } => {
                let mut stream = RlpStream::new_list(12);
                stream.append(&self.chain_id_bytes());
                stream.append(&self.nonce);
                stream.append(max_priority_fee_per_gas);
                stream.append(max_fee_per_gas);
                self.append_common(&mut stream);
                Self::append_access_list(&mut stream, access_list);
                stream.append(&trim(&[signature.recovery_id]));
                stream.append(&r);
                stream.append(&s);
                let mut out = vec![0x02];
                out.extend_from_slice(&stream.out());
                out
            }
        };

        Ok(SignedTransaction {
            hash: keccak256(&raw),
            raw,
        })
    }
}
