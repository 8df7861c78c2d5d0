//! 地址验证模块
//!
//! 统一的地址格式化与校验：EVM 使用 EIP-55 校验和，Solana 使用 base58 公钥

use sha3::{Digest, Keccak256};

use crate::domain::chain_config::ChainFamily;

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    /// 验证地址格式
    pub fn validate(family: ChainFamily, address: &str) -> bool {
        match family {
            ChainFamily::Evm => Self::validate_evm_address(address),
            ChainFamily::Solana => Self::validate_solana_address(address),
        }
    }

    /// 比较两个同链族地址是否指向同一账户
    ///
    /// EVM 地址大小写不敏感；Solana base58 区分大小写
    pub fn same_address(family: ChainFamily, a: &str, b: &str) -> bool {
        match family {
            ChainFamily::Evm => a.trim().eq_ignore_ascii_case(b.trim()),
            ChainFamily::Solana => a.trim() == b.trim(),
        }
    }

    /// 20 字节地址 → EIP-55 校验和格式
    /// https://eips.ethereum.org/EIPS/eip-55
    pub fn to_checksum_address(address: &[u8; 20]) -> String {
        let lower = hex::encode(address);
        let hash = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }

    /// 验证EVM地址（支持EIP-55 Checksum）
    fn validate_evm_address(address: &str) -> bool {
        if !address.starts_with("0x") || address.len() != 42 {
            return false;
        }

        let hex_part = &address[2..];
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }

        // 全小写或全大写视为未携带校验和
        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        if !(has_upper && has_lower) {
            return true;
        }

        match hex::decode(hex_part) {
            Ok(bytes) => {
                let mut raw = [0u8; 20];
                raw.copy_from_slice(&bytes);
                Self::to_checksum_address(&raw) == address
            }
            Err(_) => false,
        }
    }

    /// 验证Solana地址（Base58编码，32字节）
    fn validate_solana_address(address: &str) -> bool {
        if address.len() < 32 || address.len() > 44 {
            return false;
        }
        matches!(bs58::decode(address).into_vec(), Ok(decoded) if decoded.len() == 32)
    }
}
