//! EVM 签名原语
//!
//! secp256k1 + keccak256。签名使用 RFC 6979 确定性 nonce 并规范化为 low-s，
//! 相同输入总是得到相同签名。

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::Serialize;
use sha3::{Digest, Keccak256};

use crate::error::{Result, WalletError};
use crate::utils::address_validator::AddressValidator;

/// personal_sign 前缀
pub const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

pub fn keccak256(data: impl AsRef<[u8]>) -> [u8; 32] {
    Keccak256::digest(data.as_ref()).into()
}

/// 可恢复签名 (r, s, recovery id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvmSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// 0 或 1
    pub recovery_id: u8,
}

impl EvmSignature {
    /// `r || s || v`，v = 27 + recovery id
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = 27 + self.recovery_id;
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// 解析 65 字节签名，v 可为 0/1 或 27/28
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(WalletError::signing("signature must be 65 bytes"));
        }
        let v = bytes[64];
        let recovery_id = if v >= 27 { v - 27 } else { v };
        if recovery_id > 1 {
            return Err(WalletError::signing(format!("invalid recovery byte {}", v)));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, recovery_id })
    }
}

/// EIP-191 personal message 哈希
pub fn hash_personal_message(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

pub(crate) fn signing_key(key_bytes: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(key_bytes)
        .map_err(|_| WalletError::signing("key is not a valid secp256k1 scalar"))
}

/// 对 32 字节哈希签名（无前缀）
pub fn sign_prehash(key: &SigningKey, hash: &[u8; 32]) -> Result<EvmSignature> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash)
        .map_err(|e| WalletError::signing(format!("ecdsa signing failed: {}", e)))?;

    let rs = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&rs[..32]);
    s.copy_from_slice(&rs[32..]);

    Ok(EvmSignature {
        r,
        s,
        recovery_id: recovery_id.to_byte(),
    })
}

/// 从签名恢复 EIP-55 地址
pub fn recover_address(hash: &[u8; 32], signature: &EvmSignature) -> Result<String> {
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);

    let sig = Signature::from_slice(&rs)
        .map_err(|e| WalletError::signing(format!("invalid signature: {}", e)))?;
    let recid = RecoveryId::from_byte(signature.recovery_id)
        .ok_or_else(|| WalletError::signing("invalid recovery id"))?;
    let key = VerifyingKey::recover_from_prehash(hash, &sig, recid)
        .map_err(|e| WalletError::signing(format!("recovery failed: {}", e)))?;

    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Ok(AddressValidator::to_checksum_address(&address))
}
