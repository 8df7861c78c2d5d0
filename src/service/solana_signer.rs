//! Solana 签名原语
//!
//! ed25519 分离签名与线上交易格式：
//! `compact-u16 签名数 || 签名[64] * n || message`，
//! message 以 `0x80 | version` 开头时为 versioned (v0)，否则为 legacy。

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{Result, WalletError};

pub const SIGNATURE_LENGTH: usize = 64;
pub const PUBKEY_LENGTH: usize = 32;

const VERSION_PREFIX_MASK: u8 = 0x80;

/// compact-u16 编码（Solana short_vec）
pub fn encode_compact_u16(mut value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(3);
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// 解码 compact-u16，返回 (值, 消耗字节数)
pub fn decode_compact_u16(bytes: &[u8]) -> Result<(u16, usize)> {
    let mut value: u32 = 0;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        value |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            if value > u16::MAX as u32 {
                break;
            }
            return Ok((value as u16, i + 1));
        }
    }
    Err(WalletError::signing("malformed compact-u16 length"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

/// 解析后的线上交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireTransaction {
    pub signatures: Vec<[u8; SIGNATURE_LENGTH]>,
    /// 原始 message 字节（签名对象）
    pub message: Vec<u8>,
    pub header: MessageHeader,
    pub account_keys: Vec<[u8; PUBKEY_LENGTH]>,
    /// `None` 为 legacy
    pub version: Option<u8>,
}

impl WireTransaction {
    pub fn parse(wire: &[u8]) -> Result<Self> {
        let (count, mut offset) = decode_compact_u16(wire)?;
        let mut signatures = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let end = offset + SIGNATURE_LENGTH;
            let chunk = wire
                .get(offset..end)
                .ok_or_else(|| WalletError::signing("transaction truncated in signatures"))?;
            let mut sig = [0u8; SIGNATURE_LENGTH];
            sig.copy_from_slice(chunk);
            signatures.push(sig);
            offset = end;
        }

        let message = wire[offset..].to_vec();
        let (version, header, account_keys) = Self::parse_message(&message)?;

        let required = header.num_required_signatures as usize;
        if signatures.is_empty() {
            signatures = vec![[0u8; SIGNATURE_LENGTH]; required];
        } else if signatures.len() != required {
            return Err(WalletError::signing(format!(
                "transaction carries {} signature slots but requires {}",
                signatures.len(),
                required
            )));
        }

        Ok(Self {
            signatures,
            message,
            header,
            account_keys,
            version,
        })
    }

    fn parse_message(
        message: &[u8],
    ) -> Result<(Option<u8>, MessageHeader, Vec<[u8; PUBKEY_LENGTH]>)> {
        let first = *message
            .first()
            .ok_or_else(|| WalletError::signing("empty transaction message"))?;

        let (version, mut offset) = if first & VERSION_PREFIX_MASK != 0 {
            let version = first & !VERSION_PREFIX_MASK;
            if version != 0 {
                return Err(WalletError::signing(format!(
                    "unsupported message version {}",
                    version
                )));
            }
            (Some(version), 1)
        } else {
            (None, 0)
        };

        let header_bytes = message
            .get(offset..offset + 3)
            .ok_or_else(|| WalletError::signing("transaction message truncated in header"))?;
        let header = MessageHeader {
            num_required_signatures: header_bytes[0],
            num_readonly_signed_accounts: header_bytes[1],
            num_readonly_unsigned_accounts: header_bytes[2],
        };
        offset += 3;

        let (key_count, used) = decode_compact_u16(&message[offset..])?;
        offset += used;

        let mut account_keys = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            let end = offset + PUBKEY_LENGTH;
            let chunk = message
                .get(offset..end)
                .ok_or_else(|| WalletError::signing("transaction message truncated in keys"))?;
            let mut key = [0u8; PUBKEY_LENGTH];
            key.copy_from_slice(chunk);
            account_keys.push(key);
            offset = end;
        }

        if header.num_required_signatures as usize > account_keys.len() {
            return Err(WalletError::signing(
                "required signers exceed static account keys",
            ));
        }

        Ok((version, header, account_keys))
    }

    /// 签名者在必需签名者中的位置
    pub fn signer_position(&self, public_key: &[u8; PUBKEY_LENGTH]) -> Option<usize> {
        self.account_keys
            .iter()
            .take(self.header.num_required_signatures as usize)
            .position(|k| k == public_key)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = encode_compact_u16(self.signatures.len() as u16);
        for sig in &self.signatures {
            out.extend_from_slice(sig);
        }
        out.extend_from_slice(&self.message);
        out
    }

    /// 第一个签名即交易 id
    pub fn primary_signature(&self) -> Option<&[u8; SIGNATURE_LENGTH]> {
        self.signatures.first()
    }
}

fn signing_key(seed: &[u8]) -> Result<SigningKey> {
    let seed: [u8; 32] = seed
        .try_into()
        .map_err(|_| WalletError::signing("ed25519 seed must be 32 bytes"))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// 分离签名
pub fn sign_message(seed: &[u8], message: &[u8]) -> Result<[u8; SIGNATURE_LENGTH]> {
    let key = signing_key(seed)?;
    Ok(key.sign(message).to_bytes())
}

/// 签名线上交易，把签名写入对应槽位后重新序列化
pub fn sign_transaction(seed: &[u8], wire: &[u8]) -> Result<WireTransaction> {
    let key = signing_key(seed)?;
    let public_key = key.verifying_key().to_bytes();

    let mut tx = WireTransaction::parse(wire)?;
    let slot = tx.signer_position(&public_key).ok_or_else(|| {
        WalletError::signing(format!(
            "{} is not a required signer of this transaction",
            bs58::encode(public_key).into_string()
        ))
    })?;

    tx.signatures[slot] = key.sign(&tx.message).to_bytes();
    Ok(tx)
}

pub fn verify_message(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) = <[u8; PUBKEY_LENGTH]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
    const PUBKEY: &str = "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";
    const OTHER_PUBKEY: &str = "3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c";

    fn key(hex_str: &str) -> [u8; 32] {
        hex::decode(hex_str).unwrap().try_into().unwrap()
    }

    /// 最小交易：签名者 + system program，零条指令
    fn build_message(signers: &[[u8; 32]], versioned: bool) -> Vec<u8> {
        let mut msg = Vec::new();
        if versioned {
            msg.push(0x80);
        }
        msg.extend([signers.len() as u8, 0, 1]);
        msg.extend(encode_compact_u16(signers.len() as u16 + 1));
        for s in signers {
            msg.extend_from_slice(s);
        }
        msg.extend([0u8; 32]);
        msg.extend([7u8; 32]);
        msg.extend(encode_compact_u16(0));
        if versioned {
            msg.extend(encode_compact_u16(0));
        }
        msg
    }

    fn wire(message: &[u8], slots: usize) -> Vec<u8> {
        let mut out = encode_compact_u16(slots as u16);
        out.extend(vec![0u8; 64 * slots]);
        out.extend_from_slice(message);
        out
    }

    #[test]
    fn test_compact_u16() {
        assert_eq!(encode_compact_u16(0), vec![0]);
        assert_eq!(encode_compact_u16(0x7f), vec![0x7f]);
        assert_eq!(encode_compact_u16(0x80), vec![0x80, 0x01]);
        assert_eq!(encode_compact_u16(0x3fff), vec![0xff, 0x7f]);
        assert_eq!(encode_compact_u16(0xffff), vec![0xff, 0xff, 0x03]);
        assert_eq!(decode_compact_u16(&[0x80, 0x01]).unwrap(), (0x80, 2));
        assert_eq!(decode_compact_u16(&[0xff, 0xff, 0x03]).unwrap(), (0xffff, 3));
        assert!(decode_compact_u16(&[0x80]).is_err());
        assert!(decode_compact_u16(&[0xff, 0xff, 0x7f]).is_err());
    }

    #[test]
    fn test_rfc8032_empty_message() {
        let sig = sign_message(&key(SEED), b"").unwrap();
        assert_eq!(
            hex::encode(sig),
            "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b"
        );
        assert!(verify_message(&key(PUBKEY), b"", &sig));
        assert!(!verify_message(&key(PUBKEY), b"x", &sig));
        assert!(!verify_message(&key(PUBKEY)[..31], b"", &sig));
    }

    #[test]
    fn test_sign_legacy_transaction() {
        let message = build_message(&[key(PUBKEY)], false);
        let tx = sign_transaction(&key(SEED), &wire(&message, 1)).unwrap();

        assert_eq!(tx.version, None);
        assert_eq!(tx.signatures.len(), 1);
        assert!(verify_message(&key(PUBKEY), &message, &tx.signatures[0]));

        let reparsed = WireTransaction::parse(&tx.serialize()).unwrap();
        assert_eq!(reparsed, tx);
    }

    #[test]
    fn test_sign_v0_transaction_in_second_slot() {
        let message = build_message(&[key(OTHER_PUBKEY), key(PUBKEY)], true);
        let tx = sign_transaction(&key(SEED), &wire(&message, 2)).unwrap();

        assert_eq!(tx.version, Some(0));
        assert_eq!(tx.signatures[0], [0u8; 64]);
        assert!(verify_message(&key(PUBKEY), &message, &tx.signatures[1]));
    }

    #[test]
    fn test_unsigned_wire_expands_slots() {
        let message = build_message(&[key(PUBKEY)], false);
        let tx = sign_transaction(&key(SEED), &wire(&message, 0)).unwrap();
        assert_eq!(tx.signatures.len(), 1);
        assert!(verify_message(&key(PUBKEY), &message, &tx.signatures[0]));
    }

    #[test]
    fn test_non_signer_rejected() {
        let message = build_message(&[key(OTHER_PUBKEY)], false);
        assert!(matches!(
            sign_transaction(&key(SEED), &wire(&message, 1)),
            Err(WalletError::SigningError(_))
        ));
    }

    #[test]
    fn test_malformed_wire_rejected() {
        assert!(WireTransaction::parse(&[]).is_err());
        assert!(WireTransaction::parse(&[1, 0, 0]).is_err());
        let message = build_message(&[key(PUBKEY)], false);
        assert!(WireTransaction::parse(&wire(&message, 2)).is_err());
        assert!(WireTransaction::parse(&wire(&[0x81, 1, 0, 0], 0)).is_err());
    }
}
