//! 身份派生策略
//!
//! 为不同的加密曲线提供统一的私钥解析与公开身份派生接口。
//! 公开身份是私钥与链族的纯函数，重复计算总是得到相同结果。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::domain::account::KeyMaterial;
use crate::domain::chain_config::ChainFamily;
use crate::utils::address_validator::AddressValidator;
use crate::utils::encoding::{is_hex_prefixed, strip_hex_prefix};

/// 派生出的公开身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub family: ChainFamily,
    /// EVM: EIP-55 地址；Solana: base58 公钥
    pub address: String,
    /// EVM: 64 字节未压缩公钥（去掉 0x04 前缀）；Solana: 32 字节公钥
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
}

/// 身份派生策略 trait
pub trait DerivationStrategy: Send + Sync {
    fn family(&self) -> ChainFamily;

    /// 解析文本私钥
    fn parse_key(&self, encoded: &str) -> Result<KeyMaterial>;

    /// 从私钥派生公开身份
    fn derive_identity(&self, key: &KeyMaterial) -> Result<PublicIdentity>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Secp256k1 策略 (EVM)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Secp256k1Strategy;

impl DerivationStrategy for Secp256k1Strategy {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn parse_key(&self, encoded: &str) -> Result<KeyMaterial> {
        let digits = strip_hex_prefix(encoded.trim());
        if digits.len() != 64 {
            anyhow::bail!("expected 32-byte hex key, got {} hex characters", digits.len());
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("key contains non-hex characters");
        }
        let mut bytes = Zeroizing::new(hex::decode(digits).context("invalid hex key")?);

        // 拒绝 0 和 >= n 的标量
        k256::ecdsa::SigningKey::from_slice(&bytes)
            .map_err(|_| anyhow::anyhow!("key is not a valid secp256k1 scalar"))?;

        Ok(KeyMaterial::new(std::mem::take(&mut *bytes)))
    }

    fn derive_identity(&self, key: &KeyMaterial) -> Result<PublicIdentity> {
        use k256::ecdsa::SigningKey;
        use sha3::{Digest, Keccak256};

        let signing_key = SigningKey::from_slice(key.as_bytes())
            .map_err(|_| anyhow::anyhow!("key is not a valid secp256k1 scalar"))?;

        let verifying_key = signing_key.verifying_key();
        let public_key_bytes = verifying_key.to_encoded_point(false); // 未压缩格式
        let public_key_slice = &public_key_bytes.as_bytes()[1..]; // 去掉 0x04 前缀

        // Keccak256 哈希，取后 20 字节
        let hash = Keccak256::digest(public_key_slice);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);

        Ok(PublicIdentity {
            family: ChainFamily::Evm,
            address: AddressValidator::to_checksum_address(&address),
            public_key: public_key_slice.to_vec(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ed25519 策略 (Solana)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Ed25519Strategy;

impl Ed25519Strategy {
    /// 32 字节种子或 64 字节 keypair（seed || pubkey）→ 种子
    ///
    /// 无论成功与否，输入缓冲都会被清零
    fn seed_from_bytes(&self, bytes: &mut [u8]) -> Result<KeyMaterial> {
        use ed25519_dalek::SigningKey;

        let seed = match bytes.len() {
            32 => Ok(KeyMaterial::new(bytes.to_vec())),
            64 => {
                let mut keypair = Zeroizing::new([0u8; 64]);
                keypair.copy_from_slice(bytes);
                SigningKey::from_keypair_bytes(&keypair)
                    .map(|signing_key| {
                        KeyMaterial::new(Zeroizing::new(signing_key.to_bytes()).to_vec())
                    })
                    .map_err(|_| anyhow::anyhow!("keypair public half does not match its seed"))
            }
            n => Err(anyhow::anyhow!(
                "expected 32-byte seed or 64-byte keypair, got {} bytes",
                n
            )),
        };
        bytes.zeroize();
        seed
    }
}

impl DerivationStrategy for Ed25519Strategy {
    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
    }

    fn parse_key(&self, encoded: &str) -> Result<KeyMaterial> {
        let trimmed = encoded.trim();

        let mut bytes = Zeroizing::new(if trimmed.starts_with('[') {
            // solana-keygen 文件格式
            serde_json::from_str::<Vec<u8>>(trimmed).context("invalid JSON byte array key")?
        } else if is_hex_prefixed(trimmed)
            || ((trimmed.len() == 64 || trimmed.len() == 128)
                && trimmed.chars().all(|c| c.is_ascii_hexdigit()))
        {
            hex::decode(strip_hex_prefix(trimmed)).context("invalid hex key")?
        } else {
            bs58::decode(trimmed)
                .into_vec()
                .map_err(|e| anyhow::anyhow!("invalid base58 key: {}", e))?
        });

        self.seed_from_bytes(&mut bytes)
    }

    fn derive_identity(&self, key: &KeyMaterial) -> Result<PublicIdentity> {
        use ed25519_dalek::SigningKey;

        let seed: [u8; 32] = key
            .as_bytes()
            .try_into()
            .map_err(|_| anyhow::anyhow!("ed25519 seed must be 32 bytes"))?;
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key_bytes = signing_key.verifying_key().to_bytes();

        // Solana 地址就是公钥的 Base58 编码
        Ok(PublicIdentity {
            family: ChainFamily::Solana,
            address: bs58::encode(&public_key_bytes).into_string(),
            public_key: public_key_bytes.to_vec(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 策略工厂
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 策略工厂
pub struct DerivationStrategyFactory;

impl DerivationStrategyFactory {
    /// 根据链族创建策略
    pub fn create_strategy(family: ChainFamily) -> Box<dyn DerivationStrategy> {
        match family {
            ChainFamily::Evm => Box::new(Secp256k1Strategy),
            ChainFamily::Solana => Box::new(Ed25519Strategy),
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVM_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const SOL_SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[test]
    fn test_ethereum_derivation() {
        let strategy = DerivationStrategyFactory::create_strategy(ChainFamily::Evm);
        let key = strategy.parse_key(EVM_KEY).unwrap();
        let identity = strategy.derive_identity(&key).unwrap();

        assert_eq!(identity.address, "0x70997970C51812dc3A010C7d01b50e0d17dc79C8");
        assert_eq!(identity.public_key.len(), 64);
    }

    #[test]
    fn test_ethereum_key_without_prefix() {
        let strategy = Secp256k1Strategy;
        let with = strategy.parse_key(EVM_KEY).unwrap();
        let without = strategy.parse_key(EVM_KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(
            strategy.derive_identity(&with).unwrap(),
            strategy.derive_identity(&without).unwrap()
        );
    }

    #[test]
    fn test_ethereum_rejects_bad_keys() {
        let strategy = Secp256k1Strategy;
        assert!(strategy.parse_key("0x1234").is_err());
        assert!(strategy.parse_key(&"zz".repeat(32)).is_err());
        assert!(strategy.parse_key(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_solana_derivation_rfc8032() {
        let strategy = DerivationStrategyFactory::create_strategy(ChainFamily::Solana);
        let key = strategy.parse_key(SOL_SEED_HEX).unwrap();
        let identity = strategy.derive_identity(&key).unwrap();

        assert_eq!(
            hex::encode(&identity.public_key),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
        assert_eq!(identity.address, "FVen3X669xLzsi6N2V91DoiyzHzg1uAgqiT8jZ9nS96Z");
    }

    #[test]
    fn test_solana_encodings_agree() {
        let strategy = Ed25519Strategy;
        let keypair_b58 =
            "49W385L4rePHy6PAaQUovbD2aacgN4HsKXSMeUzRg4fmwXszN91JuMFrQRj3vMDpZuRF3ZknQBuRBoWQJEfXstMw";
        let mut bytes = hex::decode(SOL_SEED_HEX).unwrap();
        bytes.extend(
            hex::decode("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
                .unwrap(),
        );
        let json_array = serde_json::to_string(&bytes).unwrap();

        let from_hex = strategy.parse_key(SOL_SEED_HEX).unwrap();
        let from_b58 = strategy.parse_key(keypair_b58).unwrap();
        let from_json = strategy.parse_key(&json_array).unwrap();

        let expected = strategy.derive_identity(&from_hex).unwrap();
        assert_eq!(strategy.derive_identity(&from_b58).unwrap(), expected);
        assert_eq!(strategy.derive_identity(&from_json).unwrap(), expected);
    }

    #[test]
    fn test_solana_rejects_mismatched_keypair() {
        let strategy = Ed25519Strategy;
        let mut bytes = hex::decode(SOL_SEED_HEX).unwrap();
        bytes.extend([7u8; 32]);
        let encoded = bs58::encode(&bytes).into_string();
        assert!(strategy.parse_key(&encoded).is_err());
        assert!(strategy.parse_key("not-base58-0OIl").is_err());
    }

    #[test]
    fn test_decoded_key_buffer_is_wiped() {
        let strategy = Ed25519Strategy;

        let mut seed = hex::decode(SOL_SEED_HEX).unwrap();
        let key = strategy.seed_from_bytes(&mut seed).unwrap();
        assert!(seed.iter().all(|b| *b == 0));
        assert_eq!(
            strategy.derive_identity(&key).unwrap().address,
            "FVen3X669xLzsi6N2V91DoiyzHzg1uAgqiT8jZ9nS96Z"
        );

        let mut keypair = bs58::decode(
            "49W385L4rePHy6PAaQUovbD2aacgN4HsKXSMeUzRg4fmwXszN91JuMFrQRj3vMDpZuRF3ZknQBuRBoWQJEfXstMw",
        )
        .into_vec()
        .unwrap();
        assert!(strategy.seed_from_bytes(&mut keypair).is_ok());
        assert!(keypair.iter().all(|b| *b == 0));

        let mut odd = vec![9u8; 40];
        assert!(strategy.seed_from_bytes(&mut odd).is_err());
        assert!(odd.iter().all(|b| *b == 0));
    }
}
