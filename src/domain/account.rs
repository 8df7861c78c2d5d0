//! 账户与密钥材料存储
//!
//! 私钥只在两处被读取：身份派生和签名。两者都通过 `with_key_material`
//! 的作用域借用完成，闭包返回后不再暴露任何原始字节。

use std::fmt;

use serde::Serialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::AccountSpec;
use crate::domain::chain_config::ChainFamily;
use crate::domain::derivation::{DerivationStrategyFactory, PublicIdentity};
use crate::error::WalletError;
use crate::utils::address_validator::AddressValidator;

/// 原始私钥字节，释放时清零
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([redacted])")
    }
}

/// 账户
///
/// 构造后不可变；`identity` 由私钥派生
pub struct Account {
    /// 在配置中的位置
    index: usize,
    identity: PublicIdentity,
    key: KeyMaterial,
}

impl Account {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn family(&self) -> ChainFamily {
        self.identity.family
    }

    pub fn address(&self) -> &str {
        &self.identity.address
    }

    pub fn identity(&self) -> &PublicIdentity {
        &self.identity
    }

    /// 对外可见的账户信息（不含私钥）
    pub fn info(&self) -> AccountInfo {
        AccountInfo {
            index: self.index,
            family: self.family(),
            address: self.identity.address.clone(),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("index", &self.index)
            .field("identity", &self.identity)
            .field("key", &self.key)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub index: usize,
    pub family: ChainFamily,
    pub address: String,
}

/// 派生公开身份
pub fn derive_identity(
    private_key: &str,
    family: ChainFamily,
) -> Result<PublicIdentity, WalletError> {
    let strategy = DerivationStrategyFactory::create_strategy(family);
    strategy
        .parse_key(private_key)
        .and_then(|key| strategy.derive_identity(&key))
        .map_err(|e| WalletError::InvalidKeyMaterial {
            index: 0,
            reason: e.to_string(),
        })
}

/// 加载结果：成功的账户与逐条失败
#[derive(Debug)]
pub struct KeyLoadReport {
    pub store: KeyStore,
    pub failures: Vec<WalletError>,
}

/// 密钥材料存储
#[derive(Debug, Default)]
pub struct KeyStore {
    accounts: Vec<Account>,
}

impl KeyStore {
    /// 从配置加载账户
    ///
    /// 单个账户的 `InvalidKeyMaterial` 只影响该账户，其余照常加载
    pub fn load(specs: &[AccountSpec]) -> KeyLoadReport {
        let mut accounts = Vec::with_capacity(specs.len());
        let mut failures = Vec::new();

        for (index, spec) in specs.iter().enumerate() {
            let strategy = DerivationStrategyFactory::create_strategy(spec.family);
            let loaded = strategy.parse_key(spec.private_key()).and_then(|key| {
                strategy
                    .derive_identity(&key)
                    .map(|identity| (identity, key))
            });

            match loaded {
                Ok((identity, key)) => {
                    tracing::debug!(
                        index,
                        family = %spec.family,
                        address = %identity.address,
                        "account_loaded"
                    );
                    accounts.push(Account {
                        index,
                        identity,
                        key,
                    });
                }
                Err(e) => {
                    tracing::warn!(index, family = %spec.family, error = %e, "account_rejected");
                    failures.push(WalletError::InvalidKeyMaterial {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        KeyLoadReport {
            store: KeyStore { accounts },
            failures,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// 按配置顺序列出某链族的账户
    pub fn accounts_for(&self, family: ChainFamily) -> Vec<&Account> {
        self.accounts
            .iter()
            .filter(|a| a.family() == family)
            .collect()
    }

    pub fn families(&self) -> Vec<ChainFamily> {
        ChainFamily::ALL
            .into_iter()
            .filter(|f| self.accounts.iter().any(|a| a.family() == *f))
            .collect()
    }

    pub fn find(&self, family: ChainFamily, address: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.family() == family && AddressValidator::same_address(family, a.address(), address))
    }

    /// 作用域内借出私钥字节
    ///
    /// 未知账户返回 `SigningError`
    pub(crate) fn with_key_material<R>(
        &self,
        family: ChainFamily,
        address: &str,
        f: impl FnOnce(&KeyMaterial) -> R,
    ) -> Result<R, WalletError> {
        let account = self
            .find(family, address)
            .ok_or_else(|| WalletError::signing(format!("unknown {} account {}", family, address)))?;
        Ok(f(&account.key))
    }
}
