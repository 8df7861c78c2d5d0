//! Domain 模块
//!
//! 链族与网络、账户与身份派生

pub mod account;
pub mod chain_config;
pub mod derivation;

// 重新导出常用类型
pub use account::{derive_identity, Account, AccountInfo, KeyLoadReport, KeyStore};
pub use chain_config::{ChainFamily, CurveType, EvmNetwork, NetworkRegistry, SolanaCluster};
pub use derivation::{DerivationStrategy, DerivationStrategyFactory, PublicIdentity};
