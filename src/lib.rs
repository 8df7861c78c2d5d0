//! Headless Wallet - 用于自动化测试的无界面多链钱包模拟器
//!
//! 页面脚本通过标准发现协议找到它、请求账户并拿到有效签名，无需人工审批。

pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod provider;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use error::{WalletError, WalletErrorCode};

pub mod prelude {
    pub use crate::{
        bootstrap::{bootstrap, teardown, InitPayload},
        config::{AccountSpec, BrandingConfig, LegacyBindingStrategy, UnknownNetworkPolicy, WalletConfig},
        domain::{ChainFamily, KeyStore, PublicIdentity},
        error::{RpcErrorBody, WalletError, WalletErrorCode},
        infrastructure::page_context::{GlobalBinding, PageContext},
        provider::{ChainProvider, ConnectionState, Provider, ProviderHandle, RequestArguments},
        service::discovery_broker::{discover, ProviderDetail, ProviderInfo},
        service::lifecycle_manager::{WalletEntryPoint, WalletId, WalletRegistry},
        service::signing_engine::SigningEngine,
    };
}
