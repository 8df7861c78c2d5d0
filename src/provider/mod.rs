//! 链 Provider 状态机
//!
//! 每个链族一个实现，共享同一个 `ChainProvider` 接口，通过封闭的
//! `Provider` 枚举分发。页面脚本拿到的是 `ProviderHandle`。

pub mod evm;
pub mod solana;
pub mod subscribers;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{UnknownNetworkPolicy, WalletConfig};
use crate::domain::chain_config::{ChainFamily, NetworkRegistry};
use crate::error::{Result, WalletError};
use crate::infrastructure::log_redact::redact_params;
use crate::service::signing_engine::SigningEngine;

pub use evm::EvmProvider;
pub use solana::SolanaProvider;
pub use subscribers::{ListenerId, ProviderListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// 构造 provider 所需的配置切片
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub auto_connect: bool,
    pub debug: bool,
    pub unknown_network_policy: UnknownNetworkPolicy,
    pub networks: NetworkRegistry,
    pub evm_chain_id: u64,
    pub solana_cluster: String,
}

impl ProviderSettings {
    pub fn from_config(config: &WalletConfig) -> Self {
        Self {
            auto_connect: config.auto_connect,
            debug: config.debug,
            unknown_network_policy: config.unknown_network_policy,
            networks: config.networks.registry(),
            evm_chain_id: config.networks.evm_chain_id,
            solana_cluster: config.networks.solana_cluster.clone(),
        }
    }
}

/// EIP-1193 `request` 参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Provider 公共接口
#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn family(&self) -> ChainFamily;

    fn connection_state(&self) -> ConnectionState;

    fn active_account(&self) -> Option<String>;

    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    fn on(&self, event: &str, listener: ProviderListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    /// 断开并清空订阅；之后的请求返回 `Disconnected`
    fn shutdown(&self);
}

pub enum Provider {
    Evm(EvmProvider),
    Solana(SolanaProvider),
}

pub type ProviderHandle = Arc<Provider>;

impl Provider {
    /// 为某链族创建 provider；该链族没有可用账户时返回 `None`
    pub fn new(
        family: ChainFamily,
        engine: SigningEngine,
        settings: ProviderSettings,
    ) -> Result<Option<Self>> {
        let accounts: Vec<String> = engine
            .keys()
            .accounts_for(family)
            .into_iter()
            .map(|a| a.address().to_string())
            .collect();
        if accounts.is_empty() {
            return Ok(None);
        }

        let provider = match family {
            ChainFamily::Evm => Provider::Evm(EvmProvider::new(engine, accounts, settings)?),
            ChainFamily::Solana => {
                Provider::Solana(SolanaProvider::new(engine, accounts, settings)?)
            }
        };
        Ok(Some(provider))
    }

    fn inner(&self) -> &dyn ChainProvider {
        match self {
            Provider::Evm(p) => p,
            Provider::Solana(p) => p,
        }
    }

    fn debug_enabled(&self) -> bool {
        match self {
            Provider::Evm(p) => p.debug_enabled(),
            Provider::Solana(p) => p.debug_enabled(),
        }
    }

    /// 页面脚本形式的 `request({ method, params })`
    pub async fn request_args(&self, args: RequestArguments) -> Result<Value> {
        self.request(&args.method, args.params).await
    }
}

#[async_trait]
impl ChainProvider for Provider {
    fn family(&self) -> ChainFamily {
        self.inner().family()
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner().connection_state()
    }

    fn active_account(&self) -> Option<String> {
        self.inner().active_account()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let family = self.family();
        let debug = self.debug_enabled();
        if debug {
            tracing::info!(%family, method, params = %redact_params(&params), "provider_request");
        } else {
            tracing::debug!(%family, method, params = %redact_params(&params), "provider_request");
        }

        let outcome = self.inner().request(method, params).await;

        match &outcome {
            Ok(_) if debug => tracing::info!(%family, method, "provider_request_ok"),
            Ok(_) => tracing::debug!(%family, method, "provider_request_ok"),
            Err(e) if debug => {
                tracing::info!(%family, method, error = %e, code = e.rpc_code(), "provider_request_failed")
            }
            Err(e) => {
                tracing::debug!(%family, method, error = %e, code = e.rpc_code(), "provider_request_failed")
            }
        }
        outcome
    }

    fn on(&self, event: &str, listener: ProviderListener) -> ListenerId {
        self.inner().on(event, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner().remove_listener(id)
    }

    fn shutdown(&self) {
        self.inner().shutdown()
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("family", &self.family())
            .field("connection", &self.connection_state())
            .finish()
    }
}

// ============ 参数辅助 ============

/// 位置参数（EVM 的 params 是数组）
pub(crate) fn positional(params: &Value, index: usize) -> Option<&Value> {
    match params {
        Value::Array(items) => items.get(index).filter(|v| !v.is_null()),
        _ => None,
    }
}

pub(crate) fn required_str<'a>(params: &'a Value, index: usize, what: &str) -> Result<&'a str> {
    positional(params, index)
        .and_then(Value::as_str)
        .ok_or_else(|| WalletError::invalid_params(format!("missing {} (param #{})", what, index)))
}

/// 命名参数（Solana 的 params 是对象）
pub(crate) fn named<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    params.as_object().and_then(|o| o.get(key)).filter(|v| !v.is_null())
}
