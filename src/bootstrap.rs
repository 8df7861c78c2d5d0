//! 驱动边界
//!
//! 浏览器驱动在页面脚本运行前注入 `InitPayload`，随后调用 `bootstrap`；
//! 每次导航后重新执行。`teardown` 对应卸载。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::WalletConfig;
use crate::error::{Result, WalletError};
use crate::infrastructure::page_context::PageContext;
use crate::service::lifecycle_manager::{WalletId, WalletRegistry};

/// 注入载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub config: WalletConfig,
    /// 入口对象的额外全局名，例如 `__headlessWallet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// 导航后重新注入时带上首次安装得到的 id，复用同一实例
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<WalletId>,
}

impl InitPayload {
    pub fn new(config: WalletConfig) -> Self {
        Self {
            config,
            entry_point: None,
            wallet_id: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| WalletError::InvalidConfiguration(format!("cannot encode payload: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| WalletError::InvalidConfiguration(format!("invalid init payload: {}", e)))
    }
}

/// 在页面上安装钱包（进程级注册表）
///
/// 载荷带有仍在注册表中的 `wallet_id` 时重新挂载该实例，否则新装一个
pub fn bootstrap(page: &Arc<PageContext>, payload: InitPayload) -> Result<WalletId> {
    let registry = WalletRegistry::global();
    if let Some(wallet_id) = payload.wallet_id {
        if registry.is_installed(wallet_id) {
            registry.reattach(wallet_id, page)?;
            return Ok(wallet_id);
        }
        tracing::debug!(wallet_id = %wallet_id, "wallet_id_unknown_installing_fresh");
    }

    let mut config = payload.config;
    config.apply_env_overrides();
    registry.install_with_alias(page, config, payload.entry_point.as_deref())
}

pub fn teardown(wallet_id: WalletId) -> bool {
    WalletRegistry::global().uninstall(wallet_id)
}
