//! 生命周期管理
//!
//! `install` 把账户存储、签名引擎、provider 和发现代理组装成一个钱包实例，
//! 并在页面上登记它获得的每一个全局绑定与监听器；`uninstall` 按这张所有权表
//! 逐项释放，只移除仍然是本实例所写的值。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{LegacyBindingStrategy, WalletConfig};
use crate::domain::account::KeyStore;
use crate::domain::chain_config::ChainFamily;
use crate::error::{Result, WalletError};
use crate::infrastructure::page_context::{GlobalBinding, PageContext};
use crate::provider::subscribers::ListenerId;
use crate::provider::{ChainProvider, Provider, ProviderHandle, ProviderSettings};
use crate::service::discovery_broker::{DiscoveryBroker, ProviderDetail, ProviderInfo};
use crate::service::signing_engine::SigningEngine;

/// 入口全局名前缀，完整名称为 `__headlessWallet:<walletId>`
pub const ENTRY_POINT_PREFIX: &str = "__headlessWallet:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(Uuid);

impl WalletId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn entry_point_global(&self) -> String {
        format!("{}{}", ENTRY_POINT_PREFIX, self.0)
    }
}

impl Default for WalletId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WalletId {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(WalletId)
            .map_err(|_| WalletError::invalid_params(format!("invalid wallet id {}", s)))
    }
}

/// 页面脚本通过入口全局拿到的对象
#[derive(Debug)]
pub struct WalletEntryPoint {
    pub wallet_id: WalletId,
    pub providers: Vec<ProviderDetail>,
}

impl WalletEntryPoint {
    pub fn provider(&self, family: ChainFamily) -> Option<ProviderHandle> {
        self.providers
            .iter()
            .find(|d| d.family == family)
            .map(|d| d.provider.clone())
    }

    pub fn families(&self) -> Vec<ChainFamily> {
        self.providers.iter().map(|d| d.family).collect()
    }
}

/// 安装过程中获得的页面资源
#[derive(Debug, Clone)]
pub enum AcquiredBinding {
    Global { name: String, binding: GlobalBinding },
    Listener(ListenerId),
}

/// 安装记录
pub struct InstallationRecord {
    pub wallet_id: WalletId,
    /// 已脱敏的配置快照
    pub config: WalletConfig,
    pub providers: Vec<ProviderHandle>,
    pub broker: Arc<DiscoveryBroker>,
    pub entry_point: Arc<WalletEntryPoint>,
    pub bindings: Vec<AcquiredBinding>,
    pub page: Weak<PageContext>,
    /// 入口对象的额外全局名
    pub entry_alias: Option<String>,
}

impl fmt::Debug for InstallationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationRecord")
            .field("wallet_id", &self.wallet_id)
            .field("providers", &self.providers.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// 释放所有权表中的页面资源
fn release_bindings(page: &PageContext, bindings: &[AcquiredBinding]) -> usize {
    let mut released = 0;
    for acquired in bindings.iter().rev() {
        let removed = match acquired {
            AcquiredBinding::Global { name, binding } => {
                page.remove_global_if(name, |current| current.same_as(binding))
            }
            AcquiredBinding::Listener(id) => page.remove_event_listener(*id),
        };
        if removed {
            released += 1;
        }
    }
    released
}

static GLOBAL_REGISTRY: Lazy<WalletRegistry> = Lazy::new(WalletRegistry::new);

/// 钱包实例注册表
#[derive(Default)]
pub struct WalletRegistry {
    installations: Mutex<HashMap<WalletId, InstallationRecord>>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级注册表
    pub fn global() -> &'static WalletRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn install(&self, page: &Arc<PageContext>, config: WalletConfig) -> Result<WalletId> {
        self.install_with_alias(page, config, None)
    }

    /// 安装；`entry_alias` 为入口对象额外的全局名（仅在槽位为空时设置）
    pub fn install_with_alias(
        &self,
        page: &Arc<PageContext>,
        config: WalletConfig,
        entry_alias: Option<&str>,
    ) -> Result<WalletId> {
        if !page.is_alive() {
            return Err(WalletError::ContextGone);
        }
        config
            .validate()
            .map_err(|e| WalletError::InvalidConfiguration(format!("{:#}", e)))?;

        let report = KeyStore::load(&config.accounts);
        if report.store.is_empty() {
            return Err(report.failures.into_iter().next().unwrap_or_else(|| {
                WalletError::InvalidConfiguration("no usable accounts".into())
            }));
        }
        for failure in &report.failures {
            tracing::warn!(error = %failure, "account_skipped");
        }

        let wallet_id = WalletId::new();
        let engine = SigningEngine::new(Arc::new(report.store));
        let settings = ProviderSettings::from_config(&config);

        let mut details = Vec::new();
        for family in engine.keys().families() {
            if let Some(provider) = Provider::new(family, engine.clone(), settings.clone())? {
                details.push(ProviderDetail {
                    info: ProviderInfo::new(&config.branding),
                    family,
                    provider: Arc::new(provider),
                });
            }
        }
        if details.is_empty() {
            return Err(WalletError::InvalidConfiguration(
                "no provider could be created".into(),
            ));
        }

        let entry_point = Arc::new(WalletEntryPoint {
            wallet_id,
            providers: details.clone(),
        });
        let broker = DiscoveryBroker::new(page);
        let mut bindings = Vec::new();

        let acquired = Self::acquire(
            page,
            &config,
            &entry_point,
            &broker,
            &details,
            entry_alias,
            &mut bindings,
        );
        if let Err(e) = acquired {
            release_bindings(page, &bindings);
            for detail in &details {
                detail.provider.shutdown();
            }
            tracing::warn!(wallet_id = %wallet_id, error = %e, "wallet_install_rolled_back");
            return Err(e);
        }

        let families: Vec<String> = details.iter().map(|d| d.family.to_string()).collect();
        tracing::info!(
            wallet_id = %wallet_id,
            page = %page.id(),
            families = ?families,
            bindings = bindings.len(),
            "wallet_installed"
        );

        let record = InstallationRecord {
            wallet_id,
            config: config.redacted(),
            providers: details.iter().map(|d| d.provider.clone()).collect(),
            broker,
            entry_point,
            bindings,
            page: Arc::downgrade(page),
            entry_alias: entry_alias.map(str::to_string),
        };
        self.installations.lock().insert(wallet_id, record);
        Ok(wallet_id)
    }

    /// 把已安装的实例重新挂到页面上（导航后的新文档，或另一个页面）
    ///
    /// 沿用原有 provider 与描述符 uuid，连接状态不变；旧绑定先按所有权表释放，
    /// 新获取的绑定替换记录中的条目，之后一次 `uninstall` 即可清理干净。
    pub fn reattach(&self, wallet_id: WalletId, page: &Arc<PageContext>) -> Result<()> {
        if !page.is_alive() {
            return Err(WalletError::ContextGone);
        }

        let (config, entry_point, alias, old_broker, old_page, old_bindings) = {
            let mut installations = self.installations.lock();
            let record = installations.get_mut(&wallet_id).ok_or_else(|| {
                WalletError::InvalidConfiguration(format!("wallet {} is not installed", wallet_id))
            })?;
            (
                record.config.clone(),
                record.entry_point.clone(),
                record.entry_alias.clone(),
                record.broker.clone(),
                record.page.upgrade(),
                std::mem::take(&mut record.bindings),
            )
        };

        old_broker.clear();
        if let Some(old_page) = old_page.filter(|p| p.is_alive()) {
            release_bindings(&old_page, &old_bindings);
        }

        let broker = DiscoveryBroker::new(page);
        let mut bindings = Vec::new();
        let acquired = Self::acquire(
            page,
            &config,
            &entry_point,
            &broker,
            &entry_point.providers,
            alias.as_deref(),
            &mut bindings,
        );
        if let Err(e) = acquired {
            release_bindings(page, &bindings);
            broker.clear();
            tracing::warn!(wallet_id = %wallet_id, error = %e, "wallet_reattach_failed");
            return Err(e);
        }

        let mut installations = self.installations.lock();
        match installations.get_mut(&wallet_id) {
            Some(record) => {
                record.broker = broker;
                record.bindings = bindings;
                record.page = Arc::downgrade(page);
                tracing::info!(
                    wallet_id = %wallet_id,
                    page = %page.id(),
                    generation = page.generation(),
                    bindings = record.bindings.len(),
                    "wallet_reattached"
                );
                Ok(())
            }
            None => {
                // 期间被并发卸载
                drop(installations);
                release_bindings(page, &bindings);
                broker.clear();
                Err(WalletError::InvalidConfiguration(format!(
                    "wallet {} was uninstalled during reattach",
                    wallet_id
                )))
            }
        }
    }

    /// 依次获取页面资源，每获取一项就记入 `bindings`
    fn acquire(
        page: &Arc<PageContext>,
        config: &WalletConfig,
        entry_point: &Arc<WalletEntryPoint>,
        broker: &Arc<DiscoveryBroker>,
        details: &[ProviderDetail],
        entry_alias: Option<&str>,
        bindings: &mut Vec<AcquiredBinding>,
    ) -> Result<()> {
        let entry = GlobalBinding::EntryPoint(entry_point.clone());
        let entry_name = entry_point.wallet_id.entry_point_global();
        page.set_global(&entry_name, entry.clone())?;
        bindings.push(AcquiredBinding::Global {
            name: entry_name,
            binding: entry.clone(),
        });

        if let Some(alias) = entry_alias {
            if page.set_global_if_absent(alias, entry.clone())? {
                bindings.push(AcquiredBinding::Global {
                    name: alias.to_string(),
                    binding: entry,
                });
            }
        }

        for detail in details {
            let name = detail.family.legacy_global();
            let binding = GlobalBinding::Provider(detail.provider.clone());
            let bound = match config.legacy_binding {
                LegacyBindingStrategy::Always => {
                    page.set_global(name, binding.clone())?;
                    true
                }
                LegacyBindingStrategy::IfAbsent => page.set_global_if_absent(name, binding.clone())?,
                LegacyBindingStrategy::Never => false,
            };
            if bound {
                bindings.push(AcquiredBinding::Global {
                    name: name.to_string(),
                    binding,
                });
            } else if config.legacy_binding == LegacyBindingStrategy::IfAbsent {
                tracing::debug!(global = name, "legacy_global_occupied");
            }
        }

        let listener = broker.attach()?;
        bindings.push(AcquiredBinding::Listener(listener));

        for detail in details {
            broker.register(detail.clone())?;
        }
        Ok(())
    }

    /// 卸载；可重复调用，页面已不存在时只记录日志
    ///
    /// 返回是否找到了对应的安装记录
    pub fn uninstall(&self, wallet_id: WalletId) -> bool {
        let Some(record) = self.installations.lock().remove(&wallet_id) else {
            tracing::debug!(wallet_id = %wallet_id, "wallet_not_installed");
            return false;
        };
        Self::teardown_record(record);
        true
    }

    fn teardown_record(record: InstallationRecord) {
        for provider in &record.providers {
            provider.shutdown();
        }
        record.broker.clear();

        match record.page.upgrade().filter(|p| p.is_alive()) {
            Some(page) => {
                let released = release_bindings(&page, &record.bindings);
                tracing::info!(
                    wallet_id = %record.wallet_id,
                    released,
                    acquired = record.bindings.len(),
                    "wallet_uninstalled"
                );
            }
            None => {
                tracing::info!(
                    wallet_id = %record.wallet_id,
                    "wallet_uninstalled_page_gone"
                );
            }
        }
    }

    pub fn is_installed(&self, wallet_id: WalletId) -> bool {
        self.installations.lock().contains_key(&wallet_id)
    }

    pub fn entry_point(&self, wallet_id: WalletId) -> Option<Arc<WalletEntryPoint>> {
        self.installations
            .lock()
            .get(&wallet_id)
            .map(|r| r.entry_point.clone())
    }

    /// 安装时的脱敏配置
    pub fn config_snapshot(&self, wallet_id: WalletId) -> Option<WalletConfig> {
        self.installations
            .lock()
            .get(&wallet_id)
            .map(|r| r.config.clone())
    }

    pub fn wallet_ids(&self) -> Vec<WalletId> {
        let mut ids: Vec<WalletId> = self.installations.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.installations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.installations.lock().is_empty()
    }

    /// 整体清理（进程退出时）
    pub fn clear(&self) {
        let records: Vec<InstallationRecord> =
            self.installations.lock().drain().map(|(_, r)| r).collect();
        for record in records {
            Self::teardown_record(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountSpec;
    use crate::provider::ConnectionState;
    use crate::service::discovery_broker::discover;
    use serde_json::json;

    const EVM_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const SOL_KEY: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn config() -> WalletConfig {
        WalletConfig::with_accounts(vec![AccountSpec::evm(EVM_KEY), AccountSpec::solana(SOL_KEY)])
    }

    #[test]
    fn test_install_binds_entry_point_and_legacy_globals() {
        let registry = WalletRegistry::new();
        let page = PageContext::new();
        let id = registry.install(&page, config()).unwrap();

        let entry = page
            .get_global(&id.entry_point_global())
            .and_then(|b| b.as_entry_point().cloned())
            .unwrap();
        assert_eq!(entry.families(), vec![ChainFamily::Evm, ChainFamily::Solana]);
        assert!(page.get_global("ethereum").unwrap().as_provider().is_some());
        assert!(page.get_global("solana").unwrap().as_provider().is_some());
        assert_eq!(discover(&page).unwrap().len(), 2);
    }

    #[test]
    fn test_uninstall_is_idempotent_and_leaves_foreign_values() {
        let registry = WalletRegistry::new();
        let page = PageContext::new();
        let id = registry.install(&page, config()).unwrap();
        let provider = registry.entry_point(id).unwrap().provider(ChainFamily::Evm).unwrap();

        // 另一个脚本覆盖了 solana 全局
        page.set_global("solana", GlobalBinding::Value(json!("someone else")))
            .unwrap();

        assert!(registry.uninstall(id));
        assert!(!registry.uninstall(id));
        assert!(!registry.is_installed(id));
        assert_eq!(page.global_names(), vec!["solana"]);
        assert!(discover(&page).unwrap().is_empty());
        assert_eq!(provider.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_install_fails_for_unusable_accounts_without_side_effects() {
        let registry = WalletRegistry::new();
        let page = PageContext::new();
        let err = registry
            .install(&page, WalletConfig::with_accounts(vec![AccountSpec::evm("0x12")]))
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidKeyMaterial { index: 0, .. }));
        assert!(page.global_names().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_uninstall_after_page_destroyed() {
        let registry = WalletRegistry::new();
        let page = PageContext::new();
        let id = registry.install(&page, config()).unwrap();
        page.destroy();
        assert!(registry.uninstall(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_config_snapshot_is_redacted() {
        let registry = WalletRegistry::new();
        let page = PageContext::new();
        let id = registry.install(&page, config()).unwrap();
        let snapshot = registry.config_snapshot(id).unwrap();
        let printed = serde_json::to_string(&snapshot).unwrap();
        assert!(!printed.contains(EVM_KEY));
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wallet_id_parsing() {
        let id = WalletId::new();
        assert_eq!(id.to_string().parse::<WalletId>().unwrap(), id);
        assert!("nope".parse::<WalletId>().is_err());
        assert!(id.entry_point_global().starts_with(ENTRY_POINT_PREFIX));
    }

    #[tokio::test]
    async fn test_reattach_after_navigation_keeps_one_wallet() {
        let registry = WalletRegistry::new();
        let page = PageContext::new();
        let id = registry.install_with_alias(&page, config(), Some("__hw")).unwrap();
        let evm = registry.entry_point(id).unwrap().provider(ChainFamily::Evm).unwrap();
        evm.request("eth_requestAccounts", json!([])).await.unwrap();
        let uuids: Vec<String> = discover(&page)
            .unwrap()
            .into_iter()
            .map(|d| d.info.uuid)
            .collect();

        for generation in 1..=2 {
            page.navigate();
            assert!(discover(&page).unwrap().is_empty());

            registry.reattach(id, &page).unwrap();
            assert_eq!(page.generation(), generation);
            assert_eq!(registry.len(), 1);
            assert!(page.has_global("__hw"));
            assert_eq!(page.listener_count(crate::service::discovery_broker::REQUEST_EVENT), 1);

            let found = discover(&page).unwrap();
            let again: Vec<String> = found.iter().map(|d| d.info.uuid.clone()).collect();
            assert_eq!(again, uuids);
            let legacy = page.get_global("ethereum").unwrap();
            assert!(Arc::ptr_eq(legacy.as_provider().unwrap(), &evm));
            assert_eq!(evm.connection_state(), ConnectionState::Connected);
        }

        assert!(registry.uninstall(id));
        assert!(page.global_names().is_empty());
        assert_eq!(page.listener_count(crate::service::discovery_broker::REQUEST_EVENT), 0);
    }

    #[test]
    fn test_reattach_without_navigation_does_not_duplicate() {
        let registry = WalletRegistry::new();
        let page = PageContext::new();
        let id = registry.install(&page, config()).unwrap();
        registry.reattach(id, &page).unwrap();
        assert_eq!(discover(&page).unwrap().len(), 2);

        let other = PageContext::new();
        registry.reattach(id, &other).unwrap();
        assert!(page.global_names().is_empty());
        assert_eq!(discover(&other).unwrap().len(), 2);

        assert!(registry.reattach(WalletId::new(), &other).is_err());
        other.destroy();
        assert_eq!(registry.reattach(id, &other).unwrap_err(), WalletError::ContextGone);
    }
}
