//! 配置管理模块
//! 支持从 TOML 文件、JSON 初始化载荷和环境变量加载钱包配置

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::domain::chain_config::{ChainFamily, EvmNetwork, NetworkRegistry, SolanaCluster};

pub const ENV_DEBUG: &str = "HEADLESS_WALLET_DEBUG";
pub const ENV_AUTO_CONNECT: &str = "HEADLESS_WALLET_AUTO_CONNECT";

/// 钱包配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    pub accounts: Vec<AccountSpec>,
    #[serde(default)]
    pub branding: BrandingConfig,
    /// 为 true 时 Provider 以已连接状态创建（等同于站点已授权）
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub legacy_binding: LegacyBindingStrategy,
    /// 逐条记录请求及结果
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub unknown_network_policy: UnknownNetworkPolicy,
    #[serde(default)]
    pub networks: NetworksConfig,
}

/// 账户配置项
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountSpec {
    pub family: ChainFamily,
    private_key: Zeroizing<String>,
}

impl AccountSpec {
    pub fn new(family: ChainFamily, private_key: impl Into<String>) -> Self {
        Self {
            family,
            private_key: Zeroizing::new(private_key.into()),
        }
    }

    pub fn evm(private_key: impl Into<String>) -> Self {
        Self::new(ChainFamily::Evm, private_key)
    }

    pub fn solana(private_key: impl Into<String>) -> Self {
        Self::new(ChainFamily::Solana, private_key)
    }

    pub(crate) fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for AccountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSpec")
            .field("family", &self.family)
            .field("private_key", &"[redacted]")
            .finish()
    }
}

/// 品牌信息（出现在发现协议的描述符中）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandingConfig {
    pub name: String,
    /// 反向域名标识，例如 `dev.headless.wallet`
    pub rdns: String,
    /// data URI 图标
    pub icon: String,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            name: "Headless Wallet".into(),
            rdns: "dev.headless.wallet".into(),
            icon: DEFAULT_ICON.into(),
        }
    }
}

const DEFAULT_ICON: &str = "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg' viewBox='0 0 32 32'%3E%3Crect width='32' height='32' rx='6' fill='%23222'/%3E%3C/svg%3E";

/// 旧式全局绑定策略，安装时解析一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyBindingStrategy {
    /// 无条件设置（覆盖已有值）
    #[default]
    Always,
    /// 仅在全局槽位为空时设置
    IfAbsent,
    /// 不设置
    Never,
}

/// 切换到未注册网络时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownNetworkPolicy {
    /// 返回 `UnsupportedNetwork`，状态不变
    #[default]
    Reject,
    /// 注册一个占位网络并切换
    Accept,
}

/// 网络配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworksConfig {
    #[serde(default = "default_evm_chain_id")]
    pub evm_chain_id: u64,
    #[serde(default = "default_solana_cluster")]
    pub solana_cluster: String,
    #[serde(default)]
    pub extra_evm_chains: Vec<EvmNetwork>,
    #[serde(default)]
    pub extra_solana_clusters: Vec<SolanaCluster>,
}

fn default_evm_chain_id() -> u64 {
    1
}

fn default_solana_cluster() -> String {
    "mainnet-beta".into()
}

impl Default for NetworksConfig {
    fn default() -> Self {
        Self {
            evm_chain_id: default_evm_chain_id(),
            solana_cluster: default_solana_cluster(),
            extra_evm_chains: Vec::new(),
            extra_solana_clusters: Vec::new(),
        }
    }
}

impl NetworksConfig {
    /// 内置网络 + 配置追加的网络
    pub fn registry(&self) -> NetworkRegistry {
        let mut registry = NetworkRegistry::new();
        for network in &self.extra_evm_chains {
            registry.add_evm(network.clone());
        }
        for cluster in &self.extra_solana_clusters {
            registry.add_solana(cluster.clone());
        }
        registry
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }
        if self.format != "json" && self.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }
        Ok(())
    }
}

impl WalletConfig {
    /// 最小配置：给定账户，其余取默认值
    pub fn with_accounts(accounts: Vec<AccountSpec>) -> Self {
        Self {
            accounts,
            branding: BrandingConfig::default(),
            auto_connect: false,
            legacy_binding: LegacyBindingStrategy::default(),
            debug: false,
            unknown_network_policy: UnknownNetworkPolicy::default(),
            networks: NetworksConfig::default(),
        }
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config file as TOML")
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).with_context(|| "Failed to parse wallet config JSON")
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let flag = |v: String| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        if let Some(v) = lookup(ENV_DEBUG) {
            self.debug = flag(v);
        }
        if let Some(v) = lookup(ENV_AUTO_CONNECT) {
            self.auto_connect = flag(v);
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.accounts.is_empty() {
            anyhow::bail!("at least one account must be configured");
        }

        if self.branding.name.trim().is_empty() {
            anyhow::bail!("branding.name must not be empty");
        }

        // rdns: 至少两段，每段为字母数字或连字符
        let labels: Vec<&str> = self.branding.rdns.split('.').collect();
        let valid_rdns = labels.len() >= 2
            && labels.iter().all(|l| {
                !l.is_empty() && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            });
        if !valid_rdns {
            anyhow::bail!("branding.rdns must be reverse-DNS, got {:?}", self.branding.rdns);
        }

        if let Some(bad) = self
            .networks
            .extra_evm_chains
            .iter()
            .find(|n| !EvmNetwork::is_valid_chain_id(n.chain_id))
        {
            anyhow::bail!("networks.extra_evm_chains: chain id {} out of range", bad.chain_id);
        }

        let registry = self.networks.registry();
        let has_family = |family| self.accounts.iter().any(|a| a.family == family);
        if has_family(ChainFamily::Evm) && registry.evm(self.networks.evm_chain_id).is_none() {
            anyhow::bail!(
                "networks.evm_chain_id {} is not a registered network",
                self.networks.evm_chain_id
            );
        }
        if has_family(ChainFamily::Solana) && registry.solana(&self.networks.solana_cluster).is_none()
        {
            anyhow::bail!(
                "networks.solana_cluster {:?} is not a registered cluster",
                self.networks.solana_cluster
            );
        }

        Ok(())
    }

    /// 去掉私钥的快照，供安装记录保存
    pub fn redacted(&self) -> Self {
        let mut snapshot = self.clone();
        for account in &mut snapshot.accounts {
            account.private_key = Zeroizing::new("[redacted]".to_string());
        }
        snapshot
    }
}
