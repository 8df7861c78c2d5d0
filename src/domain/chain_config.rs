//! 链族与网络配置
//!
//! 定义两个支持的链族（EVM / Solana）及其可识别的网络

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 链族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// secp256k1 + keccak 地址 (Ethereum, BSC, Polygon, Base ...)
    Evm,
    /// ed25519 + base58 公钥
    Solana,
}

/// 加密曲线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    Secp256k1,
    Ed25519,
}

impl ChainFamily {
    pub const ALL: [ChainFamily; 2] = [ChainFamily::Evm, ChainFamily::Solana];

    pub fn curve_type(&self) -> CurveType {
        match self {
            ChainFamily::Evm => CurveType::Secp256k1,
            ChainFamily::Solana => CurveType::Ed25519,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Solana => "solana",
        }
    }

    /// 旧式全局绑定名 (`window.ethereum` / `window.solana`)
    pub fn legacy_global(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "ethereum",
            ChainFamily::Solana => "solana",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EIP-2294 建议的 chain id 上限，保证 EIP-155 的 `v` 不溢出 u64
pub const MAX_EVM_CHAIN_ID: u64 = u64::MAX / 2 - 36;

/// EVM 网络
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmNetwork {
    /// EIP-155 chain id
    pub chain_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

impl EvmNetwork {
    pub fn new(chain_id: u64, name: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            rpc_url: None,
        }
    }

    pub fn is_valid_chain_id(chain_id: u64) -> bool {
        chain_id > 0 && chain_id <= MAX_EVM_CHAIN_ID
    }

    /// `0x` 前缀的十六进制 chain id
    pub fn hex_id(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }
}

/// Solana 集群
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolanaCluster {
    /// 集群标识 (mainnet-beta, devnet, ...)
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

impl SolanaCluster {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rpc_url: None,
        }
    }

    /// wallet-standard 链标识，例如 `solana:devnet`
    pub fn chain_identifier(&self) -> String {
        let short = self.id.strip_suffix("-beta").unwrap_or(&self.id);
        format!("solana:{}", short)
    }
}

/// 可识别网络的注册表
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    evm: BTreeMap<u64, EvmNetwork>,
    solana: BTreeMap<String, SolanaCluster>,
}

impl NetworkRegistry {
    /// 创建预配置的注册表
    pub fn new() -> Self {
        let mut registry = Self {
            evm: BTreeMap::new(),
            solana: BTreeMap::new(),
        };

        for (chain_id, name) in [
            (1, "Ethereum Mainnet"),
            (10, "OP Mainnet"),
            (56, "BNB Smart Chain"),
            (137, "Polygon"),
            (8453, "Base"),
            (42161, "Arbitrum One"),
            (11155111, "Sepolia"),
            (31337, "Localhost"),
        ] {
            registry.add_evm(EvmNetwork::new(chain_id, name));
        }

        for id in ["mainnet-beta", "devnet", "testnet", "localnet"] {
            registry.add_solana(SolanaCluster::new(id));
        }

        registry
    }

    pub fn add_evm(&mut self, network: EvmNetwork) {
        self.evm.insert(network.chain_id, network);
    }

    pub fn add_solana(&mut self, cluster: SolanaCluster) {
        self.solana.insert(cluster.id.clone(), cluster);
    }

    pub fn evm(&self, chain_id: u64) -> Option<&EvmNetwork> {
        self.evm.get(&chain_id)
    }

    /// 支持集群名或 `solana:` 前缀的链标识
    pub fn solana(&self, id: &str) -> Option<&SolanaCluster> {
        if let Some(cluster) = self.solana.get(id) {
            return Some(cluster);
        }
        let short = id.strip_prefix("solana:")?;
        self.solana
            .values()
            .find(|c| c.id == short || c.chain_identifier() == id)
    }

    pub fn list_evm(&self) -> Vec<&EvmNetwork> {
        self.evm.values().collect()
    }

    pub fn list_solana(&self) -> Vec<&SolanaCluster> {
        self.solana.values().collect()
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new()
    }
}
