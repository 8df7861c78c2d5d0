//! 测试辅助模块
//! 已公开的测试私钥及其对应身份

#![allow(dead_code)]

use std::sync::Arc;

use headless_wallet::prelude::*;

/// Hardhat 默认账户 #1
pub const EVM_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const EVM_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

/// web3.js 文档中的示例私钥
pub const EVM_KEY_2: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const EVM_ADDRESS_2: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";

/// RFC 8032 test 1
pub const SOLANA_SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
pub const SOLANA_KEYPAIR_B58: &str =
    "49W385L4rePHy6PAaQUovbD2aacgN4HsKXSMeUzRg4fmwXszN91JuMFrQRj3vMDpZuRF3ZknQBuRBoWQJEfXstMw";
pub const SOLANA_PUBKEY: &str = "FVen3X669xLzsi6N2V91DoiyzHzg1uAgqiT8jZ9nS96Z";

/// RFC 8032 test 2
pub const SOLANA_SEED_2: &str = "4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb";
pub const SOLANA_PUBKEY_2: &str = "586Z7H2vpX9qNhN2T4e9Utugie3ogjbxzGaMtM3E6HR5";

/// 一个 EVM 账户 + 一个 Solana 账户
pub fn dual_chain_config() -> WalletConfig {
    WalletConfig::with_accounts(vec![
        AccountSpec::evm(EVM_KEY),
        AccountSpec::solana(SOLANA_SEED),
    ])
}

/// 独立注册表 + 新页面上安装
pub fn install_fresh(config: WalletConfig) -> (WalletRegistry, Arc<PageContext>, WalletId) {
    let registry = WalletRegistry::new();
    let page = PageContext::new();
    let id = registry
        .install(&page, config)
        .expect("install should succeed");
    (registry, page, id)
}

pub fn provider_for(page: &PageContext, id: WalletId, family: ChainFamily) -> ProviderHandle {
    page.get_global(&id.entry_point_global())
        .and_then(|b| b.as_entry_point().cloned())
        .and_then(|entry| entry.provider(family))
        .expect("provider should be exposed through the entry point")
}
