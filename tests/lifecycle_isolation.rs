//! 生命周期：多实例隔离、卸载与页面导航

mod common;

use std::sync::Arc;

use common::*;
use headless_wallet::prelude::*;
use serde_json::json;

#[test]
fn test_uninstall_removes_every_owned_binding() {
    let (registry, page, id) = install_fresh(dual_chain_config());
    assert_eq!(
        page.global_names(),
        vec![id.entry_point_global(), "ethereum".to_string(), "solana".to_string()]
    );
    assert_eq!(page.listener_count("eip6963:requestProvider"), 1);

    assert!(registry.uninstall(id));
    assert!(page.global_names().is_empty());
    assert_eq!(page.listener_count("eip6963:requestProvider"), 0);
    assert!(discover(&page).unwrap().is_empty());

    // 重复卸载无副作用
    assert!(!registry.uninstall(id));
}

#[tokio::test]
async fn test_two_wallets_on_one_page_are_isolated() {
    let registry = WalletRegistry::new();
    let page = PageContext::new();

    let first = registry.install(&page, dual_chain_config()).unwrap();
    let second = registry
        .install(
            &page,
            WalletConfig::with_accounts(vec![
                AccountSpec::evm(EVM_KEY_2),
                AccountSpec::solana(SOLANA_SEED_2),
            ]),
        )
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(discover(&page).unwrap().len(), 4);

    // 不同私钥派生出不同身份
    let mut evm_accounts = Vec::new();
    let mut solana_keys = Vec::new();
    for id in [first, second] {
        let evm = provider_for(&page, id, ChainFamily::Evm);
        evm_accounts.push(evm.request("eth_requestAccounts", json!([])).await.unwrap());
        let solana = provider_for(&page, id, ChainFamily::Solana);
        solana_keys.push(solana.request("connect", json!({})).await.unwrap()["publicKey"].clone());
    }
    assert_eq!(evm_accounts, vec![json!([EVM_ADDRESS]), json!([EVM_ADDRESS_2])]);
    assert_eq!(solana_keys, vec![json!(SOLANA_PUBKEY), json!(SOLANA_PUBKEY_2)]);
    assert_ne!(evm_accounts[0], evm_accounts[1]);
    assert_ne!(solana_keys[0], solana_keys[1]);

    // 后安装者覆盖旧式全局
    let second_evm = provider_for(&page, second, ChainFamily::Evm);
    let legacy = page.get_global("ethereum").unwrap();
    assert!(Arc::ptr_eq(legacy.as_provider().unwrap(), &second_evm));

    // 卸载第一个实例不会动第二个实例的绑定
    assert!(registry.uninstall(first));
    assert!(page.has_global("ethereum"));
    assert!(page.has_global(&second.entry_point_global()));
    assert!(!page.has_global(&first.entry_point_global()));
    assert_eq!(discover(&page).unwrap().len(), 2);
    assert_eq!(registry.wallet_ids(), vec![second]);
}

#[test]
fn test_if_absent_strategy_keeps_existing_global() {
    let page = PageContext::new();
    page.set_global("ethereum", GlobalBinding::Value(json!({ "isMetaMask": true })))
        .unwrap();

    let registry = WalletRegistry::new();
    let mut config = dual_chain_config();
    config.legacy_binding = LegacyBindingStrategy::IfAbsent;
    let id = registry.install(&page, config).unwrap();

    assert!(page.get_global("ethereum").unwrap().as_provider().is_none());
    assert!(page.get_global("solana").unwrap().as_provider().is_some());

    assert!(registry.uninstall(id));
    assert_eq!(page.global_names(), vec!["ethereum"]);
}

#[test]
fn test_never_strategy_binds_only_entry_point() {
    let mut config = dual_chain_config();
    config.legacy_binding = LegacyBindingStrategy::Never;
    let (_registry, page, id) = install_fresh(config);

    assert_eq!(page.global_names(), vec![id.entry_point_global()]);
    // 发现协议仍然可用
    assert_eq!(discover(&page).unwrap().len(), 2);
}

#[tokio::test]
async fn test_navigation_reattaches_same_wallet() {
    let (registry, page, id) = install_fresh(dual_chain_config());
    let solana = provider_for(&page, id, ChainFamily::Solana);
    solana.request("connect", json!({})).await.unwrap();

    for generation in 1..=2 {
        page.navigate();
        assert!(discover(&page).unwrap().is_empty());

        registry.reattach(id, &page).unwrap();
        assert_eq!(page.generation(), generation);
        assert_eq!(registry.wallet_ids(), vec![id]);
        assert_eq!(discover(&page).unwrap().len(), 2);

        // 连接状态跨导航保留
        let same = provider_for(&page, id, ChainFamily::Solana);
        assert!(Arc::ptr_eq(&same, &solana));
        assert_eq!(
            same.request("getAccounts", json!({})).await.unwrap(),
            json!([SOLANA_PUBKEY])
        );
    }

    assert!(registry.uninstall(id));
    assert!(page.global_names().is_empty());
    assert_eq!(page.listener_count("eip6963:requestProvider"), 0);
    assert!(registry.is_empty());
}

#[test]
fn test_destroyed_page_rejects_install() {
    let registry = WalletRegistry::new();
    let page = PageContext::new();
    page.destroy();

    let err = registry.install(&page, dual_chain_config()).unwrap_err();
    assert_eq!(err, WalletError::ContextGone);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_each_install_gets_fresh_provider_state() {
    let registry = WalletRegistry::new();
    let page = PageContext::new();

    let first = registry.install(&page, dual_chain_config()).unwrap();
    let evm = provider_for(&page, first, ChainFamily::Evm);
    evm.request("eth_requestAccounts", json!([])).await.unwrap();
    evm.request("wallet_switchEthereumChain", json!([{ "chainId": "0x89" }]))
        .await
        .unwrap();
    assert!(registry.uninstall(first));

    // 旧 provider 已关闭
    assert_eq!(
        evm.request("eth_accounts", json!([])).await.unwrap_err(),
        WalletError::Disconnected
    );

    let second = registry.install(&page, dual_chain_config()).unwrap();
    let evm = provider_for(&page, second, ChainFamily::Evm);
    assert_eq!(evm.connection_state(), ConnectionState::Disconnected);
    assert_eq!(evm.request("eth_chainId", json!([])).await.unwrap(), json!("0x1"));
    assert_eq!(evm.request("eth_accounts", json!([])).await.unwrap(), json!([]));
}

#[test]
fn test_concurrent_installs_on_separate_pages() {
    let registry = Arc::new(WalletRegistry::new());

    let installed: Vec<(Arc<PageContext>, WalletId)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                scope.spawn(move || {
                    let page = PageContext::new();
                    let id = registry.install(&page, dual_chain_config()).unwrap();
                    (page, id)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(registry.len(), 8);
    for (page, id) in &installed {
        let found = discover(page).unwrap();
        assert_eq!(found.len(), 2);
        assert!(page.has_global(&id.entry_point_global()));
    }

    std::thread::scope(|scope| {
        for (_, id) in &installed {
            let registry = registry.clone();
            let id = *id;
            scope.spawn(move || assert!(registry.uninstall(id)));
        }
    });
    assert!(registry.is_empty());
    for (page, _) in &installed {
        assert!(page.global_names().is_empty());
    }
}
