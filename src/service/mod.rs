pub mod discovery_broker;
pub mod eip712;
pub mod evm_signer;
pub mod lifecycle_manager;
pub mod signing_engine;
pub mod solana_signer;
pub mod transaction_builder;

pub use discovery_broker::DiscoveryBroker;
pub use lifecycle_manager::WalletRegistry;
pub use signing_engine::SigningEngine;
