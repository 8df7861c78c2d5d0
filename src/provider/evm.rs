//! EVM provider (EIP-1193)

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::subscribers::{ListenerId, PendingEvents, ProviderListener, SubscriberSet};
use super::{positional, required_str, ChainProvider, ConnectionState, ProviderSettings};
use crate::config::UnknownNetworkPolicy;
use crate::domain::chain_config::{ChainFamily, EvmNetwork, NetworkRegistry};
use crate::error::{Result, WalletError, RPC_DISCONNECTED};
use crate::service::eip712::TypedData;
use crate::service::signing_engine::SigningEngine;
use crate::service::transaction_builder::EvmTransactionRequest;
use crate::utils::address_validator::AddressValidator;
use crate::utils::encoding::{decode_hex, parse_u64};

pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_ACCOUNTS_CHANGED: &str = "accountsChanged";
pub const EVENT_CHAIN_CHANGED: &str = "chainChanged";

struct EvmState {
    connection: ConnectionState,
    /// 仅在 Connected 时为 Some
    active: Option<String>,
    chain_id: u64,
    networks: NetworkRegistry,
    subscribers: SubscriberSet,
    closed: bool,
}

pub struct EvmProvider {
    engine: SigningEngine,
    /// 配置顺序
    accounts: Vec<String>,
    debug: bool,
    policy: UnknownNetworkPolicy,
    state: Mutex<EvmState>,
}

impl EvmProvider {
    pub fn new(
        engine: SigningEngine,
        accounts: Vec<String>,
        settings: ProviderSettings,
    ) -> Result<Self> {
        if settings.networks.evm(settings.evm_chain_id).is_none() {
            return Err(WalletError::UnsupportedNetwork(format!(
                "0x{:x}",
                settings.evm_chain_id
            )));
        }
        let first = accounts
            .first()
            .cloned()
            .ok_or_else(|| WalletError::InvalidConfiguration("no EVM accounts".into()))?;

        let (connection, active) = if settings.auto_connect {
            (ConnectionState::Connected, Some(first))
        } else {
            (ConnectionState::Disconnected, None)
        };

        Ok(Self {
            engine,
            accounts,
            debug: settings.debug,
            policy: settings.unknown_network_policy,
            state: Mutex::new(EvmState {
                connection,
                active,
                chain_id: settings.evm_chain_id,
                networks: settings.networks,
                subscribers: SubscriberSet::new(),
                closed: false,
            }),
        })
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.debug
    }

    pub fn chain_id(&self) -> u64 {
        self.state.lock().chain_id
    }

    /// 活跃账户在前，其余按配置顺序
    fn visible_accounts(&self, state: &EvmState) -> Vec<String> {
        match &state.active {
            Some(active) if state.connection == ConnectionState::Connected => {
                let mut out = vec![active.clone()];
                out.extend(self.accounts.iter().filter(|a| *a != active).cloned());
                out
            }
            _ => Vec::new(),
        }
    }

    fn ensure_open(state: &EvmState) -> Result<()> {
        if state.closed {
            return Err(WalletError::Disconnected);
        }
        Ok(())
    }

    fn connect(&self) -> Result<Value> {
        let mut pending = PendingEvents::new();
        let accounts = {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;
            if state.connection == ConnectionState::Disconnected {
                state.connection = ConnectionState::Connected;
                state.active = self.accounts.first().cloned();
                let accounts = self.visible_accounts(&state);
                let chain_id = format!("0x{:x}", state.chain_id);
                pending.push(&state.subscribers, EVENT_CONNECT, json!({ "chainId": chain_id }));
                pending.push(&state.subscribers, EVENT_ACCOUNTS_CHANGED, json!(accounts));
                tracing::info!(account = ?state.active, "evm_connected");
                accounts
            } else {
                self.visible_accounts(&state)
            }
        };
        pending.deliver();
        Ok(json!(accounts))
    }

    fn disconnect(&self) {
        let mut pending = PendingEvents::new();
        {
            let mut state = self.state.lock();
            if state.connection == ConnectionState::Connected {
                state.connection = ConnectionState::Disconnected;
                state.active = None;
                pending.push(
                    &state.subscribers,
                    EVENT_DISCONNECT,
                    json!({ "code": RPC_DISCONNECTED, "message": "wallet disconnected" }),
                );
                pending.push(&state.subscribers, EVENT_ACCOUNTS_CHANGED, json!([]));
                tracing::info!("evm_disconnected");
            }
        }
        pending.deliver();
    }

    fn permissions(&self) -> Value {
        let state = self.state.lock();
        let accounts = self.visible_accounts(&state);
        if accounts.is_empty() {
            return json!([]);
        }
        json!([{
            "parentCapability": "eth_accounts",
            "caveats": [{ "type": "restrictReturnedAccounts", "value": accounts }]
        }])
    }

    fn switch_chain(&self, params: &Value) -> Result<Value> {
        let requested = positional(params, 0)
            .and_then(|p| p.get("chainId"))
            .ok_or_else(|| WalletError::invalid_params("missing chainId"))?;
        let chain_id = checked_chain_id(requested)?;

        let mut pending = PendingEvents::new();
        {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;
            if state.connection == ConnectionState::Disconnected {
                return Err(WalletError::Disconnected);
            }
            if state.networks.evm(chain_id).is_none() {
                match self.policy {
                    UnknownNetworkPolicy::Reject => {
                        return Err(WalletError::UnsupportedNetwork(format!("0x{:x}", chain_id)))
                    }
                    UnknownNetworkPolicy::Accept => {
                        tracing::info!(chain_id, "evm_network_accepted");
                        state
                            .networks
                            .add_evm(EvmNetwork::new(chain_id, format!("Chain {}", chain_id)));
                    }
                }
            }
            if state.chain_id != chain_id {
                state.chain_id = chain_id;
                pending.push(
                    &state.subscribers,
                    EVENT_CHAIN_CHANGED,
                    json!(format!("0x{:x}", chain_id)),
                );
                tracing::info!(chain_id, "evm_chain_switched");
            }
        }
        pending.deliver();
        Ok(Value::Null)
    }

    fn add_chain(&self, params: &Value) -> Result<Value> {
        let chain = positional(params, 0)
            .ok_or_else(|| WalletError::invalid_params("missing chain parameters"))?;
        let chain_id = chain
            .get("chainId")
            .ok_or_else(|| WalletError::invalid_params("missing chainId"))
            .and_then(checked_chain_id)?;
        let name = chain
            .get("chainName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Chain {}", chain_id));
        let rpc_url = chain
            .get("rpcUrls")
            .and_then(|v| v.get(0))
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.networks.evm(chain_id).is_none() {
            state.networks.add_evm(EvmNetwork {
                chain_id,
                name,
                rpc_url,
            });
            tracing::info!(chain_id, "evm_network_added");
        }
        Ok(Value::Null)
    }

    fn switch_account(&self, params: &Value) -> Result<Value> {
        let requested = required_str(params, 0, "address")?;
        let target = self
            .accounts
            .iter()
            .find(|a| AddressValidator::same_address(ChainFamily::Evm, a, requested))
            .cloned()
            .ok_or_else(|| WalletError::invalid_params(format!("unknown account {}", requested)))?;

        let mut pending = PendingEvents::new();
        {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;
            if state.connection == ConnectionState::Disconnected {
                return Err(WalletError::Disconnected);
            }
            if state.active.as_deref() != Some(target.as_str()) {
                state.active = Some(target);
                let accounts = self.visible_accounts(&state);
                pending.push(&state.subscribers, EVENT_ACCOUNTS_CHANGED, json!(accounts));
            }
        }
        pending.deliver();
        Ok(Value::Null)
    }

    /// 请求的签名者必须是活跃账户；返回规范化地址与当前 chain id
    fn authorize(&self, requested: &str) -> Result<(String, u64)> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        match &state.active {
            Some(active)
                if state.connection == ConnectionState::Connected
                    && AddressValidator::same_address(ChainFamily::Evm, active, requested) =>
            {
                Ok((active.clone(), state.chain_id))
            }
            _ => Err(WalletError::UnauthorizedSigner {
                requested: requested.to_string(),
            }),
        }
    }

    fn active_signer(&self) -> Result<String> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        state.active.clone().ok_or(WalletError::UnauthorizedSigner {
            requested: String::new(),
        })
    }

    async fn personal_sign(&self, params: &Value) -> Result<Value> {
        let first = required_str(params, 0, "message")?;
        let second = required_str(params, 1, "address")?;
        // 兼容 [address, message] 顺序
        let (message, address) = if AddressValidator::validate(ChainFamily::Evm, first)
            && !AddressValidator::validate(ChainFamily::Evm, second)
        {
            (second, first)
        } else {
            (first, second)
        };
        let bytes = message_bytes(message);

        tokio::task::yield_now().await;
        let (signer, _) = self.authorize(address)?;
        let signature = self.engine.personal_sign(&signer, &bytes)?;
        Ok(json!(signature.to_hex()))
    }

    async fn eth_sign(&self, params: &Value) -> Result<Value> {
        let address = required_str(params, 0, "address")?;
        let data = decode_hex(required_str(params, 1, "hash")?)?;
        let hash: [u8; 32] = data
            .try_into()
            .map_err(|_| WalletError::invalid_params("eth_sign expects a 32-byte hash"))?;

        tokio::task::yield_now().await;
        let (signer, _) = self.authorize(address)?;
        let signature = self.engine.sign_hash(&signer, &hash)?;
        Ok(json!(signature.to_hex()))
    }

    async fn sign_typed_data(&self, params: &Value) -> Result<Value> {
        let first = positional(params, 0)
            .ok_or_else(|| WalletError::invalid_params("missing typed data params"))?;
        let second = positional(params, 1)
            .ok_or_else(|| WalletError::invalid_params("missing typed data params"))?;
        let (address, typed) = match first.as_str() {
            Some(a) if AddressValidator::validate(ChainFamily::Evm, a) => (a, second),
            _ => (
                second
                    .as_str()
                    .ok_or_else(|| WalletError::invalid_params("missing address"))?,
                first,
            ),
        };
        let typed = TypedData::from_value(typed)?;

        tokio::task::yield_now().await;
        let (signer, chain_id) = self.authorize(address)?;
        if let Some(domain_chain) = typed.domain_chain_id() {
            if domain_chain != chain_id {
                return Err(WalletError::invalid_params(format!(
                    "typed data chainId {} does not match active chain {}",
                    domain_chain, chain_id
                )));
            }
        }
        let signature = self.engine.sign_typed_data(&signer, &typed)?;
        Ok(json!(signature.to_hex()))
    }

    async fn sign_transaction(&self, params: &Value, simulate_send: bool) -> Result<Value> {
        let raw = positional(params, 0)
            .cloned()
            .ok_or_else(|| WalletError::invalid_params("missing transaction"))?;
        let request: EvmTransactionRequest = serde_json::from_value(raw)
            .map_err(|e| WalletError::invalid_params(format!("invalid transaction: {}", e)))?;

        tokio::task::yield_now().await;
        let from = match &request.from {
            Some(from) => from.clone(),
            None => self.active_signer()?,
        };
        let (signer, chain_id) = self.authorize(&from)?;
        let signed = self.engine.sign_evm_transaction(&signer, &request, chain_id)?;

        if simulate_send {
            tracing::info!(chain_id, tx_hash = %signed.hash_hex(), "transaction_simulated");
            Ok(json!(signed.hash_hex()))
        } else {
            Ok(json!(signed.raw_hex()))
        }
    }
}

fn checked_chain_id(value: &Value) -> Result<u64> {
    let chain_id = parse_u64(value)?;
    if !EvmNetwork::is_valid_chain_id(chain_id) {
        return Err(WalletError::invalid_params(format!(
            "chain id {} out of range",
            chain_id
        )));
    }
    Ok(chain_id)
}

/// `0x` 十六进制按字节解释，否则按 UTF-8 文本
fn message_bytes(message: &str) -> Vec<u8> {
    if message.starts_with("0x") {
        if let Ok(bytes) = decode_hex(message) {
            return bytes;
        }
    }
    message.as_bytes().to_vec()
}

#[async_trait]
impl ChainProvider for EvmProvider {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    fn active_account(&self) -> Option<String> {
        self.state.lock().active.clone()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.state.lock().closed {
            return Err(WalletError::Disconnected);
        }

        match method {
            "eth_accounts" => {
                let state = self.state.lock();
                Ok(json!(self.visible_accounts(&state)))
            }
            "eth_requestAccounts" => self.connect(),
            "eth_chainId" => Ok(json!(format!("0x{:x}", self.chain_id()))),
            "net_version" => Ok(json!(self.chain_id().to_string())),
            "eth_coinbase" => Ok(json!(self.active_account())),
            "web3_clientVersion" => Ok(json!(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))),
            "wallet_requestPermissions" => {
                self.connect()?;
                Ok(self.permissions())
            }
            "wallet_getPermissions" => Ok(self.permissions()),
            "wallet_revokePermissions" => {
                self.disconnect();
                Ok(Value::Null)
            }
            "wallet_switchEthereumChain" => self.switch_chain(&params),
            "wallet_addEthereumChain" => self.add_chain(&params),
            "wallet_switchAccount" => self.switch_account(&params),
            "personal_sign" => self.personal_sign(&params).await,
            "eth_sign" => self.eth_sign(&params).await,
            "eth_signTypedData_v4" | "eth_signTypedData_v3" | "eth_signTypedData" => {
                self.sign_typed_data(&params).await
            }
            "eth_signTransaction" => self.sign_transaction(&params, false).await,
            "eth_sendTransaction" => self.sign_transaction(&params, true).await,
            other => Err(WalletError::UnsupportedMethod(other.to_string())),
        }
    }

    fn on(&self, event: &str, listener: ProviderListener) -> ListenerId {
        let mut state = self.state.lock();
        if state.closed {
            return ListenerId::next();
        }
        state.subscribers.add(event, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.state.lock().subscribers.remove(id)
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.connection = ConnectionState::Disconnected;
        state.active = None;
        state.subscribers.clear();
    }
}
