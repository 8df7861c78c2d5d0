//! Solana provider
//!
//! 请求参数为 JSON 对象，公钥和签名以 base58 字符串返回，
//! 交易以 base64 线上格式进出。

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::subscribers::{ListenerId, PendingEvents, ProviderListener, SubscriberSet};
use super::{named, ChainProvider, ConnectionState, ProviderSettings};
use crate::config::UnknownNetworkPolicy;
use crate::domain::chain_config::{ChainFamily, NetworkRegistry, SolanaCluster};
use crate::error::{Result, WalletError};
use crate::service::signing_engine::SigningEngine;
use crate::utils::encoding::{bytes_from_array, decode_base64, decode_hex, encode_base64};

pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_ACCOUNT_CHANGED: &str = "accountChanged";
pub const EVENT_CLUSTER_CHANGED: &str = "clusterChanged";

struct SolanaState {
    connection: ConnectionState,
    active: Option<String>,
    cluster: String,
    networks: NetworkRegistry,
    subscribers: SubscriberSet,
    closed: bool,
}

pub struct SolanaProvider {
    engine: SigningEngine,
    accounts: Vec<String>,
    debug: bool,
    policy: UnknownNetworkPolicy,
    state: Mutex<SolanaState>,
}

impl SolanaProvider {
    pub fn new(
        engine: SigningEngine,
        accounts: Vec<String>,
        settings: ProviderSettings,
    ) -> Result<Self> {
        let cluster = settings
            .networks
            .solana(&settings.solana_cluster)
            .map(|c| c.id.clone())
            .ok_or_else(|| WalletError::UnsupportedNetwork(settings.solana_cluster.clone()))?;
        let first = accounts
            .first()
            .cloned()
            .ok_or_else(|| WalletError::InvalidConfiguration("no Solana accounts".into()))?;

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
            state: Mutex::new(SolanaState {
                connection,
                active,
                cluster,
                networks: settings.networks,
                subscribers: SubscriberSet::new(),
                closed: false,
            }),
        })
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.debug
    }

    pub fn cluster(&self) -> String {
        self.state.lock().cluster.clone()
    }

    fn visible_accounts(&self, state: &SolanaState) -> Vec<String> {
        match &state.active {
            Some(active) if state.connection == ConnectionState::Connected => {
                let mut out = vec![active.clone()];
                out.extend(self.accounts.iter().filter(|a| *a != active).cloned());
                out
            }
            _ => Vec::new(),
        }
    }

    fn ensure_open(state: &SolanaState) -> Result<()> {
        if state.closed {
            return Err(WalletError::Disconnected);
        }
        Ok(())
    }

    fn ensure_connected(state: &SolanaState) -> Result<()> {
        Self::ensure_open(state)?;
        if state.connection == ConnectionState::Disconnected {
            return Err(WalletError::Disconnected);
        }
        Ok(())
    }

    /// 无需审批，所有站点都视为受信任，`onlyIfTrusted` 不影响结果
    fn connect(&self) -> Result<Value> {
        let mut pending = PendingEvents::new();
        let public_key = {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;
            if state.connection == ConnectionState::Disconnected {
                state.connection = ConnectionState::Connected;
                state.active = self.accounts.first().cloned();
                pending.push(&state.subscribers, EVENT_CONNECT, json!(state.active));
                tracing::info!(account = ?state.active, "solana_connected");
            }
            state.active.clone()
        };
        pending.deliver();
        Ok(json!({ "publicKey": public_key }))
    }

    fn disconnect(&self) -> Result<Value> {
        let mut pending = PendingEvents::new();
        {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;
            if state.connection == ConnectionState::Connected {
                state.connection = ConnectionState::Disconnected;
                state.active = None;
                pending.push(&state.subscribers, EVENT_DISCONNECT, Value::Null);
                tracing::info!("solana_disconnected");
            }
        }
        pending.deliver();
        Ok(Value::Null)
    }

    fn switch_cluster(&self, params: &Value) -> Result<Value> {
        let requested = named(params, "cluster")
            .and_then(Value::as_str)
            .ok_or_else(|| WalletError::invalid_params("missing cluster"))?;

        let mut pending = PendingEvents::new();
        {
            let mut state = self.state.lock();
            Self::ensure_connected(&state)?;
            let cluster = match state.networks.solana(requested) {
                Some(c) => c.id.clone(),
                None => match self.policy {
                    UnknownNetworkPolicy::Reject => {
                        return Err(WalletError::UnsupportedNetwork(requested.to_string()))
                    }
                    UnknownNetworkPolicy::Accept => {
                        tracing::info!(cluster = requested, "solana_cluster_accepted");
                        state.networks.add_solana(SolanaCluster::new(requested));
                        requested.to_string()
                    }
                },
            };
            if state.cluster != cluster {
                state.cluster = cluster.clone();
                pending.push(&state.subscribers, EVENT_CLUSTER_CHANGED, json!(cluster));
                tracing::info!(cluster = %cluster, "solana_cluster_switched");
            }
        }
        pending.deliver();
        Ok(Value::Null)
    }

    fn switch_account(&self, params: &Value) -> Result<Value> {
        let requested = named(params, "publicKey")
            .and_then(Value::as_str)
            .ok_or_else(|| WalletError::invalid_params("missing publicKey"))?;
        let target = self
            .accounts
            .iter()
            .find(|a| a.as_str() == requested)
            .cloned()
            .ok_or_else(|| WalletError::invalid_params(format!("unknown account {}", requested)))?;

        let mut pending = PendingEvents::new();
        {
            let mut state = self.state.lock();
            Self::ensure_connected(&state)?;
            if state.active.as_deref() != Some(target.as_str()) {
                state.active = Some(target.clone());
                pending.push(&state.subscribers, EVENT_ACCOUNT_CHANGED, json!(target));
            }
        }
        pending.deliver();
        Ok(Value::Null)
    }

    /// 未指定 publicKey 时使用活跃账户
    fn authorize(&self, params: &Value) -> Result<String> {
        let requested = named(params, "publicKey").and_then(Value::as_str);
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        match (&state.active, requested) {
            (Some(active), None) if state.connection == ConnectionState::Connected => {
                Ok(active.clone())
            }
            (Some(active), Some(requested))
                if state.connection == ConnectionState::Connected && active == requested =>
            {
                Ok(active.clone())
            }
            _ => Err(WalletError::UnauthorizedSigner {
                requested: requested.unwrap_or_default().to_string(),
            }),
        }
    }

    async fn sign_message(&self, params: &Value) -> Result<Value> {
        let message = named(params, "message")
            .ok_or_else(|| WalletError::invalid_params("missing message"))?;
        let encoding = named(params, "encoding").and_then(Value::as_str);
        let bytes = message_bytes(message, encoding)?;

        tokio::task::yield_now().await;
        let signer = self.authorize(params)?;
        let signature = self.engine.sign_solana_message(&signer, &bytes)?;
        Ok(json!({
            "signature": bs58::encode(signature).into_string(),
            "publicKey": signer,
        }))
    }

    async fn sign_transactions(&self, params: &Value, wires: Vec<Vec<u8>>) -> Result<Vec<String>> {
        tokio::task::yield_now().await;
        let signer = self.authorize(params)?;
        wires
            .iter()
            .map(|wire| {
                self.engine
                    .sign_solana_transaction(&signer, wire)
                    .map(|tx| encode_base64(tx.serialize()))
            })
            .collect()
    }

    async fn sign_and_send(&self, params: &Value) -> Result<Value> {
        let wire = transaction_bytes(named(params, "transaction"))?;

        tokio::task::yield_now().await;
        let signer = self.authorize(params)?;
        let tx = self.engine.sign_solana_transaction(&signer, &wire)?;
        let signature = tx
            .primary_signature()
            .map(|s| bs58::encode(s).into_string())
            .ok_or_else(|| WalletError::signing("transaction has no signature slots"))?;

        tracing::info!(cluster = %self.cluster(), signature = %signature, "transaction_simulated");
        Ok(json!({ "signature": signature, "publicKey": signer }))
    }
}

/// 消息可以是字节数组或字符串；字符串默认按 UTF-8 解释
fn message_bytes(message: &Value, encoding: Option<&str>) -> Result<Vec<u8>> {
    match message {
        Value::Array(_) => bytes_from_array(message),
        Value::String(s) => match encoding.unwrap_or("utf8") {
            "utf8" | "utf-8" => Ok(s.as_bytes().to_vec()),
            "hex" => decode_hex(s),
            "base64" => decode_base64(s),
            "base58" => bs58::decode(s)
                .into_vec()
                .map_err(|e| WalletError::invalid_params(format!("invalid base58: {}", e))),
            other => Err(WalletError::invalid_params(format!(
                "unsupported message encoding {}",
                other
            ))),
        },
        _ => Err(WalletError::invalid_params("message must be a string or byte array")),
    }
}

fn transaction_bytes(value: Option<&Value>) -> Result<Vec<u8>> {
    match value {
        Some(Value::String(s)) => decode_base64(s),
        Some(v @ Value::Array(_)) => bytes_from_array(v),
        _ => Err(WalletError::invalid_params("missing transaction")),
    }
}

#[async_trait]
impl ChainProvider for SolanaProvider {
    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
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
            "connect" => self.connect(),
            "disconnect" => self.disconnect(),
            "getAccounts" => {
                let state = self.state.lock();
                Ok(json!(self.visible_accounts(&state)))
            }
            "getCluster" => Ok(json!(self.cluster())),
            "switchCluster" => self.switch_cluster(&params),
            "switchAccount" => self.switch_account(&params),
            "signMessage" => self.sign_message(&params).await,
            "signTransaction" => {
                let wire = transaction_bytes(named(&params, "transaction"))?;
                let mut signed = self.sign_transactions(&params, vec![wire]).await?;
                Ok(json!(signed.pop()))
            }
            "signAllTransactions" => {
                let items = named(&params, "transactions")
                    .and_then(Value::as_array)
                    .ok_or_else(|| WalletError::invalid_params("missing transactions"))?;
                let wires = items
                    .iter()
                    .map(|v| transaction_bytes(Some(v)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(json!(self.sign_transactions(&params, wires).await?))
            }
            "signAndSendTransaction" => self.sign_and_send(&params).await,
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
