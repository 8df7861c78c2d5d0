//! 统一错误类型
//!
//! 所有失败都以结构化错误返回给直接调用方，不会让宿主页面崩溃。
//! 每种错误映射到 EIP-1193 / JSON-RPC 错误码，便于页面脚本按标准方式处理。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 钱包错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// 私钥格式错误（长度、字符集或编码不符合所声明的链族）
    #[error("invalid key material for account #{index}: {reason}")]
    InvalidKeyMaterial { index: usize, reason: String },

    /// 未识别的请求方法
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// 请求签名的账户不是当前活跃账户
    #[error("signer {requested} is not the active account")]
    UnauthorizedSigner { requested: String },

    /// 切换到未注册的网络
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// 签名或编码失败
    #[error("signing failed: {0}")]
    SigningError(String),

    /// Provider 未连接
    #[error("provider is disconnected")]
    Disconnected,

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// 页面上下文已销毁
    #[error("page context is gone")]
    ContextGone,
}

/// 稳定的错误类别标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletErrorCode {
    InvalidKeyMaterial,
    UnsupportedMethod,
    UnauthorizedSigner,
    UnsupportedNetwork,
    SigningError,
    Disconnected,
    InvalidParams,
    InvalidConfiguration,
    ContextGone,
}

impl WalletErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletErrorCode::InvalidKeyMaterial => "invalid_key_material",
            WalletErrorCode::UnsupportedMethod => "unsupported_method",
            WalletErrorCode::UnauthorizedSigner => "unauthorized_signer",
            WalletErrorCode::UnsupportedNetwork => "unsupported_network",
            WalletErrorCode::SigningError => "signing_error",
            WalletErrorCode::Disconnected => "disconnected",
            WalletErrorCode::InvalidParams => "invalid_params",
            WalletErrorCode::InvalidConfiguration => "invalid_configuration",
            WalletErrorCode::ContextGone => "context_gone",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EIP-1193 / JSON-RPC 错误码
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const RPC_UNAUTHORIZED: i64 = 4100;
pub const RPC_UNSUPPORTED_METHOD: i64 = 4200;
pub const RPC_DISCONNECTED: i64 = 4900;
pub const RPC_UNRECOGNIZED_CHAIN: i64 = 4902;
pub const RPC_INVALID_PARAMS: i64 = -32602;
pub const RPC_INTERNAL: i64 = -32603;

/// 返回给页面脚本的错误体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WalletError {
    pub fn code(&self) -> WalletErrorCode {
        match self {
            WalletError::InvalidKeyMaterial { .. } => WalletErrorCode::InvalidKeyMaterial,
            WalletError::UnsupportedMethod(_) => WalletErrorCode::UnsupportedMethod,
            WalletError::UnauthorizedSigner { .. } => WalletErrorCode::UnauthorizedSigner,
            WalletError::UnsupportedNetwork(_) => WalletErrorCode::UnsupportedNetwork,
            WalletError::SigningError(_) => WalletErrorCode::SigningError,
            WalletError::Disconnected => WalletErrorCode::Disconnected,
            WalletError::InvalidParams(_) => WalletErrorCode::InvalidParams,
            WalletError::InvalidConfiguration(_) => WalletErrorCode::InvalidConfiguration,
            WalletError::ContextGone => WalletErrorCode::ContextGone,
        }
    }

    /// 对应的 EIP-1193 数值错误码
    pub fn rpc_code(&self) -> i64 {
        match self {
            WalletError::UnsupportedMethod(_) => RPC_UNSUPPORTED_METHOD,
            WalletError::UnauthorizedSigner { .. } => RPC_UNAUTHORIZED,
            WalletError::UnsupportedNetwork(_) => RPC_UNRECOGNIZED_CHAIN,
            WalletError::Disconnected => RPC_UNAUTHORIZED,
            WalletError::InvalidParams(_) => RPC_INVALID_PARAMS,
            WalletError::ContextGone => RPC_DISCONNECTED,
            WalletError::InvalidKeyMaterial { .. }
            | WalletError::SigningError(_)
            | WalletError::InvalidConfiguration(_) => RPC_INTERNAL,
        }
    }

    /// 转换为页面可见的错误体
    pub fn to_rpc_error(&self) -> RpcErrorBody {
        let mut data = serde_json::Map::new();
        data.insert("kind".into(), Value::String(self.code().as_str().to_string()));
        if let WalletError::UnsupportedMethod(method) = self {
            data.insert("method".into(), Value::String(method.clone()));
        }
        RpcErrorBody {
            code: self.rpc_code(),
            message: self.to_string(),
            data: Some(Value::Object(data)),
        }
    }

    pub fn signing(msg: impl Into<String>) -> Self {
        WalletError::SigningError(msg.into())
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        WalletError::InvalidParams(msg.into())
    }
}

impl From<WalletError> for RpcErrorBody {
    fn from(err: WalletError) -> Self {
        err.to_rpc_error()
    }
}

pub type Result<T, E = WalletError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_method_carries_name() {
        let body = WalletError::UnsupportedMethod("eth_mine".into()).to_rpc_error();
        assert_eq!(body.code, 4200);
        let data = body.data.unwrap();
        assert_eq!(data["kind"], "unsupported_method");
        assert_eq!(data["method"], "eth_mine");
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(
            WalletError::UnauthorizedSigner {
                requested: "0xabc".into()
            }
            .rpc_code(),
            4100
        );
        assert_eq!(WalletError::UnsupportedNetwork("0x99".into()).rpc_code(), 4902);
        assert_eq!(WalletError::invalid_params("x").rpc_code(), -32602);
        assert_eq!(WalletError::signing("bad").rpc_code(), -32603);
    }

    #[test]
    fn test_error_body_serializes_without_empty_data() {
        let body = RpcErrorBody {
            code: 1,
            message: "m".into(),
            data: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("data").is_none());
    }
}
