use ethers::providers::ProviderError;
use serde_json::{Value, json};
use std::{fmt, io};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    DisabledWallet(String),
    #[error("{0}")]
    NetworkUnsupported(String),
    #[error("provider rpc error {code}: {message}")]
    ProviderRpc { code: i64, message: String },
    #[error("network change rejected")]
    NetworkChangeRejected,
    #[error("a network verification is already in flight")]
    VerificationInFlight,
    #[error("signer error: {0}")]
    Signer(String),
    #[error("wallet selector error: {0}")]
    Selector(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug)]
pub struct JsonRpcErrorPayload {
    pub code: i32,
    pub message: String,
    pub data: Value,
}

impl JsonRpcErrorPayload {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: json!({}),
        }
    }
}

impl AppError {
    pub fn to_json_rpc(&self) -> JsonRpcErrorPayload {
        match self {
            AppError::Config(msg) => JsonRpcErrorPayload::new(-32001, msg.clone()),
            AppError::InvalidInput(msg) => JsonRpcErrorPayload::new(-32602, msg.clone()),
            AppError::DisabledWallet(msg) => JsonRpcErrorPayload::new(-32030, msg.clone()),
            AppError::NetworkUnsupported(msg) => JsonRpcErrorPayload::new(-32031, msg.clone()),
            AppError::ProviderRpc { code, message } => {
                let mut payload = JsonRpcErrorPayload::new(-32002, message.clone());
                payload.data = json!({ "providerCode": code });
                payload
            }
            AppError::NetworkChangeRejected => {
                JsonRpcErrorPayload::new(-32032, self.to_string())
            }
            AppError::VerificationInFlight => JsonRpcErrorPayload::new(-32033, self.to_string()),
            AppError::Signer(msg) => JsonRpcErrorPayload::new(-32034, msg.clone()),
            AppError::Selector(msg) => JsonRpcErrorPayload::new(-32035, msg.clone()),
            AppError::Storage(msg) => JsonRpcErrorPayload::new(-32040, msg.clone()),
            AppError::Io(msg) => JsonRpcErrorPayload::new(-32041, msg.clone()),
            AppError::Serialization(msg) => JsonRpcErrorPayload::new(-32700, msg.clone()),
            AppError::Internal(msg) => JsonRpcErrorPayload::new(-32603, msg.clone()),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::JsonRpcClientError(inner) => match inner.as_error_response() {
                Some(resp) => AppError::ProviderRpc {
                    code: resp.code,
                    message: resp.message.clone(),
                },
                None => AppError::ProviderRpc {
                    code: -32603,
                    message: inner.to_string(),
                },
            },
            other => AppError::ProviderRpc {
                code: -32603,
                message: other.to_string(),
            },
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl fmt::Display for JsonRpcErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}
