use std::{fmt, str::FromStr};

use async_trait::async_trait;
use ethers::{
    providers::{Http, JsonRpcClient, RpcError},
    types::Address,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AppError, AppResult};

/// How a wallet is attached to the session. Only injected wallets accept
/// programmatic chain switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Injected,
    WalletConnect,
    Remote,
}

impl ConnectionKind {
    pub fn can_switch_chain(self) -> bool {
        matches!(self, ConnectionKind::Injected)
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Injected => write!(f, "injected"),
            ConnectionKind::WalletConnect => write!(f, "walletconnect"),
            ConnectionKind::Remote => write!(f, "remote"),
        }
    }
}

/// Error object returned by a wallet's `request` call (EIP-1193 `ProviderRpcError`).
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl ProviderRpcError {
    /// EIP-3326: the wallet has no record of the requested chain.
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const USER_REJECTED: i64 = 4001;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Some wallets wrap the real code under `data.originalError.code`.
    pub fn is_unrecognized_chain(&self) -> bool {
        if self.code == Self::UNRECOGNIZED_CHAIN {
            return true;
        }
        self.data
            .as_ref()
            .and_then(|data| data.pointer("/originalError/code"))
            .and_then(Value::as_i64)
            == Some(Self::UNRECOGNIZED_CHAIN)
    }
}

impl fmt::Display for ProviderRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl From<ProviderRpcError> for AppError {
    fn from(err: ProviderRpcError) -> Self {
        AppError::ProviderRpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// The request surface of a connected wallet.
#[async_trait]
pub trait Eip1193Provider: fmt::Debug + Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError>;
}

/// Wallet reached over a JSON-RPC transport, e.g. a signer daemon exposing
/// the wallet namespace over HTTP.
#[derive(Debug)]
pub struct JsonRpcWallet<P> {
    client: P,
}

impl<P> JsonRpcWallet<P> {
    pub fn new(client: P) -> Self {
        Self { client }
    }
}

impl JsonRpcWallet<Http> {
    pub fn connect(url: &str) -> AppResult<Self> {
        let client = Http::from_str(url)
            .map_err(|err| AppError::Config(format!("invalid wallet endpoint {url}: {err}")))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl<P> Eip1193Provider for JsonRpcWallet<P>
where
    P: JsonRpcClient + 'static,
{
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        self.client
            .request::<Value, Value>(method, params)
            .await
            .map_err(|err| match err.as_error_response() {
                Some(resp) => ProviderRpcError {
                    code: resp.code,
                    message: resp.message.clone(),
                    data: resp.data.clone(),
                },
                None => ProviderRpcError::new(-32603, err.to_string()),
            })
    }
}

/// Parse a 0x-prefixed hex quantity such as `"0x1f"`.
pub fn parse_hex_chain_id(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

pub async fn request_accounts(provider: &dyn Eip1193Provider) -> AppResult<Vec<Address>> {
    let raw = provider.request("eth_requestAccounts", json!([])).await?;
    serde_json::from_value(raw).map_err(AppError::from)
}

pub async fn chain_id(provider: &dyn Eip1193Provider) -> AppResult<u64> {
    let raw = provider.request("eth_chainId", json!([])).await?;
    raw.as_str()
        .and_then(parse_hex_chain_id)
        .ok_or_else(|| AppError::InvalidInput(format!("wallet returned malformed chain id: {raw}")))
}
