use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use ethers::{
    providers::{Http, Provider},
    types::{Address, H256, Signature},
    utils::keccak256,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    error::{AppError, AppResult},
    implementations::{networks::NetworkConfig, provider::Eip1193Provider},
};

/// Message the wallet signs to derive the rollup session key.
pub const LOGIN_MESSAGE: &str =
    "Access RIF Rollup account.\n\nOnly sign this message for a trusted client!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignerMode {
    /// Wallet signs the login message up front; a session key is derived from it.
    Keyed,
    /// Read and submit without a local key.
    NoKeys,
    /// Every approval happens in a companion app.
    Remote,
}

/// Client for the rollup operator API of the selected network.
#[derive(Debug, Clone)]
pub struct RollupProvider {
    pub network: String,
    pub api: String,
    pub client: Arc<Provider<Http>>,
}

/// Signing client published to the rest of the application.
#[derive(Debug, Clone)]
pub struct SessionSigner {
    pub address: Address,
    pub mode: SignerMode,
    pub session_key: Option<H256>,
    pub rollup: RollupProvider,
    pub wallet: Arc<dyn Eip1193Provider>,
}

#[async_trait]
pub trait SignerFactory: Send + Sync {
    async fn rollup_provider(&self, config: &NetworkConfig) -> AppResult<RollupProvider>;

    /// `Ok(None)` means the wallet produced no usable signer.
    async fn build(
        &self,
        wallet: Arc<dyn Eip1193Provider>,
        rollup: &RollupProvider,
        mode: SignerMode,
    ) -> AppResult<Option<SessionSigner>>;
}

/// Builds signers by talking EIP-1193 to the wallet itself.
#[derive(Debug, Clone, Default)]
pub struct WalletSignerFactory;

impl WalletSignerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignerFactory for WalletSignerFactory {
    async fn rollup_provider(&self, config: &NetworkConfig) -> AppResult<RollupProvider> {
        let api = config.rollup_network.api.clone();
        let client = Provider::<Http>::try_from(api.as_str())
            .map_err(|err| AppError::Config(format!("failed to create rollup provider: {err}")))?;
        Ok(RollupProvider {
            network: config.network.clone(),
            api,
            client: Arc::new(client),
        })
    }

    #[instrument(skip(self, wallet, rollup))]
    async fn build(
        &self,
        wallet: Arc<dyn Eip1193Provider>,
        rollup: &RollupProvider,
        mode: SignerMode,
    ) -> AppResult<Option<SessionSigner>> {
        let accounts = wallet.request("eth_accounts", json!([])).await?;
        let accounts: Vec<Address> = serde_json::from_value(accounts)?;
        let Some(address) = accounts.first().copied() else {
            return Ok(None);
        };

        let session_key = match mode {
            SignerMode::Keyed => Some(derive_session_key(wallet.as_ref(), address).await?),
            SignerMode::NoKeys | SignerMode::Remote => None,
        };

        info!(address = %format!("{address:#x}"), "signer ready");
        Ok(Some(SessionSigner {
            address,
            mode,
            session_key,
            rollup: rollup.clone(),
            wallet,
        }))
    }
}

/// Ask the wallet to `personal_sign` the login message and hash the signature.
pub async fn derive_session_key(wallet: &dyn Eip1193Provider, address: Address) -> AppResult<H256> {
    let message = format!("0x{}", hex::encode(LOGIN_MESSAGE.as_bytes()));
    let raw = wallet
        .request("personal_sign", json!([message, format!("{address:#x}")]))
        .await?;
    let raw = raw
        .as_str()
        .ok_or_else(|| AppError::Signer(format!("wallet returned a non-string signature: {raw}")))?;
    let signature = Signature::from_str(raw)
        .map_err(|err| AppError::Signer(format!("malformed signature: {err}")))?;

    let recovered = signature
        .recover(LOGIN_MESSAGE)
        .map_err(|err| AppError::Signer(format!("failed to recover signer: {err}")))?;
    if recovered != address {
        return Err(AppError::Signer(format!(
            "login message signed by {recovered:#x}, expected {address:#x}"
        )));
    }

    Ok(H256::from(keccak256(signature.to_vec())))
}
