use crate::{
    error::{AppError, AppResult},
    implementations::{networks, provider::ConnectionKind, selector::WalletEndpoint},
    types::{DisabledWallet, LoginOptionsPatch},
};
use dotenvy::dotenv;
use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf};

const DEFAULT_CONFIG_PATH: &str = "Config.toml";
const DEFAULT_NETWORK: &str = "testnet";
const DEFAULT_WALLET_NAME: &str = "MetaMask";

/// Strongly-typed configuration derived from a `Config.toml` or environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub infura_key: String,
    #[serde(default)]
    pub wallets: Vec<WalletEndpoint>,
    #[serde(default)]
    pub remote_wallet: Option<WalletEndpoint>,
    #[serde(default)]
    pub disabled_wallets: Vec<DisabledWallet>,
    #[serde(default)]
    pub restore_network: bool,
    #[serde(default)]
    pub logout_redirect: Option<String>,
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    #[serde(default)]
    pub dapp_url: Option<String>,
    #[serde(default)]
    pub login_options: LoginOptionsPatch,
}

fn default_network() -> String {
    DEFAULT_NETWORK.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            infura_key: String::new(),
            wallets: Vec::new(),
            remote_wallet: None,
            disabled_wallets: Vec::new(),
            restore_network: false,
            logout_redirect: None,
            storage_path: None,
            dapp_url: None,
            login_options: LoginOptionsPatch::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration, preferring a user-provided config file and falling back to env vars.
    pub fn load() -> AppResult<Self> {
        dotenv().ok();

        let configured_path =
            env::var("SESSION_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config_path = Path::new(&configured_path);

        let cfg = if config_path.exists() {
            let raw = fs::read_to_string(config_path)
                .map_err(|err| AppError::Config(format!("failed to read config file: {err}")))?;
            Self::from_toml(&raw)?
        } else {
            Self::from_env()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> AppResult<Self> {
        let mut cfg: AppConfig = toml::from_str(raw)
            .map_err(|err| AppError::Config(format!("failed to parse config file: {err}")))?;
        cfg.apply_network_default();
        Ok(cfg)
    }

    /// Helper used when no config file is present.
    fn from_env() -> Self {
        let mut cfg = Self {
            network: env::var("SESSION_NETWORK").unwrap_or_else(|_| default_network()),
            infura_key: env::var("INFURA_KEY").unwrap_or_default(),
            restore_network: env::var("RESTORE_NETWORK")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(false),
            logout_redirect: env::var("LOGOUT_REDIRECT").ok(),
            storage_path: env::var("SESSION_STORE_PATH").ok().map(PathBuf::from),
            dapp_url: env::var("DAPP_URL").ok(),
            ..Self::default()
        };

        if let Ok(url) = env::var("WALLET_RPC_URL") {
            cfg.wallets.push(WalletEndpoint {
                name: env::var("WALLET_NAME").unwrap_or_else(|_| DEFAULT_WALLET_NAME.to_string()),
                url,
                kind: ConnectionKind::Injected,
            });
        }
        if let Ok(url) = env::var("REMOTE_WALLET_RPC_URL") {
            cfg.remote_wallet = Some(WalletEndpoint {
                name: "Argent".to_string(),
                url,
                kind: ConnectionKind::Remote,
            });
        }
        cfg.apply_network_default();
        cfg
    }

    /// Ensure we never surface an empty network name from user input.
    fn apply_network_default(&mut self) {
        if self.network.trim().is_empty() {
            self.network = default_network();
        }
    }

    fn validate(&self) -> AppResult<()> {
        if !networks::is_known_network(&self.network) {
            return Err(AppError::Config(format!(
                "unknown network {}, expected one of {:?}",
                self.network,
                networks::rollup_networks().keys().collect::<Vec<_>>()
            )));
        }
        Ok(())
    }
}
