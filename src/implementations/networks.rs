use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::from_str;

use crate::error::{AppError, AppResult};

pub const ROLLUP_LIB_VERSION: &str = "1.0.0";
pub const ROLLUP_UI_VERSION: &str = "1.0.0";

/// Rollup operator endpoints for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupNetwork {
    pub ethereum_network: String,
    pub api: String,
    pub explorer: String,
    pub tools: NetworkTools,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTools {
    pub forced_exit: String,
    pub link: String,
    pub withdrawal: String,
    pub mint: String,
}

/// Layer-1 chain the rollup settles on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumNetwork {
    pub id: u64,
    pub name: String,
    pub explorer: String,
    pub rpc_url: String,
}

impl EthereumNetwork {
    /// Chain id in the 0x-prefixed, unpadded form wallets expect.
    pub fn hex_chain_id(&self) -> String {
        format!("{:#x}", self.id)
    }

    /// Network name with its first letter upper-cased, as shown in wallet prompts.
    pub fn display_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

/// Everything the session needs to know about the currently selected network.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkConfig {
    pub lib_version: &'static str,
    pub ui_version: &'static str,
    pub network: String,
    pub rollup_network: RollupNetwork,
    pub infura_api_key: String,
    pub ethereum_network: EthereumNetwork,
}

#[derive(Debug, Deserialize)]
struct NetworkDefaults {
    rollup: BTreeMap<String, RollupNetwork>,
    ethereum: BTreeMap<String, EthereumNetwork>,
}

const NETWORKS_JSON: &str = include_str!("../../config/networks.json");

static DEFAULTS: Lazy<NetworkDefaults> =
    Lazy::new(|| from_str(NETWORKS_JSON).expect("failed to parse networks.json"));

pub fn rollup_networks() -> &'static BTreeMap<String, RollupNetwork> {
    &DEFAULTS.rollup
}

pub fn ethereum_networks() -> &'static BTreeMap<String, EthereumNetwork> {
    &DEFAULTS.ethereum
}

pub fn is_known_network(network: &str) -> bool {
    DEFAULTS.rollup.contains_key(network)
}

/// Join the rollup entry for `network` with the layer-1 chain it settles on.
pub fn resolve(network: &str, infura_api_key: &str) -> AppResult<NetworkConfig> {
    let rollup_network = DEFAULTS
        .rollup
        .get(network)
        .ok_or_else(|| AppError::Config(format!("unknown rollup network: {network}")))?;
    let ethereum_network = DEFAULTS
        .ethereum
        .get(&rollup_network.ethereum_network)
        .ok_or_else(|| {
            AppError::Config(format!(
                "rollup network {network} points at unknown chain {}",
                rollup_network.ethereum_network
            ))
        })?;

    Ok(NetworkConfig {
        lib_version: ROLLUP_LIB_VERSION,
        ui_version: ROLLUP_UI_VERSION,
        network: network.to_string(),
        rollup_network: rollup_network.clone(),
        infura_api_key: infura_api_key.to_string(),
        ethereum_network: ethereum_network.clone(),
    })
}
