use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult},
    implementations::{
        networks::EthereumNetwork,
        provider::{self, ConnectionKind, Eip1193Provider, JsonRpcWallet, parse_hex_chain_id},
        theme::Theme,
    },
};

pub const WALLETCONNECT_PROJECT_ID: &str = "c37c6a422d315bf55a0c39000960afa4";
/// RSK mainnet and testnet.
pub const WALLETCONNECT_REQUIRED_CHAINS: [u64; 2] = [30, 31];
pub const WALLETCONNECT_OPTIONAL_METHODS: [&str; 6] = [
    "eth_sendTransaction",
    "eth_signTransaction",
    "personal_sign",
    "eth_sign",
    "eth_signTypedData",
    "eth_signTypedData_v4",
];
pub const NATIVE_TOKEN_SYMBOL: &str = "RBTC";
/// Companion-app wallet that must go through the remote connector.
pub const REMOTE_WALLET_NAME: &str = "Argent";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorChain {
    pub id: String,
    pub token: String,
    pub label: String,
    pub rpc_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Connector {
    Injected,
    WalletConnect {
        version: u8,
        project_id: String,
        required_chains: Vec<u64>,
        dapp_url: Option<String>,
        optional_methods: Vec<String>,
    },
}

impl Connector {
    pub fn kind(&self) -> ConnectionKind {
        match self {
            Connector::Injected => ConnectionKind::Injected,
            Connector::WalletConnect { .. } => ConnectionKind::WalletConnect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendedWallet {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppMetadata {
    pub name: String,
    pub description: String,
    pub logo: String,
    pub recommended_injected_wallets: Vec<RecommendedWallet>,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "rifRollup".to_string(),
            description: "RIF Rollup - Rely on math, not validators".to_string(),
            logo: "https://firebasestorage.googleapis.com/v0/b/testing-30533.appspot.com/o/rollup_black.svg?alt=media&token=ca3d8ee4-eb3a-4e3b-aa39-3bad352ba03e".to_string(),
            recommended_injected_wallets: vec![RecommendedWallet {
                name: "MetaMask".to_string(),
                url: "https://metamask.io".to_string(),
            }],
        }
    }
}

/// Everything a wallet selector is constructed with.
#[derive(Debug, Clone, Serialize)]
pub struct SelectorOptions {
    pub theme: Theme,
    pub connectors: Vec<Connector>,
    pub chains: Vec<SelectorChain>,
    pub app_metadata: AppMetadata,
    pub account_center: bool,
}

impl SelectorOptions {
    /// Injected wallets plus WalletConnect v2, offering every known chain.
    pub fn for_networks<'a>(
        theme: Theme,
        networks: impl IntoIterator<Item = (&'a String, &'a EthereumNetwork)>,
        dapp_url: Option<String>,
    ) -> Self {
        let chains = networks
            .into_iter()
            .map(|(key, network)| SelectorChain {
                id: network.hex_chain_id(),
                token: NATIVE_TOKEN_SYMBOL.to_string(),
                label: key.clone(),
                rpc_url: network.rpc_url.clone(),
            })
            .collect();

        Self {
            theme,
            connectors: vec![
                Connector::Injected,
                Connector::WalletConnect {
                    version: 2,
                    project_id: WALLETCONNECT_PROJECT_ID.to_string(),
                    required_chains: WALLETCONNECT_REQUIRED_CHAINS.to_vec(),
                    dapp_url,
                    optional_methods: WALLETCONNECT_OPTIONAL_METHODS
                        .iter()
                        .map(|m| m.to_string())
                        .collect(),
                },
            ],
            chains,
            app_metadata: AppMetadata::default(),
            account_center: false,
        }
    }

    pub fn supports(&self, kind: ConnectionKind) -> bool {
        self.connectors.iter().any(|c| c.kind() == kind)
    }
}

/// One wallet the selector currently holds a connection to.
#[derive(Clone)]
pub struct ConnectedWallet {
    pub label: String,
    pub provider: Arc<dyn Eip1193Provider>,
    pub accounts: Vec<Address>,
    /// Hex chain ids as reported by the wallet; the first is the active one.
    pub chains: Vec<String>,
    pub kind: ConnectionKind,
    /// Name the peer announced over WalletConnect, if any.
    pub peer_name: Option<String>,
}

impl ConnectedWallet {
    pub fn primary_account(&self) -> Option<Address> {
        self.accounts.first().copied()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chains.first().and_then(|id| parse_hex_chain_id(id))
    }

    /// The remote-wallet brand hides behind a generic WalletConnect label.
    pub fn wallet_name(&self) -> &str {
        match self.peer_name.as_deref() {
            Some(REMOTE_WALLET_NAME) => REMOTE_WALLET_NAME,
            _ => &self.label,
        }
    }
}

impl fmt::Debug for ConnectedWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedWallet")
            .field("label", &self.label)
            .field("accounts", &self.accounts)
            .field("chains", &self.chains)
            .field("kind", &self.kind)
            .field("peer_name", &self.peer_name)
            .finish()
    }
}

#[async_trait]
pub trait WalletSelector: Send + Sync {
    /// Prompt for a wallet. With `auto_select`, connect that wallet without
    /// showing a chooser. Leaving the wallet list empty means the user aborted.
    async fn connect(&self, auto_select: Option<&str>) -> AppResult<()>;
    fn wallets(&self) -> Vec<ConnectedWallet>;
    fn subscribe(&self) -> watch::Receiver<Vec<ConnectedWallet>>;
    async fn disconnect(&self, label: &str) -> AppResult<()>;
    fn update_theme(&self, theme: Theme);

    /// Re-poll the connected wallet for account or chain changes.
    async fn refresh(&self) -> AppResult<()> {
        Ok(())
    }
}

pub trait SelectorFactory: Send + Sync {
    fn build(&self, options: SelectorOptions) -> AppResult<Arc<dyn WalletSelector>>;
}

/// Legacy WalletConnect v1 path used by companion-app wallets.
#[async_trait]
pub trait RemoteWalletConnector: Send + Sync {
    async fn enable(&self, chain_id: u64) -> AppResult<ConnectedWallet>;
    async fn disconnect(&self) -> AppResult<()>;
    fn is_connected(&self) -> bool;
    /// Accounts the companion app currently exposes (`accountsChanged`).
    fn accounts(&self) -> watch::Receiver<Vec<Address>>;

    async fn refresh(&self) -> AppResult<()> {
        Ok(())
    }
}

/// A wallet reachable at a fixed JSON-RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WalletEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default = "default_endpoint_kind")]
    pub kind: ConnectionKind,
}

fn default_endpoint_kind() -> ConnectionKind {
    ConnectionKind::Injected
}

async fn connect_endpoint(endpoint: &WalletEndpoint) -> AppResult<ConnectedWallet> {
    let wallet = JsonRpcWallet::connect(&endpoint.url)?;
    let accounts = provider::request_accounts(&wallet).await?;
    let chain_id = provider::chain_id(&wallet).await?;
    let peer_name = match endpoint.kind {
        ConnectionKind::Injected => None,
        _ => Some(endpoint.name.clone()),
    };

    Ok(ConnectedWallet {
        label: endpoint.name.clone(),
        provider: Arc::new(wallet),
        accounts,
        chains: vec![format!("{chain_id:#x}")],
        kind: endpoint.kind,
        peer_name,
    })
}

/// Selector over wallets exposed at configured JSON-RPC endpoints.
pub struct EndpointSelector {
    endpoints: Vec<WalletEndpoint>,
    options: std::sync::RwLock<SelectorOptions>,
    wallets: watch::Sender<Vec<ConnectedWallet>>,
}

impl EndpointSelector {
    pub fn new(endpoints: Vec<WalletEndpoint>, options: SelectorOptions) -> Self {
        let (wallets, _) = watch::channel(Vec::new());
        Self {
            endpoints,
            options: std::sync::RwLock::new(options),
            wallets,
        }
    }

    pub fn theme(&self) -> Theme {
        self.options
            .read()
            .map(|options| options.theme)
            .unwrap_or_default()
    }

    fn pick(&self, auto_select: Option<&str>) -> Option<&WalletEndpoint> {
        let supported = self.options.read().ok()?;
        let mut usable = self
            .endpoints
            .iter()
            .filter(|endpoint| supported.supports(endpoint.kind));
        match auto_select {
            Some(name) => usable.find(|endpoint| endpoint.name.eq_ignore_ascii_case(name)),
            None => usable.next(),
        }
    }
}

#[async_trait]
impl WalletSelector for EndpointSelector {
    async fn connect(&self, auto_select: Option<&str>) -> AppResult<()> {
        let Some(endpoint) = self.pick(auto_select) else {
            info!(wallet = ?auto_select, "no configured wallet matches the selection");
            return Ok(());
        };

        let wallet = connect_endpoint(endpoint).await?;
        if wallet.accounts.is_empty() {
            info!(wallet = %endpoint.name, "wallet returned no accounts");
            return Ok(());
        }
        info!(wallet = %wallet.label, chain = ?wallet.chain_id(), "wallet connected");
        self.wallets.send_replace(vec![wallet]);
        Ok(())
    }

    fn wallets(&self) -> Vec<ConnectedWallet> {
        self.wallets.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Vec<ConnectedWallet>> {
        self.wallets.subscribe()
    }

    async fn disconnect(&self, label: &str) -> AppResult<()> {
        self.wallets.send_if_modified(|wallets| {
            let before = wallets.len();
            wallets.retain(|wallet| wallet.label != label);
            wallets.len() != before
        });
        Ok(())
    }

    fn update_theme(&self, theme: Theme) {
        if let Ok(mut options) = self.options.write() {
            options.theme = theme;
        }
    }

    /// Re-read accounts and chain of the connected wallet and publish when they moved.
    async fn refresh(&self) -> AppResult<()> {
        let Some(current) = self.wallets.borrow().first().cloned() else {
            return Ok(());
        };
        let accounts = match provider::request_accounts(current.provider.as_ref()).await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(wallet = %current.label, "wallet stopped answering: {err}");
                Vec::new()
            }
        };
        if accounts.is_empty() {
            self.wallets.send_replace(Vec::new());
            return Ok(());
        }
        let chain = format!("{:#x}", provider::chain_id(current.provider.as_ref()).await?);
        if accounts != current.accounts || current.chains.first() != Some(&chain) {
            let mut updated = current;
            updated.accounts = accounts;
            updated.chains = vec![chain];
            self.wallets.send_replace(vec![updated]);
        }
        Ok(())
    }
}

pub struct EndpointSelectorFactory {
    endpoints: Vec<WalletEndpoint>,
}

impl EndpointSelectorFactory {
    pub fn new(endpoints: Vec<WalletEndpoint>) -> Self {
        Self { endpoints }
    }
}

impl SelectorFactory for EndpointSelectorFactory {
    fn build(&self, options: SelectorOptions) -> AppResult<Arc<dyn WalletSelector>> {
        if options.chains.is_empty() {
            return Err(AppError::Selector("selector needs at least one chain".into()));
        }
        Ok(Arc::new(EndpointSelector::new(self.endpoints.clone(), options)))
    }
}

/// Remote wallet reached at a fixed endpoint; the endpoint name is taken as the peer name.
pub struct EndpointRemoteConnector {
    endpoint: WalletEndpoint,
    connected: AtomicBool,
    wallet: Mutex<Option<Arc<dyn Eip1193Provider>>>,
    accounts: watch::Sender<Vec<Address>>,
}

impl EndpointRemoteConnector {
    pub fn new(endpoint: WalletEndpoint) -> Self {
        let (accounts, _) = watch::channel(Vec::new());
        Self {
            endpoint,
            connected: AtomicBool::new(false),
            wallet: Mutex::new(None),
            accounts,
        }
    }

    fn publish_accounts(&self, accounts: Vec<Address>) {
        self.accounts.send_if_modified(|current| {
            if *current == accounts {
                return false;
            }
            *current = accounts;
            true
        });
    }
}

#[async_trait]
impl RemoteWalletConnector for EndpointRemoteConnector {
    async fn enable(&self, chain_id: u64) -> AppResult<ConnectedWallet> {
        let mut endpoint = self.endpoint.clone();
        endpoint.kind = ConnectionKind::Remote;
        let wallet = connect_endpoint(&endpoint).await?;
        if wallet.accounts.is_empty() {
            return Err(AppError::Selector("remote wallet returned no accounts".into()));
        }
        info!(wallet = %wallet.label, requested_chain = chain_id, "remote wallet enabled");
        *self.wallet.lock().unwrap_or_else(PoisonError::into_inner) = Some(wallet.provider.clone());
        self.connected.store(true, Ordering::SeqCst);
        self.publish_accounts(wallet.accounts.clone());
        Ok(wallet)
    }

    async fn disconnect(&self) -> AppResult<()> {
        self.wallet.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn accounts(&self) -> watch::Receiver<Vec<Address>> {
        self.accounts.subscribe()
    }

    /// Poll the companion app for an account change.
    async fn refresh(&self) -> AppResult<()> {
        let wallet = self.wallet.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(wallet) = wallet else {
            return Ok(());
        };
        let accounts = provider::request_accounts(wallet.as_ref()).await?;
        if !accounts.is_empty() {
            self.publish_accounts(accounts);
        }
        Ok(())
    }
}
