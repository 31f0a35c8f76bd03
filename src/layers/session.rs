use std::sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    implementations::{
        bootstrap::{self, ModuleAction, ModuleDispatcher},
        networks::{self, NetworkConfig},
        provider::Eip1193Provider,
        selector::{
            ConnectedWallet, REMOTE_WALLET_NAME, RemoteWalletConnector, SelectorFactory,
            SelectorOptions, WalletSelector,
        },
        storage::{self, KeyValueStore},
        theme::{self, Theme},
        verifier::{NetworkCheck, NetworkVerifier, VerifierState},
    },
    types::{DisabledWallet, LoginOptions, LoginOptionsPatch, SessionSnapshot, SessionStatus},
    wallet::{SessionSigner, SignerFactory, SignerMode},
};
use ethers::types::Address;
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

const WALLETCONNECT_LABEL: &str = "WalletConnect";

/// Collaborators the session drives but does not implement.
#[derive(Clone)]
pub struct SessionDeps {
    pub selector_factory: Arc<dyn SelectorFactory>,
    pub remote_connector: Option<Arc<dyn RemoteWalletConnector>>,
    pub signer_factory: Arc<dyn SignerFactory>,
    pub store: Arc<dyn KeyValueStore>,
    pub dispatcher: ModuleDispatcher,
}

/// Operator-level settings fixed for the lifetime of a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub network: String,
    pub infura_key: String,
    pub disabled_wallets: Vec<DisabledWallet>,
    pub restore_network: bool,
    pub logout_redirect: Option<String>,
    pub dapp_url: Option<String>,
    pub login_options: LoginOptions,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            network: config.network.clone(),
            infura_key: config.infura_key.clone(),
            disabled_wallets: config.disabled_wallets.clone(),
            restore_network: config.restore_network,
            logout_redirect: config.logout_redirect.clone(),
            dapp_url: config.dapp_url.clone(),
            login_options: config.login_options.merged(),
        }
    }
}

struct SessionState {
    status: SessionStatus,
    selected_wallet: Option<String>,
    loading_hint: Option<String>,
    error: String,
    inited: bool,
    restoring_session: bool,
    network: String,
    theme: Theme,
    login_options: LoginOptions,
    address: Option<Address>,
    ethereum_provider: Option<Arc<dyn Eip1193Provider>>,
    remote_wallet: Option<ConnectedWallet>,
    signer: Option<SessionSigner>,
}

struct Listener {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owns the wallet connection and drives login, chain verification and signer bootstrap.
pub struct Session {
    deps: SessionDeps,
    options: SessionOptions,
    state: RwLock<SessionState>,
    selector: RwLock<Option<Arc<dyn WalletSelector>>>,
    verifier: NetworkVerifier,
    listener: Mutex<Option<Listener>>,
    remote_listener: Mutex<Option<Listener>>,
    listener_generation: AtomicU64,
}

impl Session {
    pub fn new(deps: SessionDeps, options: SessionOptions) -> Arc<Self> {
        let state = SessionState {
            status: SessionStatus::Initial,
            selected_wallet: None,
            loading_hint: None,
            error: String::new(),
            inited: false,
            restoring_session: false,
            network: options.network.clone(),
            theme: Theme::Light,
            login_options: options.login_options,
            address: None,
            ethereum_provider: None,
            remote_wallet: None,
            signer: None,
        };
        Arc::new(Self {
            deps,
            options,
            state: RwLock::new(state),
            selector: RwLock::new(None),
            verifier: NetworkVerifier::new(),
            listener: Mutex::new(None),
            remote_listener: Mutex::new(None),
            listener_generation: AtomicU64::new(0),
        })
    }

    async fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }

    async fn set_hint(&self, hint: &str) {
        let hint = hint.to_string();
        self.update(|st| st.loading_hint = Some(hint)).await;
    }

    async fn set_status(&self, status: SessionStatus) {
        self.update(|st| st.status = status).await;
    }

    async fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|st| st.error = error).await;
    }

    /// Mirror the selection into storage so a reload can restore it.
    async fn set_selected_wallet(&self, wallet: Option<&str>) {
        let wallet = wallet.map(str::to_string);
        let persisted = match wallet.as_deref() {
            Some(name) => self.deps.store.set(storage::LAST_SELECTED_WALLET, name).await,
            None => self.deps.store.remove(storage::LAST_SELECTED_WALLET).await,
        };
        if let Err(err) = persisted {
            warn!("failed to persist wallet selection: {err}");
        }
        self.update(|st| st.selected_wallet = wallet).await;
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status
    }

    pub async fn selected_wallet(&self) -> Option<String> {
        self.state.read().await.selected_wallet.clone()
    }

    pub async fn address(&self) -> Option<Address> {
        self.state.read().await.address
    }

    pub async fn signer(&self) -> Option<SessionSigner> {
        self.state.read().await.signer.clone()
    }

    pub async fn ethereum_provider(&self) -> Option<Arc<dyn Eip1193Provider>> {
        self.state.read().await.ethereum_provider.clone()
    }

    /// Wallet connected through the remote connector, if that path is in use.
    pub async fn remote_wallet(&self) -> Option<ConnectedWallet> {
        self.state.read().await.remote_wallet.clone()
    }

    pub async fn error(&self) -> String {
        self.state.read().await.error.clone()
    }

    pub fn verifier_state(&self) -> VerifierState {
        self.verifier.state()
    }

    pub fn wrong_network(&self) -> bool {
        self.verifier.wrong_network()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.read().await;
        SessionSnapshot {
            status: st.status,
            selected_wallet: st.selected_wallet.clone(),
            address: st.address.map(|a| format!("{a:#x}")),
            loading_hint: st.loading_hint.clone(),
            wrong_network: self.verifier.wrong_network(),
            verifier: self.verifier.state(),
            error: st.error.clone(),
            inited: st.inited,
            restoring_session: st.restoring_session,
            network: st.network.clone(),
            theme: st.theme,
            login_options: st.login_options,
        }
    }

    pub async fn config(&self) -> AppResult<NetworkConfig> {
        let network = self.state.read().await.network.clone();
        networks::resolve(&network, &self.options.infura_key)
    }

    pub async fn set_login_options(&self, patch: LoginOptionsPatch) {
        let options = patch.merged();
        self.update(|st| st.login_options = options).await;
    }

    pub async fn set_network(&self, network: &str) -> AppResult<()> {
        if !networks::is_known_network(network) {
            return Err(AppError::InvalidInput(format!("unknown network: {network}")));
        }
        self.deps
            .store
            .set(storage::LAST_SELECTED_NETWORK, network)
            .await?;
        let network = network.to_string();
        self.update(|st| st.network = network).await;
        Ok(())
    }

    pub async fn set_theme(&self, theme: Theme) -> AppResult<()> {
        theme::save_user_theme(self.deps.store.as_ref(), theme).await?;
        self.apply_theme(theme).await;
        Ok(())
    }

    pub async fn toggle_theme(&self) -> AppResult<Theme> {
        let theme = theme::toggle_theme(self.deps.store.as_ref()).await?;
        self.apply_theme(theme).await;
        Ok(theme)
    }

    /// Pick up the persisted theme without writing anything back.
    pub async fn load_theme(&self) -> AppResult<Theme> {
        let theme = theme::user_theme(self.deps.store.as_ref()).await?;
        self.apply_theme(theme).await;
        Ok(theme)
    }

    async fn apply_theme(&self, theme: Theme) {
        self.update(|st| st.theme = theme).await;
        if let Some(selector) = self.selector.read().await.as_ref() {
            selector.update_theme(theme);
        }
    }

    /// Build the wallet selector once; later calls are no-ops.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> AppResult<()> {
        let mut slot = self.selector.write().await;
        if slot.is_some() {
            return Ok(());
        }
        let theme = self.state.read().await.theme;
        let options = SelectorOptions::for_networks(
            theme,
            networks::ethereum_networks(),
            self.options.dapp_url.clone(),
        );
        let selector = self.deps.selector_factory.build(options)?;
        *slot = Some(selector);
        drop(slot);

        self.update(|st| st.inited = true).await;
        info!("wallet selector initialised");
        Ok(())
    }

    /// Poll the selector and the remote connector for account or chain
    /// changes made inside the wallet.
    pub async fn refresh_wallets(&self) -> AppResult<()> {
        let selector = self.selector.read().await.clone();
        if let Some(selector) = selector {
            selector.refresh().await?;
        }
        if let Some(connector) = &self.deps.remote_connector {
            if connector.is_connected() {
                connector.refresh().await?;
            }
        }
        Ok(())
    }

    async fn selector(&self) -> AppResult<Arc<dyn WalletSelector>> {
        self.selector
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::Internal("wallet selector not initialised".into()))
    }

    /// Connect through the wallet selector and bring up a session.
    #[instrument(skip(self))]
    pub async fn login(self: &Arc<Self>, wallet_name: Option<&str>) -> bool {
        match self.connect_with_selector(wallet_name).await {
            Ok(Some(provider)) => self.bootstrap(Some(provider)).await,
            Ok(None) => {
                self.reset().await;
                false
            }
            Err(AppError::VerificationInFlight) => {
                info!("network check of another login still pending, ignoring this one");
                false
            }
            Err(err) => {
                warn!("login failed: {err}");
                self.reset().await;
                false
            }
        }
    }

    pub async fn login_with_wallet_connect(self: &Arc<Self>) -> bool {
        self.set_selected_wallet(None).await;
        self.login(Some(WALLETCONNECT_LABEL)).await
    }

    /// `Ok(None)` is a silent abort; user-facing reasons are left in the error field.
    async fn connect_with_selector(
        self: &Arc<Self>,
        wallet_name: Option<&str>,
    ) -> AppResult<Option<Arc<dyn Eip1193Provider>>> {
        self.initialize().await?;
        if self.verifier.is_pending() {
            return Err(AppError::VerificationInFlight);
        }
        let selector = self.selector().await?;

        if selector.wallets().is_empty() {
            selector.connect(wallet_name).await?;
        }
        let Some(primary) = selector.wallets().into_iter().next() else {
            info!("wallet selection aborted");
            return Ok(None);
        };
        let name = primary.wallet_name().to_string();
        if name == REMOTE_WALLET_NAME {
            self.set_error("Use Argent Connect button instead").await;
            return Ok(None);
        }

        self.subscribe_wallet_updates(selector.as_ref());
        self.set_selected_wallet(Some(&name)).await;

        if let Some(disabled) = self
            .options
            .disabled_wallets
            .iter()
            .find(|wallet| wallet.name == name)
        {
            info!(wallet = %name, "wallet is disabled");
            self.set_error(disabled.error.clone()).await;
            return Ok(None);
        }

        let config = self.config().await?;
        self.verifier
            .verify(NetworkCheck {
                provider: primary.provider.as_ref(),
                kind: primary.kind,
                current_chain: primary.chain_id(),
                target: &config.ethereum_network,
            })
            .await?;

        Ok(Some(primary.provider))
    }

    /// Select the companion-app wallet and connect through the remote connector.
    pub async fn login_with_remote_wallet(self: &Arc<Self>) -> bool {
        self.set_selected_wallet(Some(REMOTE_WALLET_NAME)).await;
        self.login_remote().await
    }

    #[instrument(skip(self))]
    async fn login_remote(self: &Arc<Self>) -> bool {
        if self.verifier.is_pending() {
            info!("network check of another login still pending, ignoring this one");
            return false;
        }
        let (wallet, config) = match self.enable_remote().await {
            Ok(enabled) => enabled,
            Err(err) => {
                warn!("remote wallet login failed: {err}");
                self.set_error(err.to_string()).await;
                self.reset().await;
                return false;
            }
        };
        if let Some(connector) = &self.deps.remote_connector {
            self.subscribe_remote_accounts(connector.as_ref());
        }

        let target = &config.ethereum_network;
        if wallet.chain_id() != Some(target.id) {
            if let Err(err) = self
                .verifier
                .await_chain_change(wallet.chain_id(), target)
                .await
            {
                info!("remote wallet stayed on the wrong network: {err}");
                return false;
            }
        }
        self.bootstrap(Some(wallet.provider.clone())).await
    }

    async fn enable_remote(&self) -> AppResult<(ConnectedWallet, NetworkConfig)> {
        let connector = self
            .deps
            .remote_connector
            .clone()
            .ok_or_else(|| AppError::Config("no remote wallet connector configured".into()))?;
        let config = self.config().await?;
        let wallet = connector.enable(config.ethereum_network.id).await?;

        let name = wallet
            .peer_name
            .clone()
            .unwrap_or_else(|| wallet.label.clone());
        if name != REMOTE_WALLET_NAME {
            return Err(AppError::DisabledWallet(format!(
                "To use \"{name}\" use WalletConnect button instead"
            )));
        }
        self.set_selected_wallet(Some(&name)).await;
        let remote = wallet.clone();
        self.update(|st| st.remote_wallet = Some(remote)).await;
        Ok((wallet, config))
    }

    /// Wrap the verified provider in a signer and publish the session.
    async fn bootstrap(&self, provider: Option<Arc<dyn Eip1193Provider>>) -> bool {
        match self.bootstrap_signer(provider).await {
            Ok(true) => true,
            Ok(false) => {
                self.reset().await;
                false
            }
            Err(err) => {
                warn!("signer bootstrap failed: {err}");
                self.reset().await;
                false
            }
        }
    }

    async fn bootstrap_signer(&self, provider: Option<Arc<dyn Eip1193Provider>>) -> AppResult<bool> {
        let Some(provider) = provider else {
            return Ok(false);
        };
        let (options, selected) = {
            let mut st = self.state.write().await;
            st.ethereum_provider = Some(provider.clone());
            st.loading_hint = Some("Processing...".to_string());
            st.status = SessionStatus::Connecting;
            (st.login_options, st.selected_wallet.clone())
        };

        let config = self.config().await?;
        let rollup = match self.deps.signer_factory.rollup_provider(&config).await {
            Ok(rollup) => rollup,
            Err(err) => {
                warn!("rollup provider unavailable: {err}");
                self.deps.dispatcher.dispatch(ModuleAction::Logout);
                return Ok(false);
            }
        };

        let mode = bootstrap::signer_mode(selected.as_deref(), &options);
        match mode {
            SignerMode::Keyed => {
                self.set_hint("Follow the instructions in your Ethereum wallet")
                    .await
            }
            SignerMode::Remote => self
                .deps
                .dispatcher
                .dispatch(ModuleAction::SetRemoteWallet(true)),
            SignerMode::NoKeys => {}
        }

        let Some(signer) = self
            .deps
            .signer_factory
            .build(provider, &rollup, mode)
            .await?
        else {
            info!("wallet produced no signer");
            return Ok(false);
        };
        if mode != SignerMode::Remote {
            self.deps
                .dispatcher
                .dispatch(ModuleAction::SetRemoteWallet(false));
        }

        self.set_hint("Getting wallet information...").await;
        let published = signer.clone();
        self.update(|st| {
            st.address = Some(signer.address);
            st.signer = Some(signer);
        })
        .await;
        bootstrap::publish_session(&self.deps.dispatcher, published, &options);

        self.set_status(SessionStatus::Authorized).await;
        info!(?mode, "session authorized");
        Ok(true)
    }

    fn subscribe_wallet_updates(self: &Arc<Self>, selector: &dyn WalletSelector) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }
        let generation = self.listener_generation.load(Ordering::SeqCst);
        let handle = spawn_wallet_listener(Arc::downgrade(self), selector.subscribe(), generation);
        *listener = Some(Listener { generation, handle });
        debug!(generation, "subscribed to wallet updates");
    }

    fn subscribe_remote_accounts(self: &Arc<Self>, connector: &dyn RemoteWalletConnector) {
        let mut listener = self
            .remote_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }
        let generation = self.listener_generation.load(Ordering::SeqCst);
        let handle = spawn_account_listener(Arc::downgrade(self), connector.accounts(), generation);
        *listener = Some(Listener { generation, handle });
        debug!(generation, "subscribed to remote wallet accounts");
    }

    fn listener_is_current(&self, generation: u64) -> bool {
        self.listener_generation.load(Ordering::SeqCst) == generation
    }

    /// React to a change in the selector's wallet list.
    pub async fn handle_wallets_update(self: &Arc<Self>, wallets: Vec<ConnectedWallet>) {
        let Some(primary) = wallets.into_iter().next() else {
            let was_logged_in = self
                .update(|st| {
                    st.status = SessionStatus::Initial;
                    st.signer = None;
                    st.ethereum_provider = None;
                    st.address.take().is_some()
                })
                .await;
            self.set_selected_wallet(None).await;
            if was_logged_in {
                info!("wallet disconnected, logging out");
                self.deps.dispatcher.dispatch(ModuleAction::Logout);
                if let Some(path) = &self.options.logout_redirect {
                    self.deps
                        .dispatcher
                        .dispatch(ModuleAction::Redirect(path.clone()));
                }
            }
            return;
        };

        self.set_selected_wallet(Some(primary.wallet_name())).await;
        if let Some(address) = primary.primary_account() {
            self.on_address_change(address).await;
        }
    }

    /// A different account while logged in is an account switch: log in again for it.
    pub async fn on_address_change(self: &Arc<Self>, address: Address) {
        let (current, selected) = {
            let st = self.state.read().await;
            (st.address, st.selected_wallet.clone())
        };
        let Some(previous) = current else {
            return;
        };
        if previous == address {
            return;
        }

        info!(
            from = %format!("{previous:#x}"),
            to = %format!("{address:#x}"),
            "switching accounts"
        );
        self.update(|st| {
            st.loading_hint = Some("Switching accounts...".to_string());
            st.status = SessionStatus::Connecting;
        })
        .await;
        self.deps.dispatcher.dispatch(ModuleAction::ClearAccountData);

        if selected.as_deref() == Some(REMOTE_WALLET_NAME) {
            self.login_remote().await;
        } else {
            self.login(selected.as_deref()).await;
        }
    }

    /// Chain-changed notification from a wallet; releases a pending manual switch.
    pub async fn notify_chain_changed(&self, chain_id: u64) -> bool {
        match self.config().await {
            Ok(config) => self
                .verifier
                .notify_chain_changed(chain_id, &config.ethereum_network),
            Err(err) => {
                warn!("cannot match chain change: {err}");
                false
            }
        }
    }

    pub fn reject_network_change(&self) -> bool {
        self.verifier.reject_pending()
    }

    async fn disconnect_remote(&self) {
        if let Some(connector) = &self.deps.remote_connector {
            if connector.is_connected() {
                if let Err(err) = connector.disconnect().await {
                    warn!("error disconnecting remote wallet: {err}");
                }
            }
        }
        self.update(|st| st.remote_wallet = None).await;
    }

    /// Tear the connection down. Safe to call on a clean session.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let remote_listener = self
            .remote_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.listener_generation.fetch_add(1, Ordering::SeqCst);

        self.disconnect_remote().await;
        self.update(|st| {
            st.status = SessionStatus::Initial;
            st.loading_hint = None;
            st.address = None;
            st.signer = None;
            st.ethereum_provider = None;
        })
        .await;
        self.set_selected_wallet(None).await;
        if let Err(err) = self.deps.store.remove(storage::WALLETCONNECT).await {
            warn!("failed to clear walletconnect session: {err}");
        }
        self.verifier.reset();

        let selector = self.selector.read().await.clone();
        if let Some(selector) = selector {
            if let Some(primary) = selector.wallets().first() {
                if let Err(err) = selector.disconnect(&primary.label).await {
                    warn!(wallet = %primary.label, "failed to disconnect wallet: {err}");
                }
            }
        }

        for listener in [listener, remote_listener].into_iter().flatten() {
            debug!(generation = listener.generation, "wallet update listener cancelled");
            listener.handle.abort();
        }
    }

    async fn restore_last_network(&self) {
        match self.deps.store.get(storage::LAST_SELECTED_NETWORK).await {
            Ok(Some(network)) if networks::is_known_network(&network) => {
                self.update(|st| st.network = network).await;
            }
            Ok(Some(network)) => debug!(%network, "ignoring unknown stored network"),
            Ok(None) => {}
            Err(err) => warn!("failed to read last network: {err}"),
        }
    }

    async fn load_last_login_data(&self) {
        match self.deps.store.get(storage::LAST_SELECTED_WALLET).await {
            Ok(Some(wallet)) => self.update(|st| st.selected_wallet = Some(wallet)).await,
            Ok(None) => {}
            Err(err) => warn!("failed to read last wallet: {err}"),
        }
    }

    /// Reconnect the wallet used in the previous run.
    #[instrument(skip(self))]
    pub async fn restore_login(self: &Arc<Self>) -> bool {
        self.update(|st| {
            st.restoring_session = true;
            st.loading_hint = Some("Restoring session...".to_string());
        })
        .await;
        if self.options.restore_network {
            self.restore_last_network().await;
        }
        self.load_last_login_data().await;

        let selected = self.selected_wallet().await;
        let result = if selected.as_deref() == Some(REMOTE_WALLET_NAME) {
            self.login_remote().await
        } else {
            self.login(selected.as_deref()).await
        };

        self.update(|st| st.restoring_session = false).await;
        result
    }
}

/// Plain fn so the spawned future's type does not feed back into `login`.
fn spawn_wallet_listener(
    session: Weak<Session>,
    mut updates: watch::Receiver<Vec<ConnectedWallet>>,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let wallets = updates.borrow_and_update().clone();
            let Some(session) = session.upgrade() else {
                break;
            };
            if !session.listener_is_current(generation) {
                break;
            }
            session.handle_wallets_update(wallets).await;
        }
        debug!(generation, "wallet update listener finished");
    })
}

fn spawn_account_listener(
    session: Weak<Session>,
    mut accounts: watch::Receiver<Vec<Address>>,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while accounts.changed().await.is_ok() {
            let Some(address) = accounts.borrow_and_update().first().copied() else {
                continue;
            };
            let Some(session) = session.upgrade() else {
                break;
            };
            if !session.listener_is_current(generation) {
                break;
            }
            session.on_address_change(address).await;
        }
        debug!(generation, "remote account listener finished");
    })
}
