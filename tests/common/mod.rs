#![allow(dead_code)]

use std::{
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    providers::{Http, Provider},
    types::Address,
};
use serde_json::Value;
use tokio::sync::{Notify, mpsc, watch};

use walletsession::{
    error::{AppError, AppResult},
    implementations::{
        bootstrap::{ModuleAction, ModuleDispatcher},
        networks::NetworkConfig,
        provider::{ConnectionKind, Eip1193Provider, ProviderRpcError},
        selector::{
            ConnectedWallet, RemoteWalletConnector, SelectorFactory, SelectorOptions,
            WalletSelector,
        },
        storage::{self, KeyValueStore, MemoryStore},
        theme::Theme,
    },
    layers::session::{Session, SessionDeps, SessionOptions},
    types::{DisabledWallet, LoginOptions},
    wallet::{RollupProvider, SessionSigner, SignerFactory, SignerMode},
};

pub const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
pub const BOB: &str = "0x0000000000000000000000000000000000000b0b";

pub fn addr(raw: &str) -> Address {
    Address::from_str(raw).unwrap()
}

/// Wallet that records every request and fails switches from a script.
/// With a `switch_gate`, switch requests hang until the gate is notified.
#[derive(Debug, Default)]
pub struct ScriptedWallet {
    pub calls: Mutex<Vec<(String, Value)>>,
    pub switch_errors: Mutex<Vec<ProviderRpcError>>,
    pub switch_gate: Option<Arc<Notify>>,
}

impl ScriptedWallet {
    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    pub fn fail_next_switch(&self, err: ProviderRpcError) {
        self.switch_errors.lock().unwrap().push(err);
    }
}

#[async_trait]
impl Eip1193Provider for ScriptedWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        if method == "wallet_switchEthereumChain" {
            if let Some(gate) = &self.switch_gate {
                gate.notified().await;
            }
            if let Some(err) = self.switch_errors.lock().unwrap().pop() {
                return Err(err);
            }
        }
        Ok(Value::Null)
    }
}

pub fn connected(
    label: &str,
    wallet: Arc<dyn Eip1193Provider>,
    account: &str,
    chain_id: u64,
    kind: ConnectionKind,
) -> ConnectedWallet {
    ConnectedWallet {
        label: label.to_string(),
        provider: wallet,
        accounts: vec![addr(account)],
        chains: vec![format!("{chain_id:#x}")],
        kind,
        peer_name: None,
    }
}

/// Selector whose "user" picks whatever is queued in `choice`.
pub struct FakeSelector {
    pub choice: Mutex<Option<ConnectedWallet>>,
    pub auto_selects: Mutex<Vec<Option<String>>>,
    pub wallets: watch::Sender<Vec<ConnectedWallet>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub theme: Mutex<Theme>,
    /// Store read on every `connect`, to see what the session persisted before prompting.
    pub observed_store: Mutex<Option<Arc<MemoryStore>>>,
    pub selection_at_connect: Mutex<Vec<Option<String>>>,
}

impl FakeSelector {
    pub fn new() -> Self {
        let (wallets, _) = watch::channel(Vec::new());
        Self {
            choice: Mutex::new(None),
            auto_selects: Mutex::new(Vec::new()),
            wallets,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            theme: Mutex::new(Theme::Light),
            observed_store: Mutex::new(None),
            selection_at_connect: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, wallet: ConnectedWallet) {
        *self.choice.lock().unwrap() = Some(wallet);
    }

    pub fn publish(&self, wallets: Vec<ConnectedWallet>) {
        self.wallets.send_replace(wallets);
    }
}

#[async_trait]
impl WalletSelector for FakeSelector {
    async fn connect(&self, auto_select: Option<&str>) -> AppResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.auto_selects
            .lock()
            .unwrap()
            .push(auto_select.map(str::to_string));
        let store = self.observed_store.lock().unwrap().clone();
        if let Some(store) = store {
            let selection = store.get(storage::LAST_SELECTED_WALLET).await?;
            self.selection_at_connect.lock().unwrap().push(selection);
        }
        let queued = self.choice.lock().unwrap().take();
        if let Some(wallet) = queued {
            self.wallets.send_replace(vec![wallet]);
        }
        Ok(())
    }

    fn wallets(&self) -> Vec<ConnectedWallet> {
        self.wallets.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Vec<ConnectedWallet>> {
        self.wallets.subscribe()
    }

    async fn disconnect(&self, label: &str) -> AppResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.wallets.send_if_modified(|wallets| {
            let before = wallets.len();
            wallets.retain(|w| w.label != label);
            before != wallets.len()
        });
        Ok(())
    }

    fn update_theme(&self, theme: Theme) {
        *self.theme.lock().unwrap() = theme;
    }
}

pub struct FakeSelectorFactory {
    pub selector: Arc<FakeSelector>,
    pub builds: AtomicUsize,
    pub last_options: Mutex<Option<SelectorOptions>>,
}

impl SelectorFactory for FakeSelectorFactory {
    fn build(&self, options: SelectorOptions) -> AppResult<Arc<dyn WalletSelector>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options);
        Ok(self.selector.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerScript {
    Ok,
    NoSigner,
    Fail,
}

pub struct FakeSignerFactory {
    pub rollup_fails: AtomicBool,
    pub script: Mutex<SignerScript>,
    pub modes: Mutex<Vec<SignerMode>>,
    /// When set, `build` waits here, standing in for the user reading the wallet prompt.
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeSignerFactory {
    pub fn new() -> Self {
        Self {
            rollup_fails: AtomicBool::new(false),
            script: Mutex::new(SignerScript::Ok),
            modes: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SignerFactory for FakeSignerFactory {
    async fn rollup_provider(&self, config: &NetworkConfig) -> AppResult<RollupProvider> {
        if self.rollup_fails.load(Ordering::SeqCst) {
            return Err(AppError::Config("rollup api unreachable".into()));
        }
        let client = Provider::<Http>::try_from(config.rollup_network.api.as_str()).unwrap();
        Ok(RollupProvider {
            network: config.network.clone(),
            api: config.rollup_network.api.clone(),
            client: Arc::new(client),
        })
    }

    async fn build(
        &self,
        wallet: Arc<dyn Eip1193Provider>,
        rollup: &RollupProvider,
        mode: SignerMode,
    ) -> AppResult<Option<SessionSigner>> {
        self.modes.lock().unwrap().push(mode);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let script = *self.script.lock().unwrap();
        match script {
            SignerScript::Fail => Err(AppError::Signer("wallet refused".into())),
            SignerScript::NoSigner => Ok(None),
            SignerScript::Ok => {
                let accounts = wallet
                    .request("eth_accounts", serde_json::json!([]))
                    .await
                    .map_err(AppError::from)?;
                let address = accounts
                    .as_array()
                    .and_then(|list| list.first())
                    .and_then(Value::as_str)
                    .map(addr)
                    .unwrap_or_else(|| addr(ALICE));
                Ok(Some(SessionSigner {
                    address,
                    mode,
                    session_key: None,
                    rollup: rollup.clone(),
                    wallet,
                }))
            }
        }
    }
}

/// Wallet whose `eth_accounts` answer can be changed mid-test.
#[derive(Debug)]
pub struct AccountWallet {
    pub inner: Arc<ScriptedWallet>,
    pub account: Mutex<String>,
}

#[async_trait]
impl Eip1193Provider for AccountWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        if method == "eth_accounts" {
            let account = self.account.lock().unwrap().clone();
            return Ok(serde_json::json!([account]));
        }
        self.inner.request(method, params).await
    }
}

pub struct FakeRemoteConnector {
    pub wallet: Mutex<Option<ConnectedWallet>>,
    pub connected: AtomicBool,
    pub disconnects: AtomicUsize,
    pub accounts: watch::Sender<Vec<Address>>,
}

impl FakeRemoteConnector {
    pub fn new(wallet: ConnectedWallet) -> Self {
        let (accounts, _) = watch::channel(wallet.accounts.clone());
        Self {
            wallet: Mutex::new(Some(wallet)),
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            accounts,
        }
    }
}

#[async_trait]
impl RemoteWalletConnector for FakeRemoteConnector {
    async fn enable(&self, _chain_id: u64) -> AppResult<ConnectedWallet> {
        let wallet = self
            .wallet
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AppError::Selector("user closed the QR modal".into()))?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(wallet)
    }

    async fn disconnect(&self) -> AppResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn accounts(&self) -> watch::Receiver<Vec<Address>> {
        self.accounts.subscribe()
    }
}

pub struct Harness {
    pub session: Arc<Session>,
    pub selector: Arc<FakeSelector>,
    pub selector_factory: Arc<FakeSelectorFactory>,
    pub signer_factory: Arc<FakeSignerFactory>,
    pub store: Arc<MemoryStore>,
    pub actions: mpsc::UnboundedReceiver<ModuleAction>,
}

pub struct HarnessBuilder {
    options: SessionOptions,
    remote: Option<Arc<FakeRemoteConnector>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            options: SessionOptions {
                network: "testnet".to_string(),
                login_options: LoginOptions::default(),
                ..SessionOptions::default()
            },
            remote: None,
        }
    }

    pub fn disabled(mut self, name: &str, error: &str) -> Self {
        self.options.disabled_wallets.push(DisabledWallet {
            name: name.to_string(),
            error: error.to_string(),
        });
        self
    }

    pub fn logout_redirect(mut self, path: &str) -> Self {
        self.options.logout_redirect = Some(path.to_string());
        self
    }

    pub fn restore_network(mut self) -> Self {
        self.options.restore_network = true;
        self
    }

    pub fn remote(mut self, connector: Arc<FakeRemoteConnector>) -> Self {
        self.remote = Some(connector);
        self
    }

    pub fn build(self) -> Harness {
        let selector = Arc::new(FakeSelector::new());
        let selector_factory = Arc::new(FakeSelectorFactory {
            selector: selector.clone(),
            builds: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        });
        let signer_factory = Arc::new(FakeSignerFactory::new());
        let store = Arc::new(MemoryStore::new());
        *selector.observed_store.lock().unwrap() = Some(store.clone());
        let (dispatcher, actions) = ModuleDispatcher::channel();

        let deps = SessionDeps {
            selector_factory: selector_factory.clone(),
            remote_connector: self
                .remote
                .map(|remote| remote as Arc<dyn RemoteWalletConnector>),
            signer_factory: signer_factory.clone(),
            store: store.clone(),
            dispatcher,
        };

        Harness {
            session: Session::new(deps, self.options),
            selector,
            selector_factory,
            signer_factory,
            store,
            actions,
        }
    }
}

impl Harness {
    /// Names of every module action dispatched so far.
    pub fn drain_actions(&mut self) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(action) = self.actions.try_recv() {
            names.push(action.name());
        }
        names
    }

    /// Wait for the next module action with the given name.
    pub async fn expect_action(&mut self, name: &str) -> ModuleAction {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let action = self.actions.recv().await.expect("dispatcher dropped");
                if action.name() == name {
                    return action;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {name}"))
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
