use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use walletsession::{
    config::AppConfig,
    error::AppResult,
    implementations::{
        bootstrap::ModuleDispatcher,
        selector::{EndpointRemoteConnector, EndpointSelectorFactory, RemoteWalletConnector},
        storage::{FileStore, KeyValueStore, MemoryStore},
    },
    layers::{
        rpc::RpcServer,
        session::{Session, SessionDeps, SessionOptions},
    },
    wallet::WalletSignerFactory,
};

const WALLET_POLL_INTERVAL: Duration = Duration::from_secs(4);

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("fatal error: {err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    init_tracing();

    info!("loading configuration");
    let config = AppConfig::load()?;

    let store: Arc<dyn KeyValueStore> = match &config.storage_path {
        Some(path) => Arc::new(FileStore::open(path).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let (dispatcher, mut actions) = ModuleDispatcher::channel();
    tokio::spawn(async move {
        while let Some(action) = actions.recv().await {
            debug!(action = action.name(), "module action");
        }
    });

    let remote_connector = config.remote_wallet.clone().map(|endpoint| {
        Arc::new(EndpointRemoteConnector::new(endpoint)) as Arc<dyn RemoteWalletConnector>
    });

    let deps = SessionDeps {
        selector_factory: Arc::new(EndpointSelectorFactory::new(config.wallets.clone())),
        remote_connector,
        signer_factory: Arc::new(WalletSignerFactory::new()),
        store,
        dispatcher,
    };
    let session = Session::new(deps, SessionOptions::from_config(&config));
    let theme = session.load_theme().await?;
    info!(network = %config.network, %theme, "session ready");

    let poller = session.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(WALLET_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = poller.refresh_wallets().await {
                warn!("wallet refresh failed: {err}");
            }
        }
    });

    info!("starting session JSON-RPC server on stdio");
    let shutdown = session.clone();
    tokio::select! {
        served = RpcServer::new(session).run_stdio() => served,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, disconnecting wallet");
            shutdown.reset().await;
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}
