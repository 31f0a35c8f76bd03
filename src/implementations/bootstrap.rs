use std::time::Duration;

use ethers::types::Address;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    implementations::selector::REMOTE_WALLET_NAME,
    types::LoginOptions,
    wallet::{SessionSigner, SignerMode},
};

pub const AUTO_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// Fire-and-forget requests to the account, wallet, history, token and contact modules.
#[derive(Debug, Clone)]
pub enum ModuleAction {
    SetAddress(Address),
    SetSyncWallet(Box<SessionSigner>),
    SetLoggedIn(bool),
    SetRemoteWallet(bool),
    SetInitialName,
    UpdateAccountState,
    CheckCpk,
    AutoUpdateAccountState(Duration),
    GetTransactionHistory,
    LoadTokens,
    RequestContacts,
    ClearAccountData,
    Logout,
    Redirect(String),
}

impl ModuleAction {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleAction::SetAddress(_) => "account/setAddress",
            ModuleAction::SetSyncWallet(_) => "wallet/setSyncWallet",
            ModuleAction::SetLoggedIn(_) => "account/setLoggedIn",
            ModuleAction::SetRemoteWallet(_) => "wallet/setRemoteWallet",
            ModuleAction::SetInitialName => "account/setInitialName",
            ModuleAction::UpdateAccountState => "account/updateAccountState",
            ModuleAction::CheckCpk => "wallet/checkCPK",
            ModuleAction::AutoUpdateAccountState(_) => "account/autoUpdateAccountState",
            ModuleAction::GetTransactionHistory => "history/getTransactionHistory",
            ModuleAction::LoadTokens => "tokens/loadTokens",
            ModuleAction::RequestContacts => "contacts/requestContacts",
            ModuleAction::ClearAccountData => "account/clearAccountData",
            ModuleAction::Logout => "account/logout",
            ModuleAction::Redirect(_) => "router/push",
        }
    }
}

/// Sending half handed to the session. Nobody listening is not an error.
#[derive(Debug, Clone)]
pub struct ModuleDispatcher {
    tx: mpsc::UnboundedSender<ModuleAction>,
}

impl ModuleDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ModuleAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn dispatch(&self, action: ModuleAction) {
        let name = action.name();
        if self.tx.send(action).is_err() {
            debug!(action = name, "no module listener, dropping action");
        }
    }
}

pub fn signer_mode(selected_wallet: Option<&str>, options: &LoginOptions) -> SignerMode {
    if selected_wallet == Some(REMOTE_WALLET_NAME) {
        SignerMode::Remote
    } else if options.require_signer {
        SignerMode::Keyed
    } else {
        SignerMode::NoKeys
    }
}

/// Publish a fresh signer and kick off the initial data loads.
pub fn publish_session(dispatcher: &ModuleDispatcher, signer: SessionSigner, options: &LoginOptions) {
    dispatcher.dispatch(ModuleAction::SetAddress(signer.address));
    dispatcher.dispatch(ModuleAction::SetSyncWallet(Box::new(signer)));
    dispatcher.dispatch(ModuleAction::SetLoggedIn(true));

    dispatcher.dispatch(ModuleAction::SetInitialName);
    if options.request_account_state {
        dispatcher.dispatch(ModuleAction::UpdateAccountState);
        dispatcher.dispatch(ModuleAction::CheckCpk);
    }
    if options.auto_update_account_state {
        dispatcher.dispatch(ModuleAction::AutoUpdateAccountState(AUTO_UPDATE_INTERVAL));
    }
    if options.request_transaction_history {
        dispatcher.dispatch(ModuleAction::GetTransactionHistory);
    }
    dispatcher.dispatch(ModuleAction::LoadTokens);
    dispatcher.dispatch(ModuleAction::RequestContacts);
}
