use serde::{Deserialize, Serialize};
use std::fmt;

use crate::implementations::{theme::Theme, verifier::VerifierState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Initial,
    Connecting,
    Authorized,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Initial => write!(f, "initial"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Authorized => write!(f, "authorized"),
        }
    }
}

/// Which bootstrap steps run after a signer is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOptions {
    pub require_signer: bool,
    pub request_account_state: bool,
    pub auto_update_account_state: bool,
    pub request_transaction_history: bool,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            require_signer: false,
            request_account_state: true,
            auto_update_account_state: true,
            request_transaction_history: true,
        }
    }
}

/// Partial login options; unset fields fall back to the defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOptionsPatch {
    #[serde(default)]
    pub require_signer: Option<bool>,
    #[serde(default)]
    pub request_account_state: Option<bool>,
    #[serde(default)]
    pub auto_update_account_state: Option<bool>,
    #[serde(default)]
    pub request_transaction_history: Option<bool>,
}

impl LoginOptionsPatch {
    pub fn merged(self) -> LoginOptions {
        let defaults = LoginOptions::default();
        LoginOptions {
            require_signer: self.require_signer.unwrap_or(defaults.require_signer),
            request_account_state: self
                .request_account_state
                .unwrap_or(defaults.request_account_state),
            auto_update_account_state: self
                .auto_update_account_state
                .unwrap_or(defaults.auto_update_account_state),
            request_transaction_history: self
                .request_transaction_history
                .unwrap_or(defaults.request_transaction_history),
        }
    }
}

/// A wallet blocked by the operator, with the message shown when it is picked.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DisabledWallet {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub wallet: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetNetworkParams {
    pub network: String,
}

#[derive(Debug, Deserialize)]
pub struct SetThemeParams {
    pub theme: Theme,
}

#[derive(Debug, Deserialize)]
pub struct ChainChangedParams {
    pub chain_id: u64,
}

#[derive(Debug, Serialize)]
pub struct LoginOut {
    pub success: bool,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Read-only view of the session for hosts and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub selected_wallet: Option<String>,
    pub address: Option<String>,
    pub loading_hint: Option<String>,
    pub wrong_network: bool,
    pub verifier: VerifierState,
    pub error: String,
    pub inited: bool,
    pub restoring_session: bool,
    pub network: String,
    pub theme: Theme,
    pub login_options: LoginOptions,
}
