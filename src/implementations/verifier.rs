use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::json;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, AppResult},
    implementations::{
        networks::EthereumNetwork,
        provider::{ConnectionKind, Eip1193Provider},
        selector::NATIVE_TOKEN_SYMBOL,
    },
};

pub const SWITCH_CHAIN_METHOD: &str = "wallet_switchEthereumChain";
pub const ADD_CHAIN_METHOD: &str = "wallet_addEthereumChain";
const CHAIN_ICON_URL: &str = "https://rootstock.io/favicon-32x32.png";
const UNSUPPORTED_SWITCH: &str = "WalletConnect does not support network switching";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerifierState {
    Unchecked,
    AwaitingSwitch,
    Matched,
    Rejected,
}

struct Pending {
    id: u64,
    sender: Option<oneshot::Sender<bool>>,
}

#[derive(Default)]
struct SlotInner {
    next_id: u64,
    pending: Option<Pending>,
}

/// Holds the single outstanding "please switch chains" request.
#[derive(Default)]
pub struct NetworkChangeSlot {
    inner: Mutex<SlotInner>,
}

/// Frees the slot when the owning verification finishes, however it finishes.
struct SlotGuard<'a> {
    slot: &'a NetworkChangeSlot,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.slot.lock();
        if inner.pending.as_ref().is_some_and(|p| p.id == self.id) {
            inner.pending = None;
        }
    }
}

impl NetworkChangeSlot {
    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overlapping verifications are refused instead of orphaning the first waiter.
    fn install(&self) -> AppResult<(SlotGuard<'_>, oneshot::Receiver<bool>)> {
        let mut inner = self.lock();
        if inner.pending.is_some() {
            return Err(AppError::VerificationInFlight);
        }
        let (tx, rx) = oneshot::channel();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.pending = Some(Pending {
            id,
            sender: Some(tx),
        });
        Ok((SlotGuard { slot: self, id }, rx))
    }

    fn settle(&self, outcome: bool) -> bool {
        let sender = self
            .lock()
            .pending
            .as_mut()
            .and_then(|pending| pending.sender.take());
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Drop the waiter without answering it; the verifier sees a rejection.
    pub fn clear(&self) {
        self.lock().pending = None;
    }
}

/// What the verifier needs to know about the connected wallet.
pub struct NetworkCheck<'a> {
    pub provider: &'a dyn Eip1193Provider,
    pub kind: ConnectionKind,
    pub current_chain: Option<u64>,
    pub target: &'a EthereumNetwork,
}

/// Makes sure the wallet sits on the target chain, asking it to switch when it can.
pub struct NetworkVerifier {
    slot: NetworkChangeSlot,
    state: watch::Sender<VerifierState>,
}

impl Default for NetworkVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkVerifier {
    pub fn new() -> Self {
        let (state, _) = watch::channel(VerifierState::Unchecked);
        Self {
            slot: NetworkChangeSlot::default(),
            state,
        }
    }

    pub fn state(&self) -> VerifierState {
        *self.state.borrow()
    }

    pub fn wrong_network(&self) -> bool {
        self.state() == VerifierState::AwaitingSwitch
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }

    fn transition(&self, next: VerifierState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(?previous, ?next, "network verifier transition");
        }
    }

    pub async fn verify(&self, check: NetworkCheck<'_>) -> AppResult<()> {
        let (_guard, waiter) = self.slot.install()?;
        self.transition(VerifierState::Unchecked);

        let target = check.target;
        if check.current_chain == Some(target.id) {
            self.transition(VerifierState::Matched);
            return Ok(());
        }
        self.transition(VerifierState::AwaitingSwitch);

        if !check.kind.can_switch_chain() {
            self.transition(VerifierState::Rejected);
            return Err(AppError::NetworkUnsupported(UNSUPPORTED_SWITCH.into()));
        }

        info!(
            current = ?check.current_chain,
            target = target.id,
            "requesting wallet chain switch"
        );
        let outcome = tokio::select! {
            switched = switch_chain(check.provider, target) => switched,
            signal = waiter => settled(signal),
        };
        self.finish(outcome)
    }

    /// For connections that cannot be switched programmatically: wait until the
    /// user changes chains in the wallet or gives up.
    pub async fn await_chain_change(
        &self,
        current_chain: Option<u64>,
        target: &EthereumNetwork,
    ) -> AppResult<()> {
        let (_guard, waiter) = self.slot.install()?;
        if current_chain == Some(target.id) {
            self.transition(VerifierState::Matched);
            return Ok(());
        }
        self.transition(VerifierState::AwaitingSwitch);
        info!(current = ?current_chain, target = target.id, "waiting for manual chain change");
        self.finish(settled(waiter.await))
    }

    fn finish(&self, outcome: AppResult<()>) -> AppResult<()> {
        match &outcome {
            Ok(()) => self.transition(VerifierState::Matched),
            Err(err) => {
                warn!("network verification failed: {err}");
                self.transition(VerifierState::Rejected);
            }
        }
        outcome
    }

    /// A chain-changed notification; only the target chain releases the waiter.
    pub fn notify_chain_changed(&self, chain_id: u64, target: &EthereumNetwork) -> bool {
        chain_id == target.id && self.slot.settle(true)
    }

    pub fn reject_pending(&self) -> bool {
        let rejected = self.slot.settle(false);
        if self.wrong_network() {
            self.transition(VerifierState::Rejected);
        }
        rejected
    }

    pub fn reset(&self) {
        self.slot.clear();
        self.transition(VerifierState::Unchecked);
    }
}

fn settled(signal: Result<bool, oneshot::error::RecvError>) -> AppResult<()> {
    match signal {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(AppError::NetworkChangeRejected),
    }
}

/// EIP-3326 switch, falling back to EIP-3085 registration when the wallet
/// does not know the chain yet.
pub async fn switch_chain(provider: &dyn Eip1193Provider, target: &EthereumNetwork) -> AppResult<()> {
    let params = json!([{ "chainId": target.hex_chain_id() }]);
    match provider.request(SWITCH_CHAIN_METHOD, params.clone()).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_unrecognized_chain() => {
            info!(chain = target.id, "wallet does not know the chain, registering it");
            provider
                .request(ADD_CHAIN_METHOD, add_chain_params(target))
                .await?;
            provider.request(SWITCH_CHAIN_METHOD, params).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub fn add_chain_params(target: &EthereumNetwork) -> serde_json::Value {
    json!([{
        "chainId": target.hex_chain_id(),
        "chainName": target.display_name(),
        "nativeCurrency": {
            "name": "Ether",
            "symbol": NATIVE_TOKEN_SYMBOL,
            "decimals": 18,
        },
        "rpcUrls": [target.rpc_url],
        "blockExplorerUrls": [target.rpc_url],
        "iconUrls": [CHAIN_ICON_URL],
    }])
}
