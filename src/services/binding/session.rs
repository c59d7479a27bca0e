use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorDescriptor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    #[default]
    Idle,
    ConnectRequested,
    Connected,
    NonceRequested,
    SigningRequested,
    Signed,
    ExchangingToken,
    Bound,
    Failed,
}

impl BindingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BindingState::Bound | BindingState::Failed)
    }

    pub fn is_valid_transition(&self, target: &BindingState) -> bool {
        use BindingState::*;

        matches!(
            (self, target),
            // Forward transitions
            (Idle, ConnectRequested)
                | (ConnectRequested, Connected)
                | (Connected, NonceRequested)
                | (NonceRequested, SigningRequested)
                | (SigningRequested, Signed)
                | (Signed, ExchangingToken)
                | (ExchangingToken, Bound)
                // Connect callback after a restart without a persisted session
                | (Idle, Connected)
                // Resume after an interrupted network call
                | (NonceRequested, Connected)
                | (ExchangingToken, Signed)
                // Nonce retry with the same wallet
                | (Failed, Connected)
                // Failures
                | (Idle, Failed)
                | (ConnectRequested, Failed)
                | (Connected, Failed)
                | (NonceRequested, Failed)
                | (SigningRequested, Failed)
                | (Signed, Failed)
                | (ExchangingToken, Failed)
        )
    }
}

/// Which wallet round trip a pending flag or timeout refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletRequest {
    Connect,
    Sign,
}

/// One binding attempt. Only [`BindingMachine`](super::BindingMachine) writes
/// to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSession {
    pub(super) attempt_id: Option<Uuid>,
    pub(super) state: BindingState,
    pub(super) wallet_address: Option<String>,
    pub(super) wallet_session: Option<String>,
    pub(super) nonce: Option<String>,
    pub(super) challenge_message: Option<String>,
    pub(super) signature: Option<String>,
    pub(super) pending_connect_result: bool,
    pub(super) pending_sign_result: bool,
    pub(super) last_error: Option<ErrorDescriptor>,
    pub(super) failed_from: Option<BindingState>,
    pub(super) updated_at: Option<DateTime<Utc>>,
    /// Attempt the user walked away from. Its callbacks are refused until the
    /// next bind starts.
    #[serde(default)]
    pub(super) abandoned_attempt: Option<Uuid>,
}

impl BindingSession {
    pub(super) fn begin() -> Self {
        Self {
            attempt_id: Some(Uuid::new_v4()),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn attempt_id(&self) -> Option<Uuid> {
        self.attempt_id
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    pub fn wallet_address(&self) -> Option<&str> {
        self.wallet_address.as_deref()
    }

    pub fn wallet_session(&self) -> Option<&str> {
        self.wallet_session.as_deref()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn challenge_message(&self) -> Option<&str> {
        self.challenge_message.as_deref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn pending_connect_result(&self) -> bool {
        self.pending_connect_result
    }

    pub fn pending_sign_result(&self) -> bool {
        self.pending_sign_result
    }

    pub fn last_error(&self) -> Option<&ErrorDescriptor> {
        self.last_error.as_ref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn abandoned_attempt(&self) -> Option<Uuid> {
        self.abandoned_attempt
    }

    pub fn is_pending(&self) -> bool {
        self.pending_connect_result || self.pending_sign_result
    }
}
