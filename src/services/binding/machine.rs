use std::collections::VecDeque;

use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    deeplink::{
        outbound::WalletLinks,
        types::{DeepLinkEvent, LinkKind},
    },
    error::{AppError, ErrorDescriptor, Result},
    services::{
        auth::{ChallengeTemplate, Token, validate_wallet_address, verify_signature},
        binding::session::{BindingSession, BindingState, WalletRequest},
    },
};

const SPENT_NONCE_MEMORY: usize = 32;

/// What the driver has to do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Ignored,
    Launch {
        attempt_id: Uuid,
        request: WalletRequest,
        link: Url,
    },
    RequestNonce {
        attempt_id: Uuid,
        wallet_address: String,
    },
    ExchangeToken {
        attempt_id: Uuid,
        wallet_address: String,
        nonce: String,
        signature: String,
    },
    Bound(Token),
    Failed(ErrorDescriptor),
}

/// Transition table for a single wallet binding session. Pure: it performs no
/// I/O and returns the side effect the caller must carry out.
pub struct BindingMachine {
    session: BindingSession,
    links: WalletLinks,
    verify_signature: bool,
    spent_nonces: VecDeque<String>,
}

impl BindingMachine {
    pub fn new(links: WalletLinks, verify_signature: bool) -> Self {
        Self::restore(links, verify_signature, BindingSession::default())
    }

    pub fn restore(links: WalletLinks, verify_signature: bool, session: BindingSession) -> Self {
        let mut spent_nonces = VecDeque::with_capacity(SPENT_NONCE_MEMORY);
        spent_nonces.extend(session.nonce.clone());

        Self {
            session,
            links,
            verify_signature,
            spent_nonces,
        }
    }

    pub fn session(&self) -> &BindingSession {
        &self.session
    }

    pub fn state(&self) -> BindingState {
        self.session.state
    }

    pub fn has_pending_connect_result(&self) -> bool {
        self.session.pending_connect_result
    }

    pub fn has_pending_sign_result(&self) -> bool {
        self.session.pending_sign_result
    }

    pub fn is_connected(&self) -> bool {
        self.session.wallet_address.is_some()
    }

    fn transition(&mut self, target: BindingState) {
        debug_assert!(
            self.session.state.is_valid_transition(&target),
            "invalid binding transition {:?} -> {:?}",
            self.session.state,
            target
        );
        debug!(from = ?self.session.state, to = ?target, "Binding transition");

        self.session.state = target;
        self.session.updated_at = Some(Utc::now());
    }

    fn is_current(&self, attempt_id: Uuid) -> bool {
        self.session.attempt_id == Some(attempt_id)
    }

    fn discard(&self, reason: &str) -> Transition {
        let conflict = AppError::StateConflict(reason.to_string());
        warn!(
            state = ?self.session.state,
            error = %conflict,
            "Discarding wallet event"
        );
        Transition::Ignored
    }

    fn fail(&mut self, error: AppError) -> Transition {
        let descriptor = error.descriptor();
        warn!(
            state = ?self.session.state,
            kind = ?descriptor.kind,
            error = %error,
            "Wallet binding failed"
        );

        self.session.failed_from = Some(self.session.state);
        self.session.last_error = Some(descriptor.clone());
        self.session.pending_connect_result = false;
        self.session.pending_sign_result = false;
        self.transition(BindingState::Failed);

        Transition::Failed(descriptor)
    }

    /// Starts a new attempt and returns the connect link to hand to the wallet.
    pub fn request_connect(&mut self) -> Result<Url> {
        if self.session.is_pending() {
            return Err(AppError::StateConflict(
                "a wallet round trip is already pending".into(),
            ));
        }
        if self.session.state != BindingState::Idle {
            return Err(AppError::StateConflict(format!(
                "cannot start binding while {:?}",
                self.session.state
            )));
        }

        let link = self.links.connect_link()?;

        self.session = BindingSession::begin();
        self.session.pending_connect_result = true;
        self.transition(BindingState::ConnectRequested);
        info!(attempt = ?self.session.attempt_id, "Wallet connect requested");

        Ok(link)
    }

    pub fn handle_link(&mut self, event: &DeepLinkEvent) -> Transition {
        match event.kind {
            LinkKind::WalletConnectCallback => self.on_connect_callback(event),
            LinkKind::WalletSignCallback => self.on_sign_callback(event),
            LinkKind::Unrecognized => Transition::Ignored,
        }
    }

    fn on_connect_callback(&mut self, event: &DeepLinkEvent) -> Transition {
        match self.session.state {
            BindingState::ConnectRequested => {}
            BindingState::Idle => {
                if self.session.abandoned_attempt.is_some() {
                    return self.discard("connect callback for an abandoned attempt");
                }
                if event.failure().is_some() || event.wallet_address().is_none() {
                    return self.discard("connect callback without a pending request");
                }
                info!("Accepting connect callback with no pending request");
                self.session = BindingSession::begin();
            }
            BindingState::Failed => {
                return self.discard("connect callback after the attempt failed");
            }
            _ => {
                if event.wallet_address() != self.session.wallet_address.as_deref() {
                    return self.discard("connect callback for a different wallet");
                }
                debug!("Duplicate connect callback");
                return Transition::Ignored;
            }
        }

        if let Some(failure) = event.failure() {
            return self.fail(AppError::wallet(failure.code, failure.message));
        }

        let Some(address) = event.wallet_address() else {
            return self.fail(missing_field(event, "Wallet did not return a public key"));
        };

        if self.verify_signature
            && let Err(error) = validate_wallet_address(address)
        {
            return self.fail(error);
        }

        self.session.wallet_address = Some(address.to_string());
        self.session.wallet_session = event.session().map(str::to_string);
        self.session.pending_connect_result = false;
        self.transition(BindingState::Connected);
        info!(wallet = %address, "Wallet connected");

        self.nonce_step()
    }

    fn nonce_step(&self) -> Transition {
        match (self.session.attempt_id, &self.session.wallet_address) {
            (Some(attempt_id), Some(wallet_address)) => Transition::RequestNonce {
                attempt_id,
                wallet_address: wallet_address.clone(),
            },
            _ => Transition::Ignored,
        }
    }

    fn on_sign_callback(&mut self, event: &DeepLinkEvent) -> Transition {
        if self.session.state != BindingState::SigningRequested {
            return self.discard("signature callback with no signature requested");
        }

        let Some(expected) = self.session.nonce.as_deref() else {
            return self.discard("signature callback with no nonce in flight");
        };

        if event.bind_nonce() != Some(expected) {
            warn!(
                expected = %expected,
                received = ?event.bind_nonce(),
                "Signature callback nonce mismatch"
            );
            return self.discard("signature callback for a stale nonce");
        }

        if let Some(failure) = event.failure() {
            return self.fail(AppError::wallet(failure.code, failure.message));
        }

        let Some(signature) = event.signature() else {
            return self.fail(missing_field(event, "Wallet did not return a signature"));
        };

        let (Some(attempt_id), Some(wallet_address), Some(nonce), Some(message)) = (
            self.session.attempt_id,
            self.session.wallet_address.clone(),
            self.session.nonce.clone(),
            self.session.challenge_message.as_deref(),
        ) else {
            return self.discard("signature callback for an incomplete session");
        };

        if self.verify_signature
            && let Err(error) = verify_signature(&wallet_address, message, signature)
        {
            return self.fail(error);
        }

        if let Some(session) = event.session() {
            self.session.wallet_session = Some(session.to_string());
        }
        self.session.signature = Some(signature.to_string());
        self.session.pending_sign_result = false;
        self.transition(BindingState::Signed);
        info!(wallet = %wallet_address, "Challenge signed");

        Transition::ExchangeToken {
            attempt_id,
            wallet_address,
            nonce,
            signature: signature.to_string(),
        }
    }

    /// Connected -> NonceRequested for the given attempt.
    pub fn begin_nonce_request(&mut self, attempt_id: Uuid) -> Result<()> {
        if !self.is_current(attempt_id) || self.session.state != BindingState::Connected {
            return Err(AppError::StateConflict(
                "nonce request for an attempt that is not connected".into(),
            ));
        }

        self.transition(BindingState::NonceRequested);
        Ok(())
    }

    pub fn on_challenge(&mut self, attempt_id: Uuid, challenge: ChallengeTemplate) -> Transition {
        if !self.is_current(attempt_id) || self.session.state != BindingState::NonceRequested {
            return self.discard("challenge for an attempt that no longer waits for one");
        }

        if self.spent_nonces.contains(&challenge.nonce) {
            return self.fail(AppError::Server {
                status: 200,
                code: Some("nonce_reused".into()),
                message: "Backend issued a nonce that was already used".into(),
            });
        }

        let Some(wallet_address) = self.session.wallet_address.clone() else {
            return self.discard("challenge without a connected wallet");
        };

        let message = match challenge.challenge_message(&wallet_address) {
            Ok(message) => message,
            Err(error) => return self.fail(error),
        };

        let link = match self.links.sign_link(
            &message,
            &challenge.nonce,
            self.session.wallet_session.as_deref(),
        ) {
            Ok(link) => link,
            Err(error) => return self.fail(error),
        };

        if self.spent_nonces.len() == SPENT_NONCE_MEMORY {
            self.spent_nonces.pop_front();
        }
        self.spent_nonces.push_back(challenge.nonce.clone());

        self.session.nonce = Some(challenge.nonce);
        self.session.challenge_message = Some(message);
        self.session.signature = None;
        self.session.pending_sign_result = true;
        self.transition(BindingState::SigningRequested);
        info!(wallet = %wallet_address, "Signature requested");

        Transition::Launch {
            attempt_id,
            request: WalletRequest::Sign,
            link,
        }
    }

    /// Signed -> ExchangingToken for the given attempt.
    pub fn begin_exchange(&mut self, attempt_id: Uuid) -> Result<()> {
        if !self.is_current(attempt_id) || self.session.state != BindingState::Signed {
            return Err(AppError::StateConflict(
                "token exchange for an attempt that is not signed".into(),
            ));
        }

        self.transition(BindingState::ExchangingToken);
        Ok(())
    }

    pub fn on_exchange_result(&mut self, attempt_id: Uuid, result: Result<Token>) -> Transition {
        if !self.is_current(attempt_id) || self.session.state != BindingState::ExchangingToken {
            return self.discard("token exchange result for an abandoned attempt");
        }

        match result {
            Ok(token) => {
                self.session.last_error = None;
                self.transition(BindingState::Bound);
                info!(
                    wallet = ?self.session.wallet_address,
                    user_id = ?token.user_id,
                    "Wallet bound"
                );
                Transition::Bound(token)
            }
            Err(error) => self.fail(error),
        }
    }

    /// Fails the attempt unless it already moved on.
    pub fn abort(&mut self, attempt_id: Uuid, error: AppError) -> Transition {
        if !self.is_current(attempt_id)
            || self.session.state.is_terminal()
            || self.session.state == BindingState::Idle
        {
            return self.discard("failure for an attempt that is no longer active");
        }

        self.fail(error)
    }

    pub fn on_timeout(&mut self, attempt_id: Uuid, request: WalletRequest) -> Transition {
        let still_waiting = match request {
            WalletRequest::Connect => self.session.pending_connect_result,
            WalletRequest::Sign => self.session.pending_sign_result,
        };

        if !self.is_current(attempt_id) || !still_waiting {
            return Transition::Ignored;
        }

        let waited = self
            .session
            .updated_at
            .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
            .unwrap_or_default();
        self.fail(AppError::Timeout { waited })
    }

    /// Back to Idle, remembering the attempt so late callbacks for it are
    /// refused until the next `request_connect`.
    fn abandon(&mut self) {
        let abandoned_attempt = self.session.attempt_id.or(self.session.abandoned_attempt);
        self.session = BindingSession {
            abandoned_attempt,
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
    }

    /// Abandons whatever is in flight. A sign callback that still arrives for
    /// it fails the nonce check; a connect callback hits the abandoned marker.
    pub fn cancel(&mut self) -> bool {
        if self.session.state == BindingState::Idle {
            return false;
        }

        info!(state = ?self.session.state, "Binding attempt cancelled");
        self.abandon();
        true
    }

    /// Failed -> Idle. The next bind starts over with a new nonce.
    pub fn retry(&mut self) -> Result<()> {
        if self.session.state != BindingState::Failed {
            return Err(AppError::StateConflict(format!(
                "nothing to retry while {:?}",
                self.session.state
            )));
        }

        self.abandon();
        Ok(())
    }

    /// Failed (at the nonce step) -> Connected, keeping the wallet.
    pub fn retry_nonce(&mut self) -> Result<Transition> {
        if self.session.state != BindingState::Failed
            || self.session.failed_from != Some(BindingState::NonceRequested)
            || self.session.wallet_address.is_none()
        {
            return Err(AppError::StateConflict(
                "nonce retry is only possible after a failed nonce request".into(),
            ));
        }

        self.session.last_error = None;
        self.session.failed_from = None;
        self.transition(BindingState::Connected);
        Ok(self.nonce_step())
    }

    /// Sign-out: drops the session entirely.
    pub fn reset(&mut self) {
        self.session = BindingSession::default();
    }

    /// Picks up a restored session whose network step was interrupted by the
    /// process going away.
    pub fn resume(&mut self) -> Transition {
        match self.session.state {
            BindingState::Connected => self.nonce_step(),
            BindingState::NonceRequested => {
                self.transition(BindingState::Connected);
                self.nonce_step()
            }
            BindingState::ExchangingToken | BindingState::Signed => {
                if self.session.state == BindingState::ExchangingToken {
                    self.transition(BindingState::Signed);
                }

                match (
                    self.session.attempt_id,
                    &self.session.wallet_address,
                    &self.session.nonce,
                    &self.session.signature,
                ) {
                    (Some(attempt_id), Some(wallet), Some(nonce), Some(signature)) => {
                        Transition::ExchangeToken {
                            attempt_id,
                            wallet_address: wallet.clone(),
                            nonce: nonce.clone(),
                            signature: signature.clone(),
                        }
                    }
                    _ => self.fail(AppError::Parse("restored session is incomplete".into())),
                }
            }
            _ => Transition::Ignored,
        }
    }
}

fn missing_field(event: &DeepLinkEvent, message: &str) -> AppError {
    if event.is_encrypted() {
        return AppError::wallet(
            None,
            "Wallet sent an encrypted reply; only plaintext callbacks are supported",
        );
    }
    AppError::wallet(None, message)
}
