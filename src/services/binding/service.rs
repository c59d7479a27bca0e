use std::{pin::pin, sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    deeplink::{
        gateway::DeepLinkGateway,
        outbound::WalletLauncher,
        types::{DeepLinkEvent, LinkKind, LinkOrigin},
    },
    error::{ErrorDescriptor, Result},
    services::{
        auth::{AuthBackend, Token},
        binding::{
            machine::{BindingMachine, Transition},
            session::{BindingSession, BindingState, WalletRequest},
            store::{SessionStore, TokenSink},
        },
    },
};

const NOTICE_BUFFER_SIZE: usize = 16;

/// Outcome notifications for the navigation layer.
#[derive(Debug, Clone)]
pub enum BindingNotice {
    Bound(Token),
    Failed(ErrorDescriptor),
}

/// Owns the binding session and carries out the side effects its transitions
/// ask for: launching the wallet, calling the backend, persisting, notifying.
pub struct BindingService<B> {
    machine: Arc<Mutex<BindingMachine>>,
    backend: Arc<B>,
    launcher: Arc<dyn WalletLauncher>,
    store: Arc<SessionStore>,
    tokens: Arc<dyn TokenSink>,
    notices: broadcast::Sender<BindingNotice>,
    callback_timeout: Option<Duration>,
}

impl<B> Clone for BindingService<B> {
    fn clone(&self) -> Self {
        Self {
            machine: self.machine.clone(),
            backend: self.backend.clone(),
            launcher: self.launcher.clone(),
            store: self.store.clone(),
            tokens: self.tokens.clone(),
            notices: self.notices.clone(),
            callback_timeout: self.callback_timeout,
        }
    }
}

impl<B: AuthBackend + 'static> BindingService<B> {
    pub fn new(
        machine: BindingMachine,
        backend: B,
        launcher: Arc<dyn WalletLauncher>,
        store: SessionStore,
        tokens: Arc<dyn TokenSink>,
        callback_timeout: Option<Duration>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BUFFER_SIZE);

        Self {
            machine: Arc::new(Mutex::new(machine)),
            backend: Arc::new(backend),
            launcher,
            store: Arc::new(store),
            tokens,
            notices,
            callback_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BindingNotice> {
        self.notices.subscribe()
    }

    pub async fn has_pending_connect_result(&self) -> bool {
        self.machine.lock().await.has_pending_connect_result()
    }

    pub async fn has_pending_sign_result(&self) -> bool {
        self.machine.lock().await.has_pending_sign_result()
    }

    pub async fn is_connected(&self) -> bool {
        self.machine.lock().await.is_connected()
    }

    pub async fn state(&self) -> BindingState {
        self.machine.lock().await.state()
    }

    pub async fn session(&self) -> BindingSession {
        self.machine.lock().await.session().clone()
    }

    async fn persist(&self, machine: &BindingMachine) {
        if let Err(error) = self.store.save(machine.session()).await {
            warn!(error = %error, "Failed to persist binding session");
        }
    }

    /// "Bind wallet" user action.
    pub async fn bind_wallet(&self) -> Result<()> {
        let transition = {
            let mut machine = self.machine.lock().await;
            let link = machine.request_connect()?;
            self.persist(&machine).await;

            match machine.session().attempt_id() {
                Some(attempt_id) => Transition::Launch {
                    attempt_id,
                    request: WalletRequest::Connect,
                    link,
                },
                None => Transition::Ignored,
            }
        };

        self.drive(transition).await;
        Ok(())
    }

    pub async fn handle_uri(&self, uri: &str, origin: LinkOrigin) {
        self.handle_event(DeepLinkEvent::classify(uri, origin)).await;
    }

    pub async fn handle_event(&self, event: DeepLinkEvent) {
        if event.kind == LinkKind::Unrecognized {
            debug!("Ignoring unrecognized deep link");
            return;
        }

        let transition = {
            let mut machine = self.machine.lock().await;
            let transition = machine.handle_link(&event);
            if transition != Transition::Ignored {
                self.persist(&machine).await;
            }
            transition
        };

        self.drive(transition).await;
    }

    /// User abandoned the pending attempt.
    pub async fn cancel(&self) -> bool {
        let mut machine = self.machine.lock().await;
        let cancelled = machine.cancel();
        self.persist(&machine).await;
        cancelled
    }

    /// Failed -> Idle, then a brand-new bind.
    pub async fn retry(&self) -> Result<()> {
        {
            let mut machine = self.machine.lock().await;
            machine.retry()?;
            self.persist(&machine).await;
        }

        self.bind_wallet().await
    }

    /// Asks for a fresh nonce after a failed nonce request, keeping the wallet.
    pub async fn retry_nonce(&self) -> Result<()> {
        let transition = {
            let mut machine = self.machine.lock().await;
            let transition = machine.retry_nonce()?;
            self.persist(&machine).await;
            transition
        };

        self.drive(transition).await;
        Ok(())
    }

    /// Sign-out: forget the session and its snapshot.
    pub async fn sign_out(&self) {
        let mut machine = self.machine.lock().await;
        machine.reset();

        if let Err(error) = self.store.clear().await {
            warn!(error = %error, "Failed to clear binding session snapshot");
        }
    }

    /// Re-arms timers and re-issues an interrupted network step for a session
    /// restored from disk.
    pub async fn resume(&self) {
        let transition = {
            let mut machine = self.machine.lock().await;

            if let Some(attempt_id) = machine.session().attempt_id() {
                if machine.has_pending_connect_result() {
                    self.schedule_timeout(attempt_id, WalletRequest::Connect);
                }
                if machine.has_pending_sign_result() {
                    self.schedule_timeout(attempt_id, WalletRequest::Sign);
                }
            }

            let transition = machine.resume();
            if transition != Transition::Ignored {
                self.persist(&machine).await;
            }
            transition
        };

        self.drive(transition).await;
    }

    /// Feeds every gateway event into the session until the link stream ends.
    pub async fn run(&self, gateway: DeepLinkGateway, cold_start_grace: Duration) {
        let mut events = pin!(gateway.events(cold_start_grace));

        while let Some(event) = events.next().await {
            self.handle_event(event).await;
        }

        debug!("Deep link stream closed");
    }

    fn schedule_timeout(&self, attempt_id: Uuid, request: WalletRequest) {
        let Some(timeout) = self.callback_timeout else {
            return;
        };

        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let transition = {
                let mut machine = service.machine.lock().await;
                let transition = machine.on_timeout(attempt_id, request);
                if transition != Transition::Ignored {
                    service.persist(&machine).await;
                }
                transition
            };

            service.drive(transition).await;
        });
    }

    async fn drive(&self, mut transition: Transition) {
        loop {
            transition = match transition {
                Transition::Ignored => return,

                Transition::Launch {
                    attempt_id,
                    request,
                    link,
                } => match self.launcher.open(&link) {
                    Ok(()) => {
                        self.schedule_timeout(attempt_id, request);
                        return;
                    }
                    Err(error) => {
                        let mut machine = self.machine.lock().await;
                        let transition = machine.abort(attempt_id, error);
                        self.persist(&machine).await;
                        transition
                    }
                },

                Transition::RequestNonce {
                    attempt_id,
                    wallet_address,
                } => {
                    {
                        let mut machine = self.machine.lock().await;
                        if let Err(error) = machine.begin_nonce_request(attempt_id) {
                            debug!(error = %error, "Skipping nonce request");
                            return;
                        }
                        self.persist(&machine).await;
                    }

                    let result = self.backend.request_nonce(&wallet_address).await;

                    let mut machine = self.machine.lock().await;
                    let transition = match result {
                        Ok(challenge) => machine.on_challenge(attempt_id, challenge),
                        Err(error) => machine.abort(attempt_id, error),
                    };
                    self.persist(&machine).await;
                    transition
                }

                Transition::ExchangeToken {
                    attempt_id,
                    wallet_address,
                    nonce,
                    signature,
                } => {
                    {
                        let mut machine = self.machine.lock().await;
                        if let Err(error) = machine.begin_exchange(attempt_id) {
                            debug!(error = %error, "Skipping token exchange");
                            return;
                        }
                        self.persist(&machine).await;
                    }

                    let result = self
                        .backend
                        .exchange_signature(&wallet_address, &nonce, &signature)
                        .await;

                    let mut machine = self.machine.lock().await;
                    let transition = machine.on_exchange_result(attempt_id, result);
                    self.persist(&machine).await;
                    transition
                }

                Transition::Bound(token) => {
                    if let Err(error) = self.tokens.store(&token) {
                        error!(error = %error, "Failed to store credentials");
                    }
                    let _ = self.notices.send(BindingNotice::Bound(token));
                    return;
                }

                Transition::Failed(descriptor) => {
                    let _ = self.notices.send(BindingNotice::Failed(descriptor));
                    return;
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use url::Url;

    use super::*;
    use crate::{
        config::WalletConfig,
        deeplink::outbound::WalletLinks,
        error::{AppError, ErrorKind},
        services::auth::ChallengeTemplate,
    };

    #[derive(Default)]
    struct FakeBackend {
        nonce_calls: StdMutex<Vec<String>>,
        exchange_calls: StdMutex<Vec<(String, String, String)>>,
        fail_nonce: bool,
    }

    impl AuthBackend for FakeBackend {
        async fn request_nonce(&self, wallet_address: &str) -> Result<ChallengeTemplate> {
            self.nonce_calls
                .lock()
                .unwrap()
                .push(wallet_address.to_string());

            if self.fail_nonce {
                return Err(AppError::Server {
                    status: 503,
                    code: None,
                    message: "unavailable".into(),
                });
            }

            Ok(serde_json::from_value(serde_json::json!({
                "nonce": "N1",
                "messageTemplate": "Bind {walletAddress}/{nonce}"
            }))?)
        }

        async fn exchange_signature(
            &self,
            wallet_address: &str,
            nonce: &str,
            signature: &str,
        ) -> Result<Token> {
            self.exchange_calls.lock().unwrap().push((
                wallet_address.to_string(),
                nonce.to_string(),
                signature.to_string(),
            ));
            Token::parse(r#"{"access_token":"A","refresh_token":"B","expires_in":3600}"#)
        }
    }

    #[derive(Default)]
    struct RecordingLauncher {
        opened: StdMutex<Vec<Url>>,
    }

    impl WalletLauncher for RecordingLauncher {
        fn open(&self, link: &Url) -> Result<()> {
            self.opened.lock().unwrap().push(link.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        stored: StdMutex<Vec<Token>>,
    }

    impl TokenSink for RecordingSink {
        fn store(&self, token: &Token) -> Result<()> {
            self.stored.lock().unwrap().push(token.clone());
            Ok(())
        }
    }

    struct Harness {
        service: BindingService<FakeBackend>,
        launcher: Arc<RecordingLauncher>,
        sink: Arc<RecordingSink>,
    }

    fn harness(backend: FakeBackend, callback_timeout: Option<Duration>) -> Harness {
        let links = WalletLinks::new(&WalletConfig {
            base_url: "https://wallet.example.com/ul/v1".into(),
            app_url: "https://game.example.com".into(),
            redirect_scheme: "pixelgame".into(),
            cluster: "mainnet-beta".into(),
            verify_signature: false,
        })
        .unwrap();

        let launcher = Arc::new(RecordingLauncher::default());
        let sink = Arc::new(RecordingSink::default());

        let service = BindingService::new(
            BindingMachine::new(links, false),
            backend,
            launcher.clone(),
            SessionStore::ephemeral(),
            sink.clone(),
            callback_timeout,
        );

        Harness {
            service,
            launcher,
            sink,
        }
    }

    fn redirect_of(link: &Url) -> String {
        link.query_pairs()
            .find(|(k, _)| k == "redirect_link")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn full_flow_binds_and_stores_token_once() {
        let h = harness(FakeBackend::default(), None);
        let mut notices = h.service.subscribe();

        h.service.bind_wallet().await.unwrap();
        assert!(h.service.has_pending_connect_result().await);

        h.service
            .handle_uri("pixelgame://onconnect?public_key=W1", LinkOrigin::Live)
            .await;

        assert_eq!(h.service.state().await, BindingState::SigningRequested);
        let session = h.service.session().await;
        assert_eq!(session.challenge_message(), Some("Bind W1/N1"));
        assert!(h.service.has_pending_sign_result().await);

        let sign_link = h.launcher.opened.lock().unwrap()[1].clone();
        let callback = format!("{}&signature=SIG1", redirect_of(&sign_link));
        h.service.handle_uri(&callback, LinkOrigin::Live).await;

        assert_eq!(h.service.state().await, BindingState::Bound);
        match notices.recv().await.unwrap() {
            BindingNotice::Bound(token) => assert_eq!(token.access_token, "A"),
            other => panic!("unexpected notice: {other:?}"),
        }

        // a duplicate callback must not trigger a second exchange
        h.service.handle_uri(&callback, LinkOrigin::Live).await;
        assert_eq!(h.sink.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_bind_is_rejected_and_launches_nothing() {
        let h = harness(FakeBackend::default(), None);

        h.service.bind_wallet().await.unwrap();
        let second = h.service.bind_wallet().await;

        assert!(matches!(second, Err(AppError::StateConflict(_))));
        assert_eq!(h.launcher.opened.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn nonce_failure_is_reported_and_not_retried() {
        let backend = FakeBackend {
            fail_nonce: true,
            ..Default::default()
        };
        let h = harness(backend, None);
        let mut notices = h.service.subscribe();

        h.service.bind_wallet().await.unwrap();
        h.service
            .handle_uri("pixelgame://onconnect?public_key=W1", LinkOrigin::Live)
            .await;

        assert_eq!(h.service.state().await, BindingState::Failed);
        assert!(matches!(
            notices.recv().await.unwrap(),
            BindingNotice::Failed(ref d) if d.kind == ErrorKind::Server
        ));
        assert_eq!(h.service.backend.nonce_calls.lock().unwrap().len(), 1);

        h.service.retry_nonce().await.unwrap();
        assert_eq!(h.service.backend.nonce_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_connect_times_out() {
        let h = harness(FakeBackend::default(), Some(Duration::from_secs(60)));
        let mut notices = h.service.subscribe();

        h.service.bind_wallet().await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(matches!(
            notices.recv().await.unwrap(),
            BindingNotice::Failed(ref d) if d.kind == ErrorKind::Timeout
        ));
        assert_eq!(h.service.state().await, BindingState::Failed);
        assert!(!h.service.has_pending_connect_result().await);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_after_callback_is_ignored() {
        let h = harness(FakeBackend::default(), Some(Duration::from_secs(60)));

        h.service.bind_wallet().await.unwrap();
        h.service
            .handle_uri("pixelgame://onconnect?public_key=W1", LinkOrigin::Live)
            .await;
        h.service.cancel().await;
        tokio::time::sleep(Duration::from_secs(121)).await;

        assert_eq!(h.service.state().await, BindingState::Idle);
    }

    #[tokio::test]
    async fn run_consumes_gateway_links() {
        let h = harness(FakeBackend::default(), None);
        h.service.bind_wallet().await.unwrap();

        let (gateway, handle) =
            DeepLinkGateway::new(Some("pixelgame://onconnect?public_key=W1".into()));
        handle.mark_ui_ready();
        handle.deliver("pixelgame://leaderboard");
        drop(handle);

        h.service.run(gateway, Duration::from_millis(10)).await;

        assert_eq!(h.service.state().await, BindingState::SigningRequested);
        assert!(h.service.is_connected().await);
    }
}
