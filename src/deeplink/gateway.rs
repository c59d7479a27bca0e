use std::{sync::Arc, time::Duration};

use futures::{Stream, StreamExt, future, stream};
use tokio::sync::{mpsc, watch};

use crate::{
    deeplink::types::{DeepLinkEvent, LinkOrigin},
    utils::security::mask_uri_params,
};

/// Platform-facing half of the gateway: the OS glue pushes live links here and
/// flips readiness once the UI tree exists.
#[derive(Clone)]
pub struct GatewayHandle {
    links: mpsc::UnboundedSender<String>,
    ready: Arc<watch::Sender<bool>>,
}

impl GatewayHandle {
    /// Returns false once the gateway has been dropped.
    pub fn deliver(&self, uri: impl Into<String>) -> bool {
        self.links.send(uri.into()).is_ok()
    }

    pub fn mark_ui_ready(&self) {
        self.ready.send_replace(true);
    }
}

/// Receives OS-delivered URIs: the cold-start link once, then a live stream
/// for the rest of the process lifetime.
pub struct DeepLinkGateway {
    initial: Option<String>,
    live: mpsc::UnboundedReceiver<String>,
    ready: watch::Receiver<bool>,
}

impl DeepLinkGateway {
    pub fn new(initial_link: Option<String>) -> (Self, GatewayHandle) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);

        let gateway = Self {
            initial: initial_link.filter(|link| !link.trim().is_empty()),
            live: links_rx,
            ready: ready_rx,
        };
        let handle = GatewayHandle {
            links: links_tx,
            ready: Arc::new(ready_tx),
        };

        (gateway, handle)
    }

    /// The link the process was launched with. Yields it at most once.
    pub fn initial_link(&mut self) -> Option<String> {
        self.initial.take()
    }

    /// Live links in OS delivery order. Ends only when every handle is dropped.
    pub fn link_stream(self) -> impl Stream<Item = String> {
        stream::unfold(self.live, |mut live| async move {
            live.recv().await.map(|uri| (uri, live))
        })
    }

    /// Classified events: the cold-start link (held until the UI reports ready,
    /// or `grace` elapses), followed by every live link.
    pub fn events(mut self, grace: Duration) -> impl Stream<Item = DeepLinkEvent> {
        let initial = self.initial_link();
        let mut ready = self.ready.clone();

        let cold_start = stream::once(async move {
            let uri = initial?;

            if tokio::time::timeout(grace, ready.wait_for(|ready| *ready))
                .await
                .is_err()
            {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "UI not ready for cold-start link, applying it anyway"
                );
            }

            tracing::info!(uri = %mask_uri_params(&uri), "Cold-start deep link");
            Some(DeepLinkEvent::classify(&uri, LinkOrigin::ColdStart))
        })
        .filter_map(future::ready);

        let live = self.link_stream().map(|uri| {
            tracing::debug!(uri = %mask_uri_params(&uri), "Live deep link");
            DeepLinkEvent::classify(&uri, LinkOrigin::Live)
        });

        cold_start.chain(live)
    }
}
