pub mod config;
pub mod deeplink;
pub mod error;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::{
    config::Config,
    deeplink::{WalletLauncher, WalletLinks},
    error::Result,
    services::{
        auth::BackendAuthClient,
        binding::{BindingMachine, BindingService, FileTokenSink, SessionStore},
    },
};

pub type WalletBindingService = BindingService<BackendAuthClient>;

/// Wires the binding service from configuration, restoring any session a
/// previous process left behind.
pub async fn build_service(
    config: &Config,
    launcher: Arc<dyn WalletLauncher>,
) -> Result<WalletBindingService> {
    let links = WalletLinks::new(&config.wallet)?;
    let store = SessionStore::at(&config.binding.session_path);

    let machine = match store.load().await {
        Ok(Some(session)) => {
            tracing::info!(
                state = ?session.state(),
                pending_connect = session.pending_connect_result(),
                pending_sign = session.pending_sign_result(),
                "Restored binding session"
            );
            BindingMachine::restore(links, config.wallet.verify_signature, session)
        }
        Ok(None) => BindingMachine::new(links, config.wallet.verify_signature),
        Err(error) => {
            tracing::warn!(error = %error, "Discarding unreadable binding session");
            BindingMachine::new(links, config.wallet.verify_signature)
        }
    };

    Ok(BindingService::new(
        machine,
        BackendAuthClient::new(&config.backend)?,
        launcher,
        store,
        Arc::new(FileTokenSink::new(&config.binding.credentials_path)),
        config.binding.callback_timeout,
    ))
}
