use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use wallet_bind::{
    build_service,
    config::Config,
    deeplink::{DeepLinkGateway, SystemLauncher},
    error::Result,
    services::binding::BindingNotice,
    utils::runtime::{init_tracing, shutdown_signal},
};

/// Links a wallet to the game account. Deep links delivered while running are
/// read one per line from stdin.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// URI the process was launched with.
    #[arg(long, env = "WALLET_BIND_INITIAL_LINK")]
    initial_link: Option<String>,

    /// Start a new binding right away.
    #[arg(long)]
    bind: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_env()?;
    init_tracing(&config.logging)?;
    config.validate()?;
    tracing::info!(log_format = ?config.logging.format, "Configuration loaded");

    let service = build_service(&config, Arc::new(SystemLauncher)).await?;
    tracing::info!(
        pending_connect = service.has_pending_connect_result().await,
        pending_sign = service.has_pending_sign_result().await,
        connected = service.is_connected().await,
        "Binding service initialized"
    );

    let mut notices = service.subscribe();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                BindingNotice::Bound(token) => tracing::info!(
                    user_id = ?token.user_id,
                    wallet = ?token.wallet_address,
                    new_user = ?token.is_new_user,
                    expires_at = %token.expires_at(),
                    "Wallet bound"
                ),
                BindingNotice::Failed(reason) => tracing::warn!(
                    kind = ?reason.kind,
                    reason = %reason.message,
                    "Wallet binding failed"
                ),
            }
        }
    });

    let (gateway, handle) = DeepLinkGateway::new(args.initial_link);

    let stdin_handle = handle.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if !line.is_empty() && !stdin_handle.deliver(line) {
                break;
            }
        }
    });

    service.resume().await;
    handle.mark_ui_ready();

    if args.bind
        && let Err(error) = service.bind_wallet().await
    {
        tracing::warn!(reason = %error.user_message(), "Could not start binding");
    }

    tokio::select! {
        _ = service.run(gateway, config.binding.cold_start_grace) => {}
        _ = shutdown_signal() => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
