use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use dispatch::{
    router, AlertDispatcher, AppState, DispatchConfig, InMemoryContactStore,
    InMemoryRecordingStore, TwilioMessenger,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Emergency SOS dispatch service", long_about = None)]
struct Args {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Listen address (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Base URL for recording links sent to contacts (overrides PUBLIC_BASE_URL)
    #[arg(long)]
    public_base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = DispatchConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(base) = args.public_base_url {
        config.public_base_url = Some(base.trim_end_matches('/').to_string());
    }

    let contacts = InMemoryContactStore::new().shared();
    let recordings = InMemoryRecordingStore::with_capacity(config.max_recordings).shared();
    let mut dispatcher = AlertDispatcher::new(contacts.clone(), recordings.clone());

    match TwilioMessenger::from_config(config.twilio.clone()) {
        Some(messenger) => {
            info!(from = %config.twilio.from_number, "Messaging enabled");
            dispatcher = dispatcher.with_messenger(Arc::new(messenger));
        }
        None => warn!("Messaging disabled: missing or invalid credentials. SMS/calls will be skipped."),
    }
    match &config.public_base_url {
        Some(base) => dispatcher = dispatcher.with_public_base_url(base.clone()),
        None => warn!("PUBLIC_BASE_URL not set; alerts will not link recordings"),
    }

    let state = AppState::new(dispatcher, contacts, recordings, config.max_upload_bytes);
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Dispatch service listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
