use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::info;

use sos_client::{
    Capabilities, ClientConfig, CommandRecorder, ContactsClient, EscalationController,
    EscalationError, EscalationPolicy, HttpDispatcher, Notice, NoticeLevel, Phase,
    StaticLocation,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Trigger and manage emergency SOS alerts", long_about = None)]
struct Args {
    /// Dispatch service URL (overrides SOS_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send an SOS now and follow up automatically until Ctrl-C
    Sos {
        /// Latitude in decimal degrees (overrides SOS_LAT)
        #[arg(long, allow_hyphen_values = true, requires = "lng")]
        lat: Option<f64>,

        /// Longitude in decimal degrees (overrides SOS_LNG)
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lng: Option<f64>,

        /// Capture command that writes the clip to stdout (overrides SOS_RECORD_COMMAND)
        #[arg(long)]
        record_command: Option<String>,
    },

    /// Manage emergency contacts
    Contacts {
        #[command(subcommand)]
        action: ContactsAction,
    },
}

#[derive(Subcommand, Debug)]
enum ContactsAction {
    /// List saved contacts
    List,
    /// Add a contact
    Add { name: String, phone: String },
    /// Delete a contact by id
    Delete { id: String },
    /// Delete every contact
    Clear,
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
    let mut config = ClientConfig::from_env();
    if let Some(url) = args.api_url {
        config.api_url = url.trim_end_matches('/').to_string();
    }

    match args.command {
        Commands::Sos {
            lat,
            lng,
            record_command,
        } => {
            if let (Some(lat), Some(lng)) = (lat, lng) {
                config.location = Some(
                    sos_client::config::parse_coordinates(&lat.to_string(), &lng.to_string())
                        .context("Coordinates out of range")?,
                );
            }
            if let Some(command) = record_command {
                config.record_command = command;
            }
            run_sos(config).await
        }
        Commands::Contacts { action } => run_contacts(config, action).await,
    }
}

async fn run_sos(config: ClientConfig) -> Result<()> {
    let policy = EscalationPolicy::default();
    let recorder =
        CommandRecorder::new(&config.record_command).context("Invalid record command")?;
    let dispatcher = HttpDispatcher::new(&config.api_url, config.http_timeout)
        .context("Failed to build HTTP client")?;
    if config.location.is_none() {
        tracing::warn!("No location configured; set SOS_LAT/SOS_LNG or pass --lat/--lng");
    }
    let caps = Capabilities::new(
        Arc::new(recorder),
        Arc::new(StaticLocation::new(config.location)),
        Arc::new(dispatcher),
    );
    let controller = EscalationController::new(policy.clone(), caps);
    info!(api = %config.api_url, "SOS client starting");

    let mut notices = controller.subscribe_notices();
    let mut states = controller.subscribe_state();
    println!(
        "Recording {}s of audio for SOS #1. Press Ctrl-C to cancel.",
        policy.first_capture.as_secs()
    );

    let trigger = controller.trigger();
    tokio::pin!(trigger);
    let mut first_done = false;
    let mut failure = None;

    loop {
        tokio::select! {
            result = &mut trigger, if !first_done => {
                first_done = true;
                match result {
                    Ok(response) => {
                        if let Some(url) = &response.recording_url {
                            println!("Recording: {url}");
                        }
                    }
                    Err(EscalationError::Cancelled) => {}
                    Err(e) => failure = Some(e),
                }
                if !controller.state().is_active() {
                    break;
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => print_notice(&notice),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                match state.phase {
                    Phase::CountingDown if state.seconds_remaining % 30 == 0 || state.seconds_remaining <= 10 => {
                        println!(
                            "Next SOS #{} in {}:{:02}",
                            state.attempt_number + 1,
                            state.seconds_remaining / 60,
                            state.seconds_remaining % 60
                        );
                    }
                    Phase::AttemptInFlight if state.attempt_number > 1 => {
                        println!(
                            "Recording {}s of audio for SOS #{}",
                            policy.capture_window(state.attempt_number).as_secs(),
                            state.attempt_number
                        );
                    }
                    Phase::Idle | Phase::Completed if first_done => break,
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => controller.cancel(),
        }
    }

    // Notices sent alongside the final transition.
    loop {
        match notices.try_recv() {
            Ok(notice) => print_notice(&notice),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    match failure {
        Some(e) => Err(e).context("SOS failed"),
        None => Ok(()),
    }
}

fn print_notice(notice: &Notice) {
    match notice.level {
        NoticeLevel::Success => println!("✅ {}", notice.message),
        NoticeLevel::Error => eprintln!("❌ {}", notice.message),
        NoticeLevel::Info => println!("ℹ️  {}", notice.message),
    }
}

async fn run_contacts(config: ClientConfig, action: ContactsAction) -> Result<()> {
    let client = ContactsClient::new(&config.api_url, config.http_timeout)?;
    match action {
        ContactsAction::List => {
            let contacts = client.list().await?;
            if contacts.is_empty() {
                println!("No contacts saved.");
            }
            for contact in contacts {
                println!("{}  {}  {}", contact.id, contact.name, contact.phone);
            }
        }
        ContactsAction::Add { name, phone } => println!("{}", client.add(&name, &phone).await?),
        ContactsAction::Delete { id } => println!("{}", client.delete(&id).await?),
        ContactsAction::Clear => println!("{}", client.clear().await?),
    }
    Ok(())
}
