//! fbns-push CLI - keeps a push session open and prints direct messages.
//!
//! This is the main binary entry point. See the `fbns_push` library for
//! the core functionality.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use fbns_push::{
    Config, ConnectionData, ConnectionStore, HandoffCoordinator, PushSession, ReqwestApi,
    SessionDeps, SupervisedHost, TlsConnector,
};
use mimalloc::MiMalloc;
use tokio::sync::broadcast::error::RecvError;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "fbns-push")]
#[command(version)]
#[command(about = "Persistent push-notification client for the FBNS broker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print direct-message notifications until interrupted
    Listen {
        /// Hand the socket off after this many seconds, then resume on it
        #[arg(long)]
        suspend_after: Option<u64>,
    },
    /// Show the stored connection record
    Status,
    /// Forget the stored token and broker credentials
    Reset,
    /// Print the effective configuration
    Config,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("FBNS_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

/// Load the stored connection record, or start a new one for `config`'s device.
fn load_connection_data(config: &mut Config, store: &dyn ConnectionStore) -> Result<ConnectionData> {
    let (device, generated) = config.ensure_device();
    if generated {
        log::info!("Generated new device {}", device.uuid);
        config.save()?;
    }
    Ok(store
        .load()?
        .unwrap_or_else(|| ConnectionData::new(&device, Utc::now())))
}

async fn run_listen(suspend_after: Option<u64>) -> Result<()> {
    let mut config = Config::load()?;
    let store = Arc::new(config.connection_store()?);
    let data = load_connection_data(&mut config, store.as_ref())?;
    let (device, _) = config.ensure_device();

    let user_agent = if data.user_agent.is_empty() {
        device.user_agent()
    } else {
        data.user_agent.clone()
    };
    let api = ReqwestApi::new(&user_agent, config.account_session())?;
    let host = SupervisedHost::default();
    let deps = SessionDeps {
        api: Arc::new(api),
        connector: Arc::new(TlsConnector::new()?),
        handoff: HandoffCoordinator::new(Arc::new(host.clone())),
        store,
    };
    let session = PushSession::new(config.session_config(), &device, data, deps);

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(message) => {
                    let n = &message.notification;
                    println!("[{}] {}", n.source_user_id, n.message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Dropped {skipped} notifications");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    session.start().await?;
    println!("Listening for direct messages. Press Ctrl-C to stop.");

    if let Some(secs) = suspend_after {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(secs)) => {
                println!("Suspending: handing the socket off");
                session.transfer_push_socket(true).await;
                println!("Resuming ({} parked)", host.parked_count());
                session.start().await?;
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                session.shutdown().await;
                printer.abort();
                return Ok(());
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");
    session.shutdown().await;
    printer.abort();
    Ok(())
}

fn show_status() -> Result<()> {
    let config = Config::load()?;
    let store = config.connection_store()?;
    match store.load()? {
        Some(data) => {
            let now = Utc::now();
            println!("Device:     {}", data.device_id);
            println!("Client id:  {}", data.client_id);
            println!("User agent: {}", data.user_agent);
            if data.has_token() {
                println!(
                    "Push token: registered {}h ago",
                    data.token_age(now).num_hours()
                );
            } else {
                println!("Push token: none");
            }
            println!(
                "Broker credentials: {}",
                if data.auth_blob.is_empty() { "none" } else { "stored" }
            );
        }
        None => println!("No connection record at {}", store.path().display()),
    }
    Ok(())
}

fn reset() -> Result<()> {
    let config = Config::load()?;
    let store = config.connection_store()?;
    if let Some(mut data) = store.load()? {
        data.reset(Utc::now());
        store.save(&data)?;
        println!("Connection record reset");
    } else {
        println!("Nothing to reset");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Listen { suspend_after } => run_listen(suspend_after).await?,
        Commands::Status => show_status()?,
        Commands::Reset => reset()?,
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
