//! Signal desk monitor - Entry Point
//!
//! `watch` (default): live-synchronized view, logged as changes arrive.
//! `list`, `confirm`, `skip`: one-shot commands against the signal server.

use anyhow::Result;
use clap::{Parser, Subcommand};
use sigdesk_api::ConfirmRequest;
use sigdesk_core::{MarginMode, SignalId};
use sigdesk_monitor::{AppConfig, AppError, Application};
use sigdesk_sync::ActionOutcome;
use tracing::{info, warn};

/// Signal desk monitor
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SIGDESK_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow signals live until interrupted
    Watch,
    /// Print the signals matching the configured filter
    List,
    /// Confirm a pending signal and place its order
    Confirm {
        id: u64,
        /// Leverage (defaults to the [confirm] section)
        #[arg(long)]
        leverage: Option<u32>,
        /// isolated or cross (defaults to the [confirm] section)
        #[arg(long)]
        margin_mode: Option<MarginMode>,
    },
    /// Skip a pending signal
    Skip { id: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    sigdesk_ws::init_crypto();

    let args = Args::parse();

    sigdesk_telemetry::init_logging()?;

    info!("Starting sigdesk monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref())?;
    info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        authenticated = config.credential.is_some(),
        "Configuration loaded"
    );

    let app = Application::new(config)?;

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => app.run().await?,
        Command::List => {
            for signal in app.list().await? {
                println!(
                    "{:>6}  {:<16} {:<4} {:<5} {}  entry={} stop={}  {}  {}",
                    signal.id,
                    signal.inst_id,
                    signal.bar,
                    signal.direction,
                    signal.strength,
                    signal.entry_price,
                    signal.stop_loss,
                    signal.status,
                    signal.created_at.to_rfc3339(),
                );
            }
        }
        Command::Confirm {
            id,
            leverage,
            margin_mode,
        } => {
            let defaults = app.config().confirm_request();
            let request = ConfirmRequest {
                leverage: leverage.unwrap_or(defaults.leverage),
                margin_mode: margin_mode.unwrap_or(defaults.margin_mode),
                flag: defaults.flag,
            };
            let outcome = app.confirm(SignalId::new(id), request).await?;
            report(SignalId::new(id), outcome)?;
        }
        Command::Skip { id } => {
            let outcome = app.skip(SignalId::new(id)).await?;
            report(SignalId::new(id), outcome)?;
        }
    }

    Ok(())
}

fn report(id: SignalId, outcome: ActionOutcome) -> Result<()> {
    match outcome {
        ActionOutcome::Applied(ack) => {
            match ack.execution_error() {
                Some(error) => warn!(%id, error, "Signal confirmed but the order failed"),
                None => info!(%id, "Done"),
            }
            Ok(())
        }
        ActionOutcome::Ignored(reason) => {
            Err(AppError::NotActionable(id, reason.to_string()).into())
        }
    }
}
