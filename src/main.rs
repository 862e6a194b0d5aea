use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tunnel_pilot::config::default_settings_path;
use tunnel_pilot::{ConnectionController, OperationResult, Settings};

#[derive(Parser)]
#[command(name = "tunnel-pilot")]
#[command(about = "WireGuard tunnel lifecycle manager")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Tunnel(TunnelCommand),
    /// Generate default settings file
    Init,
}

#[derive(Subcommand)]
enum TunnelCommand {
    /// Bring the tunnel up and wait for a handshake
    Connect,
    /// Take the tunnel down
    Disconnect,
    /// Take the tunnel down and up again
    Reconnect,
    /// Show the public IP as seen from outside
    Status,
    /// Print raw runtime statistics from the status tool
    State,
    /// Rewrite the peer endpoint in the tunnel config
    Endpoint {
        /// New endpoint as host:port
        endpoint: String,

        /// Reconnect after updating so the change takes effect
        #[arg(long)]
        reconnect: bool,
    },
    /// Manage the outbound firewall killswitch
    Killswitch {
        #[arg(value_enum)]
        action: KillswitchAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KillswitchAction {
    On,
    Off,
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON result
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match cli.command {
        Commands::Init => return report(init(cli.config)?),
        Commands::Tunnel(command) => command,
    };

    let settings = Settings::load_or_default(cli.config.as_deref())?;
    let controller = ConnectionController::from_settings(&settings)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || on_interrupt.cancel()) {
        warn!("Could not install Ctrl+C handler: {}", e);
    }

    let result = match command {
        TunnelCommand::Connect => controller.connect_with_cancel(&cancel).await,
        TunnelCommand::Disconnect => controller.disconnect_with_cancel(&cancel).await,
        TunnelCommand::Reconnect => controller.reconnect_with_cancel(&cancel).await,
        TunnelCommand::Status => controller.status_with_cancel(&cancel).await,
        TunnelCommand::State => controller.raw_state().await,
        TunnelCommand::Endpoint {
            endpoint,
            reconnect,
        } => {
            let updated = controller.set_endpoint(&endpoint).await;
            if updated.ok && reconnect {
                debug!("Endpoint updated, reconnecting");
                controller.reconnect_with_cancel(&cancel).await
            } else {
                updated
            }
        }
        TunnelCommand::Killswitch { action } => match action {
            KillswitchAction::On => controller.set_killswitch(true).await,
            KillswitchAction::Off => controller.set_killswitch(false).await,
            KillswitchAction::Status => controller.killswitch_state().await,
        },
    };

    report(result)
}

/// Write default settings unless a file is already there.
fn init(path: Option<PathBuf>) -> Result<OperationResult, Box<dyn std::error::Error>> {
    let path = path.unwrap_or_else(default_settings_path);
    if path.exists() {
        warn!("Settings already exist at {}", path.display());
        return Ok(OperationResult::success(format!(
            "settings already exist: {}",
            path.display()
        )));
    }

    info!("Generating default settings...");
    Settings::default().save(&path)?;
    Ok(OperationResult::success(format!(
        "created default settings: {}",
        path.display()
    )))
}

fn report(result: OperationResult) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.ok {
        std::process::exit(1);
    }
    Ok(())
}
