//! smartbin-bridge CLI - relays sensor telemetry from MQTT into MongoDB

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use smartbin_bridge::{Bridge, BridgeConfig, BridgeError};

#[derive(Parser)]
#[command(name = "smartbin-bridge")]
#[command(version, about = "Relay smart-bin telemetry from an MQTT topic into MongoDB", long_about = None)]
struct Cli {
    /// Path to the bridge configuration file
    #[arg(short, long, global = true, default_value = "bridge.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and relay messages until interrupted (default)
    Run(Overrides),

    /// Connect to the broker and the store once, report, and exit
    Check(Overrides),

    /// Print the effective configuration with credentials masked
    ShowConfig(Overrides),
}

#[derive(clap::Args, Default)]
struct Overrides {
    /// MQTT broker host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Topic filter to subscribe to
    #[arg(short, long)]
    topic: Option<String>,

    /// Full MongoDB connection string
    #[arg(long)]
    mongo_uri: Option<String>,

    /// Target collection
    #[arg(long)]
    collection: Option<String>,

    /// Enable the health server on this port
    #[arg(long)]
    health_port: Option<u16>,
}

impl Overrides {
    fn apply(self, config: &mut BridgeConfig) {
        if let Some(host) = self.mqtt_host {
            config.broker.host = host;
        }
        if let Some(port) = self.mqtt_port {
            config.broker.port = port;
        }
        if let Some(topic) = self.topic {
            config.broker.topic = topic;
        }
        if let Some(uri) = self.mongo_uri {
            config.store.uri = Some(uri);
        }
        if let Some(collection) = self.collection {
            config.store.collection = collection;
        }
        if let Some(port) = self.health_port {
            config.health.port = Some(port);
        }
    }
}

/// Resolve configuration with precedence: CLI > ENV > config file > defaults
fn load_config(path: &Path, overrides: Overrides) -> Result<BridgeConfig, BridgeError> {
    let mut config = BridgeConfig::load_or_default(path)?;
    config.apply_env()?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run(Overrides::default()));

    let result = match command {
        Commands::Run(overrides) => match load_config(&cli.config, overrides) {
            Ok(config) => run(config).await,
            Err(e) => Err(e),
        },
        Commands::Check(overrides) => match load_config(&cli.config, overrides) {
            Ok(config) => Bridge::new(config).check().await,
            Err(e) => Err(e),
        },
        Commands::ShowConfig(overrides) => load_config(&cli.config, overrides).and_then(|config| {
            let yaml = serde_yaml::to_string(&config.redacted())
                .map_err(|e| BridgeError::Config(e.to_string()))?;
            print!("{}", yaml);
            Ok(())
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown requested");
        signal_token.cancel();
    });

    Bridge::new(config).run(cancel).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
