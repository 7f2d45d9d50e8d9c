mod channel_commands;
mod config_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    ladderbot_config::LadderbotConfig,
    ladderbot_gateway::Gateway,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "ladderbot", about = "ladderbot: chat bot channel and credential manager")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/ladderbot/).
    #[arg(long, global = true, env = "LADDERBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory holding the channel database.
    #[arg(long, global = true, env = "LADDERBOT_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to every registered channel (default when no subcommand is provided).
    Run,
    /// Channel registry management.
    Channels {
        #[command(subcommand)]
        action: channel_commands::ChannelAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<LadderbotConfig> {
    match path {
        Some(path) => ladderbot_config::load_config(path),
        None => Ok(ladderbot_config::discover_and_load()),
    }
}

async fn run(config: LadderbotConfig, data_dir: PathBuf) -> Result<()> {
    let gateway = Gateway::start(&config, &data_dir).await?;
    info!(
        channels = gateway.manager().registry().len(),
        "ladderbot running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    gateway.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config_path = cli.config;
    let data_dir = cli.data_dir.unwrap_or_else(ladderbot_config::data_dir);

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "ladderbot starting");
            let config = load_config(config_path.as_deref())?;
            run(config, data_dir).await
        },
        Some(Commands::Channels { action }) => {
            let config = load_config(config_path.as_deref())?;
            channel_commands::handle_channels(action, &config, &data_dir).await
        },
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, config_path.as_deref())
        },
    }
}
