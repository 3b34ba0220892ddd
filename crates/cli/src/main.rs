mod message_commands;
mod run_command;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    courier_config::CourierConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "courier", about = "Courier: multi-channel message dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Message store URL (overrides config value). `memory` keeps nothing.
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery scheduler until interrupted (default).
    Run(run_command::RunArgs),
    /// Show every channel with its configuration state and capabilities.
    Channels {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Send a message right away.
    Send(message_commands::SendArgs),
    /// Store a message for delivery at a later time.
    Schedule(message_commands::ScheduleArgs),
    /// Cancel a scheduled message.
    Cancel {
        /// Message id returned by `schedule`.
        id: String,
    },
    /// List pending scheduled messages.
    List(message_commands::ListArgs),
    /// Apply a webhook payload (JSON) from a file or stdin.
    Ingest(message_commands::IngestArgs),
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output on stdout stays machine-readable.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CourierConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = courier_config::load_config(path)?;
            courier_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            config
        },
        None => courier_config::discover_and_load(),
    };
    if let Some(url) = &cli.database_url {
        config.storage.database_url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "courier starting");

    let config = load_config(&cli)?;

    match cli.command {
        None => run_command::run(config, run_command::RunArgs::default()).await,
        Some(Commands::Run(args)) => run_command::run(config, args).await,
        Some(Commands::Channels { json }) => message_commands::handle_channels(&config, json).await,
        Some(Commands::Send(args)) => message_commands::handle_send(&config, args).await,
        Some(Commands::Schedule(args)) => message_commands::handle_schedule(&config, args).await,
        Some(Commands::Cancel { id }) => message_commands::handle_cancel(&config, &id).await,
        Some(Commands::List(args)) => message_commands::handle_list(&config, args).await,
        Some(Commands::Ingest(args)) => message_commands::handle_ingest(&config, args).await,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn database_url_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "[storage]\ndatabase_url = \"sqlite://file.db\"\n").unwrap();

        let cli = Cli::parse_from([
            "courier",
            "--config",
            path.to_str().unwrap(),
            "--database-url",
            "memory",
            "channels",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.storage.database_url, "memory");
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::parse_from(["courier"]);
        assert!(cli.command.is_none());
    }
}
