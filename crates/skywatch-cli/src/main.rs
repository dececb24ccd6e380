use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use skywatch_core::config::DEFAULT_URL;

mod commands;

use commands::SessionArgs;

const DEFAULT_LOG_FILTER: &str = "info,skywatch=debug";

#[derive(Parser)]
#[command(
    name = "skywatch",
    about = "Skywatch - live view of a service registry",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the registry and follow it.
    ///
    /// Type `all`, `registered` or `unregistered` to change the filter,
    /// `reconnect` to start over after giving up, `quit` to exit.
    Watch {
        #[command(flatten)]
        session: SessionArgs,
        /// Print every change event to stdout as a JSON line.
        #[arg(long)]
        json: bool,
    },
    /// Inspect or generate configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a skywatch.toml with every default spelled out
    Init {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Print the settings a watch session would run with
    Show {
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Commands::Watch { session, json } => {
            let settings = session.resolve()?;
            commands::watch::watch(settings, json).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { url } => commands::config::init(&url),
            ConfigAction::Show { session } => commands::config::show(&session.resolve()?),
        },
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_FILTER)?,
    };

    // Logs go to stderr so `watch --json` output stays machine readable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
