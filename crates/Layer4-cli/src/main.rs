//! dccbot CLI - Main entry point

mod convert;
mod init;
mod quota;
mod status;

use clap::{Parser, Subcommand};
use dcc_foundation::BotConfig;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// dccbot - APK to native-code conversion service
#[derive(Parser, Debug)]
#[command(name = "dccbot")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Service root (directories, config and quota file live here)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Owner id; overrides the config file
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create directories, config and a default dcc.cfg
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
    /// Check directories, tools and dcc.cfg
    Status,
    /// Show a user's conversion count and remaining allowance
    Limit {
        user: String,
    },
    /// Reset a user's conversion count to zero
    Reset {
        user: String,
    },
    /// Convert one APK
    Convert {
        /// APK to convert
        input: PathBuf,

        /// Submitting user id
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Options, e.g. "--obfuscate --filter rules.txt"
        #[arg(short, long, default_value = "", allow_hyphen_values = true)]
        caption: String,

        /// Where to save the converted APK
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = BotConfig::load(&args.root).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        BotConfig::default()
    });
    if let Some(owner) = args.owner {
        config = config.with_owner(owner);
    }
    debug!("Service root: {}", args.root.display());

    if let Command::Init { force } = args.command {
        return init::init_project(&args.root, &config, force);
    }

    let config = config.resolved(&args.root);
    match args.command {
        Command::Init { .. } => Ok(()),
        Command::Status => status::show_status(&config),
        Command::Limit { user } => quota::show_limit(&config, &user),
        Command::Reset { user } => quota::reset_user(&config, &user),
        Command::Convert {
            input,
            user,
            caption,
            out,
        } => convert::run_convert(&config, &user, &input, &caption, out).await,
    }
}
