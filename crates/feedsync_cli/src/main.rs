//! feedsync CLI - keeps destination package feeds in step with their sources.

mod commands;
mod config;
mod progress;
mod scratch;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "feedsync")]
#[command(version)]
#[command(about = "Mirror package feeds between registry servers")]
#[command(
    long_about = "feedsync copies packages from source feeds to destination feeds \
(universal packages, NuGet and asset directories). Each iteration lists both sides of \
every configured chain, transfers missing versions with bounded concurrency, verifies \
content hashes and optionally prunes old versions from the destination."
)]
#[command(after_long_help = r#"EXAMPLES
    Run the sync loop with the default config.yml:
        $ feedsync run

    Run a single iteration with debug logging:
        $ feedsync run --once --debug -c /etc/feedsync/config.yml

    Log to a file as well as stdout:
        $ feedsync run -l /var/log/feedsync.log

    Validate a config file without touching any feed:
        $ feedsync check-config -c config.yml

    Generate shell completions:
        $ feedsync completions bash > ~/.local/share/bash-completion/completions/feedsync

CONFIGURATION
    The config file (YAML or TOML, picked by extension) lists sync chains,
    timeouts, transfer caps and the retention policy. Scalar settings can be
    overridden from the environment, e.g. FEEDSYNC_PROCEEDPACKAGELIMIT=20 or
    FEEDSYNC_RETENTION__ENABLED=false. A .env file in the current directory is
    loaded first.

ENVIRONMENT VARIABLES
    FEEDSYNC_CONFIG    Path to the config file (default: config.yml)
    RUST_LOG           Log filter (default: feedsync=info,feedsync_cli=info)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sync iterations until interrupted
    Run {
        /// Path to the config file
        #[arg(short, long, env = "FEEDSYNC_CONFIG", default_value = "config.yml")]
        config: PathBuf,

        /// Scratch directory for downloaded packages (wiped before every iteration)
        #[arg(short = 'p', long, default_value = "./packages")]
        scratch_dir: PathBuf,

        /// Also write logs to this file
        #[arg(short, long)]
        log_file: Option<PathBuf>,

        /// Enable debug logging
        #[arg(long)]
        debug: bool,

        /// Run a single iteration and exit non-zero if any chain failed
        #[arg(long)]
        once: bool,
    },
    /// Load and validate a config file, then print its chains
    CheckConfig {
        /// Path to the config file
        #[arg(short, long, env = "FEEDSYNC_CONFIG", default_value = "config.yml")]
        config: PathBuf,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Install the global subscriber: stdout always, plus an ANSI-free file
/// layer when `log_file` is given.
fn init_tracing(
    debug: bool,
    log_file: Option<&PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if debug => EnvFilter::new("feedsync=debug,feedsync_cli=debug"),
        Err(_) => EnvFilter::new("feedsync=info,feedsync_cli=info"),
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(shell)?;
        }
        Commands::CheckConfig { config } => {
            init_tracing(false, None)?;
            commands::check::handle_check(&config)?;
        }
        Commands::Run {
            config,
            scratch_dir,
            log_file,
            debug,
            once,
        } => {
            init_tracing(debug, log_file.as_ref())?;
            let options = commands::run::RunOptions {
                config,
                scratch_dir,
                once,
            };
            commands::run::handle_run(options).await?;
        }
    }

    Ok(())
}
