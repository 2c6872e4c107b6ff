use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use trust_store::{LoggingConfig, TrustStoreConfig};

mod commands;

/// Certificate trust store operations
#[derive(Parser, Debug)]
#[command(name = "trustctl")]
#[command(about = "Inspect, validate and maintain the certificate-authority trust store")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, env = "TRUST_STORE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of CA bundles; overrides `ca_directory` from the configuration
    #[arg(long)]
    ca_dir: Option<PathBuf>,

    /// Trusted root key id; repeat to configure several. Replaces the configured set.
    #[arg(long = "trusted-root")]
    trusted_roots: Vec<String>,

    /// PostgreSQL URL for the authority store. Without it revocation data lives
    /// in memory for the duration of the command.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration
    CheckConfig,

    /// Load the CA directory and report what was stored
    Load,

    /// Print the chain of trust for every certificate in a PEM file
    Chain { pem: PathBuf },

    /// Check every certificate in a PEM file; exits non-zero if any is invalid
    Validate { pem: PathBuf },

    /// Report the certificates in the CA directory that do not chain to a trusted root
    /// and would be pruned. Files on disk are left untouched.
    Prune,

    /// Track the issuers of the certificates in a PEM file and refresh their revocation lists
    Refresh {
        pem: PathBuf,

        /// Also refresh every other authority already in the store
        #[arg(long)]
        all: bool,
    },

    /// Check whether a serial number has been revoked by an authority
    IsRevoked { key_id: String, serial: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = TrustStoreConfig::load(args.config.as_deref())
        .context("Failed to load trust store configuration")?;
    if let Some(ca_dir) = args.ca_dir.clone() {
        config.ca_directory = Some(ca_dir);
    }
    if !args.trusted_roots.is_empty() {
        config.trusted_roots = args.trusted_roots.clone();
    }
    config.validate()?;

    init_tracing(&config.logging, args.verbose);

    commands::run(args.command, &config, args.database_url.as_deref()).await
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("trust_store={level},trustctl={level},sqlx=warn,reqwest=info").into());

    // Logs go to stderr so command output on stdout stays machine-readable
    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
