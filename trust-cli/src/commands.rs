use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use trust_store::registry::read_pem_file;
use trust_store::{
    AuthorityRepository, Certificate, HttpRevocationListFetcher, InMemoryAuthorityRepository,
    LoadReport, PostgresAuthorityRepository, RevocationTracker, SerialNumber, TracingAlertSink,
    TrustStore, TrustStoreConfig,
};

use crate::Command;

pub async fn run(
    command: Command,
    config: &TrustStoreConfig,
    database_url: Option<&str>,
) -> Result<ExitCode> {
    match command {
        Command::CheckConfig => check_config(config),
        Command::Load => load(config),
        Command::Chain { pem } => chain(config, &pem),
        Command::Validate { pem } => validate(config, &pem),
        Command::Prune => prune(config),
        Command::Refresh { pem, all } => refresh(config, database_url, &pem, all).await,
        Command::IsRevoked { key_id, serial } => {
            is_revoked(config, database_url, &key_id, &serial).await
        }
    }
}

// =============================================================================
// Trust store commands
// =============================================================================

fn check_config(config: &TrustStoreConfig) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if config.ca_directory.is_none() {
        println!("{}", "warning: no ca_directory configured".yellow());
    }
    if config.trusted_roots.is_empty() {
        println!("{}", "warning: no trusted roots configured; nothing will validate".yellow());
    }
    Ok(ExitCode::SUCCESS)
}

fn load(config: &TrustStoreConfig) -> Result<ExitCode> {
    let (store, report) = open_store(config)?;

    println!(
        "{} {} CA certificates ({} leaf certificates discarded)",
        "Loaded".green(),
        store.count(),
        report.discarded_leaves
    );
    if store.all_certificates_valid() {
        println!("{}", "All stored certificates chain to a trusted root".green());
    } else {
        println!("{}", "Some stored certificates do not chain to a trusted root".yellow());
    }

    Ok(exit_code(report.is_clean()))
}

fn chain(config: &TrustStoreConfig, pem: &Path) -> Result<ExitCode> {
    let (store, _report) = open_store(config)?;

    for certificate in read_pem_file(pem)? {
        println!("{}", describe(&certificate).bold());
        let chain = store.chain(&certificate);
        if chain.is_empty() {
            println!("  {}", "no trusted chain".red());
        }
        for signer in chain {
            println!("  -> {}", describe(&signer));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn validate(config: &TrustStoreConfig, pem: &Path) -> Result<ExitCode> {
    let (store, _report) = open_store(config)?;
    let mut all_valid = true;

    for certificate in read_pem_file(pem)? {
        let valid = store.is_valid(&certificate);
        let verdict = if valid { "valid".green() } else { "INVALID".red() };
        println!("{verdict} {}", describe(&certificate));
        all_valid &= valid;
    }

    Ok(exit_code(all_valid))
}

/// Prunes an in-memory copy of the CA directory; nothing is written back.
fn prune(config: &TrustStoreConfig) -> Result<ExitCode> {
    let (store, _report) = open_store(config)?;
    let removed = store.prune_untrusted();

    for key_id in &removed {
        println!("{} {key_id}", "would prune".yellow());
    }
    println!(
        "{} certificates would be pruned, {} would remain (dry run, files unchanged)",
        removed.len(),
        store.count()
    );

    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Revocation commands
// =============================================================================

async fn refresh(
    config: &TrustStoreConfig,
    database_url: Option<&str>,
    pem: &Path,
    all: bool,
) -> Result<ExitCode> {
    let (store, _report) = open_store(config)?;
    let tracker = open_tracker(config, database_url).await?;
    let mut succeeded = true;
    let mut refreshed = BTreeSet::new();

    for certificate in read_pem_file(pem)? {
        let Some(issuer_id) = certificate
            .signing_key_id
            .clone()
            .filter(|_| !certificate.is_self_signed())
        else {
            warn!(key_id = %certificate.key_id, "Self-signed certificate has no issuer to track");
            continue;
        };

        let Some(issuer) = store.lookup(&issuer_id) else {
            println!("{} issuer {issuer_id} of {}", "unknown".red(), describe(&certificate));
            succeeded = false;
            continue;
        };

        let authority = tracker.track(&issuer, Some(&certificate)).await?;
        if !refreshed.insert(authority.key_id.clone()) {
            continue;
        }

        match tracker.refresh(&authority).await {
            Ok(outcome) => println!(
                "{} {}: {} listed, {} new",
                "refreshed".green(),
                authority,
                outcome.fetched,
                outcome.added.len()
            ),
            Err(err) => {
                println!("{} {authority}: {err}", "failed".red());
                succeeded = false;
            }
        }
    }

    if all {
        let report = tracker.refresh_all().await?;
        info!(
            refreshed = report.outcomes.len(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "Refreshed all authorities"
        );
        for (key_id, err) in &report.failures {
            println!("{} {key_id}: {err}", "failed".red());
        }
        println!("{} new revoked serials across all authorities", report.added_count());
        succeeded &= report.failures.is_empty();
    }

    Ok(exit_code(succeeded))
}

async fn is_revoked(
    config: &TrustStoreConfig,
    database_url: Option<&str>,
    key_id: &str,
    serial: &str,
) -> Result<ExitCode> {
    let serial = SerialNumber::from_hex(serial)?;
    if database_url.is_none() {
        warn!("No database URL; the in-memory authority store starts empty");
    }

    let tracker = open_tracker(config, database_url).await?;
    if tracker.is_revoked_by_key_id(key_id, &serial).await? {
        println!("{} serial {serial} by {key_id}", "revoked".red());
    } else {
        println!("{} serial {serial} by {key_id}", "not revoked".green());
    }

    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Helpers
// =============================================================================

fn open_store(config: &TrustStoreConfig) -> Result<(TrustStore, LoadReport)> {
    let directory = config
        .ca_directory
        .as_deref()
        .context("No CA directory configured (set ca_directory or pass --ca-dir)")?;

    let store = TrustStore::from_config(config, Arc::new(TracingAlertSink));
    let report = store
        .load_certs(directory)
        .with_context(|| format!("Failed to load {}", directory.display()))?;

    for failure in &report.failures {
        println!(
            "{} {}: {}",
            "skipped".yellow(),
            failure.path.display(),
            failure.error
        );
    }

    Ok((store, report))
}

async fn open_tracker(
    config: &TrustStoreConfig,
    database_url: Option<&str>,
) -> Result<RevocationTracker> {
    let repository: Arc<dyn AuthorityRepository> = match database_url {
        Some(url) => {
            let repository = PostgresAuthorityRepository::from_connection_string(url).await?;
            repository.ensure_schema().await?;
            Arc::new(repository)
        }
        None => Arc::new(InMemoryAuthorityRepository::new()),
    };
    let fetcher = Arc::new(HttpRevocationListFetcher::new(&config.revocation)?);

    Ok(RevocationTracker::from_config(
        &config.revocation,
        repository,
        fetcher,
    ))
}

fn describe(certificate: &Certificate) -> String {
    format!("{} [{}]", certificate.subject_dn, certificate.key_id)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
