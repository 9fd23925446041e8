//! azposture: security posture scanner for Azure subscriptions.
//!
//! Enumerates storage accounts, virtual machines and network security groups
//! concurrently, evaluates misconfiguration rules against them, and keeps
//! the results in a local SQLite history.
//!
//! # Quick Start
//!
//! ```no_run
//! use azposture::azure::AzureCredentials;
//! use azposture::{scan, ScanOptions};
//!
//! let options = ScanOptions {
//!     credentials: AzureCredentials::new("tenant", "client", "secret", "subscription"),
//!     ..Default::default()
//! };
//! let report = scan(&options).unwrap();
//! println!("Pass: {}, Findings: {}", report.verdict.pass, report.findings.len());
//! ```

pub mod azure;
pub mod config;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod output;
pub mod resource;
pub mod rules;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use azure::{ArmClient, AzureCredentials};
use config::Config;
use engine::ScanEngine;
use error::Result;
use output::OutputFormat;
use rules::policy::{Policy, PolicyVerdict};
use rules::Finding;
use store::{FindingStore, SqliteStore};

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".azposture.toml";

/// Options for a scan invocation.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Service principal and subscription to scan.
    pub credentials: AzureCredentials,
    /// Path to config file (defaults to `.azposture.toml`).
    pub config_path: Option<PathBuf>,
    /// CLI override for fail_on threshold.
    pub fail_on_override: Option<rules::Severity>,
    /// CLI override for the history database path.
    pub db_path: Option<PathBuf>,
    /// Record the run and its findings in the history database.
    pub persist: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            credentials: AzureCredentials::default(),
            config_path: None,
            fail_on_override: None,
            db_path: None,
            persist: true,
        }
    }
}

/// Complete scan report.
#[derive(Debug)]
pub struct ScanReport {
    /// Stored run id; `None` when the scan was not persisted.
    pub run_id: Option<i64>,
    pub findings: Vec<Finding>,
    pub verdict: PolicyVerdict,
}

/// Run a complete scan: load config, enumerate, evaluate rules, apply
/// policy, record history.
///
/// Enumeration failures never make this fail; they show up as `ERROR`
/// findings. Errors here are startup problems (config, store, client).
pub fn scan(options: &ScanOptions) -> Result<ScanReport> {
    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = Config::load(&config_path)?;

    if let Some(fail_on) = options.fail_on_override {
        config.policy.fail_on = Some(fail_on);
    }
    if let Some(db_path) = &options.db_path {
        config.store.path = db_path.clone();
    }

    let client = ArmClient::new(&options.credentials, &config.scan)?;
    let engine = ScanEngine::azure(Arc::new(client), &config.scan)?;

    let store = if options.persist {
        Some(SqliteStore::open(&config.store.path)?)
    } else {
        None
    };

    scan_with(
        &engine,
        &config.policy,
        store.as_ref().map(|s| s as &dyn FindingStore),
    )
}

/// Run an already-built engine and optionally record the run.
///
/// Raw findings are persisted; the returned findings have the policy
/// applied. A store failure after the scan is logged and leaves the report
/// without a run id.
pub fn scan_with(
    engine: &ScanEngine,
    policy: &Policy,
    store: Option<&dyn FindingStore>,
) -> Result<ScanReport> {
    let started_run = store.map(|s| s.start_run()).transpose()?;

    let all_findings = engine.run_all_checks();

    let run_id = match (store, started_run) {
        (Some(store), Some(id)) => match record_run(store, id, &all_findings) {
            Ok(()) => {
                info!(run_id = id, findings = all_findings.len(), "run recorded");
                Some(id)
            }
            Err(e) => {
                warn!(run_id = id, error = %e, "failed to record run; reporting without history");
                None
            }
        },
        _ => None,
    };

    let effective_findings = policy.apply(&all_findings);
    let verdict = policy.evaluate(&all_findings);

    Ok(ScanReport {
        run_id,
        findings: effective_findings,
        verdict,
    })
}

fn record_run(store: &dyn FindingStore, run_id: i64, findings: &[Finding]) -> Result<()> {
    store.save_findings(run_id, findings)?;
    store.finish_run(run_id)
}

/// Render a scan report in the specified format.
pub fn render_report(report: &ScanReport, format: OutputFormat) -> Result<String> {
    output::render(&report.findings, &report.verdict, format, report.run_id)
}
