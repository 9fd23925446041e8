use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use azposture::azure::AzureCredentials;
use azposture::config::Config;
use azposture::error::PostureError;
use azposture::output::{history, OutputFormat};
use azposture::resource::Service;
use azposture::rules::{RuleEngine, Severity};
use azposture::store::{FindingFilter, FindingStore, SqliteStore};
use azposture::{ScanOptions, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(
    name = "azposture",
    about = "Security posture scanner for Azure subscriptions",
    version,
    author
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a subscription for misconfigurations
    Scan {
        #[arg(long, env = "AZURE_TENANT_ID")]
        tenant_id: Option<String>,

        #[arg(long, env = "AZURE_CLIENT_ID")]
        client_id: Option<String>,

        #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,

        #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
        subscription_id: Option<String>,

        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output format (console, json, sarif)
        #[arg(long, short = 'f', default_value = "console")]
        format: String,

        /// Minimum severity to fail (low, medium, high)
        #[arg(long)]
        fail_on: Option<String>,

        /// Write output to file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// History database
        #[arg(long, env = "DB_PATH")]
        db: Option<PathBuf>,

        /// Do not record this run in the history database
        #[arg(long)]
        no_persist: bool,
    },

    /// Show recorded findings
    Findings {
        /// Only findings from this run
        #[arg(long)]
        run: Option<i64>,

        /// Only these severities (repeatable: high, medium, low)
        #[arg(long = "severity")]
        severities: Vec<String>,

        /// Only these services (repeatable: storage, vms, nsgs)
        #[arg(long = "service")]
        services: Vec<String>,

        /// Only these rule IDs (repeatable)
        #[arg(long = "rule")]
        rules: Vec<String>,

        /// Output format (console, json, sarif)
        #[arg(long, short = 'f', default_value = "console")]
        format: String,

        #[arg(long, env = "DB_PATH")]
        db: Option<PathBuf>,
    },

    /// List recorded runs
    Runs {
        #[arg(long, short = 'f', default_value = "console")]
        format: String,

        #[arg(long, env = "DB_PATH")]
        db: Option<PathBuf>,
    },

    /// Finding counts per run
    Trend {
        #[arg(long, short = 'f', default_value = "console")]
        format: String,

        #[arg(long, env = "DB_PATH")]
        db: Option<PathBuf>,
    },

    /// List all available detection rules
    ListRules {
        /// Output format (table, json)
        #[arg(long, short = 'f', default_value = "table")]
        format: String,
    },

    /// Generate a starter .azposture.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Scan {
            tenant_id,
            client_id,
            client_secret,
            subscription_id,
            config,
            format,
            fail_on,
            output,
            db,
            no_persist,
        } => {
            let credentials = AzureCredentials {
                tenant_id,
                client_id,
                client_secret,
                subscription_id,
            };
            cmd_scan(credentials, config, format, fail_on, output, db, no_persist)
        }
        Commands::Findings {
            run,
            severities,
            services,
            rules,
            format,
            db,
        } => finding_filter(run, &severities, &services, rules)
            .and_then(|filter| cmd_findings(&filter, format, db)),
        Commands::Runs { format, db } => cmd_runs(format, db),
        Commands::Trend { format, db } => cmd_trend(format, db),
        Commands::ListRules { format } => cmd_list_rules(format),
        Commands::Init { force } => cmd_init(force),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_format(format_str: &str) -> OutputFormat {
    OutputFormat::from_str_lenient(format_str).unwrap_or_else(|| {
        eprintln!("Warning: unknown format '{}', using console", format_str);
        OutputFormat::Console
    })
}

#[allow(clippy::too_many_arguments)]
fn cmd_scan(
    credentials: AzureCredentials,
    config: Option<PathBuf>,
    format_str: String,
    fail_on_str: Option<String>,
    output_path: Option<PathBuf>,
    db: Option<PathBuf>,
    no_persist: bool,
) -> Result<i32, PostureError> {
    let format = parse_format(&format_str);

    let fail_on = fail_on_str.and_then(|s| {
        let sev = Severity::from_str_lenient(&s);
        if sev.is_none() {
            eprintln!("Warning: unknown severity '{}', using config default", s);
        }
        sev
    });

    if !credentials.is_configured() {
        eprintln!(
            "Warning: missing {}; every service will report a scan error",
            credentials.missing().join(", ")
        );
    }

    let options = ScanOptions {
        credentials,
        config_path: config,
        fail_on_override: fail_on,
        db_path: db,
        persist: !no_persist,
    };

    let report = azposture::scan(&options)?;
    let rendered = azposture::render_report(&report, format)?;

    match output_path {
        Some(out) => std::fs::write(&out, &rendered)?,
        None => print!("{}", rendered),
    }

    // Exit code: 0 = pass, 1 = findings at or above an explicit threshold
    Ok(if report.verdict.pass { 0 } else { 1 })
}

/// Open the history database named on the command line, or the configured one.
fn open_store(db: Option<PathBuf>) -> Result<SqliteStore, PostureError> {
    let path = match db {
        Some(path) => path,
        None => Config::load(Path::new(DEFAULT_CONFIG_FILE))?.store.path,
    };
    if !path.exists() {
        return Err(PostureError::Store(format!(
            "no scan history at {} (run `azposture scan` first)",
            path.display()
        )));
    }
    SqliteStore::open(&path)
}

fn finding_filter(
    run: Option<i64>,
    severities: &[String],
    services: &[String],
    rule_ids: Vec<String>,
) -> Result<FindingFilter, PostureError> {
    let severities = severities
        .iter()
        .map(|s| {
            Severity::from_str_lenient(s)
                .ok_or_else(|| PostureError::Validation(format!("unknown severity '{s}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let services = services
        .iter()
        .map(|s| s.parse::<Service>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FindingFilter {
        run_id: run,
        severities,
        services,
        rule_ids,
    })
}

fn cmd_findings(filter: &FindingFilter, format_str: String, db: Option<PathBuf>) -> Result<i32, PostureError> {
    let store = open_store(db)?;
    let findings = store.get_findings(filter)?;
    print!("{}", history::render_findings(&findings, parse_format(&format_str))?);
    Ok(0)
}

fn cmd_runs(format_str: String, db: Option<PathBuf>) -> Result<i32, PostureError> {
    let store = open_store(db)?;
    let runs = store.get_all_runs()?;
    print!("{}", history::render_runs(&runs, parse_format(&format_str))?);
    Ok(0)
}

fn cmd_trend(format_str: String, db: Option<PathBuf>) -> Result<i32, PostureError> {
    let store = open_store(db)?;
    let trend = store.get_findings_trend()?;
    print!("{}", history::render_trend(&trend, parse_format(&format_str))?);
    Ok(0)
}

fn cmd_list_rules(format_str: String) -> Result<i32, PostureError> {
    let engine = RuleEngine::new();
    let rules = engine.list_rules();

    match format_str.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&rules)?;
            println!("{}", json);
        }
        _ => {
            println!(
                "{:<27} {:<30} {:<10} SERVICE",
                "ID", "NAME", "SEVERITY"
            );
            println!("{}", "-".repeat(80));
            for rule in &rules {
                println!(
                    "{:<27} {:<30} {:<10} {}",
                    rule.id,
                    rule.name,
                    rule.default_severity.to_string(),
                    rule.service,
                );
            }
        }
    }

    Ok(0)
}

fn cmd_init(force: bool) -> Result<i32, PostureError> {
    let path = PathBuf::from(DEFAULT_CONFIG_FILE);

    if path.exists() && !force {
        eprintln!("{} already exists. Use --force to overwrite.", DEFAULT_CONFIG_FILE);
        return Ok(1);
    }

    std::fs::write(&path, Config::starter_toml())?;
    println!("Created {}", DEFAULT_CONFIG_FILE);

    Ok(0)
}
