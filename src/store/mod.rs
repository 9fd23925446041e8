//! Scan history: runs and the findings they produced, kept in SQLite.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PostureError, Result};
use crate::resource::Service;
use crate::rules::{Finding, Severity};

/// Lifecycle of a run. The only transition is `Running -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = PostureError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            other => Err(PostureError::Store(format!("unknown run status '{other}'"))),
        }
    }
}

/// One execution of the full scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A finding as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFinding {
    pub id: i64,
    pub run_id: i64,
    #[serde(flatten)]
    pub finding: Finding,
}

/// Finding count for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub run_id: i64,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub finding_count: usize,
    /// Of which were enumeration failures.
    pub error_count: usize,
}

/// Narrows a findings query. Empty lists match everything; values within one
/// list are alternatives, and the lists combine with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindingFilter {
    pub run_id: Option<i64>,
    pub severities: Vec<Severity>,
    pub services: Vec<Service>,
    pub rule_ids: Vec<String>,
}

impl FindingFilter {
    pub fn run(run_id: i64) -> Self {
        Self {
            run_id: Some(run_id),
            ..Default::default()
        }
    }

    /// `WHERE` clause (empty when unfiltered) and its positional arguments.
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        if let Some(run_id) = self.run_id {
            args.push(Value::Integer(run_id));
            clauses.push(format!("run_id = ?{}", args.len()));
        }
        push_any_of(
            &mut clauses,
            &mut args,
            "severity",
            self.severities.iter().map(|s| s.as_str().to_string()),
        );
        push_any_of(
            &mut clauses,
            &mut args,
            "service",
            self.services.iter().map(|s| s.as_str().to_string()),
        );
        push_any_of(&mut clauses, &mut args, "rule_id", self.rule_ids.iter().cloned());

        if clauses.is_empty() {
            (String::new(), args)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), args)
        }
    }
}

fn push_any_of(
    clauses: &mut Vec<String>,
    args: &mut Vec<Value>,
    column: &str,
    values: impl Iterator<Item = String>,
) {
    let mut placeholders = Vec::new();
    for value in values {
        args.push(Value::Text(value));
        placeholders.push(format!("?{}", args.len()));
    }
    if !placeholders.is_empty() {
        clauses.push(format!("{column} IN ({})", placeholders.join(", ")));
    }
}

/// Persistence gateway for scan runs and findings.
pub trait FindingStore: Send + Sync {
    /// Create a run in `running` state and return its id.
    fn start_run(&self) -> Result<i64>;

    /// Attach findings to a running run. All or nothing.
    fn save_findings(&self, run_id: i64, findings: &[Finding]) -> Result<()>;

    /// Mark a running run as finished.
    fn finish_run(&self, run_id: i64) -> Result<()>;

    fn get_all_findings(&self) -> Result<Vec<StoredFinding>>;

    fn get_findings_by_run(&self, run_id: i64) -> Result<Vec<StoredFinding>>;

    /// Findings matching `filter`, oldest first.
    fn get_findings(&self, filter: &FindingFilter) -> Result<Vec<StoredFinding>>;

    fn get_all_runs(&self) -> Result<Vec<ScanRun>>;

    /// Finding counts per run, oldest first.
    fn get_findings_trend(&self) -> Result<Vec<TrendPoint>>;
}

/// SQLite-backed [`FindingStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            PostureError::Store(format!("failed to open {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "opened findings store");
        Self::with_connection(conn)
    }

    /// Create an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL DEFAULT 'running'
            );

            CREATE TABLE IF NOT EXISTS findings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id),
                rule_id TEXT NOT NULL,
                service TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                resource_name TEXT,
                resource_group TEXT,
                title TEXT NOT NULL,
                severity TEXT NOT NULL,
                evidence TEXT NOT NULL,
                remediation TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_findings_run ON findings(run_id);
            "#,
        )
        .map_err(|e| PostureError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PostureError::Store("store connection lock poisoned".into()))
    }

    fn query_findings(&self, sql: &str, args: impl Params) -> Result<Vec<StoredFinding>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, FindingRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(FindingRow::into_stored).collect()
    }
}

const FINDING_COLUMNS: &str = "id, run_id, rule_id, service, resource_id, resource_name, \
     resource_group, title, severity, evidence, remediation";

/// Reject writes to a run that is unknown or no longer running.
fn require_running(conn: &Connection, run_id: i64) -> Result<()> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM runs WHERE id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?;
    match status {
        None => Err(PostureError::Store(format!("run {run_id} does not exist"))),
        Some(status) => match status.parse::<RunStatus>()? {
            RunStatus::Running => Ok(()),
            RunStatus::Finished => Err(PostureError::Store(format!(
                "run {run_id} is already finished"
            ))),
        },
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PostureError::Store(format!("bad timestamp '{text}': {e}")))
}

/// Raw column values, decoded after the statement is done.
struct FindingRow {
    id: i64,
    run_id: i64,
    rule_id: String,
    service: String,
    resource_id: String,
    resource_name: Option<String>,
    resource_group: Option<String>,
    title: String,
    severity: String,
    evidence: String,
    remediation: String,
}

impl FindingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            rule_id: row.get(2)?,
            service: row.get(3)?,
            resource_id: row.get(4)?,
            resource_name: row.get(5)?,
            resource_group: row.get(6)?,
            title: row.get(7)?,
            severity: row.get(8)?,
            evidence: row.get(9)?,
            remediation: row.get(10)?,
        })
    }

    fn into_stored(self) -> Result<StoredFinding> {
        let service: Service = self.service.parse()?;
        let severity = Severity::from_str_lenient(&self.severity).ok_or_else(|| {
            PostureError::Store(format!(
                "finding {} has unknown severity '{}'",
                self.id, self.severity
            ))
        })?;

        Ok(StoredFinding {
            id: self.id,
            run_id: self.run_id,
            finding: Finding {
                rule_id: self.rule_id,
                service,
                resource_id: self.resource_id,
                resource_name: self.resource_name,
                resource_group: self.resource_group,
                title: self.title,
                severity,
                evidence: serde_json::from_str(&self.evidence)?,
                remediation: serde_json::from_str(&self.remediation)?,
            },
        })
    }
}

impl FindingStore for SqliteStore {
    fn start_run(&self) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs (started_at, status) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), RunStatus::Running.as_str()],
        )?;
        let id = conn.last_insert_rowid();
        debug!(run_id = id, "run started");
        Ok(id)
    }

    fn save_findings(&self, run_id: i64, findings: &[Finding]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        require_running(&tx, run_id)?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO findings (run_id, rule_id, service, resource_id, resource_name, \
                 resource_group, title, severity, evidence, remediation) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for f in findings {
                insert.execute(params![
                    run_id,
                    f.rule_id,
                    f.service.as_str(),
                    f.resource_id,
                    f.resource_name,
                    f.resource_group,
                    f.title,
                    f.severity.as_str(),
                    serde_json::to_string(&f.evidence)?,
                    serde_json::to_string(&f.remediation)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(run_id, count = findings.len(), "findings saved");
        Ok(())
    }

    fn finish_run(&self, run_id: i64) -> Result<()> {
        let conn = self.conn()?;
        require_running(&conn, run_id)?;
        conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![RunStatus::Finished.as_str(), Utc::now().to_rfc3339(), run_id],
        )?;
        debug!(run_id, "run finished");
        Ok(())
    }

    fn get_all_findings(&self) -> Result<Vec<StoredFinding>> {
        self.query_findings(
            &format!("SELECT {FINDING_COLUMNS} FROM findings ORDER BY id"),
            params![],
        )
    }

    fn get_findings_by_run(&self, run_id: i64) -> Result<Vec<StoredFinding>> {
        self.get_findings(&FindingFilter::run(run_id))
    }

    fn get_findings(&self, filter: &FindingFilter) -> Result<Vec<StoredFinding>> {
        let (where_clause, args) = filter.where_clause();
        self.query_findings(
            &format!("SELECT {FINDING_COLUMNS} FROM findings{where_clause} ORDER BY id"),
            params_from_iter(args),
        )
    }

    fn get_all_runs(&self) -> Result<Vec<ScanRun>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, status, started_at, finished_at FROM runs ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, status, started_at, finished_at)| {
                Ok(ScanRun {
                    id,
                    status: status.parse()?,
                    started_at: parse_timestamp(&started_at)?,
                    finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
                })
            })
            .collect()
    }

    fn get_findings_trend(&self) -> Result<Vec<TrendPoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.started_at, r.status, COUNT(f.id), \
                    COALESCE(SUM(CASE WHEN f.rule_id = 'ERROR' THEN 1 ELSE 0 END), 0) \
             FROM runs r LEFT JOIN findings f ON f.run_id = r.id \
             GROUP BY r.id ORDER BY r.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(run_id, started_at, status, count, errors)| {
                Ok(TrendPoint {
                    run_id,
                    started_at: parse_timestamp(&started_at)?,
                    status: status.parse()?,
                    finding_count: count as usize,
                    error_count: errors as usize,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn open_nsg() -> Finding {
        Finding::new(
            "AZ-NSG-OPEN-001",
            Service::NetworkSecurityGroups,
            "/subscriptions/s/resourceGroups/net/providers/Microsoft.Network/networkSecurityGroups/edge",
            "NSG allows * to port 22",
            Severity::High,
        )
        .with_resource("edge", Some("net"))
        .with_evidence(json!({
            "nsg_name": "edge",
            "rule_name": "ssh",
            "source_address_prefix": "*",
            "destination_port_range": "22",
        }))
        .with_remediation([
            "Restrict NSG rule ssh on edge to only trusted IP ranges.",
            "Use Just-In-Time access or Azure Bastion for admin access.",
        ])
    }

    #[test]
    fn run_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = store.start_run().unwrap();

        let runs = store.get_all_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Running);
        assert!(runs[0].finished_at.is_none());

        store.finish_run(run_id).unwrap();
        let run = &store.get_all_runs().unwrap()[0];
        assert_eq!(run.status, RunStatus::Finished);
        let finished_at = run.finished_at.unwrap();
        assert!(finished_at >= run.started_at);
    }

    #[test]
    fn finished_run_rejects_writes() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = store.start_run().unwrap();
        store.finish_run(run_id).unwrap();

        assert!(matches!(
            store.save_findings(run_id, &[open_nsg()]),
            Err(PostureError::Store(_))
        ));
        assert!(matches!(store.finish_run(run_id), Err(PostureError::Store(_))));
        assert!(store.get_all_findings().unwrap().is_empty());
    }

    #[test]
    fn unknown_run_is_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.save_findings(42, &[open_nsg()]),
            Err(PostureError::Store(_))
        ));
        assert!(matches!(store.finish_run(42), Err(PostureError::Store(_))));
    }

    #[test]
    fn evidence_and_remediation_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = store.start_run().unwrap();
        let error = Finding::enumeration_error(
            Service::VirtualMachines,
            &PostureError::Access("creds missing".into()),
        );
        store
            .save_findings(run_id, &[open_nsg(), error.clone()])
            .unwrap();

        let stored = store.get_findings_by_run(run_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].run_id, run_id);
        assert_eq!(stored[0].finding, open_nsg());
        assert_eq!(stored[1].finding, error);
    }

    #[test]
    fn findings_are_isolated_per_run() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.start_run().unwrap();
        store.save_findings(first, &[open_nsg()]).unwrap();
        store.finish_run(first).unwrap();

        let second = store.start_run().unwrap();
        store
            .save_findings(second, &[open_nsg(), open_nsg()])
            .unwrap();
        store.finish_run(second).unwrap();

        assert_eq!(store.get_findings_by_run(first).unwrap().len(), 1);
        assert_eq!(store.get_findings_by_run(second).unwrap().len(), 2);
        assert_eq!(store.get_all_findings().unwrap().len(), 3);
        assert!(store.get_findings_by_run(99).unwrap().is_empty());
    }

    #[test]
    fn trend_counts_findings_and_errors() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.start_run().unwrap();
        store
            .save_findings(
                first,
                &[
                    open_nsg(),
                    Finding::enumeration_error(Service::Storage, &"timed out"),
                ],
            )
            .unwrap();
        store.finish_run(first).unwrap();
        let empty = store.start_run().unwrap();

        let trend = store.get_findings_trend().unwrap();
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].run_id, first);
        assert_eq!(trend[0].finding_count, 2);
        assert_eq!(trend[0].error_count, 1);
        assert_eq!(trend[0].status, RunStatus::Finished);
        assert_eq!(trend[1].run_id, empty);
        assert_eq!(trend[1].finding_count, 0);
        assert_eq!(trend[1].status, RunStatus::Running);
    }

    #[test]
    fn on_disk_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner_azure.db");

        let run_id = {
            let store = SqliteStore::open(&path).unwrap();
            let run_id = store.start_run().unwrap();
            store.save_findings(run_id, &[open_nsg()]).unwrap();
            store.finish_run(run_id).unwrap();
            run_id
        };

        let reopened = SqliteStore::open(&path).unwrap();
        let stored = reopened.get_findings_by_run(run_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].finding.rule_id, "AZ-NSG-OPEN-001");
    }

    fn public_ip(vm: &str) -> Finding {
        Finding::new(
            "AZ-VM-PUBIP-001",
            Service::VirtualMachines,
            format!("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/{vm}"),
            "VM has public IP(s)",
            Severity::Medium,
        )
        .with_resource(vm, Some("rg"))
    }

    fn rule_ids(stored: &[StoredFinding]) -> Vec<&str> {
        stored.iter().map(|s| s.finding.rule_id.as_str()).collect()
    }

    #[test]
    fn filters_by_severity_service_and_rule() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = store.start_run().unwrap();
        store
            .save_findings(
                run_id,
                &[
                    open_nsg(),
                    public_ip("web"),
                    Finding::enumeration_error(Service::Storage, &"throttled"),
                ],
            )
            .unwrap();
        store.finish_run(run_id).unwrap();

        let all = store.get_findings(&FindingFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let high = FindingFilter {
            severities: vec![Severity::High],
            ..Default::default()
        };
        assert_eq!(rule_ids(&store.get_findings(&high).unwrap()), vec!["AZ-NSG-OPEN-001"]);

        let medium_or_low = FindingFilter {
            severities: vec![Severity::Medium, Severity::Low],
            ..Default::default()
        };
        assert_eq!(
            rule_ids(&store.get_findings(&medium_or_low).unwrap()),
            vec!["AZ-VM-PUBIP-001", "ERROR"]
        );

        let storage = FindingFilter {
            services: vec![Service::Storage],
            ..Default::default()
        };
        assert_eq!(rule_ids(&store.get_findings(&storage).unwrap()), vec!["ERROR"]);

        let by_rule = FindingFilter {
            rule_ids: vec!["AZ-VM-PUBIP-001".into(), "AZ-NSG-OPEN-001".into()],
            ..Default::default()
        };
        assert_eq!(
            rule_ids(&store.get_findings(&by_rule).unwrap()),
            vec!["AZ-NSG-OPEN-001", "AZ-VM-PUBIP-001"]
        );

        let disjoint = FindingFilter {
            severities: vec![Severity::High],
            services: vec![Service::VirtualMachines],
            ..Default::default()
        };
        assert!(store.get_findings(&disjoint).unwrap().is_empty());
    }

    #[test]
    fn filter_combines_with_run() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.start_run().unwrap();
        store.save_findings(first, &[open_nsg(), public_ip("a")]).unwrap();
        store.finish_run(first).unwrap();
        let second = store.start_run().unwrap();
        store.save_findings(second, &[public_ip("b")]).unwrap();
        store.finish_run(second).unwrap();

        let filter = FindingFilter {
            rule_ids: vec!["AZ-VM-PUBIP-001".into()],
            ..FindingFilter::run(second)
        };
        let stored = store.get_findings(&filter).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].run_id, second);
        assert_eq!(stored[0].finding.resource_name.as_deref(), Some("b"));
    }
}
