//! Rendering for recorded runs and findings.

use crate::error::Result;
use crate::rules::{Finding, Severity};
use crate::store::{ScanRun, StoredFinding, TrendPoint};

use super::{sarif, OutputFormat};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render stored findings. SARIF output uses the run id of the first finding
/// when every finding comes from the same run.
pub fn render_findings(findings: &[StoredFinding], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(findings)? + "\n"),
        OutputFormat::Sarif => {
            let run_id = findings.first().map(|f| f.run_id);
            let single_run = findings.iter().all(|f| Some(f.run_id) == run_id);
            let plain: Vec<Finding> = findings.iter().map(|f| f.finding.clone()).collect();
            sarif::render(&plain, if single_run { run_id } else { None })
        }
        OutputFormat::Console => {
            if findings.is_empty() {
                return Ok("No findings recorded.\n".into());
            }
            let mut output = format!(
                "{:<6} {:<5} {:<27} {:<8} {:<7} {}\n",
                "ID", "RUN", "RULE", "SEVERITY", "SERVICE", "RESOURCE"
            );
            output.push_str(&format!("{}\n", "-".repeat(80)));
            for stored in findings {
                let f = &stored.finding;
                output.push_str(&format!(
                    "{:<6} {:<5} {:<27} {:<8} {:<7} {}\n",
                    stored.id,
                    stored.run_id,
                    f.rule_id,
                    f.severity.as_str(),
                    f.service.as_str(),
                    f.display_resource(),
                ));
            }
            output.push_str(&format!("{}\n", "-".repeat(80)));
            output.push_str(&severity_totals(findings));
            Ok(output)
        }
    }
}

/// Per-severity counts over every listed row, enumeration errors included.
fn severity_totals(findings: &[StoredFinding]) -> String {
    let totals: Vec<String> = Severity::ALL
        .iter()
        .map(|sev| {
            let count = findings.iter().filter(|s| s.finding.severity == *sev).count();
            format!("{} {}", count, sev.as_str().to_lowercase())
        })
        .collect();
    let errors = findings.iter().filter(|s| s.finding.is_error()).count();
    if errors == 0 {
        format!("Totals: {}\n", totals.join(", "))
    } else {
        format!("Totals: {} ({} scan errors)\n", totals.join(", "), errors)
    }
}

pub fn render_runs(runs: &[ScanRun], format: OutputFormat) -> Result<String> {
    if format != OutputFormat::Console {
        return Ok(serde_json::to_string_pretty(runs)? + "\n");
    }
    if runs.is_empty() {
        return Ok("No runs recorded.\n".into());
    }

    let mut output = format!("{:<6} {:<9} {:<20} {}\n", "RUN", "STATUS", "STARTED", "FINISHED");
    output.push_str(&format!("{}\n", "-".repeat(60)));
    for run in runs {
        output.push_str(&format!(
            "{:<6} {:<9} {:<20} {}\n",
            run.id,
            run.status.as_str(),
            run.started_at.format(TIME_FORMAT).to_string(),
            run.finished_at
                .map(|t| t.format(TIME_FORMAT).to_string())
                .unwrap_or_else(|| "-".into()),
        ));
    }
    Ok(output)
}

pub fn render_trend(trend: &[TrendPoint], format: OutputFormat) -> Result<String> {
    if format != OutputFormat::Console {
        return Ok(serde_json::to_string_pretty(trend)? + "\n");
    }
    if trend.is_empty() {
        return Ok("No runs recorded.\n".into());
    }

    let mut output = format!("{:<6} {:<20} {:<9} {:>8} {:>7}\n", "RUN", "STARTED", "STATUS", "FINDINGS", "ERRORS");
    output.push_str(&format!("{}\n", "-".repeat(54)));
    for point in trend {
        output.push_str(&format!(
            "{:<6} {:<20} {:<9} {:>8} {:>7}\n",
            point.run_id,
            point.started_at.format(TIME_FORMAT).to_string(),
            point.status.as_str(),
            point.finding_count,
            point.error_count,
        ));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Service;
    use crate::store::{FindingFilter, FindingStore, RunStatus, SqliteStore};

    fn recorded() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = store.start_run().unwrap();
        store
            .save_findings(
                run_id,
                &[Finding::new(
                    "AZ-VM-PUBIP-001",
                    Service::VirtualMachines,
                    "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/web",
                    "VM has public IP(s)",
                    Severity::Medium,
                )
                .with_resource("web", Some("rg"))],
            )
            .unwrap();
        store.finish_run(run_id).unwrap();
        store
    }

    #[test]
    fn findings_table_lists_rows() {
        let store = recorded();
        let out = render_findings(&store.get_all_findings().unwrap(), OutputFormat::Console).unwrap();
        assert!(out.contains("AZ-VM-PUBIP-001"));
        assert!(out.contains("web"));
        assert!(out.contains("Medium"));
    }

    #[test]
    fn findings_table_ends_with_severity_totals() {
        let store = recorded();
        let run_id = store.start_run().unwrap();
        store
            .save_findings(
                run_id,
                &[
                    Finding::new("AZ-NSG-OPEN-001", Service::NetworkSecurityGroups, "nsg1", "NSG allows * to port 22", Severity::High),
                    Finding::enumeration_error(Service::Storage, &"throttled"),
                ],
            )
            .unwrap();
        store.finish_run(run_id).unwrap();

        let all = render_findings(&store.get_all_findings().unwrap(), OutputFormat::Console).unwrap();
        assert!(all.ends_with("Totals: 1 high, 1 medium, 1 low (1 scan errors)\n"));

        let high_only = FindingFilter {
            severities: vec![Severity::High],
            ..Default::default()
        };
        let filtered = render_findings(&store.get_findings(&high_only).unwrap(), OutputFormat::Console).unwrap();
        assert!(filtered.contains("AZ-NSG-OPEN-001"));
        assert!(!filtered.contains("AZ-VM-PUBIP-001"));
        assert!(filtered.ends_with("Totals: 1 high, 0 medium, 0 low\n"));
    }

    #[test]
    fn findings_sarif_uses_run_id() {
        let store = recorded();
        let out = render_findings(&store.get_all_findings().unwrap(), OutputFormat::Sarif).unwrap();
        assert!(out.contains("azposture/run-1"));
    }

    #[test]
    fn runs_and_trend_render() {
        let store = recorded();
        let runs = store.get_all_runs().unwrap();
        assert_eq!(runs[0].status, RunStatus::Finished);
        assert!(render_runs(&runs, OutputFormat::Console).unwrap().contains("finished"));

        let trend = store.get_findings_trend().unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&render_trend(&trend, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json[0]["finding_count"], 1);
        assert_eq!(json[0]["status"], "finished");
    }

    #[test]
    fn empty_history_messages() {
        assert_eq!(render_runs(&[], OutputFormat::Console).unwrap(), "No runs recorded.\n");
        assert_eq!(
            render_findings(&[], OutputFormat::Console).unwrap(),
            "No findings recorded.\n"
        );
    }
}
