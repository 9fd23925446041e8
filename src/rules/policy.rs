use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{Finding, Severity};

/// Final pass/fail decision after applying the
/// ignore list and severity overrides to raw findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub pass: bool,
    pub total_findings: usize,
    pub effective_findings: usize,
    /// Enumerators that failed during the scan.
    pub scan_errors: usize,
    pub highest_severity: Option<Severity>,
    pub fail_threshold: Option<Severity>,
}

/// Policy configuration loaded from `.azposture.toml`.
///
/// Error findings from failed enumerators are never ignored, re-graded, or
/// counted toward failure: a broken scan must stay visible without turning
/// into a failing exit code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Minimum severity to fail the scan. Unset means always pass.
    #[serde(default)]
    pub fail_on: Option<Severity>,
    /// Rule IDs to ignore entirely.
    #[serde(default)]
    pub ignore_rules: HashSet<String>,
    /// Per-rule severity overrides.
    #[serde(default)]
    pub overrides: HashMap<String, Severity>,
}

impl Policy {
    /// Evaluate findings against this policy and produce a verdict.
    pub fn evaluate(&self, findings: &[Finding]) -> PolicyVerdict {
        let scan_errors = findings.iter().filter(|f| f.is_error()).count();
        let effective: Vec<Severity> = findings
            .iter()
            .filter(|f| !f.is_error() && !self.ignore_rules.contains(&f.rule_id))
            .map(|f| self.effective_severity(f))
            .collect();

        let highest = effective.iter().copied().max();
        let failed = self
            .fail_on
            .is_some_and(|threshold| effective.iter().any(|&sev| sev >= threshold));

        PolicyVerdict {
            pass: !failed,
            total_findings: findings.len(),
            effective_findings: effective.len(),
            scan_errors,
            highest_severity: highest,
            fail_threshold: self.fail_on,
        }
    }

    /// Filter findings: remove ignored rules, apply overrides.
    pub fn apply(&self, findings: &[Finding]) -> Vec<Finding> {
        findings
            .iter()
            .filter(|f| f.is_error() || !self.ignore_rules.contains(&f.rule_id))
            .map(|f| {
                let mut f = f.clone();
                if !f.is_error() {
                    f.severity = self.effective_severity(&f);
                }
                f
            })
            .collect()
    }

    fn effective_severity(&self, finding: &Finding) -> Severity {
        self.overrides
            .get(&finding.rule_id)
            .copied()
            .unwrap_or(finding.severity)
    }
}
