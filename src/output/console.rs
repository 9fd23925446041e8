use crate::rules::policy::PolicyVerdict;
use crate::rules::{Finding, Severity};

/// Render findings for a terminal, grouped by severity then service.
/// Enumeration failures are listed separately after the findings.
pub fn render(findings: &[Finding], verdict: &PolicyVerdict, run_id: Option<i64>) -> String {
    let mut output = String::new();

    if let Some(id) = run_id {
        output.push_str(&format!("\n  Run #{id}\n"));
    }

    let (errors, mut sorted): (Vec<&Finding>, Vec<&Finding>) =
        findings.iter().partition(|f| f.is_error());

    if sorted.is_empty() {
        output.push_str("\n  No findings detected.\n\n");
    } else {
        sorted.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.service.cmp(&b.service))
                .then_with(|| a.display_resource().cmp(b.display_resource()))
        });

        output.push_str(&format!("\n  {} finding(s) detected:\n\n", sorted.len()));
        for finding in &sorted {
            push_finding(&mut output, finding);
        }
    }

    if !errors.is_empty() {
        output.push_str(&format!("  {} service(s) could not be scanned:\n\n", errors.len()));
        for error in &errors {
            let detail = match &error.evidence {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            output.push_str(&format!("  [ERROR]  {}: {}\n", error.service, detail));
        }
        output.push('\n');
    }

    let totals: Vec<String> = Severity::ALL
        .iter()
        .map(|sev| {
            let count = sorted.iter().filter(|f| f.severity == *sev).count();
            format!("{} {}", count, sev.as_str().to_lowercase())
        })
        .collect();
    output.push_str(&format!("  Totals: {}\n", totals.join(", ")));

    let status = if verdict.pass { "PASS" } else { "FAIL" };
    output.push_str(&format!(
        "  Result: {} (threshold: {}, highest: {})\n\n",
        status,
        verdict
            .fail_threshold
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".into()),
        verdict
            .highest_severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".into()),
    ));

    output
}

fn push_finding(output: &mut String, finding: &Finding) {
    let severity_tag = match finding.severity {
        Severity::High => "[HIGH]  ",
        Severity::Medium => "[MEDIUM]",
        Severity::Low => "[LOW]   ",
    };

    output.push_str(&format!(
        "  {} {} {}\n",
        severity_tag, finding.rule_id, finding.title
    ));

    let mut resource = format!("{} {}", finding.service, finding.display_resource());
    if let Some(group) = &finding.resource_group {
        resource.push_str(&format!(" (resource group {group})"));
    }
    output.push_str(&format!("           at {}\n", resource));

    if !is_empty_object(&finding.evidence) {
        let pretty = serde_json::to_string_pretty(&finding.evidence)
            .unwrap_or_else(|_| finding.evidence.to_string());
        output.push_str("           evidence:\n");
        for line in pretty.lines() {
            output.push_str(&format!("             {}\n", line));
        }
    }

    for step in &finding.remediation {
        output.push_str(&format!("           fix: {}\n", step));
    }
    output.push('\n');
}

fn is_empty_object(value: &serde_json::Value) -> bool {
    value.as_object().is_some_and(|map| map.is_empty())
}
