use crate::error::Result;
use crate::rules::policy::PolicyVerdict;
use crate::rules::Finding;

use serde::Serialize;

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<i64>,
    findings: &'a [Finding],
    verdict: &'a PolicyVerdict,
}

/// Render findings as a JSON report.
pub fn render(findings: &[Finding], verdict: &PolicyVerdict, run_id: Option<i64>) -> Result<String> {
    let report = JsonReport {
        run_id,
        findings,
        verdict,
    };
    let json = serde_json::to_string_pretty(&report)?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Service;
    use crate::rules::policy::Policy;
    use serde_json::Value;

    #[test]
    fn report_carries_run_and_severity_strings() {
        let findings = vec![Finding::enumeration_error(Service::VirtualMachines, &"creds missing")];
        let verdict = Policy::default().evaluate(&findings);
        let rendered = render(&findings, &verdict, Some(7)).unwrap();

        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["run_id"], 7);
        assert_eq!(parsed["findings"][0]["rule_id"], "ERROR");
        assert_eq!(parsed["findings"][0]["service"], "vms");
        assert_eq!(parsed["findings"][0]["severity"], "Low");
        assert_eq!(parsed["findings"][0]["remediation"], Value::Array(vec![]));
        assert_eq!(parsed["verdict"]["scan_errors"], 1);
    }

    #[test]
    fn run_id_omitted_when_not_persisted() {
        let verdict = Policy::default().evaluate(&[]);
        let parsed: Value = serde_json::from_str(&render(&[], &verdict, None).unwrap()).unwrap();
        assert!(parsed.get("run_id").is_none());
    }
}
