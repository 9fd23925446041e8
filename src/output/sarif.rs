use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::rules::{Finding, RuleEngine, RuleMetadata, Severity, ERROR_RULE_ID};

use serde_json::{json, Value};

/// Render findings as SARIF 2.1.0.
///
/// Cloud resources have no file location, so each result points at its ARM
/// resource id through a logical location.
pub fn render(findings: &[Finding], run_id: Option<i64>) -> Result<String> {
    let known: HashMap<String, RuleMetadata> = RuleEngine::new()
        .list_rules()
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect();

    let mut referenced: BTreeMap<&str, Severity> = BTreeMap::new();
    for f in findings {
        referenced.entry(f.rule_id.as_str()).or_insert(f.severity);
    }

    let rules: Vec<Value> = referenced
        .into_iter()
        .map(|(rule_id, observed)| match known.get(rule_id) {
            Some(meta) => json!({
                "id": meta.id,
                "name": meta.name,
                "shortDescription": { "text": meta.name },
                "fullDescription": { "text": meta.description },
                "defaultConfiguration": {
                    "level": severity_to_sarif_level(meta.default_severity),
                },
                "properties": { "tags": [meta.service.as_str()] },
            }),
            None if rule_id == ERROR_RULE_ID => json!({
                "id": ERROR_RULE_ID,
                "name": "EnumerationError",
                "shortDescription": { "text": "A service could not be enumerated" },
                "defaultConfiguration": { "level": "note" },
            }),
            None => json!({
                "id": rule_id,
                "name": rule_id,
                "shortDescription": { "text": rule_id },
                "defaultConfiguration": {
                    "level": severity_to_sarif_level(observed),
                },
            }),
        })
        .collect();

    let results: Vec<Value> = findings
        .iter()
        .map(|f| {
            let mut result = json!({
                "ruleId": f.rule_id,
                "level": severity_to_sarif_level(f.severity),
                "message": { "text": f.title },
                "properties": {
                    "service": f.service.as_str(),
                    "severity": f.severity.as_str(),
                    "evidence": f.evidence,
                },
            });

            if f.resource_id != "-" {
                let mut location = json!({
                    "fullyQualifiedName": f.resource_id,
                    "kind": "resource",
                });
                if let Some(name) = &f.resource_name {
                    location["name"] = json!(name);
                }
                result["locations"] = json!([{ "logicalLocations": [location] }]);
            }

            if !f.remediation.is_empty() {
                result["fixes"] = json!([{
                    "description": { "text": f.remediation.join("\n") },
                }]);
            }

            result
        })
        .collect();

    let automation_id = match run_id {
        Some(id) => format!("azposture/run-{id}"),
        None => "azposture/adhoc".to_string(),
    };

    let sarif = json!({
        "$schema": "https://docs.oasis-open.org/sarif/sarif/v2.1.0/errata01/os/schemas/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "azposture",
                    "version": env!("CARGO_PKG_VERSION"),
                    "semanticVersion": env!("CARGO_PKG_VERSION"),
                    "rules": rules,
                },
            },
            "results": results,
            "automationDetails": {
                "id": automation_id,
                "guid": uuid::Uuid::new_v4().to_string(),
            },
        }],
    });

    let output = serde_json::to_string_pretty(&sarif)?;
    Ok(output)
}

fn severity_to_sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low => "note",
    }
}
