use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::Service;

/// Rule id carried by the synthetic finding that stands in for a failed
/// enumerator.
pub const ERROR_RULE_ID: &str = "ERROR";

/// A misconfiguration reported against one cloud resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable rule identifier (e.g., "AZ-Storage-Encryption-001").
    pub rule_id: String,
    /// Enumerator category that produced the resource.
    pub service: Service,
    /// Provider resource id, or "-" when no single resource applies.
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    /// Human-readable summary.
    pub title: String,
    pub severity: Severity,
    /// Structured data supporting the finding. Only observed values go here.
    #[serde(default = "empty_evidence")]
    pub evidence: Value,
    /// Ordered remediation steps.
    #[serde(default)]
    pub remediation: Vec<String>,
}

fn empty_evidence() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Finding {
    /// Start a finding with empty evidence and remediation.
    pub fn new(
        rule_id: impl Into<String>,
        service: Service,
        resource_id: impl Into<String>,
        title: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            service,
            resource_id: resource_id.into(),
            resource_name: None,
            resource_group: None,
            title: title.into(),
            severity,
            evidence: empty_evidence(),
            remediation: Vec::new(),
        }
    }

    /// The synthetic finding recorded when an enumerator fails.
    pub fn enumeration_error(service: Service, error: &dyn std::fmt::Display) -> Self {
        let mut finding = Self::new(
            ERROR_RULE_ID,
            service,
            "-",
            format!("Error scanning {service}"),
            Severity::Low,
        );
        finding.evidence = Value::String(error.to_string());
        finding
    }

    pub fn with_resource(mut self, name: &str, resource_group: Option<&str>) -> Self {
        self.resource_name = Some(name.to_string());
        self.resource_group = resource_group.map(str::to_string);
        self
    }

    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_remediation<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remediation = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_error(&self) -> bool {
        self.rule_id == ERROR_RULE_ID
    }

    /// Name to show for the affected resource.
    pub fn display_resource(&self) -> &str {
        self.resource_name.as_deref().unwrap_or(&self.resource_id)
    }
}

/// Closed severity ranking. Declaration order gives `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "high")]
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::High, Severity::Medium, Severity::Low];

    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata about a rule, used for `list-rules` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default_severity: Severity,
    /// Inventory this rule consumes.
    pub service: Service,
}
