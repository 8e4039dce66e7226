//! Core data types for dependency risk reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved package: one entry per name in a resolved set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Registry-unique package name
    pub name: String,
    /// Concrete resolved version (never a range)
    pub version: String,
    /// Whether this package is declared in the manifest (vs transitive)
    pub is_direct: bool,
    /// Whether this package is only reachable through a development dependency
    pub is_dev: bool,
}

impl PackageRecord {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        is_direct: bool,
        is_dev: bool,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            is_direct,
            is_dev,
        }
    }
}

/// Normalized registry metadata for a single package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub name: String,
    /// Version the metadata describes
    pub version: String,
    /// Publish time of the version, or the package's last-modified/created time
    pub last_published: Option<DateTime<Utc>>,
    /// Downloads over the last seven days
    pub weekly_downloads: Option<u64>,
    pub description: Option<String>,
}

/// Known advisory affecting a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    /// Advisory identifier (falls back to the package name)
    pub id: String,
    /// Title of the first contributing advisory, "Unknown" if absent
    pub title: String,
    /// Raw advisory severity, e.g. "moderate" or "CRITICAL"
    pub severity: String,
}

/// Kind of risk a flag reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskType {
    /// Not published within the configured window
    Stale,
    /// Below the download threshold, unknown to the registry, or no download data
    LowUsage,
    /// Affected by a known vulnerability
    Security,
}

impl RiskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::LowUsage => "low-usage",
            Self::Security => "security",
        }
    }
}

impl std::fmt::Display for RiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a risk flag, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for RiskSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Evidence that triggered a flag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_published: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub months_since_publish: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_downloads: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerability: Option<VulnerabilityRecord>,
}

/// A typed, severity-ranked finding attached to one package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    #[serde(rename = "type")]
    pub risk_type: RiskType,
    pub severity: RiskSeverity,
    /// Human-readable explanation including the observed value and threshold
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FlagMetadata>,
}

/// Assessment of one resolved package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub package: PackageRecord,
    pub registry_metadata: Option<RegistryMetadata>,
    pub risks: Vec<RiskFlag>,
}

impl AuditResult {
    /// Whether any flag was raised for this package
    pub fn is_flagged(&self) -> bool {
        !self.risks.is_empty()
    }

    /// The flag of the given type, if raised
    pub fn risk(&self, risk_type: RiskType) -> Option<&RiskFlag> {
        self.risks.iter().find(|r| r.risk_type == risk_type)
    }

    pub fn highest_severity(&self) -> Option<RiskSeverity> {
        self.risks.iter().map(|r| r.severity).max()
    }
}

/// Complete audit report for an npm project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// Name of the audited project
    pub project_name: String,
    /// Path to the audited project
    pub project_path: String,
    /// Timestamp when audit was performed
    pub timestamp: DateTime<Utc>,
    /// One result per resolved package, in resolution order
    pub results: Vec<AuditResult>,
    /// Summary statistics
    pub summary: AuditSummary,
}

/// Summary statistics for an audit report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_packages: usize,
    pub flagged: usize,
    pub security: usize,
    pub stale: usize,
    pub low_usage: usize,
    pub high_severity: usize,
}

impl AuditReport {
    /// Create a new audit report
    pub fn new(project_name: String, project_path: String, results: Vec<AuditResult>) -> Self {
        let mut report = Self {
            project_name,
            project_path,
            timestamp: Utc::now(),
            results,
            summary: AuditSummary::default(),
        };
        report.compute_summary();
        report
    }

    /// Compute summary statistics from results
    pub fn compute_summary(&mut self) {
        let mut summary = AuditSummary {
            total_packages: self.results.len(),
            ..AuditSummary::default()
        };

        for result in &self.results {
            if result.is_flagged() {
                summary.flagged += 1;
            }
            if result.risk(RiskType::Security).is_some() {
                summary.security += 1;
            }
            if result.risk(RiskType::Stale).is_some() {
                summary.stale += 1;
            }
            if result.risk(RiskType::LowUsage).is_some() {
                summary.low_usage += 1;
            }
            if result.highest_severity() == Some(RiskSeverity::High) {
                summary.high_severity += 1;
            }
        }

        self.summary = summary;
    }

    pub fn has_risks(&self) -> bool {
        self.results.iter().any(AuditResult::is_flagged)
    }

    /// Whether any package carries a flag at or above `severity`
    pub fn has_risks_at_or_above(&self, severity: RiskSeverity) -> bool {
        self.results
            .iter()
            .any(|r| r.highest_severity().is_some_and(|s| s >= severity))
    }

    /// Results carrying at least one flag
    pub fn flagged(&self) -> impl Iterator<Item = &AuditResult> {
        self.results.iter().filter(|r| r.is_flagged())
    }
}
