//! Text and JSON rendering of audit reports

use crate::error::Result;
use crate::risk::months_since;
use crate::types::{AuditReport, AuditResult, RiskFlag, RiskSeverity, RiskType, VulnerabilityRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

const RULE_WIDTH: usize = 60;
const DESCRIPTION_LIMIT: usize = 80;

/// Section order of the text report
const SECTIONS: [(RiskType, &str); 3] = [
    (RiskType::Security, "SECURITY VULNERABILITIES"),
    (RiskType::Stale, "STALE PACKAGES"),
    (RiskType::LowUsage, "LOW USAGE PACKAGES"),
];

/// Human-readable report grouped by risk type
pub fn render_text(report: &AuditReport) -> String {
    if !report.has_risks() {
        return "\nNo risks found! All dependencies look healthy.\n".to_string();
    }

    let mut out = String::from("\n");
    out.push_str("Dependency Risk Report\n");
    out.push_str(&"=".repeat(RULE_WIDTH));
    out.push_str("\n\n");

    for (risk_type, heading) in SECTIONS {
        let entries: Vec<(&AuditResult, &RiskFlag)> = report
            .flagged()
            .filter_map(|r| r.risk(risk_type).map(|flag| (r, flag)))
            .collect();
        if entries.is_empty() {
            continue;
        }

        out.push_str(heading);
        out.push('\n');
        out.push_str(&"-".repeat(RULE_WIDTH));
        out.push('\n');
        for (result, flag) in entries {
            out.push_str(&format_package(result, flag, report.timestamp));
        }
        out.push('\n');
    }

    let summary = &report.summary;
    out.push_str("Summary\n");
    out.push_str(&"-".repeat(RULE_WIDTH));
    out.push('\n');
    out.push_str(&format!("Total packages audited: {}\n", summary.total_packages));
    out.push_str(&format!("Packages with risks: {}\n", summary.flagged));
    out.push_str(&format!("  - Security: {}\n", summary.security));
    out.push_str(&format!("  - Stale: {}\n", summary.stale));
    out.push_str(&format!("  - Low usage: {}\n", summary.low_usage));

    out
}

fn format_package(result: &AuditResult, flag: &RiskFlag, now: DateTime<Utc>) -> String {
    let pkg = &result.package;
    let mut out = format!("\n{}@{}", pkg.name, pkg.version);
    if pkg.is_direct {
        out.push_str(" (direct)");
    }
    if pkg.is_dev {
        out.push_str(" [dev]");
    }
    out.push('\n');

    out.push_str(&format!(
        "  Risk: {} - {} severity\n",
        flag.risk_type.as_str().to_uppercase(),
        flag.severity.to_string().to_uppercase()
    ));
    out.push_str(&format!("  Reason: {}\n", flag.reason));

    if let Some(meta) = &result.registry_metadata {
        if let Some(published) = meta.last_published {
            out.push_str(&format!(
                "  Last published: {} months ago\n",
                months_since(published, now).round()
            ));
        }
        if let Some(downloads) = meta.weekly_downloads {
            out.push_str(&format!("  Weekly downloads: {}\n", group_thousands(downloads)));
        }
        if let Some(description) = &meta.description {
            out.push_str(&format!("  Description: {}\n", truncate(description, DESCRIPTION_LIMIT)));
        }
    }

    out
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    timestamp: DateTime<Utc>,
    summary: JsonSummary,
    packages: Vec<JsonPackage<'a>>,
}

#[derive(Serialize)]
struct JsonSummary {
    total: usize,
    flagged: usize,
    #[serde(rename = "byType")]
    by_type: JsonByType,
}

#[derive(Serialize)]
struct JsonByType {
    security: usize,
    stale: usize,
    #[serde(rename = "low-usage")]
    low_usage: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonPackage<'a> {
    name: &'a str,
    version: &'a str,
    is_direct: bool,
    is_dev: bool,
    metadata: Option<JsonMetadata<'a>>,
    risks: Vec<JsonRisk<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonMetadata<'a> {
    last_published: Option<DateTime<Utc>>,
    weekly_downloads: Option<u64>,
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonRisk<'a> {
    #[serde(rename = "type")]
    risk_type: RiskType,
    severity: RiskSeverity,
    reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    vulnerability: Option<&'a VulnerabilityRecord>,
}

/// Machine-readable report listing flagged packages only
pub fn render_json(report: &AuditReport) -> Result<String> {
    let summary = &report.summary;
    let json = JsonReport {
        timestamp: report.timestamp,
        summary: JsonSummary {
            total: summary.total_packages,
            flagged: summary.flagged,
            by_type: JsonByType {
                security: summary.security,
                stale: summary.stale,
                low_usage: summary.low_usage,
            },
        },
        packages: report
            .flagged()
            .map(|r| JsonPackage {
                name: &r.package.name,
                version: &r.package.version,
                is_direct: r.package.is_direct,
                is_dev: r.package.is_dev,
                metadata: r.registry_metadata.as_ref().map(|m| JsonMetadata {
                    last_published: m.last_published,
                    weekly_downloads: m.weekly_downloads,
                    description: m.description.as_deref(),
                }),
                risks: r
                    .risks
                    .iter()
                    .map(|flag| JsonRisk {
                        risk_type: flag.risk_type,
                        severity: flag.severity,
                        reason: &flag.reason,
                        vulnerability: flag
                            .metadata
                            .as_ref()
                            .and_then(|m| m.vulnerability.as_ref()),
                    })
                    .collect(),
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&json)?)
}
