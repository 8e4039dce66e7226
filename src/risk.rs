//! Risk assessment: staleness, adoption, and known vulnerabilities

use crate::config::AuditConfig;
use crate::types::{
    AuditResult, FlagMetadata, PackageRecord, RegistryMetadata, RiskFlag, RiskSeverity, RiskType,
    VulnerabilityRecord,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Average days per month used for the staleness calculation
const DAYS_PER_MONTH: f64 = 30.44;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Assess every package against the configured thresholds
///
/// Produces exactly one result per package, in input order.
pub fn assess(
    packages: &[PackageRecord],
    registry: &HashMap<String, RegistryMetadata>,
    vulnerabilities: &HashMap<String, VulnerabilityRecord>,
    config: &AuditConfig,
) -> Vec<AuditResult> {
    assess_at(packages, registry, vulnerabilities, config, Utc::now())
}

/// Same as [`assess`], measuring staleness relative to `now`
pub fn assess_at(
    packages: &[PackageRecord],
    registry: &HashMap<String, RegistryMetadata>,
    vulnerabilities: &HashMap<String, VulnerabilityRecord>,
    config: &AuditConfig,
    now: DateTime<Utc>,
) -> Vec<AuditResult> {
    packages
        .iter()
        .map(|package| {
            let metadata = registry.get(&package.name);
            let vulnerability = vulnerabilities.get(&package.name);
            AuditResult {
                package: package.clone(),
                registry_metadata: metadata.cloned(),
                risks: assess_package(metadata, vulnerability, config, now),
            }
        })
        .collect()
}

/// Evaluate the risk axes for a single package
pub fn assess_package(
    metadata: Option<&RegistryMetadata>,
    vulnerability: Option<&VulnerabilityRecord>,
    config: &AuditConfig,
    now: DateTime<Utc>,
) -> Vec<RiskFlag> {
    let Some(metadata) = metadata else {
        // Unknown packages cannot be scored on freshness or downloads
        return vec![RiskFlag {
            risk_type: RiskType::LowUsage,
            severity: RiskSeverity::Medium,
            reason: "Package not found in registry".to_string(),
            metadata: None,
        }];
    };

    let mut risks = Vec::new();
    risks.extend(check_staleness(metadata, config, now));
    risks.extend(check_adoption(metadata, config));
    risks.extend(vulnerability.map(check_vulnerability));
    risks
}

/// Months elapsed between `published` and `now`
///
/// The result is signed. A publish date in the future (clock skew, bad
/// registry data) gives negative months and is never stale, instead of being
/// scored by its absolute distance from `now`.
pub fn months_since(published: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed = now.signed_duration_since(published);
    let days = elapsed.num_milliseconds() as f64 / MILLIS_PER_DAY;
    days / DAYS_PER_MONTH
}

fn check_staleness(
    metadata: &RegistryMetadata,
    config: &AuditConfig,
    now: DateTime<Utc>,
) -> Option<RiskFlag> {
    let published = metadata.last_published?;
    let months = months_since(published, now);

    if months <= config.stale_months {
        return None;
    }

    let severity = if months > 24.0 {
        RiskSeverity::High
    } else if months > 18.0 {
        RiskSeverity::Medium
    } else {
        RiskSeverity::Low
    };

    Some(RiskFlag {
        risk_type: RiskType::Stale,
        severity,
        reason: format!(
            "Last published {:.1} months ago (threshold: {} months)",
            months, config.stale_months
        ),
        metadata: Some(FlagMetadata {
            last_published: Some(published),
            months_since_publish: Some(months),
            ..FlagMetadata::default()
        }),
    })
}

fn check_adoption(metadata: &RegistryMetadata, config: &AuditConfig) -> Option<RiskFlag> {
    let Some(downloads) = metadata.weekly_downloads else {
        return Some(RiskFlag {
            risk_type: RiskType::LowUsage,
            severity: RiskSeverity::Low,
            reason: "Download statistics unavailable - package may have very low usage".to_string(),
            metadata: None,
        });
    };

    if downloads >= config.min_downloads {
        return None;
    }

    let severity = match downloads {
        0..=99 => RiskSeverity::High,
        100..=499 => RiskSeverity::Medium,
        _ => RiskSeverity::Low,
    };

    Some(RiskFlag {
        risk_type: RiskType::LowUsage,
        severity,
        reason: format!(
            "Low weekly downloads: {} (threshold: {})",
            downloads, config.min_downloads
        ),
        metadata: Some(FlagMetadata {
            weekly_downloads: Some(downloads),
            ..FlagMetadata::default()
        }),
    })
}

fn check_vulnerability(vulnerability: &VulnerabilityRecord) -> RiskFlag {
    let title = if vulnerability.title.is_empty() {
        "Unknown vulnerability"
    } else {
        vulnerability.title.as_str()
    };

    RiskFlag {
        risk_type: RiskType::Security,
        severity: map_advisory_severity(&vulnerability.severity),
        reason: format!("Security vulnerability: {}", title),
        metadata: Some(FlagMetadata {
            vulnerability: Some(vulnerability.clone()),
            ..FlagMetadata::default()
        }),
    }
}

/// Map an advisory severity string onto a flag severity
///
/// Unrecognized values map to `Medium` so a reported vulnerability is never dropped.
pub fn map_advisory_severity(severity: &str) -> RiskSeverity {
    match severity.trim().to_lowercase().as_str() {
        "critical" | "high" => RiskSeverity::High,
        "moderate" | "medium" => RiskSeverity::Medium,
        "low" | "info" => RiskSeverity::Low,
        _ => RiskSeverity::Medium,
    }
}
