//! Main audit orchestration logic

use crate::config::AuditConfig;
use crate::error::Result;
use crate::metadata::{fetch_vulnerabilities, RegistryClient};
use crate::parser::parse_project;
use crate::risk::assess;
use crate::types::AuditReport;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Audit an npm project and generate a risk report
pub async fn audit_project(project_path: &Path, config: &AuditConfig) -> Result<AuditReport> {
    info!("Starting audit of project at: {}", project_path.display());
    config.validate()?;

    let (manifest, mut packages) = parse_project(project_path, config.skip_dev)?;
    let project_name = manifest.name.unwrap_or_else(|| {
        project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string())
    });

    packages.retain(|pkg| {
        let ignored = config.ignored_dependencies.contains(&pkg.name);
        if ignored {
            debug!("Skipping ignored dependency: {}", pkg.name);
        }
        !ignored
    });

    info!(
        "Found {} packages to audit for project '{}'",
        packages.len(),
        project_name
    );

    // The client and its cache live for this run only
    let mut registry = RegistryClient::new(&config.network)?;
    let registry_index = registry.fetch_all(&packages).await;
    info!("Fetched metadata for {} packages", registry_index.len());

    let vulnerabilities = if config.skip_vulnerability_check {
        debug!("Vulnerability check disabled");
        HashMap::new()
    } else {
        fetch_vulnerabilities(project_path).await
    };

    let results = assess(&packages, &registry_index, &vulnerabilities, config);
    let report = AuditReport::new(project_name, project_path.display().to_string(), results);

    info!(
        "Audit complete: {}/{} flagged ({} security, {} stale, {} low usage)",
        report.summary.flagged,
        report.summary.total_packages,
        report.summary.security,
        report.summary.stale,
        report.summary.low_usage,
    );

    Ok(report)
}
