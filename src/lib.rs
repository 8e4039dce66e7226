//! # npm_warden
//!
//! Audits an npm project's dependencies for maintenance and security risk:
//! - **Resolution**: merges `package.json` declarations with the `package-lock.json`
//!   tree into one deduplicated package set with direct/dev provenance
//! - **Staleness**: flags packages not published within a configured window
//! - **Adoption**: flags packages with low weekly downloads or no registry presence
//! - **Vulnerabilities**: flags packages reported by `npm audit`
//!
//! ## Quick Start
//!
//! ```no_run
//! use npm_warden::{audit_project, AuditConfig};
//! use std::path::Path;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = AuditConfig::default();
//! let report = audit_project(Path::new("."), &config).await?;
//!
//! for result in report.results {
//!     for risk in &result.risks {
//!         println!("{}: {} ({})", result.package.name, risk.reason, risk.severity);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The resolver and risk engine are pure and can be used without network access:
//!
//! ```
//! use npm_warden::{assess, parse_manifest, resolve, AuditConfig};
//! use std::collections::HashMap;
//!
//! let manifest = parse_manifest(r#"{"dependencies": {"a": "^1.0.0"}}"#).unwrap();
//! let packages = resolve(&manifest, None, false);
//! let results = assess(&packages, &HashMap::new(), &HashMap::new(), &AuditConfig::default());
//!
//! // Unknown to the registry: one medium low-usage flag
//! assert_eq!(results[0].risks.len(), 1);
//! ```

mod audit;
mod config;
mod error;
mod metadata;
mod parser;
mod report;
mod risk;
mod types;

// Re-export public API
pub use audit::audit_project;
pub use config::{AuditConfig, AuditConfigBuilder, NetworkConfig};
pub use error::{AuditError, Result};
pub use metadata::{fetch_vulnerabilities, parse_audit_output, RegistryClient};
pub use parser::{
    normalize_version, parse_manifest, parse_project, read_lock_file, read_manifest, resolve,
    DependencyMap, LockDependency, LockFile, Manifest,
};
pub use report::{render_json, render_text};
pub use risk::{assess, assess_at, assess_package, map_advisory_severity, months_since};
pub use types::{
    AuditReport, AuditResult, AuditSummary, FlagMetadata, PackageRecord, RegistryMetadata,
    RiskFlag, RiskSeverity, RiskType, VulnerabilityRecord,
};
