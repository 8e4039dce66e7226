//! Known vulnerabilities from `npm audit --json`

use crate::error::Result;
use crate::types::VulnerabilityRecord;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct NpmAuditOutput {
    #[serde(default)]
    vulnerabilities: HashMap<String, NpmVulnerability>,
}

#[derive(Debug, Deserialize)]
struct NpmVulnerability {
    name: Option<String>,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    via: Vec<Via>,
}

/// A `via` entry is either an advisory or the name of a vulnerable dependency
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Via {
    Advisory(Advisory),
    Package(String),
}

#[derive(Debug, Deserialize)]
struct Advisory {
    name: Option<String>,
    title: Option<String>,
}

/// Run `npm audit` in `project_path` and index the findings by package name
///
/// Never fails: a missing npm binary or unusable output yields an empty map.
pub async fn fetch_vulnerabilities(project_path: &Path) -> HashMap<String, VulnerabilityRecord> {
    let npm_cmd = if cfg!(target_os = "windows") { "npm.cmd" } else { "npm" };

    let output = match Command::new(npm_cmd)
        .args(["audit", "--json"])
        .current_dir(project_path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!("Could not run npm audit, skipping vulnerability check: {}", e);
            return HashMap::new();
        }
    };

    // npm audit exits non-zero when it finds vulnerabilities but still prints JSON
    if output.stdout.is_empty() {
        debug!("npm audit produced no output (exit status {})", output.status);
        return HashMap::new();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_audit_output(&stdout) {
        Ok(vulnerabilities) => {
            debug!("npm audit reported {} vulnerable packages", vulnerabilities.len());
            vulnerabilities
        }
        Err(e) => {
            warn!("Failed to parse npm audit output: {}", e);
            HashMap::new()
        }
    }
}

/// Parse npm audit JSON (lockfile v2+ report format)
pub fn parse_audit_output(output: &str) -> Result<HashMap<String, VulnerabilityRecord>> {
    let report: NpmAuditOutput = serde_json::from_str(output)?;

    let records = report
        .vulnerabilities
        .into_iter()
        .map(|(key, vuln)| {
            let name = vuln.name.unwrap_or(key);
            let advisory = match vuln.via.first() {
                Some(Via::Advisory(advisory)) => Some(advisory),
                Some(Via::Package(dependency)) => {
                    debug!("{} is vulnerable through {}", name, dependency);
                    None
                }
                None => None,
            };

            let record = VulnerabilityRecord {
                id: advisory
                    .and_then(|a| a.name.clone())
                    .unwrap_or_else(|| name.clone()),
                title: advisory
                    .and_then(|a| a.title.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                severity: vuln.severity,
            };
            (name, record)
        })
        .collect();

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUDIT_JSON: &str = r#"{
        "auditReportVersion": 2,
        "vulnerabilities": {
            "minimist": {
                "name": "minimist",
                "severity": "critical",
                "isDirect": false,
                "via": [
                    {
                        "source": 1097678,
                        "name": "minimist",
                        "dependency": "minimist",
                        "title": "Prototype Pollution in minimist",
                        "url": "https://github.com/advisories/GHSA-xvch-5gv4-984h",
                        "severity": "critical"
                    }
                ]
            },
            "mkdirp": {
                "name": "mkdirp",
                "severity": "moderate",
                "via": ["minimist"]
            },
            "odd": {
                "severity": "whatever",
                "via": []
            }
        },
        "metadata": {
            "vulnerabilities": { "info": 0, "low": 0, "moderate": 1, "high": 0, "critical": 1 }
        }
    }"#;

    #[test]
    fn test_parse_advisory_entry() {
        let records = parse_audit_output(AUDIT_JSON).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(
            records["minimist"],
            VulnerabilityRecord {
                id: "minimist".to_string(),
                title: "Prototype Pollution in minimist".to_string(),
                severity: "critical".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_transitive_entry_without_title() {
        let records = parse_audit_output(AUDIT_JSON).unwrap();

        let mkdirp = &records["mkdirp"];
        assert_eq!(mkdirp.title, "Unknown");
        assert_eq!(mkdirp.id, "mkdirp");
        assert_eq!(mkdirp.severity, "moderate");

        // Falls back to the map key when `name` is missing
        assert_eq!(records["odd"].severity, "whatever");
    }

    #[test]
    fn test_parse_clean_report() {
        let records =
            parse_audit_output(r#"{"auditReportVersion": 2, "vulnerabilities": {}}"#).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_audit_output("npm ERR! code ENOLOCK").is_err());
    }
}
