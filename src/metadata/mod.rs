//! Collaborators that fetch registry metadata and vulnerability data

pub mod npm_audit;
pub mod npm_registry;

pub use npm_audit::{fetch_vulnerabilities, parse_audit_output};
pub use npm_registry::RegistryClient;
