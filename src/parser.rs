//! Parser for package.json and package-lock.json, and resolution of the
//! combined dependency set

use crate::error::{AuditError, Result};
use crate::types::PackageRecord;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "package.json";
pub const LOCK_FILE: &str = "package-lock.json";
const YARN_LOCK_FILE: &str = "yarn.lock";

/// Name-keyed map that keeps declaration order
///
/// A repeated key keeps its first position and takes the last value.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyMap<T> {
    entries: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> DependencyMap<T> {
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: String, value: T) {
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }
}

impl<T> Default for DependencyMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for DependencyMap<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut map = Self::default();
        for (k, v) in iter {
            map.insert(k.into(), v);
        }
        map
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for DependencyMap<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = DependencyMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of package names")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut map = DependencyMap::default();
                while let Some((name, value)) = access.next_entry::<String, T>()? {
                    map.insert(name, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// The parts of package.json the resolver reads
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: DependencyMap<String>,
    #[serde(default)]
    pub dev_dependencies: DependencyMap<String>,
}

/// package-lock.json with a nested `dependencies` tree
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFile {
    pub name: Option<String>,
    pub lockfile_version: Option<u32>,
    pub dependencies: Option<DependencyMap<LockDependency>>,
}

/// One node of the lock file's dependency tree
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockDependency {
    pub version: String,
    #[serde(default)]
    pub dev: bool,
    pub dependencies: Option<DependencyMap<LockDependency>>,
}

/// Read and resolve the dependencies of the project at `project_path`
pub fn parse_project(
    project_path: &Path,
    skip_dev: bool,
) -> Result<(Manifest, Vec<PackageRecord>)> {
    let manifest = read_manifest(project_path)?;
    let lock = read_lock_file(project_path);
    let packages = resolve(&manifest, lock.as_ref(), skip_dev);
    Ok((manifest, packages))
}

/// Read package.json; a missing or malformed manifest is fatal
pub fn read_manifest(project_path: &Path) -> Result<Manifest> {
    let manifest_path = project_path.join(MANIFEST_FILE);

    if !manifest_path.exists() {
        return Err(AuditError::parse(format!(
            "{} not found at {}",
            MANIFEST_FILE,
            manifest_path.display()
        )));
    }

    let content = std::fs::read_to_string(&manifest_path)?;
    parse_manifest(&content)
}

pub fn parse_manifest(content: &str) -> Result<Manifest> {
    serde_json::from_str(content)
        .map_err(|e| AuditError::parse(format!("Invalid {}: {}", MANIFEST_FILE, e)))
}

/// Read package-lock.json, returning `None` when it is absent or unusable
pub fn read_lock_file(project_path: &Path) -> Option<LockFile> {
    let lock_path = project_path.join(LOCK_FILE);

    match std::fs::read_to_string(&lock_path) {
        Ok(content) => match serde_json::from_str::<LockFile>(&content) {
            Ok(lock) => Some(lock),
            Err(e) => {
                warn!("Ignoring malformed {}: {}", LOCK_FILE, e);
                None
            }
        },
        Err(_) => {
            if project_path.join(YARN_LOCK_FILE).exists() {
                warn!(
                    "{} detected but not supported, using {} only",
                    YARN_LOCK_FILE, MANIFEST_FILE
                );
            } else {
                debug!("No lock file found, using {} only", MANIFEST_FILE);
            }
            None
        }
    }
}

/// Strip leading range operators, leaving the bare version token
pub fn normalize_version(version: &str) -> &str {
    version.trim_start_matches(['^', '~', '>', '<', '='])
}

/// Ordered, name-unique package set
#[derive(Default)]
struct ResolvedSet {
    packages: Vec<PackageRecord>,
    index: HashMap<String, usize>,
}

impl ResolvedSet {
    fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.index.get(name).map(|&i| &self.packages[i])
    }

    /// Replace in place, or append a name seen for the first time
    fn upsert(&mut self, record: PackageRecord) {
        match self.index.get(&record.name) {
            Some(&i) => self.packages[i] = record,
            None => {
                self.index.insert(record.name.clone(), self.packages.len());
                self.packages.push(record);
            }
        }
    }
}

/// Merge manifest declarations with the lock file tree
///
/// Direct dependencies come first in declaration order, followed by names
/// first introduced by the lock file. A lock entry whose version differs from
/// the recorded one replaces it (last write wins in traversal order).
///
/// With `skip_dev`, lock nodes are skipped by their lock-tree dev context
/// (own marker or a dev ancestor), so a devDependency that the lock marks as
/// needed at runtime is still audited. The recorded `is_dev` of a direct
/// dependency always follows the manifest.
pub fn resolve(
    manifest: &Manifest,
    lock: Option<&LockFile>,
    skip_dev: bool,
) -> Vec<PackageRecord> {
    let mut resolved = ResolvedSet::default();

    let mut direct: DependencyMap<&str> = manifest
        .dependencies
        .iter()
        .map(|(name, version)| (name, version.as_str()))
        .collect();
    if !skip_dev {
        for (name, version) in manifest.dev_dependencies.iter() {
            direct.insert(name.to_string(), version.as_str());
        }
    }

    for (name, version) in direct.iter() {
        resolved.upsert(PackageRecord::new(
            name,
            normalize_version(version),
            true,
            manifest.dev_dependencies.contains(name),
        ));
    }

    if let Some(tree) = lock.and_then(|l| l.dependencies.as_ref()) {
        let dev_declared = &manifest.dev_dependencies;
        traverse_lock_tree(tree, &direct, dev_declared, skip_dev, &mut resolved);
    }

    debug!("Resolved {} packages", resolved.packages.len());
    resolved.packages
}

/// Depth-first walk with an explicit stack; each (name, version) is expanded once
fn traverse_lock_tree(
    tree: &DependencyMap<LockDependency>,
    direct: &DependencyMap<&str>,
    dev_declared: &DependencyMap<String>,
    skip_dev: bool,
    resolved: &mut ResolvedSet,
) {
    let mut visited: HashSet<(&str, &str)> = HashSet::new();
    let mut stack: Vec<(&str, &LockDependency, bool)> = Vec::new();

    push_children(&mut stack, tree, false);

    while let Some((name, dep, dev_context)) = stack.pop() {
        if !visited.insert((name, dep.version.as_str())) {
            continue;
        }

        let lock_dev = dev_context || dep.dev;

        if !(skip_dev && lock_dev) {
            let changed = resolved
                .get(name)
                .map_or(true, |existing| existing.version != dep.version);
            if changed {
                let is_dev = if direct.contains(name) {
                    dev_declared.contains(name)
                } else {
                    lock_dev
                };
                resolved.upsert(PackageRecord::new(name, dep.version.as_str(), false, is_dev));
            }
        }

        if let Some(children) = &dep.dependencies {
            push_children(&mut stack, children, lock_dev);
        }
    }
}

/// Push in reverse so siblings pop in declaration order
fn push_children<'a>(
    stack: &mut Vec<(&'a str, &'a LockDependency, bool)>,
    children: &'a DependencyMap<LockDependency>,
    dev_context: bool,
) {
    for (name, dep) in children.iter().rev() {
        stack.push((name, dep, dev_context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn manifest(json: &str) -> Manifest {
        parse_manifest(json).unwrap()
    }

    fn lock(json: &str) -> LockFile {
        serde_json::from_str(json).unwrap()
    }

    fn names(packages: &[PackageRecord]) -> Vec<&str> {
        packages.iter().map(|p| p.name.as_str()).collect()
    }

    fn find<'a>(packages: &'a [PackageRecord], name: &str) -> &'a PackageRecord {
        packages.iter().find(|p| p.name == name).unwrap()
    }

    const MANIFEST: &str = r#"{
        "name": "demo",
        "dependencies": { "a": "^1.0.0" },
        "devDependencies": { "b": "3.0.0" }
    }"#;

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("^1.0.0"), "1.0.0");
        assert_eq!(normalize_version("~2.1.3"), "2.1.3");
        assert_eq!(normalize_version(">=3.0.0"), "3.0.0");
        assert_eq!(normalize_version("<=4.0"), "4.0");
        assert_eq!(normalize_version("=5.0.0"), "5.0.0");
        assert_eq!(normalize_version("6.0.0"), "6.0.0");
    }

    #[test]
    fn test_direct_and_dev_dependencies() {
        let packages = resolve(&manifest(MANIFEST), None, false);

        assert_eq!(
            packages,
            vec![
                PackageRecord::new("a", "1.0.0", true, false),
                PackageRecord::new("b", "3.0.0", true, true),
            ]
        );
    }

    #[test]
    fn test_skip_dev_dependencies() {
        let packages = resolve(&manifest(MANIFEST), None, true);
        assert_eq!(packages, vec![PackageRecord::new("a", "1.0.0", true, false)]);
    }

    #[test]
    fn test_dev_flag_sticks_when_declared_in_both() {
        let m = manifest(
            r#"{"dependencies": {"x": "^1.0.0"}, "devDependencies": {"x": "~1.2.0"}}"#,
        );

        let packages = resolve(&m, None, false);
        assert_eq!(packages, vec![PackageRecord::new("x", "1.2.0", true, true)]);

        let packages = resolve(&m, None, true);
        assert_eq!(packages, vec![PackageRecord::new("x", "1.0.0", true, true)]);
    }

    #[test]
    fn test_lock_file_overrides_version_and_adds_transitive() {
        let m = manifest(r#"{"dependencies": {"a": "^1.0.0"}}"#);
        let l = lock(
            r#"{
                "name": "demo",
                "lockfileVersion": 2,
                "dependencies": {
                    "a": {
                        "version": "1.0.1",
                        "resolved": "https://registry.npmjs.org/a/-/a-1.0.1.tgz",
                        "dependencies": { "c": { "version": "2.0.0" } }
                    }
                }
            }"#,
        );

        let packages = resolve(&m, Some(&l), false);

        assert_eq!(names(&packages), vec!["a", "c"]);
        let a = find(&packages, "a");
        assert_eq!(a.version, "1.0.1");
        assert!(!a.is_direct);
        assert_eq!(find(&packages, "c"), &PackageRecord::new("c", "2.0.0", false, false));
    }

    #[test]
    fn test_matching_lock_version_keeps_direct_record() {
        let m = manifest(r#"{"dependencies": {"a": "^1.0.0"}}"#);
        let l = lock(r#"{"dependencies": {"a": {"version": "1.0.0"}}}"#);

        let packages = resolve(&m, Some(&l), false);
        assert_eq!(packages, vec![PackageRecord::new("a", "1.0.0", true, false)]);
    }

    #[test]
    fn test_dev_context_propagates_to_children() {
        let m = manifest(r#"{}"#);
        let l = lock(
            r#"{"dependencies": {
                "tool": {"version": "1.0.0", "dev": true, "dependencies": {
                    "helper": {"version": "0.1.0", "dependencies": {
                        "deep": {"version": "0.0.1"}
                    }}
                }},
                "runtime": {"version": "2.0.0"}
            }}"#,
        );

        let packages = resolve(&m, Some(&l), false);

        assert_eq!(names(&packages), vec!["tool", "helper", "deep", "runtime"]);
        assert!(find(&packages, "tool").is_dev);
        assert!(find(&packages, "helper").is_dev);
        assert!(find(&packages, "deep").is_dev);
        assert!(!find(&packages, "runtime").is_dev);
    }

    #[test]
    fn test_skip_dev_still_traverses_dev_subtree() {
        let m = manifest(r#"{}"#);
        let l = lock(
            r#"{"dependencies": {
                "tool": {"version": "1.0.0", "dev": true, "dependencies": {
                    "helper": {"version": "0.1.0"}
                }},
                "runtime": {"version": "2.0.0"}
            }}"#,
        );

        let packages = resolve(&m, Some(&l), true);
        assert_eq!(names(&packages), vec!["runtime"]);
    }

    #[test]
    fn test_manifest_dev_classification_wins_for_direct_names() {
        let m = manifest(r#"{"devDependencies": {"b": "^3.0.0"}}"#);
        let l = lock(r#"{"dependencies": {"b": {"version": "3.1.0"}}}"#);

        let packages = resolve(&m, Some(&l), false);
        assert_eq!(packages, vec![PackageRecord::new("b", "3.1.0", false, true)]);
    }

    #[test]
    fn test_manifest_runtime_classification_wins_over_lock_dev_marker() {
        let m = manifest(r#"{"dependencies": {"a": "^1.0.0"}}"#);
        let l = lock(r#"{"dependencies": {"a": {"version": "1.1.0", "dev": true}}}"#);

        let packages = resolve(&m, Some(&l), false);
        assert_eq!(packages, vec![PackageRecord::new("a", "1.1.0", false, false)]);
    }

    #[test]
    fn test_skip_dev_keeps_dev_declared_package_needed_at_runtime() {
        let m = manifest(
            r#"{"dependencies": {"express": "^4.18.2"}, "devDependencies": {"debug": "^2.6.9"}}"#,
        );
        let l = lock(
            r#"{"dependencies": {
                "express": {"version": "4.18.2"},
                "debug": {"version": "2.6.9"}
            }}"#,
        );

        let packages = resolve(&m, Some(&l), true);

        assert_eq!(
            packages,
            vec![
                PackageRecord::new("express", "4.18.2", true, false),
                PackageRecord::new("debug", "2.6.9", false, false),
            ]
        );
    }

    #[test]
    fn test_skip_dev_ignores_dev_only_copy_of_runtime_dependency() {
        let m = manifest(
            r#"{"dependencies": {"debug": "^2.6.9"}, "devDependencies": {"mocha": "^10.0.0"}}"#,
        );
        let l = lock(
            r#"{"dependencies": {
                "debug": {"version": "2.6.9"},
                "mocha": {"version": "10.2.0", "dev": true, "dependencies": {
                    "debug": {"version": "4.3.4", "dev": true}
                }}
            }}"#,
        );

        let packages = resolve(&m, Some(&l), true);
        assert_eq!(packages, vec![PackageRecord::new("debug", "2.6.9", true, false)]);

        // Without skip_dev the nested copy is visited last and wins
        let packages = resolve(&m, Some(&l), false);
        assert_eq!(names(&packages), vec!["debug", "mocha"]);
        assert_eq!(find(&packages, "debug"), &PackageRecord::new("debug", "4.3.4", false, false));
    }

    #[test]
    fn test_skip_dev_still_overrides_runtime_declared_version_from_lock() {
        let m = manifest(
            r#"{"dependencies": {"a": "^1.0.0"}, "devDependencies": {"b": "^1.0.0"}}"#,
        );
        let l = lock(
            r#"{"dependencies": {
                "a": {"version": "1.4.0"},
                "b": {"version": "1.0.0", "dev": true}
            }}"#,
        );

        let packages = resolve(&m, Some(&l), true);
        assert_eq!(packages, vec![PackageRecord::new("a", "1.4.0", false, false)]);
    }

    #[test]
    fn test_dependency_map_keeps_first_position_and_last_value() {
        let map: DependencyMap<String> =
            serde_json::from_str(r#"{"b": "1", "a": "2", "b": "3"}"#).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.get("b").map(String::as_str), Some("3"));
        assert!(map.contains("a"));
        assert!(!map.contains("c"));
    }

    #[test]
    fn test_last_visited_version_wins() {
        let m = manifest(r#"{}"#);
        let l = lock(
            r#"{"dependencies": {
                "p": {"version": "1.0.0", "dependencies": {"shared": {"version": "1.0.0"}}},
                "q": {"version": "1.0.0", "dependencies": {"shared": {"version": "2.0.0"}}}
            }}"#,
        );

        let packages = resolve(&m, Some(&l), false);
        assert_eq!(names(&packages), vec!["p", "shared", "q"]);
        assert_eq!(find(&packages, "shared").version, "2.0.0");
    }

    #[test]
    fn test_repeated_subtree_expanded_once() {
        let m = manifest(r#"{}"#);
        let l = lock(
            r#"{"dependencies": {
                "p": {"version": "1.0.0", "dependencies": {
                    "shared": {"version": "1.0.0", "dependencies": {"leaf": {"version": "1.0.0"}}}
                }},
                "q": {"version": "1.0.0", "dependencies": {
                    "shared": {"version": "1.0.0", "dependencies": {"leaf": {"version": "9.9.9"}}}
                }}
            }}"#,
        );

        let packages = resolve(&m, Some(&l), false);
        // The second `shared@1.0.0` is never expanded, so `leaf@9.9.9` is not seen
        assert_eq!(find(&packages, "leaf").version, "1.0.0");
    }

    #[test]
    fn test_names_are_unique_and_resolution_is_idempotent() {
        let m = manifest(r#"{"dependencies": {"a": "^1.0.0", "b": "^1.0.0"}}"#);
        let l = lock(
            r#"{"dependencies": {
                "a": {"version": "1.2.0", "dependencies": {"b": {"version": "1.1.0"}}},
                "b": {"version": "1.0.5", "dependencies": {"a": {"version": "1.2.0"}}}
            }}"#,
        );

        let first = resolve(&m, Some(&l), false);
        let second = resolve(&m, Some(&l), false);
        assert_eq!(first, second);

        let unique: HashSet<&str> = first.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(unique.len(), first.len());
        assert_eq!(names(&first), vec!["a", "b"]);
        assert_eq!(find(&first, "b").version, "1.0.5");
    }

    #[test]
    fn test_read_manifest_missing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_manifest(dir.path()).unwrap_err();
        assert!(matches!(err, AuditError::ParseError(_)));
    }

    #[test]
    fn test_read_manifest_malformed_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), r#"{"dependencies": ["a"]}"#).unwrap();
        assert!(read_manifest(dir.path()).is_err());
    }

    #[test]
    fn test_malformed_lock_file_degrades_to_direct_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), MANIFEST).unwrap();
        fs::write(dir.path().join(LOCK_FILE), "{ not json").unwrap();

        assert!(read_lock_file(dir.path()).is_none());

        let (manifest, packages) = parse_project(dir.path(), false).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("demo"));
        assert_eq!(names(&packages), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_project_with_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), r#"{"dependencies": {"a": "^1.0.0"}}"#).unwrap();
        fs::write(
            dir.path().join(LOCK_FILE),
            r#"{"lockfileVersion": 1, "dependencies": {"a": {"version": "1.0.3"}}}"#,
        )
        .unwrap();

        let (_, packages) = parse_project(dir.path(), false).unwrap();
        assert_eq!(packages, vec![PackageRecord::new("a", "1.0.3", false, false)]);
    }
}
