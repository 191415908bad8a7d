//! Context pinning
//!
//! An agent editing several files needs two guarantees: the snapshot it
//! reasons about is internally consistent, and any out-of-band change to
//! those files is detected before its edits land. A pin stores contents and
//! SHA-256 checksums at pin time; verification re-hashes and reports which
//! paths drifted. Pins can optionally take coordinator file locks so that
//! sibling agents cannot edit the pinned set at all.
//!
//! The import graph lets callers pull in the files a pinned file actually
//! depends on, so the snapshot covers the whole edit neighborhood.

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::coordinator::Coordinator;

/// A checksummed snapshot of files an agent depends on
#[derive(Debug, Clone)]
pub struct Pin {
    pub files: Vec<PathBuf>,
    pub checksums: HashMap<PathBuf, String>,
    pub contents: HashMap<PathBuf, String>,
    pub agent_id: String,
    /// True when coordinator file locks back this pin
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of re-hashing a pin's files
#[derive(Debug, Clone)]
pub struct PinVerification {
    pub valid: bool,
    /// Paths whose current checksum no longer matches the pinned one
    pub stale: Vec<PathBuf>,
}

/// Manages pins and the local import graph for one repository
pub struct ContextPinner {
    root: PathBuf,
    coordinator: Arc<Coordinator>,
    pins: Mutex<HashMap<String, Pin>>,
    /// file -> files it imports
    dependencies: Mutex<HashMap<PathBuf, Vec<PathBuf>>>,
}

impl ContextPinner {
    pub fn new(root: impl Into<PathBuf>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            root: root.into(),
            coordinator,
            pins: Mutex::new(HashMap::new()),
            dependencies: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot a set of files for an agent.
    ///
    /// With `locked`, coordinator file locks are taken all-or-nothing; a
    /// conflicting holder fails the pin without reading anything.
    pub fn pin(&self, agent_id: &str, files: &[PathBuf], locked: bool) -> Result<Pin> {
        if locked && !self.coordinator.lock_files(agent_id, files) {
            bail!("Cannot pin: another agent holds a lock on one of the files");
        }

        let mut checksums = HashMap::new();
        let mut contents = HashMap::new();
        for file in files {
            let path = self.resolve(file);
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read pinned file: {}", path.display()))?;
            checksums.insert(file.clone(), checksum(&content));
            contents.insert(file.clone(), content);
        }

        let pin = Pin {
            files: files.to_vec(),
            checksums,
            contents,
            agent_id: agent_id.to_string(),
            locked,
            created_at: Utc::now(),
        };

        self.pins
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(agent_id.to_string(), pin.clone());
        Ok(pin)
    }

    /// Re-hash an agent's pinned files. Valid iff every checksum matches.
    pub fn verify_pin(&self, agent_id: &str) -> Result<PinVerification> {
        let pins = self.pins.lock().unwrap_or_else(|p| p.into_inner());
        let pin = pins
            .get(agent_id)
            .with_context(|| format!("No pin held by agent {}", agent_id))?;

        let mut stale = Vec::new();
        for file in &pin.files {
            let path = self.resolve(file);
            let current = std::fs::read_to_string(&path).unwrap_or_default();
            if checksum(&current) != pin.checksums[file] {
                stale.push(file.clone());
            }
        }

        Ok(PinVerification {
            valid: stale.is_empty(),
            stale,
        })
    }

    /// Re-read and re-hash without giving up locks or pin ownership.
    pub fn refresh_pin(&self, agent_id: &str) -> Result<Pin> {
        let mut pins = self.pins.lock().unwrap_or_else(|p| p.into_inner());
        let pin = pins
            .get_mut(agent_id)
            .with_context(|| format!("No pin held by agent {}", agent_id))?;

        for file in &pin.files {
            let path = self.resolve(file);
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to re-read pinned file: {}", path.display()))?;
            pin.checksums.insert(file.clone(), checksum(&content));
            pin.contents.insert(file.clone(), content);
        }

        Ok(pin.clone())
    }

    /// Drop an agent's pin, releasing any locks it took.
    pub fn unpin(&self, agent_id: &str) {
        let removed = self
            .pins
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(agent_id);
        if let Some(pin) = removed {
            if pin.locked {
                self.coordinator.unlock_files(agent_id, &pin.files);
            }
        }
    }

    pub fn get_pin(&self, agent_id: &str) -> Option<Pin> {
        self.pins
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(agent_id)
            .cloned()
    }

    /// Build the import graph for a set of files. External imports are
    /// ignored; only imports that resolve to a file on disk become edges.
    pub fn analyze_files(&self, files: &[PathBuf]) -> Result<()> {
        let mut graph = self
            .dependencies
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        for file in files {
            let path = self.resolve(file);
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let deps = extract_local_imports(&self.root, file, &content);
            graph.insert(file.clone(), deps);
        }

        Ok(())
    }

    /// Files a file imports (direct only).
    pub fn get_dependencies(&self, file: &Path) -> Vec<PathBuf> {
        self.dependencies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    /// Files that import a file (direct only).
    pub fn get_dependents(&self, file: &Path) -> Vec<PathBuf> {
        let graph = self
            .dependencies
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let mut dependents: Vec<PathBuf> = graph
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == file))
            .map(|(path, _)| path.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Transitive neighborhood: everything reachable through imports in
    /// either direction.
    pub fn get_related_files(&self, file: &Path) -> Vec<PathBuf> {
        let graph = self
            .dependencies
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        queue.push_back(file.to_path_buf());

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(deps) = graph.get(&current) {
                queue.extend(deps.iter().cloned());
            }
            for (path, deps) in graph.iter() {
                if deps.iter().any(|d| d == &current) {
                    queue.push_back(path.clone());
                }
            }
        }

        seen.remove(file);
        let mut related: Vec<PathBuf> = seen.into_iter().collect();
        related.sort();
        related
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.root.join(file)
        }
    }
}

fn checksum(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Pull local imports out of a source file, by language.
fn extract_local_imports(root: &Path, file: &Path, content: &str) -> Vec<PathBuf> {
    static PY_RELATIVE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^from\s+(\.+)([\w.]*)\s+import\s+([\w, ]+)").unwrap());
    static RB_REQUIRE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"^require(_relative)?\s+['"]([^'"]+)['"]"#).unwrap());
    static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?:import\s.*?from\s+|import\s+|require\()\s*['"](\.[^'"]+)['"]"#).unwrap()
    });
    static GO_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\s*(?:import\s+)?"([\w./-]+)""#).unwrap());

    let dir = file.parent().unwrap_or(Path::new(""));
    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
    let mut deps = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        match ext {
            "py" => {
                if let Some(caps) = PY_RELATIVE.captures(trimmed) {
                    let mut base = dir.to_path_buf();
                    for _ in 1..caps[1].len() {
                        base = base.parent().map(PathBuf::from).unwrap_or_default();
                    }
                    let module = caps[2].replace('.', "/");
                    let candidates = if module.is_empty() {
                        caps[3]
                            .split(',')
                            .map(|m| base.join(m.trim()))
                            .collect::<Vec<_>>()
                    } else {
                        vec![base.join(module)]
                    };
                    for candidate in candidates {
                        push_if_exists(root, candidate.with_extension("py"), &mut deps);
                    }
                }
            }
            "rb" => {
                if let Some(caps) = RB_REQUIRE.captures(trimmed) {
                    let target = &caps[2];
                    let base = if caps.get(1).is_some() {
                        dir.join(target)
                    } else {
                        PathBuf::from(target)
                    };
                    push_if_exists(root, base.with_extension("rb"), &mut deps);
                }
            }
            "js" | "jsx" | "ts" | "tsx" | "mjs" => {
                if let Some(caps) = JS_IMPORT.captures(trimmed) {
                    let target = dir.join(&caps[1]);
                    for candidate in js_candidates(&target) {
                        if push_if_exists(root, candidate, &mut deps) {
                            break;
                        }
                    }
                }
            }
            "go" => {
                if let Some(caps) = GO_IMPORT.captures(trimmed) {
                    // Only module-relative paths that exist on disk count.
                    let target = PathBuf::from(&caps[1]);
                    if let Some(tail) = target.iter().next_back() {
                        let candidate = PathBuf::from(tail).with_extension("go");
                        push_if_exists(root, dir.join(&candidate), &mut deps);
                    }
                }
            }
            _ => {}
        }
    }

    deps.sort();
    deps.dedup();
    deps
}

fn js_candidates(target: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for ext in ["ts", "tsx", "js", "jsx", "mjs"] {
        candidates.push(target.with_extension(ext));
    }
    for ext in ["ts", "js"] {
        candidates.push(target.join(format!("index.{}", ext)));
    }
    candidates
}

/// Normalize a candidate against the repository root and record it when the
/// file exists. Returns true on a hit.
fn push_if_exists(root: &Path, candidate: PathBuf, deps: &mut Vec<PathBuf>) -> bool {
    let candidate = normalize(&candidate);
    let absolute = if candidate.is_absolute() {
        candidate.clone()
    } else {
        root.join(&candidate)
    };
    if absolute.is_file() {
        let normalized = absolute
            .strip_prefix(root)
            .map(PathBuf::from)
            .unwrap_or(candidate);
        deps.push(normalized);
        true
    } else {
        false
    }
}

/// Drop `.` components and resolve `..` lexically.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorSettings;

    fn pinner(root: &Path) -> ContextPinner {
        let coordinator = Arc::new(Coordinator::new(&CoordinatorSettings::default()));
        ContextPinner::new(root, coordinator)
    }

    #[test]
    fn pin_then_verify_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "v1").unwrap();

        let pinner = pinner(dir.path());
        let files = vec![PathBuf::from("f.txt")];
        let pin = pinner.pin("agent-a", &files, false).unwrap();
        assert_eq!(pin.files, files);
        assert_eq!(pin.contents[&files[0]], "v1");

        let verification = pinner.verify_pin("agent-a").unwrap();
        assert!(verification.valid);
        assert!(verification.stale.is_empty());
    }

    #[test]
    fn out_of_band_edit_is_detected_and_refresh_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "v1").unwrap();

        let pinner = pinner(dir.path());
        let files = vec![PathBuf::from("f.txt")];
        pinner.pin("agent-a", &files, false).unwrap();

        std::fs::write(&file, "v2").unwrap();
        let verification = pinner.verify_pin("agent-a").unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.stale, files);

        let refreshed = pinner.refresh_pin("agent-a").unwrap();
        assert_eq!(refreshed.contents[&files[0]], "v2");

        let verification = pinner.verify_pin("agent-a").unwrap();
        assert!(verification.valid);
        assert!(verification.stale.is_empty());
    }

    #[test]
    fn locked_pin_excludes_other_agents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "v1").unwrap();

        let coordinator = Arc::new(Coordinator::new(&CoordinatorSettings::default()));
        let pinner = ContextPinner::new(dir.path(), Arc::clone(&coordinator));
        let files = vec![PathBuf::from("f.txt")];

        pinner.pin("agent-a", &files, true).unwrap();
        assert!(pinner.pin("agent-b", &files, true).is_err());

        pinner.unpin("agent-a");
        assert!(pinner.pin("agent-b", &files, true).is_ok());
    }

    #[test]
    fn js_import_graph_and_neighborhood() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("app.js"), "import { a } from './util';\n").unwrap();
        std::fs::write(root.join("util.js"), "const fs = require('fs');\n").unwrap();
        std::fs::write(root.join("other.js"), "import x from './util';\n").unwrap();

        let pinner = pinner(root);
        pinner
            .analyze_files(&[
                PathBuf::from("app.js"),
                PathBuf::from("util.js"),
                PathBuf::from("other.js"),
            ])
            .unwrap();

        assert_eq!(
            pinner.get_dependencies(Path::new("app.js")),
            vec![PathBuf::from("util.js")]
        );
        // 'fs' is external and ignored.
        assert!(pinner.get_dependencies(Path::new("util.js")).is_empty());
        assert_eq!(
            pinner.get_dependents(Path::new("util.js")),
            vec![PathBuf::from("app.js"), PathBuf::from("other.js")]
        );

        let related = pinner.get_related_files(Path::new("app.js"));
        assert_eq!(
            related,
            vec![PathBuf::from("other.js"), PathBuf::from("util.js")]
        );
    }

    #[test]
    fn python_relative_imports_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("pkg")).unwrap();
        std::fs::write(root.join("pkg/a.py"), "from .b import thing\nimport os\n").unwrap();
        std::fs::write(root.join("pkg/b.py"), "x = 1\n").unwrap();

        let pinner = pinner(root);
        pinner.analyze_files(&[PathBuf::from("pkg/a.py")]).unwrap();
        assert_eq!(
            pinner.get_dependencies(Path::new("pkg/a.py")),
            vec![PathBuf::from("pkg/b.py")]
        );
    }
}
