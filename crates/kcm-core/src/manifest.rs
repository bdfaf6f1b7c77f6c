//! Named manifests
//!
//! A manifest is the unit kcm tracks across runs: one renderer output, one
//! file under the manifests directory.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hooks::{Hook, HookMap, HookType};
use crate::resource::{self, Resource};

/// Raw renderer output before parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub content: String,
}

impl ManifestFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A parsed, named set of resources and hooks
#[derive(Debug, Clone)]
pub struct Manifest {
    pub name: String,
    /// Content as rendered or as read from disk
    pub content: String,
    /// Plain resources in apply order
    pub resources: Vec<Resource>,
    pub hooks: HookMap,
}

impl Manifest {
    pub fn parse(name: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        let parsed = resource::parse(&content)?;
        Ok(Self {
            name: name.into(),
            content,
            resources: parsed.resources,
            hooks: parsed.hooks,
        })
    }

    pub fn from_file_content(file: &ManifestFile) -> Result<Self> {
        Self::parse(file.name.clone(), file.content.clone())
    }

    /// Load a manifest file, naming it after the file stem
    pub fn from_file(path: &Path) -> Result<Self> {
        let name = Self::name_from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::file(path, e))?;
        Self::parse(name, content)
    }

    /// Load every `*.yaml` / `*.yml` file directly under `dir`, sorted by name
    ///
    /// A missing directory holds no manifests.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::file(dir, e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| CoreError::file(dir, e))?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if is_yaml && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut manifests: Vec<Self> = paths
            .iter()
            .map(|p| Self::from_file(p))
            .collect::<Result<_>>()?;
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifests)
    }

    /// `kube-system.yaml` becomes `kube-system`
    pub fn name_from_path(path: &Path) -> Result<String> {
        path.file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| CoreError::InvalidManifestName {
                path: path.display().to_string(),
            })
    }

    /// File name under the manifests directory
    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.name)
    }

    /// Manifests match by name
    pub fn matches(&self, other: &Manifest) -> bool {
        self.name == other.name
    }

    /// Hooks of one type, in execution order
    pub fn hooks_of(&self, hook_type: HookType) -> &[Hook] {
        self.hooks.get(&hook_type).map(Vec::as_slice).unwrap_or_default()
    }

    /// Canonical YAML stream of the plain resources
    pub fn serialized_resources(&self) -> String {
        resource::serialize(&self.resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_name_from_path() {
        assert_eq!(
            Manifest::name_from_path(&PathBuf::from("/tmp/manifests/kube-system.yaml")).unwrap(),
            "kube-system"
        );
        assert!(Manifest::name_from_path(&PathBuf::from("/")).is_err());
    }

    #[test]
    fn test_load_dir_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "kind: ConfigMap\nmetadata:\n  name: b\n").unwrap();
        std::fs::write(dir.path().join("a.yml"), "kind: Secret\nmetadata:\n  name: a\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested.yaml")).unwrap();

        let manifests = Manifest::load_dir(dir.path()).unwrap();
        let names: Vec<_> = manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(manifests[1].resources[0].name, "b");
        assert_eq!(manifests[0].file_name(), "a.yaml");
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(Manifest::load_dir(&dir.path().join("manifests")).unwrap().is_empty());
    }

    #[test]
    fn test_hooks_of() {
        let manifest = Manifest::parse(
            "jobs",
            "kind: Job\nmetadata:\n  name: seed\n  annotations:\n    kcm/hooks: post-apply\n",
        )
        .unwrap();

        assert!(manifest.resources.is_empty());
        assert_eq!(manifest.hooks_of(HookType::PostApply).len(), 1);
        assert!(manifest.hooks_of(HookType::PreApply).is_empty());
    }

    #[test]
    fn test_matches_by_name() {
        let a = Manifest::parse("m1", "").unwrap();
        let b = Manifest::parse("m1", "kind: ConfigMap\nmetadata:\n  name: x\n").unwrap();
        let c = Manifest::parse("m2", "").unwrap();
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }
}
