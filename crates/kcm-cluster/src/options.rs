//! Options of a provision or destroy run

use std::path::PathBuf;

use kcm_core::Values;

/// Paths and switches of one run
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Plan and diff only
    pub dry_run: bool,
    pub values_path: PathBuf,
    pub manifests_dir: PathBuf,
    pub deletions_path: PathBuf,
    /// Leave the infrastructure alone, only handle manifests
    pub only_manifest: bool,
    /// Stop once the values file is written
    pub skip_manifests: bool,
    /// Re-apply and rewrite manifests whose content did not change
    pub include_unchanged: bool,
    /// Overlaid on the values file; provisioner outputs still win
    pub overrides: Values,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            values_path: PathBuf::from("values.yaml"),
            manifests_dir: PathBuf::from("manifests"),
            deletions_path: PathBuf::from("deletions.yaml"),
            only_manifest: false,
            skip_manifests: false,
            include_unchanged: false,
            overrides: Values::new(),
        }
    }
}

impl ManagerOptions {
    /// Defaults rooted at `dir`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            values_path: dir.join("values.yaml"),
            manifests_dir: dir.join("manifests"),
            deletions_path: dir.join("deletions.yaml"),
            ..Default::default()
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}
