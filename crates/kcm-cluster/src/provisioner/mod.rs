//! Infrastructure provisioners
//!
//! A provisioner creates or destroys the infrastructure a cluster runs on
//! and exposes output values that feed the renderer and the credentials.

mod minikube;
mod null;
mod terraform;

pub use minikube::{MinikubeConfig, MinikubeProvisioner};
pub use null::NullProvisioner;
pub use terraform::{TerraformConfig, TerraformProvisioner};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kcm_core::Values;
use kcm_kube::{ExecContext, Executor};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Infrastructure lifecycle contract
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn name(&self) -> &str;

    /// Create or update the infrastructure
    async fn provision(&self, ctx: &ExecContext) -> Result<()>;

    /// Report pending changes without applying any
    async fn reconcile(&self, ctx: &ExecContext) -> Result<()>;

    /// Current output values; callable before and after `provision`
    async fn fetch(&self, ctx: &ExecContext) -> Result<Values>;

    async fn destroy(&self, ctx: &ExecContext) -> Result<()>;
}

/// Provisioner selection in the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProvisionerConfig {
    Terraform(TerraformConfig),
    Minikube(MinikubeConfig),
    /// Quote it in YAML: a bare `null` is not a string
    #[default]
    #[serde(alias = "none")]
    Null,
}

impl ProvisionerConfig {
    /// Resolve relative directories against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        if let ProvisionerConfig::Terraform(config) = self {
            config.dir = base.join(&config.dir);
            for file in &mut config.var_files {
                *file = base.join(&*file);
            }
        }
    }
}

/// The provisioners kcm ships with
pub enum AnyProvisioner {
    Terraform(TerraformProvisioner),
    Minikube(MinikubeProvisioner),
    Null(NullProvisioner),
}

impl AnyProvisioner {
    pub fn from_config(config: &ProvisionerConfig, executor: Arc<dyn Executor>) -> Self {
        match config {
            ProvisionerConfig::Terraform(c) => {
                AnyProvisioner::Terraform(TerraformProvisioner::new(c.clone(), executor))
            }
            ProvisionerConfig::Minikube(c) => {
                AnyProvisioner::Minikube(MinikubeProvisioner::new(c.clone(), executor))
            }
            ProvisionerConfig::Null => AnyProvisioner::Null(NullProvisioner),
        }
    }

    fn inner(&self) -> &dyn Provisioner {
        match self {
            AnyProvisioner::Terraform(p) => p,
            AnyProvisioner::Minikube(p) => p,
            AnyProvisioner::Null(p) => p,
        }
    }
}

#[async_trait]
impl Provisioner for AnyProvisioner {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn provision(&self, ctx: &ExecContext) -> Result<()> {
        self.inner().provision(ctx).await
    }

    async fn reconcile(&self, ctx: &ExecContext) -> Result<()> {
        self.inner().reconcile(ctx).await
    }

    async fn fetch(&self, ctx: &ExecContext) -> Result<Values> {
        self.inner().fetch(ctx).await
    }

    async fn destroy(&self, ctx: &ExecContext) -> Result<()> {
        self.inner().destroy(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcm_kube::MockExecutor;
    use std::path::PathBuf;

    #[test]
    fn test_config_from_yaml() {
        let config: ProvisionerConfig = serde_yaml::from_str(
            "type: terraform\ndir: infra\nvarFiles: [prod.tfvars]\n",
        )
        .unwrap();
        let ProvisionerConfig::Terraform(terraform) = &config else {
            panic!("expected terraform, got {config:?}");
        };
        assert_eq!(terraform.dir, PathBuf::from("infra"));
        assert_eq!(terraform.var_files, vec![PathBuf::from("prod.tfvars")]);
        assert_eq!(terraform.binary, "terraform");

        let config: ProvisionerConfig = serde_yaml::from_str("type: minikube\n").unwrap();
        assert!(matches!(config, ProvisionerConfig::Minikube(ref m) if m.profile == "kcm"));

        let config: ProvisionerConfig = serde_yaml::from_str("type: 'null'\n").unwrap();
        assert_eq!(config, ProvisionerConfig::Null);
        let config: ProvisionerConfig = serde_yaml::from_str("type: none\n").unwrap();
        assert_eq!(config, ProvisionerConfig::Null);
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = ProvisionerConfig::Terraform(TerraformConfig {
            dir: "infra".into(),
            var_files: vec!["a.tfvars".into(), "/abs/b.tfvars".into()],
            ..Default::default()
        });
        config.resolve_paths(Path::new("/work"));

        let ProvisionerConfig::Terraform(terraform) = config else {
            unreachable!()
        };
        assert_eq!(terraform.dir, PathBuf::from("/work/infra"));
        assert_eq!(
            terraform.var_files,
            vec![PathBuf::from("/work/a.tfvars"), PathBuf::from("/abs/b.tfvars")]
        );
    }

    #[test]
    fn test_factory_names() {
        let executor = Arc::new(MockExecutor::new());
        let names: Vec<String> = [
            ProvisionerConfig::Terraform(TerraformConfig::default()),
            ProvisionerConfig::Minikube(MinikubeConfig::default()),
            ProvisionerConfig::Null,
        ]
        .iter()
        .map(|c| AnyProvisioner::from_config(c, executor.clone()).name().to_string())
        .collect();
        assert_eq!(names, vec!["terraform", "minikube", "null"]);
    }
}
