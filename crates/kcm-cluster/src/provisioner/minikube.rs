//! Minikube provisioner for local clusters

use std::sync::Arc;

use async_trait::async_trait;
use kcm_core::Values;
use kcm_kube::{Command, ExecContext, Executor};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Provisioner;
use crate::error::{ClusterError, InfraStage, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MinikubeConfig {
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    pub binary: String,
}

impl Default for MinikubeConfig {
    fn default() -> Self {
        Self {
            profile: "kcm".to_string(),
            driver: None,
            kubernetes_version: None,
            binary: "minikube".to_string(),
        }
    }
}

pub struct MinikubeProvisioner {
    config: MinikubeConfig,
    executor: Arc<dyn Executor>,
}

impl MinikubeProvisioner {
    pub fn new(config: MinikubeConfig, executor: Arc<dyn Executor>) -> Self {
        Self { config, executor }
    }

    fn minikube(&self, subcommand: &str) -> Command {
        Command::new(&self.config.binary)
            .arg(subcommand)
            .arg("-p")
            .arg(&self.config.profile)
    }

    /// `$KUBECONFIG`, else `~/.kube/config`
    fn kubeconfig_path() -> Option<String> {
        match std::env::var("KUBECONFIG") {
            Ok(path) if !path.is_empty() => Some(path),
            _ => dirs::home_dir().map(|home| home.join(".kube").join("config").display().to_string()),
        }
    }
}

#[async_trait]
impl Provisioner for MinikubeProvisioner {
    fn name(&self) -> &str {
        "minikube"
    }

    async fn provision(&self, ctx: &ExecContext) -> Result<()> {
        let mut cmd = self.minikube("start");
        if let Some(driver) = &self.config.driver {
            cmd = cmd.arg("--driver").arg(driver);
        }
        if let Some(version) = &self.config.kubernetes_version {
            cmd = cmd.arg("--kubernetes-version").arg(version);
        }
        self.executor
            .run(&cmd, ctx)
            .await
            .map_err(|e| ClusterError::infra(InfraStage::Apply, e))?;
        Ok(())
    }

    /// Status is informational only
    async fn reconcile(&self, ctx: &ExecContext) -> Result<()> {
        match self.executor.run(&self.minikube("status"), ctx).await {
            Ok(_) => tracing::info!(profile = %self.config.profile, "minikube profile is running"),
            Err(e) if e.is_cancelled() => return Err(ClusterError::infra(InfraStage::Plan, e)),
            Err(e) => tracing::info!(
                profile = %self.config.profile,
                error = %e,
                "minikube profile is not running, provisioning would start it"
            ),
        }
        Ok(())
    }

    async fn fetch(&self, _ctx: &ExecContext) -> Result<Values> {
        let mut outputs = json!({ "context": self.config.profile });
        if let Some(path) = Self::kubeconfig_path() {
            outputs["kubeconfig"] = json!(path);
        }
        Ok(Values(outputs))
    }

    async fn destroy(&self, ctx: &ExecContext) -> Result<()> {
        self.executor
            .run(&self.minikube("delete"), ctx)
            .await
            .map_err(|e| ClusterError::infra(InfraStage::Destroy, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcm_kube::MockExecutor;

    fn provisioner(mock: &MockExecutor, config: MinikubeConfig) -> MinikubeProvisioner {
        MinikubeProvisioner::new(config, Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn test_start_with_options() {
        let mock = MockExecutor::new();
        let p = provisioner(
            &mock,
            MinikubeConfig {
                profile: "dev".into(),
                driver: Some("docker".into()),
                kubernetes_version: Some("v1.31.0".into()),
                ..Default::default()
            },
        );

        p.provision(&ExecContext::new()).await.unwrap();
        p.destroy(&ExecContext::new()).await.unwrap();
        assert_eq!(
            mock.commands(),
            vec![
                "minikube start -p dev --driver docker --kubernetes-version v1.31.0",
                "minikube delete -p dev",
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_never_fails_on_status() {
        let mock = MockExecutor::new();
        mock.fail("status", 7, "host: Stopped");
        let p = provisioner(&mock, MinikubeConfig::default());

        p.reconcile(&ExecContext::new()).await.unwrap();
        assert_eq!(mock.commands(), vec!["minikube status -p kcm"]);
    }

    #[tokio::test]
    async fn test_fetch_exposes_context() {
        let p = provisioner(&MockExecutor::new(), MinikubeConfig::default());
        let values = p.fetch(&ExecContext::new()).await.unwrap();

        assert_eq!(values.get_str("context"), Some("kcm"));
    }
}
