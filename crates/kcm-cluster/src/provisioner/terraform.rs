//! Terraform provisioner

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kcm_core::Values;
use kcm_kube::{Command, ExecContext, Executor, KubeError};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::Provisioner;
use crate::error::{ClusterError, InfraStage, Result};

/// `terraform plan -detailed-exitcode` exit code for "changes pending"
const PLAN_CHANGES_PENDING: i32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerraformConfig {
    /// Directory holding the Terraform configuration
    pub dir: PathBuf,
    /// Passed as `-var-file`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub var_files: Vec<PathBuf>,
    pub binary: String,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("terraform"),
            var_files: Vec::new(),
            binary: "terraform".to_string(),
        }
    }
}

pub struct TerraformProvisioner {
    config: TerraformConfig,
    executor: Arc<dyn Executor>,
    initialized: OnceCell<()>,
}

impl TerraformProvisioner {
    pub fn new(config: TerraformConfig, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            executor,
            initialized: OnceCell::new(),
        }
    }

    fn terraform(&self, subcommand: &str) -> Command {
        Command::new(&self.config.binary)
            .arg(subcommand)
            .current_dir(&self.config.dir)
    }

    fn with_var_files(&self, mut cmd: Command) -> Command {
        for file in &self.config.var_files {
            cmd = cmd.arg("-var-file").arg(file.display().to_string());
        }
        cmd
    }

    /// `terraform init`, once per run
    async fn init(&self, ctx: &ExecContext) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                let cmd = self.terraform("init").arg("-input=false");
                self.executor
                    .run(&cmd, ctx)
                    .await
                    .map(|_| ())
                    .map_err(|e| ClusterError::infra(InfraStage::Init, e))
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    fn name(&self) -> &str {
        "terraform"
    }

    async fn provision(&self, ctx: &ExecContext) -> Result<()> {
        self.init(ctx).await?;
        let cmd = self.with_var_files(self.terraform("apply").args(["-input=false", "-auto-approve"]));
        self.executor
            .run(&cmd, ctx)
            .await
            .map_err(|e| ClusterError::infra(InfraStage::Apply, e))?;
        tracing::info!(dir = %self.config.dir.display(), "infrastructure applied");
        Ok(())
    }

    async fn reconcile(&self, ctx: &ExecContext) -> Result<()> {
        self.init(ctx).await?;
        let cmd = self.with_var_files(
            self.terraform("plan")
                .args(["-input=false", "-detailed-exitcode"]),
        );
        match self.executor.run(&cmd, ctx).await {
            Ok(_) => {
                tracing::info!("infrastructure is up to date");
                Ok(())
            }
            Err(KubeError::CommandFailed {
                code: Some(PLAN_CHANGES_PENDING),
                ..
            }) => {
                tracing::info!("infrastructure changes pending");
                Ok(())
            }
            Err(e) => Err(ClusterError::infra(InfraStage::Plan, e)),
        }
    }

    async fn fetch(&self, ctx: &ExecContext) -> Result<Values> {
        self.init(ctx).await?;
        let cmd = self.terraform("output").arg("-json");
        let output = self
            .executor
            .run_silent(&cmd, ctx)
            .await
            .map_err(|e| ClusterError::infra(InfraStage::Output, e))?;
        parse_outputs(&output)
    }

    async fn destroy(&self, ctx: &ExecContext) -> Result<()> {
        self.init(ctx).await?;
        let cmd = self.with_var_files(self.terraform("destroy").args(["-input=false", "-auto-approve"]));
        self.executor
            .run(&cmd, ctx)
            .await
            .map_err(|e| ClusterError::infra(InfraStage::Destroy, e))?;
        tracing::info!(dir = %self.config.dir.display(), "infrastructure destroyed");
        Ok(())
    }
}

/// Flatten `terraform output -json` into `{name: value}`
fn parse_outputs(output: &str) -> Result<Values> {
    let invalid = |message: String| ClusterError::InvalidOutputs {
        provisioner: "terraform".to_string(),
        message,
    };

    if output.trim().is_empty() {
        return Ok(Values::new());
    }
    let parsed: serde_json::Value =
        serde_json::from_str(output).map_err(|e| invalid(e.to_string()))?;
    let serde_json::Value::Object(outputs) = parsed else {
        return Err(invalid("expected a JSON object".to_string()));
    };

    let mut values = serde_json::Map::new();
    for (name, output) in outputs {
        match output.get("value") {
            Some(value) => {
                values.insert(name, value.clone());
            }
            None => return Err(invalid(format!("output '{}' has no value", name))),
        }
    }
    Ok(Values(serde_json::Value::Object(values)))
}
