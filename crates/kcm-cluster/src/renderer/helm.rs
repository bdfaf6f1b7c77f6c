//! Helm chart renderer

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kcm_core::{ManifestFile, Values};
use kcm_kube::{Command, ExecContext, Executor};
use serde::{Deserialize, Serialize};

use super::Renderer;
use crate::error::{ClusterError, Result};

/// A chart rendered into the manifest `name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmChart {
    pub name: String,
    /// Chart reference or local path
    pub chart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmConfig {
    pub charts: Vec<HelmChart>,
    pub binary: String,
    /// Where helm runs, for local chart paths
    pub dir: PathBuf,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            charts: Vec::new(),
            binary: "helm".to_string(),
            dir: PathBuf::from("."),
        }
    }
}

/// Runs `helm template` once per chart with the values in a temp file
pub struct HelmRenderer {
    config: HelmConfig,
    executor: Arc<dyn Executor>,
}

impl HelmRenderer {
    pub fn new(config: HelmConfig, executor: Arc<dyn Executor>) -> Self {
        Self { config, executor }
    }

    fn write_values(&self, values: &Values) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("kcm-values-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(values.to_yaml()?.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    fn template_command(&self, chart: &HelmChart, values_file: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.config.binary)
            .arg("template")
            .arg(&chart.name)
            .arg(&chart.chart)
            .current_dir(&self.config.dir);
        if let Some(namespace) = &chart.namespace {
            cmd = cmd.arg("--namespace").arg(namespace);
        }
        if let Some(version) = &chart.version {
            cmd = cmd.arg("--version").arg(version);
        }
        cmd.arg("--values").arg(values_file.display().to_string())
    }
}

#[async_trait]
impl Renderer for HelmRenderer {
    fn name(&self) -> &str {
        "helm"
    }

    async fn render_manifests(&self, values: &Values, ctx: &ExecContext) -> Result<Vec<ManifestFile>> {
        if self.config.charts.is_empty() {
            return Ok(Vec::new());
        }
        let values_file = self.write_values(values)?;

        let mut manifests = Vec::with_capacity(self.config.charts.len());
        for chart in &self.config.charts {
            let cmd = self.template_command(chart, values_file.path());
            let output = self.executor.run_silent(&cmd, ctx).await.map_err(|e| {
                if e.is_cancelled() {
                    ClusterError::Kube(e)
                } else {
                    ClusterError::Render {
                        renderer: "helm".to_string(),
                        message: format!("chart '{}': {}", chart.name, e),
                    }
                }
            })?;
            tracing::debug!(manifest = %chart.name, chart = %chart.chart, "rendered chart");
            manifests.push(ManifestFile::new(chart.name.clone(), output));
        }
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcm_kube::MockExecutor;

    fn chart(name: &str, chart: &str) -> HelmChart {
        HelmChart {
            name: name.into(),
            chart: chart.into(),
            namespace: None,
            version: None,
        }
    }

    #[tokio::test]
    async fn test_one_manifest_per_chart() {
        let mock = MockExecutor::new();
        mock.respond("template ingress", "kind: Service\nmetadata:\n  name: ingress\n")
            .respond("template app", "kind: Deployment\nmetadata:\n  name: app\n");

        let renderer = HelmRenderer::new(
            HelmConfig {
                charts: vec![
                    HelmChart {
                        namespace: Some("ingress".into()),
                        version: Some("4.11.0".into()),
                        ..chart("ingress", "ingress-nginx/ingress-nginx")
                    },
                    chart("app", "./charts/app"),
                ],
                ..Default::default()
            },
            Arc::new(mock.clone()),
        );

        let manifests = renderer
            .render_manifests(&Values::from_yaml("replicas: 2\n").unwrap(), &ExecContext::new())
            .await
            .unwrap();

        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].name, "ingress");
        assert!(manifests[0].content.contains("kind: Service"));
        assert_eq!(manifests[1].name, "app");

        let commands = mock.commands();
        assert!(commands[0].starts_with(
            "helm template ingress ingress-nginx/ingress-nginx --namespace ingress --version 4.11.0 --values "
        ));
        assert!(commands[0].ends_with(".yaml"));
        assert!(commands[1].starts_with("helm template app ./charts/app --values "));
        assert!(mock.calls().iter().all(|c| c.silent));
    }

    #[tokio::test]
    async fn test_chart_failure_names_chart() {
        let mock = MockExecutor::new();
        mock.fail("template", 1, "Error: chart not found");
        let renderer = HelmRenderer::new(
            HelmConfig {
                charts: vec![chart("app", "missing/app")],
                ..Default::default()
            },
            Arc::new(mock),
        );

        let err = renderer
            .render_manifests(&Values::new(), &ExecContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chart 'app'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helm_warnings_stay_out_of_manifest() {
        use kcm_kube::ProcessExecutor;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let helm = dir.path().join("helm");
        std::fs::write(
            &helm,
            "#!/bin/sh\necho 'WARNING: Kubernetes configuration file is group-readable' >&2\nprintf 'kind: ConfigMap\\nmetadata:\\n  name: app\\n'\n",
        )
        .unwrap();
        std::fs::set_permissions(&helm, std::fs::Permissions::from_mode(0o755)).unwrap();

        let renderer = HelmRenderer::new(
            HelmConfig {
                charts: vec![chart("app", "./charts/app")],
                binary: helm.display().to_string(),
                dir: dir.path().to_path_buf(),
            },
            Arc::new(ProcessExecutor::new()),
        );

        let manifests = renderer
            .render_manifests(&Values::new(), &ExecContext::new())
            .await
            .unwrap();
        assert_eq!(manifests[0].content, "kind: ConfigMap\nmetadata:\n  name: app\n");
    }

    #[test]
    fn test_values_file_content() {
        let renderer = HelmRenderer::new(HelmConfig::default(), Arc::new(MockExecutor::new()));
        let file = renderer
            .write_values(&Values::from_yaml("image:\n  tag: v1\n").unwrap())
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(file.path()).unwrap(),
            "image:\n  tag: v1\n"
        );
    }
}
