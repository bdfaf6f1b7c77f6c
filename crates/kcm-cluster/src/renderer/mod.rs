//! Manifest renderers
//!
//! A renderer expands values into named manifest files. Names must be
//! stable across runs: they pair revisions and name the files under the
//! manifests directory.

pub mod filters;
mod helm;
mod null;
mod template;

pub use helm::{HelmChart, HelmConfig, HelmRenderer};
pub use null::NullRenderer;
pub use template::{TemplateConfig, TemplateRenderer};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kcm_core::{ManifestFile, Values};
use kcm_kube::{ExecContext, Executor};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Workload rendering contract
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render_manifests(&self, values: &Values, ctx: &ExecContext) -> Result<Vec<ManifestFile>>;
}

/// Renderer selection in the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RendererConfig {
    Helm(HelmConfig),
    Template(TemplateConfig),
    #[default]
    #[serde(alias = "none")]
    Null,
}

impl RendererConfig {
    /// Resolve relative directories against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        match self {
            RendererConfig::Helm(config) => config.dir = base.join(&config.dir),
            RendererConfig::Template(config) => config.dir = base.join(&config.dir),
            RendererConfig::Null => {}
        }
    }
}

/// The renderers kcm ships with
pub enum AnyRenderer {
    Helm(HelmRenderer),
    Template(TemplateRenderer),
    Null(NullRenderer),
}

impl AnyRenderer {
    pub fn from_config(config: &RendererConfig, executor: Arc<dyn Executor>) -> Self {
        match config {
            RendererConfig::Helm(c) => AnyRenderer::Helm(HelmRenderer::new(c.clone(), executor)),
            RendererConfig::Template(c) => AnyRenderer::Template(TemplateRenderer::new(c.clone())),
            RendererConfig::Null => AnyRenderer::Null(NullRenderer),
        }
    }

    fn inner(&self) -> &dyn Renderer {
        match self {
            AnyRenderer::Helm(r) => r,
            AnyRenderer::Template(r) => r,
            AnyRenderer::Null(r) => r,
        }
    }
}

#[async_trait]
impl Renderer for AnyRenderer {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn render_manifests(&self, values: &Values, ctx: &ExecContext) -> Result<Vec<ManifestFile>> {
        self.inner().render_manifests(values, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_config_from_yaml() {
        let config: RendererConfig = serde_yaml::from_str(
            r#"
type: helm
charts:
  - name: ingress
    chart: ingress-nginx/ingress-nginx
    namespace: ingress
    version: 4.11.0
  - name: app
    chart: ./charts/app
"#,
        )
        .unwrap();
        let RendererConfig::Helm(helm) = &config else {
            panic!("expected helm, got {config:?}");
        };
        assert_eq!(helm.charts.len(), 2);
        assert_eq!(helm.charts[0].namespace.as_deref(), Some("ingress"));
        assert_eq!(helm.charts[1].version, None);

        let config: RendererConfig = serde_yaml::from_str("type: template\n").unwrap();
        assert_eq!(
            config,
            RendererConfig::Template(TemplateConfig {
                dir: PathBuf::from("templates")
            })
        );
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = RendererConfig::Template(TemplateConfig::default());
        config.resolve_paths(Path::new("/work"));
        assert_eq!(
            config,
            RendererConfig::Template(TemplateConfig {
                dir: PathBuf::from("/work/templates")
            })
        );
    }
}
