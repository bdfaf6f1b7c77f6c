//! MiniJinja template directory renderer

use std::path::PathBuf;

use async_trait::async_trait;
use kcm_core::{CoreError, Manifest, ManifestFile, Values};
use kcm_kube::ExecContext;
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::{Renderer, filters};
use crate::error::{ClusterError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateConfig {
    /// Directory whose `*.yaml` / `*.yml` files are templates
    pub dir: PathBuf,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("templates"),
        }
    }
}

/// Renders each template file of a directory into the manifest of the same stem
///
/// Values are exposed both as top-level variables and under `values`.
pub struct TemplateRenderer {
    config: TemplateConfig,
}

impl TemplateRenderer {
    pub fn new(config: TemplateConfig) -> Self {
        Self { config }
    }

    fn environment() -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        filters::register(&mut env);
        env
    }

    fn template_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.dir;
        if !dir.is_dir() {
            return Err(ClusterError::Render {
                renderer: self.name().to_string(),
                message: format!("template directory {} does not exist", dir.display()),
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ClusterError::Render {
                renderer: self.name().to_string(),
                message: e.to_string(),
            })?;
            let is_yaml = matches!(
                entry.path().extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml")
            );
            if entry.file_type().is_file() && is_yaml {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Template context: top-level keys of the values plus `values` itself
    fn context(values: &Values) -> serde_json::Value {
        let mut context = match values.inner() {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        context.insert("values".to_string(), values.inner().clone());
        serde_json::Value::Object(context)
    }
}

#[async_trait]
impl Renderer for TemplateRenderer {
    fn name(&self) -> &str {
        "template"
    }

    async fn render_manifests(&self, values: &Values, _ctx: &ExecContext) -> Result<Vec<ManifestFile>> {
        let env = Self::environment();
        let context = Self::context(values);

        let mut manifests = Vec::new();
        for path in self.template_files()? {
            let name = Manifest::name_from_path(&path)?;
            let source = std::fs::read_to_string(&path).map_err(|e| CoreError::file(&path, e))?;

            let content = env
                .render_str(&source, &context)
                .map_err(|e| ClusterError::Template {
                    template: path.display().to_string(),
                    message: e.to_string(),
                })?;
            tracing::debug!(manifest = %name, bytes = content.len(), "rendered template");
            manifests.push(ManifestFile::new(name, content));
        }
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn renderer(dir: &TempDir) -> TemplateRenderer {
        TemplateRenderer::new(TemplateConfig {
            dir: dir.path().to_path_buf(),
        })
    }

    fn values(yaml: &str) -> Values {
        Values::from_yaml(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_renders_yaml_files_sorted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("workloads.yml"),
            "kind: Deployment\nmetadata:\n  name: {{ app.name }}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "kind: ConfigMap\nmetadata:\n  name: {{ values.app.name }}-config\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "{{ not rendered }}").unwrap();
        std::fs::create_dir(dir.path().join("nested.yaml")).unwrap();

        let manifests = renderer(&dir)
            .render_manifests(&values("app:\n  name: web\n"), &ExecContext::new())
            .await
            .unwrap();

        let names: Vec<_> = manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["base", "workloads"]);
        assert_eq!(
            manifests[0].content,
            "kind: ConfigMap\nmetadata:\n  name: web-config\n"
        );
        assert_eq!(
            manifests[1].content,
            "kind: Deployment\nmetadata:\n  name: web\n"
        );
    }

    #[tokio::test]
    async fn test_undefined_value_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("m.yaml"), "name: {{ missing.key }}\n").unwrap();

        let err = renderer(&dir)
            .render_manifests(&Values::new(), &ExecContext::new())
            .await
            .unwrap_err();
        match err {
            ClusterError::Template { template, .. } => assert!(template.ends_with("m.yaml")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_filters_available() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("secret.yaml"),
            "data:\n  password: {{ password | b64encode | quote }}\n",
        )
        .unwrap();

        let manifests = renderer(&dir)
            .render_manifests(&values("password: admin\n"), &ExecContext::new())
            .await
            .unwrap();
        assert_eq!(manifests[0].content, "data:\n  password: \"YWRtaW4=\"\n");
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let renderer = TemplateRenderer::new(TemplateConfig {
            dir: dir.path().join("nope"),
        });

        let err = renderer
            .render_manifests(&Values::new(), &ExecContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Render { .. }));
    }
}
