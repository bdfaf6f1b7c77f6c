use async_trait::async_trait;
use kcm_core::{ManifestFile, Values};
use kcm_kube::ExecContext;

use super::Renderer;
use crate::error::Result;

/// Renders no manifests; every deployed manifest is torn down
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

#[async_trait]
impl Renderer for NullRenderer {
    fn name(&self) -> &str {
        "null"
    }

    async fn render_manifests(&self, _values: &Values, _ctx: &ExecContext) -> Result<Vec<ManifestFile>> {
        Ok(Vec::new())
    }
}
