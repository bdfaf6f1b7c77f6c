use async_trait::async_trait;
use kcm_core::Values;
use kcm_kube::ExecContext;

use super::Provisioner;
use crate::error::Result;

/// For clusters managed elsewhere: nothing to create, no outputs
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvisioner;

#[async_trait]
impl Provisioner for NullProvisioner {
    fn name(&self) -> &str {
        "null"
    }

    async fn provision(&self, _ctx: &ExecContext) -> Result<()> {
        Ok(())
    }

    async fn reconcile(&self, _ctx: &ExecContext) -> Result<()> {
        Ok(())
    }

    async fn fetch(&self, _ctx: &ExecContext) -> Result<Values> {
        Ok(Values::new())
    }

    async fn destroy(&self, _ctx: &ExecContext) -> Result<()> {
        Ok(())
    }
}
