//! Where cluster credentials come from

use async_trait::async_trait;
use kcm_core::{Credentials, Values};
use kcm_kube::ExecContext;

use crate::error::Result;
use crate::provisioner::Provisioner;

#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self, ctx: &ExecContext) -> Result<Credentials>;
}

/// Credentials given in the config file or on the command line
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Credentials);

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self, _ctx: &ExecContext) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// Credentials read from provisioner outputs
///
/// Outputs already fetched during the run are reused instead of asking
/// the provisioner again.
pub struct ProvisionerCredentials<'a> {
    provisioner: &'a dyn Provisioner,
    outputs: Option<Values>,
}

impl<'a> ProvisionerCredentials<'a> {
    pub fn new(provisioner: &'a dyn Provisioner) -> Self {
        Self {
            provisioner,
            outputs: None,
        }
    }

    pub fn with_outputs(mut self, outputs: Values) -> Self {
        self.outputs = Some(outputs);
        self
    }
}

#[async_trait]
impl CredentialSource for ProvisionerCredentials<'_> {
    async fn credentials(&self, ctx: &ExecContext) -> Result<Credentials> {
        let credentials = match &self.outputs {
            Some(outputs) => Credentials::from_values(outputs),
            None => Credentials::from_values(&self.provisioner.fetch(ctx).await?),
        };
        tracing::debug!(
            provisioner = self.provisioner.name(),
            found = !credentials.is_empty(),
            "credentials from provisioner outputs"
        );
        Ok(credentials)
    }
}

/// Static credentials when given, else the provisioner's
///
/// An empty result is an error: nothing can reach the cluster.
pub async fn resolve(
    static_source: &StaticCredentials,
    fallback: &dyn CredentialSource,
    ctx: &ExecContext,
) -> Result<Credentials> {
    let credentials = static_source.credentials(ctx).await?;
    let credentials = if credentials.is_empty() {
        fallback.credentials(ctx).await?
    } else {
        credentials
    };
    Ok(credentials.ensure_not_empty()?)
}
