//! Cluster manager
//!
//! Sequences a run: provisioner, values, credentials, renderer, revisions,
//! upgrader and the deletion ledger.
//!
//! The ledger is persisted once per run, after the cluster phase, whether
//! that phase succeeded or not.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use kcm_core::{
    CoreError, Credentials, DeletionLedger, DeletionPhase, FileChangeSet, Manifest, Revision,
    Values, build_revisions,
};
use kcm_kube::{
    ClientOptions, ExecContext, Executor, KubeClient, KubeError, RevisionReport, UpgradeOptions,
    Upgrader,
};

use crate::credentials::{self, ProvisionerCredentials, StaticCredentials};
use crate::error::{ClusterError, Result};
use crate::options::ManagerOptions;
use crate::provisioner::Provisioner;
use crate::renderer::Renderer;

/// What happened to the infrastructure during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InfraAction {
    #[default]
    Skipped,
    Reconciled,
    Provisioned,
    Destroyed,
}

impl fmt::Display for InfraAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InfraAction::Skipped => "skipped",
            InfraAction::Reconciled => "reconciled",
            InfraAction::Provisioned => "provisioned",
            InfraAction::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Summary of a run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub dry_run: bool,
    pub infrastructure: InfraAction,
    /// The values file was written (or would be, in a dry run)
    pub values_changed: bool,
    pub revisions: Vec<RevisionReport>,
    /// Ledger entries deleted during the run
    pub ledger_deleted: usize,
    /// Ledger entries left for the next run
    pub ledger_pending: usize,
}

impl RunReport {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub fn applied(&self) -> usize {
        self.revisions.iter().map(|r| r.applied.len()).sum()
    }

    pub fn deleted(&self) -> usize {
        self.revisions.iter().map(|r| r.deleted.len()).sum()
    }

    pub fn hooks(&self) -> usize {
        self.revisions.iter().map(|r| r.hooks.len()).sum()
    }
}

/// Top-level orchestrator
pub struct ClusterManager {
    provisioner: Box<dyn Provisioner>,
    renderer: Box<dyn Renderer>,
    executor: Arc<dyn Executor>,
    credentials: StaticCredentials,
    client_options: ClientOptions,
}

impl ClusterManager {
    pub fn new(
        provisioner: Box<dyn Provisioner>,
        renderer: Box<dyn Renderer>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            provisioner,
            renderer,
            executor,
            credentials: StaticCredentials::default(),
            client_options: ClientOptions::default(),
        }
    }

    /// Credentials that take precedence over provisioner outputs
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = StaticCredentials(credentials);
        self
    }

    pub fn with_client_options(mut self, options: ClientOptions) -> Self {
        self.client_options = options;
        self
    }

    /// Provision the infrastructure and converge the cluster on the rendered manifests
    pub async fn provision(&self, options: &ManagerOptions, ctx: &ExecContext) -> Result<RunReport> {
        let mut report = RunReport::new(options.dry_run);
        let mut values = self.load_values(options)?;
        let mut ledger = DeletionLedger::load(&options.deletions_path)?;

        if options.only_manifest {
            tracing::info!("leaving infrastructure untouched");
        } else if options.dry_run {
            tracing::info!(provisioner = self.provisioner.name(), "reconciling infrastructure");
            self.provisioner.reconcile(ctx).await?;
            report.infrastructure = InfraAction::Reconciled;
        } else {
            tracing::info!(provisioner = self.provisioner.name(), "provisioning infrastructure");
            self.provisioner.provision(ctx).await?;
            report.infrastructure = InfraAction::Provisioned;
        }

        let outputs = self.provisioner.fetch(ctx).await?;
        values.merge(&outputs);

        let credentials = if options.skip_manifests {
            None
        } else {
            Some(self.resolve_credentials(outputs, ctx).await?)
        };

        report.values_changed =
            FileChangeSet::new(&options.values_path, values.to_yaml()?)?.commit(options.dry_run)?;

        let Some(credentials) = credentials else {
            tracing::info!("skipping manifests");
            return Ok(report);
        };

        let revisions = self.plan(&values, options, ctx).await?;
        let client = self.client(&credentials, options)?;
        if !options.dry_run {
            std::fs::create_dir_all(&options.manifests_dir)
                .map_err(|e| CoreError::file(&options.manifests_dir, e))?;
            client.wait_for_cluster(ctx).await?;
        }

        let upgrader = Upgrader::new(&client, upgrade_options(options));
        let outcome = self
            .apply_revisions(&client, &upgrader, &revisions, &mut ledger, &mut report, ctx)
            .await;
        finalize_ledger(&ledger, options, &mut report, outcome)?;

        Ok(report)
    }

    /// Converge the cluster without touching the infrastructure
    pub async fn apply_manifests(&self, options: &ManagerOptions, ctx: &ExecContext) -> Result<RunReport> {
        let options = ManagerOptions {
            only_manifest: true,
            ..options.clone()
        };
        self.provision(&options, ctx).await
    }

    /// Tear down every manifest, then the infrastructure
    ///
    /// Revisions are torn down in reverse order; pending `preDestroy`
    /// deletions run before the infrastructure goes away.
    pub async fn destroy(&self, options: &ManagerOptions, ctx: &ExecContext) -> Result<RunReport> {
        let mut report = RunReport::new(options.dry_run);
        let mut values = self.load_values(options)?;
        let mut ledger = DeletionLedger::load(&options.deletions_path)?;

        let outputs = self.provisioner.fetch(ctx).await?;
        values.merge(&outputs);

        if options.skip_manifests {
            tracing::info!("skipping manifests");
        } else {
            let credentials = self.resolve_credentials(outputs, ctx).await?;
            let revisions = self.plan(&values, options, ctx).await?;
            let client = self.client(&credentials, options)?;
            if !options.dry_run {
                client.wait_for_cluster(ctx).await?;
            }

            let upgrader = Upgrader::new(&client, upgrade_options(options));
            let outcome = self
                .teardown(&client, &upgrader, &revisions, &mut ledger, &mut report, ctx)
                .await;
            finalize_ledger(&ledger, options, &mut report, outcome)?;
        }

        if options.only_manifest || options.dry_run {
            tracing::info!(dry_run = options.dry_run, "leaving infrastructure untouched");
        } else {
            tracing::info!(provisioner = self.provisioner.name(), "destroying infrastructure");
            self.provisioner.destroy(ctx).await?;
            report.infrastructure = InfraAction::Destroyed;
        }

        Ok(report)
    }

    /// Tear down every manifest, leaving the infrastructure
    pub async fn delete_manifests(&self, options: &ManagerOptions, ctx: &ExecContext) -> Result<RunReport> {
        let options = ManagerOptions {
            only_manifest: true,
            ..options.clone()
        };
        self.destroy(&options, ctx).await
    }

    fn load_values(&self, options: &ManagerOptions) -> Result<Values> {
        let mut values = Values::load_or_default(&options.values_path)?;
        values.merge(&options.overrides);
        Ok(values)
    }

    async fn resolve_credentials(&self, outputs: Values, ctx: &ExecContext) -> Result<Credentials> {
        let fallback = ProvisionerCredentials::new(self.provisioner.as_ref()).with_outputs(outputs);
        credentials::resolve(&self.credentials, &fallback, ctx).await
    }

    /// Render the next manifests and pair them with the deployed ones
    ///
    /// Every manifest is parsed here, so a malformed hook fails the run
    /// before anything touches the cluster.
    async fn plan(&self, values: &Values, options: &ManagerOptions, ctx: &ExecContext) -> Result<Vec<Revision>> {
        let files = self.renderer.render_manifests(values, ctx).await?;

        let mut names = BTreeSet::new();
        let mut next = Vec::with_capacity(files.len());
        for file in &files {
            if !names.insert(file.name.as_str()) {
                return Err(ClusterError::DuplicateManifest {
                    name: file.name.clone(),
                });
            }
            next.push(Manifest::from_file_content(file)?);
        }

        let current = Manifest::load_dir(&options.manifests_dir)?;
        let revisions = build_revisions(current, next);
        tracing::info!(
            renderer = self.renderer.name(),
            rendered = files.len(),
            revisions = revisions.len(),
            "revisions planned"
        );
        Ok(revisions)
    }

    fn client(&self, credentials: &Credentials, options: &ManagerOptions) -> Result<KubeClient> {
        let client_options = self.client_options.clone().with_dry_run(options.dry_run);
        Ok(KubeClient::new(self.executor.clone(), credentials, client_options)?)
    }

    async fn apply_revisions(
        &self,
        client: &KubeClient,
        upgrader: &Upgrader<'_>,
        revisions: &[Revision],
        ledger: &mut DeletionLedger,
        report: &mut RunReport,
        ctx: &ExecContext,
    ) -> Result<()> {
        run_deletions(client, ledger, DeletionPhase::PreApply, ctx).await?;

        for revision in revisions {
            let result = upgrader.upgrade(revision, ctx).await?;
            for selector in &result.deferred_deletions {
                ledger.queue(DeletionPhase::PostApply, selector.clone());
            }
            report.revisions.push(result);
        }

        run_deletions(client, ledger, DeletionPhase::PostApply, ctx).await
    }

    async fn teardown(
        &self,
        client: &KubeClient,
        upgrader: &Upgrader<'_>,
        revisions: &[Revision],
        ledger: &mut DeletionLedger,
        report: &mut RunReport,
        ctx: &ExecContext,
    ) -> Result<()> {
        for revision in revisions.iter().rev() {
            let result = upgrader.teardown(revision, ctx).await?;
            for selector in &result.deferred_deletions {
                ledger.queue(DeletionPhase::PreDestroy, selector.clone());
            }
            report.revisions.push(result);
        }

        run_deletions(client, ledger, DeletionPhase::PreDestroy, ctx).await
    }
}

fn upgrade_options(options: &ManagerOptions) -> UpgradeOptions {
    UpgradeOptions {
        dry_run: options.dry_run,
        include_unchanged: options.include_unchanged,
        manifests_dir: options.manifests_dir.clone(),
    }
}

/// Delete the pending selectors of a ledger phase
///
/// A failed deletion stays pending for the next run. An invalid selector
/// or a cancellation stops the run.
async fn run_deletions(
    client: &KubeClient,
    ledger: &mut DeletionLedger,
    phase: DeletionPhase,
    ctx: &ExecContext,
) -> Result<()> {
    let pending = ledger.pending(phase);
    if pending.is_empty() {
        return Ok(());
    }
    tracing::info!(%phase, count = pending.len(), "running ledger deletions");

    for (index, selector) in pending {
        match client.delete_resource(&selector, ctx).await {
            Ok(()) => {
                ledger.mark_deleted(phase, index);
                tracing::info!(%phase, %selector, "deleted");
            }
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(KubeError::Core(e @ CoreError::InvalidSelector { .. })) => return Err(e.into()),
            Err(e) => {
                tracing::warn!(%phase, %selector, error = %e, "deletion failed, keeping it pending");
            }
        }
    }
    Ok(())
}

/// Persist the pending ledger entries, keeping the run's own error first
fn finalize_ledger(
    ledger: &DeletionLedger,
    options: &ManagerOptions,
    report: &mut RunReport,
    outcome: Result<()>,
) -> Result<()> {
    report.ledger_deleted = ledger.deleted_count();
    report.ledger_pending = ledger.pending_count();

    let saved = ledger.save(&options.deletions_path, options.dry_run);
    match (outcome, saved) {
        (Err(e), Err(save_error)) => {
            tracing::error!(error = %save_error, "failed to persist the deletion ledger");
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), Err(save_error)) => Err(save_error.into()),
        (Ok(()), Ok(_)) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_totals() {
        let revision = |applied: usize, deleted: usize| RevisionReport {
            name: "m".into(),
            kind: kcm_core::RevisionKind::Upgrade,
            stage: kcm_kube::UpgradeStage::Finalized,
            dry_run: false,
            applied: vec![
                kcm_core::ResourceId {
                    kind: "ConfigMap".into(),
                    namespace: "default".into(),
                    name: "a".into(),
                };
                applied
            ],
            deleted: vec![
                kcm_core::ResourceId {
                    kind: "Service".into(),
                    namespace: "default".into(),
                    name: "b".into(),
                };
                deleted
            ],
            unchanged: 0,
            hooks: Vec::new(),
            deferred_deletions: Vec::new(),
            manifest_changed: true,
        };
        let report = RunReport {
            revisions: vec![revision(2, 0), revision(1, 3)],
            ..Default::default()
        };
        assert_eq!(report.applied(), 3);
        assert_eq!(report.deleted(), 3);
        assert_eq!(report.hooks(), 0);
    }

    #[test]
    fn test_infra_action_display() {
        assert_eq!(InfraAction::Reconciled.to_string(), "reconciled");
        assert_eq!(InfraAction::default(), InfraAction::Skipped);
    }
}
