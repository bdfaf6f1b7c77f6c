//! Revision upgrader
//!
//! Executes one revision at a time:
//!
//! - Initial / Upgrade: pre-apply hooks, delete removed resources, apply
//!   changed and added resources, post-apply hooks
//! - Removal: pre-delete hooks, delete resources, post-delete hooks
//!
//! Hook Jobs flagged `delete-after-completion` are deleted after the
//! post hooks ran.
//!
//! Every stage short-circuits the rest of the revision on failure. Once a
//! revision finalized, its manifest file is written (or removed).

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use kcm_core::{
    ChangeSet, FileChangeSet, Hook, HookType, ResourceId, Revision, RevisionKind, Selector,
    serialize,
};

use crate::client::KubeClient;
use crate::error::{KubeError, Result};
use crate::exec::ExecContext;

/// Stage of the per-revision state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpgradeStage {
    Planned,
    HooksPreRun,
    DeletionsRun,
    ApplyRun,
    HooksPostRun,
    Finalized,
}

impl fmt::Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradeStage::Planned => "planned",
            UpgradeStage::HooksPreRun => "pre-hooks",
            UpgradeStage::DeletionsRun => "deletions",
            UpgradeStage::ApplyRun => "apply",
            UpgradeStage::HooksPostRun => "post-hooks",
            UpgradeStage::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// Upgrader settings
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    /// Log the plan and diffs, touch nothing
    pub dry_run: bool,
    /// Re-apply resources whose content did not change
    pub include_unchanged: bool,
    /// Where manifest files live
    pub manifests_dir: PathBuf,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            include_unchanged: false,
            manifests_dir: PathBuf::from("manifests"),
        }
    }
}

/// Outcome of a single hook
#[derive(Debug, Clone)]
pub struct HookResult {
    pub name: String,
    pub hook_type: HookType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The hook was waited on
    pub waited: bool,
    /// The hook Job was deleted after completing
    pub deleted: bool,
}

impl HookResult {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// What a revision did
#[derive(Debug, Clone)]
pub struct RevisionReport {
    pub name: String,
    pub kind: RevisionKind,
    /// Last stage reached
    pub stage: UpgradeStage,
    pub dry_run: bool,
    pub applied: Vec<ResourceId>,
    pub deleted: Vec<ResourceId>,
    pub unchanged: usize,
    pub hooks: Vec<HookResult>,
    /// PVC deletions that failed and must be retried later
    pub deferred_deletions: Vec<Selector>,
    /// The manifest file was written or removed
    pub manifest_changed: bool,
}

impl RevisionReport {
    fn new(revision: &Revision, dry_run: bool) -> Self {
        Self {
            name: revision.name().to_string(),
            kind: revision.kind(),
            stage: UpgradeStage::Planned,
            dry_run,
            applied: Vec::new(),
            deleted: Vec::new(),
            unchanged: 0,
            hooks: Vec::new(),
            deferred_deletions: Vec::new(),
            manifest_changed: false,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} deleted, {} unchanged, {} hooks",
            self.applied.len(),
            self.deleted.len(),
            self.unchanged,
            self.hooks.len()
        )
    }
}

/// Drives revisions against the cluster
pub struct Upgrader<'a> {
    client: &'a KubeClient,
    options: UpgradeOptions,
}

impl<'a> Upgrader<'a> {
    pub fn new(client: &'a KubeClient, options: UpgradeOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &UpgradeOptions {
        &self.options
    }

    /// Execute a revision
    pub async fn upgrade(&self, revision: &Revision, ctx: &ExecContext) -> Result<RevisionReport> {
        let set = revision.change_set();
        let mut report = RevisionReport::new(revision, self.options.dry_run);
        report.unchanged = set.unchanged.len();

        self.log_plan(revision, &set);

        if self.options.dry_run {
            report.manifest_changed = self.finalize_manifest(revision, &set)?;
            report.stage = UpgradeStage::Finalized;
            return Ok(report);
        }

        let (pre, post) = match revision.kind() {
            RevisionKind::Removal => (HookType::PreDelete, HookType::PostDelete),
            RevisionKind::Initial | RevisionKind::Upgrade => (HookType::PreApply, HookType::PostApply),
        };

        let stage_error = |stage: UpgradeStage, e: KubeError| KubeError::RevisionFailed {
            revision: revision.to_string(),
            stage,
            source: Box::new(e),
        };

        report.stage = UpgradeStage::HooksPreRun;
        self.run_hooks(&set, pre, &mut report, ctx)
            .await
            .map_err(|e| stage_error(UpgradeStage::HooksPreRun, e))?;

        report.stage = UpgradeStage::DeletionsRun;
        self.delete_removed(&set, &mut report, ctx)
            .await
            .map_err(|e| stage_error(UpgradeStage::DeletionsRun, e))?;

        if revision.kind() != RevisionKind::Removal {
            report.stage = UpgradeStage::ApplyRun;
            let resources = set.to_apply(self.options.include_unchanged);
            if !resources.is_empty() {
                tracing::info!(
                    manifest = %revision.name(),
                    count = resources.len(),
                    "applying resources"
                );
                self.client
                    .apply_manifest(&serialize(&resources), ctx)
                    .await
                    .map_err(|e| stage_error(UpgradeStage::ApplyRun, e))?;
                report.applied = resources.iter().map(|r| r.id()).collect();
            }
        }

        report.stage = UpgradeStage::HooksPostRun;
        self.run_hooks(&set, post, &mut report, ctx)
            .await
            .map_err(|e| stage_error(UpgradeStage::HooksPostRun, e))?;
        self.delete_completed_hooks(&set, [pre, post], &mut report, ctx)
            .await
            .map_err(|e| stage_error(UpgradeStage::HooksPostRun, e))?;

        report.manifest_changed = self
            .finalize_manifest(revision, &set)
            .map_err(|e| stage_error(UpgradeStage::Finalized, e))?;
        report.stage = UpgradeStage::Finalized;

        tracing::info!(
            manifest = %revision.name(),
            kind = %revision.kind(),
            summary = %report.summary(),
            "revision finalized"
        );
        Ok(report)
    }

    /// Remove everything a revision deployed
    ///
    /// The on-disk manifest is removed when present, else the rendered one.
    pub async fn teardown(&self, revision: &Revision, ctx: &ExecContext) -> Result<RevisionReport> {
        let removal = revision.clone().into_removal();
        self.upgrade(&removal, ctx).await
    }

    async fn run_hooks(
        &self,
        set: &ChangeSet,
        hook_type: HookType,
        report: &mut RevisionReport,
        ctx: &ExecContext,
    ) -> Result<()> {
        let Some(hooks) = set.hooks.get(&hook_type) else {
            return Ok(());
        };

        for hook in hooks {
            let result = self
                .run_hook(hook, hook_type, ctx)
                .await
                .map_err(|e| match e {
                    KubeError::Cancelled => KubeError::Cancelled,
                    e => KubeError::HookFailed {
                        hook: hook.name().to_string(),
                        hook_type: hook_type.to_string(),
                        source: Box::new(e),
                    },
                })?;
            report.hooks.push(result);
        }
        Ok(())
    }

    async fn run_hook(&self, hook: &Hook, hook_type: HookType, ctx: &ExecContext) -> Result<HookResult> {
        let started_at = Utc::now();
        let resource = &hook.resource;
        tracing::info!(hook = %hook.name(), %hook_type, "running hook");

        self.client
            .apply_manifest(&serialize(std::slice::from_ref(resource)), ctx)
            .await?;

        let condition = hook.effective_wait_for();
        if let Some(condition) = condition {
            self.client
                .wait(
                    &resource.kind,
                    &resource.name,
                    &resource.namespace,
                    condition,
                    hook.wait_timeout,
                    ctx,
                )
                .await?;
        }

        Ok(HookResult {
            name: hook.name().to_string(),
            hook_type,
            started_at,
            finished_at: Utc::now(),
            waited: condition.is_some(),
            deleted: false,
        })
    }

    /// Delete the hook Jobs flagged `delete-after-completion`
    ///
    /// Runs once the revision's own resources are applied or deleted.
    async fn delete_completed_hooks(
        &self,
        set: &ChangeSet,
        hook_types: [HookType; 2],
        report: &mut RevisionReport,
        ctx: &ExecContext,
    ) -> Result<()> {
        let mut deleted: Vec<&str> = Vec::new();
        for hook_type in hook_types {
            let Some(hooks) = set.hooks.get(&hook_type) else {
                continue;
            };
            for hook in hooks.iter().filter(|h| h.delete_after_completion) {
                if deleted.contains(&hook.name()) {
                    continue;
                }
                let resource = &hook.resource;
                let selector =
                    Selector::named(&resource.kind, &resource.name, Some(resource.namespace.clone()));
                self.client
                    .delete_resource(&selector, ctx)
                    .await
                    .map_err(|e| match e {
                        KubeError::Cancelled => KubeError::Cancelled,
                        e => KubeError::HookFailed {
                            hook: hook.name().to_string(),
                            hook_type: hook_type.to_string(),
                            source: Box::new(e),
                        },
                    })?;
                if let Some(result) = report
                    .hooks
                    .iter_mut()
                    .find(|r| r.hook_type == hook_type && r.name == hook.name())
                {
                    result.deleted = true;
                }
                deleted.push(hook.name());
            }
        }
        Ok(())
    }

    async fn delete_removed(
        &self,
        set: &ChangeSet,
        report: &mut RevisionReport,
        ctx: &ExecContext,
    ) -> Result<()> {
        let resources = set.to_delete();
        if resources.is_empty() {
            return Ok(());
        }

        tracing::info!(count = resources.len(), "deleting resources");
        self.client.delete_manifest(&serialize(&resources), ctx).await?;
        report.deleted = resources.iter().map(|r| r.id()).collect();

        for selector in set.pvc_deletions() {
            match self.client.delete_resource(&selector, ctx).await {
                Ok(()) => tracing::info!(%selector, "deleted persistent volume claim"),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(%selector, error = %e, "deferring persistent volume claim deletion");
                    report.deferred_deletions.push(selector);
                }
            }
        }
        Ok(())
    }

    /// Write or remove the manifest file of a finalized revision
    fn finalize_manifest(&self, revision: &Revision, set: &ChangeSet) -> Result<bool> {
        let file_name = format!("{}.yaml", revision.name());
        let path = self.options.manifests_dir.join(file_name);

        let change = match revision.next() {
            None => FileChangeSet::removal(&path)?,
            Some(_) if set.is_empty() && !self.options.include_unchanged => return Ok(false),
            Some(next) => FileChangeSet::new(&path, next.content.clone())?,
        };
        Ok(change.commit(self.options.dry_run)?)
    }

    fn log_plan(&self, revision: &Revision, set: &ChangeSet) {
        let hooks: usize = set.hooks.values().map(Vec::len).sum();
        tracing::info!(
            manifest = %revision.name(),
            kind = %revision.kind(),
            dry_run = self.options.dry_run,
            hooks,
            "plan: {}",
            set.summary()
        );

        let ids = |label: &str, resources: &[kcm_core::Resource]| {
            for r in resources {
                tracing::debug!(manifest = %revision.name(), "{} {}", label, r.id());
            }
        };
        ids("add", &set.added);
        ids("change", &set.changed);
        ids("delete", &set.removed);
        if self.options.include_unchanged {
            ids("reapply", &set.unchanged);
        }
        for (hook_type, bucket) in &set.hooks {
            for hook in bucket {
                tracing::debug!(manifest = %revision.name(), %hook_type, "hook {}", hook.name());
            }
        }
    }
}
