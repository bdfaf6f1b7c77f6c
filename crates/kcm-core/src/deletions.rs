//! Deletion ledger
//!
//! `deletions.yaml` lists resources that must be removed from the cluster at
//! a given phase of a run. Entries are delivered once: a successful delete
//! drops the entry when the ledger is saved, a failed one stays for the next
//! run.
//!
//! ```yaml
//! preApply:
//!   - kind: Pod
//!     name: foo
//!     namespace: kube-system
//! postApply:
//!   - kind: ConfigMap
//!     namespace: monitoring
//!     labels:
//!       app: legacy
//! preDestroy: []
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::files::FileChangeSet;

/// Targets one or more cluster resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Selector {
    /// Select a single resource by name
    pub fn named(kind: impl Into<String>, name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            name: Some(name.into()),
            namespace,
            labels: BTreeMap::new(),
        }
    }

    /// Select every resource of `kind` carrying `labels`
    pub fn labelled(
        kind: impl Into<String>,
        labels: BTreeMap<String, String>,
        namespace: Option<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            namespace,
            labels,
        }
    }

    /// Non-empty name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Non-empty namespace, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|n| !n.is_empty())
    }

    /// A selector needs a name or at least one label
    pub fn validate(&self) -> Result<()> {
        if self.name().is_none() && self.labels.is_empty() {
            return Err(CoreError::InvalidSelector {
                kind: self.kind.clone(),
            });
        }
        Ok(())
    }

    /// Labels as `k1=v1,k2=v2`, keys sorted
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name(), self.label_selector()) {
            (Some(name), _) => write!(f, "{}/{}", self.kind, name)?,
            (None, Some(labels)) => write!(f, "{} -l {}", self.kind, labels)?,
            (None, None) => write!(f, "{}", self.kind)?,
        }
        if let Some(ns) = self.namespace() {
            write!(f, " (namespace {})", ns)?;
        }
        Ok(())
    }
}

/// The on-disk ledger document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deletions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_apply: Vec<Selector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_apply: Vec<Selector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_destroy: Vec<Selector>,
}

impl Deletions {
    pub fn is_empty(&self) -> bool {
        self.pre_apply.is_empty() && self.post_apply.is_empty() && self.pre_destroy.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pre_apply.len() + self.post_apply.len() + self.pre_destroy.len()
    }

    /// YAML document, empty when there is nothing left to delete
    pub fn to_yaml(&self) -> Result<String> {
        if self.is_empty() {
            return Ok(String::new());
        }
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Phase of a run at which ledger entries are deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeletionPhase {
    /// Before manifests are applied
    PreApply,
    /// After manifests were applied
    PostApply,
    /// Before infrastructure is destroyed
    PreDestroy,
}

impl fmt::Display for DeletionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeletionPhase::PreApply => "preApply",
            DeletionPhase::PostApply => "postApply",
            DeletionPhase::PreDestroy => "preDestroy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionStatus {
    #[default]
    Pending,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub selector: Selector,
    pub status: DeletionStatus,
}

impl LedgerEntry {
    pub fn pending(selector: Selector) -> Self {
        Self {
            selector,
            status: DeletionStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DeletionStatus::Pending
    }
}

/// In-memory ledger tracking the status of every entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionLedger {
    pre_apply: Vec<LedgerEntry>,
    post_apply: Vec<LedgerEntry>,
    pre_destroy: Vec<LedgerEntry>,
}

impl DeletionLedger {
    /// Read the ledger file; a missing or empty file is an empty ledger
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(CoreError::file(path, e)),
        };
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let blank = content
            .lines()
            .map(str::trim)
            .all(|l| l.is_empty() || l == "---" || l.starts_with('#'));
        if blank {
            return Ok(Self::default());
        }
        let deletions: Option<Deletions> = serde_yaml::from_str(content)?;
        Ok(deletions.map(Self::from).unwrap_or_default())
    }

    fn phase(&self, phase: DeletionPhase) -> &Vec<LedgerEntry> {
        match phase {
            DeletionPhase::PreApply => &self.pre_apply,
            DeletionPhase::PostApply => &self.post_apply,
            DeletionPhase::PreDestroy => &self.pre_destroy,
        }
    }

    fn phase_mut(&mut self, phase: DeletionPhase) -> &mut Vec<LedgerEntry> {
        match phase {
            DeletionPhase::PreApply => &mut self.pre_apply,
            DeletionPhase::PostApply => &mut self.post_apply,
            DeletionPhase::PreDestroy => &mut self.pre_destroy,
        }
    }

    pub fn entries(&self, phase: DeletionPhase) -> &[LedgerEntry] {
        self.phase(phase)
    }

    /// Pending selectors of a phase with their index
    pub fn pending(&self, phase: DeletionPhase) -> Vec<(usize, Selector)> {
        self.phase(phase)
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_pending())
            .map(|(i, e)| (i, e.selector.clone()))
            .collect()
    }

    pub fn mark_deleted(&mut self, phase: DeletionPhase, index: usize) {
        if let Some(entry) = self.phase_mut(phase).get_mut(index) {
            entry.status = DeletionStatus::Deleted;
        }
    }

    /// Add a pending entry unless the same selector is already pending
    pub fn queue(&mut self, phase: DeletionPhase, selector: Selector) -> bool {
        let entries = self.phase_mut(phase);
        if entries.iter().any(|e| e.is_pending() && e.selector == selector) {
            return false;
        }
        entries.push(LedgerEntry::pending(selector));
        true
    }

    pub fn pending_count(&self) -> usize {
        self.all().filter(|e| e.is_pending()).count()
    }

    pub fn deleted_count(&self) -> usize {
        self.all().filter(|e| !e.is_pending()).count()
    }

    fn all(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.pre_apply
            .iter()
            .chain(&self.post_apply)
            .chain(&self.pre_destroy)
    }

    /// The ledger document holding only entries still pending
    pub fn filter_pending(&self) -> Deletions {
        let pending = |entries: &[LedgerEntry]| -> Vec<Selector> {
            entries
                .iter()
                .filter(|e| e.is_pending())
                .map(|e| e.selector.clone())
                .collect()
        };
        Deletions {
            pre_apply: pending(&self.pre_apply),
            post_apply: pending(&self.post_apply),
            pre_destroy: pending(&self.pre_destroy),
        }
    }

    /// Persist the pending entries through a file change set
    pub fn save(&self, path: &Path, dry_run: bool) -> Result<bool> {
        let content = self.filter_pending().to_yaml()?;
        FileChangeSet::new(path, content)?.commit(dry_run)
    }
}

impl From<Deletions> for DeletionLedger {
    fn from(deletions: Deletions) -> Self {
        let entries = |selectors: Vec<Selector>| -> Vec<LedgerEntry> {
            selectors.into_iter().map(LedgerEntry::pending).collect()
        };
        Self {
            pre_apply: entries(deletions.pre_apply),
            post_apply: entries(deletions.post_apply),
            pre_destroy: entries(deletions.pre_destroy),
        }
    }
}
