//! kcm Core - Data model for the kcm revision engine
//!
//! This crate provides the types shared by every other kcm crate:
//! - `Values`: Configuration values with deep merge support
//! - `Resource`: A parsed Kubernetes document with apply/delete ordering
//! - `Hook`: Annotated Jobs that run at lifecycle points
//! - `Manifest`: A named set of resources and hooks, one file on disk
//! - `Revision` / `ChangeSet`: The diff between two manifest generations
//! - `DeletionLedger`: Persisted resource deletions pending across runs
//! - `FileChangeSet`: Diff-and-write for every file kcm owns

pub mod annotations;
pub mod credentials;
pub mod deletions;
pub mod error;
pub mod files;
pub mod hooks;
pub mod manifest;
pub mod resource;
pub mod revision;
pub mod values;

pub use credentials::Credentials;
pub use deletions::{DeletionLedger, DeletionPhase, DeletionStatus, Deletions, LedgerEntry, Selector};
pub use error::{CoreError, Result};
pub use files::FileChangeSet;
pub use hooks::{Hook, HookMap, HookType};
pub use manifest::{Manifest, ManifestFile};
pub use resource::{DEFAULT_NAMESPACE, ParsedDocuments, Resource, ResourceId, parse, serialize};
pub use revision::{ChangeSet, Revision, RevisionKind, build_revisions};
pub use values::{Values, parse_set_values};
