//! kcm Kube - Cluster operations for kcm
//!
//! This crate drives a cluster through the `kubectl` binary:
//! - `Executor`: Cancellable subprocess execution, with a mock for tests
//! - `KubeClient`: apply, delete and wait, with bounded retries
//! - `Upgrader`: Executes a revision stage by stage, hooks included

pub mod client;
pub mod error;
pub mod exec;
pub mod mock;
pub mod retry;
pub mod upgrader;

pub use client::{ClientOptions, KubeClient};
pub use error::{KubeError, Result};
pub use exec::{CancelSignal, Command, ExecContext, Executor, ProcessExecutor};
pub use mock::{MockExecutor, RecordedCommand};
pub use retry::RetryConfig;
pub use upgrader::{HookResult, RevisionReport, UpgradeOptions, UpgradeStage, Upgrader};
