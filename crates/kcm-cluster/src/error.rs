//! Error types for kcm-cluster

use std::fmt;

use kcm_core::CoreError;
use kcm_kube::KubeError;
use thiserror::Error;

/// Result type for kcm-cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Infrastructure step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfraStage {
    Init,
    Plan,
    Apply,
    Output,
    Destroy,
}

impl fmt::Display for InfraStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InfraStage::Init => "init",
            InfraStage::Plan => "plan",
            InfraStage::Apply => "apply",
            InfraStage::Output => "output",
            InfraStage::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// Errors raised while provisioning, rendering or orchestrating a run
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The provisioner failed
    #[error("infrastructure {stage} failed: {source}")]
    Infra {
        stage: InfraStage,
        #[source]
        source: KubeError,
    },

    /// Provisioner outputs could not be read
    #[error("invalid {provisioner} outputs: {message}")]
    InvalidOutputs { provisioner: String, message: String },

    /// A renderer failed as a whole
    #[error("{renderer} renderer failed: {message}")]
    Render { renderer: String, message: String },

    /// A single template failed to render
    #[error("failed to render template '{template}': {message}")]
    Template { template: String, message: String },

    /// Two rendered manifests share a name
    #[error("manifest '{name}' is rendered more than once")]
    DuplicateManifest { name: String },

    /// Cluster operation error
    #[error(transparent)]
    Kube(#[from] KubeError),

    /// Data model error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    pub fn infra(stage: InfraStage, source: KubeError) -> Self {
        Self::Infra { stage, source }
    }

    /// Exit code of the failing subprocess, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ClusterError::Infra { source, .. } | ClusterError::Kube(source) => source.exit_code(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ClusterError::Infra { source, .. } | ClusterError::Kube(source) => source.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_empty_credentials(&self) -> bool {
        matches!(self, ClusterError::Core(CoreError::EmptyCredentials))
    }
}
