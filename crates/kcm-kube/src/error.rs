//! Error types for kcm-kube

use thiserror::Error;

use crate::upgrader::UpgradeStage;

/// Result type for kcm-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while driving the cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Subprocess exited unsuccessfully
    #[error("`{command}` {}: {}", describe_exit(.code), .output.trim())]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    /// Subprocess could not be started
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Retry budget exhausted on a transient failure
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<KubeError>,
    },

    /// The cluster never answered the readiness probe
    #[error("cluster unreachable after {attempts} attempts: {}", .output.trim())]
    ClusterUnreachable { attempts: u32, output: String },

    /// `kubectl wait` failed or timed out
    #[error("waiting for {resource} ({condition}) failed: {source}")]
    WaitFailed {
        resource: String,
        condition: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Hook execution failed
    #[error("hook '{hook}' failed during {hook_type}: {source}")]
    HookFailed {
        hook: String,
        hook_type: String,
        #[source]
        source: Box<KubeError>,
    },

    /// A revision stopped at a given stage
    #[error("revision {revision} failed at stage {stage}: {source}")]
    RevisionFailed {
        revision: String,
        stage: UpgradeStage,
        #[source]
        source: Box<KubeError>,
    },

    /// Data model error
    #[error(transparent)]
    Core(#[from] kcm_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

impl KubeError {
    /// Exit code of the subprocess at the root of this error, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            KubeError::CommandFailed { code, .. } => *code,
            KubeError::RetriesExhausted { source, .. }
            | KubeError::WaitFailed { source, .. }
            | KubeError::HookFailed { source, .. }
            | KubeError::RevisionFailed { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    /// True when the run was cancelled, however deeply wrapped
    pub fn is_cancelled(&self) -> bool {
        match self {
            KubeError::Cancelled => true,
            KubeError::RetriesExhausted { source, .. }
            | KubeError::WaitFailed { source, .. }
            | KubeError::HookFailed { source, .. }
            | KubeError::RevisionFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Failed stage of a revision error
    pub fn failed_stage(&self) -> Option<UpgradeStage> {
        match self {
            KubeError::RevisionFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(code: Option<i32>) -> KubeError {
        KubeError::CommandFailed {
            command: "kubectl apply -f -".into(),
            code,
            output: "error: connection refused\n".into(),
        }
    }

    #[test]
    fn test_command_failed_message() {
        assert_eq!(
            failed(Some(1)).to_string(),
            "`kubectl apply -f -` exited with code 1: error: connection refused"
        );
        assert!(failed(None).to_string().contains("terminated by a signal"));
    }

    #[test]
    fn test_exit_code_through_wrappers() {
        let err = KubeError::RevisionFailed {
            revision: "m1 (upgrade)".into(),
            stage: UpgradeStage::ApplyRun,
            source: Box::new(KubeError::RetriesExhausted {
                operation: "apply".into(),
                attempts: 10,
                source: Box::new(failed(Some(3))),
            }),
        };
        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.failed_stage(), Some(UpgradeStage::ApplyRun));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_through_wrappers() {
        let err = KubeError::HookFailed {
            hook: "migrate".into(),
            hook_type: "pre-apply".into(),
            source: Box::new(KubeError::Cancelled),
        };
        assert!(err.is_cancelled());
        assert_eq!(err.exit_code(), None);
    }
}
