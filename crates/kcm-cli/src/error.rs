//! CLI error types with exit code handling
//!
//! Every library error ends up in [`CliError`], a miette diagnostic whose
//! exit code mirrors the failing subprocess when there is one.

use kcm_cluster::ClusterError;
use kcm_core::CoreError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Config file or flags are invalid
    #[error("Configuration error: {message}")]
    #[diagnostic(code(kcm::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Nothing to reach the cluster with
    #[error("No cluster credentials")]
    #[diagnostic(
        code(kcm::cli::credentials),
        help(
            "set cluster.kubeconfig (or cluster.server and cluster.token) in kcm.yaml, \
             pass --cluster-kubeconfig / --cluster-server and --cluster-token, \
             or use a provisioner that outputs them"
        )
    )]
    Credentials,

    /// The provisioner failed
    #[error("Infrastructure error: {message}")]
    #[diagnostic(code(kcm::cli::infra))]
    Infra {
        message: String,
        exit_code: Option<i32>,
    },

    /// A cluster operation failed
    #[error("Cluster error: {message}")]
    #[diagnostic(code(kcm::cli::cluster))]
    Cluster {
        message: String,
        exit_code: Option<i32>,
        #[help]
        help: Option<String>,
    },

    /// A renderer or template failed
    #[error("Template error: {message}")]
    #[diagnostic(code(kcm::cli::template))]
    Template { message: String },

    /// A rendered or stored manifest is invalid
    #[error("Manifest error: {message}")]
    #[diagnostic(code(kcm::cli::manifest))]
    Manifest {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Interrupted by the user
    #[error("Cancelled")]
    #[diagnostic(code(kcm::cli::cancelled))]
    Cancelled,

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(kcm::cli::io))]
    Io { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Infra { exit_code, .. } | CliError::Cluster { exit_code, .. } => {
                exit_code.filter(|code| *code != exit_codes::SUCCESS).unwrap_or(exit_codes::ERROR)
            }
            _ => exit_codes::ERROR,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    fn manifest(message: String, help: &str) -> Self {
        Self::Manifest {
            message,
            help: Some(help.to_string()),
        }
    }
}

impl From<ClusterError> for CliError {
    fn from(err: ClusterError) -> Self {
        if err.is_cancelled() {
            return CliError::Cancelled;
        }
        if err.is_empty_credentials() {
            return CliError::Credentials;
        }

        let exit_code = err.exit_code();
        let message = err.to_string();
        match err {
            ClusterError::Infra { .. } | ClusterError::InvalidOutputs { .. } => {
                CliError::Infra { message, exit_code }
            }
            ClusterError::Render { .. } | ClusterError::Template { .. } => {
                CliError::Template { message }
            }
            ClusterError::DuplicateManifest { .. } => {
                CliError::manifest(message, "every rendered manifest needs a distinct name")
            }
            ClusterError::Core(CoreError::UnsupportedHookKind { .. }) => {
                CliError::manifest(message, "only Job resources can carry the kcm/hooks annotation")
            }
            ClusterError::Core(
                CoreError::InvalidAnnotation { .. }
                | CoreError::InvalidField { .. }
                | CoreError::InvalidManifestName { .. }
                | CoreError::YamlParse(_),
            ) => CliError::Manifest {
                message,
                help: None,
            },
            ClusterError::Core(CoreError::ValuesMerge { .. }) => CliError::config(message),
            ClusterError::Core(CoreError::Io(_) | CoreError::File { .. }) | ClusterError::Io(_) => {
                CliError::Io { message }
            }
            ClusterError::Kube(ref e) => {
                let help = e.failed_stage().map(|stage| {
                    format!("the revision stopped in its {stage} stage; pending deletions were kept in the ledger")
                });
                CliError::Cluster {
                    message,
                    exit_code,
                    help,
                }
            }
            _ => CliError::Cluster {
                message,
                exit_code,
                help: None,
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        ClusterError::from(err).into()
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kcm_kube::{KubeError, UpgradeStage};

    fn command_failed(code: Option<i32>) -> KubeError {
        KubeError::CommandFailed {
            command: "kubectl apply -f -".into(),
            code,
            output: "error: the server could not find the requested resource".into(),
        }
    }

    #[test]
    fn test_subprocess_exit_code_mirrored() {
        let err: CliError = ClusterError::Kube(KubeError::RevisionFailed {
            revision: "m1 (initial)".into(),
            stage: UpgradeStage::ApplyRun,
            source: Box::new(command_failed(Some(3))),
        })
        .into();

        assert_eq!(err.exit_code(), 3);
        match err {
            CliError::Cluster { help, .. } => assert!(help.unwrap().contains("apply stage")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_exit_code_is_one() {
        let err: CliError = ClusterError::Kube(command_failed(None)).into();
        assert_eq!(err.exit_code(), exit_codes::ERROR);

        let err: CliError = ClusterError::DuplicateManifest { name: "app".into() }.into();
        assert_eq!(err.exit_code(), exit_codes::ERROR);
    }

    #[test]
    fn test_infra_error() {
        let err: CliError = ClusterError::infra(
            kcm_cluster::InfraStage::Apply,
            KubeError::CommandFailed {
                command: "terraform apply -input=false -auto-approve".into(),
                code: Some(2),
                output: String::new(),
            },
        )
        .into();
        assert!(matches!(err, CliError::Infra { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_special_cases() {
        let err: CliError = ClusterError::Kube(KubeError::Cancelled).into();
        assert!(matches!(err, CliError::Cancelled));

        let err: CliError = CoreError::EmptyCredentials.into();
        assert!(matches!(err, CliError::Credentials));

        let err: CliError = CoreError::UnsupportedHookKind {
            kind: "Deployment".into(),
            name: "web".into(),
        }
        .into();
        assert!(matches!(err, CliError::Manifest { help: Some(_), .. }));

        let err: CliError = CoreError::InvalidField {
            resource: "StatefulSet default/web".into(),
            field: "spec.replicas".into(),
            value: "4611686018427387904".into(),
            reason: "must not exceed 2147483647".into(),
        }
        .into();
        assert!(matches!(err, CliError::Manifest { help: None, .. }));
        assert_eq!(err.exit_code(), exit_codes::ERROR);
    }
}
