//! kubectl-backed cluster client
//!
//! All cluster mutations go through a handful of kubectl invocations. The
//! client carries the transport arguments derived from the credentials and a
//! dry-run gate: in dry-run mode nothing is executed, only logged.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kcm_core::annotations::format_duration;
use kcm_core::{CoreError, Credentials, Selector};
use tempfile::NamedTempFile;

use crate::error::{KubeError, Result};
use crate::exec::{Command, ExecContext, Executor};
use crate::retry::{RetryConfig, retry, retry_with_backoff};

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// kubectl binary
    pub kubectl: String,
    /// Log mutations instead of running them
    pub dry_run: bool,
    /// Policy for applying and deleting manifests
    pub apply_retry: RetryConfig,
    /// Policy for the readiness probe
    pub cluster_retry: RetryConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            dry_run: false,
            apply_retry: RetryConfig::for_manifests(),
            cluster_retry: RetryConfig::for_cluster(),
        }
    }
}

impl ClientOptions {
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_kubectl(mut self, kubectl: impl Into<String>) -> Self {
        self.kubectl = kubectl.into();
        self
    }

    /// Use the same policy for manifests and readiness, e.g. `RetryConfig::immediate`
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.apply_retry = retry.clone();
        self.cluster_retry = retry;
        self
    }
}

#[derive(Debug)]
enum Transport {
    Kubeconfig {
        path: PathBuf,
        context: Option<String>,
        /// Keeps an inline kubeconfig on disk for the client's lifetime
        _file: Option<NamedTempFile>,
    },
    Token {
        server: String,
        token: String,
    },
}

/// kubectl-equivalent cluster operations
pub struct KubeClient {
    executor: Arc<dyn Executor>,
    options: ClientOptions,
    transport: Transport,
}

impl KubeClient {
    /// Create a client for the given credentials
    ///
    /// A kubeconfig (path or inline content) wins; otherwise both server
    /// and token are required.
    pub fn new(
        executor: Arc<dyn Executor>,
        credentials: &Credentials,
        options: ClientOptions,
    ) -> Result<Self> {
        let transport = match (credentials.kubeconfig(), credentials.server(), credentials.token()) {
            (Some(kubeconfig), _, _) => {
                let context = credentials.context().map(str::to_string);
                if credentials.is_inline_kubeconfig() {
                    let mut file = tempfile::Builder::new()
                        .prefix("kcm-kubeconfig-")
                        .suffix(".yaml")
                        .tempfile()?;
                    file.write_all(kubeconfig.as_bytes())?;
                    file.flush()?;
                    tracing::debug!(path = %file.path().display(), "wrote inline kubeconfig");
                    Transport::Kubeconfig {
                        path: file.path().to_path_buf(),
                        context,
                        _file: Some(file),
                    }
                } else {
                    Transport::Kubeconfig {
                        path: PathBuf::from(kubeconfig),
                        context,
                        _file: None,
                    }
                }
            }
            (None, Some(server), Some(token)) => Transport::Token {
                server: server.to_string(),
                token: token.to_string(),
            },
            _ => return Err(CoreError::EmptyCredentials.into()),
        };

        Ok(Self {
            executor,
            options,
            transport,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Base kubectl command with transport arguments
    fn kubectl(&self) -> Command {
        let cmd = Command::new(&self.options.kubectl);
        match &self.transport {
            Transport::Kubeconfig { path, context, .. } => {
                let cmd = cmd.arg("--kubeconfig").arg(path.display().to_string());
                match context {
                    Some(context) => cmd.arg("--context").arg(context),
                    None => cmd,
                }
            }
            Transport::Token { server, token } => cmd
                .arg("--server")
                .arg(server)
                .arg("--token")
                .secret_arg(token),
        }
    }

    /// Apply a YAML stream, retrying transient failures
    pub async fn apply_manifest(&self, content: &str, ctx: &ExecContext) -> Result<()> {
        if content.trim().is_empty() {
            return Ok(());
        }
        if self.options.dry_run {
            tracing::info!(documents = count_documents(content), "dry-run: skipping apply");
            return Ok(());
        }

        let cmd = self.kubectl().args(["apply", "-f", "-"]).stdin(content);
        retry(&self.options.apply_retry, "apply", ctx, || {
            self.executor.run(&cmd, ctx)
        })
        .await
        .map(|_| ())
    }

    /// Delete a YAML stream, ignoring resources already gone
    pub async fn delete_manifest(&self, content: &str, ctx: &ExecContext) -> Result<()> {
        if content.trim().is_empty() {
            return Ok(());
        }
        if self.options.dry_run {
            tracing::info!(documents = count_documents(content), "dry-run: skipping delete");
            return Ok(());
        }

        let cmd = self
            .kubectl()
            .args(["delete", "--ignore-not-found", "-f", "-"])
            .stdin(content);
        retry(&self.options.apply_retry, "delete", ctx, || {
            self.executor.run(&cmd, ctx)
        })
        .await
        .map(|_| ())
    }

    /// Delete resources by name or label selector
    ///
    /// Not retried: a failure is reported so the caller can keep the
    /// deletion pending.
    pub async fn delete_resource(&self, selector: &Selector, ctx: &ExecContext) -> Result<()> {
        selector.validate()?;
        if self.options.dry_run {
            tracing::info!(%selector, "dry-run: skipping delete");
            return Ok(());
        }

        let mut cmd = self.kubectl().arg("delete").arg(&selector.kind);
        cmd = match (selector.name(), selector.label_selector()) {
            (Some(name), _) => cmd.arg(name),
            (None, Some(labels)) => cmd.arg("-l").arg(labels),
            (None, None) => {
                return Err(CoreError::InvalidSelector {
                    kind: selector.kind.clone(),
                }
                .into());
            }
        };
        if let Some(namespace) = selector.namespace() {
            cmd = cmd.arg("--namespace").arg(namespace);
        }
        cmd = cmd.arg("--ignore-not-found");

        self.executor.run(&cmd, ctx).await.map(|_| ())
    }

    /// Wait for `kind/name` to reach `condition`
    ///
    /// The timeout is enforced by kubectl itself.
    pub async fn wait(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        condition: &str,
        timeout: Option<Duration>,
        ctx: &ExecContext,
    ) -> Result<()> {
        let resource = format!("{}/{}", kind, name);
        if self.options.dry_run {
            tracing::info!(%resource, condition, "dry-run: skipping wait");
            return Ok(());
        }

        let mut cmd = self
            .kubectl()
            .arg("wait")
            .arg(&resource)
            .arg("--namespace")
            .arg(namespace)
            .arg(format!("--for={}", condition));
        if let Some(timeout) = timeout {
            cmd = cmd.arg(format!("--timeout={}", format_duration(timeout)));
        }

        self.executor
            .run(&cmd, ctx)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                KubeError::Cancelled => KubeError::Cancelled,
                e => KubeError::WaitFailed {
                    resource,
                    condition: condition.to_string(),
                    source: Box::new(e),
                },
            })
    }

    /// Probe the API server until it answers
    pub async fn wait_for_cluster(&self, ctx: &ExecContext) -> Result<()> {
        if self.options.dry_run {
            tracing::info!("dry-run: skipping cluster readiness check");
            return Ok(());
        }

        let cmd = self.kubectl().arg("cluster-info");
        retry_with_backoff(&self.options.cluster_retry, "cluster-info", ctx, || {
            self.executor.run_silent(&cmd, ctx)
        })
        .await
        .map(|_| {
            tracing::info!("cluster is reachable");
        })
        .map_err(|(attempts, e)| match e {
            KubeError::Cancelled => KubeError::Cancelled,
            KubeError::CommandFailed { output, .. } => KubeError::ClusterUnreachable { attempts, output },
            e => KubeError::ClusterUnreachable {
                attempts,
                output: e.to_string(),
            },
        })
    }
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("base_command", &self.kubectl().to_string())
            .field("options", &self.options)
            .finish()
    }
}

fn count_documents(content: &str) -> usize {
    kcm_core::parse(content)
        .map(|p| p.resources.len() + p.hooks.values().map(Vec::len).sum::<usize>())
        .unwrap_or(0)
}
