//! Configuration: `kcm.yaml`, `KCM_*` environment and flags
//!
//! Precedence is defaults < config file < environment < flags. clap already
//! folds the environment into the flag values, so the file only has to be
//! overlaid with whatever [`GlobalArgs`] carries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use kcm_cluster::{ManagerOptions, ProvisionerConfig, RendererConfig};
use kcm_core::{Credentials, parse_set_values};
use kcm_kube::{ClientOptions, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

/// Config file looked up in the working directory
pub const CONFIG_FILE: &str = "kcm.yaml";

/// Flags shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding kcm.yaml; relative paths resolve against it
    #[arg(short = 'C', long, global = true, env = "KCM_WORKING_DIR", default_value = ".")]
    pub working_dir: PathBuf,

    /// Config file (default: kcm.yaml in the working directory)
    #[arg(long, global = true, env = "KCM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Values file
    #[arg(long, global = true, env = "KCM_VALUES")]
    pub values: Option<PathBuf>,

    /// Deletion ledger file
    #[arg(long, global = true, env = "KCM_DELETIONS")]
    pub deletions: Option<PathBuf>,

    /// Directory of the deployed manifests
    #[arg(long, global = true, env = "KCM_MANIFESTS_DIR")]
    pub manifests_dir: Option<PathBuf>,

    /// Plan and diff only, change nothing
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Leave the infrastructure alone
    #[arg(long, global = true)]
    pub only_manifest: bool,

    /// Stop once the values file is written
    #[arg(long, global = true)]
    pub skip_manifests: bool,

    /// Re-apply manifests whose content did not change
    #[arg(long, global = true)]
    pub include_unchanged: bool,

    /// Kubeconfig path or inline content
    #[arg(long, global = true, env = "KCM_CLUSTER_KUBECONFIG")]
    pub cluster_kubeconfig: Option<String>,

    /// Kubeconfig context
    #[arg(long, global = true, env = "KCM_CLUSTER_CONTEXT")]
    pub cluster_context: Option<String>,

    /// API server URL
    #[arg(long, global = true, env = "KCM_CLUSTER_SERVER")]
    pub cluster_server: Option<String>,

    /// Bearer token for the API server
    #[arg(long, global = true, env = "KCM_CLUSTER_TOKEN", hide_env_values = true)]
    pub cluster_token: Option<String>,

    /// Set values on the command line (key=value), repeatable
    #[arg(long = "set", global = true)]
    pub set: Vec<String>,

    /// kubectl binary
    #[arg(long, global = true, env = "KCM_KUBECTL")]
    pub kubectl: Option<String>,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Retry budgets of the cluster client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Attempts for applying or deleting a manifest
    pub attempts: u32,
    /// Cap of the exponential backoff
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Attempts of the cluster readiness probe
    pub cluster_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub cluster_interval: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            max_delay: Duration::from_secs(30),
            cluster_attempts: 30,
            cluster_interval: Duration::from_secs(2),
        }
    }
}

impl RetrySettings {
    fn manifests(&self) -> RetryConfig {
        RetryConfig {
            max_delay: self.max_delay,
            ..RetryConfig::exponential(self.attempts)
        }
    }

    fn cluster(&self) -> RetryConfig {
        RetryConfig::constant(self.cluster_attempts, self.cluster_interval)
    }
}

/// The merged configuration of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub provisioner: ProvisionerConfig,
    pub renderer: RendererConfig,
    /// Static credentials, preferred over provisioner outputs
    #[serde(skip_serializing_if = "Credentials::is_empty")]
    pub cluster: Credentials,
    pub values: PathBuf,
    pub deletions: PathBuf,
    pub manifests_dir: PathBuf,
    pub kubectl: String,
    pub include_unchanged: bool,
    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provisioner: ProvisionerConfig::default(),
            renderer: RendererConfig::default(),
            cluster: Credentials::default(),
            values: PathBuf::from("values.yaml"),
            deletions: PathBuf::from("deletions.yaml"),
            manifests_dir: PathBuf::from("manifests"),
            kubectl: "kubectl".to_string(),
            include_unchanged: false,
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Load the config file and overlay the flags
    ///
    /// A missing `kcm.yaml` means defaults; a file named with `--config`
    /// must exist.
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let working_dir = &args.working_dir;
        let mut config = match &args.config {
            Some(path) => Self::from_file(&working_dir.join(path))?,
            None => {
                let path = working_dir.join(CONFIG_FILE);
                if path.is_file() {
                    Self::from_file(&path)?
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_args(args);
        config.resolve_paths(working_dir);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config_with_help(
                format!("cannot read {}: {}", path.display(), e),
                "pass an existing file to --config, or drop it to use kcm.yaml",
            )
        })?;
        tracing::debug!(path = %path.display(), "loading config");
        Self::from_yaml(&content)
            .map_err(|e| CliError::config(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Overlay flags (and the environment clap read for them)
    fn apply_args(&mut self, args: &GlobalArgs) {
        if let Some(values) = &args.values {
            self.values = values.clone();
        }
        if let Some(deletions) = &args.deletions {
            self.deletions = deletions.clone();
        }
        if let Some(manifests_dir) = &args.manifests_dir {
            self.manifests_dir = manifests_dir.clone();
        }
        if let Some(kubectl) = &args.kubectl {
            self.kubectl = kubectl.clone();
        }
        self.include_unchanged |= args.include_unchanged;

        let flags = Credentials {
            server: args.cluster_server.clone(),
            token: args.cluster_token.clone(),
            kubeconfig: args.cluster_kubeconfig.clone(),
            context: args.cluster_context.clone(),
        };
        self.cluster = flags.or(std::mem::take(&mut self.cluster));
    }

    /// Resolve relative paths against `base`
    fn resolve_paths(&mut self, base: &Path) {
        self.values = base.join(&self.values);
        self.deletions = base.join(&self.deletions);
        self.manifests_dir = base.join(&self.manifests_dir);
        self.provisioner.resolve_paths(base);
        self.renderer.resolve_paths(base);

        if !self.cluster.is_inline_kubeconfig() {
            if let Some(kubeconfig) = self.cluster.kubeconfig.as_mut().filter(|k| !k.is_empty()) {
                if Path::new(kubeconfig.as_str()).is_relative() {
                    *kubeconfig = base.join(kubeconfig.as_str()).display().to_string();
                }
            }
        }
    }

    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.cluster.token().is_some() {
            config.cluster.token = Some("***".to_string());
        }
        if config.cluster.is_inline_kubeconfig() {
            config.cluster.kubeconfig = Some("<inline>".to_string());
        }
        config
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| CliError::config(e.to_string()))
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            apply_retry: self.retry.manifests(),
            cluster_retry: self.retry.cluster(),
            ..ClientOptions::default().with_kubectl(&self.kubectl)
        }
    }

    pub fn manager_options(&self, args: &GlobalArgs) -> Result<ManagerOptions> {
        Ok(ManagerOptions {
            dry_run: args.dry_run,
            values_path: self.values.clone(),
            manifests_dir: self.manifests_dir.clone(),
            deletions_path: self.deletions.clone(),
            only_manifest: args.only_manifest,
            skip_manifests: args.skip_manifests,
            include_unchanged: self.include_unchanged,
            overrides: parse_set_values(&args.set)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use kcm_cluster::provisioner::TerraformConfig;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        global: GlobalArgs,
    }

    fn args(argv: &[&str]) -> GlobalArgs {
        let mut full = vec!["kcm"];
        full.extend_from_slice(argv);
        TestCli::parse_from(full).global
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.provisioner, ProvisionerConfig::Null);
        assert_eq!(config.retry.attempts, 10);
    }

    #[test]
    fn test_parse_file() {
        let config = Config::from_yaml(
            r#"
provisioner:
  type: terraform
  dir: infra
renderer:
  type: template
  dir: k8s
cluster:
  kubeconfig: kubeconfig.yaml
manifestsDir: deployed
retry:
  attempts: 3
  maxDelay: 5s
"#,
        )
        .unwrap();

        assert_eq!(
            config.provisioner,
            ProvisionerConfig::Terraform(TerraformConfig {
                dir: "infra".into(),
                ..Default::default()
            })
        );
        assert_eq!(config.manifests_dir, PathBuf::from("deployed"));
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.max_delay, Duration::from_secs(5));
        assert_eq!(config.retry.cluster_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = Config::from_yaml(
            "values: file-values.yaml\nkubectl: /usr/bin/kubectl\ncluster:\n  kubeconfig: admin.conf\n  context: prod\n",
        )
        .unwrap();
        let args = args(&[
            "--values",
            "flag-values.yaml",
            "--cluster-context",
            "staging",
            "--include-unchanged",
        ]);

        config.apply_args(&args);
        config.resolve_paths(Path::new("/work"));

        assert_eq!(config.values, PathBuf::from("/work/flag-values.yaml"));
        assert_eq!(config.kubectl, "/usr/bin/kubectl");
        assert_eq!(config.cluster.kubeconfig(), Some("/work/admin.conf"));
        assert_eq!(config.cluster.context(), Some("staging"));
        assert!(config.include_unchanged);
        assert_eq!(config.deletions, PathBuf::from("/work/deletions.yaml"));
    }

    #[test]
    fn test_absolute_and_inline_kubeconfig_kept() {
        let mut config = Config::default();
        config.cluster.kubeconfig = Some("/etc/kube/config".into());
        config.resolve_paths(Path::new("/work"));
        assert_eq!(config.cluster.kubeconfig(), Some("/etc/kube/config"));

        let inline = "apiVersion: v1\nkind: Config\n";
        let mut config = Config::default();
        config.cluster.kubeconfig = Some(inline.into());
        config.resolve_paths(Path::new("/work"));
        assert_eq!(config.cluster.kubeconfig(), Some(inline));
        assert_eq!(config.redacted().cluster.kubeconfig(), Some("<inline>"));
    }

    #[test]
    fn test_redacted_dump() {
        let mut config = Config::default();
        config.cluster = Credentials {
            server: Some("https://k8s:6443".into()),
            token: Some("s3cret".into()),
            ..Default::default()
        };

        let yaml = config.redacted().to_yaml().unwrap();
        assert!(yaml.contains("server: https://k8s:6443"));
        assert!(yaml.contains("***"));
        assert!(!yaml.contains("s3cret"));
        assert!(yaml.contains("maxDelay: 30s"));
        assert_eq!(config.cluster.token(), Some("s3cret"));
    }

    #[test]
    fn test_retry_settings_reach_client() {
        let config = Config::from_yaml(
            "kubectl: k\nretry:\n  attempts: 4\n  clusterAttempts: 2\n  clusterInterval: 500ms\n",
        )
        .unwrap();
        let options = config.client_options();

        assert_eq!(options.kubectl, "k");
        assert_eq!(options.apply_retry.max_attempts, 4);
        assert_eq!(options.cluster_retry, RetryConfig::constant(2, Duration::from_millis(500)));
    }

    #[test]
    fn test_manager_options_parse_set() {
        let config = Config::default();
        let args = args(&["--set", "replicas=3", "--set", "image.tag=v2", "--dry-run"]);
        let options = config.manager_options(&args).unwrap();

        assert!(options.dry_run);
        assert_eq!(options.overrides.get("replicas"), Some(&serde_json::json!(3)));
        assert_eq!(options.overrides.get_str("image.tag"), Some("v2"));
    }

    #[test]
    fn test_manager_options_rejects_bad_set() {
        let args = args(&["--set", "novalue"]);
        assert!(matches!(
            Config::default().manager_options(&args),
            Err(CliError::Config { .. })
        ));
    }
}
