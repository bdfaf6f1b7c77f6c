//! Integration tests for the kcm CLI
//!
//! These tests run the actual CLI binary in a temporary working directory.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Get the path to the kcm binary
fn kcm_bin() -> &'static str {
    env!("CARGO_BIN_EXE_kcm")
}

/// Run kcm in `dir` with the `KCM_*` environment cleared
fn run_kcm(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(kcm_bin());
    for (key, _) in std::env::vars() {
        if key.starts_with("KCM_") {
            cmd.env_remove(key);
        }
    }
    cmd.arg("--working-dir")
        .arg(dir)
        .args(args)
        .output()
        .expect("Failed to execute kcm")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn read(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name)).unwrap()
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    let output = run_kcm(dir.path(), &["version"]);

    assert!(output.status.success());
    insta::assert_snapshot!(stdout(&output).trim(), @"kcm 0.3.0");
}

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    let output = run_kcm(dir.path(), &["--help"]);

    assert!(output.status.success());
    let help = stdout(&output);
    for command in ["provision", "destroy", "manifests", "dump-config", "version"] {
        assert!(help.contains(command), "missing {command} in help");
    }
    assert!(help.contains("--dry-run"));
    assert!(help.contains("--cluster-kubeconfig"));
}

#[test]
fn test_dump_config_defaults() {
    let dir = TempDir::new().unwrap();
    let output = run_kcm(dir.path(), &["dump-config"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let yaml = stdout(&output);
    assert!(yaml.contains("kubectl: kubectl"));
    assert!(yaml.contains("includeUnchanged: false"));
    assert!(yaml.contains("attempts: 10"));
    assert!(!yaml.contains("cluster:"));
}

#[test]
fn test_dump_config_precedence_and_redaction() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "kcm.yaml",
        r#"
values: custom-values.yaml
kubectl: /usr/local/bin/kubectl
cluster:
  server: https://k8s.example:6443
  token: s3cret-token
"#,
    );

    let output = Command::new(kcm_bin())
        .env("KCM_KUBECTL", "/opt/env/kubectl")
        .env_remove("KCM_MANIFESTS_DIR")
        .arg("--working-dir")
        .arg(dir.path())
        .args(["--manifests-dir", "deployed", "dump-config"])
        .output()
        .expect("Failed to execute kcm");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let yaml = stdout(&output);
    assert!(yaml.contains("custom-values.yaml"));
    assert!(yaml.contains("kubectl: /opt/env/kubectl"));
    assert!(yaml.contains(&format!("manifestsDir: {}", dir.path().join("deployed").display())));
    assert!(yaml.contains("server: https://k8s.example:6443"));
    assert!(yaml.contains("***"));
    assert!(!yaml.contains("s3cret-token"));
}

#[test]
fn test_flag_overrides_environment() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(kcm_bin())
        .env("KCM_KUBECTL", "/opt/env/kubectl")
        .arg("--working-dir")
        .arg(dir.path())
        .args(["--kubectl", "/opt/flag/kubectl", "dump-config"])
        .output()
        .expect("Failed to execute kcm");

    assert!(output.status.success());
    assert!(stdout(&output).contains("kubectl: /opt/flag/kubectl"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    let output = run_kcm(dir.path(), &["--config", "nope.yaml", "dump-config"]);

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("nope.yaml"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "kcm.yaml", "provisioner:\n  type: ansible\n");
    let output = run_kcm(dir.path(), &["dump-config"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("kcm::cli::config"));
}

#[test]
fn test_skip_manifests_writes_merged_values() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "values.yaml", "a: 1\n");

    let output = run_kcm(dir.path(), &["provision", "--skip-manifests", "--set", "b=2"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(read(dir.path(), "values.yaml"), "a: 1\nb: 2\n");
    assert!(!dir.path().join("manifests").exists());
    assert!(!dir.path().join("deletions.yaml").exists());
}

#[test]
fn test_dry_run_leaves_values_untouched() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "values.yaml", "a: 1\n");

    let output = run_kcm(
        dir.path(),
        &["provision", "--dry-run", "--skip-manifests", "--set", "b=2"],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Dry run complete"));
    assert_eq!(read(dir.path(), "values.yaml"), "a: 1\n");
}

#[test]
fn test_missing_credentials_fail() {
    let dir = TempDir::new().unwrap();
    let output = run_kcm(dir.path(), &["provision"]);

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("kcm::cli::credentials"));
    assert!(err.contains("No cluster credentials"));
}

const TEMPLATE_CONFIG: &str = r#"
renderer:
  type: template
  dir: templates
cluster:
  kubeconfig: /nonexistent/kubeconfig
"#;

#[test]
fn test_dry_run_manifests_apply_with_templates() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "kcm.yaml", TEMPLATE_CONFIG);
    write(dir.path(), "values.yaml", "name: web\n");
    write(
        dir.path(),
        "templates/app.yaml",
        "kind: ConfigMap\nmetadata:\n  name: {{ name }}\n",
    );

    let output = run_kcm(
        dir.path(),
        &["--kubectl", "/nonexistent/kubectl", "--dry-run", "manifests", "apply"],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("app"));
    assert!(!dir.path().join("manifests").exists());
}

#[test]
fn test_template_error_reported() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "kcm.yaml", TEMPLATE_CONFIG);
    write(dir.path(), "templates/app.yaml", "name: {{ missing.key }}\n");

    let output = run_kcm(dir.path(), &["--dry-run", "manifests", "apply"]);

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("kcm::cli::template"));
    assert!(err.contains("app.yaml"));
}

#[cfg(unix)]
mod fake_kubectl {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A kubectl stand-in logging its arguments
    ///
    /// Exits with `code` when its arguments contain `failing`.
    fn install(dir: &Path, failing: &str, code: i32) -> String {
        let path = dir.join("bin/kubectl");
        write(
            dir,
            "bin/kubectl",
            &format!(
                "#!/bin/sh\necho \"$@\" >> \"{}\"\ncat > /dev/null\ncase \"$*\" in\n  *\"{}\"*) exit {} ;;\nesac\n",
                dir.join("kubectl.log").display(),
                failing,
                code
            ),
        );
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "kcm.yaml", TEMPLATE_CONFIG);
        write(dir.path(), "values.yaml", "name: web\n");
        write(
            dir.path(),
            "templates/app.yaml",
            "kind: ConfigMap\nmetadata:\n  name: {{ name }}\n",
        );
        dir
    }

    #[test]
    fn test_manifests_apply_runs_kubectl() {
        let dir = setup();
        let kubectl = install(dir.path(), "never-matches", 1);

        let output = run_kcm(dir.path(), &["--kubectl", &kubectl, "manifests", "apply"]);

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let log = read(dir.path(), "kubectl.log");
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(
            lines,
            vec![
                "--kubeconfig /nonexistent/kubeconfig cluster-info",
                "--kubeconfig /nonexistent/kubeconfig apply -f -",
            ]
        );
        assert_eq!(
            read(dir.path(), "manifests/app.yaml"),
            "kind: ConfigMap\nmetadata:\n  name: web\n"
        );
    }

    #[test]
    fn test_kubectl_exit_code_is_mirrored() {
        let dir = setup();
        let kubectl = install(dir.path(), "apply", 7);
        write(
            dir.path(),
            "kcm.yaml",
            &format!("{TEMPLATE_CONFIG}retry:\n  attempts: 1\n"),
        );

        let output = run_kcm(dir.path(), &["--kubectl", &kubectl, "manifests", "apply"]);

        assert_eq!(output.status.code(), Some(7));
        assert!(stderr(&output).contains("kcm::cli::cluster"));
        assert!(!dir.path().join("manifests/app.yaml").exists());
    }

    #[test]
    fn test_unreachable_cluster_exits_with_one() {
        let dir = setup();
        let kubectl = install(dir.path(), "cluster-info", 7);
        write(
            dir.path(),
            "kcm.yaml",
            &format!("{TEMPLATE_CONFIG}retry:\n  clusterAttempts: 2\n  clusterInterval: 10ms\n"),
        );

        let output = run_kcm(dir.path(), &["--kubectl", &kubectl, "manifests", "apply"]);

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("cluster unreachable"));
        assert_eq!(read(dir.path(), "kubectl.log").lines().count(), 2);
    }
}
