//! Shared helpers for the run commands

use std::sync::Arc;

use console::style;
use kcm_cluster::{AnyProvisioner, AnyRenderer, ClusterManager, RunReport};
use kcm_kube::{Executor, ProcessExecutor};

use crate::config::Config;

/// Wire provisioner, renderer and credentials from the config
pub fn build_manager(config: &Config) -> ClusterManager {
    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor::new());
    let provisioner = AnyProvisioner::from_config(&config.provisioner, executor.clone());
    let renderer = AnyRenderer::from_config(&config.renderer, executor.clone());

    ClusterManager::new(Box::new(provisioner), Box::new(renderer), executor)
        .with_credentials(config.cluster.clone())
        .with_client_options(config.client_options())
}

/// Suffix marking dry-run output
pub fn dry_run_suffix(dry_run: bool) -> String {
    if dry_run {
        format!(" {}", style("(dry run)").dim())
    } else {
        String::new()
    }
}

/// Print what a run did, one line per revision
pub fn print_report(report: &RunReport) {
    println!("  Infrastructure: {}", style(report.infrastructure).cyan());
    if report.values_changed {
        println!("  Values: {}", style("updated").cyan());
    }

    for revision in &report.revisions {
        println!(
            "  {} {} ({}): {}",
            style("•").dim(),
            style(&revision.name).cyan(),
            revision.kind,
            revision.summary()
        );
        for hook in &revision.hooks {
            println!(
                "      hook {} ({}) in {}ms",
                hook.name,
                hook.hook_type,
                hook.duration().num_milliseconds()
            );
        }
        for selector in &revision.deferred_deletions {
            println!("    {} deletion of {} deferred", style("⚠").yellow(), selector);
        }
    }

    if report.ledger_deleted > 0 {
        println!("  Ledger: {} deletion(s) done", report.ledger_deleted);
    }
    if report.ledger_pending > 0 {
        println!(
            "{} {} deletion(s) still pending, retried on the next run",
            style("⚠").yellow(),
            report.ledger_pending
        );
    }
}
