//! Manifests commands - converge or tear down the cluster, infrastructure untouched

use console::style;
use kcm_kube::ExecContext;

use crate::config::{Config, GlobalArgs};
use crate::error::Result;
use crate::util::{build_manager, dry_run_suffix, print_report};

/// Apply the rendered manifests
pub async fn apply(args: &GlobalArgs, ctx: &ExecContext) -> Result<()> {
    let config = Config::load(args)?;
    let options = config.manager_options(args)?;

    println!(
        "{} Applying manifests to {}{}",
        style("→").blue().bold(),
        style(options.manifests_dir.display()).cyan(),
        dry_run_suffix(options.dry_run)
    );

    let report = build_manager(&config).apply_manifests(&options, ctx).await?;
    print_report(&report);

    println!(
        "{} {} revision(s): {} applied, {} deleted",
        style("✓").green().bold(),
        report.revisions.len(),
        report.applied(),
        report.deleted()
    );
    Ok(())
}

/// Delete every deployed manifest
pub async fn delete(args: &GlobalArgs, ctx: &ExecContext) -> Result<()> {
    let config = Config::load(args)?;
    let options = config.manager_options(args)?;

    println!(
        "{} Deleting manifests in {}{}",
        style("→").blue().bold(),
        style(options.manifests_dir.display()).cyan(),
        dry_run_suffix(options.dry_run)
    );

    let report = build_manager(&config).delete_manifests(&options, ctx).await?;
    print_report(&report);

    println!(
        "{} {} revision(s) torn down, {} resources deleted",
        style("✓").green().bold(),
        report.revisions.len(),
        report.deleted()
    );
    Ok(())
}
