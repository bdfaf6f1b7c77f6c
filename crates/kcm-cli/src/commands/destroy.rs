//! Destroy command - tear down the manifests, then the infrastructure

use console::style;
use kcm_kube::ExecContext;

use crate::config::{Config, GlobalArgs};
use crate::error::Result;
use crate::util::{build_manager, dry_run_suffix, print_report};

/// Run the destroy command
pub async fn run(args: &GlobalArgs, ctx: &ExecContext) -> Result<()> {
    let config = Config::load(args)?;
    let options = config.manager_options(args)?;

    println!(
        "{} Destroying cluster from {}{}",
        style("→").blue().bold(),
        style(args.working_dir.display()).cyan(),
        dry_run_suffix(options.dry_run)
    );

    let report = build_manager(&config).destroy(&options, ctx).await?;
    print_report(&report);

    println!(
        "{} Destroyed: {} resources deleted, infrastructure {}",
        style("✓").green().bold(),
        report.deleted(),
        report.infrastructure
    );
    Ok(())
}
