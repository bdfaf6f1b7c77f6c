//! Provision command - create the infrastructure and converge the cluster

use console::style;
use kcm_kube::ExecContext;

use crate::config::{Config, GlobalArgs};
use crate::error::Result;
use crate::util::{build_manager, dry_run_suffix, print_report};

/// Run the provision command
pub async fn run(args: &GlobalArgs, ctx: &ExecContext) -> Result<()> {
    let config = Config::load(args)?;
    let options = config.manager_options(args)?;

    println!(
        "{} Provisioning from {}{}",
        style("→").blue().bold(),
        style(args.working_dir.display()).cyan(),
        dry_run_suffix(options.dry_run)
    );

    let report = build_manager(&config).provision(&options, ctx).await?;
    print_report(&report);

    if options.dry_run {
        println!("{} Dry run complete, nothing changed", style("✓").green().bold());
    } else {
        println!(
            "{} Provisioned: {} applied, {} deleted",
            style("✓").green().bold(),
            report.applied(),
            report.deleted()
        );
    }
    Ok(())
}
