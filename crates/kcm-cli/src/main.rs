//! kcm CLI - Provision, converge and tear down a managed Kubernetes cluster

use std::io::IsTerminal;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use kcm_kube::ExecContext;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod error;
mod exit_codes;
mod util;

use config::GlobalArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "kcm")]
#[command(author = "kcm Contributors")]
#[command(version)]
#[command(about = "Provision, converge and tear down a managed Kubernetes cluster", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the infrastructure and apply the manifests
    ///
    /// Provisioner outputs are merged into the values file and override
    /// keys from it and from --set.
    Provision,

    /// Delete the manifests, then destroy the infrastructure
    Destroy,

    /// Apply or delete the manifests only
    Manifests {
        #[command(subcommand)]
        command: ManifestsCommands,
    },

    /// Print the merged configuration
    DumpConfig,

    /// Print the version
    Version,
}

#[derive(Subcommand)]
enum ManifestsCommands {
    /// Render and apply the manifests
    Apply,

    /// Delete every deployed manifest
    Delete,
}

/// Log to stderr, filtered by `KCM_LOG` or `--debug`
fn init_tracing(debug: bool) {
    let env = if debug {
        "debug".to_string()
    } else {
        std::env::var("KCM_LOG").unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::from_str(&env).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

/// Cancel in-flight subprocesses on Ctrl-C
fn cancel_on_interrupt(ctx: &ExecContext) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            ctx.cancel();
        }
    });
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.global.debug);

    let ctx = ExecContext::new();
    cancel_on_interrupt(&ctx);

    let args = &cli.global;
    let result: Result<(), CliError> = match cli.command {
        Commands::Provision => commands::provision::run(args, &ctx).await,
        Commands::Destroy => commands::destroy::run(args, &ctx).await,
        Commands::Manifests { command } => match command {
            ManifestsCommands::Apply => commands::manifests::apply(args, &ctx).await,
            ManifestsCommands::Delete => commands::manifests::delete(args, &ctx).await,
        },
        Commands::DumpConfig => commands::dump_config::run(args),
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    };

    let code = match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            code
        }
    };
    std::process::exit(code);
}
