use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod config;
mod domain;
mod error;
mod infrastructure;
mod services;
mod tools;
mod ui;

use cli::{Cli, Commands, PlatformCommands};
use commands::{
    cancel, deploy, history, platforms, retry, rollback, rollback_status, rollback_verify, status,
    AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log filter precedence: LOGGING, then LOG_LEVEL, then --verbose.
    let log_filter = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    // Plain single-line output; colored status lines are printed by the
    // commands themselves, so tracing stays uncolored and grep-friendly.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .init();

    let ctx = AppContext::init(cli.data_dir.as_deref())?;

    // Execute command
    let exit_code = match cli.command {
        Commands::Deploy {
            package,
            version,
            targets,
            pipeline,
            tree,
            fail_fast,
            auto_rollback,
            no_auto_rollback,
            strict_health,
            max_parallel,
            verify_cap,
            dry_run,
        } => {
            deploy::execute(
                ctx,
                package,
                version,
                targets,
                pipeline,
                tree,
                fail_fast,
                auto_rollback,
                no_auto_rollback,
                strict_health,
                max_parallel,
                verify_cap,
                dry_run,
            )
            .await?
        }
        Commands::DeployStatus { id, format } => {
            let output_format = status::OutputFormat::from_str(&format);
            status::execute(ctx, &id, output_format).await?
        }
        Commands::DeployHistory { n, package } => history::execute(ctx, n, package).await?,
        Commands::DeployCancel { id } => cancel::execute(ctx, &id).await?,
        Commands::DeployRetry { id, targets, tree } => {
            retry::execute(ctx, &id, targets, tree).await?
        }
        Commands::Rollback {
            id,
            targets,
            mode,
            confirm,
        } => rollback::execute(ctx, &id, targets, mode, confirm).await?,
        Commands::RollbackStatus { id, format } => {
            let output_format = status::OutputFormat::from_str(&format);
            rollback_status::execute(ctx, &id, output_format).await?
        }
        Commands::RollbackVerify { id } => rollback_verify::execute(ctx, &id).await?,
        Commands::Platforms { command } => match command {
            PlatformCommands::List => platforms::list(ctx).await?,
            PlatformCommands::Health { name } => platforms::health(ctx, &name).await?,
            PlatformCommands::Validate { name } => platforms::validate(ctx, &name).await?,
        },
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
