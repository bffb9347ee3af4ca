//! Rollback status command.

use anyhow::Result;
use colored::Colorize;

use crate::domain::{PlatformState, RollbackTransaction, TransactionStatus};
use crate::error::StoreError;

use super::status::OutputFormat;
use super::AppContext;

pub async fn execute(ctx: AppContext, id: &str, format: OutputFormat) -> Result<i32> {
    let tx = match ctx.store.get_rollback(id) {
        Ok(tx) => tx,
        Err(StoreError::NotFound { .. }) => {
            eprintln!("Rollback not found: {}", id);
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tx)?),
        OutputFormat::Text => print_text(&tx),
    }
    Ok(0)
}

fn print_text(tx: &RollbackTransaction) {
    let status = match tx.status {
        TransactionStatus::Completed => tx.status.to_string().green().bold(),
        TransactionStatus::InProgress => tx.status.to_string().yellow().bold(),
        _ => tx.status.to_string().red().bold(),
    };
    println!("{} {}", tx.id.bold(), status);
    println!(
        "   deployment: {}   reason: {}   {} {}",
        tx.deployment_id.cyan(),
        tx.reason,
        tx.package,
        tx.version
    );

    println!();
    println!("{}", "Platforms:".bold());
    for target in &tx.targets {
        let Some(status) = tx.platforms.get(target) else {
            continue;
        };
        let state = match status.state {
            PlatformState::Completed => status.state.to_string().green(),
            PlatformState::Failed => status.state.to_string().red(),
            PlatformState::Skipped => status.state.to_string().dimmed(),
            _ => status.state.to_string().yellow(),
        };
        print!("   {:<12} {}", target.cyan(), state);
        if let Some(method) = &status.method_used {
            print!("   method: {}", method);
        }
        if let Some(previous) = &status.previous_version {
            print!("   previous: {}", previous);
        }
        if let Some(message) = &status.error_message {
            print!("   {}", message.red());
        }
        println!();
    }

    if !tx.errors.is_empty() {
        println!();
        println!("{}", "Errors:".bold());
        for error in &tx.errors {
            println!("   {}", error.red());
        }
    }
}
