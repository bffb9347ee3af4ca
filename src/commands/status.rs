//! Deploy status command.
//!
//! Prints one deployment transaction, either human-readable or as the
//! raw JSON record.

use anyhow::Result;
use colored::Colorize;

use crate::domain::{DeploymentTransaction, PlatformState};
use crate::error::StoreError;

use super::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

pub async fn execute(ctx: AppContext, id: &str, format: OutputFormat) -> Result<i32> {
    let tx = match ctx.store.get_deployment(id) {
        Ok(tx) => tx,
        Err(StoreError::NotFound { .. }) => {
            eprintln!("Transaction not found: {}", id);
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

fn print_text(tx: &DeploymentTransaction) {
    println!("{} {}", tx.id.bold(), status_colored(tx));
    println!(
        "   {} {}   pipeline: {}   started: {}",
        tx.package.cyan(),
        tx.version,
        tx.pipeline,
        tx.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(completed_at) = tx.completed_at {
        println!(
            "   completed: {}",
            completed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(rollback_id) = &tx.rollback_transaction_id {
        println!("   rollback: {}", rollback_id.yellow());
    }

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
        if let Some(message) = &status.error_message {
            print!("   {}", message.red());
        }
        println!();
    }

    println!();
    println!("{}", "Stages:".bold());
    for entry in &tx.stages {
        println!(
            "   {} {:<12} {}",
            entry.ts.format("%H:%M:%S"),
            entry.stage.to_string(),
            entry.state
        );
    }

    if !tx.errors.is_empty() {
        println!();
        println!("{}", "Errors:".bold());
        for error in &tx.errors {
            println!("   {}", error.red());
        }
    }
}

fn status_colored(tx: &DeploymentTransaction) -> colored::ColoredString {
    use crate::domain::TransactionStatus;
    let s = tx.status.to_string();
    match tx.status {
        TransactionStatus::Completed => s.green().bold(),
        TransactionStatus::InProgress => s.yellow().bold(),
        TransactionStatus::Cancelled => s.yellow().bold(),
        _ => s.red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::from_str("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("TEXT"), OutputFormat::Text);
        assert_eq!(OutputFormat::from_str("anything"), OutputFormat::Text);
    }
}
