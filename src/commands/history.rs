//! Deploy history command.

use anyhow::Result;
use colored::Colorize;

use crate::domain::TransactionStatus;

use super::AppContext;

pub async fn execute(ctx: AppContext, n: usize, package: Option<String>) -> Result<i32> {
    let recent = ctx.store.list_recent(n, package.as_deref())?;

    if recent.is_empty() {
        println!("No deployments recorded.");
        return Ok(0);
    }

    for tx in recent {
        let status = match tx.status {
            TransactionStatus::Completed => tx.status.to_string().green(),
            TransactionStatus::InProgress | TransactionStatus::Cancelled => {
                tx.status.to_string().yellow()
            }
            _ => tx.status.to_string().red(),
        };
        println!(
            "{}  {:<12} {:<10} {} -> {}",
            tx.started_at.format("%Y-%m-%d %H:%M"),
            status,
            tx.package.cyan(),
            tx.version,
            tx.targets.join(",").dimmed()
        );
        println!("   {}", tx.id.dimmed());
    }
    Ok(0)
}
