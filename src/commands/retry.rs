//! Deploy retry command.
//!
//! A retry is a fresh transaction: the prior record is never rewritten.
//! By default the new run targets only the platforms that did not
//! complete; `--targets` narrows it further.

use anyhow::Result;
use colored::Colorize;

use crate::domain::{PlatformState, TransactionStatus};
use crate::error::StoreError;
use crate::ui;

use super::AppContext;

pub async fn execute(
    ctx: AppContext,
    id: &str,
    targets: Option<String>,
    tree: Option<String>,
) -> Result<i32> {
    let prior = match ctx.store.get_deployment(id) {
        Ok(tx) => tx,
        Err(StoreError::NotFound { .. }) => {
            eprintln!("Transaction not found: {}", id);
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    if prior.status == TransactionStatus::InProgress {
        ui::print_failure("transaction is still in progress; cancel it or wait");
        return Ok(1);
    }

    let retry_targets: Vec<String> = match targets {
        Some(csv) => match ctx.registry.resolve_targets(&csv) {
            Ok(targets) => targets
                .into_iter()
                .filter(|t| prior.targets.contains(t))
                .collect(),
            Err(e) => {
                ui::print_failure(&e.to_string());
                return Ok(2);
            }
        },
        None => prior
            .targets
            .iter()
            .filter(|t| {
                prior
                    .platforms
                    .get(*t)
                    .map(|p| p.state != PlatformState::Completed)
                    .unwrap_or(true)
            })
            .cloned()
            .collect(),
    };

    if retry_targets.is_empty() {
        ui::print_warning("every platform already completed; nothing to retry");
        return Ok(0);
    }

    println!(
        "{} retrying {} on [{}] as a new transaction",
        ">>".bold(),
        prior.package.cyan(),
        retry_targets.join(", ")
    );
    println!();

    super::deploy::execute(
        ctx,
        prior.package.clone(),
        Some(prior.version.clone()).filter(|v| !v.is_empty()),
        retry_targets.join(","),
        prior.pipeline.to_string(),
        tree,
        false,
        false,
        false,
        false,
        None,
        None,
        false,
    )
    .await
}
