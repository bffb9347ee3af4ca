//! Rollback command.
//!
//! Opens a rollback transaction against a deployment and drives it
//! through the rollback engine. `automated` mode skips rollback methods
//! that require confirmation unless `--yes` overrides; `manual` mode
//! allows them.

use anyhow::Result;
use colored::Colorize;

use crate::domain::{PlatformState, RollbackReason, TransactionStatus};
use crate::services::{RollbackEngine, RollbackOptions};
use crate::ui;

use super::AppContext;

pub async fn execute(
    ctx: AppContext,
    id: &str,
    targets: Option<String>,
    mode: String,
    confirm: bool,
) -> Result<i32> {
    let automated = match mode.to_lowercase().as_str() {
        "automated" => true,
        "manual" => false,
        other => {
            ui::print_failure(&format!(
                "unknown mode '{}'. Expected automated or manual",
                other
            ));
            return Ok(2);
        }
    };

    let targets = match targets {
        Some(csv) => match ctx.registry.resolve_targets(&csv) {
            Ok(targets) => Some(targets),
            Err(e) => {
                ui::print_failure(&e.to_string());
                return Ok(2);
            }
        },
        None => None,
    };

    ui::print_header(&format!("Rollback {}", id));

    let engine = RollbackEngine::new(
        ctx.store.clone(),
        ctx.registry.clone(),
        ctx.config.clone(),
        ctx.metadata.clone(),
        ctx.notifier.clone(),
        ctx.resolver.clone(),
    );
    let options = RollbackOptions {
        targets,
        reason: RollbackReason::ManualTrigger,
        automated,
        confirm_override: confirm,
    };

    let rollback = engine.run(id, &options).await?;

    println!();
    for target in &rollback.targets {
        let Some(status) = rollback.platforms.get(target) else {
            continue;
        };
        match status.state {
            PlatformState::Completed => ui::print_success(&format!(
                "{} rolled back via {}",
                target,
                status.method_used.clone().unwrap_or_default()
            )),
            PlatformState::Skipped => ui::print_skipped(&format!(
                "{}: {}",
                target,
                status.error_message.clone().unwrap_or_else(|| "skipped".to_string())
            )),
            _ => ui::print_failure(&format!(
                "{}: {}",
                target,
                status.error_message.clone().unwrap_or_default()
            )),
        }
    }

    println!();
    match rollback.status {
        TransactionStatus::Completed => {
            println!("{} {}", "ROLLBACK COMPLETE".green().bold(), rollback.id);
            Ok(0)
        }
        _ => {
            println!("{} {}", "ROLLBACK FAILED".red().bold(), rollback.id);
            println!(
                "   {}",
                "rollback does not retry automatically; inspect and re-run".dimmed()
            );
            Ok(1)
        }
    }
}
