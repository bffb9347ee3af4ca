//! Deploy command.
//!
//! Creates a deployment transaction, drives it through the pipeline
//! executor, applies the post-failure auto-rollback policy and prints a
//! per-platform summary. Exit 0 on `completed`, 1 on `failed`, 2 on
//! usage errors.

use anyhow::Result;
use colored::Colorize;
use std::str::FromStr;

use crate::domain::{
    DeploymentTransaction, PipelineKind, PlatformState, RollbackReason, Stage, StageState,
    TransactionStatus,
};
use crate::services::{DeployRequest, PipelineExecutor, RollbackEngine, RollbackOptions};
use crate::ui;

use super::AppContext;

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    ctx: AppContext,
    package: String,
    version: Option<String>,
    targets_csv: String,
    pipeline: String,
    tree: Option<String>,
    fail_fast: bool,
    auto_rollback: bool,
    no_auto_rollback: bool,
    strict_health: bool,
    max_parallel: Option<usize>,
    verify_cap: Option<String>,
    dry_run: bool,
) -> Result<i32> {
    let pipeline = match PipelineKind::from_str(&pipeline) {
        Ok(kind) => kind,
        Err(e) => {
            ui::print_failure(&e);
            return Ok(2);
        }
    };

    let targets = match ctx.registry.resolve_targets(&targets_csv) {
        Ok(targets) if !targets.is_empty() => targets,
        Ok(_) => {
            ui::print_failure("no targets given");
            return Ok(2);
        }
        Err(e) => {
            ui::print_failure(&e.to_string());
            return Ok(2);
        }
    };

    let tree = ctx.resolve_tree(&package, tree.as_deref());

    ui::print_header(&format!("Deploy {}", package));
    println!(
        "   targets: {}   pipeline: {}   tree: {}",
        targets.join(", ").cyan(),
        pipeline.to_string().cyan(),
        tree.display().to_string().dimmed()
    );
    if pipeline == PipelineKind::Staged {
        let (staging, production) = ctx.config.split_staged(&targets);
        println!(
            "   staging: [{}]   production: [{}]",
            staging.join(", ").cyan(),
            production.join(", ").yellow()
        );
    }
    println!();

    if dry_run {
        return print_plan(&ctx, &package, version.as_deref(), &targets, &tree);
    }

    let mut config = ctx.config.clone();
    if let Some(cap) = &verify_cap {
        match humantime::parse_duration(cap) {
            Ok(duration) => config.verify_cap_secs = duration.as_secs(),
            Err(e) => {
                ui::print_failure(&format!("bad --verify-cap '{}': {}", cap, e));
                return Ok(2);
            }
        }
    }

    let request = DeployRequest {
        package: package.clone(),
        version,
        targets,
        pipeline,
        tree,
        fail_fast,
        auto_rollback: match (auto_rollback, no_auto_rollback) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        },
        strict_health,
        max_parallel,
    };

    let executor = PipelineExecutor::new(
        ctx.store.clone(),
        ctx.registry.clone(),
        config.clone(),
        ctx.metadata.clone(),
        ctx.notifier.clone(),
        ctx.resolver.clone(),
    );

    let auto = executor.should_auto_rollback(&request);
    let tx = executor.run(&request).await?;
    print_summary(&tx);

    // ─── Post-failure policy ────────────────────────────────────────────
    if tx.status == TransactionStatus::Failed && auto {
        let candidates = RollbackEngine::rollback_candidates(&tx);
        if candidates.is_empty() {
            println!(
                "   {}",
                "no platform completed; nothing to roll back".dimmed()
            );
        } else {
            println!();
            println!(
                "{} rolling back completed platforms: {}",
                ">>".bold(),
                candidates.join(", ").cyan()
            );

            let engine = RollbackEngine::new(
                ctx.store.clone(),
                ctx.registry.clone(),
                ctx.config.clone(),
                ctx.metadata.clone(),
                ctx.notifier.clone(),
                ctx.resolver.clone(),
            );
            let options = RollbackOptions {
                targets: None,
                reason: rollback_reason(&tx),
                automated: true,
                confirm_override: false,
            };
            match engine.run(&tx.id, &options).await {
                Ok(rollback) => {
                    if rollback.status == TransactionStatus::Completed {
                        ui::print_success(&format!("rollback {} completed", rollback.id));
                    } else {
                        ui::print_failure(&format!(
                            "rollback {} {}; operator action required",
                            rollback.id, rollback.status
                        ));
                    }
                }
                Err(e) => ui::print_failure(&format!("auto-rollback did not run: {}", e)),
            }
        }
    }

    let final_tx = ctx.store.get_deployment(&tx.id)?;
    println!();
    println!(
        "   transaction: {}   full record: {}",
        final_tx.id.bold(),
        ctx.data_dir
            .join("transactions")
            .join(format!("{}.json", final_tx.id))
            .display()
            .to_string()
            .dimmed()
    );

    Ok(match final_tx.status {
        TransactionStatus::Completed => 0,
        _ => 1,
    })
}

/// Failed verify stage means the release went out but never became
/// visible; everything else is a stage failure.
fn rollback_reason(tx: &DeploymentTransaction) -> RollbackReason {
    let verify_failed = tx
        .stages
        .iter()
        .any(|s| s.stage == Stage::Verify && s.state == StageState::Failed);
    if verify_failed {
        RollbackReason::PostDeployVerificationFailed
    } else {
        RollbackReason::StageFailed
    }
}

fn print_plan(
    ctx: &AppContext,
    package: &str,
    version: Option<&str>,
    targets: &[String],
    tree: &std::path::Path,
) -> Result<i32> {
    use crate::services::adapter::version::read_version;

    println!("{}", "Plan (dry run):".bold());
    for target in targets {
        let descriptor = ctx.registry.get(target)?;
        let manifest_version = read_version(tree, &descriptor.version_locator, package).ok();
        let resolved = version
            .map(|v| v.to_string())
            .or(manifest_version)
            .unwrap_or_else(|| "<unresolved>".to_string());
        println!(
            "   {} {} -> {}   rollback: {}",
            "plan".dimmed(),
            format!("{}@{}", package, resolved).cyan(),
            descriptor.registry_base_url,
            descriptor.rollback_capability
        );
    }
    Ok(0)
}

fn print_summary(tx: &DeploymentTransaction) {
    println!();
    for target in &tx.targets {
        let Some(status) = tx.platforms.get(target) else {
            continue;
        };
        match status.state {
            PlatformState::Completed => ui::print_success(target),
            PlatformState::Skipped => ui::print_skipped(target),
            PlatformState::Failed => ui::print_failure(&format!(
                "{}: {}",
                target,
                status.error_message.clone().unwrap_or_default()
            )),
            other => println!("   {} {}", other.to_string().yellow(), target),
        }
    }

    println!();
    let status = tx.status.to_string();
    match tx.status {
        TransactionStatus::Completed => {
            println!("{}", format!("DEPLOY {}", status.to_uppercase()).green().bold())
        }
        TransactionStatus::Cancelled => {
            println!("{}", format!("DEPLOY {}", status.to_uppercase()).yellow().bold())
        }
        _ => println!("{}", format!("DEPLOY {}", status.to_uppercase()).red().bold()),
    }

    if let Some(error) = tx.errors.first() {
        println!("   {}", error.red());
    }
}
