//! Rollback verify command.
//!
//! Confirms a rollback against each registry's public metadata: the
//! rolled-back version must be gone or flagged yanked. Exit 0 iff every
//! attempted target checks out; platforms the rollback skipped
//! (capability `none`) are reported but do not fail the check.

use anyhow::Result;

use crate::domain::PlatformState;
use crate::error::StoreError;
use crate::infrastructure::MetadataLookup;
use crate::ui;

use super::AppContext;

pub async fn execute(ctx: AppContext, id: &str) -> Result<i32> {
    let tx = match ctx.store.get_rollback(id) {
        Ok(tx) => tx,
        Err(StoreError::NotFound { .. }) => {
            eprintln!("Rollback not found: {}", id);
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    ui::print_header(&format!("Verify rollback {}", id));

    let mut all_rolled_back = true;

    for target in &tx.targets {
        let state = tx.platforms.get(target).map(|p| p.state);
        if state == Some(PlatformState::Skipped) {
            ui::print_skipped(&format!("{}: rollback was skipped", target));
            continue;
        }

        let descriptor = ctx.registry.get(target)?;
        let rolled_back = match ctx
            .metadata
            .lookup(descriptor, &tx.package, &tx.version)
            .await
        {
            Ok(MetadataLookup::NotFound) => true,
            Ok(MetadataLookup::Present(metadata)) => metadata
                .get("yanked")
                .or_else(|| metadata.get("unlisted"))
                .and_then(|y| y.as_bool())
                .unwrap_or(false),
            Err(e) => {
                ui::print_warning(&format!("{}: metadata unreachable: {}", target, e));
                all_rolled_back = false;
                continue;
            }
        };

        if rolled_back {
            ui::print_success(&format!(
                "{}: {}@{} no longer resolvable",
                target, tx.package, tx.version
            ));
        } else {
            ui::print_failure(&format!(
                "{}: {}@{} is still live on the registry",
                target, tx.package, tx.version
            ));
            all_rolled_back = false;
        }
    }

    Ok(if all_rolled_back { 0 } else { 1 })
}
