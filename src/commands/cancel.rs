//! Deploy cancel command.
//!
//! Cancellation is cooperative: this only records the intent marker.
//! Workers observe it at their next suspension point; an in-flight
//! deploy completes naturally before the transaction turns `cancelled`.

use anyhow::Result;

use crate::domain::TransactionStatus;
use crate::error::StoreError;
use crate::ui;

use super::AppContext;

pub async fn execute(ctx: AppContext, id: &str) -> Result<i32> {
    let tx = match ctx.store.get_deployment(id) {
        Ok(tx) => tx,
        Err(StoreError::NotFound { .. }) => {
            eprintln!("Transaction not found: {}", id);
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    if tx.status != TransactionStatus::InProgress {
        ui::print_warning(&format!(
            "transaction is already {}; nothing to cancel",
            tx.status
        ));
        return Ok(0);
    }

    ctx.store.request_cancel(id)?;
    ctx.store.append_log(id, "cancel requested by operator");
    ui::print_success(&format!(
        "cancel requested; {} will settle at its next suspension point",
        id
    ));
    Ok(0)
}
