//! Platform inspection commands.

use anyhow::Result;
use colored::Colorize;

use crate::infrastructure::HealthState;
use crate::ui;

use super::AppContext;

pub async fn list(ctx: AppContext) -> Result<i32> {
    println!(
        "{:<12} {:<12} {:<12} {:<14} registry",
        "NAME".bold(),
        "ECOSYSTEM".bold(),
        "ROLLBACK".bold(),
        "AUTH".bold()
    );
    for descriptor in ctx.registry.list() {
        println!(
            "{:<12} {:<12} {:<12} {:<14} {}",
            descriptor.name.cyan(),
            descriptor.ecosystem,
            descriptor.rollback_capability.to_string(),
            descriptor.auth_scheme.to_string(),
            descriptor.registry_base_url.dimmed()
        );
    }
    Ok(0)
}

pub async fn health(ctx: AppContext, name: &str) -> Result<i32> {
    let report = ctx.registry.health_check(name, &ctx.metadata).await?;

    let state = match report.state {
        HealthState::Ok => report.state.to_string().green(),
        HealthState::Degraded => report.state.to_string().yellow(),
        HealthState::Down => report.state.to_string().red(),
    };
    print!("{:<12} {}", report.platform.cyan(), state);
    if let Some(latency) = report.latency_ms {
        print!("   {}ms", latency);
    }
    if let Some(detail) = &report.detail {
        print!("   {}", detail.dimmed());
    }
    println!();
    println!("   checked at {}", report.checked_at.format("%Y-%m-%d %H:%M:%S UTC"));

    Ok(match report.state {
        HealthState::Down => 1,
        _ => 0,
    })
}

pub async fn validate(ctx: AppContext, name: &str) -> Result<i32> {
    match ctx.registry.validate_descriptor(name) {
        Ok(()) => {
            ui::print_success(&format!("descriptor {} is valid", name));
            Ok(0)
        }
        Err(e) => {
            ui::print_failure(&e.to_string());
            Ok(1)
        }
    }
}
