//! One-shot queries against running nodes

use anyhow::Result;

use super::client_for;
use proctor::config::{Config, Role};

pub async fn stats(config: &Config) -> Result<()> {
    let coordinator = client_for(config, Role::Coordinator)?;
    let stats = coordinator.admission_stats().await?;
    println!("{}", stats.display());

    println!();
    println!("Mutual exclusion:");
    for role in Role::all() {
        let client = client_for(config, role)?;
        match client.exclusion_state().await {
            Ok(s) => println!(
                "  {:<12} {:?} clock={} replies={} deferred={}",
                s.node_id.as_str(),
                s.state,
                s.clock,
                s.replies_received,
                s.deferred.len()
            ),
            Err(e) => println!("  {:<12} unreachable ({e})", role.as_str()),
        }
    }
    Ok(())
}

pub async fn marksheet(config: &Config) -> Result<()> {
    let authority = client_for(config, Role::Authority)?;
    let report = authority.marksheet().await?;
    println!("{}", report.display());
    Ok(())
}

/// Ask the coordinator to run a Berkeley round now
pub async fn sync(config: &Config) -> Result<()> {
    let coordinator = client_for(config, Role::Coordinator)?;
    let report = coordinator.run_sync().await?;
    print!("{}", report.display());
    Ok(())
}

/// Start or stop the coordinator's backup lane
pub async fn backup(config: &Config, running: bool) -> Result<()> {
    let coordinator = client_for(config, Role::Coordinator)?;
    let stats = coordinator.set_backup_running(running).await?;
    println!(
        "Backup lane {}",
        if stats.backup_running { "running" } else { "stopped" }
    );
    println!("{}", stats.display());
    Ok(())
}
