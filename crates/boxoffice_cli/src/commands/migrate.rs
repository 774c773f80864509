//! Migrate command implementation.

use super::open_dir;
use boxoffice_core::{CoreResult, DataDir, MigrationManager, MigrationReport};
use std::path::Path;
use tracing::info;

/// Runs the legacy migration.
pub fn run(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Migrating legacy records in {:?}", path);

    let dir = open_dir(path)?;
    let report = migrate(&dir, force)?;

    if report.skipped {
        println!("✓ Migration already done. Use --force to re-process leftovers.");
        return Ok(());
    }

    println!("Legacy Migration");
    println!("================");
    println!("  Migrated:        {}", report.migrated);
    println!("  Already present: {}", report.already_present);
    println!("  Failed:          {}", report.failed);
    if !report.events.is_empty() {
        let events: Vec<&str> = report.events.iter().map(|e| e.as_str()).collect();
        println!("  Events:          {}", events.join(", "));
    }

    if !report.is_complete() {
        println!();
        println!("⚠ {} entries were kept in the legacy files.", report.failed);
        println!("  Run `boxoffice migrate --force` to retry them.");
    }

    Ok(())
}

/// Runs a migration pass over `dir`.
pub fn migrate(dir: &DataDir, force: bool) -> CoreResult<MigrationReport> {
    MigrationManager::new(dir).run(force)
}
