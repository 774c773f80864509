//! Verify command implementation.

use super::{open_dir, open_queues};
use boxoffice_core::{DataDir, JournalHealth, RecordKind};
use std::path::Path;

/// Health of the journals of one event.
#[derive(Debug)]
pub struct VerifyResult {
    /// Event id.
    pub event_id: String,
    /// Health per journal kind.
    pub journals: Vec<(RecordKind, JournalHealth)>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.journals.iter().all(|(_, health)| health.is_clean())
    }
}

/// Runs the verify command.
pub fn run(path: &Path, event: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying queue at {:?}", path);
    println!();

    let dir = open_dir(path)?;
    let results = collect(&dir, event)?;
    if results.is_empty() {
        println!("No event queues found.");
    }
    for result in &results {
        print_result(result);
    }

    println!();
    if results.iter().all(VerifyResult::is_ok) {
        println!("✓ Queue verification passed");
        Ok(())
    } else {
        // Malformed lines are skipped on read and dropped by the next write.
        println!("✗ Malformed lines found");
        Err("Verification failed".into())
    }
}

/// Checks every journal of every event in `dir`.
pub fn collect(
    dir: &DataDir,
    event: Option<&str>,
) -> Result<Vec<VerifyResult>, Box<dyn std::error::Error>> {
    let mut results = Vec::new();
    for queue in open_queues(dir, event)? {
        results.push(VerifyResult {
            event_id: queue.event_id().to_string(),
            journals: queue.verify()?,
        });
    }
    Ok(results)
}

fn print_result(result: &VerifyResult) {
    println!("Event {}:", result.event_id);
    for (kind, health) in &result.journals {
        println!(
            "  {:<20} records: {}, malformed: {}",
            kind.name(),
            health.records,
            health.malformed.len()
        );
        for line in &health.malformed {
            println!("    line {}: {}", line.line_number, line.error);
        }
    }
}
