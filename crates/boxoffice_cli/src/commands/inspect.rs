//! Inspect command implementation.

use super::{open_dir, open_queues};
use boxoffice_core::DataDir;
use serde::Serialize;
use std::path::Path;

/// Queue inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory path.
    pub path: String,
    /// Whether the legacy migration has completed.
    pub migrated: bool,
    /// Per-event counts.
    pub events: Vec<EventCounts>,
}

/// Unsynced work of a single event.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EventCounts {
    /// Event id.
    pub event_id: String,
    /// Sold items waiting for upload.
    pub pending_items: usize,
    /// Scans waiting for upload.
    pub pending_scans: usize,
    /// Rejected purchases still stored.
    pub rejected_purchases: usize,
    /// Rejected purchases waiting for an operator.
    pub needs_review: usize,
    /// Sold items confirmed or imported from the service.
    pub sold_items: usize,
    /// Entries in the commit ledger.
    pub ledger_entries: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, event: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_dir(path)?;
    let result = collect(&dir, event)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers the counts of every event in `dir`.
pub fn collect(
    dir: &DataDir,
    event: Option<&str>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut events = Vec::new();
    for queue in open_queues(dir, event)? {
        let counts = queue.pending_counts()?;
        events.push(EventCounts {
            event_id: queue.event_id().to_string(),
            pending_items: counts.items,
            pending_scans: counts.scans,
            rejected_purchases: counts.rejected_purchases,
            needs_review: counts.needs_review,
            sold_items: queue.sold_items().len()?,
            ledger_entries: queue.ledger().journal().len()?,
        });
    }

    Ok(InspectResult {
        path: dir.path().display().to_string(),
        migrated: dir.is_migrated(),
        events,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("BoxOffice Queue Inspection");
    println!("==========================");
    println!();
    println!("Path:     {}", result.path);
    println!("Migrated: {}", if result.migrated { "yes" } else { "no" });

    if result.events.is_empty() {
        println!();
        println!("No event queues found.");
        return;
    }

    for counts in &result.events {
        println!();
        println!("Event {}:", counts.event_id);
        println!("  Pending items:      {}", counts.pending_items);
        println!("  Pending scans:      {}", counts.pending_scans);
        println!("  Rejected purchases: {}", counts.rejected_purchases);
        println!("  Needs review:       {}", counts.needs_review);
        println!("  Sold items:         {}", counts.sold_items);
        println!("  Ledger entries:     {}", counts.ledger_entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_testkit::prelude::*;

    #[test]
    fn counts_each_event() {
        let data = TestDataDir::new();
        let fest = data.queue("summer-fest");
        fest.record_purchase(&[sale(3, 500), sale(4, 700)]).unwrap();
        fest.record_scan("T-1").unwrap();
        data.queue("winter-gala").record_scan("T-9").unwrap();

        let result = collect(&data, None).unwrap();
        assert_eq!(result.events.len(), 2);

        let summer = &result.events[0];
        assert_eq!(summer.event_id, "summer-fest");
        assert_eq!(summer.pending_items, 2);
        assert_eq!(summer.pending_scans, 1);
        assert_eq!(summer.ledger_entries, 1);
        assert_eq!(result.events[1].pending_items, 0);
    }

    #[test]
    fn unknown_event_is_an_error() {
        let data = TestDataDir::new();
        data.queue("summer-fest");
        assert!(collect(&data, Some("other")).is_err());
        assert_eq!(collect(&data, Some("summer-fest")).unwrap().events.len(), 1);
    }
}
