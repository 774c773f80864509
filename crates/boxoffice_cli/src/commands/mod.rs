//! CLI command implementations.

pub mod inspect;
pub mod migrate;
pub mod review;
pub mod verify;

use boxoffice_core::{DataDir, EventId, EventQueue, QueueConfig};
use std::path::Path;

/// Opens an existing data directory.
///
/// Fails with `DataDirLocked` while the app holds the directory.
pub fn open_dir(path: &Path) -> Result<DataDir, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data directory found at {:?}", path).into());
    }
    Ok(DataDir::open(path, &config())?)
}

/// Opens the queues of every event, or of `only` if given.
pub fn open_queues(
    dir: &DataDir,
    only: Option<&str>,
) -> Result<Vec<EventQueue>, Box<dyn std::error::Error>> {
    let events = match only {
        Some(id) => {
            let event_id = EventId::new(id)?;
            if !dir.event_dir(&event_id).exists() {
                return Err(format!("No queue for event {event_id}").into());
            }
            vec![event_id]
        }
        None => dir.list_events()?,
    };
    let config = config();
    let mut queues = Vec::with_capacity(events.len());
    for event_id in events {
        queues.push(EventQueue::open(dir, event_id, &config)?);
    }
    Ok(queues)
}

fn config() -> QueueConfig {
    QueueConfig::new().create_if_missing(false)
}
