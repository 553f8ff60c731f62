//! Change queue commands.

use lexisync_engine::{ChangeQueue, QueueConfig, QueueEntry};
use lexisync_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// One queued change, flattened for output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRow {
    /// Queue position.
    pub seq: u64,
    /// Change id.
    pub change_id: String,
    /// Target table.
    pub table: String,
    /// Operation name.
    pub operation: String,
    /// Entity local id.
    pub local_id: String,
    /// Client timestamp (epoch millis).
    pub timestamp: i64,
    /// Failed push attempts.
    pub attempts: u32,
    /// Last server rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&QueueEntry> for QueueRow {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            seq: entry.seq,
            change_id: entry.change.id.to_string(),
            table: entry.change.table.to_string(),
            operation: entry.change.operation.to_string(),
            local_id: entry.change.local_id.to_string(),
            timestamp: entry.change.timestamp,
            attempts: entry.attempts,
            last_error: entry.last_error.clone(),
        }
    }
}

fn open(path: &Path) -> Result<ChangeQueue<FileBackend>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("queue file not found: {}", path.display()).into());
    }
    Ok(ChangeQueue::open(FileBackend::open(path)?, QueueConfig::default())?)
}

/// Loads queued changes in queue order.
pub fn load(
    path: &Path,
    failed_only: bool,
    limit: Option<usize>,
) -> Result<Vec<QueueRow>, Box<dyn std::error::Error>> {
    let queue = open(path)?;
    Ok(queue
        .entries()
        .iter()
        .filter(|e| !failed_only || e.last_error.is_some())
        .take(limit.unwrap_or(usize::MAX))
        .map(QueueRow::from)
        .collect())
}

/// Runs the dump-queue command.
pub fn dump(
    path: &Path,
    failed_only: bool,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = load(path, failed_only, limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            println!("Queue: {}", path.display());
            println!("  {} change(s)", rows.len());
            println!();
            for row in &rows {
                println!(
                    "  #{:<6} {:<8} {:<18} {} ({})",
                    row.seq, row.operation, row.table, row.local_id, row.change_id
                );
                if let Some(error) = &row.last_error {
                    println!("          rejected {}x: {}", row.attempts, error);
                }
            }
        }
    }

    Ok(())
}

/// Runs the compact-queue command.
pub fn compact(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let queue = open(path)?;
    let before = queue.log_size()?;
    queue.compact()?;
    let after = queue.log_size()?;

    tracing::info!(before, after, pending = queue.len(), "queue compacted");
    println!("Compacted {}", path.display());
    println!("  Pending changes: {}", queue.len());
    println!("  Size before:     {} bytes", before);
    println!("  Size after:      {} bytes", after);
    Ok(())
}
