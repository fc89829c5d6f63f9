use super::models::DownloadRecord;
use anyhow::Result;

pub trait DownloadRecordStore: Send + Sync {
    /// Returns the record registered under the given token.
    /// Returns Ok(None) if no such token was ever registered.
    /// Returns Err if there is a database error.
    fn get_record(&self, token: &str) -> Result<Option<DownloadRecord>>;

    /// Inserts the record, or overwrites an existing one with the same token
    /// (last-writer-wins; re-declaring a file is not additive).
    fn upsert_record(&self, record: &DownloadRecord) -> Result<()>;
}

pub trait DownloadCounterStore: Send + Sync {
    /// Adds 1 to the counter for the given file stem, creating the entry at
    /// 1 on the first download. Returns the new count. Must be atomic per
    /// key: concurrent increments of the same stem may not be lost.
    fn increment_and_persist(&self, name: &str) -> Result<u64>;

    /// Returns the current count for the given file stem, 0 if the file was
    /// never downloaded.
    fn get_count(&self, name: &str) -> Result<u64>;

    /// Returns every (stem, count) pair, ordered by stem.
    fn get_all_counts(&self) -> Result<Vec<(String, u64)>>;
}

/// Combined trait for the store backing both the record registry and the
/// download counters.
pub trait DownloadStore: DownloadRecordStore + DownloadCounterStore {}

impl<T: DownloadRecordStore + DownloadCounterStore> DownloadStore for T {}
