//! The contract every importer exposes to the host ingestion tool.

use crate::dedup::ReferenceDuplicates;
use crate::error::Result;
use crate::model::Entry;
use async_trait::async_trait;
use std::path::Path;

/// One data source. The host hands an importer a file path plus the
/// already-recorded entries and gets back new entries; nothing else is
/// shared between importers.
#[async_trait]
pub trait Importer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this importer is responsible for the given artifact,
    /// decided by filename sniffing.
    fn identify(&self, path: &Path) -> bool;

    /// Default booking account; empty when postings name their accounts
    /// themselves.
    fn account(&self, _path: &Path) -> String {
        String::new()
    }

    async fn extract(&self, path: &Path, existing: &[Entry]) -> Result<Vec<Entry>>;

    /// Metadata keys the host should use for duplicate detection.
    fn comparator(&self) -> ReferenceDuplicates {
        ReferenceDuplicates::default()
    }
}

/// Filename component of a path, as identify() is defined over names.
pub fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}
