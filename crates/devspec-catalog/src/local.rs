//! Local catalog index over a directory of pre-fetched snapshots
//!
//! Loading reads every `*.json` file in the snapshot directory concurrently,
//! extracting only the fields needed for lookup:
//! - `database_id` (catalog id)
//! - `manufacturer.reference`
//! - `device_ref`, one or more comma-separated `TYPE:ID` tokens
//! - `version_min` / `version_max`
//!
//! The finished index is published with a single atomic swap, so resolutions
//! running concurrently with a reload see either the old or the new index,
//! never a mix. Full records are read and normalized lazily on resolve.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use devspec_core::{
    de, parse_record, select_by_firmware, CatalogRecord, DeviceIdentity, LoadError, ResolveError,
    TransportError, VersionError, VersionRange, VersionRanged,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default cap on concurrently open snapshot files
pub const DEFAULT_MAX_CONCURRENT_READS: usize = 64;

/// Lookup key: manufacturer plus normalized `TYPE:ID` device reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IndexKey {
    pub manufacturer_id: u32,
    pub device_ref: String,
}

impl IndexKey {
    pub fn new(manufacturer_id: u32, device_ref: &str) -> Self {
        Self {
            manufacturer_id,
            device_ref: normalize_device_ref(device_ref),
        }
    }

    pub fn for_identity(identity: &DeviceIdentity) -> Self {
        Self {
            manufacturer_id: identity.manufacturer_id,
            device_ref: identity.device_ref(),
        }
    }
}

/// One snapshot file that can serve a device key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntryRef {
    pub version_range: VersionRange,
    pub path: PathBuf,
    pub catalog_id: i64,
}

impl VersionRanged for CatalogEntryRef {
    fn version_range(&self) -> Option<&VersionRange> {
        Some(&self.version_range)
    }
}

/// Summary of the most recent completed load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub keys: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct IndexSnapshot {
    entries: HashMap<IndexKey, Vec<CatalogEntryRef>>,
    stats: Option<IndexStats>,
}

#[derive(Error, Debug)]
enum SnapshotError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unparseable index fields: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad version range: {0}")]
    Version(#[from] VersionError),
}

#[derive(Deserialize)]
struct SnapshotHeader {
    database_id: i64,
    manufacturer: SnapshotManufacturer,
    #[serde(default, deserialize_with = "de::text")]
    device_ref: String,
    #[serde(default, deserialize_with = "de::text")]
    version_min: String,
    #[serde(default, deserialize_with = "de::text")]
    version_max: String,
}

#[derive(Deserialize)]
struct SnapshotManufacturer {
    #[serde(deserialize_with = "de::reference")]
    reference: u32,
}

/// Catalog source backed by local snapshot files
pub struct LocalCatalogIndex {
    snapshot: ArcSwap<IndexSnapshot>,
    loaded: AtomicBool,
    max_concurrent_reads: usize,
}

impl Default for LocalCatalogIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCatalogIndex {
    pub fn new() -> Self {
        Self::with_max_concurrent_reads(DEFAULT_MAX_CONCURRENT_READS)
    }

    pub fn with_max_concurrent_reads(max_concurrent_reads: usize) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(IndexSnapshot::default()),
            loaded: AtomicBool::new(false),
            max_concurrent_reads: max_concurrent_reads.max(1),
        }
    }

    /// True once any load has completed; never reverts
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Number of (key, snapshot) entries in the current index
    pub fn entries_count(&self) -> usize {
        self.snapshot.load().entries.values().map(Vec::len).sum()
    }

    /// Number of distinct device keys in the current index
    pub fn keys_count(&self) -> usize {
        self.snapshot.load().entries.len()
    }

    pub fn stats(&self) -> Option<IndexStats> {
        self.snapshot.load().stats.clone()
    }

    /// Candidate snapshots for an identity, ordered by catalog id
    pub fn entries_for(&self, identity: &DeviceIdentity) -> Vec<CatalogEntryRef> {
        self.snapshot
            .load()
            .entries
            .get(&IndexKey::for_identity(identity))
            .cloned()
            .unwrap_or_default()
    }

    /// Build the index from a snapshot directory and publish it
    ///
    /// Unreadable or malformed files are skipped with a warning. On error or
    /// cancellation the previously published index stays in place.
    pub async fn load(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<IndexStats, LoadError> {
        info!(dir = %dir.display(), "Loading local catalog snapshots");

        let files = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoadError::Cancelled),
            files = list_snapshot_files(dir) => files?,
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_reads));
        let mut tasks = JoinSet::new();
        for path in files {
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let entries = read_snapshot_entries(&path).await;
                (path, entries)
            });
        }

        let mut merged: HashMap<IndexKey, Vec<CatalogEntryRef>> = HashMap::new();
        let mut files_indexed = 0;
        let mut files_skipped = 0;

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!(dir = %dir.display(), "Snapshot load cancelled");
                    return Err(LoadError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((_, Ok(entries))) => {
                    files_indexed += 1;
                    for (key, entry) in entries {
                        merged.entry(key).or_default().push(entry);
                    }
                }
                Ok((path, Err(e))) => {
                    files_skipped += 1;
                    warn!(path = %path.display(), error = %e, "Skipping catalog snapshot");
                }
                Err(e) => {
                    files_skipped += 1;
                    warn!(error = %e, "Snapshot task failed");
                }
            }
        }

        // Completion order is arbitrary; the stored order must not be
        for list in merged.values_mut() {
            list.sort_by(|a, b| {
                a.catalog_id
                    .cmp(&b.catalog_id)
                    .then_with(|| a.path.cmp(&b.path))
            });
        }

        let stats = IndexStats {
            entries: merged.values().map(Vec::len).sum(),
            keys: merged.len(),
            files_indexed,
            files_skipped,
            loaded_at: Utc::now(),
        };

        self.snapshot.store(Arc::new(IndexSnapshot {
            entries: merged,
            stats: Some(stats.clone()),
        }));
        self.loaded.store(true, Ordering::Release);

        info!(
            dir = %dir.display(),
            entries = stats.entries,
            keys = stats.keys,
            files = stats.files_indexed,
            skipped = stats.files_skipped,
            "Local catalog index loaded"
        );
        Ok(stats)
    }

    /// Resolve a device identity against the loaded index
    pub async fn resolve(
        &self,
        identity: &DeviceIdentity,
        cancel: &CancellationToken,
    ) -> Result<CatalogRecord, ResolveError> {
        if !self.is_loaded() {
            return Err(ResolveError::IndexNotLoaded);
        }

        let snapshot = self.snapshot.load_full();
        let key = IndexKey::for_identity(identity);
        let not_found = || ResolveError::DeviceNotFound {
            manufacturer: key.manufacturer_id,
            device_ref: key.device_ref.clone(),
        };

        let candidates = snapshot.entries.get(&key).ok_or_else(not_found)?;
        let selection = select_by_firmware(candidates, &identity.firmware).ok_or_else(not_found)?;
        let entry = selection.candidate;

        if selection.matched {
            debug!(
                catalog_id = entry.catalog_id,
                firmware = %identity.firmware,
                "Firmware range matched"
            );
        } else {
            warn!(
                catalog_id = entry.catalog_id,
                firmware = %identity.firmware,
                candidates = candidates.len(),
                "No snapshot range contains firmware, using first listed"
            );
        }

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            read = tokio::fs::read(&entry.path) => read.map_err(|source| TransportError::Io {
                path: entry.path.clone(),
                source,
            })?,
        };

        let record = parse_record(&bytes).map_err(|source| ResolveError::Record {
            catalog_id: entry.catalog_id,
            source,
        })?;

        info!(
            identity = %identity,
            catalog_id = record.id,
            path = %entry.path.display(),
            "Resolved device from local catalog"
        );
        Ok(record)
    }
}

/// Uppercase a device reference, zero-padding well-formed `TYPE:ID` hex pairs
fn normalize_device_ref(token: &str) -> String {
    let token = token.trim();
    if let Some((ty, id)) = token.split_once(':') {
        if let (Ok(ty), Ok(id)) = (
            u16::from_str_radix(ty.trim(), 16),
            u16::from_str_radix(id.trim(), 16),
        ) {
            return format!("{:04X}:{:04X}", ty, id);
        }
    }
    token.to_uppercase()
}

/// Non-recursive list of `*.json` files, sorted by path
async fn list_snapshot_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let dir_error = |source| LoadError::Directory {
        path: dir.to_path_buf(),
        source,
    };

    let mut reader = tokio::fs::read_dir(dir).await.map_err(dir_error)?;
    let mut files = Vec::new();

    while let Some(entry) = reader.next_entry().await.map_err(dir_error)? {
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json {
            continue;
        }
        // Follows symlinks so linked snapshots are indexed too
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => debug!(path = %path.display(), "Ignoring non-file snapshot entry"),
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot stat snapshot entry"),
        }
    }

    files.sort();
    debug!(dir = %dir.display(), files = files.len(), "Enumerated snapshot files");
    Ok(files)
}

async fn read_snapshot_entries(
    path: &Path,
) -> Result<Vec<(IndexKey, CatalogEntryRef)>, SnapshotError> {
    let bytes = tokio::fs::read(path).await?;
    let header: SnapshotHeader = serde_json::from_slice(&bytes)?;
    let version_range =
        VersionRange::from_bounds(Some(&header.version_min), Some(&header.version_max))?;

    let mut keys: Vec<IndexKey> = Vec::new();
    for token in header.device_ref.split(',').filter(|t| !t.trim().is_empty()) {
        let key = IndexKey::new(header.manufacturer.reference, token);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    if keys.is_empty() {
        debug!(
            path = %path.display(),
            catalog_id = header.database_id,
            "Snapshot lists no device references"
        );
    }

    Ok(keys
        .into_iter()
        .map(|key| {
            let entry = CatalogEntryRef {
                version_range: version_range.clone(),
                path: path.to_path_buf(),
                catalog_id: header.database_id,
            };
            (key, entry)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use devspec_core::{FirmwareVersion, ParseError};
    use tempfile::TempDir;

    fn identity(manufacturer: u32, ty: u16, id: u16, firmware: &str) -> DeviceIdentity {
        DeviceIdentity::new(manufacturer, ty, id, FirmwareVersion::parse(firmware).unwrap())
    }

    fn snapshot(id: i64, manufacturer: &str, device_ref: &str, min: &str, max: &str) -> String {
        format!(
            r#"{{"database_id": {id}, "approved": 1, "deleted": 0, "label": "Snapshot {id}",
                "manufacturer": {{"reference": {manufacturer}, "label": "Test"}},
                "device_ref": "{device_ref}", "version_min": "{min}", "version_max": "{max}",
                "parameters": [{{"param_id": 1, "id": {id}}}]}}"#
        )
    }

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    /// Two firmware ranges for the same device, written in reverse id order
    fn fibaro_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.json", &snapshot(1040, "12", "4447:3036", "5.13", "5.255"));
        write(&dir, "a.json", &snapshot(806, "12", "4447:3036", "5.0", "5.12"));
        dir
    }

    async fn loaded(dir: &TempDir) -> LocalCatalogIndex {
        let index = LocalCatalogIndex::new();
        index.load(dir.path(), &CancellationToken::new()).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_resolve_before_load_fails() {
        let index = LocalCatalogIndex::new();
        assert!(!index.is_loaded());
        let err = index
            .resolve(&identity(12, 0x4447, 0x3036, "5.9"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::IndexNotLoaded));
    }

    #[tokio::test]
    async fn test_firmware_selects_snapshot() {
        let dir = fibaro_dir();
        let index = loaded(&dir).await;
        let cancel = CancellationToken::new();

        let ids: Vec<i64> = index
            .entries_for(&identity(12, 0x4447, 0x3036, "1.0"))
            .iter()
            .map(|e| e.catalog_id)
            .collect();
        assert_eq!(ids, vec![806, 1040]);

        let cases = [
            ("5.9", 806),
            ("5.13", 1040),
            ("5.20", 1040),
            ("5.0", 806),
            ("5.12", 806),
        ];
        for (firmware, expected) in cases {
            let record = index
                .resolve(&identity(12, 0x4447, 0x3036, firmware), &cancel)
                .await
                .unwrap();
            assert_eq!(record.id, expected, "firmware {firmware}");
        }

        // Outside every range: first listed wins
        let record = index
            .resolve(&identity(12, 0x4447, 0x3036, "6.0"), &cancel)
            .await
            .unwrap();
        assert_eq!(record.id, 806);
    }

    #[tokio::test]
    async fn test_order_follows_catalog_id_not_path() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.json", &snapshot(1040, "12", "4447:3036", "5.13", "5.255"));
        write(&dir, "b.json", &snapshot(806, "12", "4447:3036", "5.0", "5.12"));

        let index = LocalCatalogIndex::with_max_concurrent_reads(1);
        index.load(dir.path(), &CancellationToken::new()).await.unwrap();

        let ids: Vec<i64> = index
            .entries_for(&identity(12, 0x4447, 0x3036, "1.0"))
            .iter()
            .map(|e| e.catalog_id)
            .collect();
        assert_eq!(ids, vec![806, 1040]);

        let record = index
            .resolve(&identity(12, 0x4447, 0x3036, "6.0"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.id, 806);
    }

    #[tokio::test]
    async fn test_padded_hex_manufacturer_is_indexed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "aeotec.json", &snapshot(5, r#""0086""#, "0104:00A2", "1.0", "2.0"));

        let index = LocalCatalogIndex::new();
        let stats = index.load(dir.path(), &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.files_skipped, 0);

        let record = index
            .resolve(&identity(0x86, 0x0104, 0x00A2, "1.5"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.id, 5);
    }

    #[tokio::test]
    async fn test_unknown_device_not_found() {
        let dir = fibaro_dir();
        let index = loaded(&dir).await;
        let err = index
            .resolve(&identity(13, 0x4447, 0x3036, "5.9"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::DeviceNotFound { manufacturer: 13, .. }));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_skipped() {
        let dir = fibaro_dir();
        write(&dir, "broken.json", "{ this is not json");
        write(
            &dir,
            "no_id.json",
            r#"{"manufacturer": {"reference": 12}, "device_ref": "0001:0001"}"#,
        );
        write(&dir, "notes.txt", "ignored");
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();

        let index = LocalCatalogIndex::new();
        let stats = index.load(dir.path(), &CancellationToken::new()).await.unwrap();

        assert_eq!(index.entries_count(), 2);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.keys, 1);
        assert_eq!(stats.files_indexed, 2);
        assert_eq!(stats.files_skipped, 2);
    }

    #[tokio::test]
    async fn test_multiple_device_refs_and_hex_manufacturer() {
        let dir = TempDir::new().unwrap();
        write(&dir, "multi.json", &snapshot(77, r#""0x0086""#, "0102:0064, 202:64,", "", ""));

        let index = loaded(&dir).await;
        assert_eq!(index.entries_count(), 2);
        assert_eq!(index.keys_count(), 2);

        let record = index
            .resolve(&identity(0x86, 0x0202, 0x0064, "1.0"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.id, 77);
        assert!(index.entries_for(&identity(0x86, 0x0102, 0x0064, "0"))[0]
            .version_range
            .contains(&FirmwareVersion::parse("255.255").unwrap()));
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let dir = fibaro_dir();
        let index = loaded(&dir).await;
        let first = index.entries_for(&identity(12, 0x4447, 0x3036, "5.9"));
        let count = index.entries_count();

        index.load(dir.path(), &CancellationToken::new()).await.unwrap();
        assert_eq!(index.entries_for(&identity(12, 0x4447, 0x3036, "5.9")), first);
        assert_eq!(index.entries_count(), count);
        let record = index
            .resolve(&identity(12, 0x4447, 0x3036, "5.13"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.id, 1040);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_index() {
        let dir = fibaro_dir();
        let index = loaded(&dir).await;

        let err = index
            .load(&dir.path().join("missing"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Directory { .. }));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = index.load(dir.path(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());

        assert!(index.is_loaded());
        assert_eq!(index.entries_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_load_never_marks_loaded() {
        let dir = fibaro_dir();
        let index = LocalCatalogIndex::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(index.load(dir.path(), &cancel).await.unwrap_err().is_cancelled());
        assert!(!index.is_loaded());
        assert_eq!(index.entries_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_winner_propagates_invalid_data() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "gone.json",
            r#"{"database_id": 9, "approved": 1, "deleted": 1,
                "manufacturer": {"reference": 1}, "device_ref": "0001:0002"}"#,
        );
        let index = loaded(&dir).await;
        let err = index
            .resolve(&identity(1, 1, 2, "1.0"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ResolveError::Record { catalog_id: 9, source } => {
                assert!(matches!(source, ParseError::InvalidCatalogData { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_removed_winner_is_io_error() {
        let dir = fibaro_dir();
        let index = loaded(&dir).await;
        std::fs::remove_file(dir.path().join("a.json")).unwrap();

        let err = index
            .resolve(&identity(12, 0x4447, 0x3036, "5.9"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Transport(TransportError::Io { .. })));
    }

    #[tokio::test]
    async fn test_concurrency_cap_of_one_still_loads_everything() {
        let dir = TempDir::new().unwrap();
        for i in 0..20 {
            let body = snapshot(i, "5", &format!("0001:{i:04X}"), "1.0", "2.0");
            write(&dir, &format!("{i}.json"), &body);
        }
        let index = LocalCatalogIndex::with_max_concurrent_reads(1);
        let stats = index.load(dir.path(), &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.files_indexed, 20);
        assert_eq!(index.keys_count(), 20);
    }

    #[test]
    fn test_normalize_device_ref() {
        assert_eq!(normalize_device_ref("4447:3036"), "4447:3036");
        assert_eq!(normalize_device_ref(" 202:6a "), "0202:006A");
        assert_eq!(normalize_device_ref("odd-ref"), "ODD-REF");
    }
}
