// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Staging cache for received print data.
//
// Payloads arrive before their transport is ready.  Each one is held under a
// caller-supplied session id until the transport can take it: small
// payloads stay in memory, large ones are spilled to a file in the managed
// temp directory and read back on demand.
//
// All bookkeeping and all spill-file I/O happen under one mutex.  A large
// spill therefore blocks unrelated sessions for the duration of the disk
// write; splitting the map lock from the disk path is possible later but the
// blocking semantics are kept for now.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument, warn};

use portmaster_core::config::CacheConfig;
use portmaster_core::error::{PortmasterError, Result};
use portmaster_core::types::FileMetadata;

use crate::checksum::checksum_hex;

/// Name of the managed directory under the system temp path.
pub const CACHE_DIR_NAME: &str = "PortMaster_Cache";

/// Default age after which `clear_expired_cache` drops an entry.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// One cached payload.
///
/// A spilled entry starts with an empty buffer and a `file_path`; after the
/// first successful fetch both are populated.
#[derive(Debug, Clone)]
pub struct CachedFileData {
    data: Vec<u8>,
    file_path: Option<PathBuf>,
    metadata: FileMetadata,
    inserted_at: Instant,
    complete: bool,
}

impl CachedFileData {
    /// Payload bytes (empty for a spilled entry that has not been read back).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Backing spill file, if the payload went to disk.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    /// Whether the full payload was stored.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_spilled(&self) -> bool {
        self.file_path.is_some()
    }
}

struct CacheState {
    entries: HashMap<String, CachedFileData>,
    max_cache_size: usize,
}

/// Session-keyed payload cache with disk spillover and expiry.
pub struct TempDataManager {
    state: Mutex<CacheState>,
    temp_dir: PathBuf,
    spill_threshold: usize,
    /// Makes every spill file name unique within this manager.
    spill_seq: AtomicU64,
}

impl fmt::Debug for TempDataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempDataManager")
            .field("temp_dir", &self.temp_dir)
            .field("spill_threshold", &self.spill_threshold)
            .finish_non_exhaustive()
    }
}

impl Default for TempDataManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl TempDataManager {
    /// Create a manager and its temp directory.
    ///
    /// If the directory cannot be created the manager falls back to
    /// `<cwd>/temp/PortMaster_Cache`; neither failure is fatal; spill
    /// writes retry the directory creation themselves.
    pub fn new(config: CacheConfig) -> Self {
        let temp_dir = prepare_temp_dir(config.cache_dir.as_deref());
        info!(
            dir = %temp_dir.display(),
            spill_threshold = config.spill_threshold,
            max_cache_size = config.max_cache_size,
            "staging cache ready"
        );
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                max_cache_size: config.max_cache_size,
            }),
            temp_dir,
            spill_threshold: config.spill_threshold,
            spill_seq: AtomicU64::new(0),
        }
    }

    /// Directory holding spill files.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn spill_threshold(&self) -> usize {
        self.spill_threshold
    }

    /// Store `payload` under `session_id`, replacing any previous entry.
    ///
    /// The CRC-32 of the full payload is written into the stored metadata
    /// together with `session_id`.  Payloads larger than the configured
    /// maximum are rejected before anything is stored.
    #[instrument(skip(self, payload, metadata), fields(size = payload.len()))]
    pub fn cache_received_data(
        &self,
        session_id: &str,
        payload: &[u8],
        mut metadata: FileMetadata,
    ) -> Result<()> {
        let mut state = self.lock();

        if payload.len() > state.max_cache_size {
            warn!(
                limit = state.max_cache_size,
                "payload exceeds the cache limit, rejecting"
            );
            return Err(PortmasterError::Capacity {
                size: payload.len(),
                limit: state.max_cache_size,
            });
        }

        metadata.checksum = checksum_hex(payload);
        metadata.session_id = session_id.to_owned();
        let checksum = metadata.checksum.clone();

        let entry = if payload.len() > self.spill_threshold {
            let path = self.spill_path(session_id, metadata.extension());
            write_spill_file(&path, payload)?;
            debug!(path = %path.display(), "payload spilled to disk");
            CachedFileData {
                data: Vec::new(),
                file_path: Some(path),
                metadata,
                inserted_at: Instant::now(),
                complete: true,
            }
        } else {
            CachedFileData {
                data: payload.to_vec(),
                file_path: None,
                metadata,
                inserted_at: Instant::now(),
                complete: true,
            }
        };

        if let Some(previous) = state.entries.insert(session_id.to_owned(), entry) {
            debug!("replaced existing cache entry");
            remove_spill_file(previous.file_path.as_deref());
        }

        info!(%checksum, "payload cached");
        Ok(())
    }

    /// Fetch a copy of the entry for `session_id`.
    ///
    /// Spilled payloads are read back into memory on the first call and stay
    /// resident afterwards.  A failed read-back leaves the entry in place
    /// with an empty buffer and returns `None`.
    #[instrument(skip(self))]
    pub fn get_cached_data(&self, session_id: &str) -> Option<CachedFileData> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(session_id)?;

        let pending = entry.data.is_empty().then(|| entry.file_path.clone()).flatten();
        if let Some(path) = pending {
            if let Err(e) = read_spill_file(&path, &mut entry.data) {
                warn!(path = %path.display(), error = %e, "spill read-back failed");
                entry.data = Vec::new();
                return None;
            }
            debug!(bytes = entry.data.len(), "spilled payload read back");
        }

        Some(entry.clone())
    }

    /// Stored metadata for `session_id`, without reading a spilled payload.
    pub fn cached_metadata(&self, session_id: &str) -> Option<FileMetadata> {
        self.lock()
            .entries
            .get(session_id)
            .map(|entry| entry.metadata.clone())
    }

    /// Whether an entry exists for `session_id`.
    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().entries.contains_key(session_id)
    }

    /// Remove the entry for `session_id` and its spill file.  Unknown ids are
    /// ignored.
    pub fn clear_cache(&self, session_id: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.remove(session_id) {
            remove_spill_file(entry.file_path.as_deref());
            debug!(session_id, "cache entry cleared");
        }
    }

    /// Remove every entry and spill file.
    pub fn clear_all_cache(&self) {
        let mut state = self.lock();
        let count = state.entries.len();
        for (_, entry) in state.entries.drain() {
            remove_spill_file(entry.file_path.as_deref());
        }
        if count > 0 {
            info!(count, "cache cleared");
        }
    }

    /// Remove entries older than `max_age` (see [`DEFAULT_MAX_AGE`]).
    ///
    /// Ages are measured against a single timestamp taken when the sweep
    /// starts; an entry whose age equals `max_age` exactly is kept.  Returns
    /// the number of entries removed.
    pub fn clear_expired_cache(&self, max_age: Duration) -> usize {
        self.clear_expired_at(Instant::now(), max_age)
    }

    pub(crate) fn clear_expired_at(&self, now: Instant, max_age: Duration) -> usize {
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.inserted_at) > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = state.entries.remove(id) {
                remove_spill_file(entry.file_path.as_deref());
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), max_age_secs = max_age.as_secs(), "expired cache entries removed");
        }
        expired.len()
    }

    /// Bytes currently resident in memory.  Spilled payloads count only
    /// once they have been read back.
    pub fn cache_size(&self) -> usize {
        self.lock().entries.values().map(|e| e.data.len()).sum()
    }

    /// Change the insert-time limit.  Existing entries are not evicted.
    pub fn set_max_cache_size(&self, bytes: usize) {
        self.lock().max_cache_size = bytes;
        debug!(bytes, "cache limit changed");
    }

    pub fn max_cache_size(&self) -> usize {
        self.lock().max_cache_size
    }

    pub fn cached_session_ids(&self) -> HashSet<String> {
        self.lock().entries.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        #[cfg(feature = "lock-tracing")]
        let started = Instant::now();

        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        #[cfg(feature = "lock-tracing")]
        {
            tracing::trace!(
                wait_us = started.elapsed().as_micros() as u64,
                "cache lock acquired"
            );
        }

        guard
    }

    /// `cache_<session>_<epoch-ms>_<seq>[.<ext>]` inside the temp directory.
    ///
    /// Sanitising is lossy (`a.b` and `a_b` collide), so the sequence number
    /// is what keeps names distinct.
    fn spill_path(&self, session_id: &str, extension: Option<&str>) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = self.spill_seq.fetch_add(1, Ordering::Relaxed);
        let mut name = format!("cache_{}_{}_{}", sanitize(session_id), millis, seq);
        if let Some(ext) = extension {
            name.push('.');
            name.push_str(&sanitize(ext));
        }
        self.temp_dir.join(name)
    }
}

impl Drop for TempDataManager {
    fn drop(&mut self) {
        self.clear_all_cache();
        // Only succeeds when the directory is empty.
        match fs::remove_dir(&self.temp_dir) {
            Ok(()) => debug!(dir = %self.temp_dir.display(), "temp directory removed"),
            Err(e) => debug!(dir = %self.temp_dir.display(), error = %e, "temp directory left in place"),
        }
    }
}

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

fn prepare_temp_dir(preferred: Option<&Path>) -> PathBuf {
    let primary = preferred
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::env::temp_dir().join(CACHE_DIR_NAME));

    match fs::create_dir_all(&primary) {
        Ok(()) => primary,
        Err(e) => {
            let fallback = std::env::current_dir()
                .unwrap_or_default()
                .join("temp")
                .join(CACHE_DIR_NAME);
            warn!(
                dir = %primary.display(),
                fallback = %fallback.display(),
                error = %e,
                "cannot create cache directory, using fallback"
            );
            if let Err(e) = fs::create_dir_all(&fallback) {
                warn!(dir = %fallback.display(), error = %e, "cannot create fallback cache directory");
            }
            fallback
        }
    }
}

/// Write a spill file; a failed write removes whatever was written.
fn write_spill_file(path: &Path, payload: &[u8]) -> Result<()> {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(payload)?;
        file.flush()
    })();

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "spill write failed");
        if path.exists() {
            let _ = fs::remove_file(path);
        }
        return Err(PortmasterError::Resource(format!(
            "write spill file {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

fn read_spill_file(path: &Path, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut file = fs::File::open(path)?;
    file.read_to_end(buf)
}

fn remove_spill_file(path: Option<&Path>) {
    let Some(path) = path else { return };
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "spill file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "cannot remove spill file"),
    }
}

/// Keep file names portable: anything outside `[A-Za-z0-9_-]` becomes `_`.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &Path, spill_threshold: usize, max_cache_size: usize) -> TempDataManager {
        TempDataManager::new(CacheConfig {
            spill_threshold,
            max_cache_size,
            cache_dir: Some(dir.join("cache")),
        })
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .map(|rd| rd.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }

    #[test]
    fn small_payload_stays_in_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = TempDataManager::new(CacheConfig {
            cache_dir: Some(tmp.path().join("cache")),
            ..Default::default()
        });

        cache
            .cache_received_data("s1", b"hello", FileMetadata::new("a.txt", 5))
            .unwrap();

        assert_eq!(cache.cache_size(), 5);
        let entry = cache.get_cached_data("s1").unwrap();
        assert!(!entry.is_spilled());
        assert!(entry.is_complete());
        assert_eq!(entry.data(), b"hello");
        assert!(files_in(cache.temp_dir()).is_empty());
    }

    #[test]
    fn metadata_carries_checksum_and_session() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 1024, 4096);

        let mut metadata = FileMetadata::new("doc.ps", 9);
        metadata.session_id = "someone-else".into();
        cache
            .cache_received_data("s1", b"123456789", metadata)
            .unwrap();

        let entry = cache.get_cached_data("s1").unwrap();
        assert_eq!(entry.metadata().checksum, "cbf43926");
        assert_eq!(entry.metadata().session_id, "s1");
        assert_eq!(entry.metadata().filename, "doc.ps");
    }

    #[test]
    fn large_payload_is_spilled_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 16, 1024);
        let payload: Vec<u8> = (0..100u8).collect();

        cache
            .cache_received_data("s2", &payload, FileMetadata::new("job.pdf", 100))
            .unwrap();

        assert_eq!(cache.cache_size(), 0);
        let files = files_in(cache.temp_dir());
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cache_s2_"), "{name}");
        assert!(name.ends_with(".pdf"), "{name}");

        let metadata = cache.cached_metadata("s2").unwrap();
        assert_eq!(metadata.checksum, checksum_hex(&payload));
        assert_eq!(cache.cache_size(), 0, "metadata lookup must not read back");

        let entry = cache.get_cached_data("s2").unwrap();
        assert!(entry.is_spilled());
        assert_eq!(entry.data(), &payload[..]);
        assert_eq!(cache.cache_size(), 100);

        // Second fetch reuses the resident copy even if the file vanished.
        fs::remove_file(&files[0]).unwrap();
        assert_eq!(cache.get_cached_data("s2").unwrap().data(), &payload[..]);
    }

    #[test]
    fn twelve_mib_payload_spills_with_default_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = TempDataManager::new(CacheConfig {
            cache_dir: Some(tmp.path().join("cache")),
            ..Default::default()
        });
        let payload = vec![0x5Au8; 12 * 1024 * 1024];

        cache
            .cache_received_data("s2", &payload, FileMetadata::new("big.bin", payload.len() as u64))
            .unwrap();
        assert_eq!(cache.cache_size(), 0);

        let entry = cache.get_cached_data("s2").unwrap();
        assert_eq!(entry.data().len(), payload.len());
        assert_eq!(cache.cache_size(), 12 * 1024 * 1024);
    }

    #[test]
    fn oversized_payload_is_rejected_without_side_effects() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 4, 10);

        let err = cache
            .cache_received_data("big", &[0u8; 11], FileMetadata::new("x.bin", 11))
            .unwrap_err();

        assert!(matches!(err, PortmasterError::Capacity { size: 11, limit: 10 }));
        assert!(!cache.contains("big"));
        assert!(cache.cached_session_ids().is_empty());
        assert!(files_in(cache.temp_dir()).is_empty());
    }

    #[test]
    fn payload_at_limit_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 100, 10);
        cache
            .cache_received_data("edge", &[1u8; 10], FileMetadata::new("e", 10))
            .unwrap();
        assert!(cache.contains("edge"));
    }

    #[test]
    fn clear_removes_entry_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 4, 1024);

        cache
            .cache_received_data("s1", &[7u8; 32], FileMetadata::new("a.bin", 32))
            .unwrap();
        cache
            .cache_received_data("s2", &[8u8; 32], FileMetadata::new("b.bin", 32))
            .unwrap();
        assert_eq!(files_in(cache.temp_dir()).len(), 2);

        cache.clear_cache("s1");
        let remaining = files_in(cache.temp_dir());
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].to_string_lossy().contains("cache_s2_"));
        assert!(cache.get_cached_data("s1").is_none());

        // Unknown ids are a no-op.
        cache.clear_cache("never-seen");

        cache.clear_all_cache();
        assert!(files_in(cache.temp_dir()).is_empty());
        assert!(cache.cached_session_ids().is_empty());
    }

    #[test]
    fn recaching_deletes_previous_spill_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 4, 1024);

        cache
            .cache_received_data("s1", &[1u8; 64], FileMetadata::new("first.bin", 64))
            .unwrap();
        cache
            .cache_received_data("s1", &[2u8; 64], FileMetadata::new("second.bin", 64))
            .unwrap();

        assert_eq!(files_in(cache.temp_dir()).len(), 1);
        assert_eq!(cache.get_cached_data("s1").unwrap().data(), &[2u8; 64][..]);

        // Replacing a spilled entry with an in-memory one removes the file too.
        cache
            .cache_received_data("s1", b"tiny", FileMetadata::new("third.bin", 4))
            .unwrap();
        assert!(files_in(cache.temp_dir()).is_empty());
        assert_eq!(cache.cache_size(), 4);
    }

    #[test]
    fn colliding_sanitised_ids_get_their_own_files() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 4, 1024);

        for i in 0..16 {
            let dotted = format!("job.{i}");
            let underscored = format!("job_{i}");
            cache
                .cache_received_data(&dotted, &[0xAA; 32], FileMetadata::new("a.bin", 32))
                .unwrap();
            cache
                .cache_received_data(&underscored, &[0xBB; 32], FileMetadata::new("b.bin", 32))
                .unwrap();
        }
        assert_eq!(files_in(cache.temp_dir()).len(), 32);

        for i in 0..16 {
            let dotted = format!("job.{i}");
            let underscored = format!("job_{i}");
            assert_eq!(cache.get_cached_data(&dotted).unwrap().data(), &[0xAA; 32][..]);
            cache.clear_cache(&dotted);
            assert_eq!(
                cache.get_cached_data(&underscored).unwrap().data(),
                &[0xBB; 32][..],
                "clearing {dotted} touched {underscored}"
            );
        }
        assert_eq!(files_in(cache.temp_dir()).len(), 16);
    }

    #[test]
    fn concurrent_sessions_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 48, 1 << 20);

        std::thread::scope(|scope| {
            for worker in 0..8u8 {
                let cache = &cache;
                scope.spawn(move || {
                    for round in 0..20u8 {
                        let id = format!("w{worker}.r{round}");
                        // Alternate between in-memory and spilled payloads.
                        let len = if round % 2 == 0 { 16 } else { 96 };
                        let payload = vec![worker.wrapping_mul(31).wrapping_add(round); len];
                        cache
                            .cache_received_data(&id, &payload, FileMetadata::new("p.bin", len as u64))
                            .unwrap();
                        let entry = cache.get_cached_data(&id).unwrap();
                        assert_eq!(entry.data(), &payload[..], "{id}");
                        assert_eq!(entry.metadata().checksum, checksum_hex(&payload));
                        if round % 3 == 0 {
                            cache.clear_cache(&id);
                            assert!(!cache.contains(&id));
                        }
                    }
                });
            }
        });

        // Rounds 0, 3, .. 18 were cleared: 7 of 20 per worker.
        assert_eq!(cache.cached_session_ids().len(), 8 * 13);
        let spilled_left = 8 * (1..20).filter(|r| r % 2 == 1 && r % 3 != 0).count();
        assert_eq!(files_in(cache.temp_dir()).len(), spilled_left);
        for id in cache.cached_session_ids() {
            assert!(cache.get_cached_data(&id).is_some(), "{id}");
        }
    }

    #[test]
    fn failed_read_back_keeps_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 4, 1024);

        cache
            .cache_received_data("s1", &[3u8; 64], FileMetadata::new("a.bin", 64))
            .unwrap();
        for file in files_in(cache.temp_dir()) {
            fs::remove_file(file).unwrap();
        }

        assert!(cache.get_cached_data("s1").is_none());
        assert!(cache.contains("s1"));
        assert_eq!(cache.cache_size(), 0);
    }

    #[test]
    fn expiry_removes_only_strictly_older_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 4, 1024);

        cache
            .cache_received_data("old", &[1u8; 64], FileMetadata::new("old.bin", 64))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        cache
            .cache_received_data("new", b"ab", FileMetadata::new("new.bin", 2))
            .unwrap();

        let now = Instant::now();
        let newest = cache.get_cached_data("new").unwrap().inserted_at();
        // "new" sits exactly on the boundary and must survive.
        let max_age = now.duration_since(newest);

        assert_eq!(cache.clear_expired_at(now, max_age), 1);
        assert_eq!(cache.cached_session_ids(), HashSet::from(["new".to_string()]));
        assert!(files_in(cache.temp_dir()).is_empty());
    }

    #[test]
    fn default_expiry_keeps_fresh_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 1024, 4096);
        cache
            .cache_received_data("s1", b"fresh", FileMetadata::new("f", 5))
            .unwrap();
        assert_eq!(cache.clear_expired_cache(DEFAULT_MAX_AGE), 0);
        assert!(cache.contains("s1"));
    }

    #[test]
    fn shrinking_limit_does_not_evict() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 1024, 4096);
        cache
            .cache_received_data("s1", &[0u8; 100], FileMetadata::new("a", 100))
            .unwrap();

        cache.set_max_cache_size(10);
        assert_eq!(cache.max_cache_size(), 10);
        assert!(cache.contains("s1"));
        assert!(cache
            .cache_received_data("s2", &[0u8; 100], FileMetadata::new("b", 100))
            .is_err());
    }

    #[test]
    fn session_ids_are_sanitised_in_file_names() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = manager_in(tmp.path(), 4, 1024);
        cache
            .cache_received_data("../evil/id", &[0u8; 16], FileMetadata::new("x", 16))
            .unwrap();

        let files = files_in(cache.temp_dir());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].parent().unwrap(), cache.temp_dir());
        assert!(files[0].to_string_lossy().contains("cache____evil_id_"));
    }

    #[test]
    fn drop_removes_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("cache");
        {
            let cache = manager_in(tmp.path(), 4, 1024);
            cache
                .cache_received_data("s1", &[0u8; 16], FileMetadata::new("x", 16))
                .unwrap();
            assert!(dir.exists());
        }
        assert!(!dir.exists());
    }

    #[test]
    fn drop_keeps_directory_with_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("cache");
        {
            let _cache = manager_in(tmp.path(), 4, 1024);
            fs::write(dir.join("keep.me"), b"not ours").unwrap();
        }
        assert!(dir.join("keep.me").exists());
    }
}
