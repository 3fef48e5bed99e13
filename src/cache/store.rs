//! Content-addressed image cache on local disk
//!
//! Images are stored by their SHA-256 hash, enabling:
//! - Deduplication (same image content = same key)
//! - Immutable caching (a key never changes meaning)
//! - Safe filenames (derived from the key, never from client input)
//!
//! An in-memory index mirrors the images directory so lookups never scan the
//! filesystem. The index is rebuilt from disk when the cache is opened.
//!
//! Publishing a file (rename + index insert) and unlinking evicted files both
//! happen under `fs_lock`, so an eviction never deletes a blob that a
//! concurrent `put` has just re-published under the same key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::key::{compute_key, validate_key};
use super::thumbnail::{self, ThumbnailError};

/// Retention limits for the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of entries kept
    pub max_entries: usize,
    /// Maximum total size of all entries in bytes
    pub max_bytes: u64,
    /// Entries older than this are removed by `expire`
    pub ttl: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_bytes: 512 * 1024 * 1024,
            ttl: None,
        }
    }
}

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("image data is empty")]
    EmptyBlob,

    #[error("image of {size} bytes exceeds cache capacity of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("failed to prepare cache directory {}: {source}", path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write image {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read image {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render thumbnail for {key}: {source}")]
    Thumbnail {
        key: String,
        #[source]
        source: ThumbnailError,
    },
}

/// A cached image with its bytes
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub data: Vec<u8>,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Index metadata for a cached image (no bytes)
#[derive(Debug, Clone, Serialize)]
pub struct EntryMetadata {
    pub key: String,
    pub file: String,
    pub path: PathBuf,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate cache statistics
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_images: usize,
    pub total_size: u64,
    pub max_entries: usize,
    pub max_bytes: u64,
}

/// Result of a cleanup pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted_files: Vec<String>,
    pub freed_space: u64,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    file: String,
    content_type: String,
    size: u64,
    created_at: DateTime<Utc>,
}

/// Content-addressed image cache
#[derive(Debug)]
pub struct ImageCache {
    root: PathBuf,
    images_dir: PathBuf,
    thumbs_dir: PathBuf,
    policy: RetentionPolicy,
    index: RwLock<HashMap<String, IndexEntry>>,
    fs_lock: tokio::sync::Mutex<()>,
}

/// Map a content type to the file extension used on disk
fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Map a file extension back to its canonical content type
fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("image/png"),
        "jpg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Write a blob and flush it to disk
async fn write_blob(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// Temporary sibling for an atomic write of `key`
fn temp_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()))
}

/// Best-effort removal; anything but an already-missing file is logged
async fn discard_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove temporary file {}: {}", path.display(), e);
        }
    }
}

impl ImageCache {
    /// Open (or create) a cache rooted at `root`
    ///
    /// Images live in `root/images`, thumbnails in `root/thumbs`. Existing
    /// files whose names parse as `<key>.<ext>` are indexed; leftover
    /// temporary files are removed.
    pub async fn open(root: impl Into<PathBuf>, policy: RetentionPolicy) -> Result<Self, CacheError> {
        let root = root.into();
        let images_dir = root.join("images");
        let thumbs_dir = root.join("thumbs");

        for dir in [&images_dir, &thumbs_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| CacheError::Init {
                    path: dir.clone(),
                    source,
                })?;
        }

        let cache = Self {
            root,
            images_dir,
            thumbs_dir,
            policy,
            index: RwLock::new(HashMap::new()),
            fs_lock: tokio::sync::Mutex::new(()),
        };
        let indexed = cache.rebuild_index().await?;
        let evicted = cache.enforce_capacity(None).await;

        info!(
            "Image cache opened at {} ({} entries, {} evicted)",
            cache.images_dir.display(),
            indexed,
            evicted.deleted_files.len()
        );
        Ok(cache)
    }

    async fn rebuild_index(&self) -> Result<usize, CacheError> {
        let init_err = |source| CacheError::Init {
            path: self.images_dir.clone(),
            source,
        };
        let mut dir = tokio::fs::read_dir(&self.images_dir).await.map_err(init_err)?;
        let mut entries = HashMap::new();

        while let Some(dirent) = dir.next_entry().await.map_err(init_err)? {
            let file = dirent.file_name().to_string_lossy().into_owned();

            if file.starts_with('.') && file.ends_with(".tmp") {
                debug!("Removing interrupted write {}", file);
                discard_file(&dirent.path()).await;
                continue;
            }

            let Some((key, ext)) = file.rsplit_once('.') else {
                continue;
            };
            let Some(content_type) = content_type_for(ext) else {
                continue;
            };
            if validate_key(key).is_err() {
                continue;
            }

            let metadata = match dirent.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let created_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            entries.insert(
                key.to_string(),
                IndexEntry {
                    file: file.clone(),
                    content_type: content_type.to_string(),
                    size: metadata.len(),
                    created_at,
                },
            );
        }

        self.prune_thumbnails(&entries).await;
        let count = entries.len();
        *self.index.write() = entries;
        Ok(count)
    }

    /// Remove thumbnails without a source image and interrupted renders
    async fn prune_thumbnails(&self, entries: &HashMap<String, IndexEntry>) {
        let mut dir = match tokio::fs::read_dir(&self.thumbs_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot scan thumbnails in {}: {}", self.thumbs_dir.display(), e);
                return;
            }
        };

        while let Ok(Some(dirent)) = dir.next_entry().await {
            let file = dirent.file_name().to_string_lossy().into_owned();
            let orphaned = match file.strip_suffix(".png") {
                Some(key) => !entries.contains_key(key),
                None => file.ends_with(".tmp"),
            };
            if orphaned {
                debug!("Removing orphaned thumbnail {}", file);
                discard_file(&dirent.path()).await;
            }
        }
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one file per key
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Directory holding rendered thumbnails
    pub fn thumbs_dir(&self) -> &Path {
        &self.thumbs_dir
    }

    fn thumbnail_path(&self, key: &str) -> PathBuf {
        self.thumbs_dir.join(format!("{}.png", key))
    }

    /// Retention limits in force
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Store an image and return its key
    ///
    /// The blob is written to a temporary file, synced, and renamed into
    /// place before the key is published in the index. Storing bytes that are
    /// already cached returns the existing key without writing, unless the
    /// indexed file has gone missing, in which case it is written again.
    pub async fn put(&self, data: &[u8], content_type: &str) -> Result<String, CacheError> {
        if data.is_empty() {
            return Err(CacheError::EmptyBlob);
        }
        let size = data.len() as u64;
        if size > self.policy.max_bytes {
            return Err(CacheError::TooLarge {
                size,
                max: self.policy.max_bytes,
            });
        }
        let ext = extension_for(content_type)
            .ok_or_else(|| CacheError::UnsupportedContentType(content_type.to_string()))?;

        let key = compute_key(data);
        if let Some(existing) = self.metadata(&key) {
            let _published = self.fs_lock.lock().await;
            if tokio::fs::try_exists(&existing.path).await.unwrap_or(false) {
                debug!("Image {} already cached", key);
                return Ok(key);
            }
            warn!("Indexed image {} missing from disk, writing it again", key);
        }

        let file = format!("{}.{}", key, ext);
        let path = self.images_dir.join(&file);
        let tmp_path = temp_path(&self.images_dir, &key);

        if let Err(source) = write_blob(&tmp_path, data).await {
            discard_file(&tmp_path).await;
            return Err(CacheError::Write { key, source });
        }

        {
            let _published = self.fs_lock.lock().await;
            if let Err(source) = tokio::fs::rename(&tmp_path, &path).await {
                discard_file(&tmp_path).await;
                return Err(CacheError::Write { key, source });
            }
            self.index.write().insert(
                key.clone(),
                IndexEntry {
                    file,
                    content_type: content_type_for(ext).unwrap_or("image/png").to_string(),
                    size,
                    created_at: Utc::now(),
                },
            );
        }
        debug!("Stored image with key {} ({} bytes)", key, size);

        self.enforce_capacity(Some(&key)).await;
        Ok(key)
    }

    /// Get an image by key
    ///
    /// Malformed keys and keys not in the index return `Ok(None)` without
    /// touching the filesystem. An indexed key whose file has vanished is
    /// dropped from the index.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(meta) = self.metadata(key) else {
            return Ok(None);
        };

        match tokio::fs::read(&meta.path).await {
            Ok(data) => Ok(Some(CacheEntry {
                key: meta.key,
                data,
                content_type: meta.content_type,
                size: meta.size,
                created_at: meta.created_at,
                path: meta.path,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.forget_missing(&meta).await;
                Ok(None)
            }
            Err(source) => Err(CacheError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Index metadata for a key whose file is confirmed on disk
    ///
    /// Like `get` this drops stale index entries, but never reads the blob.
    pub async fn locate(&self, key: &str) -> Result<Option<EntryMetadata>, CacheError> {
        let Some(meta) = self.metadata(key) else {
            return Ok(None);
        };

        match tokio::fs::metadata(&meta.path).await {
            Ok(m) if m.is_file() => Ok(Some(meta)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.forget_missing(&meta).await;
                Ok(None)
            }
            Err(source) => Err(CacheError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Drop an index entry whose file is gone
    ///
    /// Re-checked under `fs_lock`: a concurrent `put` may have published the
    /// file again in the meantime.
    async fn forget_missing(&self, meta: &EntryMetadata) {
        let _published = self.fs_lock.lock().await;
        if tokio::fs::try_exists(&meta.path).await.unwrap_or(false) {
            return;
        }
        let mut index = self.index.write();
        if index.get(&meta.key).is_some_and(|e| e.file == meta.file) {
            warn!("Indexed image {} missing from disk, dropping it", meta.key);
            index.remove(&meta.key);
        }
    }

    /// Thumbnail of a cached image, rendered on first request
    ///
    /// Returns `Ok(None)` for keys not in the cache. Rendered thumbnails are
    /// PNG and live beside the images until their source is removed.
    pub async fn thumbnail(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(meta) = self.metadata(key) else {
            return Ok(None);
        };
        let path = self.thumbnail_path(key);

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let Some(source) = self.get(key).await? else {
                    return Ok(None);
                };
                let data = thumbnail::render(source.data)
                    .await
                    .map_err(|source| CacheError::Thumbnail {
                        key: key.to_string(),
                        source,
                    })?;
                self.store_thumbnail(key, &path, &data).await?;
                data
            }
            Err(source) => {
                return Err(CacheError::Read {
                    key: key.to_string(),
                    source,
                })
            }
        };

        Ok(Some(CacheEntry {
            key: meta.key,
            size: data.len() as u64,
            data,
            content_type: "image/png".to_string(),
            created_at: meta.created_at,
            path,
        }))
    }

    /// Publish a rendered thumbnail, unless its source was evicted meanwhile
    async fn store_thumbnail(&self, key: &str, path: &Path, data: &[u8]) -> Result<(), CacheError> {
        let tmp_path = temp_path(&self.thumbs_dir, key);
        if let Err(source) = write_blob(&tmp_path, data).await {
            discard_file(&tmp_path).await;
            return Err(CacheError::Write {
                key: key.to_string(),
                source,
            });
        }

        let _published = self.fs_lock.lock().await;
        if !self.index.read().contains_key(key) {
            discard_file(&tmp_path).await;
            return Ok(());
        }
        if let Err(source) = tokio::fs::rename(&tmp_path, path).await {
            discard_file(&tmp_path).await;
            return Err(CacheError::Write {
                key: key.to_string(),
                source,
            });
        }
        debug!("Stored thumbnail for {} ({} bytes)", key, data.len());
        Ok(())
    }

    /// Check if an image exists without reading it
    pub fn exists(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.index.read().contains_key(key)
    }

    /// Index metadata for one key
    pub fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        validate_key(key).ok()?;
        let index = self.index.read();
        let entry = index.get(key)?;
        Some(EntryMetadata {
            key: key.to_string(),
            file: entry.file.clone(),
            path: self.images_dir.join(&entry.file),
            content_type: entry.content_type.clone(),
            size: entry.size,
            created_at: entry.created_at,
        })
    }

    /// Snapshot of all entries, newest first
    pub fn list(&self) -> Vec<EntryMetadata> {
        let mut listing: Vec<EntryMetadata> = self
            .index
            .read()
            .iter()
            .map(|(key, entry)| EntryMetadata {
                key: key.clone(),
                file: entry.file.clone(),
                path: self.images_dir.join(&entry.file),
                content_type: entry.content_type.clone(),
                size: entry.size,
                created_at: entry.created_at,
            })
            .collect();
        listing.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.key.cmp(&b.key)));
        listing
    }

    /// Aggregate statistics
    pub fn stats(&self) -> CacheStats {
        let index = self.index.read();
        CacheStats {
            total_images: index.len(),
            total_size: index.values().map(|e| e.size).sum(),
            max_entries: self.policy.max_entries,
            max_bytes: self.policy.max_bytes,
        }
    }

    /// Remove entries created more than `max_age` ago
    pub async fn cleanup(&self, max_age: Duration) -> CleanupReport {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return CleanupReport::default();
        };

        let victims: Vec<(String, IndexEntry)> = {
            let mut index = self.index.write();
            let expired: Vec<String> = index
                .iter()
                .filter(|(_, e)| e.created_at <= cutoff)
                .map(|(k, _)| k.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|k| index.remove(&k).map(|e| (k, e)))
                .collect()
        };

        let report = self.remove_files(victims).await;
        if !report.deleted_files.is_empty() {
            info!(
                "Cache cleanup removed {} images ({} bytes)",
                report.deleted_files.len(),
                report.freed_space
            );
        }
        report
    }

    /// Apply the TTL from the retention policy, if any
    pub async fn expire(&self) -> CleanupReport {
        match self.policy.ttl {
            Some(ttl) => self.cleanup(ttl).await,
            None => CleanupReport::default(),
        }
    }

    /// Evict oldest entries until the cache fits its limits
    ///
    /// `keep` is never evicted.
    async fn enforce_capacity(&self, keep: Option<&str>) -> CleanupReport {
        let victims: Vec<(String, IndexEntry)> = {
            let mut index = self.index.write();
            let mut total: u64 = index.values().map(|e| e.size).sum();
            if index.len() <= self.policy.max_entries && total <= self.policy.max_bytes {
                return CleanupReport::default();
            }

            let mut oldest: Vec<(DateTime<Utc>, String)> = index
                .iter()
                .filter(|(k, _)| Some(k.as_str()) != keep)
                .map(|(k, e)| (e.created_at, k.clone()))
                .collect();
            oldest.sort();

            let mut victims = Vec::new();
            for (_, key) in oldest {
                if index.len() <= self.policy.max_entries && total <= self.policy.max_bytes {
                    break;
                }
                if let Some(entry) = index.remove(&key) {
                    total -= entry.size;
                    victims.push((key, entry));
                }
            }
            victims
        };

        let report = self.remove_files(victims).await;
        if !report.deleted_files.is_empty() {
            debug!("Evicted {} images over capacity", report.deleted_files.len());
        }
        report
    }

    /// Unlink files whose index entries were already removed
    ///
    /// A key that was published again since it was picked keeps its files.
    async fn remove_files(&self, victims: Vec<(String, IndexEntry)>) -> CleanupReport {
        let mut report = CleanupReport::default();
        if victims.is_empty() {
            return report;
        }

        let _published = self.fs_lock.lock().await;
        for (key, entry) in victims {
            if self.index.read().contains_key(&key) {
                debug!("Image {} was stored again, keeping its file", key);
                continue;
            }
            match tokio::fs::remove_file(self.images_dir.join(&entry.file)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete cached image {}: {}", key, e),
            }
            match tokio::fs::remove_file(self.thumbnail_path(&key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete thumbnail {}: {}", key, e),
            }
            report.freed_space += entry.size;
            report.deleted_files.push(entry.file);
        }
        report
    }
}
