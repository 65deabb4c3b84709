//! Placeholder thumbnails for items without a live resource
//!
//! The thumbnail service writes poster frames to disk and registers them here;
//! the grid only ever reads. [`ThumbnailCache`] is the shared store,
//! [`ThumbnailBinder`] is the read-only lookup handed to the grid engine.
//!
//! On-disk layout is content-sharded by the first two characters of the id:
//!
//! ```text
//! <cache dir>/3f/3fa9c0...e1.jpg
//! <cache dir>/a0/a07b11...42.webp
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

/// File extensions recognised as thumbnails
pub const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("thumbnail directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Handle to a placeholder image the host can display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailHandle {
    /// Location of the encoded image
    pub path: PathBuf,

    /// Encoded size in bytes
    pub byte_size: u64,
}

impl ThumbnailHandle {
    pub fn new(path: impl Into<PathBuf>, byte_size: u64) -> Self {
        Self { path: path.into(), byte_size }
    }
}

/// Lookup statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThumbnailStats {
    /// Number of registered thumbnails
    pub entries: usize,

    /// Lookups that found a thumbnail
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, ThumbnailHandle>,
    stats: ThumbnailStats,
}

/// Shared id → thumbnail map populated by the thumbnail service
///
/// Cloning is cheap; all clones see the same entries.
///
/// # Example
///
/// ```
/// use clipgrid_cache::{ThumbnailCache, ThumbnailHandle};
///
/// let cache = ThumbnailCache::new();
/// cache.insert("a1b2", ThumbnailHandle::new("/tmp/a1/a1b2.jpg", 2048));
///
/// let binder = cache.binder();
/// assert!(binder.placeholder_for("a1b2").is_some());
/// assert!(binder.placeholder_for("missing").is_none());
/// ```
#[derive(Clone, Default)]
pub struct ThumbnailCache {
    state: Arc<Mutex<CacheState>>,
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default on-disk location used by the thumbnail service.
    ///
    /// - macOS: ~/Library/Caches/clipgrid/thumbnails
    /// - Linux: ~/.cache/clipgrid/thumbnails
    /// - Windows: %LOCALAPPDATA%\clipgrid\thumbnails
    pub fn default_cache_dir() -> PathBuf {
        match dirs::cache_dir() {
            Some(dir) => dir.join("clipgrid").join("thumbnails"),
            None => PathBuf::from("cache/thumbnails"),
        }
    }

    /// Sharded path for a thumbnail of `id` with the given extension
    pub fn shard_path(dir: &Path, id: &str, extension: &str) -> PathBuf {
        let shard = id.get(..2).unwrap_or(id);
        dir.join(shard).join(format!("{id}.{extension}"))
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register or replace the thumbnail for `id`
    pub fn insert(&self, id: impl Into<String>, handle: ThumbnailHandle) {
        let mut state = self.lock();
        state.entries.insert(id.into(), handle);
        state.stats.entries = state.entries.len();
    }

    /// Forget the thumbnail for `id`
    pub fn remove(&self, id: &str) -> Option<ThumbnailHandle> {
        let mut state = self.lock();
        let removed = state.entries.remove(id);
        state.stats.entries = state.entries.len();
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Look up `id`, recording a hit or miss
    pub fn get(&self, id: &str) -> Option<ThumbnailHandle> {
        let mut state = self.lock();
        match state.entries.get(id).cloned() {
            Some(handle) => {
                state.stats.hits += 1;
                Some(handle)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.stats.entries = 0;
    }

    pub fn stats(&self) -> ThumbnailStats {
        self.lock().stats
    }

    /// Index every thumbnail found under `dir`.
    ///
    /// Both sharded (`<dir>/<xx>/<id>.<ext>`) and flat (`<dir>/<id>.<ext>`)
    /// files are picked up. Empty files are skipped, as are files with an
    /// unknown extension. Returns the number of thumbnails registered.
    pub fn scan_dir(&self, dir: &Path) -> Result<usize, ThumbnailError> {
        if !dir.is_dir() {
            return Err(ThumbnailError::MissingDirectory(dir.to_path_buf()));
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                for sub in fs::read_dir(&path)? {
                    collect_thumbnail(sub?.path(), &mut found)?;
                }
            } else {
                collect_thumbnail(path, &mut found)?;
            }
        }

        let count = found.len();
        let mut state = self.lock();
        for (id, handle) in found {
            state.entries.insert(id, handle);
        }
        state.stats.entries = state.entries.len();
        drop(state);

        info!(dir = %dir.display(), count, "indexed thumbnail directory");
        Ok(count)
    }

    /// Read-only view for the grid engine
    pub fn binder(&self) -> ThumbnailBinder {
        ThumbnailBinder { cache: self.clone() }
    }
}

fn collect_thumbnail(
    path: PathBuf,
    found: &mut Vec<(String, ThumbnailHandle)>,
) -> Result<(), ThumbnailError> {
    if !path.is_file() {
        return Ok(());
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    let Some(extension) = extension else {
        return Ok(());
    };
    if !THUMBNAIL_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(());
    }
    let Some(id) = path.file_stem().and_then(|stem| stem.to_str()).map(str::to_owned) else {
        return Ok(());
    };

    let byte_size = fs::metadata(&path)?.len();
    if byte_size == 0 {
        debug!(path = %path.display(), "skipping empty thumbnail");
        return Ok(());
    }

    found.push((id, ThumbnailHandle::new(path, byte_size)));
    Ok(())
}

/// Read-only placeholder lookup
#[derive(Clone)]
pub struct ThumbnailBinder {
    cache: ThumbnailCache,
}

impl ThumbnailBinder {
    /// Placeholder image for `id`, or `None` when the thumbnail service has
    /// not produced one yet. The caller shows a neutral placeholder then.
    pub fn placeholder_for(&self, id: &str) -> Option<ThumbnailHandle> {
        self.cache.get(id)
    }

    pub fn stats(&self) -> ThumbnailStats {
        self.cache.stats()
    }
}
