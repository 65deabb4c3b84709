//! Item records
//!
//! One [`ItemRecord`] per clip, replaced wholesale on rescan and patched in
//! place when the metadata store reports an annotation change.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Highest accepted star rating
pub const MAX_RATING: u8 = 5;

/// Stable item identifier
///
/// Derived from the full path, size and modification time, so a rescan of
/// the same file yields the same id while same-named files in different
/// folders stay distinct.
///
/// # Example
///
/// ```
/// use clipgrid_core::ItemId;
///
/// let a = ItemId::derive("/videos/beach.mp4", 1_048_576, 1_700_000_000_000);
/// let b = ItemId::derive("/videos/beach.mp4", 1_048_576, 1_700_000_000_000);
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 32);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id of a file from its path, size and mtime (milliseconds)
    pub fn derive(path: &str, size: u64, mtime_ms: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(size.to_le_bytes());
        hasher.update(mtime_ms.to_le_bytes());
        let digest = hasher.finalize();

        let hex = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ItemId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One clip in the collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemRecord {
    pub id: ItemId,

    /// Display name (file name)
    pub name: String,

    pub path: String,

    /// Containing folder; `None` for items at the collection root
    pub folder: Option<String>,

    /// File size in bytes
    pub size: u64,

    /// Modification time, milliseconds since the Unix epoch
    pub mtime: u64,

    /// Duration in seconds
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,

    /// Bits per second
    pub bitrate: Option<u32>,

    pub favorite: bool,
    pub hidden: bool,

    /// 0 to [`MAX_RATING`]
    pub rating: u8,

    pub tags: BTreeSet<String>,
}

impl ItemRecord {
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build a record for a scanned file, deriving id, name and folder from
    /// the path.
    pub fn from_file(path: impl AsRef<Path>, size: u64, mtime: u64) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let folder = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());

        let path = path.to_string_lossy().into_owned();
        Self {
            id: ItemId::derive(&path, size, mtime),
            name,
            path,
            folder,
            size,
            mtime,
            ..Self::default()
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Apply an annotation change. Returns `true` if anything changed.
    pub fn apply(&mut self, patch: &AnnotationPatch) -> bool {
        let before = (self.favorite, self.hidden, self.rating, self.tags.clone());

        if let Some(favorite) = patch.favorite {
            self.favorite = favorite;
        }
        if let Some(hidden) = patch.hidden {
            self.hidden = hidden;
        }
        if let Some(rating) = patch.rating {
            self.rating = clamp_rating(&self.id, rating);
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }

        before != (self.favorite, self.hidden, self.rating, self.tags.clone())
    }
}

/// Clamp an out-of-range rating, logging the correction
pub(crate) fn clamp_rating(id: &ItemId, rating: u8) -> u8 {
    if rating > MAX_RATING {
        warn!(id = %id, rating, max = MAX_RATING, "rating out of range, clamped");
        MAX_RATING
    } else {
        rating
    }
}

/// Annotation change mirrored from the metadata store
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationPatch {
    pub favorite: Option<bool>,
    pub hidden: Option<bool>,
    pub rating: Option<u8>,

    /// Replaces the whole tag set
    pub tags: Option<BTreeSet<String>>,
}

impl AnnotationPatch {
    pub fn favorite(favorite: bool) -> Self {
        Self {
            favorite: Some(favorite),
            ..Self::default()
        }
    }

    pub fn hidden(hidden: bool) -> Self {
        Self {
            hidden: Some(hidden),
            ..Self::default()
        }
    }

    pub fn rating(rating: u8) -> Self {
        Self {
            rating: Some(rating),
            ..Self::default()
        }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: Some(tags.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.favorite.is_none()
            && self.hidden.is_none()
            && self.rating.is_none()
            && self.tags.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_id_is_stable_and_hex() {
        let id = ItemId::derive("/v/clip.mov", 42, 1_000);
        assert_eq!(id, ItemId::derive("/v/clip.mov", 42, 1_000));
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_derived_id_changes_with_inputs() {
        let base = ItemId::derive("/v/clip.mov", 42, 1_000);
        assert_ne!(base, ItemId::derive("/v/clip.mov", 42, 1_001));
        assert_ne!(base, ItemId::derive("/v/clip.mov", 43, 1_000));
        assert_ne!(base, ItemId::derive("/v/clip2.mov", 42, 1_000));
    }

    #[test]
    fn test_from_file() {
        let record = ItemRecord::from_file("/videos/holiday/beach.mp4", 2048, 77);
        assert_eq!(record.name, "beach.mp4");
        assert_eq!(record.folder.as_deref(), Some("holiday"));
        assert_eq!(record.path, "/videos/holiday/beach.mp4");
        assert_eq!(record.id, ItemId::derive("/videos/holiday/beach.mp4", 2048, 77));
        assert_eq!(record.size, 2048);
    }

    #[test]
    fn test_same_name_in_different_folders_gets_distinct_ids() {
        let trip = ItemRecord::from_file("/videos/trip/clip.mp4", 1000, 42);
        let work = ItemRecord::from_file("/videos/work/clip.mp4", 1000, 42);
        assert_eq!(trip.name, work.name);
        assert_ne!(trip.id, work.id);
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: ItemRecord =
            serde_json::from_str(r#"{"id":"a","name":"a.mp4","tags":["x","y"]}"#).unwrap();
        assert_eq!(record.id.as_str(), "a");
        assert!(!record.favorite);
        assert_eq!(record.rating, 0);
        assert!(record.tags.contains("x"));
        assert_eq!(record.folder, None);
    }

    #[test]
    fn test_apply_patch() {
        let mut record = ItemRecord::new("a", "a.mp4");

        assert!(record.apply(&AnnotationPatch::favorite(true)));
        assert!(record.favorite);
        assert!(!record.apply(&AnnotationPatch::favorite(true)));

        record.apply(&AnnotationPatch::tags(["red", "blue"]));
        assert_eq!(record.tags.len(), 2);

        assert!(!record.apply(&AnnotationPatch::default()));
        assert!(AnnotationPatch::default().is_empty());
    }

    #[test]
    fn test_patch_rating_is_clamped() {
        let mut record = ItemRecord::new("a", "a.mp4");
        record.apply(&AnnotationPatch::rating(9));
        assert_eq!(record.rating, MAX_RATING);
    }

    #[test]
    fn test_id_display_and_borrow() {
        let id = ItemId::from("abc");
        assert_eq!(id.to_string(), "abc");

        let set: std::collections::HashSet<ItemId> = [id].into_iter().collect();
        assert!(set.contains("abc"));
        assert!(ItemId::new("  ").is_empty());
    }
}
