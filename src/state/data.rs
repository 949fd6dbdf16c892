//! Shared data structures for the application state
//!
//! These structs represent the data model that flows between
//! the database layer and the UI layer.
use std::path::{Path, PathBuf};

use crate::art::{ArtSource, CacheKey};
use crate::ui::viewport::GridItem;

/// One grid cell: all tracks sharing a folder
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    /// Folder path, also the cover art cache key
    pub folder: String,
    /// Folder name
    pub title: String,
    /// Parent folder name, the usual Artist/Album layout
    pub artist: String,
    pub track_count: i64,
}

impl Album {
    pub fn from_folder(folder: String, track_count: i64) -> Self {
        let path = Path::new(&folder);
        let title = file_name(path).unwrap_or_else(|| folder.clone());
        let artist = path.parent().and_then(file_name).unwrap_or_default();
        Self {
            folder,
            title,
            artist,
            track_count,
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::from(self.folder.as_str())
    }

    pub fn art_source(&self) -> ArtSource {
        ArtSource::Folder(PathBuf::from(&self.folder))
    }

    pub fn grid_item(&self) -> GridItem {
        GridItem {
            key: self.key(),
            source: self.art_source(),
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
