//! Importing music folders into the catalog
use chrono::Utc;
use rusqlite::ErrorCode;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::library::Library;
use crate::art::resolver::AUDIO_EXTENSIONS;

/// Result of a folder import operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportResult {
    pub imported_count: usize,
    pub skipped_count: usize,
}

/// Async wrapper for [`import_folder`], run on the blocking pool so the UI
/// stays responsive.
pub async fn import_folder_async(
    folder_path: PathBuf,
    db_path: PathBuf,
) -> Result<ImportResult, String> {
    tokio::task::spawn_blocking(move || {
        // rusqlite::Connection is not Send, so the import opens its own
        let library =
            Library::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
        import_folder(&library, &folder_path).map_err(|e| format!("Import failed: {}", e))
    })
    .await
    .map_err(|e| format!("Task join error: {}", e))?
}

/// Add every audio file under `folder_path` to the library.
/// Files already in the catalog are counted as skipped.
pub fn import_folder(library: &Library, folder_path: &Path) -> rusqlite::Result<ImportResult> {
    let mut result = ImportResult::default();
    let now = Utc::now().timestamp();

    log::info!("Scanning folder: {}", folder_path.display());

    for entry in WalkDir::new(folder_path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_audio_file(path) {
            continue;
        }

        let path_str = path.to_string_lossy().to_string();
        let folder = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let filename = path.file_name().unwrap_or_default().to_string_lossy().to_string();

        match library.insert_track(&path_str, &folder, &filename, now) {
            Ok(_) => {
                result.imported_count += 1;
                if result.imported_count % 500 == 0 {
                    log::info!("Imported {} files...", result.imported_count);
                }
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                result.skipped_count += 1;
            }
            Err(e) => {
                log::warn!("Error importing {}: {}", filename, e);
            }
        }
    }

    log::info!(
        "Import complete: {} new, {} skipped",
        result.imported_count,
        result.skipped_count
    );
    Ok(result)
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn music_tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Artist").join("Album");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join("01.flac"), b"a").unwrap();
        fs::write(album.join("02.MP3"), b"b").unwrap();
        fs::write(album.join("cover.jpg"), b"c").unwrap();
        fs::write(dir.path().join("readme.txt"), b"d").unwrap();
        dir
    }

    #[test]
    fn test_import_skips_duplicates_and_non_audio() {
        let dir = music_tree();
        let library = Library::open_in_memory().unwrap();

        let first = import_folder(&library, dir.path()).unwrap();
        assert_eq!(first.imported_count, 2);
        assert_eq!(first.skipped_count, 0);

        let second = import_folder(&library, dir.path()).unwrap();
        assert_eq!(second.imported_count, 0);
        assert_eq!(second.skipped_count, 2);

        let albums = library.albums().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].title, "Album");
        assert_eq!(albums[0].artist, "Artist");
    }

    #[tokio::test]
    async fn test_import_async_uses_its_own_connection() {
        let dir = music_tree();
        let db_dir = tempdir().unwrap();
        let db_path = db_dir.path().join("library.db");
        Library::open(&db_path).unwrap();

        let result = import_folder_async(dir.path().to_path_buf(), db_path.clone()).await.unwrap();
        assert_eq!(result.imported_count, 2);
        assert_eq!(Library::open(&db_path).unwrap().track_count().unwrap(), 2);
    }
}
