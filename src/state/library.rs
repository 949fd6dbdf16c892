use rusqlite::{Connection, Result as SqlResult};
use std::path::{Path, PathBuf};

use super::data::Album;

/// The Library manages the SQLite music catalog.
/// It stores one row per audio file; albums are derived by grouping on folder.
pub struct Library {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl Library {
    /// Open (or create) the catalog at `db_path` and initialize the schema.
    /// The parent directory must already exist.
    pub fn open(db_path: &Path) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        log::info!("Database opened at {}", db_path.display());

        let mut library = Library {
            conn,
            db_path: Some(db_path.to_path_buf()),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// A throwaway catalog, used by tests
    pub fn open_in_memory() -> SqlResult<Self> {
        let mut library = Library {
            conn: Connection::open_in_memory()?,
            db_path: None,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Where the catalog normally lives:
    /// - Linux: ~/.local/share/album-grid/library.db
    /// - macOS: ~/Library/Application Support/album-grid/library.db
    /// - Windows: %APPDATA%\album-grid\library.db
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("album-grid");
        path.push("library.db");
        Some(path)
    }

    /// Initialize the database schema.
    /// Creates all necessary tables and indexes if they don't exist.
    pub fn init_schema(&mut self) -> SqlResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tracks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                path            TEXT NOT NULL UNIQUE,
                folder          TEXT NOT NULL,
                filename        TEXT NOT NULL,
                imported_at     INTEGER NOT NULL
            )",
            [],
        )?;

        // Album grouping scans by folder
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tracks_folder
             ON tracks(folder)",
            [],
        )?;

        log::debug!("Database schema initialized");
        Ok(())
    }

    /// Get the path to the database file (None for in-memory catalogs)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Get a count of tracks in the library
    pub fn track_count(&self) -> SqlResult<i64> {
        self.conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))
    }

    /// Add a track. Fails with a constraint violation if the path is
    /// already in the catalog.
    pub fn insert_track(
        &self,
        path: &str,
        folder: &str,
        filename: &str,
        imported_at: i64,
    ) -> SqlResult<i64> {
        self.conn.execute(
            "INSERT INTO tracks (path, folder, filename, imported_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![path, folder, filename, imported_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Albums (folders with at least one track), sorted by artist then title
    pub fn albums(&self) -> SqlResult<Vec<Album>> {
        let mut stmt = self.conn.prepare(
            "SELECT folder, COUNT(*) FROM tracks GROUP BY folder",
        )?;

        let mut albums = stmt
            .query_map([], |row| Ok(Album::from_folder(row.get(0)?, row.get(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;

        albums.sort_by_cached_key(|a| (a.artist.to_lowercase(), a.title.to_lowercase()));
        Ok(albums)
    }

    /// Drop tracks whose audio file is gone from disk, so their albums
    /// leave the grid. Returns how many were removed.
    pub fn remove_missing(&self) -> SqlResult<usize> {
        let mut stmt = self.conn.prepare("SELECT id, path FROM tracks")?;

        let existing: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut removed = 0;
        for (id, file_path) in existing {
            if !Path::new(&file_path).exists() {
                removed += self
                    .conn
                    .execute("DELETE FROM tracks WHERE id = ?1", rusqlite::params![id])?;
            }
        }

        if removed > 0 {
            log::info!("Removed {} tracks whose files are missing", removed);
        }
        Ok(removed)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("db_path", &self.db_path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ErrorCode;

    #[test]
    fn test_albums_group_by_folder() {
        let library = Library::open_in_memory().unwrap();
        library.insert_track("/m/B/Second/01.mp3", "/m/B/Second", "01.mp3", 1).unwrap();
        library.insert_track("/m/A/First/01.flac", "/m/A/First", "01.flac", 1).unwrap();
        library.insert_track("/m/A/First/02.flac", "/m/A/First", "02.flac", 1).unwrap();

        let albums = library.albums().unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].title, "First");
        assert_eq!(albums[0].track_count, 2);
        assert_eq!(albums[1].artist, "B");
        assert_eq!(library.track_count().unwrap(), 3);
    }

    #[test]
    fn test_init_schema_is_repeatable() {
        let mut library = Library::open_in_memory().unwrap();
        library.insert_track("/m/a.mp3", "/m", "a.mp3", 1).unwrap();
        library.init_schema().unwrap();
        assert_eq!(library.track_count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_path_is_a_constraint_violation() {
        let library = Library::open_in_memory().unwrap();
        library.insert_track("/m/a.mp3", "/m", "a.mp3", 1).unwrap();

        match library.insert_track("/m/a.mp3", "/m", "a.mp3", 2) {
            Err(rusqlite::Error::SqliteFailure(err, _)) => {
                assert_eq!(err.code, ErrorCode::ConstraintViolation)
            }
            other => panic!("expected constraint violation, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_missing_drops_deleted_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.mp3");
        std::fs::write(&present, b"audio").unwrap();
        let folder = dir.path().to_string_lossy().to_string();

        let library = Library::open_in_memory().unwrap();
        library
            .insert_track(&present.to_string_lossy(), &folder, "present.mp3", 1)
            .unwrap();
        let gone = dir.path().join("gone.mp3");
        library
            .insert_track(&gone.to_string_lossy(), "/elsewhere", "gone.mp3", 1)
            .unwrap();

        assert_eq!(library.remove_missing().unwrap(), 1);
        let albums = library.albums().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].folder, folder);
        assert_eq!(library.track_count().unwrap(), 1);

        // Nothing left to remove
        assert_eq!(library.remove_missing().unwrap(), 0);
    }
}
