use async_trait::async_trait;
use crew_core::{traits::SnapshotStore, Error, Result};
use std::path::{Path, PathBuf};

/// Snapshot storage as one JSON document per agent in a directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write never leaves a truncated snapshot behind.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create a new file-based snapshot store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::storage(format!(
                "'{}' is not a valid snapshot name",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, name: &str, document: &str) -> Result<()> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::storage(format!("Failed to create snapshot directory: {}", e))
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, document)
            .await
            .map_err(|e| Error::storage(format!("Failed to write snapshot file: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::storage(format!("Failed to replace snapshot file: {}", e)))?;
        tracing::debug!(agent = %name, path = %path.display(), "Snapshot written");
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(format!(
                "Failed to read snapshot file: {}",
                e
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::storage(format!(
                    "Failed to list snapshot directory: {}",
                    e
                )))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage(format!("Failed to list snapshot directory: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(format!(
                "Failed to delete snapshot file: {}",
                e
            ))),
        }
    }
}
