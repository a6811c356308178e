//! Persisting cleaned files.

use std::io;
use std::path::{Path, PathBuf};

use salvage_core::storage_filename;

/// Where cleaned files end up.
pub trait FileStorage {
    /// Store `bytes` under a name derived from `name`, returning the name
    /// actually used (relative to the storage root).
    fn save(&self, name: &str, bytes: &[u8]) -> io::Result<String>;

    fn exists(&self, name: &str) -> bool;
}

/// Length of the disambiguation suffix appended to taken names.
pub const SUFFIX_LEN: usize = 7;

/// Stores files in a directory, optionally below a fixed sub-directory.
/// A taken name gets a `_xxxxxxx` suffix before its extension.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
    subdir: Option<String>,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            subdir: None,
        }
    }

    pub fn subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn relative(&self, filename: &str) -> String {
        match &self.subdir {
            Some(dir) => format!("{}/{}", dir.trim_matches('/'), filename),
            None => filename.to_string(),
        }
    }

    fn available_name(&self, filename: &str) -> String {
        let candidate = self.relative(filename);
        if !self.exists(&candidate) {
            return candidate;
        }
        let (stem, ext) = match filename.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{}", ext)),
            None => (filename, String::new()),
        };
        loop {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let candidate = self.relative(&format!("{}_{}{}", stem, &suffix[..SUFFIX_LEN], ext));
            if !self.exists(&candidate) {
                return candidate;
            }
        }
    }
}

impl FileStorage for DirectoryStorage {
    fn save(&self, name: &str, bytes: &[u8]) -> io::Result<String> {
        let mut filename = storage_filename(name.rsplit('/').next().unwrap_or_default());
        if filename.is_empty() || filename.starts_with('.') {
            filename = format!("file{}", filename);
        }
        let relative = self.available_name(&filename);
        let path = self.path(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write atomically
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;

        log::debug!("Stored {} bytes as {}", bytes.len(), relative);
        Ok(relative)
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taken_names_get_a_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path()).subdir("images");

        let first = storage.save("My Photo.jpg", b"one").unwrap();
        assert_eq!(first, "images/My_Photo.jpg");

        let second = storage.save("/legacy/My Photo.jpg", b"two").unwrap();
        assert_ne!(second, first);
        assert!(second.starts_with("images/My_Photo_"));
        assert!(second.ends_with(".jpg"));
        assert_eq!(second.len(), first.len() + 1 + SUFFIX_LEN);

        assert_eq!(std::fs::read(storage.path(&first)).unwrap(), b"one");
        assert_eq!(std::fs::read(storage.path(&second)).unwrap(), b"two");
    }
}
