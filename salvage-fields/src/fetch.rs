//! Fetching legacy files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use salvage_core::UrlParts;
use thiserror::Error;

use crate::storage::FileStorage;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot fetch '{0}'")]
    Unsupported(String),
}

/// Something that can retrieve a legacy file's bytes.
pub trait FileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetch `url`, trying up to `max_retries` times before giving up with the
/// last error.
pub fn fetch_with_retries(
    fetcher: &dyn FileFetcher,
    url: &str,
    max_retries: u32,
) -> Result<Vec<u8>, FetchError> {
    let attempts = max_retries.max(1);
    let mut attempt = 1;
    loop {
        match fetcher.fetch(url) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < attempts => {
                log::warn!("Fetching '{}' failed (attempt {}/{}): {}", url, attempt, attempts, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Downloads files over HTTP(S).
pub struct HttpFetcher {
    http: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http })
    }
}

impl FileFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parts = UrlParts::parse(url);
        if parts.is_relative() || !parts.has_web_scheme() {
            return Err(FetchError::Unsupported(url.to_string()));
        }
        let resp = self.http.get(url).send()?.error_for_status()?;
        Ok(resp.bytes()?.to_vec())
    }
}

/// Reads files from a local copy of the legacy media tree. The URL's path
/// is resolved below `root`; its host is ignored.
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileFetcher for LocalFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parts = UrlParts::parse(url);
        let relative = parts.path.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|c| c == "..") {
            return Err(FetchError::Unsupported(url.to_string()));
        }
        Ok(std::fs::read(self.root.join(relative))?)
    }
}

/// The fetcher and storage file fields work with.
pub struct FileServices {
    pub fetcher: Box<dyn FileFetcher>,
    pub storage: Box<dyn FileStorage>,
}

impl FileServices {
    pub fn new(fetcher: impl FileFetcher + 'static, storage: impl FileStorage + 'static) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            storage: Box::new(storage),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Flaky {
        failures: Cell<u32>,
    }

    impl FileFetcher for Flaky {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(FetchError::Unsupported(url.to_string()));
            }
            Ok(b"ok".to_vec())
        }
    }

    #[test]
    fn retries_until_success() {
        let flaky = Flaky { failures: Cell::new(2) };
        assert_eq!(fetch_with_retries(&flaky, "x", 3).unwrap(), b"ok");

        let flaky = Flaky { failures: Cell::new(3) };
        assert!(fetch_with_retries(&flaky, "x", 3).is_err());
    }

    #[test]
    fn local_fetcher_reads_below_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("files")).unwrap();
        std::fs::write(dir.path().join("files/a.txt"), b"hello").unwrap();

        let fetcher = LocalFetcher::new(dir.path());
        assert_eq!(
            fetcher.fetch("http://media.example.com/files/a.txt").unwrap(),
            b"hello"
        );
        assert_eq!(fetcher.fetch("/files/a.txt").unwrap(), b"hello");
        assert!(fetcher.fetch("/files/../../etc/passwd").is_err());
        assert!(fetcher.fetch("/files/missing.txt").is_err());
    }
}
