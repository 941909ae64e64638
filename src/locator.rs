//! LibreOffice binary discovery.
//!
//! Discovery runs at most once per process unless explicitly refreshed. Both a
//! resolved path and "not found" are cached, so jobs never repeat the search.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Binary names searched for on `PATH`.
#[cfg(not(windows))]
const BINARY_NAMES: &[&str] = &["soffice", "libreoffice"];

/// Capability of resolving the converter binary.
#[cfg_attr(test, mockall::automock)]
pub trait LocateBinary: Send + Sync {
    /// Returns the converter binary, or `None` if it is not installed.
    fn locate(&self) -> Option<PathBuf>;
}

/// Process-wide cached lookup of the LibreOffice `soffice` binary.
pub struct ConverterLocator {
    explicit: Option<PathBuf>,
    cached: RwLock<Option<Option<PathBuf>>>,
}

impl ConverterLocator {
    /// Creates a locator. An explicit path takes precedence over discovery.
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            cached: RwLock::new(None),
        }
    }

    /// Discards the cached result and searches again.
    pub fn refresh(&self) -> Option<PathBuf> {
        let found = self.discover();
        *self.cached.write() = Some(found.clone());
        found
    }

    fn discover(&self) -> Option<PathBuf> {
        if let Some(path) = &self.explicit {
            if path.is_file() {
                info!(path = %path.display(), "Using configured LibreOffice binary");
                return Some(path.clone());
            }
            warn!(path = %path.display(), "Configured LibreOffice binary does not exist");
        }

        let found = Self::discover_installed();
        match &found {
            Some(path) => info!(path = %path.display(), "Found LibreOffice binary"),
            None => warn!("LibreOffice binary not found"),
        }
        found
    }

    #[cfg(windows)]
    fn discover_installed() -> Option<PathBuf> {
        ["ProgramFiles", "ProgramFiles(x86)"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(|dir| {
                PathBuf::from(dir)
                    .join("LibreOffice")
                    .join("program")
                    .join("soffice.exe")
            })
            .find(|candidate| {
                debug!(candidate = %candidate.display(), "Checking LibreOffice install directory");
                candidate.is_file()
            })
    }

    #[cfg(not(windows))]
    fn discover_installed() -> Option<PathBuf> {
        let path_var = std::env::var_os("PATH")?;
        BINARY_NAMES.iter().find_map(|name| {
            std::env::split_paths(&path_var)
                .map(|dir| dir.join(name))
                .find(|candidate| Self::is_executable(candidate))
        })
    }

    #[cfg(unix)]
    fn is_executable(path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        debug!(candidate = %path.display(), "Checking PATH entry");
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(all(not(unix), not(windows)))]
    fn is_executable(path: &Path) -> bool {
        path.is_file()
    }
}

impl LocateBinary for ConverterLocator {
    fn locate(&self) -> Option<PathBuf> {
        if let Some(cached) = self.cached.read().as_ref() {
            return cached.clone();
        }

        let mut cached = self.cached.write();
        // Another job may have finished discovery while we waited.
        if let Some(found) = cached.as_ref() {
            return found.clone();
        }
        let found = self.discover();
        *cached = Some(found.clone());
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_binary_is_used() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("soffice");
        std::fs::write(&binary, b"").unwrap();

        let locator = ConverterLocator::new(Some(binary.clone()));
        assert_eq!(locator.locate(), Some(binary));
    }

    #[test]
    fn test_result_is_cached_until_refresh() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("soffice");
        std::fs::write(&binary, b"").unwrap();

        let locator = ConverterLocator::new(Some(binary.clone()));
        assert_eq!(locator.locate(), Some(binary.clone()));

        // Removing the file does not change the cached answer
        std::fs::remove_file(&binary).unwrap();
        assert_eq!(locator.locate(), Some(binary.clone()));

        // An explicit refresh falls through to discovery and no longer sees it
        assert_ne!(locator.refresh(), Some(binary.clone()));
        assert_ne!(locator.locate(), Some(binary));
    }

    #[test]
    fn test_missing_result_is_cached() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("soffice");

        let locator = ConverterLocator::new(Some(binary.clone()));
        let first = locator.locate();
        assert_ne!(first, Some(binary.clone()));

        // Appearing later is only noticed after a refresh
        std::fs::write(&binary, b"").unwrap();
        assert_eq!(locator.locate(), first);
        assert_eq!(locator.refresh(), Some(binary));
    }
}
