//! Single-slot crash marker.
//!
//! Before risky per-item work the session writes the submission's identity
//! to `crash_cache.txt`; after the item completes the file is removed. A
//! marker found at start-up therefore names the submission the previous
//! process died on.
//!
//! # Examples
//! ```
//! use community_render::crash::CrashMarker;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let marker = CrashMarker::new(dir.path().join("crash_cache.txt"));
//! marker.arm("donut.glb").unwrap();
//! assert_eq!(marker.take().unwrap().as_deref(), Some("donut.glb"));
//! assert_eq!(marker.take().unwrap(), None);
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct CrashMarker {
    path: PathBuf,
}

impl CrashMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `identity` as in flight, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the marker cannot be written.
    pub fn arm(&self, identity: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, identity)?;
        tracing::trace!(identity, "Crash marker armed");
        Ok(())
    }

    /// Removes the marker. Missing markers are fine.
    ///
    /// # Errors
    /// Returns an error if an existing marker cannot be removed.
    pub fn disarm(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the identity without removing the marker.
    ///
    /// # Errors
    /// Returns an error if an existing marker cannot be read.
    pub fn peek(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let identity = text.trim();
                Ok((!identity.is_empty()).then(|| identity.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads and removes the marker.
    ///
    /// # Errors
    /// Returns an error if the marker cannot be read or removed.
    pub fn take(&self) -> Result<Option<String>> {
        let identity = self.peek()?;
        self.disarm()?;
        Ok(identity)
    }
}
