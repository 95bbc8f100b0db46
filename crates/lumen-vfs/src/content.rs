use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use lumen_core::{FileUri, Timestamp};

/// Provides source text and modification stamps for files.
///
/// The trait is intentionally small so it can be implemented for different
/// backends (local disk, editor overlays, test fixtures).
pub trait ContentProvider: Send + Sync {
    /// Fetch the current text of a file.
    fn fetch(&self, uri: &FileUri) -> io::Result<String>;

    /// The current last-modified stamp of a file.
    fn last_modified(&self, uri: &FileUri) -> io::Result<Timestamp>;
}

fn uri_to_path(uri: &FileUri) -> PathBuf {
    let raw = uri.as_str();
    let raw = raw.strip_prefix("file://").unwrap_or(raw);
    Path::new(raw).to_path_buf()
}

/// Reads straight from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl ContentProvider for LocalFs {
    fn fetch(&self, uri: &FileUri) -> io::Result<String> {
        std::fs::read_to_string(uri_to_path(uri))
    }

    fn last_modified(&self, uri: &FileUri) -> io::Result<Timestamp> {
        let meta = std::fs::metadata(uri_to_path(uri))?;
        Ok(meta
            .modified()
            .map(Timestamp::from_system_time)
            .unwrap_or(Timestamp::ZERO))
    }
}

/// An in-memory edited snapshot of an open document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub text: String,
    pub version: i32,
    pub last_modified: Timestamp,
}

/// Prefers in-memory snapshots over the underlying provider.
///
/// Editors push unsaved edits here; anything without a snapshot falls
/// through to the base provider.
pub struct OverlayFs {
    base: Arc<dyn ContentProvider>,
    snapshots: RwLock<HashMap<FileUri, DocumentSnapshot>>,
}

impl OverlayFs {
    pub fn new(base: Arc<dyn ContentProvider>) -> Self {
        Self {
            base,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(LocalFs))
    }

    /// Install or replace the in-memory snapshot for a document.
    pub fn set_snapshot(&self, uri: FileUri, text: impl Into<String>, version: i32) {
        let snapshot = DocumentSnapshot {
            text: text.into(),
            version,
            last_modified: Timestamp::now(),
        };
        tracing::debug!(target = "lumen.vfs", uri = %uri, version, "snapshot updated");
        self.snapshots.write().insert(uri, snapshot);
    }

    /// Drop the snapshot (document closed); disk content is authoritative
    /// again.
    pub fn remove_snapshot(&self, uri: &FileUri) {
        self.snapshots.write().remove(uri);
    }

    pub fn snapshot(&self, uri: &FileUri) -> Option<DocumentSnapshot> {
        self.snapshots.read().get(uri).cloned()
    }
}

impl ContentProvider for OverlayFs {
    fn fetch(&self, uri: &FileUri) -> io::Result<String> {
        if let Some(snapshot) = self.snapshots.read().get(uri) {
            return Ok(snapshot.text.clone());
        }
        self.base.fetch(uri)
    }

    fn last_modified(&self, uri: &FileUri) -> io::Result<Timestamp> {
        if let Some(snapshot) = self.snapshots.read().get(uri) {
            return Ok(snapshot.last_modified);
        }
        self.base.last_modified(uri)
    }
}

/// Fixed in-memory content, for tests and one-off computations.
#[derive(Debug, Default)]
pub struct StaticContent {
    files: RwLock<HashMap<FileUri, (String, Timestamp)>>,
}

impl StaticContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<FileUri>, text: impl Into<String>, stamp: Timestamp) {
        self.files
            .write()
            .insert(uri.into(), (text.into(), stamp));
    }

    pub fn remove(&self, uri: &FileUri) {
        self.files.write().remove(uri);
    }
}

impl ContentProvider for StaticContent {
    fn fetch(&self, uri: &FileUri) -> io::Result<String> {
        self.files
            .read()
            .get(uri)
            .map(|(text, _)| text.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, uri.as_str().to_string()))
    }

    fn last_modified(&self, uri: &FileUri) -> io::Result<Timestamp> {
        self.files
            .read()
            .get(uri)
            .map(|(_, stamp)| *stamp)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, uri.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_snapshot_over_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Foo.java");
        std::fs::write(&path, "class OnDisk {}").unwrap();
        let uri = FileUri::from(path.as_path());

        let overlay = OverlayFs::local();
        assert_eq!(overlay.fetch(&uri).unwrap(), "class OnDisk {}");

        overlay.set_snapshot(uri.clone(), "class InMemory {}", 2);
        assert_eq!(overlay.fetch(&uri).unwrap(), "class InMemory {}");

        overlay.remove_snapshot(&uri);
        assert_eq!(overlay.fetch(&uri).unwrap(), "class OnDisk {}");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let overlay = OverlayFs::local();
        let uri = FileUri::new("/definitely/not/here/Foo.java");
        assert!(overlay.fetch(&uri).is_err());
    }

    #[test]
    fn static_content_serves_inserted_text() {
        let content = StaticContent::new();
        content.insert("/src/A.java", "class A {}", Timestamp::from_millis(10));
        let uri = FileUri::new("/src/A.java");
        assert_eq!(content.fetch(&uri).unwrap(), "class A {}");
        assert_eq!(
            content.last_modified(&uri).unwrap(),
            Timestamp::from_millis(10)
        );
    }
}
