use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{FileUri, ProjectId, Timestamp, TypeName};

/// One classpath entry of a project, with the modification stamp used in
/// cache fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClasspathEntry {
    pub path: PathBuf,
    pub last_modified: Timestamp,
}

impl ClasspathEntry {
    pub fn new(path: impl Into<PathBuf>, last_modified: Timestamp) -> Self {
        Self {
            path: path.into(),
            last_modified,
        }
    }
}

/// A project as handed over by the external project model. The core never
/// mutates project identity; it only reacts to lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub source_roots: Vec<PathBuf>,
    pub classpath: Vec<ClasspathEntry>,
}

impl Project {
    pub fn new(id: impl Into<ProjectId>) -> Self {
        Self {
            id: id.into(),
            source_roots: Vec::new(),
            classpath: Vec::new(),
        }
    }

    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_roots.push(root.into());
        self
    }

    pub fn with_classpath_entry(mut self, entry: ClasspathEntry) -> Self {
        self.classpath.push(entry);
        self
    }
}

/// A source file as seen by the indexer: identity plus last-modified stamp.
/// Content is fetched lazily through the content provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub uri: FileUri,
    pub last_modified: Timestamp,
}

impl DocumentDescriptor {
    pub fn new(uri: impl Into<FileUri>, last_modified: Timestamp) -> Self {
        Self {
            uri: uri.into(),
            last_modified,
        }
    }
}

/// Outgoing dependency edges, keyed by the referencing file.
///
/// Ordered maps keep snapshots deterministic, which the caches and tests rely
/// on.
pub type DependencyMap = BTreeMap<FileUri, BTreeSet<TypeName>>;
