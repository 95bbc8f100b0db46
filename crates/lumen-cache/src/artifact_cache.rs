use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use lumen_core::{
    ArtifactKind, DependencyMap, DocumentDescriptor, FileTagged, FileUri, ProjectId, Timestamp,
    TypeName,
};

use crate::Fingerprint;

/// Identifies one cached artifact set: which project, which artifact kind,
/// and under which fingerprint the artifacts were generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub project: ProjectId,
    pub kind: ArtifactKind,
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    pub fn new(project: ProjectId, kind: ArtifactKind, fingerprint: Fingerprint) -> Self {
        Self {
            project,
            kind,
            fingerprint,
        }
    }
}

#[derive(Debug, Clone)]
struct FileEntry<T> {
    last_modified: Timestamp,
    items: Vec<T>,
}

#[derive(Debug)]
struct Slot<T> {
    fingerprint: Fingerprint,
    files: HashMap<FileUri, FileEntry<T>>,
    dependencies: DependencyMap,
}

impl<T> Slot<T> {
    fn empty(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            files: HashMap::new(),
            dependencies: DependencyMap::new(),
        }
    }
}

/// In-memory, per-project, per-artifact-kind store of generated artifacts,
/// per-file modification stamps and dependency edges.
///
/// One slot exists per (project, kind); the slot remembers the fingerprint it
/// was written under. Touching a slot with a different fingerprint discards
/// it wholesale: artifacts generated under old assumptions are never mixed
/// with new ones.
#[derive(Debug, Default)]
pub struct IndexCache<T> {
    slots: RwLock<HashMap<(ProjectId, ArtifactKind), Slot<T>>>,
}

impl<T: FileTagged + Clone> IndexCache<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot_id(key: &CacheKey) -> (ProjectId, ArtifactKind) {
        (key.project.clone(), key.kind)
    }

    /// Batch retrieval, all-or-nothing: every file in `files` must have a
    /// fresh entry, the cached file set must match exactly, and the
    /// fingerprint must match. Anything else is a miss, and a
    /// wrong-generation slot is dropped on the spot.
    pub fn retrieve(
        &self,
        key: &CacheKey,
        files: &[DocumentDescriptor],
    ) -> Option<(Vec<T>, DependencyMap)> {
        let id = Self::slot_id(key);
        let mut slots = self.slots.write();
        let slot = slots.get(&id)?;

        if slot.fingerprint != key.fingerprint {
            tracing::debug!(
                target = "lumen.cache",
                project = %key.project,
                kind = ?key.kind,
                "fingerprint changed, dropping cached artifacts"
            );
            slots.remove(&id);
            return None;
        }

        if slot.files.len() != files.len() {
            return None;
        }
        for doc in files {
            let entry = slot.files.get(&doc.uri)?;
            if entry.last_modified < doc.last_modified {
                return None;
            }
        }

        let mut items = Vec::new();
        for doc in files {
            if let Some(entry) = slot.files.get(&doc.uri) {
                items.extend(entry.items.iter().cloned());
            }
        }
        Some((items, slot.dependencies.clone()))
    }

    /// Bulk write of a freshly computed batch, replacing the whole slot.
    pub fn store(
        &self,
        key: &CacheKey,
        files: &[DocumentDescriptor],
        items: Vec<T>,
        dependencies: DependencyMap,
    ) {
        let mut per_file: HashMap<FileUri, Vec<T>> = HashMap::new();
        for item in items {
            per_file.entry(item.file().clone()).or_default().push(item);
        }

        let mut slot = Slot::empty(key.fingerprint.clone());
        for doc in files {
            slot.files.insert(
                doc.uri.clone(),
                FileEntry {
                    last_modified: doc.last_modified,
                    items: per_file.remove(&doc.uri).unwrap_or_default(),
                },
            );
        }
        slot.dependencies = dependencies;

        self.slots.write().insert(Self::slot_id(key), slot);
    }

    /// Single-file incremental write after a targeted re-scan.
    pub fn update(
        &self,
        key: &CacheKey,
        uri: &FileUri,
        last_modified: Timestamp,
        items: Vec<T>,
        file_dependencies: BTreeSet<TypeName>,
    ) {
        let id = Self::slot_id(key);
        let mut slots = self.slots.write();
        let slot = slots
            .entry(id)
            .or_insert_with(|| Slot::empty(key.fingerprint.clone()));
        if slot.fingerprint != key.fingerprint {
            *slot = Slot::empty(key.fingerprint.clone());
        }
        slot.files.insert(
            uri.clone(),
            FileEntry {
                last_modified,
                items,
            },
        );
        slot.dependencies.insert(uri.clone(), file_dependencies);
    }

    pub fn remove_file(&self, key: &CacheKey, uri: &FileUri) {
        let id = Self::slot_id(key);
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(&id) {
            slot.files.remove(uri);
            slot.dependencies.remove(uri);
        }
    }

    /// Drop every slot belonging to `project`, across fingerprints.
    pub fn remove_project(&self, project: &ProjectId) {
        self.slots
            .write()
            .retain(|(owner, _), _| owner != project);
    }

    /// The stamp recorded at extraction time, used to decide whether a file
    /// needs a re-scan before reading its content at all.
    pub fn modification_timestamp(&self, key: &CacheKey, uri: &FileUri) -> Option<Timestamp> {
        let id = Self::slot_id(key);
        let slots = self.slots.read();
        let slot = slots.get(&id)?;
        if slot.fingerprint != key.fingerprint {
            return None;
        }
        slot.files.get(uri).map(|entry| entry.last_modified)
    }
}
