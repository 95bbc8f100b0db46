use std::collections::BTreeSet;

use parking_lot::RwLock;

use lumen_core::{DependencyMap, FileUri, TypeName};

/// Per-file map of referenced type identifiers: which files must be
/// re-scanned when a type changes.
///
/// Edges are fully replaced per file on every successful extraction; a failed
/// extraction never touches them, so transitive reachability survives broken
/// intermediate states. No closure is computed here; the indexer reaches
/// multi-hop dependents by re-invoking scans.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    edges: RwLock<DependencyMap>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edges of `file`.
    pub fn update(&self, file: &FileUri, dependencies: BTreeSet<TypeName>) {
        self.edges.write().insert(file.clone(), dependencies);
    }

    /// Drop a removed file's outgoing edges. Other files' edges stay; they
    /// resolve (or fail to) on their own next scan.
    pub fn remove_file(&self, file: &FileUri) {
        self.edges.write().remove(file);
    }

    /// Snapshot of the full edge set, stored alongside cached artifacts so a
    /// cold start can restore tracker state without re-scanning.
    pub fn all_dependencies(&self) -> DependencyMap {
        self.edges.read().clone()
    }

    /// Install a previously captured edge set wholesale.
    pub fn restore(&self, dependencies: DependencyMap) {
        *self.edges.write() = dependencies;
    }

    /// Every file outside `excluding` whose edges intersect `changed_types`.
    pub fn affected_files(
        &self,
        changed_types: &BTreeSet<TypeName>,
        excluding: &BTreeSet<FileUri>,
    ) -> BTreeSet<FileUri> {
        let edges = self.edges.read();
        edges
            .iter()
            .filter(|(file, _)| !excluding.contains(*file))
            .filter(|(_, deps)| deps.iter().any(|dep| changed_types.contains(dep)))
            .map(|(file, _)| file.clone())
            .collect()
    }

    pub fn dependencies_of(&self, file: &FileUri) -> BTreeSet<TypeName> {
        self.edges.read().get(file).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.edges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> FileUri {
        FileUri::new(s)
    }

    fn types(names: &[&str]) -> BTreeSet<TypeName> {
        names.iter().map(|n| TypeName::new(*n)).collect()
    }

    #[test]
    fn update_replaces_edges() {
        let tracker = DependencyTracker::new();
        tracker.update(&uri("/b"), types(&["Foo", "Bar"]));
        tracker.update(&uri("/b"), types(&["Baz"]));

        assert_eq!(tracker.dependencies_of(&uri("/b")), types(&["Baz"]));
    }

    #[test]
    fn affected_files_intersects_and_excludes() {
        let tracker = DependencyTracker::new();
        tracker.update(&uri("/a"), types(&["Base"]));
        tracker.update(&uri("/b"), types(&["Foo"]));
        tracker.update(&uri("/c"), types(&["Foo", "Base"]));

        let affected = tracker.affected_files(&types(&["Foo"]), &BTreeSet::new());
        assert_eq!(affected, [uri("/b"), uri("/c")].into_iter().collect());

        let excluding = [uri("/b")].into_iter().collect();
        let affected = tracker.affected_files(&types(&["Foo"]), &excluding);
        assert_eq!(affected, [uri("/c")].into_iter().collect());
    }

    #[test]
    fn restore_round_trips_snapshot() {
        let tracker = DependencyTracker::new();
        tracker.update(&uri("/a"), types(&["Foo"]));
        let snapshot = tracker.all_dependencies();

        let restored = DependencyTracker::new();
        restored.restore(snapshot);
        assert_eq!(restored.dependencies_of(&uri("/a")), types(&["Foo"]));
    }

    #[test]
    fn remove_file_leaves_other_edges() {
        let tracker = DependencyTracker::new();
        tracker.update(&uri("/a"), types(&["Foo"]));
        tracker.update(&uri("/b"), types(&["Foo"]));

        tracker.remove_file(&uri("/a"));
        assert!(tracker.dependencies_of(&uri("/a")).is_empty());
        assert_eq!(tracker.dependencies_of(&uri("/b")), types(&["Foo"]));
    }
}
