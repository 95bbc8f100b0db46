use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use lumen_core::{Component, Diagnostic, FileUri, ProjectId, Symbol};

/// Consumer side of the indexer: receives the full current artifact set per
/// file after each cascade. Never a partial diff, so a consumer's view of a
/// file is either the previous complete set or the new complete set.
pub trait SymbolSink: Send + Sync {
    fn publish(
        &self,
        project: &ProjectId,
        uri: &FileUri,
        symbols: Vec<Symbol>,
        components: Vec<Component>,
        diagnostics: Vec<Diagnostic>,
    );

    fn remove(&self, project: &ProjectId, uri: &FileUri);

    fn remove_project(&self, project: &ProjectId);
}

/// Artifacts currently published for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedArtifacts {
    pub symbols: Vec<Symbol>,
    pub components: Vec<Component>,
    pub diagnostics: Vec<Diagnostic>,
}

/// In-memory [`SymbolSink`] that keeps the latest published set per file and
/// exposes simple queries for consumers and tests.
#[derive(Debug, Default)]
pub struct SymbolStore {
    inner: RwLock<HashMap<ProjectId, HashMap<FileUri, PublishedArtifacts>>>,
    publishes: AtomicU64,
}

impl SymbolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_artifacts(&self, project: &ProjectId, uri: &FileUri) -> Option<PublishedArtifacts> {
        self.inner.read().get(project)?.get(uri).cloned()
    }

    /// All symbols currently published for a project, in URI order.
    pub fn symbols(&self, project: &ProjectId) -> Vec<Symbol> {
        let inner = self.inner.read();
        let Some(files) = inner.get(project) else {
            return Vec::new();
        };
        let mut uris: Vec<&FileUri> = files.keys().collect();
        uris.sort();
        uris.into_iter()
            .flat_map(|uri| files[uri].symbols.iter().cloned())
            .collect()
    }

    pub fn components(&self, project: &ProjectId) -> Vec<Component> {
        let inner = self.inner.read();
        let Some(files) = inner.get(project) else {
            return Vec::new();
        };
        let mut uris: Vec<&FileUri> = files.keys().collect();
        uris.sort();
        uris.into_iter()
            .flat_map(|uri| files[uri].components.iter().cloned())
            .collect()
    }

    pub fn diagnostics(&self, project: &ProjectId, uri: &FileUri) -> Vec<Diagnostic> {
        self.file_artifacts(project, uri)
            .map(|a| a.diagnostics)
            .unwrap_or_default()
    }

    /// Number of per-file publish calls observed; lets tests assert how many
    /// times a cascade touched the store.
    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::SeqCst)
    }
}

impl SymbolSink for SymbolStore {
    fn publish(
        &self,
        project: &ProjectId,
        uri: &FileUri,
        symbols: Vec<Symbol>,
        components: Vec<Component>,
        diagnostics: Vec<Diagnostic>,
    ) {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.inner.write().entry(project.clone()).or_default().insert(
            uri.clone(),
            PublishedArtifacts {
                symbols,
                components,
                diagnostics,
            },
        );
    }

    fn remove(&self, project: &ProjectId, uri: &FileUri) {
        let mut inner = self.inner.write();
        if let Some(files) = inner.get_mut(project) {
            files.remove(uri);
        }
    }

    fn remove_project(&self, project: &ProjectId) {
        self.inner.write().remove(project);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{Position, Range, SymbolKind};

    fn symbol(name: &str, uri: &str) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Marker,
            uri: FileUri::new(uri),
            range: Range::new(Position::new(0, 0), Position::new(0, 1)),
        }
    }

    #[test]
    fn publish_replaces_the_whole_file_set() {
        let store = SymbolStore::new();
        let project = ProjectId::new("demo");
        let uri = FileUri::new("/a");

        store.publish(
            &project,
            &uri,
            vec![symbol("one", "/a"), symbol("two", "/a")],
            Vec::new(),
            Vec::new(),
        );
        store.publish(&project, &uri, vec![symbol("three", "/a")], Vec::new(), Vec::new());

        let symbols = store.symbols(&project);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "three");
        assert_eq!(store.publish_count(), 2);
    }

    #[test]
    fn remove_clears_one_file_remove_project_clears_all() {
        let store = SymbolStore::new();
        let project = ProjectId::new("demo");

        store.publish(
            &project,
            &FileUri::new("/a"),
            vec![symbol("a", "/a")],
            Vec::new(),
            Vec::new(),
        );
        store.publish(
            &project,
            &FileUri::new("/b"),
            vec![symbol("b", "/b")],
            Vec::new(),
            Vec::new(),
        );

        store.remove(&project, &FileUri::new("/a"));
        assert_eq!(store.symbols(&project).len(), 1);

        store.remove_project(&project);
        assert!(store.symbols(&project).is_empty());
    }
}
