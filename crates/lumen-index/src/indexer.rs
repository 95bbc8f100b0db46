use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use walkdir::WalkDir;

use lumen_cache::{
    index_fingerprint, CacheKey, EnvironmentError, IndexCache, ParseTreeCache, TreeError,
};
use lumen_core::{
    ArtifactKind, CachedComponent, CachedDiagnostic, CachedSymbol, Component, DependencyMap,
    Diagnostic, DocumentDescriptor, FileUri, Project, ProjectId, Symbol, Timestamp, TypeName,
};
use lumen_scheduler::{CancellationToken, ProgressSender};
use lumen_syntax::{ParseError, SourceUnit};
use lumen_vfs::ContentProvider;

use crate::{
    run_extraction, DependencyTracker, ExtractionOutput, ExtractionStrategy, ScanPass, SymbolSink,
};

// Whenever extraction changes in a way that makes previously cached artifacts
// invalid, bump the generation: no up-to-date cache entry will be found and
// everything re-indexes.
const GENERATION: &str = "gen-1";

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// File extension of indexable sources.
    pub source_extension: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            source_extension: "java".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scan was cancelled")]
    Cancelled,
}

impl IndexError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexError::Cancelled)
    }
}

struct ProjectState {
    tracker: DependencyTracker,
    /// Serializes extraction transactions per project; different projects
    /// scan concurrently.
    scan_lock: Mutex<()>,
}

struct CacheKeys {
    symbols: CacheKey,
    components: CacheKey,
    diagnostics: CacheKey,
}

struct FileResult {
    output: ExtractionOutput,
    last_modified: Timestamp,
}

struct ScanOutcome {
    /// Simple and qualified names of types declared by batch files, before
    /// and after this scan. Drives affected-file propagation.
    scanned_types: BTreeSet<TypeName>,
    files: BTreeMap<FileUri, FileResult>,
    /// Every file this batch attempted, parse failures included; they must
    /// not be re-entered by the same cascade.
    attempted: BTreeSet<FileUri>,
}

/// Orchestrates two-pass parsing and extraction, drives both caches and the
/// dependency tracker, and propagates changes to affected files.
pub struct SourceIndexer {
    config: IndexerConfig,
    symbols: IndexCache<CachedSymbol>,
    components: IndexCache<CachedComponent>,
    diagnostics: IndexCache<CachedDiagnostic>,
    trees: Arc<ParseTreeCache>,
    content: Arc<dyn ContentProvider>,
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
    sink: Arc<dyn SymbolSink>,
    projects: RwLock<HashMap<ProjectId, Arc<ProjectState>>>,
    settings: RwLock<serde_json::Value>,
    progress: ProgressSender,
}

impl SourceIndexer {
    pub fn new(
        config: IndexerConfig,
        trees: Arc<ParseTreeCache>,
        content: Arc<dyn ContentProvider>,
        strategies: Vec<Arc<dyn ExtractionStrategy>>,
        sink: Arc<dyn SymbolSink>,
        progress: ProgressSender,
    ) -> Self {
        Self {
            config,
            symbols: IndexCache::new(),
            components: IndexCache::new(),
            diagnostics: IndexCache::new(),
            trees,
            content,
            strategies,
            sink,
            projects: RwLock::new(HashMap::new()),
            settings: RwLock::new(serde_json::Value::Null),
            progress,
        }
    }

    /// Glob for the external file watcher.
    pub fn file_watch_pattern(&self) -> String {
        format!("**/*.{}", self.config.source_extension)
    }

    pub fn is_interested_in(&self, uri: &FileUri) -> bool {
        uri.extension() == Some(self.config.source_extension.as_str())
    }

    /// Settings participate in the cache fingerprint; changing them
    /// invalidates all previously cached artifacts on next access.
    pub fn set_validation_settings(&self, settings: serde_json::Value) {
        tracing::info!(target = "lumen.index", "validation settings changed");
        *self.settings.write() = settings;
    }

    /// Drop a project's semantic environment and cached trees, e.g. when its
    /// classpath changed.
    pub fn invalidate_environment(&self, project: &ProjectId) {
        self.trees.invalidate_project(project);
    }

    /// Full indexing of a project. Without `force_clean`, a fresh cached
    /// batch skips parsing entirely and restores tracker edges from the
    /// cached dependency map.
    pub fn initialize_project(
        &self,
        project: &Project,
        force_clean: bool,
        token: &CancellationToken,
    ) -> Result<(), IndexError> {
        let state = self.project_state(&project.id);
        let _guard = state.scan_lock.lock();

        let files = self.collect_files(project)?;
        tracing::info!(
            target = "lumen.index",
            project = %project.id,
            files = files.len(),
            "initialize project"
        );
        let keys = self.cache_keys(project);

        if !force_clean {
            let cached_symbols = self.symbols.retrieve(&keys.symbols, &files);
            let cached_components = self.components.retrieve(&keys.components, &files);
            let cached_diagnostics = self.diagnostics.retrieve(&keys.diagnostics, &files);
            if let (Some((symbols, deps)), Some((components, _)), Some((diagnostics, _))) =
                (cached_symbols, cached_components, cached_diagnostics)
            {
                state.tracker.restore(deps);
                self.publish_cached(project, &files, symbols, components, diagnostics);
                tracing::info!(
                    target = "lumen.index",
                    project = %project.id,
                    "restored project from cache"
                );
                return Ok(());
            }
        }

        // Cached trees for files whose artifacts are stale were parsed from
        // older content; drop them so the cold pass re-parses.
        for doc in &files {
            if self.is_outdated(&keys, doc) {
                self.trees.invalidate(&doc.uri);
            }
        }

        let outcome = self.scan_batch(project, &state, &files, None, token)?;

        // Only successfully scanned files enter the bulk store; a parse
        // failure must stay a cache miss so the file re-scans later.
        let scanned_docs: Vec<DocumentDescriptor> = files
            .iter()
            .filter(|doc| outcome.files.contains_key(&doc.uri))
            .cloned()
            .collect();
        let dependencies = state.tracker.all_dependencies();
        self.store_bulk(&keys, &scanned_docs, &outcome, dependencies);

        for doc in &files {
            if let Some(result) = outcome.files.get(&doc.uri) {
                self.publish_file(project, &doc.uri, &result.output);
            }
        }
        Ok(())
    }

    /// Re-scan one file if its cache entry is stale, then cascade to
    /// affected files. `content` overrides the content provider for this one
    /// parse (an unsaved editor buffer).
    pub fn update_file(
        &self,
        project: &Project,
        doc: &DocumentDescriptor,
        content: Option<&str>,
        token: &CancellationToken,
    ) -> Result<(), IndexError> {
        if !self.should_process(project, &doc.uri) {
            return Ok(());
        }
        let keys = self.cache_keys(project);
        if !self.is_outdated(&keys, doc) {
            return Ok(());
        }

        let state = self.project_state(&project.id);
        let _guard = state.scan_lock.lock();

        self.trees.invalidate(&doc.uri);
        let docs = [doc.clone()];
        let override_content = content.map(|text| (&doc.uri, text));
        let outcome = self.scan_batch(project, &state, &docs, override_content, token)?;
        self.commit_incremental(project, &keys, &outcome);
        self.scan_affected(
            project,
            &state,
            &keys,
            outcome.scanned_types,
            outcome.attempted,
            token,
        )
    }

    /// Re-scan the stale subset of `docs`, then cascade to affected files.
    pub fn update_files(
        &self,
        project: &Project,
        docs: &[DocumentDescriptor],
        token: &CancellationToken,
    ) -> Result<(), IndexError> {
        let keys = self.cache_keys(project);
        let docs: Vec<DocumentDescriptor> = docs
            .iter()
            .filter(|doc| self.should_process(project, &doc.uri))
            .filter(|doc| self.is_outdated(&keys, doc))
            .cloned()
            .collect();
        if docs.is_empty() {
            return Ok(());
        }

        let state = self.project_state(&project.id);
        let _guard = state.scan_lock.lock();

        for doc in &docs {
            self.trees.invalidate(&doc.uri);
        }
        let outcome = self.scan_batch(project, &state, &docs, None, token)?;
        self.commit_incremental(project, &keys, &outcome);
        self.scan_affected(
            project,
            &state,
            &keys,
            outcome.scanned_types,
            outcome.attempted,
            token,
        )
    }

    /// Collect the project's current files and re-scan whatever timestamps
    /// say is stale.
    pub fn refresh_project(
        &self,
        project: &Project,
        token: &CancellationToken,
    ) -> Result<(), IndexError> {
        let files = self.collect_files(project)?;
        self.update_files(project, &files, token)
    }

    /// Remove deleted files: their artifacts and outgoing dependency edges
    /// go away; other files' edges are left untouched.
    pub fn remove_files(&self, project: &Project, uris: &[FileUri]) -> Result<(), IndexError> {
        let keys = self.cache_keys(project);
        let state = self.project_state(&project.id);
        let _guard = state.scan_lock.lock();

        let analyzer = self.trees.environment(project).ok();
        for uri in uris {
            self.symbols.remove_file(&keys.symbols, uri);
            self.components.remove_file(&keys.components, uri);
            self.diagnostics.remove_file(&keys.diagnostics, uri);
            state.tracker.remove_file(uri);
            self.trees.invalidate(uri);
            if let Some(analyzer) = &analyzer {
                analyzer.forget(uri);
            }
            self.sink.remove(&project.id, uri);
        }
        Ok(())
    }

    /// Purge everything keyed to a project.
    pub fn remove_project(&self, project: &ProjectId) {
        tracing::info!(target = "lumen.index", project = %project, "remove project");
        self.projects.write().remove(project);
        self.symbols.remove_project(project);
        self.components.remove_project(project);
        self.diagnostics.remove_project(project);
        self.trees.invalidate_project(project);
        self.sink.remove_project(project);
    }

    /// Side-effect-free, non-cached symbol computation for one-off queries.
    pub fn compute_symbols(
        &self,
        project: &Project,
        uri: &FileUri,
        content: &str,
    ) -> Result<Vec<Symbol>, IndexError> {
        let analyzer = self.trees.environment(project)?;
        let unit = analyzer.parse(uri, content)?;
        let output = run_extraction(
            &self.strategies,
            project,
            uri,
            Timestamp::ZERO,
            &unit,
            &analyzer,
            ScanPass::One,
        );
        Ok(output.symbols.into_iter().map(|c| c.symbol).collect())
    }

    /// Stamp a file with its current provider-visible modification time.
    pub fn describe(&self, uri: &FileUri) -> DocumentDescriptor {
        let last_modified = self
            .content
            .last_modified(uri)
            .unwrap_or_else(|_| Timestamp::now());
        DocumentDescriptor {
            uri: uri.clone(),
            last_modified,
        }
    }

    /// The tracker's current edge snapshot for a project.
    pub fn dependency_snapshot(&self, project: &ProjectId) -> DependencyMap {
        self.projects
            .read()
            .get(project)
            .map(|state| state.tracker.all_dependencies())
            .unwrap_or_default()
    }

    pub fn collect_files(&self, project: &Project) -> Result<Vec<DocumentDescriptor>, IndexError> {
        let mut files = Vec::new();
        for root in &project.source_roots {
            if !root.exists() {
                continue;
            }
            for entry in WalkDir::new(root) {
                let entry = entry.map_err(|err| IndexError::Io(err.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let matches = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == self.config.source_extension);
                if !matches {
                    continue;
                }
                let uri = FileUri::from(path);
                let last_modified = self.content.last_modified(&uri).unwrap_or(Timestamp::ZERO);
                files.push(DocumentDescriptor { uri, last_modified });
            }
        }
        files.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(files)
    }

    fn project_state(&self, id: &ProjectId) -> Arc<ProjectState> {
        if let Some(state) = self.projects.read().get(id) {
            return state.clone();
        }
        self.projects
            .write()
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(ProjectState {
                    tracker: DependencyTracker::new(),
                    scan_lock: Mutex::new(()),
                })
            })
            .clone()
    }

    fn cache_keys(&self, project: &Project) -> CacheKeys {
        let fingerprint = index_fingerprint(GENERATION, &self.settings.read(), &project.classpath);
        CacheKeys {
            symbols: CacheKey::new(
                project.id.clone(),
                ArtifactKind::Symbols,
                fingerprint.clone(),
            ),
            components: CacheKey::new(
                project.id.clone(),
                ArtifactKind::Components,
                fingerprint.clone(),
            ),
            diagnostics: CacheKey::new(project.id.clone(), ArtifactKind::Diagnostics, fingerprint),
        }
    }

    fn should_process(&self, project: &Project, uri: &FileUri) -> bool {
        if !self.is_interested_in(uri) {
            return false;
        }
        if project.source_roots.is_empty() {
            return true;
        }
        let path = uri.as_str().strip_prefix("file://").unwrap_or(uri.as_str());
        project.source_roots.iter().any(|root| {
            let root = root.to_string_lossy().replace('\\', "/");
            path.starts_with(root.as_str())
        })
    }

    fn is_outdated(&self, keys: &CacheKeys, doc: &DocumentDescriptor) -> bool {
        let fresh = |stamp: Option<Timestamp>| stamp.is_some_and(|s| s >= doc.last_modified);
        !(fresh(self.symbols.modification_timestamp(&keys.symbols, &doc.uri))
            && fresh(self.components.modification_timestamp(&keys.components, &doc.uri))
            && fresh(self.diagnostics.modification_timestamp(&keys.diagnostics, &doc.uri)))
    }

    /// The two-pass scan. Pass one parses and extracts every file; files
    /// whose references did not fully resolve are re-extracted in pass two
    /// after the batch's declarations were installed into the environment.
    /// Per-file failures are isolated; environment failure aborts the batch.
    fn scan_batch(
        &self,
        project: &Project,
        state: &ProjectState,
        docs: &[DocumentDescriptor],
        content_override: Option<(&FileUri, &str)>,
        token: &CancellationToken,
    ) -> Result<ScanOutcome, IndexError> {
        let analyzer = self.trees.environment(project)?;
        let progress = self.progress.start_counted(
            format!("Indexing sources for '{}'", project.id),
            docs.len() as u64,
        );

        let mut parsed: BTreeMap<FileUri, SourceUnit> = BTreeMap::new();
        let mut results: BTreeMap<FileUri, FileResult> = BTreeMap::new();
        let mut second_pass: Vec<DocumentDescriptor> = Vec::new();

        for doc in docs {
            if token.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let unit = match self.parse_for_scan(project, &doc.uri, content_override, token) {
                Ok(unit) => unit,
                Err(TreeError::Cancelled) => return Err(IndexError::Cancelled),
                Err(TreeError::Environment(err)) => return Err(err.into()),
                Err(err) => {
                    // Malformed or unreadable source: isolated to this file;
                    // its previous artifacts and edges stay valid.
                    tracing::warn!(
                        target = "lumen.index",
                        uri = %doc.uri,
                        error = %err,
                        "skipping file"
                    );
                    progress.increment();
                    continue;
                }
            };
            let output = run_extraction(
                &self.strategies,
                project,
                &doc.uri,
                doc.last_modified,
                &unit,
                &analyzer,
                ScanPass::One,
            );
            if output.needs_second_pass {
                second_pass.push(doc.clone());
            }
            parsed.insert(doc.uri.clone(), unit);
            results.insert(
                doc.uri.clone(),
                FileResult {
                    output,
                    last_modified: doc.last_modified,
                },
            );
            progress.increment();
        }

        // Changed types are what the batch declares now plus what its files
        // declared before this scan, so renames reach files that referenced
        // the old name.
        let mut scanned_types = BTreeSet::new();
        for (uri, result) in &results {
            scanned_types.extend(analyzer.declared_by(uri));
            scanned_types.extend(result.output.declared_types.iter().cloned());
        }
        for (uri, unit) in &parsed {
            analyzer.install(uri, unit);
        }

        if !second_pass.is_empty() {
            tracing::debug!(
                target = "lumen.index",
                project = %project.id,
                files = second_pass.len(),
                "second pass"
            );
            for doc in &second_pass {
                if token.is_cancelled() {
                    return Err(IndexError::Cancelled);
                }
                let Some(unit) = parsed.get(&doc.uri) else {
                    continue;
                };
                let output = run_extraction(
                    &self.strategies,
                    project,
                    &doc.uri,
                    doc.last_modified,
                    unit,
                    &analyzer,
                    ScanPass::Two,
                );
                // Pass-two output is authoritative for its file.
                results.insert(
                    doc.uri.clone(),
                    FileResult {
                        output,
                        last_modified: doc.last_modified,
                    },
                );
            }
        }

        // Tracker and caches update within the same per-project transaction;
        // the caller holds the scan lock.
        for (uri, result) in &results {
            state.tracker.update(uri, result.output.dependencies.clone());
        }

        Ok(ScanOutcome {
            scanned_types,
            files: results,
            attempted: docs.iter().map(|doc| doc.uri.clone()).collect(),
        })
    }

    fn parse_for_scan(
        &self,
        project: &Project,
        uri: &FileUri,
        content_override: Option<(&FileUri, &str)>,
        token: &CancellationToken,
    ) -> Result<SourceUnit, TreeError> {
        if let Some((override_uri, text)) = content_override {
            if override_uri == uri {
                // Transient editor content: parse directly, never cache.
                let analyzer = self.trees.environment(project)?;
                return Ok(analyzer.parse(uri, text)?);
            }
        }
        let parsed = self.trees.get_or_parse(project, uri, token)?;
        Ok(parsed.unit.clone())
    }

    /// Compute and scan the affected-file closure. Each file is scanned at
    /// most once per cascade, so circular references terminate.
    fn scan_affected(
        &self,
        project: &Project,
        state: &ProjectState,
        keys: &CacheKeys,
        mut changed_types: BTreeSet<TypeName>,
        mut already_scanned: BTreeSet<FileUri>,
        token: &CancellationToken,
    ) -> Result<(), IndexError> {
        loop {
            if changed_types.is_empty() {
                return Ok(());
            }
            let affected = state.tracker.affected_files(&changed_types, &already_scanned);
            if affected.is_empty() {
                return Ok(());
            }
            tracing::info!(
                target = "lumen.index",
                project = %project.id,
                files = affected.len(),
                "scanning affected files"
            );

            let docs: Vec<DocumentDescriptor> =
                affected.iter().map(|uri| self.describe(uri)).collect();
            already_scanned.extend(affected);

            let outcome = self.scan_batch(project, state, &docs, None, token)?;
            self.commit_incremental(project, keys, &outcome);
            changed_types = outcome.scanned_types;
        }
    }

    fn store_bulk(
        &self,
        keys: &CacheKeys,
        docs: &[DocumentDescriptor],
        outcome: &ScanOutcome,
        dependencies: DependencyMap,
    ) {
        let symbols = outcome
            .files
            .values()
            .flat_map(|r| r.output.symbols.iter().cloned())
            .collect();
        let components = outcome
            .files
            .values()
            .flat_map(|r| r.output.components.iter().cloned())
            .collect();
        let diagnostics = outcome
            .files
            .values()
            .flat_map(|r| r.output.diagnostics.iter().cloned())
            .collect();

        self.symbols
            .store(&keys.symbols, docs, symbols, dependencies.clone());
        self.components
            .store(&keys.components, docs, components, dependencies.clone());
        self.diagnostics
            .store(&keys.diagnostics, docs, diagnostics, dependencies);
    }

    fn commit_incremental(&self, project: &Project, keys: &CacheKeys, outcome: &ScanOutcome) {
        for (uri, result) in &outcome.files {
            let deps = result.output.dependencies.clone();
            self.symbols.update(
                &keys.symbols,
                uri,
                result.last_modified,
                result.output.symbols.clone(),
                deps.clone(),
            );
            self.components.update(
                &keys.components,
                uri,
                result.last_modified,
                result.output.components.clone(),
                deps.clone(),
            );
            self.diagnostics.update(
                &keys.diagnostics,
                uri,
                result.last_modified,
                result.output.diagnostics.clone(),
                deps,
            );
            self.publish_file(project, uri, &result.output);
        }
    }

    fn publish_file(&self, project: &Project, uri: &FileUri, output: &ExtractionOutput) {
        let symbols: Vec<Symbol> = output.symbols.iter().map(|c| c.symbol.clone()).collect();
        let components: Vec<Component> = output
            .components
            .iter()
            .map(|c| c.component.clone())
            .collect();
        let diagnostics: Vec<Diagnostic> = output
            .diagnostics
            .iter()
            .map(|c| c.diagnostic.clone())
            .collect();
        self.sink
            .publish(&project.id, uri, symbols, components, diagnostics);
    }

    fn publish_cached(
        &self,
        project: &Project,
        files: &[DocumentDescriptor],
        symbols: Vec<CachedSymbol>,
        components: Vec<CachedComponent>,
        diagnostics: Vec<CachedDiagnostic>,
    ) {
        type Grouped = (Vec<Symbol>, Vec<Component>, Vec<Diagnostic>);
        let mut by_file: HashMap<FileUri, Grouped> = HashMap::new();
        for cached in symbols {
            by_file.entry(cached.uri).or_default().0.push(cached.symbol);
        }
        for cached in components {
            by_file
                .entry(cached.uri)
                .or_default()
                .1
                .push(cached.component);
        }
        for cached in diagnostics {
            by_file
                .entry(cached.uri)
                .or_default()
                .2
                .push(cached.diagnostic);
        }

        for doc in files {
            let (symbols, components, diagnostics) =
                by_file.remove(&doc.uri).unwrap_or_default();
            self.sink
                .publish(&project.id, &doc.uri, symbols, components, diagnostics);
        }
    }
}
