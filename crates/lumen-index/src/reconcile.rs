use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use lumen_core::{DocumentDescriptor, FileUri, Project, ProjectId};
use lumen_scheduler::{CancellationToken, Cancelled, KeyedDebouncer, PoolKind, Scheduler};
use lumen_vfs::ChangeEvent;

use crate::{IndexError, SourceIndexer};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Quiet period after the last change event before a re-index runs.
    pub debounce: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

/// Work accumulated for a project while its debounce timer is pending. A
/// fired run takes a snapshot; the snapshot is subtracted only after the run
/// completes, so a superseded (cancelled) run loses nothing.
#[derive(Debug, Default, Clone)]
struct Pending {
    full_init: bool,
    refresh: bool,
    changed: BTreeSet<FileUri>,
    removed: BTreeSet<FileUri>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        !self.full_init && !self.refresh && self.changed.is_empty() && self.removed.is_empty()
    }

    fn subtract(&mut self, done: &Pending) {
        if done.full_init {
            self.full_init = false;
        }
        if done.refresh {
            self.refresh = false;
        }
        for uri in &done.changed {
            self.changed.remove(uri);
        }
        for uri in &done.removed {
            self.removed.remove(uri);
        }
    }
}

struct ProjectEntry {
    project: Project,
    pending: Pending,
}

struct ReconcileInner {
    indexer: Arc<SourceIndexer>,
    debouncer: KeyedDebouncer<ProjectId>,
    projects: Mutex<HashMap<ProjectId, ProjectEntry>>,
}

/// Converts a storm of change notifications into at most one active re-index
/// per project, after a quiet period. Scheduling a project cancels and
/// replaces its previous pending request; re-index work runs on the scan
/// pool while timers stay on the IO runtime.
#[derive(Clone)]
pub struct ReconcileScheduler {
    inner: Arc<ReconcileInner>,
}

impl ReconcileScheduler {
    pub fn new(
        scheduler: &Scheduler,
        indexer: Arc<SourceIndexer>,
        config: ReconcileConfig,
    ) -> Self {
        let debouncer = KeyedDebouncer::new(scheduler.clone(), PoolKind::Scan, config.debounce);
        Self {
            inner: Arc::new(ReconcileInner {
                indexer,
                debouncer,
                projects: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn notify(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::ProjectCreated(project) => {
                let id = project.id.clone();
                {
                    let mut projects = self.inner.projects.lock();
                    let entry = projects.entry(id.clone()).or_insert_with(|| ProjectEntry {
                        project: project.clone(),
                        pending: Pending::default(),
                    });
                    entry.project = project;
                    entry.pending.full_init = true;
                }
                self.schedule(id);
            }
            ChangeEvent::ProjectChanged(project) => {
                let id = project.id.clone();
                {
                    let mut projects = self.inner.projects.lock();
                    let entry = projects.entry(id.clone()).or_insert_with(|| ProjectEntry {
                        project: project.clone(),
                        pending: Pending::default(),
                    });
                    if entry.project.classpath != project.classpath {
                        // A classpath change invalidates the semantic
                        // environment wholesale; the fingerprint change takes
                        // care of the artifact caches.
                        self.inner.indexer.invalidate_environment(&id);
                    }
                    entry.project = project;
                    entry.pending.refresh = true;
                }
                self.schedule(id);
            }
            ChangeEvent::ProjectDeleted(id) => {
                self.inner.debouncer.cancel(&id);
                self.inner.projects.lock().remove(&id);
                self.inner.indexer.remove_project(&id);
            }
            ChangeEvent::FileCreated { project, uri }
            | ChangeEvent::FileChanged { project, uri } => {
                {
                    let mut projects = self.inner.projects.lock();
                    let Some(entry) = projects.get_mut(&project) else {
                        tracing::debug!(
                            target = "lumen.reconcile",
                            project = %project,
                            "file event for unknown project"
                        );
                        return;
                    };
                    entry.pending.removed.remove(&uri);
                    entry.pending.changed.insert(uri);
                }
                self.schedule(project);
            }
            ChangeEvent::FileDeleted { project, uri } => {
                {
                    let mut projects = self.inner.projects.lock();
                    let Some(entry) = projects.get_mut(&project) else {
                        return;
                    };
                    entry.pending.changed.remove(&uri);
                    entry.pending.removed.insert(uri);
                }
                self.schedule(project);
            }
        }
    }

    /// Cancel all pending timers and clear per-project state. In-flight work
    /// is cancelled cooperatively.
    pub fn shutdown(&self) {
        self.inner.debouncer.cancel_all();
        self.inner.projects.lock().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.debouncer.pending_count()
    }

    fn schedule(&self, id: ProjectId) {
        let inner = Arc::clone(&self.inner);
        let key = id.clone();
        self.inner
            .debouncer
            .debounce(key, move |token| inner.run(&id, &token));
    }
}

impl ReconcileInner {
    fn run(&self, id: &ProjectId, token: &CancellationToken) -> Result<(), Cancelled> {
        let (project, work) = {
            let projects = self.projects.lock();
            let Some(entry) = projects.get(id) else {
                return Ok(());
            };
            (entry.project.clone(), entry.pending.clone())
        };
        if work.is_empty() {
            return Ok(());
        }

        match self.execute(&project, &work, token) {
            Ok(()) => {
                let mut projects = self.projects.lock();
                if let Some(entry) = projects.get_mut(id) {
                    entry.pending.subtract(&work);
                }
                Ok(())
            }
            Err(err) if err.is_cancelled() => {
                // Superseded: the replacement run still sees the pending
                // state and covers it.
                Err(Cancelled)
            }
            Err(err) => {
                tracing::error!(
                    target = "lumen.reconcile",
                    project = %id,
                    error = %err,
                    "re-index failed; previous artifacts stay published"
                );
                Ok(())
            }
        }
    }

    fn execute(
        &self,
        project: &Project,
        work: &Pending,
        token: &CancellationToken,
    ) -> Result<(), IndexError> {
        if !work.removed.is_empty() {
            let uris: Vec<FileUri> = work.removed.iter().cloned().collect();
            self.indexer.remove_files(project, &uris)?;
        }
        if work.full_init {
            return self.indexer.initialize_project(project, false, token);
        }
        if work.refresh {
            return self.indexer.refresh_project(project, token);
        }
        if !work.changed.is_empty() {
            let docs: Vec<DocumentDescriptor> = work
                .changed
                .iter()
                .map(|uri| self.indexer.describe(uri))
                .collect();
            return self.indexer.update_files(project, &docs, token);
        }
        Ok(())
    }
}
