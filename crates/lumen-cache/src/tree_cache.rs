use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use lumen_core::{FileUri, Project, ProjectId};
use lumen_scheduler::CancellationToken;
use lumen_syntax::{Analyzer, SourceUnit};
use lumen_vfs::ContentProvider;

use crate::{EnvironmentError, TreeError};

/// Builds the semantic environment for a project. Fails when the project's
/// classpath is unusable.
pub type EnvironmentFactory =
    dyn Fn(&Project) -> Result<Arc<Analyzer>, EnvironmentError> + Send + Sync;

#[derive(Debug, Clone)]
pub struct TreeCacheConfig {
    /// Maximum number of cached trees across all projects.
    pub capacity: usize,
    /// Entries unused for this long are evicted even under capacity.
    pub idle_ttl: Duration,
}

impl Default for TreeCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            idle_ttl: Duration::from_secs(60),
        }
    }
}

/// A successfully parsed source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub uri: FileUri,
    pub project: ProjectId,
    pub unit: SourceUnit,
}

/// Shared completion slot for one in-flight parse. The first requester runs
/// the parse; everyone else waits here. Waiters hold their own `Arc`, so
/// eviction of the cache entry can never invalidate an in-flight read.
struct Flight {
    token: CancellationToken,
    state: Mutex<Option<Result<Arc<ParsedFile>, TreeError>>>,
    cond: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<Arc<ParsedFile>, TreeError> {
        let mut state = self.state.lock();
        while state.is_none() {
            self.cond.wait(&mut state);
        }
        state.clone().unwrap_or(Err(TreeError::Cancelled))
    }

    fn complete(&self, result: Result<Arc<ParsedFile>, TreeError>) {
        *self.state.lock() = Some(result);
        self.cond.notify_all();
    }
}

enum Slot {
    InFlight { id: u64, flight: Arc<Flight> },
    Ready { id: u64, file: Arc<ParsedFile> },
}

struct SlotRecord {
    project: ProjectId,
    last_access: Instant,
    slot: Slot,
}

struct EnvEntry {
    analyzer: Arc<Analyzer>,
    /// Number of live cache entries parsed with this environment. When the
    /// last one is evicted the environment is reset, releasing its binding
    /// caches.
    refs: usize,
}

struct Inner {
    slots: HashMap<FileUri, SlotRecord>,
    /// Access order, front = least recently used.
    order: VecDeque<FileUri>,
    envs: HashMap<ProjectId, EnvEntry>,
}

/// Bounded, access-expiring cache of parsed trees with single-flight parsing
/// and eviction-driven environment reclamation.
pub struct ParseTreeCache {
    config: TreeCacheConfig,
    content: Arc<dyn ContentProvider>,
    env_factory: Box<EnvironmentFactory>,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl ParseTreeCache {
    pub fn new(
        config: TreeCacheConfig,
        content: Arc<dyn ContentProvider>,
        env_factory: impl Fn(&Project) -> Result<Arc<Analyzer>, EnvironmentError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        let config = TreeCacheConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            config,
            content,
            env_factory: Box::new(env_factory),
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                order: VecDeque::new(),
                envs: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// A cache with the default environment factory: an [`Analyzer`] seeded
    /// with the project's classpath entry names.
    pub fn with_default_environment(
        config: TreeCacheConfig,
        content: Arc<dyn ContentProvider>,
    ) -> Self {
        Self::new(config, content, |_project| Ok(Arc::new(Analyzer::new())))
    }

    /// The semantic environment for a project, built on first use. Does not
    /// pin it: only cached trees keep an environment's bindings alive.
    pub fn environment(&self, project: &Project) -> Result<Arc<Analyzer>, EnvironmentError> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.envs.get(&project.id) {
            return Ok(entry.analyzer.clone());
        }
        let analyzer = (self.env_factory)(project)?;
        inner.envs.insert(
            project.id.clone(),
            EnvEntry {
                analyzer: analyzer.clone(),
                refs: 0,
            },
        );
        Ok(analyzer)
    }

    /// Get the cached tree for `uri` or parse it, sharing one in-flight parse
    /// between concurrent requesters.
    pub fn get_or_parse(
        &self,
        project: &Project,
        uri: &FileUri,
        token: &CancellationToken,
    ) -> Result<Arc<ParsedFile>, TreeError> {
        enum Action {
            Ready(Arc<ParsedFile>),
            Wait(Arc<Flight>),
            Parse {
                id: u64,
                flight: Arc<Flight>,
                analyzer: Arc<Analyzer>,
            },
        }

        let action = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            self.purge_expired(&mut inner, now);

            let hit = match inner.slots.get_mut(uri) {
                Some(record) => {
                    record.last_access = now;
                    match &record.slot {
                        Slot::Ready { file, .. } => Some(Action::Ready(file.clone())),
                        Slot::InFlight { flight, .. } => Some(Action::Wait(flight.clone())),
                    }
                }
                None => None,
            };

            match hit {
                Some(action) => {
                    touch(&mut inner.order, uri);
                    action
                }
                None => {
                    let analyzer = match inner.envs.get_mut(&project.id) {
                        Some(entry) => {
                            entry.refs += 1;
                            entry.analyzer.clone()
                        }
                        None => {
                            let analyzer = (self.env_factory)(project)?;
                            inner.envs.insert(
                                project.id.clone(),
                                EnvEntry {
                                    analyzer: analyzer.clone(),
                                    refs: 1,
                                },
                            );
                            analyzer
                        }
                    };

                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let flight = Arc::new(Flight::new());
                    inner.slots.insert(
                        uri.clone(),
                        SlotRecord {
                            project: project.id.clone(),
                            last_access: now,
                            slot: Slot::InFlight {
                                id,
                                flight: flight.clone(),
                            },
                        },
                    );
                    inner.order.push_back(uri.clone());
                    self.evict_over_capacity(&mut inner);

                    Action::Parse {
                        id,
                        flight,
                        analyzer,
                    }
                }
            }
        };

        match action {
            Action::Ready(file) => Ok(file),
            Action::Wait(flight) => flight.wait(),
            Action::Parse {
                id,
                flight,
                analyzer,
            } => {
                let result = self
                    .run_parse(&analyzer, uri, token, &flight.token)
                    .map(|unit| {
                        Arc::new(ParsedFile {
                            uri: uri.clone(),
                            project: project.id.clone(),
                            unit,
                        })
                    });

                let mut inner = self.inner.lock();
                let still_ours = match inner.slots.get(uri) {
                    Some(record) => {
                        matches!(&record.slot, Slot::InFlight { id: slot_id, .. } if *slot_id == id)
                    }
                    None => false,
                };
                if still_ours {
                    match &result {
                        Ok(file) => {
                            if let Some(record) = inner.slots.get_mut(uri) {
                                record.slot = Slot::Ready {
                                    id,
                                    file: file.clone(),
                                };
                            }
                        }
                        // Failures are never cached as negative results: a
                        // later edit may make the file parseable again.
                        Err(_) => remove_entry(&mut inner, uri),
                    }
                }
                drop(inner);

                flight.complete(result.clone());
                result
            }
        }
    }

    /// Drop the entry for `uri`, cancelling an incomplete parse. Used when a
    /// file's content changes.
    pub fn invalidate(&self, uri: &FileUri) {
        let mut inner = self.inner.lock();
        remove_entry(&mut inner, uri);
    }

    /// Drop every entry of a project and its semantic environment wholesale.
    /// Used when the classpath changes or the project is removed.
    pub fn invalidate_project(&self, project: &ProjectId) {
        let mut inner = self.inner.lock();
        let uris: Vec<FileUri> = inner
            .slots
            .iter()
            .filter(|(_, record)| &record.project == project)
            .map(|(uri, _)| uri.clone())
            .collect();
        for uri in &uris {
            remove_entry(&mut inner, uri);
        }
        inner.envs.remove(project);
        tracing::debug!(
            target = "lumen.cache",
            project = %project,
            evicted = uris.len(),
            "invalidated project environment"
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn run_parse(
        &self,
        analyzer: &Analyzer,
        uri: &FileUri,
        caller: &CancellationToken,
        flight: &CancellationToken,
    ) -> Result<SourceUnit, TreeError> {
        if caller.is_cancelled() || flight.is_cancelled() {
            return Err(TreeError::Cancelled);
        }
        let text = self
            .content
            .fetch(uri)
            .map_err(|err| TreeError::content(&err))?;
        if caller.is_cancelled() || flight.is_cancelled() {
            return Err(TreeError::Cancelled);
        }
        Ok(analyzer.parse(uri, &text)?)
    }

    fn purge_expired(&self, inner: &mut Inner, now: Instant) {
        loop {
            let expired = match inner.order.front() {
                Some(front) => match inner.slots.get(front) {
                    Some(record) => now.duration_since(record.last_access) >= self.config.idle_ttl,
                    None => true,
                },
                None => break,
            };
            if !expired {
                break;
            }
            let Some(uri) = inner.order.pop_front() else {
                break;
            };
            tracing::debug!(target = "lumen.cache", uri = %uri, "tree expired");
            remove_entry(inner, &uri);
        }
    }

    fn evict_over_capacity(&self, inner: &mut Inner) {
        while inner.slots.len() > self.config.capacity {
            let Some(uri) = inner.order.pop_front() else {
                break;
            };
            tracing::debug!(target = "lumen.cache", uri = %uri, "tree evicted");
            remove_entry(inner, &uri);
        }
    }
}

fn touch(order: &mut VecDeque<FileUri>, uri: &FileUri) {
    if let Some(pos) = order.iter().position(|k| k == uri) {
        order.remove(pos);
    }
    order.push_back(uri.clone());
}

fn remove_entry(inner: &mut Inner, uri: &FileUri) {
    if let Some(pos) = inner.order.iter().position(|k| k == uri) {
        inner.order.remove(pos);
    }
    let Some(record) = inner.slots.remove(uri) else {
        return;
    };
    if let Slot::InFlight { flight, .. } = &record.slot {
        flight.token.cancel();
    }
    if let Some(entry) = inner.envs.get_mut(&record.project) {
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            // Last tree referencing this environment is gone; release the
            // binding caches, which retain far more memory than the trees.
            entry.analyzer.reset();
        }
    }
}
