//! Reconcile scheduler scenarios: debounce collapsing, lifecycle events and
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use lumen_cache::{ParseTreeCache, TreeCacheConfig};
use lumen_core::{FileUri, Project, ProjectId, Timestamp, TypeName};
use lumen_index::{
    IndexerConfig, MarkerSymbols, ReconcileConfig, ReconcileScheduler, SourceIndexer, SymbolStore,
};
use lumen_scheduler::Scheduler;
use lumen_syntax::Analyzer;
use lumen_vfs::{ChangeEvent, StaticContent};

// Generous margins: debounce correctness is asserted by counting runs, and
// loaded CI machines stretch sleeps.
const DEBOUNCE: Duration = Duration::from_millis(250);
const SETTLE: Duration = Duration::from_millis(900);

struct Fixture {
    dir: tempfile::TempDir,
    _scheduler: Scheduler,
    provider: Arc<StaticContent>,
    store: Arc<SymbolStore>,
    reconciler: ReconcileScheduler,
    project: Project,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Scheduler::default();
        let provider = Arc::new(StaticContent::new());
        let store = Arc::new(SymbolStore::new());

        let trees = Arc::new(ParseTreeCache::new(
            TreeCacheConfig::default(),
            provider.clone(),
            |_project| {
                Ok(Arc::new(Analyzer::with_classpath_types([TypeName::new(
                    "Component",
                )])))
            },
        ));
        let indexer = Arc::new(SourceIndexer::new(
            IndexerConfig::default(),
            trees,
            provider.clone(),
            vec![Arc::new(MarkerSymbols)],
            store.clone(),
            scheduler.progress(),
        ));
        let reconciler = ReconcileScheduler::new(
            &scheduler,
            indexer,
            ReconcileConfig { debounce: DEBOUNCE },
        );
        let project = Project::new("demo").with_source_root(dir.path());

        Self {
            dir,
            _scheduler: scheduler,
            provider,
            store,
            reconciler,
            project,
        }
    }

    fn add_file(&self, name: &str, text: &str, stamp: u64) -> FileUri {
        let path = self.dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        let uri = FileUri::from(path.as_path());
        self.provider
            .insert(uri.as_str(), text, Timestamp::from_millis(stamp));
        uri
    }

    fn edit_file(&self, uri: &FileUri, text: &str, stamp: u64) {
        self.provider
            .insert(uri.as_str(), text, Timestamp::from_millis(stamp));
    }

    fn id(&self) -> &ProjectId {
        &self.project.id
    }

    fn create_project_and_settle(&self) {
        self.reconciler
            .notify(ChangeEvent::ProjectCreated(self.project.clone()));
        std::thread::sleep(SETTLE);
    }

    fn symbol_names(&self) -> Vec<String> {
        self.store
            .symbols(self.id())
            .into_iter()
            .map(|s| s.name)
            .collect()
    }
}

#[test]
fn project_creation_runs_a_full_index() {
    let fx = Fixture::new();
    fx.add_file("Foo.java", "package demo; @Component class Foo {}", 10);

    fx.create_project_and_settle();

    assert!(fx.symbol_names().contains(&"@Component Foo".to_string()));
    assert_eq!(fx.reconciler.pending_count(), 0);
}

#[test]
fn rapid_edits_collapse_into_one_run_with_latest_content() {
    let fx = Fixture::new();
    let a = fx.add_file("Foo.java", "package demo; @Component class Foo {}", 10);
    fx.create_project_and_settle();
    let published = fx.store.publish_count();

    // A burst of edits inside the debounce window; each event supersedes the
    // previous pending timer.
    for (round, name) in ["Edit1", "Edit2", "Edit3", "Edit4", "Edit5"]
        .iter()
        .enumerate()
    {
        fx.edit_file(
            &a,
            &format!("package demo; @Component class {name} {{}}"),
            20 + round as u64,
        );
        fx.reconciler.notify(ChangeEvent::FileChanged {
            project: fx.id().clone(),
            uri: a.clone(),
        });
        std::thread::sleep(Duration::from_millis(15));
    }
    std::thread::sleep(SETTLE);

    // Exactly one re-index ran, and it saw the state after the last event.
    assert_eq!(fx.store.publish_count(), published + 1);
    assert!(fx.symbol_names().contains(&"@Component Edit5".to_string()));
    assert!(!fx.symbol_names().contains(&"@Component Edit1".to_string()));
}

#[test]
fn file_deletion_removes_published_artifacts() {
    let fx = Fixture::new();
    let a = fx.add_file("Foo.java", "package demo; @Component class Foo {}", 10);
    fx.create_project_and_settle();
    assert!(!fx.symbol_names().is_empty());

    fx.provider.remove(&a);
    let _ = std::fs::remove_file(fx.dir.path().join("Foo.java"));
    fx.reconciler.notify(ChangeEvent::FileDeleted {
        project: fx.id().clone(),
        uri: a.clone(),
    });
    std::thread::sleep(SETTLE);

    assert!(fx.store.file_artifacts(fx.id(), &a).is_none());
}

#[test]
fn project_deletion_cancels_pending_work_and_purges() {
    let fx = Fixture::new();
    let a = fx.add_file("Foo.java", "package demo; @Component class Foo {}", 10);
    fx.create_project_and_settle();
    let published = fx.store.publish_count();

    fx.edit_file(&a, "package demo; @Component class Changed {}", 20);
    fx.reconciler.notify(ChangeEvent::FileChanged {
        project: fx.id().clone(),
        uri: a.clone(),
    });
    fx.reconciler
        .notify(ChangeEvent::ProjectDeleted(fx.id().clone()));
    std::thread::sleep(SETTLE);

    // The pending run never fired and everything keyed to the project is
    // gone.
    assert_eq!(fx.store.publish_count(), published);
    assert!(fx.store.symbols(fx.id()).is_empty());
}

#[test]
fn shutdown_cancels_all_pending_timers() {
    let fx = Fixture::new();
    let a = fx.add_file("Foo.java", "package demo; @Component class Foo {}", 10);
    fx.create_project_and_settle();
    let published = fx.store.publish_count();

    fx.edit_file(&a, "package demo; @Component class Changed {}", 20);
    fx.reconciler.notify(ChangeEvent::FileChanged {
        project: fx.id().clone(),
        uri: a.clone(),
    });
    fx.reconciler.shutdown();
    std::thread::sleep(SETTLE);

    assert_eq!(fx.store.publish_count(), published);
    assert_eq!(fx.reconciler.pending_count(), 0);
}

#[test]
fn events_for_unknown_projects_are_ignored() {
    let fx = Fixture::new();
    fx.add_file("Foo.java", "package demo; @Component class Foo {}", 10);

    fx.reconciler.notify(ChangeEvent::FileChanged {
        project: ProjectId::new("nobody"),
        uri: FileUri::new("/x/Foo.java"),
    });
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(fx.store.publish_count(), 0);
    assert_eq!(fx.reconciler.pending_count(), 0);
}
