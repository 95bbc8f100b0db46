use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use lumen_core::{FileUri, TypeName};

use crate::parser::{parse, ParseError};
use crate::tree::{is_builtin_type, DeclKind, SourceUnit};

/// Where a type name resolves to in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeBinding {
    pub qualified_name: TypeName,
    pub kind: DeclKind,
    pub file: FileUri,
}

#[derive(Debug, Default)]
struct Bindings {
    /// Keyed by both simple and qualified name.
    by_name: HashMap<String, TypeBinding>,
    /// Keys installed per file, so a re-scan replaces exactly its own
    /// bindings.
    by_file: HashMap<FileUri, Vec<String>>,
}

/// Per-project semantic environment: the parser plus the binding table that
/// resolves type references across files.
///
/// The binding table is the expensive retained state. The parse-tree cache
/// calls [`Analyzer::reset`] when the last cached tree for the project is
/// evicted, releasing it; classpath knowledge is configuration and survives
/// resets.
#[derive(Debug, Default)]
pub struct Analyzer {
    classpath_types: HashSet<String>,
    state: RwLock<Bindings>,
    resets: AtomicU64,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// An environment that can additionally resolve the given classpath
    /// types. Classpath discovery itself happens outside the core.
    pub fn with_classpath_types(types: impl IntoIterator<Item = TypeName>) -> Self {
        let mut classpath_types = HashSet::new();
        for name in types {
            classpath_types.insert(name.simple_name().to_string());
            classpath_types.insert(name.as_str().to_string());
        }
        Self {
            classpath_types,
            state: RwLock::new(Bindings::default()),
            resets: AtomicU64::new(0),
        }
    }

    pub fn parse(&self, uri: &FileUri, text: &str) -> Result<SourceUnit, ParseError> {
        tracing::debug!(target = "lumen.syntax", uri = %uri, "parse");
        parse(text)
    }

    /// Record the types declared by `file`, replacing whatever the previous
    /// scan of that file installed.
    pub fn install(&self, file: &FileUri, unit: &SourceUnit) {
        let mut state = self.state.write();
        Self::remove_owned(&mut state, file);

        let mut keys = Vec::new();
        unit.walk(|decl| {
            let binding = TypeBinding {
                qualified_name: TypeName::new(decl.qualified_name.as_str()),
                kind: decl.kind,
                file: file.clone(),
            };
            for key in [decl.qualified_name.clone(), decl.name.clone()] {
                state.by_name.insert(key.clone(), binding.clone());
                keys.push(key);
            }
        });
        state.by_file.insert(file.clone(), keys);
    }

    /// Drop the bindings a removed file contributed.
    pub fn forget(&self, file: &FileUri) {
        let mut state = self.state.write();
        Self::remove_owned(&mut state, file);
    }

    fn remove_owned(state: &mut Bindings, file: &FileUri) {
        let Some(keys) = state.by_file.remove(file) else {
            return;
        };
        for key in keys {
            if state.by_name.get(&key).is_some_and(|b| &b.file == file) {
                state.by_name.remove(&key);
            }
        }
    }

    /// Every name (simple and qualified) currently bound to declarations in
    /// `file`. The indexer folds these into the changed-type set so renames
    /// propagate to files that referenced the old name.
    pub fn declared_by(&self, file: &FileUri) -> std::collections::BTreeSet<TypeName> {
        self.state
            .read()
            .by_file
            .get(file)
            .map(|keys| keys.iter().map(|key| TypeName::new(key.as_str())).collect())
            .unwrap_or_default()
    }

    /// Whether `name` resolves at all: builtin, classpath, or source-declared.
    pub fn resolves(&self, name: &str) -> bool {
        is_builtin_type(name)
            || self.classpath_types.contains(name)
            || self.state.read().by_name.contains_key(name)
    }

    /// The source declaration a name resolves to, if any.
    pub fn binding(&self, name: &str) -> Option<TypeBinding> {
        self.state.read().by_name.get(name).cloned()
    }

    pub fn binding_count(&self) -> usize {
        self.state.read().by_name.len()
    }

    /// Release the binding table. Invoked by the parse-tree cache when the
    /// last entry referencing this environment is evicted.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.by_name.clear();
        state.by_file.clear();
        self.resets.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target = "lumen.syntax", "environment reset");
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> FileUri {
        FileUri::new(s)
    }

    #[test]
    fn install_then_resolve_by_simple_and_qualified_name() {
        let analyzer = Analyzer::new();
        let unit = analyzer
            .parse(&uri("/src/Foo.java"), "package demo; class Foo {}")
            .unwrap();
        analyzer.install(&uri("/src/Foo.java"), &unit);

        assert!(analyzer.resolves("Foo"));
        assert!(analyzer.resolves("demo.Foo"));
        assert!(!analyzer.resolves("Bar"));
        assert_eq!(
            analyzer.binding("Foo").unwrap().qualified_name.as_str(),
            "demo.Foo"
        );
    }

    #[test]
    fn reinstall_replaces_a_files_bindings() {
        let analyzer = Analyzer::new();
        let file = uri("/src/A.java");

        let before = analyzer.parse(&file, "class Foo {}").unwrap();
        analyzer.install(&file, &before);
        assert!(analyzer.resolves("Foo"));

        let after = analyzer.parse(&file, "class Bar {}").unwrap();
        analyzer.install(&file, &after);
        assert!(!analyzer.resolves("Foo"));
        assert!(analyzer.resolves("Bar"));
    }

    #[test]
    fn reinstall_keeps_other_files_bindings() {
        let analyzer = Analyzer::new();
        let a = uri("/src/A.java");
        let b = uri("/src/B.java");

        // Both files declare `Dup`; re-scanning A must not drop B's claim.
        let unit_a = analyzer.parse(&a, "class Dup {} class OnlyA {}").unwrap();
        analyzer.install(&a, &unit_a);
        let unit_b = analyzer.parse(&b, "class Dup {}").unwrap();
        analyzer.install(&b, &unit_b);

        let rescanned_a = analyzer.parse(&a, "class OnlyA {}").unwrap();
        analyzer.install(&a, &rescanned_a);
        assert!(analyzer.resolves("Dup"));
    }

    #[test]
    fn classpath_types_resolve_and_survive_reset() {
        let analyzer =
            Analyzer::with_classpath_types([TypeName::new("org.framework.Component")]);
        assert!(analyzer.resolves("Component"));
        assert!(analyzer.resolves("org.framework.Component"));

        analyzer.reset();
        assert!(analyzer.resolves("Component"));
        assert_eq!(analyzer.reset_count(), 1);
    }

    #[test]
    fn reset_clears_source_bindings() {
        let analyzer = Analyzer::new();
        let file = uri("/src/A.java");
        let unit = analyzer.parse(&file, "class Foo {}").unwrap();
        analyzer.install(&file, &unit);
        assert_eq!(analyzer.binding_count(), 2);

        analyzer.reset();
        assert_eq!(analyzer.binding_count(), 0);
        assert!(!analyzer.resolves("Foo"));
    }

    #[test]
    fn forget_drops_only_that_files_bindings() {
        let analyzer = Analyzer::new();
        let a = uri("/src/A.java");
        let b = uri("/src/B.java");
        let unit_a = analyzer.parse(&a, "class Foo {}").unwrap();
        let unit_b = analyzer.parse(&b, "class Bar {}").unwrap();
        analyzer.install(&a, &unit_a);
        analyzer.install(&b, &unit_b);

        analyzer.forget(&a);
        assert!(!analyzer.resolves("Foo"));
        assert!(analyzer.resolves("Bar"));
    }
}
