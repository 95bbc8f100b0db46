use std::collections::BTreeSet;

use lumen_core::{
    CachedComponent, CachedDiagnostic, CachedSymbol, Component, Diagnostic, FileUri, Project,
    Severity, Symbol, SymbolKind, Timestamp, TypeName,
};
use lumen_syntax::{Analyzer, Declaration, SourceUnit};

/// Which of the two scan passes is running.
///
/// Pass one may encounter references to types declared in sibling files that
/// have not been scanned yet; such files are queued and extracted again in
/// pass two, after the batch's declarations were installed into the semantic
/// environment. Pass-two output for a file is authoritative and replaces its
/// pass-one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPass {
    One,
    Two,
}

/// Everything one extraction of one file produced.
#[derive(Debug, Default)]
pub struct ExtractionOutput {
    pub symbols: Vec<CachedSymbol>,
    pub components: Vec<CachedComponent>,
    pub diagnostics: Vec<CachedDiagnostic>,
    /// Referenced type identifiers, resolved to qualified names where
    /// possible.
    pub dependencies: BTreeSet<TypeName>,
    /// Names (simple and qualified) of the types this file declares.
    pub declared_types: BTreeSet<TypeName>,
    pub needs_second_pass: bool,
}

/// Mutable view handed to extraction strategies while walking declarations.
pub struct ExtractionContext<'a> {
    project: &'a Project,
    uri: &'a FileUri,
    last_modified: Timestamp,
    pass: ScanPass,
    analyzer: &'a Analyzer,
    output: ExtractionOutput,
}

impl<'a> ExtractionContext<'a> {
    pub fn project(&self) -> &Project {
        self.project
    }

    pub fn uri(&self) -> &FileUri {
        self.uri
    }

    pub fn pass(&self) -> ScanPass {
        self.pass
    }

    pub fn analyzer(&self) -> &Analyzer {
        self.analyzer
    }

    pub fn add_symbol(&mut self, symbol: Symbol) {
        self.output.symbols.push(CachedSymbol {
            uri: self.uri.clone(),
            last_modified: self.last_modified,
            symbol,
        });
    }

    pub fn add_component(&mut self, component: Component) {
        self.output.components.push(CachedComponent {
            uri: self.uri.clone(),
            last_modified: self.last_modified,
            component,
        });
    }

    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.output.diagnostics.push(CachedDiagnostic {
            uri: self.uri.clone(),
            last_modified: self.last_modified,
            diagnostic,
        });
    }

    pub fn record_dependency(&mut self, type_name: TypeName) {
        self.output.dependencies.insert(type_name);
    }

    /// Queue this file for pass two; only meaningful during pass one.
    pub fn request_second_pass(&mut self) {
        if self.pass == ScanPass::One {
            self.output.needs_second_pass = true;
        }
    }
}

/// Pluggable per-declaration extractor. The marker-specific rules live
/// outside the core; each strategy inspects one declaration and emits zero or
/// more artifacts into the context.
pub trait ExtractionStrategy: Send + Sync {
    fn extract(&self, decl: &Declaration, ctx: &mut ExtractionContext<'_>);
}

/// Run one extraction pass over a parsed unit: structural bookkeeping
/// (declared types, dependency edges, resolution checks) plus all strategies.
pub fn run_extraction(
    strategies: &[std::sync::Arc<dyn ExtractionStrategy>],
    project: &Project,
    uri: &FileUri,
    last_modified: Timestamp,
    unit: &SourceUnit,
    analyzer: &Analyzer,
    pass: ScanPass,
) -> ExtractionOutput {
    let mut ctx = ExtractionContext {
        project,
        uri,
        last_modified,
        pass,
        analyzer,
        output: ExtractionOutput::default(),
    };

    unit.walk(|decl| {
        ctx.output
            .declared_types
            .insert(TypeName::new(decl.qualified_name.as_str()));
        ctx.output
            .declared_types
            .insert(TypeName::new(decl.name.as_str()));

        for name in decl.referenced_type_names() {
            match analyzer.binding(&name) {
                Some(binding) => ctx.record_dependency(binding.qualified_name),
                None => {
                    ctx.record_dependency(TypeName::new(name.as_str()));
                    if !analyzer.resolves(&name) {
                        match pass {
                            ScanPass::One => ctx.request_second_pass(),
                            ScanPass::Two => ctx.add_diagnostic(Diagnostic {
                                range: decl.name_range,
                                severity: Severity::Error,
                                message: format!("cannot resolve type {name}"),
                            }),
                        }
                    }
                }
            }
        }

        for strategy in strategies {
            strategy.extract(decl, &mut ctx);
        }
    });

    ctx.output
}

/// Fallback extraction for marker annotations no domain-specific strategy
/// claims: every annotated declaration surfaces as a marker symbol, and
/// marker-annotated types register as components under their decapitalized
/// name.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerSymbols;

impl ExtractionStrategy for MarkerSymbols {
    fn extract(&self, decl: &Declaration, ctx: &mut ExtractionContext<'_>) {
        let uri = ctx.uri().clone();
        for annotation in &decl.annotations {
            ctx.add_symbol(Symbol {
                name: format!("@{} {}", annotation.name, decl.name),
                kind: SymbolKind::Marker,
                uri: uri.clone(),
                range: annotation.range,
            });
        }
        for member in &decl.members {
            for annotation in &member.annotations {
                ctx.add_symbol(Symbol {
                    name: format!("@{} {}.{}", annotation.name, decl.name, member.name),
                    kind: SymbolKind::Marker,
                    uri: uri.clone(),
                    range: annotation.range,
                });
            }
        }

        if !decl.annotations.is_empty() {
            ctx.add_component(Component {
                name: decapitalize(&decl.name),
                type_name: TypeName::new(decl.qualified_name.as_str()),
                uri,
                range: decl.name_range,
            });
        }
    }
}

fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn extract(text: &str, analyzer: &Analyzer, pass: ScanPass) -> ExtractionOutput {
        let project = Project::new("demo");
        let uri = FileUri::new("/src/Test.java");
        let unit = analyzer.parse(&uri, text).unwrap();
        let strategies: Vec<Arc<dyn ExtractionStrategy>> = vec![Arc::new(MarkerSymbols)];
        run_extraction(
            &strategies,
            &project,
            &uri,
            Timestamp::from_millis(1),
            &unit,
            analyzer,
            pass,
        )
    }

    #[test]
    fn marker_symbols_and_components_are_emitted() {
        let analyzer = Analyzer::new();
        let out = extract(
            "package demo; @Component class FooService { @Inject Repo repo; }",
            &analyzer,
            ScanPass::One,
        );

        let names: Vec<&str> = out.symbols.iter().map(|s| s.symbol.name.as_str()).collect();
        assert!(names.contains(&"@Component FooService"));
        assert!(names.contains(&"@Inject FooService.repo"));

        assert_eq!(out.components.len(), 1);
        assert_eq!(out.components[0].component.name, "fooService");
        assert_eq!(
            out.components[0].component.type_name.as_str(),
            "demo.FooService"
        );
    }

    #[test]
    fn unresolved_reference_requests_second_pass_in_pass_one() {
        let analyzer = Analyzer::new();
        let out = extract("class B extends Foo {}", &analyzer, ScanPass::One);
        assert!(out.needs_second_pass);
        assert!(out.diagnostics.is_empty());
        assert!(out.dependencies.contains(&TypeName::new("Foo")));
    }

    #[test]
    fn unresolved_reference_becomes_diagnostic_in_pass_two() {
        let analyzer = Analyzer::new();
        let out = extract("class B extends Foo {}", &analyzer, ScanPass::Two);
        assert!(!out.needs_second_pass);
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0]
            .diagnostic
            .message
            .contains("cannot resolve type Foo"));
    }

    #[test]
    fn resolved_references_record_qualified_dependency() {
        let analyzer = Analyzer::new();
        let defining = FileUri::new("/src/Foo.java");
        let unit = analyzer
            .parse(&defining, "package demo; class Foo {}")
            .unwrap();
        analyzer.install(&defining, &unit);

        let out = extract("class B extends Foo {}", &analyzer, ScanPass::One);
        assert!(!out.needs_second_pass);
        assert!(out.dependencies.contains(&TypeName::new("demo.Foo")));
    }

    #[test]
    fn declared_types_cover_simple_and_qualified_names() {
        let analyzer = Analyzer::new();
        let out = extract("package p; class A { class In {} }", &analyzer, ScanPass::One);
        assert!(out.declared_types.contains(&TypeName::new("p.A")));
        assert!(out.declared_types.contains(&TypeName::new("A")));
        assert!(out.declared_types.contains(&TypeName::new("p.A.In")));
        assert!(out.declared_types.contains(&TypeName::new("In")));
    }
}
