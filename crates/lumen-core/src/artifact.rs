use serde::{Deserialize, Serialize};

use crate::{FileUri, Range, Timestamp, TypeName};

/// The artifact kinds one extraction pass produces. Cached independently,
/// always invalidated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactKind {
    Symbols,
    Components,
    Diagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Class,
    Interface,
    Enum,
    Record,
    Method,
    Field,
    Marker,
}

/// A named declarative construct surfaced to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub uri: FileUri,
    pub range: Range,
}

/// A declared domain object (the original's "bean"): a marker-annotated type
/// registered under a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub type_name: TypeName,
    pub uri: FileUri,
    pub range: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Information,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: Severity,
    pub message: String,
}

/// Cache entries carry the producing file so bulk storage can be filtered
/// per file.
pub trait FileTagged {
    fn file(&self) -> &FileUri;
}

/// A symbol tagged with its producing file and the modification stamp at
/// extraction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSymbol {
    pub uri: FileUri,
    pub last_modified: Timestamp,
    pub symbol: Symbol,
}

impl FileTagged for CachedSymbol {
    fn file(&self) -> &FileUri {
        &self.uri
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedComponent {
    pub uri: FileUri,
    pub last_modified: Timestamp,
    pub component: Component,
}

impl FileTagged for CachedComponent {
    fn file(&self) -> &FileUri {
        &self.uri
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDiagnostic {
    pub uri: FileUri,
    pub last_modified: Timestamp,
    pub diagnostic: Diagnostic,
}

impl FileTagged for CachedDiagnostic {
    fn file(&self) -> &FileUri {
        &self.uri
    }
}
