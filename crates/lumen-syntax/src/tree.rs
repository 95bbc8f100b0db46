use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use lumen_core::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclKind {
    Class,
    Interface,
    Enum,
    Record,
}

/// A marker annotation attached to a declaration or member, e.g. `@Component`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Name as written, without the leading `@`. May be qualified.
    pub name: String,
    pub range: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    Field,
    Method,
}

/// A field or method signature. Bodies and initializers are not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub kind: MemberKind,
    pub name: String,
    pub annotations: Vec<Annotation>,
    /// Every type name appearing in the signature: the declared type plus
    /// generic arguments and parameter types.
    pub referenced_types: Vec<String>,
    pub name_range: Range,
}

/// One type declaration, possibly with nested declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub kind: DeclKind,
    pub name: String,
    /// `package.Outer.Inner` style fully qualified name.
    pub qualified_name: String,
    pub annotations: Vec<Annotation>,
    pub supertypes: Vec<String>,
    pub members: Vec<Member>,
    pub nested: Vec<Declaration>,
    pub name_range: Range,
}

impl Declaration {
    /// Type names this declaration refers to, excluding builtins: supertypes,
    /// annotation types, member signature types. Nested declarations are not
    /// included; callers walk them separately.
    pub fn referenced_type_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for name in &self.supertypes {
            if !is_builtin_type(name) {
                out.insert(name.clone());
            }
        }
        for annotation in &self.annotations {
            out.insert(annotation.name.clone());
        }
        for member in &self.members {
            for annotation in &member.annotations {
                out.insert(annotation.name.clone());
            }
            for name in &member.referenced_types {
                if !is_builtin_type(name) {
                    out.insert(name.clone());
                }
            }
        }
        out
    }
}

/// A parsed source file at declaration granularity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceUnit {
    pub package: Option<String>,
    pub declarations: Vec<Declaration>,
}

impl SourceUnit {
    /// Walk all declarations depth-first, nested included.
    pub fn walk(&self, mut f: impl FnMut(&Declaration)) {
        fn visit(decl: &Declaration, f: &mut impl FnMut(&Declaration)) {
            f(decl);
            for nested in &decl.nested {
                visit(nested, f);
            }
        }
        for decl in &self.declarations {
            visit(decl, &mut f);
        }
    }

    /// Qualified names of every type declared in this unit, nested included.
    pub fn declared_type_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(|decl| {
            out.insert(decl.qualified_name.clone());
        });
        out
    }
}

/// Primitive and universally available types that never produce dependency
/// edges.
pub fn is_builtin_type(name: &str) -> bool {
    matches!(
        name,
        "void"
            | "boolean"
            | "byte"
            | "short"
            | "int"
            | "long"
            | "char"
            | "float"
            | "double"
            | "var"
            | "String"
            | "Object"
            | "Integer"
            | "Long"
            | "Boolean"
            | "Double"
            | "Float"
            | "Character"
            | "Byte"
            | "Short"
            | "Void"
            | "List"
            | "Set"
            | "Map"
            | "Optional"
    )
}
