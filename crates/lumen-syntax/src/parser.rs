use lumen_core::Range;

use crate::tree::{
    Annotation, DeclKind, Declaration, Member, MemberKind, SourceUnit,
};

/// Source could not be turned into a declaration tree.
///
/// Parse failures are expected during editing; callers isolate them per file
/// and retry on the next change, so this error carries just enough to log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at line {line}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
}

pub fn parse(text: &str) -> Result<SourceUnit, ParseError> {
    let tokens = lex(text)?;
    Parser { tokens, pos: 0 }.parse_unit()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Ident,
    At,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Lt,
    Gt,
    Semi,
    Comma,
    Dot,
    Eq,
    Other,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: u32,
    col: u32,
}

fn lex(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line: u32 = 0;
    let mut col: u32 = 0;

    macro_rules! bump {
        () => {{
            let c = chars.next();
            if c == Some('\n') {
                line += 1;
                col = 0;
            } else if c.is_some() {
                col += 1;
            }
            c
        }};
    }

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            bump!();
            continue;
        }
        if c == '/' {
            let (start_line, start_col) = (line, col);
            bump!();
            match chars.peek() {
                Some('/') => {
                    while let Some(&n) = chars.peek() {
                        if n == '\n' {
                            break;
                        }
                        bump!();
                    }
                }
                Some('*') => {
                    bump!();
                    let mut closed = false;
                    while let Some(c) = bump!() {
                        if c == '*' && chars.peek() == Some(&'/') {
                            bump!();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(ParseError {
                            message: "unterminated block comment".to_string(),
                            line: start_line,
                        });
                    }
                }
                _ => tokens.push(Token {
                    kind: TokenKind::Other,
                    text: "/".to_string(),
                    line: start_line,
                    col: start_col,
                }),
            }
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            let start_line = line;
            bump!();
            let mut closed = false;
            while let Some(c) = bump!() {
                if c == '\\' {
                    bump!();
                } else if c == quote {
                    closed = true;
                    break;
                } else if c == '\n' {
                    break;
                }
            }
            if !closed {
                return Err(ParseError {
                    message: "unterminated literal".to_string(),
                    line: start_line,
                });
            }
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            let (start_line, start_col) = (line, col);
            let mut ident = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_alphanumeric() || n == '_' || n == '$' {
                    ident.push(n);
                    bump!();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Ident,
                text: ident,
                line: start_line,
                col: start_col,
            });
            continue;
        }
        if c.is_ascii_digit() {
            // Number literals only ever appear in skipped positions.
            while let Some(&n) = chars.peek() {
                if n.is_alphanumeric() || n == '.' || n == '_' {
                    bump!();
                } else {
                    break;
                }
            }
            continue;
        }
        let kind = match c {
            '@' => TokenKind::At,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '=' => TokenKind::Eq,
            _ => TokenKind::Other,
        };
        let (start_line, start_col) = (line, col);
        bump!();
        tokens.push(Token {
            kind,
            text: c.to_string(),
            line: start_line,
            col: start_col,
        });
    }

    Ok(tokens)
}

const MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "static",
    "final",
    "abstract",
    "sealed",
    "default",
    "native",
    "synchronized",
    "transient",
    "volatile",
    "strictfp",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn bump(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_ident(&self, text: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Ident && t.text == text)
    }

    fn current_line(&self) -> u32 {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.current_line(),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.peek_kind() == Some(kind) {
            let token = self.tokens[self.pos].clone();
            self.pos += 1;
            Ok(token)
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Token, ParseError> {
        self.expect(TokenKind::Ident, what)
    }

    fn parse_unit(&mut self) -> Result<SourceUnit, ParseError> {
        let mut unit = SourceUnit::default();

        if self.at_ident("package") {
            self.bump();
            unit.package = Some(self.parse_qualified("package name")?.0);
            self.expect(TokenKind::Semi, "`;` after package declaration")?;
        }
        while self.at_ident("import") {
            self.bump();
            while let Some(t) = self.peek() {
                let done = t.kind == TokenKind::Semi;
                self.bump();
                if done {
                    break;
                }
            }
        }

        let prefix = unit.package.clone().unwrap_or_default();
        while self.peek().is_some() {
            if self.peek_kind() == Some(TokenKind::Semi) {
                self.bump();
                continue;
            }
            let decl = self.parse_declaration(&prefix)?;
            unit.declarations.push(decl);
        }

        Ok(unit)
    }

    fn parse_annotations(&mut self) -> Result<Vec<Annotation>, ParseError> {
        let mut annotations = Vec::new();
        while self.peek_kind() == Some(TokenKind::At) {
            self.bump();
            let (name, token) = self.parse_qualified("annotation name")?;
            let range = ident_range(&token, &name);
            if self.peek_kind() == Some(TokenKind::LParen) {
                self.skip_balanced(TokenKind::LParen, TokenKind::RParen)?;
            }
            annotations.push(Annotation { name, range });
        }
        Ok(annotations)
    }

    fn skip_modifiers(&mut self) {
        while let Some(t) = self.peek() {
            if t.kind == TokenKind::Ident && MODIFIERS.contains(&t.text.as_str()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn decl_kind(&self) -> Option<DeclKind> {
        let t = self.peek()?;
        if t.kind != TokenKind::Ident {
            return None;
        }
        match t.text.as_str() {
            "class" => Some(DeclKind::Class),
            "interface" => Some(DeclKind::Interface),
            "enum" => Some(DeclKind::Enum),
            "record" => Some(DeclKind::Record),
            _ => None,
        }
    }

    fn parse_declaration(&mut self, prefix: &str) -> Result<Declaration, ParseError> {
        let annotations = self.parse_annotations()?;
        self.skip_modifiers();

        let Some(kind) = self.decl_kind() else {
            return Err(self.error("expected type declaration"));
        };
        self.bump();

        let name_token = self.expect_ident("type name")?;
        let name = name_token.text.clone();
        let name_range = ident_range(&name_token, &name);
        let qualified_name = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        if self.peek_kind() == Some(TokenKind::Lt) {
            self.skip_balanced(TokenKind::Lt, TokenKind::Gt)?;
        }

        let mut members = Vec::new();
        if kind == DeclKind::Record && self.peek_kind() == Some(TokenKind::LParen) {
            self.parse_record_header(&mut members)?;
        }

        let mut supertypes = Vec::new();
        for clause in ["extends", "implements"] {
            if self.at_ident(clause) {
                self.bump();
                loop {
                    let (base, _refs) = self.parse_type_ref()?;
                    supertypes.push(base);
                    if self.peek_kind() == Some(TokenKind::Comma) {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        if self.at_ident("permits") {
            self.bump();
            loop {
                self.parse_type_ref()?;
                if self.peek_kind() == Some(TokenKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }

        self.expect(TokenKind::LBrace, "`{` to open type body")?;

        let mut decl = Declaration {
            kind,
            name,
            qualified_name,
            annotations,
            supertypes,
            members,
            nested: Vec::new(),
            name_range,
        };

        if kind == DeclKind::Enum {
            self.skip_enum_constants()?;
        }
        self.parse_members(&mut decl)?;
        self.expect(TokenKind::RBrace, "`}` to close type body")?;

        Ok(decl)
    }

    fn parse_record_header(&mut self, members: &mut Vec<Member>) -> Result<(), ParseError> {
        self.expect(TokenKind::LParen, "`(` to open record header")?;
        while self.peek_kind() != Some(TokenKind::RParen) {
            let annotations = self.parse_annotations()?;
            self.skip_modifiers();
            let (base, mut refs) = self.parse_type_ref()?;
            refs.insert(0, base);
            let name_token = self.expect_ident("record component name")?;
            let name = name_token.text.clone();
            members.push(Member {
                kind: MemberKind::Field,
                name_range: ident_range(&name_token, &name),
                name,
                annotations,
                referenced_types: refs,
            });
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.bump();
            }
        }
        self.expect(TokenKind::RParen, "`)` to close record header")?;
        Ok(())
    }

    /// Enum bodies open with a constant list before regular members.
    fn skip_enum_constants(&mut self) -> Result<(), ParseError> {
        loop {
            let looks_like_constant = match (self.peek(), self.peek_ahead(1)) {
                (Some(t), Some(n)) if t.kind == TokenKind::Ident => matches!(
                    n.kind,
                    TokenKind::Comma
                        | TokenKind::Semi
                        | TokenKind::RBrace
                        | TokenKind::LParen
                        | TokenKind::LBrace
                ),
                (Some(t), None) => t.kind == TokenKind::Ident,
                _ => false,
            };
            if !looks_like_constant {
                return Ok(());
            }
            self.bump();
            if self.peek_kind() == Some(TokenKind::LParen) {
                self.skip_balanced(TokenKind::LParen, TokenKind::RParen)?;
            }
            if self.peek_kind() == Some(TokenKind::LBrace) {
                self.skip_balanced(TokenKind::LBrace, TokenKind::RBrace)?;
            }
            match self.peek_kind() {
                Some(TokenKind::Comma) => {
                    self.bump();
                }
                Some(TokenKind::Semi) => {
                    self.bump();
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_members(&mut self, decl: &mut Declaration) -> Result<(), ParseError> {
        loop {
            match self.peek_kind() {
                None => return Err(self.error("unexpected end of file in type body")),
                Some(TokenKind::RBrace) => return Ok(()),
                Some(TokenKind::Semi) => {
                    self.bump();
                    continue;
                }
                Some(TokenKind::LBrace) => {
                    // Initializer block.
                    self.skip_balanced(TokenKind::LBrace, TokenKind::RBrace)?;
                    continue;
                }
                _ => {}
            }

            let annotations = self.parse_annotations()?;
            self.skip_modifiers();

            if self.peek_kind() == Some(TokenKind::LBrace) {
                // `static { ... }` initializer.
                self.skip_balanced(TokenKind::LBrace, TokenKind::RBrace)?;
                continue;
            }

            if self.decl_kind().is_some() {
                let nested = self.parse_declaration(&decl.qualified_name)?;
                decl.nested.push(nested);
                continue;
            }

            let member = self.parse_member(annotations)?;
            decl.members.push(member);
        }
    }

    fn parse_member(&mut self, annotations: Vec<Annotation>) -> Result<Member, ParseError> {
        if self.peek_kind() == Some(TokenKind::Lt) {
            // Method-level type parameters.
            self.skip_balanced(TokenKind::Lt, TokenKind::Gt)?;
            self.skip_modifiers();
        }

        let (base, mut refs) = self.parse_type_ref()?;

        // Constructor: the "type" is immediately followed by the parameter
        // list.
        if self.peek_kind() == Some(TokenKind::LParen) {
            let name_range = Range::on_line(self.current_line(), 0, 0);
            self.parse_parameters(&mut refs)?;
            self.finish_method()?;
            return Ok(Member {
                kind: MemberKind::Method,
                name: base.rsplit('.').next().unwrap_or(&base).to_string(),
                annotations,
                referenced_types: refs,
                name_range,
            });
        }

        refs.insert(0, base);
        let name_token = self.expect_ident("member name")?;
        let name = name_token.text.clone();
        let name_range = ident_range(&name_token, &name);

        match self.peek_kind() {
            Some(TokenKind::LParen) => {
                self.parse_parameters(&mut refs)?;
                self.finish_method()?;
                Ok(Member {
                    kind: MemberKind::Method,
                    name,
                    annotations,
                    referenced_types: refs,
                    name_range,
                })
            }
            _ => {
                self.skip_field_initializer()?;
                Ok(Member {
                    kind: MemberKind::Field,
                    name,
                    annotations,
                    referenced_types: refs,
                    name_range,
                })
            }
        }
    }

    fn parse_parameters(&mut self, refs: &mut Vec<String>) -> Result<(), ParseError> {
        self.expect(TokenKind::LParen, "`(` to open parameter list")?;
        while self.peek_kind() != Some(TokenKind::RParen) {
            if self.peek().is_none() {
                return Err(self.error("unexpected end of file in parameter list"));
            }
            self.parse_annotations()?;
            self.skip_modifiers();
            let (base, inner) = self.parse_type_ref()?;
            refs.push(base);
            refs.extend(inner);
            while self.peek_kind() == Some(TokenKind::Dot) {
                self.bump();
            }
            if self.peek_kind() == Some(TokenKind::Ident) {
                self.bump();
            }
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.bump();
            }
        }
        self.expect(TokenKind::RParen, "`)` to close parameter list")?;
        Ok(())
    }

    fn finish_method(&mut self) -> Result<(), ParseError> {
        if self.at_ident("throws") {
            self.bump();
            loop {
                self.parse_type_ref()?;
                if self.peek_kind() == Some(TokenKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        match self.peek_kind() {
            Some(TokenKind::LBrace) => {
                self.skip_balanced(TokenKind::LBrace, TokenKind::RBrace)
            }
            Some(TokenKind::Semi) => {
                self.bump();
                Ok(())
            }
            _ => {
                // `default <expr>;` on annotation members and similar tails.
                self.skip_field_initializer()
            }
        }
    }

    fn skip_field_initializer(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                None => return Err(self.error("unexpected end of file in member")),
                Some(TokenKind::Semi) if depth == 0 => {
                    self.bump();
                    return Ok(());
                }
                Some(TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket) => {
                    depth += 1;
                    self.bump();
                }
                Some(TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket) => {
                    if depth == 0 {
                        return Err(self.error("unbalanced delimiter in member"));
                    }
                    depth -= 1;
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_qualified(&mut self, what: &str) -> Result<(String, Token), ParseError> {
        let first = self.expect_ident(what)?;
        let mut name = first.text.clone();
        while self.peek_kind() == Some(TokenKind::Dot)
            && self.peek_ahead(1).map(|t| t.kind) == Some(TokenKind::Ident)
        {
            self.bump();
            let segment = self.expect_ident(what)?;
            name.push('.');
            name.push_str(&segment.text);
        }
        Ok((name, first))
    }

    /// Parses a type reference, returning the base name as written and any
    /// type names mentioned in generic arguments.
    fn parse_type_ref(&mut self) -> Result<(String, Vec<String>), ParseError> {
        let (base, _token) = self.parse_qualified("type name")?;
        let mut refs = Vec::new();

        if self.peek_kind() == Some(TokenKind::Lt) {
            self.bump();
            let mut depth = 1usize;
            while depth > 0 {
                match self.peek_kind() {
                    None => return Err(self.error("unbalanced `<` in type reference")),
                    Some(TokenKind::Lt) => {
                        depth += 1;
                        self.bump();
                    }
                    Some(TokenKind::Gt) => {
                        depth -= 1;
                        self.bump();
                    }
                    Some(TokenKind::Ident) => {
                        let text = self.tokens[self.pos].text.clone();
                        self.pos += 1;
                        if !matches!(text.as_str(), "extends" | "super") {
                            refs.push(text);
                        }
                    }
                    _ => {
                        self.bump();
                    }
                }
            }
        }

        while self.peek_kind() == Some(TokenKind::LBracket) {
            self.bump();
            self.expect(TokenKind::RBracket, "`]` after `[`")?;
        }

        Ok((base, refs))
    }

    fn skip_balanced(&mut self, open: TokenKind, close: TokenKind) -> Result<(), ParseError> {
        self.expect(open, "opening delimiter")?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.peek_kind() {
                None => return Err(self.error("unbalanced delimiters")),
                Some(k) if k == open => {
                    depth += 1;
                    self.bump();
                }
                Some(k) if k == close => {
                    depth -= 1;
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }
        Ok(())
    }
}

fn ident_range(token: &Token, name: &str) -> Range {
    Range::on_line(token.line, token.col, token.col + name.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_annotated_class_with_supertypes() {
        let unit = parse(
            r#"
            package demo.app;

            import demo.other.Thing;

            @Component
            public class Foo extends Base implements Marker, Other {
                @Inject
                private Repo repo;

                public Result handle(Request request) {
                    return null;
                }
            }
            "#,
        )
        .unwrap();

        assert_eq!(unit.package.as_deref(), Some("demo.app"));
        assert_eq!(unit.declarations.len(), 1);

        let decl = &unit.declarations[0];
        assert_eq!(decl.kind, DeclKind::Class);
        assert_eq!(decl.name, "Foo");
        assert_eq!(decl.qualified_name, "demo.app.Foo");
        assert_eq!(decl.annotations.len(), 1);
        assert_eq!(decl.annotations[0].name, "Component");
        assert_eq!(decl.supertypes, vec!["Base", "Marker", "Other"]);
        assert_eq!(decl.members.len(), 2);

        let field = &decl.members[0];
        assert_eq!(field.kind, MemberKind::Field);
        assert_eq!(field.name, "repo");
        assert_eq!(field.annotations[0].name, "Inject");
        assert_eq!(field.referenced_types, vec!["Repo"]);

        let method = &decl.members[1];
        assert_eq!(method.kind, MemberKind::Method);
        assert_eq!(method.name, "handle");
        assert!(method.referenced_types.contains(&"Result".to_string()));
        assert!(method.referenced_types.contains(&"Request".to_string()));
    }

    #[test]
    fn collects_generic_arguments_as_references() {
        let unit = parse(
            "class Holder { Map<String, Widget> widgets; List<Gadget> gadgets() { return null; } }",
        )
        .unwrap();
        let decl = &unit.declarations[0];
        let refs = decl.referenced_type_names();
        assert!(refs.contains("Widget"));
        assert!(refs.contains("Gadget"));
        // Builtins never become dependency edges.
        assert!(!refs.contains("Map"));
        assert!(!refs.contains("String"));
    }

    #[test]
    fn nested_declarations_get_qualified_names() {
        let unit = parse(
            "package p; class Outer { static class Inner { int x; } interface Hook {} }",
        )
        .unwrap();
        let outer = &unit.declarations[0];
        assert_eq!(outer.nested.len(), 2);
        assert_eq!(outer.nested[0].qualified_name, "p.Outer.Inner");
        assert_eq!(outer.nested[1].kind, DeclKind::Interface);

        let declared = unit.declared_type_names();
        assert!(declared.contains("p.Outer"));
        assert!(declared.contains("p.Outer.Inner"));
        assert!(declared.contains("p.Outer.Hook"));
    }

    #[test]
    fn parses_enum_with_constants_and_members() {
        let unit = parse(
            "enum Mode { FAST, SLOW(2) { }, OFF; private final Config config = null; Config config() { return config; } }",
        )
        .unwrap();
        let decl = &unit.declarations[0];
        assert_eq!(decl.kind, DeclKind::Enum);
        assert_eq!(decl.members.len(), 2);
        assert_eq!(decl.members[0].name, "config");
    }

    #[test]
    fn parses_record_header_components() {
        let unit = parse("record Pair(Left left, Right right) implements Tuple {}").unwrap();
        let decl = &unit.declarations[0];
        assert_eq!(decl.kind, DeclKind::Record);
        assert_eq!(decl.members.len(), 2);
        assert_eq!(decl.members[0].referenced_types, vec!["Left"]);
        assert_eq!(decl.supertypes, vec!["Tuple"]);
    }

    #[test]
    fn constructors_and_throws_are_methods() {
        let unit = parse(
            "class Service { Service(Registry registry) throws SetupFailure { } void run() {} }",
        )
        .unwrap();
        let decl = &unit.declarations[0];
        assert_eq!(decl.members.len(), 2);
        assert_eq!(decl.members[0].kind, MemberKind::Method);
        assert_eq!(decl.members[0].name, "Service");
        assert!(decl.members[0]
            .referenced_types
            .contains(&"Registry".to_string()));
    }

    #[test]
    fn unbalanced_body_is_a_parse_error() {
        let err = parse("class Foo {").unwrap_err();
        assert!(err.message.contains("unexpected end of file"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse("%%%").is_err());
        assert!(parse("class {}").is_err());
    }

    #[test]
    fn comments_and_strings_are_skipped() {
        let unit = parse(
            "// header\nclass Foo { /* block { */ String s = \"}{;\"; char c = '{'; }",
        )
        .unwrap();
        assert_eq!(unit.declarations[0].members.len(), 2);
    }
}
