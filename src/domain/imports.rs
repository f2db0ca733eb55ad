//! Import table of one Go file.

use crate::domain::syntax::Span;

#[derive(Debug, Clone)]
pub struct ImportSpec {
    /// Explicit name: an alias, `_` or `.`.
    pub name: Option<String>,
    pub path: String,
    /// Verbatim source of the spec when it was loaded from a file.
    pub text: Option<String>,
    pub span: Option<Span>,
}

impl ImportSpec {
    pub fn new(path: &str) -> Self {
        Self {
            name: None,
            path: path.to_string(),
            text: None,
            span: None,
        }
    }

    /// Identifier the file uses to refer to this package, if any.
    pub fn local_name(&self) -> Option<String> {
        match self.name.as_deref() {
            Some("_") | Some(".") => None,
            Some(alias) => Some(alias.to_string()),
            None => Some(default_package_name(&self.path)),
        }
    }

    pub fn render(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        match &self.name {
            Some(name) => format!("{} \"{}\"", name, self.path),
            None => format!("\"{}\"", self.path),
        }
    }

    pub fn is_standard_library(&self) -> bool {
        let first = self.path.split('/').next().unwrap_or_default();
        !first.contains('.')
    }
}

/// One `import` declaration as it appears in the source.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub span: Span,
    pub specs: Vec<ImportSpec>,
    /// Byte offset of the closing `)` of a grouped declaration.
    pub close_paren: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Imports {
    pub decls: Vec<ImportDecl>,
    /// Specs added during instrumentation, in insertion order.
    pub added: Vec<ImportSpec>,
    /// Byte offset right after the package clause.
    pub anchor: usize,
}

impl Imports {
    pub fn specs(&self) -> impl Iterator<Item = &ImportSpec> {
        self.decls
            .iter()
            .flat_map(|d| d.specs.iter())
            .chain(self.added.iter())
    }

    /// Import path bound to `alias` in this file.
    pub fn path_of(&self, alias: &str) -> Option<&str> {
        self.specs()
            .find(|spec| spec.local_name().as_deref() == Some(alias))
            .map(|spec| spec.path.as_str())
    }

    pub fn resolves_to(&self, alias: &str, path: &str) -> bool {
        self.path_of(alias) == Some(path)
    }

    /// Identifier under which `path` is reachable, if it is imported by name.
    pub fn local_name(&self, path: &str) -> Option<String> {
        self.specs()
            .filter(|spec| spec.path == path)
            .find_map(ImportSpec::local_name)
    }

    /// Imports `path` unless it is already reachable; returns its local name.
    pub fn ensure(&mut self, path: &str) -> String {
        if let Some(name) = self.local_name(path) {
            return name;
        }
        self.added.push(ImportSpec::new(path));
        default_package_name(path)
    }

    pub fn is_modified(&self) -> bool {
        !self.added.is_empty()
    }
}

/// Package name Go assumes for an import path without an explicit name.
pub fn default_package_name(path: &str) -> String {
    let mut segments = path.rsplit('/');
    let last = segments.next().unwrap_or(path);
    let is_major_version = last.len() > 1
        && last.starts_with('v')
        && last[1..].chars().all(|c| c.is_ascii_digit());
    if is_major_version {
        if let Some(prev) = segments.next() {
            return prev.to_string();
        }
    }
    last.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imports(specs: Vec<ImportSpec>) -> Imports {
        Imports {
            decls: vec![ImportDecl {
                span: Span::new(0, 0),
                specs,
                close_paren: None,
            }],
            added: Vec::new(),
            anchor: 0,
        }
    }

    #[test]
    fn default_names() {
        assert_eq!(default_package_name("net/http"), "http");
        assert_eq!(
            default_package_name("github.com/newrelic/go-agent/v3/newrelic"),
            "newrelic"
        );
        assert_eq!(default_package_name("example.com/mod/v2"), "mod");
        assert_eq!(default_package_name("os"), "os");
    }

    #[test]
    fn aliases_resolve() {
        let mut aliased = ImportSpec::new("net/http");
        aliased.name = Some("nethttp".into());
        let table = imports(vec![aliased, ImportSpec::new("os")]);

        assert_eq!(table.path_of("nethttp"), Some("net/http"));
        assert_eq!(table.path_of("http"), None);
        assert_eq!(table.local_name("net/http").as_deref(), Some("nethttp"));
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut table = imports(vec![ImportSpec::new("net/http")]);
        assert_eq!(table.ensure("net/http"), "http");
        assert!(!table.is_modified());

        assert_eq!(table.ensure("time"), "time");
        assert_eq!(table.ensure("time"), "time");
        assert_eq!(table.added.len(), 1);
    }

    #[test]
    fn blank_import_is_not_reachable() {
        let mut blank = ImportSpec::new("os");
        blank.name = Some("_".into());
        let mut table = imports(vec![blank]);
        assert_eq!(table.local_name("os"), None);
        assert_eq!(table.ensure("os"), "os");
        assert_eq!(table.added.len(), 1);
    }
}
