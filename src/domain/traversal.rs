//! Traversal engine.
//!
//! Walks every function of a package in declaration order and every node of
//! its body pre-order, applying a chain of [`Instrumentation`]s at each node.
//! Edits requested through the [`Cursor`] are applied once the node and its
//! children have been visited. Nodes inserted or substituted through the
//! cursor are never walked.

use crate::domain::imports::Imports;
use crate::domain::manager::InstrumentationManager;
use crate::domain::package::Package;
use crate::domain::recognizer::ResolveContext;
use crate::domain::syntax::{Block, ChildMut, Decl, Expr, FuncDecl, NodeId, Stmt};
use crate::error::{InstrumentError, Result};

/// Result of applying one instrumentation to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not a match.
    Skipped,
    /// Matched and acted; later functions still see the node.
    Instrumented,
    /// Matched; later functions in the chain skip the node.
    Handled,
}

/// A visited node.
pub enum Node<'n> {
    Func(&'n mut FuncDecl),
    Stmt(&'n mut Stmt),
    Expr(&'n mut Expr),
}

impl Node<'_> {
    fn reborrow(&mut self) -> Node<'_> {
        match self {
            Node::Func(f) => Node::Func(&mut **f),
            Node::Stmt(s) => Node::Stmt(&mut **s),
            Node::Expr(e) => Node::Expr(&mut **e),
        }
    }
}

/// A pluggable node visitor. Implementations decide on their own whether a
/// node concerns them and return [`Outcome::Skipped`] otherwise.
pub trait Instrumentation {
    fn name(&self) -> &'static str;

    fn visit(
        &self,
        node: Node<'_>,
        manager: &mut InstrumentationManager,
        cursor: &mut Cursor<'_>,
    ) -> Result<Outcome>;
}

/// The function declaration enclosing the current node.
#[derive(Debug, Clone)]
pub struct FuncScope {
    pub key: String,
    pub file: usize,
    pub is_entry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Element `i` of a statement list.
    InList(usize),
    /// A single-node slot: an expression operand or an `if` init/else.
    Field,
    /// A top-level declaration.
    Decl,
}

enum Replacement {
    Stmt(Stmt),
    Expr(Expr),
}

/// Position of the current node plus its pending edits.
pub struct Cursor<'c> {
    scope: &'c FuncScope,
    imports: &'c mut Imports,
    preceding: &'c [Stmt],
    position: Position,
    line: usize,
    before: Vec<Stmt>,
    after: Vec<Stmt>,
    replacement: Option<Replacement>,
    deleted: bool,
    modified: bool,
}

impl<'c> Cursor<'c> {
    fn new(
        scope: &'c FuncScope,
        imports: &'c mut Imports,
        preceding: &'c [Stmt],
        position: Position,
        line: usize,
    ) -> Self {
        Self {
            scope,
            imports,
            preceding,
            position,
            line,
            before: Vec::new(),
            after: Vec::new(),
            replacement: None,
            deleted: false,
            modified: false,
        }
    }

    pub fn scope(&self) -> &FuncScope {
        self.scope
    }

    pub fn function(&self) -> &str {
        &self.scope.key
    }

    pub fn file(&self) -> usize {
        self.scope.file
    }

    /// Source line of the nearest enclosing statement.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn in_list(&self) -> bool {
        matches!(self.position, Position::InList(_))
    }

    pub fn imports(&self) -> &Imports {
        &*self.imports
    }

    pub fn imports_mut(&mut self) -> &mut Imports {
        &mut *self.imports
    }

    /// Statements before the current one in the same block, including any
    /// already inserted before it in this pass.
    pub fn preceding(&self) -> &[Stmt] {
        self.preceding
    }

    pub fn resolve_context<'r>(&'r self, manager: &'r InstrumentationManager) -> ResolveContext<'r> {
        ResolveContext {
            imports: &*self.imports,
            index: manager.index(),
            function: Some(self.scope.key.as_str()),
            preceding: self.preceding,
        }
    }

    /// Statements queued for insertion before the current one.
    pub fn pending_before(&self) -> &[Stmt] {
        &self.before
    }

    pub fn insert_before(&mut self, stmt: Stmt) -> Result<()> {
        self.require_list("insert before")?;
        self.before.push(stmt);
        Ok(())
    }

    pub fn insert_after(&mut self, stmt: Stmt) -> Result<()> {
        self.require_list("insert after")?;
        self.after.push(stmt);
        Ok(())
    }

    pub fn delete(&mut self) -> Result<()> {
        self.require_list("delete")?;
        self.deleted = true;
        Ok(())
    }

    pub fn replace_stmt(&mut self, stmt: Stmt) {
        self.replacement = Some(Replacement::Stmt(stmt));
    }

    pub fn replace_expr(&mut self, expr: Expr) {
        self.replacement = Some(Replacement::Expr(expr));
    }

    /// Records that the current node was changed in place.
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    fn require_list(&self, action: &str) -> Result<()> {
        if self.in_list() {
            Ok(())
        } else {
            Err(InstrumentError::structural(
                &self.scope.key,
                format!("cannot {} outside a statement list", action),
            ))
        }
    }

    fn finish(self) -> Edits {
        Edits {
            before: self.before,
            after: self.after,
            replacement: self.replacement,
            deleted: self.deleted,
            modified: self.modified,
        }
    }
}

struct Edits {
    before: Vec<Stmt>,
    after: Vec<Stmt>,
    replacement: Option<Replacement>,
    deleted: bool,
    modified: bool,
}

impl Edits {
    fn stops_descent(&self) -> bool {
        self.deleted || self.replacement.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Walk
// ═══════════════════════════════════════════════════════════════════════════

/// Applies `chain` to every node of every function in `package`.
pub fn instrument_package(
    package: &mut Package,
    manager: &mut InstrumentationManager,
    chain: &[Box<dyn Instrumentation>],
) -> Result<()> {
    for (file_idx, file) in package.files.iter_mut().enumerate() {
        let imports = &mut file.imports;
        for decl in file.decls.iter_mut() {
            let Decl::Func(func) = decl else { continue };
            let key = func.key();
            let scope = FuncScope {
                is_entry: manager.index().is_entry(&key),
                key,
                file: file_idx,
            };
            walk_function(func, &scope, imports, manager, chain)?;
        }
    }
    Ok(())
}

struct Walker<'w> {
    scope: &'w FuncScope,
    chain: &'w [Box<dyn Instrumentation>],
}

fn walk_function(
    func: &mut FuncDecl,
    scope: &FuncScope,
    imports: &mut Imports,
    manager: &mut InstrumentationManager,
    chain: &[Box<dyn Instrumentation>],
) -> Result<()> {
    let line = func.line;
    let mut cursor = Cursor::new(scope, imports, &[], Position::Decl, line);
    apply_chain(chain, Node::Func(&mut *func), manager, &mut cursor)?;
    let edits = cursor.finish();
    if edits.stops_descent() || !edits.before.is_empty() || !edits.after.is_empty() {
        return Err(InstrumentError::structural(
            &scope.key,
            "declarations cannot be replaced, deleted or surrounded",
        ));
    }
    if edits.modified {
        func.dirty = true;
    }

    let walker = Walker { scope, chain };
    if walker.block(&mut func.body, imports, manager)? {
        func.dirty = true;
    }
    Ok(())
}

fn apply_chain(
    chain: &[Box<dyn Instrumentation>],
    mut node: Node<'_>,
    manager: &mut InstrumentationManager,
    cursor: &mut Cursor<'_>,
) -> Result<()> {
    for instrumentation in chain {
        let outcome = instrumentation.visit(node.reborrow(), manager, cursor)?;
        if outcome == Outcome::Handled || cursor.deleted || cursor.replacement.is_some() {
            break;
        }
    }
    Ok(())
}

impl Walker<'_> {
    /// Returns true when anything inside the block changed.
    fn block(
        &self,
        block: &mut Block,
        imports: &mut Imports,
        manager: &mut InstrumentationManager,
    ) -> Result<bool> {
        let mut changed = false;
        let mut i = 0;
        while i < block.stmts.len() {
            if block.stmts[i].id == NodeId::SYNTHETIC {
                i += 1;
                continue;
            }
            let (preceding, rest) = block.stmts.split_at_mut(i);
            let stmt = &mut rest[0];

            let line = stmt.line;
            let mut cursor = Cursor::new(self.scope, imports, preceding, Position::InList(i), line);
            apply_chain(self.chain, Node::Stmt(&mut *stmt), manager, &mut cursor)?;
            let edits = cursor.finish();

            let mut stmt_changed = edits.modified;
            if !edits.stops_descent() && self.stmt_children(stmt, preceding, imports, manager)? {
                stmt_changed = true;
            }
            if stmt_changed {
                stmt.span = None;
                changed = true;
            }

            let Edits {
                before,
                after,
                replacement,
                deleted,
                ..
            } = edits;
            if !before.is_empty() || !after.is_empty() || replacement.is_some() || deleted {
                changed = true;
            }

            match replacement {
                Some(Replacement::Stmt(new)) => {
                    let new = carry_layout(&block.stmts[i], new);
                    block.stmts[i] = new;
                }
                Some(Replacement::Expr(_)) => {
                    return Err(InstrumentError::structural(
                        &self.scope.key,
                        "a statement cannot be replaced by an expression",
                    ));
                }
                None => {}
            }

            let inserted = before.len();
            if inserted > 0 {
                let mut before = before;
                if let Some(first) = before.first_mut() {
                    first.blank_before = block.stmts[i].blank_before;
                }
                block.stmts[i].blank_before = false;
                block.stmts.splice(i..i, before);
            }
            i += inserted;

            let appended = after.len();
            block.stmts.splice(i + 1..i + 1, after);
            if deleted {
                block.stmts.remove(i);
                i += appended;
            } else {
                i += appended + 1;
            }
        }
        if changed {
            block.span = None;
        }
        Ok(changed)
    }

    fn stmt_children(
        &self,
        stmt: &mut Stmt,
        preceding: &[Stmt],
        imports: &mut Imports,
        manager: &mut InstrumentationManager,
    ) -> Result<bool> {
        let line = stmt.line;
        let mut changed = false;
        for child in stmt.children_mut() {
            let child_changed = match child {
                ChildMut::Expr(expr) => self.expr(expr, preceding, line, imports, manager)?,
                ChildMut::Block(block) => self.block(block, imports, manager)?,
                ChildMut::Stmt(inner) => self.field_stmt(inner, preceding, imports, manager)?,
            };
            changed |= child_changed;
        }
        Ok(changed)
    }

    /// An `if` init statement or `else` branch.
    fn field_stmt(
        &self,
        stmt: &mut Stmt,
        preceding: &[Stmt],
        imports: &mut Imports,
        manager: &mut InstrumentationManager,
    ) -> Result<bool> {
        let line = stmt.line;
        let mut cursor = Cursor::new(self.scope, imports, preceding, Position::Field, line);
        apply_chain(self.chain, Node::Stmt(&mut *stmt), manager, &mut cursor)?;
        let edits = cursor.finish();

        let mut changed = edits.modified;
        match edits.replacement {
            Some(Replacement::Stmt(new)) => {
                *stmt = carry_layout(stmt, new);
                return Ok(true);
            }
            Some(Replacement::Expr(_)) => {
                return Err(InstrumentError::structural(
                    &self.scope.key,
                    "a statement cannot be replaced by an expression",
                ));
            }
            None => {}
        }
        if self.stmt_children(stmt, preceding, imports, manager)? {
            changed = true;
        }
        if changed {
            stmt.span = None;
        }
        Ok(changed)
    }

    fn expr(
        &self,
        expr: &mut Expr,
        preceding: &[Stmt],
        line: usize,
        imports: &mut Imports,
        manager: &mut InstrumentationManager,
    ) -> Result<bool> {
        let mut cursor = Cursor::new(self.scope, imports, preceding, Position::Field, line);
        apply_chain(self.chain, Node::Expr(&mut *expr), manager, &mut cursor)?;
        let edits = cursor.finish();

        match edits.replacement {
            Some(Replacement::Expr(new)) => {
                *expr = new;
                return Ok(true);
            }
            Some(Replacement::Stmt(_)) => {
                return Err(InstrumentError::structural(
                    &self.scope.key,
                    "an expression cannot be replaced by a statement",
                ));
            }
            None => {}
        }

        let mut changed = edits.modified;
        for child in expr.children_mut() {
            let child_changed = match child {
                ChildMut::Expr(inner) => self.expr(inner, preceding, line, imports, manager)?,
                ChildMut::Block(block) => self.block(block, imports, manager)?,
                ChildMut::Stmt(inner) => self.field_stmt(inner, preceding, imports, manager)?,
            };
            changed |= child_changed;
        }
        if changed {
            expr.span = None;
        }
        Ok(changed)
    }
}

/// A replacement keeps the line and spacing of the statement it replaces.
fn carry_layout(old: &Stmt, mut new: Stmt) -> Stmt {
    new.line = old.line;
    new.blank_before = old.blank_before;
    new
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentConfig;
    use crate::domain::manager::EditKind;
    use crate::domain::syntax::{ExprKind, StmtKind};
    use crate::infrastructure::go_parser::parse_package_source;

    const CODE: &str = r#"
package main

func main() {
	a()
	if ok {
		b()
	}
	c()
}
"#;

    /// Inserts a marker call before every call to `b`.
    struct MarkB;

    impl Instrumentation for MarkB {
        fn name(&self) -> &'static str {
            "mark-b"
        }

        fn visit(
            &self,
            node: Node<'_>,
            _manager: &mut InstrumentationManager,
            cursor: &mut Cursor<'_>,
        ) -> Result<Outcome> {
            let Node::Stmt(stmt) = node else {
                return Ok(Outcome::Skipped);
            };
            let StmtKind::Expr(call) = &stmt.kind else {
                return Ok(Outcome::Skipped);
            };
            let is_b = call.as_call().and_then(|(f, _)| f.as_ident()) == Some("b");
            if !is_b || !cursor.in_list() {
                return Ok(Outcome::Skipped);
            }
            cursor.insert_before(Stmt::expr(Expr::call(Expr::ident("b"), vec![])))?;
            Ok(Outcome::Handled)
        }
    }

    /// Counts every visited node into the manager's edit log.
    struct Recorder;

    impl Instrumentation for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn visit(
            &self,
            node: Node<'_>,
            manager: &mut InstrumentationManager,
            cursor: &mut Cursor<'_>,
        ) -> Result<Outcome> {
            if let Node::Expr(expr) = node {
                if let ExprKind::Ident(name) = &expr.kind {
                    manager.record_edit(cursor.file(), name, cursor.line(), EditKind::ArgumentAdded);
                }
            }
            Ok(Outcome::Skipped)
        }
    }

    /// Tries to insert next to an expression.
    struct Misplaced;

    impl Instrumentation for Misplaced {
        fn name(&self) -> &'static str {
            "misplaced"
        }

        fn visit(
            &self,
            node: Node<'_>,
            _manager: &mut InstrumentationManager,
            cursor: &mut Cursor<'_>,
        ) -> Result<Outcome> {
            match node {
                Node::Expr(_) => {
                    cursor.insert_before(Stmt::expr(Expr::ident("x")))?;
                    Ok(Outcome::Instrumented)
                }
                _ => Ok(Outcome::Skipped),
            }
        }
    }

    fn run(chain: Vec<Box<dyn Instrumentation>>) -> (Package, InstrumentationManager, Result<()>) {
        let mut package = parse_package_source("main.go", CODE).unwrap();
        let mut manager = InstrumentationManager::new(&package, InstrumentConfig::default());
        let result = instrument_package(&mut package, &mut manager, &chain);
        (package, manager, result)
    }

    fn main_body(package: &Package) -> &Block {
        match &package.files[0].decls[0] {
            Decl::Func(f) => &f.body,
            _ => panic!("expected main"),
        }
    }

    #[test]
    fn inserted_nodes_are_not_revisited() {
        let (package, _, result) = run(vec![Box::new(MarkB)]);
        result.unwrap();
        let body = main_body(&package);
        let StmtKind::If { body: inner, .. } = &body.stmts[1].kind else {
            panic!("expected if");
        };
        assert_eq!(inner.stmts.len(), 2);
        assert!(body.span.is_none());
        assert!(body.stmts[1].span.is_none());
        assert!(body.stmts[0].span.is_some());
        assert!(body.stmts[2].span.is_some());
    }

    #[test]
    fn visits_nodes_in_preorder() {
        let (_, manager, result) = run(vec![Box::new(MarkB), Box::new(Recorder)]);
        result.unwrap();
        let names: Vec<&str> = manager.edits().iter().map(|e| e.function.as_str()).collect();
        assert_eq!(names, vec!["a", "ok", "b", "c"]);
    }

    #[test]
    fn inserting_at_a_field_is_structural_error() {
        let (_, _, result) = run(vec![Box::new(Misplaced)]);
        assert!(matches!(result, Err(InstrumentError::Structural { .. })));
    }
}
