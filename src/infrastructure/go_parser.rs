//! Go source loading through tree-sitter.
//!
//! The concrete syntax tree is lowered into the owned model in
//! `domain::syntax`. Every lowered node remembers its byte span so that
//! untouched code renders byte-for-byte. Constructs the analysis never looks
//! into become `Raw` text.

use std::path::{Path, PathBuf};

use tree_sitter::{Node, Parser};

use crate::domain::imports::{ImportDecl, ImportSpec, Imports};
use crate::domain::package::{Package, SourceFile};
use crate::domain::syntax::{
    AssignOp, Block, CaseClause, Decl, Expr, ExprKind, Field, FuncDecl, FuncLit, GenDecl,
    GenKeyword, NodeId, Receiver, Signature, Span, Stmt, StmtKind, TypeSpec, ValueSpec,
};
use crate::error::{InstrumentError, Result};

/// Parses Go files into the syntax model. Node ids keep increasing across
/// files so they stay unique within a package.
pub struct GoParser {
    parser: Parser,
    next_id: u32,
}

impl GoParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| InstrumentError::Grammar(e.to_string()))?;
        Ok(Self { parser, next_id: 0 })
    }

    /// Parses one file. `path` is the path shown in diff headers.
    pub fn parse_file(&mut self, path: PathBuf, source: String) -> Result<SourceFile> {
        let tree = self
            .parser
            .parse(&source, None)
            .ok_or_else(|| InstrumentError::Parse {
                path: path.clone(),
                line: 1,
                snippet: String::from("parser produced no tree"),
            })?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(syntax_error(&path, &source, root));
        }

        let mut lower = Lowering {
            src: &source,
            next_id: &mut self.next_id,
        };
        let mut package = String::new();
        let mut imports = Imports::default();
        let mut decls = Vec::new();
        for child in named(root) {
            match child.kind() {
                "package_clause" => {
                    package = child
                        .named_child(0)
                        .map(|n| lower.text(n).to_string())
                        .unwrap_or_default();
                    imports.anchor = child.end_byte();
                }
                "import_declaration" => imports.decls.push(lower.import_decl(child)),
                "function_declaration" | "method_declaration" => {
                    decls.push(Decl::Func(lower.func_decl(child)));
                }
                "var_declaration" | "const_declaration" | "type_declaration" => {
                    decls.push(Decl::Gen {
                        span: span(child),
                        decl: lower.gen_decl(child),
                    });
                }
                _ => {}
            }
        }

        Ok(SourceFile {
            path,
            source,
            package,
            imports,
            decls,
        })
    }
}

/// Parses a single in-memory file as a whole package.
pub fn parse_package_source(path: &str, code: &str) -> Result<Package> {
    let mut parser = GoParser::new()?;
    let file = parser.parse_file(PathBuf::from(path), code.to_string())?;
    Ok(Package {
        name: file.package.clone(),
        dir: PathBuf::from("."),
        files: vec![file],
    })
}

fn syntax_error(path: &Path, source: &str, root: Node<'_>) -> InstrumentError {
    let bad = first_error(root).unwrap_or(root);
    let row = bad.start_position().row;
    let snippet = source
        .lines()
        .nth(row)
        .map(|l| l.trim().chars().take(60).collect())
        .unwrap_or_default();
    InstrumentError::Parse {
        path: path.to_path_buf(),
        line: row + 1,
        snippet,
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}

fn named(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn span(node: Node<'_>) -> Span {
    Span::new(node.start_byte(), node.end_byte())
}

fn line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

struct Lowering<'a> {
    src: &'a str,
    next_id: &'a mut u32,
}

impl<'a> Lowering<'a> {
    fn id(&mut self) -> NodeId {
        *self.next_id += 1;
        NodeId(*self.next_id)
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        &self.src[node.byte_range()]
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<String> {
        node.child_by_field_name(field)
            .map(|n| self.text(n).to_string())
    }

    // ─── Imports ───────────────────────────────────────────────────────────

    fn import_decl(&mut self, node: Node<'_>) -> ImportDecl {
        let mut specs = Vec::new();
        let mut close_paren = None;
        for child in named(node) {
            match child.kind() {
                "import_spec" => specs.push(self.import_spec(child)),
                "import_spec_list" => {
                    let mut cursor = child.walk();
                    for item in child.children(&mut cursor) {
                        match item.kind() {
                            "import_spec" => specs.push(self.import_spec(item)),
                            ")" => close_paren = Some(item.start_byte()),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        ImportDecl {
            span: span(node),
            specs,
            close_paren,
        }
    }

    fn import_spec(&mut self, node: Node<'_>) -> ImportSpec {
        let path = self
            .field_text(node, "path")
            .map(|p| p.trim_matches(|c| c == '"' || c == '`').to_string())
            .unwrap_or_default();
        ImportSpec {
            name: self.field_text(node, "name"),
            path,
            text: Some(self.text(node).to_string()),
            span: Some(span(node)),
        }
    }

    // ─── Declarations ──────────────────────────────────────────────────────

    fn func_decl(&mut self, node: Node<'_>) -> FuncDecl {
        let id = self.id();
        let name = self.field_text(node, "name").unwrap_or_default();
        let receiver = node.child_by_field_name("receiver").map(|r| Receiver {
            text: self.text(r).to_string(),
            type_name: receiver_type_name(self.text(r)),
        });
        let (sig, result_text) = self.signature(node);
        let (body, body_offset) = match node.child_by_field_name("body") {
            Some(b) => (self.block(b), b.start_byte()),
            None => (Block::default(), node.end_byte()),
        };
        FuncDecl {
            id,
            span: span(node),
            body_offset,
            line: line(node),
            dirty: false,
            header_dirty: false,
            name,
            receiver,
            type_params: self.field_text(node, "type_parameters"),
            sig,
            result_text,
            body,
        }
    }

    fn signature(&mut self, node: Node<'_>) -> (Signature, Option<String>) {
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.fields(p))
            .unwrap_or_default();
        let result = node.child_by_field_name("result");
        let results = match result {
            Some(r) if r.kind() == "parameter_list" => self.fields(r),
            Some(r) => vec![Field {
                names: Vec::new(),
                ty: self.expr(r),
                variadic: false,
            }],
            None => Vec::new(),
        };
        (
            Signature { params, results },
            result.map(|r| self.text(r).to_string()),
        )
    }

    /// Parameter, result or struct field groups.
    fn fields(&mut self, list: Node<'_>) -> Vec<Field> {
        let mut out = Vec::new();
        for child in named(list) {
            let variadic = match child.kind() {
                "parameter_declaration" | "field_declaration" => false,
                "variadic_parameter_declaration" => true,
                _ => continue,
            };
            let mut cursor = child.walk();
            let names = child
                .children_by_field_name("name", &mut cursor)
                .map(|n| self.text(n).to_string())
                .collect();
            let ty = match child.child_by_field_name("type") {
                Some(t) => self.expr(t),
                None => Expr::new(ExprKind::Raw(self.text(child).to_string())),
            };
            out.push(Field {
                names,
                ty,
                variadic,
            });
        }
        out
    }

    fn gen_decl(&mut self, node: Node<'_>) -> GenDecl {
        let keyword = match node.kind() {
            "var_declaration" => GenKeyword::Var,
            "const_declaration" => GenKeyword::Const,
            _ => GenKeyword::Type,
        };
        let mut values = Vec::new();
        let mut types = Vec::new();
        for spec in specs_of(node) {
            match spec.kind() {
                "var_spec" | "const_spec" => {
                    let mut cursor = spec.walk();
                    let names = spec
                        .children_by_field_name("name", &mut cursor)
                        .map(|n| self.text(n).to_string())
                        .collect();
                    let ty = spec.child_by_field_name("type").map(|t| self.expr(t));
                    let values_list = spec
                        .child_by_field_name("value")
                        .map(|v| self.expr_list(v))
                        .unwrap_or_default();
                    values.push(ValueSpec {
                        names,
                        ty,
                        values: values_list,
                    });
                }
                "type_spec" | "type_alias" => {
                    let name = self.field_text(spec, "name").unwrap_or_default();
                    let Some(ty_node) = spec.child_by_field_name("type") else {
                        continue;
                    };
                    let fields = if ty_node.kind() == "struct_type" {
                        named(ty_node)
                            .into_iter()
                            .find(|n| n.kind() == "field_declaration_list")
                            .map(|list| self.fields(list))
                            .unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    types.push(TypeSpec {
                        name,
                        ty: self.expr(ty_node),
                        fields,
                    });
                }
                _ => {}
            }
        }
        GenDecl {
            keyword,
            values,
            types,
            text: self.text(node).to_string(),
        }
    }

    // ─── Statements ────────────────────────────────────────────────────────

    fn block(&mut self, node: Node<'_>) -> Block {
        let items = block_items(node);
        Block {
            span: Some(span(node)),
            stmts: self.stmt_list(items),
        }
    }

    /// Lowers a run of sibling statements, recording blank lines between them
    /// and comments that trail the previous statement on the same line.
    fn stmt_list(&mut self, nodes: Vec<Node<'_>>) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(nodes.len());
        let mut prev: Option<(usize, usize)> = None;
        for node in nodes {
            if node.kind() == "empty_statement" {
                continue;
            }
            let mut stmt = self.stmt(node);
            if let Some((end, row)) = prev {
                stmt.blank_before = self.src[end..node.start_byte()].matches('\n').count() >= 2;
                if let StmtKind::Comment { trailing, .. } = &mut stmt.kind {
                    *trailing = node.start_position().row == row;
                }
            }
            prev = Some((node.end_byte(), node.end_position().row));
            out.push(stmt);
        }
        out
    }

    fn stmt(&mut self, node: Node<'_>) -> Stmt {
        let id = self.id();
        let kind = self.stmt_kind(node);
        Stmt {
            id,
            span: Some(span(node)),
            line: line(node),
            blank_before: false,
            kind,
        }
    }

    fn stmt_kind(&mut self, node: Node<'_>) -> StmtKind {
        match node.kind() {
            "comment" => StmtKind::Comment {
                text: self.text(node).to_string(),
                trailing: false,
            },
            "expression_statement" => match node.named_child(0) {
                Some(e) => StmtKind::Expr(self.expr(e)),
                None => self.raw_stmt(node),
            },
            "short_var_declaration" | "assignment_statement" => {
                let op = if node.kind() == "short_var_declaration" {
                    AssignOp::Define
                } else {
                    match self.field_text(node, "operator").as_deref() {
                        Some("=") | None => AssignOp::Assign,
                        Some(other) => AssignOp::Compound(other.to_string()),
                    }
                };
                let lhs = node
                    .child_by_field_name("left")
                    .map(|l| self.expr_list(l))
                    .unwrap_or_default();
                let rhs = node
                    .child_by_field_name("right")
                    .map(|r| self.expr_list(r))
                    .unwrap_or_default();
                StmtKind::Assign { lhs, op, rhs }
            }
            "defer_statement" | "go_statement" => match node.named_child(0) {
                Some(e) if node.kind() == "defer_statement" => StmtKind::Defer(self.expr(e)),
                Some(e) => StmtKind::Go(self.expr(e)),
                None => self.raw_stmt(node),
            },
            "return_statement" => StmtKind::Return(
                node.named_child(0)
                    .map(|l| self.expr_list(l))
                    .unwrap_or_default(),
            ),
            "if_statement" => self.if_stmt(node),
            "block" => StmtKind::Block(self.block(node)),
            "for_statement" => match node.child_by_field_name("body") {
                Some(body) => StmtKind::For {
                    header: self.src[node.start_byte()..body.start_byte()]
                        .trim_end()
                        .to_string(),
                    body: self.block(body),
                },
                None => self.raw_stmt(node),
            },
            "expression_switch_statement" | "type_switch_statement" | "select_statement" => {
                self.switch_stmt(node)
            }
            "var_declaration" | "const_declaration" | "type_declaration" => {
                StmtKind::Decl(self.gen_decl(node))
            }
            _ => self.raw_stmt(node),
        }
    }

    fn raw_stmt(&self, node: Node<'_>) -> StmtKind {
        StmtKind::Raw(self.text(node).to_string())
    }

    fn if_stmt(&mut self, node: Node<'_>) -> StmtKind {
        let (Some(cond), Some(body)) = (
            node.child_by_field_name("condition"),
            node.child_by_field_name("consequence"),
        ) else {
            return self.raw_stmt(node);
        };
        let init = node
            .child_by_field_name("initializer")
            .map(|i| Box::new(self.stmt(i)));
        let cond = self.expr(cond);
        let body = self.block(body);
        let els = node
            .child_by_field_name("alternative")
            .map(|a| Box::new(self.stmt(a)));
        StmtKind::If {
            init,
            cond,
            body,
            els,
        }
    }

    fn switch_stmt(&mut self, node: Node<'_>) -> StmtKind {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        let Some(open) = children.iter().find(|c| c.kind() == "{") else {
            return self.raw_stmt(node);
        };
        let header = self.src[node.start_byte()..open.start_byte()]
            .trim_end()
            .to_string();

        let mut clauses: Vec<CaseClause> = Vec::new();
        let mut stray = Vec::new();
        for child in children.iter().filter(|c| c.start_byte() > open.start_byte()) {
            match child.kind() {
                "expression_case" | "default_case" | "type_case" | "communication_case" => {
                    let mut clause = self.case_clause(*child);
                    if !stray.is_empty() {
                        let mut leading = self.stmt_list(std::mem::take(&mut stray));
                        leading.append(&mut clause.body.stmts);
                        clause.body.stmts = leading;
                    }
                    clauses.push(clause);
                }
                "comment" => stray.push(*child),
                _ => {}
            }
        }
        if !stray.is_empty() {
            let trailing = self.stmt_list(stray);
            match clauses.last_mut() {
                Some(last) => last.body.stmts.extend(trailing),
                None => return self.raw_stmt(node),
            }
        }
        StmtKind::Switch { header, clauses }
    }

    fn case_clause(&mut self, node: Node<'_>) -> CaseClause {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        let colon = children.iter().find(|c| c.kind() == ":").map(|c| c.end_byte());
        let header_end = colon.unwrap_or(node.end_byte());
        let mut items = Vec::new();
        for child in children.iter().filter(|c| c.start_byte() >= header_end) {
            match child.kind() {
                "statement_list" => items.extend(named(*child)),
                _ if child.is_named() => items.push(*child),
                _ => {}
            }
        }
        CaseClause {
            header: self.src[node.start_byte()..header_end].to_string(),
            body: Block::new(self.stmt_list(items)),
        }
    }

    // ─── Expressions ───────────────────────────────────────────────────────

    fn expr_list(&mut self, node: Node<'_>) -> Vec<Expr> {
        if node.kind() != "expression_list" {
            return vec![self.expr(node)];
        }
        named(node)
            .into_iter()
            .filter(|n| n.kind() != "comment")
            .map(|n| self.expr(n))
            .collect()
    }

    fn expr(&mut self, node: Node<'_>) -> Expr {
        let id = self.id();
        let kind = self.expr_kind(node);
        Expr {
            id,
            span: Some(span(node)),
            kind,
        }
    }

    fn child_expr(&mut self, node: Node<'_>, field: &str) -> Option<Box<Expr>> {
        node.child_by_field_name(field)
            .map(|n| Box::new(self.expr(n)))
    }

    fn raw(&self, node: Node<'_>) -> ExprKind {
        ExprKind::Raw(self.text(node).to_string())
    }

    fn expr_kind(&mut self, node: Node<'_>) -> ExprKind {
        match node.kind() {
            "identifier" | "field_identifier" | "package_identifier" | "type_identifier"
            | "nil" | "true" | "false" | "iota" => ExprKind::Ident(self.text(node).to_string()),
            "interpreted_string_literal" | "raw_string_literal" | "int_literal"
            | "float_literal" | "imaginary_literal" | "rune_literal" => {
                ExprKind::BasicLit(self.text(node).to_string())
            }
            "selector_expression" => {
                match (
                    self.child_expr(node, "operand"),
                    self.field_text(node, "field"),
                ) {
                    (Some(x), Some(sel)) => ExprKind::Selector { x, sel },
                    _ => self.raw(node),
                }
            }
            "qualified_type" => {
                match (
                    self.field_text(node, "package"),
                    self.field_text(node, "name"),
                ) {
                    (Some(pkg), Some(name)) => ExprKind::Selector {
                        x: Box::new(Expr::ident(pkg)),
                        sel: name,
                    },
                    _ => self.raw(node),
                }
            }
            "call_expression" => self.call(node),
            "type_conversion_expression" => {
                match (
                    self.child_expr(node, "type"),
                    node.child_by_field_name("operand"),
                ) {
                    (Some(fun), Some(operand)) => ExprKind::Call {
                        fun,
                        args: vec![self.expr(operand)],
                        ellipsis: false,
                    },
                    _ => self.raw(node),
                }
            }
            "unary_expression" => {
                let op = self.field_text(node, "operator").unwrap_or_default();
                match self.child_expr(node, "operand") {
                    Some(x) if op == "*" => ExprKind::Star(x),
                    Some(x) => ExprKind::Unary { op, x },
                    None => self.raw(node),
                }
            }
            "pointer_type" => match node.named_child(0) {
                Some(inner) => ExprKind::Star(Box::new(self.expr(inner))),
                None => self.raw(node),
            },
            "binary_expression" => {
                let op = self.field_text(node, "operator").unwrap_or_default();
                match (self.child_expr(node, "left"), self.child_expr(node, "right")) {
                    (Some(x), Some(y)) => ExprKind::Binary { op, x, y },
                    _ => self.raw(node),
                }
            }
            "parenthesized_expression" | "parenthesized_type" => {
                match named(node).into_iter().find(|n| n.kind() != "comment") {
                    Some(inner) => ExprKind::Paren(Box::new(self.expr(inner))),
                    None => self.raw(node),
                }
            }
            "composite_literal" => match node.child_by_field_name("body") {
                Some(body) => ExprKind::CompositeLit {
                    ty: self.child_expr(node, "type"),
                    elts: self.literal_elements(body),
                },
                None => self.raw(node),
            },
            "func_literal" => self.func_literal(node),
            _ => self.raw(node),
        }
    }

    fn call(&mut self, node: Node<'_>) -> ExprKind {
        let (Some(function), Some(arguments)) = (
            node.child_by_field_name("function"),
            node.child_by_field_name("arguments"),
        ) else {
            return self.raw(node);
        };
        // Explicit instantiation `f[T](x)` keeps the callee as text.
        let fun = match node.child_by_field_name("type_arguments") {
            Some(targs) => Expr {
                id: self.id(),
                span: Some(Span::new(function.start_byte(), targs.end_byte())),
                kind: ExprKind::Raw(self.src[function.start_byte()..targs.end_byte()].to_string()),
            },
            None => self.expr(function),
        };
        let mut args = Vec::new();
        let mut ellipsis = false;
        for arg in named(arguments) {
            match arg.kind() {
                "comment" => {}
                "variadic_argument" => {
                    ellipsis = true;
                    match arg.named_child(0) {
                        Some(inner) => args.push(self.expr(inner)),
                        None => args.push(self.expr(arg)),
                    }
                }
                _ => args.push(self.expr(arg)),
            }
        }
        ExprKind::Call {
            fun: Box::new(fun),
            args,
            ellipsis,
        }
    }

    fn literal_elements(&mut self, body: Node<'_>) -> Vec<Expr> {
        named(body)
            .into_iter()
            .filter(|n| n.kind() != "comment")
            .map(|n| self.literal_element(n))
            .collect()
    }

    fn literal_element(&mut self, node: Node<'_>) -> Expr {
        match node.kind() {
            "literal_element" => match named(node).into_iter().find(|n| n.kind() != "comment") {
                Some(inner) => self.literal_element(inner),
                None => self.expr(node),
            },
            "keyed_element" => {
                let parts: Vec<Node<'_>> = named(node)
                    .into_iter()
                    .filter(|n| n.kind() != "comment")
                    .collect();
                if parts.len() != 2 {
                    return self.expr(node);
                }
                let id = self.id();
                let key = self.literal_element(parts[0]);
                let value = self.literal_element(parts[1]);
                Expr {
                    id,
                    span: Some(span(node)),
                    kind: ExprKind::KeyValue {
                        key: Box::new(key),
                        value: Box::new(value),
                    },
                }
            }
            "literal_value" => Expr {
                id: self.id(),
                span: Some(span(node)),
                kind: ExprKind::CompositeLit {
                    ty: None,
                    elts: self.literal_elements(node),
                },
            },
            _ => self.expr(node),
        }
    }

    fn func_literal(&mut self, node: Node<'_>) -> ExprKind {
        let Some(body) = node.child_by_field_name("body") else {
            return self.raw(node);
        };
        let (sig, _) = self.signature(node);
        ExprKind::FuncLit(Box::new(FuncLit {
            header: self.src[node.start_byte()..body.start_byte()]
                .trim_end()
                .to_string(),
            sig,
            body: self.block(body),
        }))
    }
}

/// Statement nodes of a block, comments included, in source order.
fn block_items(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    for child in named(node) {
        if child.kind() == "statement_list" {
            out.extend(named(child));
        } else {
            out.push(child);
        }
    }
    out
}

/// Specs of a `var`, `const` or `type` declaration, grouped or not.
fn specs_of(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    for child in named(node) {
        match child.kind() {
            "var_spec_list" | "const_spec_list" | "type_spec_list" => out.extend(named(child)),
            _ => out.push(child),
        }
    }
    out
}

/// `(s *Server)` and `(s *Store[K])` both give the base type name.
fn receiver_type_name(text: &str) -> String {
    let inner = text.trim().trim_start_matches('(').trim_end_matches(')');
    let base = inner.split('[').next().unwrap_or(inner);
    let ty = base.split_whitespace().last().unwrap_or(base);
    ty.trim_start_matches('*').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &str = r#"package main

import (
	"fmt"
	nethttp "net/http"
)

type Server struct {
	client *nethttp.Client
	name   string
}

// Run starts things.
func (s *Server) Run(addr string, opts ...int) (int, error) {
	x := 1 // counter

	switch x {
	case 1:
		fmt.Println("one")
	default:
	}
	for i := 0; i < 3; i++ {
		x += i
	}
	return x, nil
}

func main() {
	s := &Server{client: &nethttp.Client{}}
	go func() {
		s.Run(":8080")
	}()
}
"#;

    fn func<'p>(package: &'p Package, name: &str) -> &'p FuncDecl {
        package.functions().map(|(_, f)| f).find(|f| f.name == name).unwrap()
    }

    #[test]
    fn lowers_package_imports_and_declarations() {
        let package = parse_package_source("main.go", CODE).unwrap();
        let file = &package.files[0];
        assert_eq!(package.name, "main");
        assert_eq!(file.imports.decls.len(), 1);
        assert!(file.imports.decls[0].close_paren.is_some());
        assert_eq!(file.imports.path_of("nethttp"), Some("net/http"));
        assert_eq!(file.imports.anchor, "package main".len());
        assert_eq!(file.decls.len(), 3);

        let Decl::Gen { decl, .. } = &file.decls[0] else {
            panic!("expected a type declaration");
        };
        assert_eq!(decl.types[0].name, "Server");
        assert_eq!(decl.types[0].fields.len(), 2);
    }

    #[test]
    fn lowers_method_signature_and_body() {
        let package = parse_package_source("main.go", CODE).unwrap();
        let run = func(&package, "Run");
        assert_eq!(run.key(), "Server.Run");
        assert_eq!(run.result_text.as_deref(), Some("(int, error)"));
        assert!(run.sig.is_variadic());
        assert_eq!(run.sig.flat_results().len(), 2);
        assert_eq!(&package.files[0].source[run.span.start..run.span.start + 4], "func");
        assert_eq!(&package.files[0].source[run.body_offset..run.body_offset + 1], "{");

        let kinds: Vec<&str> = run
            .body
            .stmts
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Assign { .. } => "assign",
                StmtKind::Comment { trailing: true, .. } => "trailing",
                StmtKind::Switch { .. } => "switch",
                StmtKind::For { .. } => "for",
                StmtKind::Return(_) => "return",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["assign", "trailing", "switch", "for", "return"]);
        assert!(run.body.stmts[2].blank_before);
        match &run.body.stmts[2].kind {
            StmtKind::Switch { header, clauses } => {
                assert_eq!(header, "switch x");
                assert_eq!(clauses[0].header, "case 1:");
                assert_eq!(clauses[0].body.stmts.len(), 1);
                assert!(clauses[1].body.stmts.is_empty());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn lowers_closures_and_composite_literals() {
        let package = parse_package_source("main.go", CODE).unwrap();
        let main = func(&package, "main");
        let StmtKind::Assign { rhs, .. } = &main.body.stmts[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Unary { op, x } = &rhs[0].kind else {
            panic!("expected address-of");
        };
        assert_eq!(op, "&");
        let ExprKind::CompositeLit { elts, .. } = &x.kind else {
            panic!("expected literal");
        };
        assert!(matches!(elts[0].kind, ExprKind::KeyValue { .. }));

        let StmtKind::Go(call) = &main.body.stmts[1].kind else {
            panic!("expected go statement");
        };
        let (fun, _) = call.as_call().unwrap();
        let ExprKind::FuncLit(lit) = &fun.kind else {
            panic!("expected closure");
        };
        assert_eq!(lit.header, "func()");
        assert_eq!(lit.body.stmts.len(), 1);
    }

    #[test]
    fn node_ids_are_unique() {
        let package = parse_package_source("main.go", CODE).unwrap();
        let mut ids = Vec::new();
        for (_, f) in package.functions() {
            crate::domain::syntax::for_each_stmt(&f.body.stmts, &mut |s| ids.push(s.id));
        }
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
        assert!(ids.iter().all(|id| *id != NodeId::SYNTHETIC));
    }

    #[test]
    fn syntax_errors_carry_a_line() {
        let err = parse_package_source("bad.go", "package main\n\nfunc main() {\n\tx := \n}\n")
            .unwrap_err();
        match err {
            InstrumentError::Parse { line, .. } => assert!(line >= 4),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn receiver_names() {
        assert_eq!(receiver_type_name("(s *Server)"), "Server");
        assert_eq!(receiver_type_name("(Server)"), "Server");
        assert_eq!(receiver_type_name("(s *Store[K])"), "Store");
        assert_eq!(receiver_type_name("(m Map[K, V])"), "Map");
    }
}
