//! Rendering of the syntax model back to Go source.
//!
//! Only modified declarations and the import block are re-rendered; every
//! other byte of the file is copied from the original text. Within a
//! re-rendered declaration, nodes that kept their span are copied verbatim.

use crate::domain::imports::{ImportDecl, ImportSpec, Imports};
use crate::domain::package::SourceFile;
use crate::domain::syntax::{Block, Decl, Expr, ExprKind, Field, FuncDecl, Span, Stmt, StmtKind};
use crate::error::{InstrumentError, Result};

/// Renders `file` with all pending modifications applied.
pub fn render_file(file: &SourceFile) -> Result<String> {
    let source = file.source.as_str();
    let mut splices: Vec<Splice> = Vec::new();

    if file.imports.is_modified() {
        splices.extend(import_splices(&file.imports, source));
    }
    for decl in &file.decls {
        if let Decl::Func(func) = decl {
            if func.dirty {
                splices.push(Splice {
                    start: func.span.start,
                    end: func.span.end,
                    text: render_func(func, source),
                });
            }
        }
    }
    apply_splices(source, splices, &file.display_path())
}

/// Prints an expression from the model alone.
pub fn expr_text(expr: &Expr) -> String {
    let mut printer = Printer::new(None);
    printer.expr(expr, 0);
    printer.out
}

/// Prints a statement from the model alone, at depth zero.
pub fn stmt_text(stmt: &Stmt) -> String {
    let mut printer = Printer::new(None);
    printer.stmt(stmt, 0);
    printer.out
}

struct Splice {
    start: usize,
    end: usize,
    text: String,
}

fn apply_splices(source: &str, mut splices: Vec<Splice>, path: &str) -> Result<String> {
    splices.sort_by_key(|s| s.start);
    let mut out = String::with_capacity(source.len() + 256);
    let mut cursor = 0;
    for splice in splices {
        if splice.start < cursor || splice.end > source.len() || splice.start > splice.end {
            return Err(InstrumentError::structural(
                path,
                format!("overlapping edit at byte {}", splice.start),
            ));
        }
        out.push_str(&source[cursor..splice.start]);
        out.push_str(&splice.text);
        cursor = splice.end;
    }
    out.push_str(&source[cursor..]);
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════════════════
// Imports
// ═══════════════════════════════════════════════════════════════════════════

fn import_splices(imports: &Imports, source: &str) -> Vec<Splice> {
    let (std, third): (Vec<&ImportSpec>, Vec<&ImportSpec>) =
        imports.added.iter().partition(|s| s.is_standard_library());

    if let Some(group) = imports.decls.iter().find(|d| d.close_paren.is_some()) {
        return group_splices(group, &std, &third, source);
    }

    match imports.decls.last() {
        Some(single) => {
            let existing: Vec<&ImportSpec> = single.specs.iter().collect();
            let mut all_std: Vec<&ImportSpec> = existing
                .iter()
                .copied()
                .filter(|s| s.is_standard_library())
                .collect();
            let mut all_third: Vec<&ImportSpec> = existing
                .iter()
                .copied()
                .filter(|s| !s.is_standard_library())
                .collect();
            all_std.extend(std);
            all_third.extend(third);
            vec![Splice {
                start: single.span.start,
                end: single.span.end,
                text: import_group(&all_std, &all_third),
            }]
        }
        None => {
            let text = if std.len() + third.len() == 1 {
                let spec = std.first().or(third.first()).map(|s| s.render()).unwrap_or_default();
                format!("\n\nimport {}", spec)
            } else {
                format!("\n\n{}", import_group(&std, &third))
            };
            vec![Splice {
                start: imports.anchor,
                end: imports.anchor,
                text,
            }]
        }
    }
}

fn import_group(std: &[&ImportSpec], third: &[&ImportSpec]) -> String {
    let mut out = String::from("import (\n");
    for spec in std {
        out.push('\t');
        out.push_str(&spec.render());
        out.push('\n');
    }
    if !std.is_empty() && !third.is_empty() {
        out.push('\n');
    }
    for spec in third {
        out.push('\t');
        out.push_str(&spec.render());
        out.push('\n');
    }
    out.push(')');
    out
}

/// Inserts new specs into an existing `import ( ... )` block, standard
/// library paths after the last standard spec, others after the last
/// third-party spec.
fn group_splices(
    group: &ImportDecl,
    std: &[&ImportSpec],
    third: &[&ImportSpec],
    source: &str,
) -> Vec<Splice> {
    let mut splices = Vec::new();
    let last_std = group
        .specs
        .iter()
        .filter(|s| s.is_standard_library())
        .filter_map(|s| s.span)
        .last();
    let last_third = group
        .specs
        .iter()
        .filter(|s| !s.is_standard_library())
        .filter_map(|s| s.span)
        .last();
    let last_any = group.specs.iter().filter_map(|s| s.span).last();
    let open = source[group.span.start..group.span.end]
        .find('(')
        .map(|i| group.span.start + i + 1)
        .unwrap_or(group.span.start);

    let lines = |specs: &[&ImportSpec]| -> String {
        specs
            .iter()
            .map(|s| format!("\n\t{}", s.render()))
            .collect::<String>()
    };

    if !std.is_empty() {
        match last_std {
            Some(span) => splices.push(insert_at(line_end(source, span.end), lines(std))),
            None if last_any.is_some() => {
                splices.push(insert_at(open, format!("{}\n", lines(std))));
            }
            None => splices.push(insert_at(open, lines(std))),
        }
    }
    if !third.is_empty() {
        match (last_third, last_any) {
            (Some(span), _) => splices.push(insert_at(line_end(source, span.end), lines(third))),
            (None, Some(span)) => {
                splices.push(insert_at(line_end(source, span.end), format!("\n{}", lines(third))));
            }
            (None, None) if std.is_empty() => splices.push(insert_at(open, lines(third))),
            (None, None) => splices.push(insert_at(open, format!("\n{}", lines(third)))),
        }
    }
    if last_any.is_none() {
        // The group was empty: close the new lines before `)`.
        if let Some(close) = group.close_paren {
            splices.push(insert_at(close, "\n".to_string()));
        }
    }
    splices
}

fn insert_at(at: usize, text: String) -> Splice {
    Splice {
        start: at,
        end: at,
        text,
    }
}

/// Offset of the newline ending the line that contains `pos`.
fn line_end(source: &str, pos: usize) -> usize {
    source[pos..].find('\n').map(|i| pos + i).unwrap_or(source.len())
}

// ═══════════════════════════════════════════════════════════════════════════
// Declarations and statements
// ═══════════════════════════════════════════════════════════════════════════

fn render_func(func: &FuncDecl, source: &str) -> String {
    let mut printer = Printer::new(Some(source));
    if func.header_dirty {
        printer.func_header(func);
    } else {
        printer.push(&source[func.span.start..func.body_offset]);
    }
    printer.block(&func.body, 0);
    printer.out
}

struct Printer<'s> {
    source: Option<&'s str>,
    out: String,
}

impl<'s> Printer<'s> {
    fn new(source: Option<&'s str>) -> Self {
        Self {
            source,
            out: String::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push('\t');
        }
    }

    fn verbatim(&mut self, span: Option<Span>) -> bool {
        match (span, self.source) {
            (Some(span), Some(source)) => {
                self.out.push_str(span.text(source));
                true
            }
            _ => false,
        }
    }

    fn func_header(&mut self, func: &FuncDecl) {
        self.push("func ");
        if let Some(recv) = &func.receiver {
            self.push(&recv.text);
            self.push(" ");
        }
        self.push(&func.name);
        if let Some(tp) = &func.type_params {
            self.push(tp);
        }
        self.push("(");
        for (i, field) in func.sig.params.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.field(field);
        }
        self.push(")");
        if let Some(result) = &func.result_text {
            self.push(" ");
            self.push(result);
        }
        self.push(" ");
    }

    fn field(&mut self, field: &Field) {
        if !field.names.is_empty() {
            self.push(&field.names.join(", "));
            self.push(" ");
        }
        if field.variadic {
            self.push("...");
        }
        self.expr(&field.ty, 0);
    }

    fn block(&mut self, block: &Block, depth: usize) {
        if self.verbatim(block.span) {
            return;
        }
        self.push("{\n");
        self.stmt_list(&block.stmts, depth + 1);
        self.indent(depth);
        self.push("}");
    }

    fn stmt_list(&mut self, stmts: &[Stmt], depth: usize) {
        for (i, stmt) in stmts.iter().enumerate() {
            if let StmtKind::Comment {
                text,
                trailing: true,
            } = &stmt.kind
            {
                if i > 0 && self.out.ends_with('\n') {
                    self.out.pop();
                    self.push(" ");
                    self.push(text);
                    self.push("\n");
                    continue;
                }
            }
            if i > 0 && stmt.blank_before {
                self.push("\n");
            }
            self.indent(depth);
            self.stmt(stmt, depth);
            self.push("\n");
        }
    }

    fn stmt(&mut self, stmt: &Stmt, depth: usize) {
        if self.verbatim(stmt.span) {
            return;
        }
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e, depth),
            StmtKind::Assign { lhs, op, rhs } => {
                self.expr_list(lhs, depth);
                self.push(" ");
                self.push(op.as_str());
                self.push(" ");
                self.expr_list(rhs, depth);
            }
            StmtKind::Defer(e) => {
                self.push("defer ");
                self.expr(e, depth);
            }
            StmtKind::Go(e) => {
                self.push("go ");
                self.expr(e, depth);
            }
            StmtKind::Return(results) => {
                self.push("return");
                if !results.is_empty() {
                    self.push(" ");
                    self.expr_list(results, depth);
                }
            }
            StmtKind::If {
                init,
                cond,
                body,
                els,
            } => {
                self.push("if ");
                if let Some(init) = init {
                    self.stmt(init, depth);
                    self.push("; ");
                }
                self.expr(cond, depth);
                self.push(" ");
                self.block(body, depth);
                if let Some(els) = els {
                    self.push(" else ");
                    self.stmt(els, depth);
                }
            }
            StmtKind::Block(block) => self.block(block, depth),
            StmtKind::For { header, body } => {
                self.push(header);
                self.push(" ");
                self.block(body, depth);
            }
            StmtKind::Switch { header, clauses } => {
                self.push(header);
                self.push(" {\n");
                for clause in clauses {
                    self.indent(depth);
                    self.push(&clause.header);
                    self.push("\n");
                    self.stmt_list(&clause.body.stmts, depth + 1);
                }
                self.indent(depth);
                self.push("}");
            }
            StmtKind::Decl(decl) => self.push(&decl.text),
            StmtKind::Comment { text, .. } => self.push(text),
            StmtKind::Raw(text) => self.push(text),
        }
    }

    fn expr_list(&mut self, exprs: &[Expr], depth: usize) {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(e, depth);
        }
    }

    fn expr(&mut self, expr: &Expr, depth: usize) {
        if self.verbatim(expr.span) {
            return;
        }
        match &expr.kind {
            ExprKind::Ident(name) => self.push(name),
            ExprKind::Selector { x, sel } => {
                self.expr(x, depth);
                self.push(".");
                self.push(sel);
            }
            ExprKind::Call {
                fun,
                args,
                ellipsis,
            } => {
                self.expr(fun, depth);
                self.push("(");
                self.expr_list(args, depth);
                if *ellipsis {
                    self.push("...");
                }
                self.push(")");
            }
            ExprKind::Unary { op, x } => {
                self.push(op);
                self.expr(x, depth);
            }
            ExprKind::Star(x) => {
                self.push("*");
                self.expr(x, depth);
            }
            ExprKind::Binary { op, x, y } => {
                self.expr(x, depth);
                self.push(" ");
                self.push(op);
                self.push(" ");
                self.expr(y, depth);
            }
            ExprKind::Paren(x) => {
                self.push("(");
                self.expr(x, depth);
                self.push(")");
            }
            ExprKind::BasicLit(text) | ExprKind::Raw(text) => self.push(text),
            ExprKind::CompositeLit { ty, elts } => {
                if let Some(ty) = ty {
                    self.expr(ty, depth);
                }
                self.push("{");
                self.expr_list(elts, depth);
                self.push("}");
            }
            ExprKind::KeyValue { key, value } => {
                self.expr(key, depth);
                self.push(": ");
                self.expr(value, depth);
            }
            ExprKind::FuncLit(lit) => {
                self.push(&lit.header);
                self.push(" ");
                self.block(&lit.body, depth);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inject::synth;
    use crate::domain::syntax::AssignOp;
    use crate::infrastructure::go_parser::parse_package_source;

    #[test]
    fn prints_synthesized_statements_as_go() {
        assert_eq!(
            stmt_text(&synth::agent_init("NewRelicAgent", "err", "newrelic", "os", "AST Example", "NEW_RELIC_LICENSE_KEY")),
            r#"NewRelicAgent, err := newrelic.NewApplication(newrelic.ConfigAppName("AST Example"), newrelic.ConfigLicense(os.Getenv("NEW_RELIC_LICENSE_KEY")))"#
        );
        assert_eq!(
            stmt_text(&synth::panic_on_error("err")),
            "if err != nil {\n\tpanic(err)\n}"
        );
        assert_eq!(
            stmt_text(&synth::agent_shutdown("NewRelicAgent", "time", 5)),
            "defer NewRelicAgent.Shutdown(5 * time.Second)"
        );
        let stmt = Stmt::assign(vec![Expr::ident("x")], AssignOp::Compound("+=".into()), vec![Expr::basic("1")]);
        assert_eq!(stmt_text(&stmt), "x += 1");
    }

    #[test]
    fn untouched_file_renders_identically() {
        let code = "package main\n\n// doc\nfunc main() {\n\tx := 1 // one\n\n\t_ = x\n}\n";
        let package = parse_package_source("main.go", code).unwrap();
        assert_eq!(render_file(&package.files[0]).unwrap(), code);
    }

    #[test]
    fn reprinted_body_keeps_layout_and_comments() {
        let code = "package main\n\nfunc main() {\n\t// setup\n\tx := 1 // one\n\n\tif x > 0 {\n\t\tprintln(x)\n\t}\n}\n";
        let mut package = parse_package_source("main.go", code).unwrap();
        let Decl::Func(main) = &mut package.files[0].decls[0] else {
            panic!("expected main");
        };
        main.body.stmts.insert(0, Stmt::expr(Expr::call(Expr::ident("start"), vec![])));
        main.body.span = None;
        main.dirty = true;

        let rendered = render_file(&package.files[0]).unwrap();
        assert_eq!(
            rendered,
            "package main\n\nfunc main() {\n\tstart()\n\t// setup\n\tx := 1 // one\n\n\tif x > 0 {\n\t\tprintln(x)\n\t}\n}\n"
        );
    }

    #[test]
    fn imports_are_added_to_groups_and_singles() {
        let grouped = "package main\n\nimport (\n\t\"fmt\"\n)\n\nfunc main() {}\n";
        let mut package = parse_package_source("main.go", grouped).unwrap();
        package.files[0].imports.ensure("time");
        package.files[0].imports.ensure("github.com/newrelic/go-agent/v3/newrelic");
        assert_eq!(
            render_file(&package.files[0]).unwrap(),
            "package main\n\nimport (\n\t\"fmt\"\n\t\"time\"\n\n\t\"github.com/newrelic/go-agent/v3/newrelic\"\n)\n\nfunc main() {}\n"
        );

        let single = "package main\n\nimport \"net/http\"\n\nfunc main() {}\n";
        let mut package = parse_package_source("main.go", single).unwrap();
        package.files[0].imports.ensure("os");
        assert_eq!(
            render_file(&package.files[0]).unwrap(),
            "package main\n\nimport (\n\t\"net/http\"\n\t\"os\"\n)\n\nfunc main() {}\n"
        );

        let none = "package main\n\nfunc main() {}\n";
        let mut package = parse_package_source("main.go", none).unwrap();
        package.files[0].imports.ensure("os");
        assert_eq!(
            render_file(&package.files[0]).unwrap(),
            "package main\n\nimport \"os\"\n\nfunc main() {}\n"
        );
    }

    #[test]
    fn dirty_header_is_printed_from_the_model() {
        let code = "package main\n\nfunc helper(a, b int) error {\n\treturn nil\n}\n";
        let mut package = parse_package_source("main.go", code).unwrap();
        let Decl::Func(helper) = &mut package.files[0].decls[0] else {
            panic!("expected helper");
        };
        helper.sig.params.push(synth::pointer_param("app", "newrelic", "Application"));
        helper.header_dirty = true;
        helper.dirty = true;
        assert_eq!(
            render_file(&package.files[0]).unwrap(),
            "package main\n\nfunc helper(a, b int, app *newrelic.Application) error {\n\treturn nil\n}\n"
        );
    }
}
