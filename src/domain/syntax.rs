//! Owned Go syntax model.
//!
//! Nodes loaded from source keep the byte span they came from. A node that
//! still has its span renders verbatim; synthesized nodes and any ancestor
//! of a modification drop the span and are printed from the model instead.
//! Constructs the analysis never rewrites are kept as opaque `Raw` text.

/// Identity of a loaded node, unique within one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Id carried by every node the injector creates.
    pub const SYNTHETIC: NodeId = NodeId(0);
}

/// Byte range into the original file text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start..self.end]
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Expressions
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub span: Option<Span>,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Ident(String),
    Selector { x: Box<Expr>, sel: String },
    Call { fun: Box<Expr>, args: Vec<Expr>, ellipsis: bool },
    /// `&x`, `-x`, `!x`, `<-x`
    Unary { op: String, x: Box<Expr> },
    /// `*x` in both type and value position.
    Star(Box<Expr>),
    Binary { op: String, x: Box<Expr>, y: Box<Expr> },
    Paren(Box<Expr>),
    BasicLit(String),
    CompositeLit { ty: Option<Box<Expr>>, elts: Vec<Expr> },
    KeyValue { key: Box<Expr>, value: Box<Expr> },
    FuncLit(Box<FuncLit>),
    Raw(String),
}

/// A function literal. The header (`func(...) T`) is kept as text.
#[derive(Debug, Clone)]
pub struct FuncLit {
    pub header: String,
    pub sig: Signature,
    pub body: Block,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            id: NodeId::SYNTHETIC,
            span: None,
            kind,
        }
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Ident(name.into()))
    }

    pub fn selector(x: Expr, sel: impl Into<String>) -> Self {
        Self::new(ExprKind::Selector {
            x: Box::new(x),
            sel: sel.into(),
        })
    }

    /// `pkg.name`
    pub fn qualified(pkg: &str, name: &str) -> Self {
        Self::selector(Self::ident(pkg), name)
    }

    pub fn call(fun: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            fun: Box::new(fun),
            args,
            ellipsis: false,
        })
    }

    pub fn binary(x: Expr, op: &str, y: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op: op.to_string(),
            x: Box::new(x),
            y: Box::new(y),
        })
    }

    pub fn unary(op: &str, x: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op: op.to_string(),
            x: Box::new(x),
        })
    }

    pub fn star(x: Expr) -> Self {
        Self::new(ExprKind::Star(Box::new(x)))
    }

    pub fn basic(text: impl Into<String>) -> Self {
        Self::new(ExprKind::BasicLit(text.into()))
    }

    /// A Go interpreted string literal holding `value`.
    pub fn string(value: &str) -> Self {
        Self::basic(go_quote(value))
    }

    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_selector(&self) -> Option<(&Expr, &str)> {
        match &self.kind {
            ExprKind::Selector { x, sel } => Some((x, sel)),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<(&Expr, &[Expr])> {
        match &self.kind {
            ExprKind::Call { fun, args, .. } => Some((fun, args)),
            _ => None,
        }
    }

    /// Strips any number of enclosing parentheses.
    pub fn unparen(&self) -> &Expr {
        match &self.kind {
            ExprKind::Paren(inner) => inner.unparen(),
            _ => self,
        }
    }

    /// True for `<x>.<sel>` where `x` is the identifier `pkg`.
    pub fn is_selector_of(&self, pkg: &str, sel: &str) -> bool {
        match self.as_selector() {
            Some((x, s)) => s == sel && x.as_ident() == Some(pkg),
            None => false,
        }
    }

    /// Structural equality that ignores ids and spans.
    pub fn same_shape(&self, other: &Expr) -> bool {
        use ExprKind::*;
        match (&self.kind, &other.kind) {
            (Ident(a), Ident(b)) => a == b,
            (Selector { x: xa, sel: sa }, Selector { x: xb, sel: sb }) => {
                sa == sb && xa.same_shape(xb)
            }
            (
                Call { fun: fa, args: aa, ellipsis: ea },
                Call { fun: fb, args: ab, ellipsis: eb },
            ) => {
                ea == eb
                    && fa.same_shape(fb)
                    && aa.len() == ab.len()
                    && aa.iter().zip(ab).all(|(a, b)| a.same_shape(b))
            }
            (Unary { op: oa, x: xa }, Unary { op: ob, x: xb }) => oa == ob && xa.same_shape(xb),
            (Star(a), Star(b)) | (Paren(a), Paren(b)) => a.same_shape(b),
            (Binary { op: oa, x: xa, y: ya }, Binary { op: ob, x: xb, y: yb }) => {
                oa == ob && xa.same_shape(xb) && ya.same_shape(yb)
            }
            (BasicLit(a), BasicLit(b)) | (Raw(a), Raw(b)) => a == b,
            _ => false,
        }
    }
}

/// Quotes `value` as a Go interpreted string literal.
pub fn go_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// Statements
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Option<Span>,
    /// 1-based source line; 0 for synthesized statements.
    pub line: usize,
    /// An empty line separated this statement from the previous one.
    pub blank_before: bool,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOp {
    /// `:=`
    Define,
    /// `=`
    Assign,
    /// `+=`, `|=`, ...
    Compound(String),
}

impl AssignOp {
    pub fn as_str(&self) -> &str {
        match self {
            AssignOp::Define => ":=",
            AssignOp::Assign => "=",
            AssignOp::Compound(op) => op,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        lhs: Vec<Expr>,
        op: AssignOp,
        rhs: Vec<Expr>,
    },
    Defer(Expr),
    Go(Expr),
    Return(Vec<Expr>),
    If {
        init: Option<Box<Stmt>>,
        cond: Expr,
        body: Block,
        /// Either another `If` or a `Block`.
        els: Option<Box<Stmt>>,
    },
    Block(Block),
    /// Loop; `header` is the text before the body, e.g. `for i := range xs`.
    For { header: String, body: Block },
    /// Expression, type switch or select; `header` as for `For`.
    Switch {
        header: String,
        clauses: Vec<CaseClause>,
    },
    Decl(GenDecl),
    Comment { text: String, trailing: bool },
    Raw(String),
}

#[derive(Debug, Clone)]
pub struct CaseClause {
    /// `case x, y:` or `default:`
    pub header: String,
    pub body: Block,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub span: Option<Span>,
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { span: None, stmts }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            id: NodeId::SYNTHETIC,
            span: None,
            line: 0,
            blank_before: false,
            kind,
        }
    }

    pub fn expr(expr: Expr) -> Self {
        Self::new(StmtKind::Expr(expr))
    }

    pub fn assign(lhs: Vec<Expr>, op: AssignOp, rhs: Vec<Expr>) -> Self {
        Self::new(StmtKind::Assign { lhs, op, rhs })
    }

    pub fn defer(call: Expr) -> Self {
        Self::new(StmtKind::Defer(call))
    }

    pub fn if_then(cond: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::If {
            init: None,
            cond,
            body: Block::new(body),
            els: None,
        })
    }

    /// Names bound or assigned by a plain identifier on the left-hand side.
    pub fn assigned_names(&self) -> Vec<&str> {
        match &self.kind {
            StmtKind::Assign { lhs, .. } => lhs.iter().filter_map(Expr::as_ident).collect(),
            StmtKind::Decl(decl) => decl
                .values
                .iter()
                .flat_map(|spec| spec.names.iter().map(String::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Declarations
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenKeyword {
    Var,
    Const,
    Type,
}

/// A `var`, `const` or `type` declaration. Always rendered from `text`.
#[derive(Debug, Clone)]
pub struct GenDecl {
    pub keyword: GenKeyword,
    pub values: Vec<ValueSpec>,
    pub types: Vec<TypeSpec>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ValueSpec {
    pub names: Vec<String>,
    pub ty: Option<Expr>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub name: String,
    pub ty: Expr,
    /// Fields when `ty` is a struct type.
    pub fields: Vec<Field>,
}

/// A parameter, result or struct field group: `a, b T`.
#[derive(Debug, Clone)]
pub struct Field {
    pub names: Vec<String>,
    pub ty: Expr,
    pub variadic: bool,
}

impl Field {
    pub fn named(name: &str, ty: Expr) -> Self {
        Self {
            names: vec![name.to_string()],
            ty,
            variadic: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub params: Vec<Field>,
    pub results: Vec<Field>,
}

impl Signature {
    /// Parameters flattened to one entry per declared name.
    pub fn flat_params(&self) -> Vec<(Option<&str>, &Field)> {
        flatten(&self.params)
    }

    pub fn flat_results(&self) -> Vec<(Option<&str>, &Field)> {
        flatten(&self.results)
    }

    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|f| f.variadic)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|f| f.names.iter().any(|n| n == name))
    }
}

fn flatten(fields: &[Field]) -> Vec<(Option<&str>, &Field)> {
    let mut out = Vec::new();
    for field in fields {
        if field.names.is_empty() {
            out.push((None, field));
        } else {
            for name in &field.names {
                out.push((Some(name.as_str()), field));
            }
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct Receiver {
    /// Verbatim `(s *Server)`.
    pub text: String,
    /// Base type name, `Server`.
    pub type_name: String,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub id: NodeId,
    pub span: Span,
    /// Offset of the opening brace of the body in the original text.
    pub body_offset: usize,
    pub line: usize,
    /// Body or header changed; the declaration is re-rendered.
    pub dirty: bool,
    /// Parameters changed; the header is printed from the model.
    pub header_dirty: bool,
    pub name: String,
    pub receiver: Option<Receiver>,
    pub type_params: Option<String>,
    pub sig: Signature,
    /// Verbatim result list, e.g. `(int, error)`.
    pub result_text: Option<String>,
    pub body: Block,
}

impl FuncDecl {
    /// Package-unique key: `name`, or `Type.name` for methods.
    pub fn key(&self) -> String {
        match &self.receiver {
            Some(recv) => format!("{}.{}", recv.type_name, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Decl {
    Func(FuncDecl),
    Gen { span: Span, decl: GenDecl },
}

// ═══════════════════════════════════════════════════════════════════════════
// Child access
// ═══════════════════════════════════════════════════════════════════════════

pub enum ChildRef<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
    Block(&'a Block),
}

pub enum ChildMut<'a> {
    Stmt(&'a mut Stmt),
    Expr(&'a mut Expr),
    Block(&'a mut Block),
}

impl Expr {
    pub fn children(&self) -> Vec<ChildRef<'_>> {
        match &self.kind {
            ExprKind::Selector { x, .. }
            | ExprKind::Unary { x, .. }
            | ExprKind::Star(x)
            | ExprKind::Paren(x) => vec![ChildRef::Expr(x)],
            ExprKind::Call { fun, args, .. } => {
                let mut out = vec![ChildRef::Expr(fun.as_ref())];
                out.extend(args.iter().map(ChildRef::Expr));
                out
            }
            ExprKind::Binary { x, y, .. } => vec![ChildRef::Expr(x), ChildRef::Expr(y)],
            ExprKind::CompositeLit { ty, elts } => {
                let mut out = Vec::new();
                if let Some(ty) = ty {
                    out.push(ChildRef::Expr(ty.as_ref()));
                }
                out.extend(elts.iter().map(ChildRef::Expr));
                out
            }
            ExprKind::KeyValue { key, value } => {
                vec![ChildRef::Expr(key), ChildRef::Expr(value)]
            }
            ExprKind::FuncLit(lit) => vec![ChildRef::Block(&lit.body)],
            ExprKind::Ident(_) | ExprKind::BasicLit(_) | ExprKind::Raw(_) => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<ChildMut<'_>> {
        match &mut self.kind {
            ExprKind::Selector { x, .. }
            | ExprKind::Unary { x, .. }
            | ExprKind::Star(x)
            | ExprKind::Paren(x) => vec![ChildMut::Expr(x)],
            ExprKind::Call { fun, args, .. } => {
                let mut out = vec![ChildMut::Expr(fun.as_mut())];
                out.extend(args.iter_mut().map(ChildMut::Expr));
                out
            }
            ExprKind::Binary { x, y, .. } => vec![ChildMut::Expr(x), ChildMut::Expr(y)],
            ExprKind::CompositeLit { ty, elts } => {
                let mut out = Vec::new();
                if let Some(ty) = ty {
                    out.push(ChildMut::Expr(ty.as_mut()));
                }
                out.extend(elts.iter_mut().map(ChildMut::Expr));
                out
            }
            ExprKind::KeyValue { key, value } => {
                vec![ChildMut::Expr(key), ChildMut::Expr(value)]
            }
            ExprKind::FuncLit(lit) => vec![ChildMut::Block(&mut lit.body)],
            ExprKind::Ident(_) | ExprKind::BasicLit(_) | ExprKind::Raw(_) => Vec::new(),
        }
    }
}

impl Stmt {
    pub fn children(&self) -> Vec<ChildRef<'_>> {
        match &self.kind {
            StmtKind::Expr(e) | StmtKind::Defer(e) | StmtKind::Go(e) => vec![ChildRef::Expr(e)],
            StmtKind::Assign { lhs, rhs, .. } => {
                lhs.iter().chain(rhs.iter()).map(ChildRef::Expr).collect()
            }
            StmtKind::Return(results) => results.iter().map(ChildRef::Expr).collect(),
            StmtKind::If {
                init,
                cond,
                body,
                els,
            } => {
                let mut out = Vec::new();
                if let Some(init) = init {
                    out.push(ChildRef::Stmt(init.as_ref()));
                }
                out.push(ChildRef::Expr(cond));
                out.push(ChildRef::Block(body));
                if let Some(els) = els {
                    out.push(ChildRef::Stmt(els.as_ref()));
                }
                out
            }
            StmtKind::Block(block) | StmtKind::For { body: block, .. } => {
                vec![ChildRef::Block(block)]
            }
            StmtKind::Switch { clauses, .. } => {
                clauses.iter().map(|c| ChildRef::Block(&c.body)).collect()
            }
            StmtKind::Decl(_) | StmtKind::Comment { .. } | StmtKind::Raw(_) => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<ChildMut<'_>> {
        match &mut self.kind {
            StmtKind::Expr(e) | StmtKind::Defer(e) | StmtKind::Go(e) => vec![ChildMut::Expr(e)],
            StmtKind::Assign { lhs, rhs, .. } => lhs
                .iter_mut()
                .chain(rhs.iter_mut())
                .map(ChildMut::Expr)
                .collect(),
            StmtKind::Return(results) => results.iter_mut().map(ChildMut::Expr).collect(),
            StmtKind::If {
                init,
                cond,
                body,
                els,
            } => {
                let mut out = Vec::new();
                if let Some(init) = init {
                    out.push(ChildMut::Stmt(init.as_mut()));
                }
                out.push(ChildMut::Expr(cond));
                out.push(ChildMut::Block(body));
                if let Some(els) = els {
                    out.push(ChildMut::Stmt(els.as_mut()));
                }
                out
            }
            StmtKind::Block(block) | StmtKind::For { body: block, .. } => {
                vec![ChildMut::Block(block)]
            }
            StmtKind::Switch { clauses, .. } => clauses
                .iter_mut()
                .map(|c| ChildMut::Block(&mut c.body))
                .collect(),
            StmtKind::Decl(_) | StmtKind::Comment { .. } | StmtKind::Raw(_) => Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Walks
// ═══════════════════════════════════════════════════════════════════════════

/// Pre-order walk over every expression under `stmt`, nested blocks included.
pub fn for_each_expr<'a>(stmt: &'a Stmt, f: &mut dyn FnMut(&'a Expr)) {
    for child in stmt.children() {
        visit_child(child, f);
    }
}

fn visit_child<'a>(child: ChildRef<'a>, f: &mut dyn FnMut(&'a Expr)) {
    match child {
        ChildRef::Stmt(s) => for_each_expr(s, f),
        ChildRef::Expr(e) => {
            f(e);
            for c in e.children() {
                visit_child(c, f);
            }
        }
        ChildRef::Block(b) => {
            for s in &b.stmts {
                for_each_expr(s, f);
            }
        }
    }
}

/// Pre-order walk over every statement in `stmts`, nested blocks included.
pub fn for_each_stmt<'a>(stmts: &'a [Stmt], f: &mut dyn FnMut(&'a Stmt)) {
    for stmt in stmts {
        f(stmt);
        for child in stmt.children() {
            match child {
                ChildRef::Stmt(s) => for_each_stmt(std::slice::from_ref(s), f),
                ChildRef::Block(b) => for_each_stmt(&b.stmts, f),
                ChildRef::Expr(e) => for_each_nested_block(e, f),
            }
        }
    }
}

fn for_each_nested_block<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Stmt)) {
    for child in expr.children() {
        match child {
            ChildRef::Block(b) => for_each_stmt(&b.stmts, f),
            ChildRef::Expr(e) => for_each_nested_block(e, f),
            ChildRef::Stmt(s) => for_each_stmt(std::slice::from_ref(s), f),
        }
    }
}

/// Finds the expression with `id` under `block` and applies `f` to it.
/// Every node on the path loses its span so the edit is re-rendered.
pub fn edit_expr(block: &mut Block, id: NodeId, f: &mut dyn FnMut(&mut Expr)) -> bool {
    if id == NodeId::SYNTHETIC {
        return false;
    }
    edit_in_block(block, id, f)
}

fn edit_in_block(block: &mut Block, id: NodeId, f: &mut dyn FnMut(&mut Expr)) -> bool {
    for stmt in block.stmts.iter_mut() {
        if edit_in_stmt(stmt, id, f) {
            block.span = None;
            return true;
        }
    }
    false
}

fn edit_in_stmt(stmt: &mut Stmt, id: NodeId, f: &mut dyn FnMut(&mut Expr)) -> bool {
    let mut found = false;
    for child in stmt.children_mut() {
        found = edit_in_child(child, id, f);
        if found {
            break;
        }
    }
    if found {
        stmt.span = None;
    }
    found
}

fn edit_in_expr(expr: &mut Expr, id: NodeId, f: &mut dyn FnMut(&mut Expr)) -> bool {
    if expr.id == id {
        f(expr);
        expr.span = None;
        return true;
    }
    let mut found = false;
    for child in expr.children_mut() {
        found = edit_in_child(child, id, f);
        if found {
            break;
        }
    }
    if found {
        expr.span = None;
    }
    found
}

fn edit_in_child(child: ChildMut<'_>, id: NodeId, f: &mut dyn FnMut(&mut Expr)) -> bool {
    match child {
        ChildMut::Stmt(s) => edit_in_stmt(s, id, f),
        ChildMut::Expr(e) => edit_in_expr(e, id, f),
        ChildMut::Block(b) => edit_in_block(b, id, f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_quote_escapes_specials() {
        assert_eq!(go_quote("AST Example"), "\"AST Example\"");
        assert_eq!(go_quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(go_quote("bell\u{7}"), "\"bell\\x07\"");
    }

    #[test]
    fn same_shape_ignores_identity() {
        let mut a = Expr::call(Expr::qualified("http", "Get"), vec![Expr::string("x")]);
        a.id = NodeId(42);
        a.span = Some(Span::new(0, 10));
        let b = Expr::call(Expr::qualified("http", "Get"), vec![Expr::string("x")]);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&Expr::ident("http")));
    }

    #[test]
    fn edit_expr_clears_spans_on_path() {
        let mut call = Expr::call(Expr::ident("helper"), vec![]);
        call.id = NodeId(7);
        call.span = Some(Span::new(1, 9));
        let mut stmt = Stmt::expr(call);
        stmt.span = Some(Span::new(1, 9));
        let mut block = Block {
            span: Some(Span::new(0, 10)),
            stmts: vec![stmt],
        };

        let found = edit_expr(&mut block, NodeId(7), &mut |e| {
            if let ExprKind::Call { args, .. } = &mut e.kind {
                args.push(Expr::ident("nil"));
            }
        });

        assert!(found);
        assert!(block.span.is_none());
        assert!(block.stmts[0].span.is_none());
        match &block.stmts[0].kind {
            StmtKind::Expr(e) => assert_eq!(e.as_call().map(|(_, a)| a.len()), Some(1)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn signature_flattens_grouped_params() {
        let sig = Signature {
            params: vec![Field {
                names: vec!["a".into(), "b".into()],
                ty: Expr::ident("int"),
                variadic: false,
            }],
            results: Vec::new(),
        };
        assert_eq!(sig.flat_params().len(), 2);
        assert!(sig.has_param("b"));
        assert!(!sig.is_variadic());
    }
}
