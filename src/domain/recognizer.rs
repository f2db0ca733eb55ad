//! Pattern recognizers.
//!
//! Four stateless classifiers over single statements or expressions. A
//! classifier that does not match returns `None` (or `false`); declining is
//! the normal outcome and never an error.

use std::fmt;

use crate::domain::imports::Imports;
use crate::domain::index::{PackageIndex, TypeRef, NET_HTTP};
use crate::domain::syntax::{AssignOp, Expr, ExprKind, Signature, Stmt, StmtKind};

/// Methods of `*http.Client` that send a request.
const CLIENT_METHODS: [&str; 5] = ["Do", "Get", "Head", "Post", "PostForm"];

// ═══════════════════════════════════════════════════════════════════════════
// (1) Client definitions
// ═══════════════════════════════════════════════════════════════════════════

/// Name bound by `v := &http.Client{...}` or `v := http.Client{...}`.
///
/// Plain assignment and aliases of an existing client (`b := a`) are not
/// definitions.
pub fn client_definition<'a>(stmt: &'a Stmt, imports: &Imports) -> Option<&'a str> {
    let StmtKind::Assign {
        lhs,
        op: AssignOp::Define,
        rhs,
    } = &stmt.kind
    else {
        return None;
    };
    if lhs.len() != 1 || rhs.len() != 1 {
        return None;
    }
    let name = lhs[0].as_ident().filter(|n| *n != "_")?;
    is_client_literal(&rhs[0], imports).then_some(name)
}

pub fn is_client_definition(stmt: &Stmt, imports: &Imports) -> bool {
    client_definition(stmt, imports).is_some()
}

fn is_client_literal(expr: &Expr, imports: &Imports) -> bool {
    let literal = match &expr.unparen().kind {
        ExprKind::Unary { op, x } if op == "&" => x.unparen(),
        _ => expr.unparen(),
    };
    match &literal.kind {
        ExprKind::CompositeLit { ty: Some(ty), .. } => {
            TypeRef::from_type_expr(ty, imports).is_http("Client")
        }
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// (2) Shorthand verbs
// ═══════════════════════════════════════════════════════════════════════════

/// Package-level `net/http` helpers that cannot carry a request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ShorthandVerb {
    Get,
    Post,
    PostForm,
    Head,
}

impl ShorthandVerb {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Get" => Some(ShorthandVerb::Get),
            "Post" => Some(ShorthandVerb::Post),
            "PostForm" => Some(ShorthandVerb::PostForm),
            "Head" => Some(ShorthandVerb::Head),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShorthandVerb::Get => "Get",
            ShorthandVerb::Post => "Post",
            ShorthandVerb::PostForm => "PostForm",
            ShorthandVerb::Head => "Head",
        }
    }
}

impl fmt::Display for ShorthandVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matches `http.Get(...)`, `http.Post(...)`, `http.PostForm(...)` and
/// `http.Head(...)`. Methods on a client value never match.
pub fn shorthand_verb(call: &Expr, imports: &Imports) -> Option<ShorthandVerb> {
    let (fun, _) = call.as_call()?;
    let (x, sel) = fun.unparen().as_selector()?;
    let alias = x.as_ident()?;
    if !imports.resolves_to(alias, NET_HTTP) {
        return None;
    }
    ShorthandVerb::from_name(sel)
}

/// Shorthand verb called by the principal call of `stmt`.
pub fn shorthand_verb_in_stmt<'a>(
    stmt: &'a Stmt,
    imports: &Imports,
) -> Option<(ShorthandVerb, &'a Expr)> {
    let call = principal_call(stmt)?;
    shorthand_verb(call, imports).map(|verb| (verb, call))
}

// ═══════════════════════════════════════════════════════════════════════════
// (3) Outbound calls and client resolution
// ═══════════════════════════════════════════════════════════════════════════

/// Variable holding the client of an outbound call, when it can be named.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientBinding {
    variable: Option<String>,
}

impl ClientBinding {
    pub fn bound(variable: impl Into<String>) -> Self {
        Self {
            variable: Some(variable.into()),
        }
    }

    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.variable.is_some()
    }

    /// The variable name, or `""` when unbound.
    pub fn variable_name(&self) -> &str {
        self.variable.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientReceiver {
    /// `http.Get(...)` and friends.
    Package,
    /// `http.DefaultClient.<method>(...)`
    DefaultClient,
    /// A local variable or parameter.
    Local(String),
    /// Struct fields, call results and everything else.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    pub method: String,
    pub binding: ClientBinding,
    pub receiver: ClientReceiver,
}

/// What the recognizer needs to know about the surroundings of a call.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub imports: &'a Imports,
    pub index: &'a PackageIndex,
    /// Key of the enclosing function declaration.
    pub function: Option<&'a str>,
    /// Statements before the current one in the same block.
    pub preceding: &'a [Stmt],
}

impl ResolveContext<'_> {
    fn is_local(&self, name: &str) -> bool {
        self.function
            .and_then(|f| self.index.function(f))
            .is_some_and(|info| info.local(name).is_some())
    }
}

/// Recognizes a call that sends an HTTP request through `net/http`.
pub fn outbound_call(call: &Expr, ctx: &ResolveContext<'_>) -> Option<OutboundCall> {
    let (fun, _) = call.as_call()?;
    let (x, sel) = fun.unparen().as_selector()?;

    if let Some(alias) = x.as_ident() {
        if !ctx.is_local(alias) && ctx.imports.resolves_to(alias, NET_HTTP) {
            return ShorthandVerb::from_name(sel).map(|verb| OutboundCall {
                method: verb.as_str().to_string(),
                binding: ClientBinding::unbound(),
                receiver: ClientReceiver::Package,
            });
        }
    }

    if !CLIENT_METHODS.contains(&sel) {
        return None;
    }
    let ty = ctx.index.type_of(x, ctx.function, ctx.imports);
    if !ty.deref().is_http("Client") {
        return None;
    }

    let receiver = x.unparen();
    let (receiver, binding) = if is_default_client(receiver, ctx) {
        (ClientReceiver::DefaultClient, ClientBinding::bound("DefaultClient"))
    } else if let Some(name) = receiver.as_ident() {
        (
            ClientReceiver::Local(name.to_string()),
            resolve_local(name, ctx.preceding, ctx.imports),
        )
    } else {
        (ClientReceiver::Other, ClientBinding::unbound())
    };

    Some(OutboundCall {
        method: sel.to_string(),
        binding,
        receiver,
    })
}

/// Method name of an outbound call, e.g. `"Do"` or `"Get"`.
pub fn http_method_name(call: &Expr, ctx: &ResolveContext<'_>) -> Option<String> {
    outbound_call(call, ctx).map(|c| c.method)
}

/// Client variable behind an outbound call; unbound when not an outbound
/// call or not resolvable.
pub fn client_binding(call: &Expr, ctx: &ResolveContext<'_>) -> ClientBinding {
    outbound_call(call, ctx)
        .map(|c| c.binding)
        .unwrap_or_default()
}

fn is_default_client(expr: &Expr, ctx: &ResolveContext<'_>) -> bool {
    match expr.as_selector() {
        Some((x, "DefaultClient")) => x
            .as_ident()
            .is_some_and(|alias| !ctx.is_local(alias) && ctx.imports.resolves_to(alias, NET_HTTP)),
        _ => false,
    }
}

/// Bound when the nearest earlier statement of the block that assigns
/// `name` is a client definition for it.
fn resolve_local(name: &str, preceding: &[Stmt], imports: &Imports) -> ClientBinding {
    let last_binding = preceding
        .iter()
        .rev()
        .find(|stmt| stmt.assigned_names().contains(&name));
    match last_binding {
        Some(stmt) if client_definition(stmt, imports) == Some(name) => {
            ClientBinding::bound(name)
        }
        _ => ClientBinding::unbound(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// (4) Handler signatures
// ═══════════════════════════════════════════════════════════════════════════

/// Exactly `(http.ResponseWriter, *http.Request)`, in that order.
pub fn is_http_handler(sig: &Signature, imports: &Imports) -> bool {
    let params = sig.flat_params();
    if params.len() != 2 || sig.is_variadic() {
        return false;
    }
    let writer = TypeRef::from_type_expr(&params[0].1.ty, imports);
    let request = TypeRef::from_type_expr(&params[1].1.ty, imports);
    writer.is_http("ResponseWriter")
        && matches!(&request, TypeRef::Pointer(inner) if inner.is_http("Request"))
}

/// A function literal or package function with a handler signature.
pub fn is_handler_value(expr: &Expr, imports: &Imports, index: &PackageIndex) -> bool {
    match &expr.unparen().kind {
        ExprKind::FuncLit(lit) => is_http_handler(&lit.sig, imports),
        ExprKind::Ident(name) => index.is_handler(name),
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

/// The call a statement is built around: an expression statement, the single
/// right-hand side of an assignment, a single return value, or the init
/// statement of an `if`.
pub fn principal_call(stmt: &Stmt) -> Option<&Expr> {
    let candidate = match &stmt.kind {
        StmtKind::Expr(e) => e,
        StmtKind::Assign { rhs, .. } if rhs.len() == 1 => &rhs[0],
        StmtKind::Return(results) if results.len() == 1 => &results[0],
        StmtKind::If { init: Some(init), .. } => return principal_call(init),
        _ => return None,
    };
    let candidate = candidate.unparen();
    matches!(candidate.kind, ExprKind::Call { .. }).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::syntax::{Decl, FuncDecl};
    use crate::infrastructure::go_parser::parse_package_source;

    fn with_main<R>(body: &str, f: impl FnOnce(&FuncDecl, &Imports, &PackageIndex) -> R) -> R {
        let code = format!("package main\n\nimport \"net/http\"\n\nfunc main() {{\n{}\n}}\n", body);
        let package = parse_package_source("main.go", &code).unwrap();
        let index = PackageIndex::build(&package, "main");
        let file = &package.files[0];
        let main = file
            .decls
            .iter()
            .find_map(|d| match d {
                Decl::Func(f) if f.name == "main" => Some(f),
                _ => None,
            })
            .unwrap();
        f(main, &file.imports, &index)
    }

    #[test]
    fn client_definition_forms() {
        with_main(
            "\ta := &http.Client{}\n\tb := http.Client{Timeout: 0}\n\tvar c *http.Client\n\tc = &http.Client{}\n\td := a\n\t_ = b\n\t_ = c\n\t_ = d",
            |main, imports, _| {
                let stmts = &main.body.stmts;
                assert_eq!(client_definition(&stmts[0], imports), Some("a"));
                assert_eq!(client_definition(&stmts[1], imports), Some("b"));
                assert!(!is_client_definition(&stmts[3], imports));
                assert!(!is_client_definition(&stmts[4], imports));
            },
        );
    }

    #[test]
    fn reassignment_unbinds_client() {
        with_main(
            "\tclient := &http.Client{}\n\tclient = other()\n\treq, _ := http.NewRequest(\"GET\", \"u\", nil)\n\tclient.Do(req)",
            |main, imports, index| {
                let stmts = &main.body.stmts;
                let ctx = ResolveContext {
                    imports,
                    index,
                    function: Some("main"),
                    preceding: &stmts[..3],
                };
                let call = principal_call(&stmts[3]).unwrap();
                let outbound = outbound_call(call, &ctx).unwrap();
                assert_eq!(outbound.method, "Do");
                assert!(!outbound.binding.is_bound());
                assert_eq!(outbound.binding.variable_name(), "");
            },
        );
    }

    #[test]
    fn shadowed_http_alias_is_not_package_call() {
        with_main(
            "\thttp := &http.Client{}\n\thttp.Get(\"u\")",
            |main, imports, index| {
                let stmts = &main.body.stmts;
                let ctx = ResolveContext {
                    imports,
                    index,
                    function: Some("main"),
                    preceding: &stmts[..1],
                };
                let call = principal_call(&stmts[1]).unwrap();
                assert_eq!(
                    outbound_call(call, &ctx).map(|o| o.receiver),
                    Some(ClientReceiver::Local("http".into()))
                );
            },
        );
    }

    #[test]
    fn principal_call_shapes() {
        with_main(
            "\tresp, err := http.Get(\"u\")\n\tif err := ping(); err != nil {\n\t}\n\t_ = resp\n\t_ = err",
            |main, imports, _| {
                let stmts = &main.body.stmts;
                assert_eq!(
                    shorthand_verb_in_stmt(&stmts[0], imports).map(|(v, _)| v),
                    Some(ShorthandVerb::Get)
                );
                let init_call = principal_call(&stmts[1]).unwrap();
                assert_eq!(init_call.as_call().and_then(|(f, _)| f.as_ident()), Some("ping"));
                assert!(principal_call(&stmts[2]).is_none());
            },
        );
    }
}
