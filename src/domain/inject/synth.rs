//! Builders for synthesized Go code and matchers that find it again.
//!
//! Every builder takes the local names under which the needed packages are
//! imported in the target file. Matchers look at shape only so a second run
//! over already instrumented code recognizes its own output.

use crate::domain::syntax::{AssignOp, Expr, ExprKind, Field, Stmt, StmtKind};

/// `<agent>, <err> := nr.NewApplication(nr.ConfigAppName("<app>"), nr.ConfigLicense(os.Getenv("<env>")))`
pub fn agent_init(agent: &str, err: &str, nr: &str, os: &str, app: &str, license_env: &str) -> Stmt {
    let app_name = Expr::call(Expr::qualified(nr, "ConfigAppName"), vec![Expr::string(app)]);
    let license = Expr::call(
        Expr::qualified(nr, "ConfigLicense"),
        vec![Expr::call(
            Expr::qualified(os, "Getenv"),
            vec![Expr::string(license_env)],
        )],
    );
    Stmt::assign(
        vec![Expr::ident(agent), Expr::ident(err)],
        AssignOp::Define,
        vec![Expr::call(
            Expr::qualified(nr, "NewApplication"),
            vec![app_name, license],
        )],
    )
}

/// `if <err> != nil { panic(<err>) }`
pub fn panic_on_error(err: &str) -> Stmt {
    Stmt::if_then(
        Expr::binary(Expr::ident(err), "!=", Expr::ident("nil")),
        vec![Stmt::expr(Expr::call(Expr::ident("panic"), vec![Expr::ident(err)]))],
    )
}

/// `defer <agent>.Shutdown(<secs> * time.Second)`
pub fn agent_shutdown(agent: &str, time: &str, secs: u64) -> Stmt {
    Stmt::defer(Expr::call(
        Expr::qualified(agent, "Shutdown"),
        vec![Expr::binary(
            Expr::basic(secs.to_string()),
            "*",
            Expr::qualified(time, "Second"),
        )],
    ))
}

/// `<client>.Transport = nr.NewRoundTripper(<client>.Transport)`
pub fn wrap_transport(client: &str, nr: &str) -> Stmt {
    Stmt::assign(
        vec![Expr::qualified(client, "Transport")],
        AssignOp::Assign,
        vec![Expr::call(
            Expr::qualified(nr, "NewRoundTripper"),
            vec![Expr::qualified(client, "Transport")],
        )],
    )
}

/// `<req> = nr.RequestWithTransactionContext(<req>, <txn>)`
pub fn request_with_transaction(req: &str, txn: &str, nr: &str) -> Stmt {
    Stmt::assign(
        vec![Expr::ident(req)],
        AssignOp::Assign,
        vec![Expr::call(
            Expr::qualified(nr, "RequestWithTransactionContext"),
            vec![Expr::ident(req), Expr::ident(txn)],
        )],
    )
}

/// `<txn> := nr.FromContext(<req>.Context())`
pub fn derive_transaction(txn: &str, req: &str, nr: &str) -> Stmt {
    Stmt::assign(
        vec![Expr::ident(txn)],
        AssignOp::Define,
        vec![Expr::call(
            Expr::qualified(nr, "FromContext"),
            vec![Expr::call(Expr::qualified(req, "Context"), vec![])],
        )],
    )
}

/// `nr.WrapHandleFunc(<agent>, <pattern>, <handler>)` or `nr.WrapHandle(...)`
pub fn wrap_handler(wrapper: &str, nr: &str, agent: &str, pattern: Expr, handler: Expr) -> Expr {
    Expr::call(
        Expr::qualified(nr, wrapper),
        vec![Expr::ident(agent), pattern, handler],
    )
}

/// `<name> *nr.<type_name>`
pub fn pointer_param(name: &str, nr: &str, type_name: &str) -> Field {
    Field::named(name, Expr::star(Expr::qualified(nr, type_name)))
}

// ═══════════════════════════════════════════════════════════════════════════
// Matchers
// ═══════════════════════════════════════════════════════════════════════════

fn single_call_rhs(stmt: &Stmt) -> Option<(&[Expr], &AssignOp, &Expr, &[Expr])> {
    match &stmt.kind {
        StmtKind::Assign { lhs, op, rhs } if rhs.len() == 1 => {
            let (fun, args) = rhs[0].unparen().as_call()?;
            Some((lhs.as_slice(), op, fun, args))
        }
        _ => None,
    }
}

fn calls_method(fun: &Expr, method: &str) -> bool {
    fun.unparen().as_selector().is_some_and(|(_, sel)| sel == method)
}

/// `<agent>, ... := <x>.NewApplication(...)`
pub fn is_agent_init(stmt: &Stmt, agent: &str) -> bool {
    match single_call_rhs(stmt) {
        Some((lhs, AssignOp::Define, fun, _)) => {
            lhs.first().and_then(Expr::as_ident) == Some(agent) && calls_method(fun, "NewApplication")
        }
        _ => false,
    }
}

/// Error variable bound by an agent initialisation.
pub fn agent_init_error(stmt: &Stmt) -> Option<&str> {
    match &stmt.kind {
        StmtKind::Assign { lhs, .. } if lhs.len() == 2 => lhs[1].as_ident(),
        _ => None,
    }
}

/// `if <err> != nil { ... }`
pub fn is_error_check(stmt: &Stmt, err: &str) -> bool {
    match &stmt.kind {
        StmtKind::If { init: None, cond, .. } => match &cond.unparen().kind {
            ExprKind::Binary { op, x, y } => {
                op == "!=" && x.as_ident() == Some(err) && y.as_ident() == Some("nil")
            }
            _ => false,
        },
        _ => false,
    }
}

/// `defer <agent>.Shutdown(...)`
pub fn is_agent_shutdown(stmt: &Stmt, agent: &str) -> bool {
    match &stmt.kind {
        StmtKind::Defer(call) => call
            .as_call()
            .is_some_and(|(fun, _)| fun.unparen().is_selector_of(agent, "Shutdown")),
        _ => false,
    }
}

/// `<client>.Transport = <x>.NewRoundTripper(...)`
pub fn is_transport_wrap(stmt: &Stmt, client: &str) -> bool {
    match single_call_rhs(stmt) {
        Some((lhs, AssignOp::Assign, fun, _)) => {
            lhs.len() == 1
                && lhs[0].is_selector_of(client, "Transport")
                && calls_method(fun, "NewRoundTripper")
        }
        _ => false,
    }
}

/// `<req> = <x>.RequestWithTransactionContext(<req>, ...)`
pub fn is_request_with_transaction(stmt: &Stmt, req: &str) -> bool {
    match single_call_rhs(stmt) {
        Some((lhs, AssignOp::Assign, fun, args)) => {
            lhs.len() == 1
                && lhs[0].as_ident() == Some(req)
                && calls_method(fun, "RequestWithTransactionContext")
                && args.first().and_then(Expr::as_ident) == Some(req)
        }
        _ => false,
    }
}

/// `<txn> := <x>.FromContext(...)`
pub fn is_transaction_derivation(stmt: &Stmt, txn: &str) -> bool {
    match single_call_rhs(stmt) {
        Some((lhs, AssignOp::Define, fun, _)) => {
            lhs.len() == 1 && lhs[0].as_ident() == Some(txn) && calls_method(fun, "FromContext")
        }
        _ => false,
    }
}
