//! Outbound HTTP calls: transport wrapping, transaction propagation and
//! reporting of calls that cannot be instrumented.

use tracing::debug;

use super::{ensure_import, synth};
use crate::domain::manager::{AttentionReason, EditKind, InstrumentationManager};
use crate::domain::recognizer::{self, ClientReceiver, OutboundCall};
use crate::domain::render::expr_text;
use crate::domain::syntax::{Expr, Stmt};
use crate::domain::traversal::{Cursor, Instrumentation, Node, Outcome};
use crate::error::Result;

/// Records `http.Get`, `http.Post`, `http.PostForm` and `http.Head` calls for
/// manual attention. The call itself is never rewritten.
pub struct ReportShorthandCall;

impl Instrumentation for ReportShorthandCall {
    fn name(&self) -> &'static str {
        "report-shorthand-call"
    }

    fn visit(
        &self,
        node: Node<'_>,
        manager: &mut InstrumentationManager,
        cursor: &mut Cursor<'_>,
    ) -> Result<Outcome> {
        let Node::Expr(expr) = node else {
            return Ok(Outcome::Skipped);
        };
        let Some(verb) = recognizer::shorthand_verb(expr, cursor.imports()) else {
            return Ok(Outcome::Skipped);
        };
        // A local shadowing the import alias is not the package.
        let ctx = cursor.resolve_context(manager);
        let is_package_call = recognizer::outbound_call(expr, &ctx)
            .is_some_and(|call| call.receiver == ClientReceiver::Package);
        if !is_package_call {
            return Ok(Outcome::Skipped);
        }
        manager.record_manual(
            cursor.file(),
            cursor.function(),
            cursor.line(),
            expr_text(expr),
            AttentionReason::ShorthandVerb { verb },
        );
        Ok(Outcome::Handled)
    }
}

/// For the principal call of a statement that sends a request through a
/// locally defined client `v`, inserts before the statement
///
/// ```go
/// v.Transport = newrelic.NewRoundTripper(v.Transport)
/// req = newrelic.RequestWithTransactionContext(req, nrTxn)
/// ```
///
/// The second line is only added for `Do(req)` when a transaction is
/// reachable. `http.DefaultClient.Do(req)` only gets the second line.
pub struct InstrumentOutboundCall;

struct Plan {
    wrap_client: Option<String>,
    request: Option<String>,
}

impl Instrumentation for InstrumentOutboundCall {
    fn name(&self) -> &'static str {
        "instrument-outbound-call"
    }

    fn visit(
        &self,
        node: Node<'_>,
        manager: &mut InstrumentationManager,
        cursor: &mut Cursor<'_>,
    ) -> Result<Outcome> {
        let Node::Stmt(stmt) = node else {
            return Ok(Outcome::Skipped);
        };
        if !cursor.in_list() {
            return Ok(Outcome::Skipped);
        }
        let Some(call) = recognizer::principal_call(stmt) else {
            return Ok(Outcome::Skipped);
        };
        let ctx = cursor.resolve_context(manager);
        let Some(outbound) = recognizer::outbound_call(call, &ctx) else {
            return Ok(Outcome::Skipped);
        };

        let function = cursor.function().to_string();
        let file = cursor.file();
        let line = cursor.line();
        let plan = match plan(&outbound, call) {
            Ok(plan) => plan,
            Err(Some(reason)) => {
                manager.record_manual(file, &function, line, expr_text(call), reason);
                return Ok(Outcome::Handled);
            }
            Err(None) => return Ok(Outcome::Skipped),
        };
        debug!(
            function = %function,
            line,
            method = %outbound.method,
            client = outbound.binding.variable_name(),
            "outbound call"
        );

        let agent_path = manager.config().agent_import_path.clone();
        let txn = manager.transaction_variable().to_string();
        let mut acted = false;

        if let Some(client) = &plan.wrap_client {
            let already = cursor
                .preceding()
                .iter()
                .chain(cursor.pending_before())
                .any(|s| synth::is_transport_wrap(s, client));
            if !already {
                let nr = ensure_import(cursor.imports_mut(), &agent_path, manager, file, &function, line);
                cursor.insert_before(synth::wrap_transport(client, &nr))?;
                manager.record_edit(file, &function, line, EditKind::TransportWrapped);
                acted = true;
            }
        }

        if let Some(req) = &plan.request {
            let already = last_stmt(cursor).is_some_and(|s| synth::is_request_with_transaction(s, req));
            if !already {
                if manager.require_transaction(&function).is_some() {
                    let nr = ensure_import(cursor.imports_mut(), &agent_path, manager, file, &function, line);
                    cursor.insert_before(synth::request_with_transaction(req, &txn, &nr))?;
                    manager.record_edit(file, &function, line, EditKind::RequestContext);
                    acted = true;
                } else {
                    debug!(function = %function, line, "no transaction reachable for request");
                }
            }
        }

        Ok(if acted {
            Outcome::Instrumented
        } else {
            Outcome::Skipped
        })
    }
}

/// Decides what to insert; `Err(Some(_))` asks for a manual-attention record,
/// `Err(None)` leaves the call to another link of the chain.
fn plan(outbound: &OutboundCall, call: &Expr) -> std::result::Result<Plan, Option<AttentionReason>> {
    let request = if outbound.method == "Do" {
        call.as_call()
            .and_then(|(_, args)| args.first())
            .and_then(|arg| arg.unparen().as_ident())
            .filter(|name| *name != "nil")
            .map(str::to_string)
    } else {
        None
    };

    match &outbound.receiver {
        ClientReceiver::Package => Err(None),
        ClientReceiver::DefaultClient => {
            if outbound.method != "Do" {
                Err(Some(AttentionReason::NoRequestContext))
            } else {
                Ok(Plan {
                    wrap_client: None,
                    request,
                })
            }
        }
        ClientReceiver::Local(_) | ClientReceiver::Other => {
            if !outbound.binding.is_bound() {
                return Err(Some(AttentionReason::UnresolvedClient));
            }
            Ok(Plan {
                wrap_client: Some(outbound.binding.variable_name().to_string()),
                request,
            })
        }
    }
}

/// The statement that will directly precede the current one.
fn last_stmt<'a>(cursor: &'a Cursor<'_>) -> Option<&'a Stmt> {
    cursor
        .pending_before()
        .last()
        .or_else(|| cursor.preceding().last())
}
