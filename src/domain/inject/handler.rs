//! Wrapping of handler registrations.

use tracing::debug;

use super::{ensure_import, synth};
use crate::domain::index::NET_HTTP;
use crate::domain::manager::{AttentionReason, EditKind, InstrumentationManager};
use crate::domain::recognizer;
use crate::domain::render::expr_text;
use crate::domain::syntax::{Expr, ExprKind};
use crate::domain::traversal::{Cursor, Instrumentation, Node, Outcome};
use crate::error::Result;

/// Rewrites
///
/// * `X.HandleFunc(p, h)` into `X.HandleFunc(newrelic.WrapHandleFunc(agent, p, h))`
/// * `X.Handle(p, http.HandlerFunc(h))` into
///   `X.Handle(newrelic.WrapHandle(agent, p, http.HandlerFunc(h)))`
///
/// where `X` is the `net/http` package or a `*http.ServeMux` and `h` has the
/// handler signature. A registration already wrapped has one argument and
/// no longer matches.
pub struct WrapHandlerRegistration;

#[derive(Clone, Copy)]
enum Registration {
    HandleFunc,
    Handle,
}

impl Registration {
    fn wrapper(self) -> &'static str {
        match self {
            Registration::HandleFunc => "WrapHandleFunc",
            Registration::Handle => "WrapHandle",
        }
    }
}

impl Instrumentation for WrapHandlerRegistration {
    fn name(&self) -> &'static str {
        "wrap-handler-registration"
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
        let Some(registration) = classify(expr, manager, cursor) else {
            return Ok(Outcome::Skipped);
        };

        let function = cursor.function().to_string();
        let file = cursor.file();
        let line = cursor.line();
        if manager.require_agent(&function).is_none() {
            manager.record_manual(
                file,
                &function,
                line,
                expr_text(expr),
                AttentionReason::AgentOutOfScope,
            );
            return Ok(Outcome::Handled);
        }

        let agent_path = manager.config().agent_import_path.clone();
        let nr = ensure_import(cursor.imports_mut(), &agent_path, manager, file, &function, line);
        let agent = manager.agent_variable().to_string();

        let ExprKind::Call { args, .. } = &mut expr.kind else {
            return Ok(Outcome::Skipped);
        };
        let handler = args.pop().unwrap_or_else(|| Expr::ident("nil"));
        let pattern = args.pop().unwrap_or_else(|| Expr::ident("nil"));
        args.push(synth::wrap_handler(
            registration.wrapper(),
            &nr,
            &agent,
            pattern,
            handler,
        ));
        cursor.mark_modified();
        manager.record_edit(file, &function, line, EditKind::HandlerWrapped);
        debug!(function = %function, line, wrapper = registration.wrapper(), "wrapped handler registration");
        Ok(Outcome::Instrumented)
    }
}

fn classify(
    expr: &Expr,
    manager: &InstrumentationManager,
    cursor: &Cursor<'_>,
) -> Option<Registration> {
    let ExprKind::Call {
        fun,
        args,
        ellipsis: false,
    } = &expr.kind
    else {
        return None;
    };
    if args.len() != 2 {
        return None;
    }
    let (receiver, method) = fun.unparen().as_selector()?;
    let registration = match method {
        "HandleFunc" => Registration::HandleFunc,
        "Handle" => Registration::Handle,
        _ => return None,
    };
    if !registers_on_mux(receiver, manager, cursor) {
        return None;
    }

    let imports = cursor.imports();
    let index = manager.index();
    let handler = &args[1];
    let matches = match registration {
        Registration::HandleFunc => recognizer::is_handler_value(handler, imports, index),
        Registration::Handle => {
            let (conv, conv_args) = handler.unparen().as_call()?;
            let (alias, name) = conv.unparen().as_selector()?;
            name == "HandlerFunc"
                && alias.as_ident().is_some_and(|a| imports.resolves_to(a, NET_HTTP))
                && conv_args.len() == 1
                && recognizer::is_handler_value(&conv_args[0], imports, index)
        }
    };
    matches.then_some(registration)
}

/// `http.` itself or an expression typed `*http.ServeMux`.
fn registers_on_mux(receiver: &Expr, manager: &InstrumentationManager, cursor: &Cursor<'_>) -> bool {
    let imports = cursor.imports();
    let index = manager.index();
    let function = Some(cursor.function());
    if let Some(alias) = receiver.as_ident() {
        let is_local = index
            .function(cursor.function())
            .is_some_and(|f| f.local(alias).is_some());
        if !is_local && imports.resolves_to(alias, NET_HTTP) {
            return true;
        }
    }
    index.type_of(receiver, function, imports).deref().is_http("ServeMux")
}
