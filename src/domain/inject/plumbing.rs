//! Context plumbing.
//!
//! After traversal, functions that refer to the agent or the transaction
//! without owning one receive it as a trailing parameter, and every call site
//! passes the matching argument. Callers that are threadable themselves get
//! the parameter too; callers that cannot be changed pass `nil`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use super::synth;
use crate::domain::manager::{EditKind, InstrumentationManager, TransactionSource};
use crate::domain::package::Package;
use crate::domain::syntax::{edit_expr, Expr, ExprKind, NodeId};
use crate::error::{InstrumentError, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Carrier {
    Agent,
    Transaction,
}

impl Carrier {
    fn variable<'m>(&self, manager: &'m InstrumentationManager) -> &'m str {
        match self {
            Carrier::Agent => manager.agent_variable(),
            Carrier::Transaction => manager.transaction_variable(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Carrier::Agent => "Application",
            Carrier::Transaction => "Transaction",
        }
    }
}

/// What a caller passes for a threaded parameter.
enum Argument {
    /// The caller holds the variable.
    Owned,
    /// The caller is threaded in turn.
    Threaded,
    Nil,
}

struct PendingArg {
    caller: String,
    call_id: NodeId,
    line: usize,
    file: usize,
    value: String,
}

/// Threads the agent, then the transaction, through the call graph.
pub fn thread_context(package: &mut Package, manager: &mut InstrumentationManager) -> Result<()> {
    // Arguments appended per call site; the call graph counts predate them.
    let mut appended: BTreeMap<NodeId, usize> = BTreeMap::new();
    let agent_users: Vec<String> = manager.agent_users().iter().cloned().collect();
    thread(package, manager, Carrier::Agent, agent_users, &mut appended)?;

    let mut derive = BTreeSet::new();
    let mut threaded = Vec::new();
    for function in manager.transaction_users().iter() {
        match manager.transaction_source(function) {
            Some(TransactionSource::Handler) => {
                derive.insert(function.clone());
            }
            Some(TransactionSource::Parameter) => threaded.push(function.clone()),
            None => {}
        }
    }
    derive.extend(thread(package, manager, Carrier::Transaction, threaded, &mut appended)?);
    for handler in derive {
        derive_transaction(package, manager, &handler)?;
    }
    Ok(())
}

/// Adds `carrier` as a parameter to `roots` and transitively to threadable
/// callers. Returns the handlers that must derive the transaction.
fn thread(
    package: &mut Package,
    manager: &mut InstrumentationManager,
    carrier: Carrier,
    roots: Vec<String>,
    appended: &mut BTreeMap<NodeId, usize>,
) -> Result<BTreeSet<String>> {
    let variable = carrier.variable(manager).to_string();
    let mut worklist: VecDeque<String> = roots.into();
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut handlers = BTreeSet::new();
    let mut pending = Vec::new();

    while let Some(function) = worklist.pop_front() {
        if !visited.insert(function.clone()) {
            continue;
        }
        let Some(param_count) = add_parameter(package, manager, carrier, &function)? else {
            continue;
        };

        let sites: Vec<_> = manager
            .call_graph()
            .callers_of(&function)
            .into_iter()
            .map(|site| (site.caller.clone(), site.call_id, site.line, site.arg_count))
            .collect();
        for (caller, call_id, line, arg_count) in sites {
            let arg_count = arg_count + appended.get(&call_id).copied().unwrap_or(0);
            if arg_count + 1 != param_count {
                if arg_count != param_count {
                    warn!(
                        function = %function,
                        caller = %caller,
                        line,
                        "call site argument count does not match; left unchanged"
                    );
                }
                continue;
            }
            let value = match argument_for(manager, carrier, &caller) {
                Argument::Owned => {
                    if carrier == Carrier::Transaction && !manager.index().is_entry(&caller) {
                        handlers.insert(caller.clone());
                    }
                    variable.clone()
                }
                Argument::Threaded => {
                    worklist.push_back(caller.clone());
                    variable.clone()
                }
                Argument::Nil => "nil".to_string(),
            };
            let file = manager.index().function(&caller).map(|f| f.file).unwrap_or(0);
            pending.push(PendingArg {
                caller,
                call_id,
                line,
                file,
                value,
            });
        }
    }

    for arg in pending {
        let Some((_, func)) = package.function_mut(&arg.caller) else {
            return Err(InstrumentError::structural(&arg.caller, "caller disappeared from the package"));
        };
        let value = arg.value.clone();
        let found = edit_expr(&mut func.body, arg.call_id, &mut |call| {
            if let ExprKind::Call { args, .. } = &mut call.kind {
                args.push(Expr::ident(value.as_str()));
            }
        });
        if !found {
            return Err(InstrumentError::structural(
                &arg.caller,
                format!("call site on line {} not found", arg.line),
            ));
        }
        func.dirty = true;
        *appended.entry(arg.call_id).or_insert(0) += 1;
        manager.record_edit(arg.file, &arg.caller, arg.line, EditKind::ArgumentAdded);
    }
    Ok(handlers)
}

fn argument_for(manager: &InstrumentationManager, carrier: Carrier, caller: &str) -> Argument {
    match carrier {
        Carrier::Agent => {
            if manager.index().is_entry(caller) {
                Argument::Owned
            } else if manager.index().is_threadable(caller) {
                Argument::Threaded
            } else {
                Argument::Nil
            }
        }
        Carrier::Transaction => match manager.transaction_source(caller) {
            Some(TransactionSource::Handler) => Argument::Owned,
            Some(TransactionSource::Parameter) => Argument::Threaded,
            None => Argument::Nil,
        },
    }
}

/// Appends the carrier parameter unless present. Returns the parameter count
/// afterwards, or `None` when the parameter already existed.
fn add_parameter(
    package: &mut Package,
    manager: &mut InstrumentationManager,
    carrier: Carrier,
    function: &str,
) -> Result<Option<usize>> {
    let variable = carrier.variable(manager).to_string();
    let Some(file) = manager.index().function(function).map(|f| f.file) else {
        return Err(InstrumentError::structural(function, "unknown function"));
    };
    let agent_path = manager.config().agent_import_path.clone();

    let has_param = package
        .function_mut(function)
        .is_some_and(|(_, func)| func.sig.has_param(&variable));
    if has_param {
        debug!(function, variable = %variable, "parameter already threaded");
        return Ok(None);
    }

    let nr = super::ensure_import(&mut package.files[file].imports, &agent_path, manager, file, function, 0);
    let Some((_, func)) = package.function_mut(function) else {
        return Err(InstrumentError::structural(function, "unknown function"));
    };
    func.sig
        .params
        .push(synth::pointer_param(&variable, &nr, carrier.type_name()));
    func.header_dirty = true;
    func.dirty = true;
    let count = func.sig.flat_params().len();
    let line = func.line;
    manager.record_edit(file, function, line, EditKind::ParameterAdded);
    Ok(Some(count))
}

/// Inserts `nrTxn := newrelic.FromContext(r.Context())` at the top of a
/// handler unless it is already there.
fn derive_transaction(
    package: &mut Package,
    manager: &mut InstrumentationManager,
    handler: &str,
) -> Result<()> {
    let txn = manager.transaction_variable().to_string();
    let Some(info) = manager.index().function(handler) else {
        return Err(InstrumentError::structural(handler, "unknown handler"));
    };
    let file = info.file;
    let Some(request) = info.handler.as_ref().and_then(|h| h.request_param.clone()) else {
        return Ok(());
    };
    let agent_path = manager.config().agent_import_path.clone();

    let present = package.function_mut(handler).is_some_and(|(_, func)| {
        func.body
            .stmts
            .iter()
            .any(|s| synth::is_transaction_derivation(s, &txn))
    });
    if present {
        return Ok(());
    }

    let nr = super::ensure_import(&mut package.files[file].imports, &agent_path, manager, file, handler, 0);
    let Some((_, func)) = package.function_mut(handler) else {
        return Err(InstrumentError::structural(handler, "unknown handler"));
    };
    let mut stmt = synth::derive_transaction(&txn, &request, &nr);
    if let Some(first) = func.body.stmts.first_mut() {
        stmt.blank_before = false;
        first.blank_before = true;
    }
    func.body.stmts.insert(0, stmt);
    func.body.span = None;
    func.dirty = true;
    let line = func.line;
    manager.record_edit(file, handler, line, EditKind::TransactionDerived);
    Ok(())
}
