//! Agent import, initialisation and shutdown in the entry function.

use tracing::debug;

use super::{ensure_import, synth};
use crate::domain::manager::{EditKind, InstrumentationManager};
use crate::domain::traversal::{Cursor, Instrumentation, Node, Outcome};
use crate::error::Result;

/// Inserts at the top of the entry function:
///
/// ```go
/// NewRelicAgent, err := newrelic.NewApplication(...)
/// if err != nil {
/// 	panic(err)
/// }
/// defer NewRelicAgent.Shutdown(5 * time.Second)
/// ```
///
/// Pieces that are already present are left alone.
pub struct InjectAgent;

impl Instrumentation for InjectAgent {
    fn name(&self) -> &'static str {
        "inject-agent"
    }

    fn visit(
        &self,
        node: Node<'_>,
        manager: &mut InstrumentationManager,
        cursor: &mut Cursor<'_>,
    ) -> Result<Outcome> {
        let Node::Func(func) = node else {
            return Ok(Outcome::Skipped);
        };
        if !cursor.scope().is_entry || manager.agent_injected() {
            return Ok(Outcome::Skipped);
        }
        manager.mark_agent_injected();

        let agent = manager.agent_variable().to_string();
        let function = cursor.function().to_string();
        let file = cursor.file();
        let line = func.line;
        let stmts = &mut func.body.stmts;

        let init_at = stmts.iter().position(|s| synth::is_agent_init(s, &agent));
        let has_shutdown = stmts.iter().any(|s| synth::is_agent_shutdown(s, &agent));
        if init_at.is_some() && has_shutdown {
            debug!(function = %function, "agent already initialised");
            return Ok(Outcome::Skipped);
        }

        let agent_path = manager.config().agent_import_path.clone();
        let mut inserted = Vec::new();
        let insert_at = match init_at {
            Some(at) => {
                let check = synth::agent_init_error(&stmts[at])
                    .map(|err| stmts.get(at + 1).is_some_and(|s| synth::is_error_check(s, err)))
                    .unwrap_or(false);
                if check {
                    at + 2
                } else {
                    at + 1
                }
            }
            None => {
                let binds_err = stmts.iter().any(|s| s.assigned_names().contains(&"err"));
                let err = if binds_err { "nrErr" } else { "err" };
                let nr = ensure_import(cursor.imports_mut(), &agent_path, manager, file, &function, line);
                let os = ensure_import(cursor.imports_mut(), "os", manager, file, &function, line);
                let config = manager.config();
                inserted.push(synth::agent_init(
                    &agent,
                    err,
                    &nr,
                    &os,
                    &config.app_name,
                    &config.license_env,
                ));
                inserted.push(synth::panic_on_error(err));
                manager.record_edit(file, &function, line, EditKind::AgentInit);
                0
            }
        };
        if !has_shutdown {
            let time = ensure_import(cursor.imports_mut(), "time", manager, file, &function, line);
            inserted.push(synth::agent_shutdown(
                &agent,
                &time,
                manager.config().shutdown_timeout_secs,
            ));
            manager.record_edit(file, &function, line, EditKind::AgentShutdown);
        }

        if let Some(next) = stmts.get_mut(insert_at) {
            next.blank_before = true;
        }
        stmts.splice(insert_at..insert_at, inserted);
        func.body.span = None;
        cursor.mark_modified();
        Ok(Outcome::Instrumented)
    }
}
