//! Instrumentation injectors.
//!
//! Each injector is one link of the traversal chain. The order of
//! [`default_chain`] matters: the agent is set up before any wrapper refers
//! to it, and shorthand calls are reported before the outbound-call pass
//! looks at their statements.

pub mod agent;
pub mod handler;
pub mod outbound;
pub mod plumbing;
pub mod synth;

use crate::domain::imports::Imports;
use crate::domain::manager::{EditKind, InstrumentationManager};
use crate::domain::traversal::Instrumentation;

pub use agent::InjectAgent;
pub use handler::WrapHandlerRegistration;
pub use outbound::{InstrumentOutboundCall, ReportShorthandCall};
pub use plumbing::thread_context;

pub fn default_chain() -> Vec<Box<dyn Instrumentation>> {
    vec![
        Box::new(InjectAgent),
        Box::new(WrapHandlerRegistration),
        Box::new(ReportShorthandCall),
        Box::new(InstrumentOutboundCall),
    ]
}

/// Imports `path` into `imports` and returns the name to refer to it by.
pub(crate) fn ensure_import(
    imports: &mut Imports,
    path: &str,
    manager: &mut InstrumentationManager,
    file: usize,
    function: &str,
    line: usize,
) -> String {
    let before = imports.added.len();
    let name = imports.ensure(path);
    if imports.added.len() > before {
        manager.record_edit(file, function, line, EditKind::ImportAdded);
    }
    name
}
