//! Per-package instrumentation state.
//!
//! One manager is created for each analysed package. It carries the run
//! configuration, the read-only index and call graph, and accumulates the
//! edits made and the call sites left for a human.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::InstrumentConfig;
use crate::domain::callgraph::CallGraph;
use crate::domain::index::PackageIndex;
use crate::domain::package::Package;
use crate::domain::recognizer::ShorthandVerb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    ImportAdded,
    AgentInit,
    AgentShutdown,
    HandlerWrapped,
    TransportWrapped,
    RequestContext,
    TransactionDerived,
    ParameterAdded,
    ArgumentAdded,
}

/// One synthesized edit.
#[derive(Debug, Clone, Serialize)]
pub struct EditRecord {
    pub file: String,
    pub function: String,
    pub line: usize,
    pub kind: EditKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttentionReason {
    /// `http.Get` and friends take no request, so no context can be attached.
    ShorthandVerb { verb: ShorthandVerb },
    /// The client behind the call is a field, parameter or alias.
    UnresolvedClient,
    /// A default-client call that builds its request internally.
    NoRequestContext,
    /// A handler registration in a function the agent cannot reach.
    AgentOutOfScope,
}

impl AttentionReason {
    pub fn describe(&self) -> String {
        match self {
            AttentionReason::ShorthandVerb { verb } => format!(
                "http.{} cannot carry a transaction; build a request and use a client's Do",
                verb
            ),
            AttentionReason::UnresolvedClient => {
                "client is not defined earlier in the same block; wrap its transport by hand".to_string()
            }
            AttentionReason::NoRequestContext => {
                "default client call has no request to attach a transaction to".to_string()
            }
            AttentionReason::AgentOutOfScope => {
                "handler registered where the agent is not reachable".to_string()
            }
        }
    }
}

/// A recognized call site that was deliberately left unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct ManualAttention {
    pub file: String,
    pub function: String,
    pub line: usize,
    /// Source text of the call.
    pub call: String,
    pub reason: AttentionReason,
}

/// How a function gets hold of the agent application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSource {
    /// The entry function, which initialises it.
    Entry,
    /// A trailing parameter threaded in from callers.
    Parameter,
}

/// How a function gets hold of the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSource {
    /// Derived from the request context of a handler.
    Handler,
    Parameter,
}

#[derive(Debug)]
pub struct InstrumentationManager {
    config: InstrumentConfig,
    package_name: String,
    files: Vec<String>,
    index: PackageIndex,
    call_graph: CallGraph,
    edits: Vec<EditRecord>,
    manual: Vec<ManualAttention>,
    agent_injected: bool,
    agent_users: BTreeSet<String>,
    transaction_users: BTreeSet<String>,
}

impl InstrumentationManager {
    /// Indexes `package` and builds its call graph.
    pub fn new(package: &Package, config: InstrumentConfig) -> Self {
        let index = PackageIndex::build(package, &config.entry_function);
        let call_graph = CallGraph::build(package);
        debug!(
            package = %package.name,
            functions = index.functions().count(),
            entry = ?index.entry(),
            "indexed package"
        );
        Self {
            config,
            package_name: package.name.clone(),
            files: package.files.iter().map(|f| f.display_path()).collect(),
            index,
            call_graph,
            edits: Vec::new(),
            manual: Vec::new(),
            agent_injected: false,
            agent_users: BTreeSet::new(),
            transaction_users: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn app_name(&self) -> &str {
        &self.config.app_name
    }

    pub fn agent_variable(&self) -> &str {
        &self.config.agent_variable_name
    }

    pub fn transaction_variable(&self) -> &str {
        &self.config.transaction_variable_name
    }

    pub fn index(&self) -> &PackageIndex {
        &self.index
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    pub fn file_name(&self, file: usize) -> &str {
        self.files.get(file).map(String::as_str).unwrap_or("")
    }

    pub fn record_edit(&mut self, file: usize, function: &str, line: usize, kind: EditKind) {
        debug!(file = self.file_name(file), function, line, ?kind, "edit");
        self.edits.push(EditRecord {
            file: self.file_name(file).to_string(),
            function: function.to_string(),
            line,
            kind,
        });
    }

    pub fn record_manual(
        &mut self,
        file: usize,
        function: &str,
        line: usize,
        call: String,
        reason: AttentionReason,
    ) {
        warn!(
            "{}:{}: {} in {}: {}",
            self.file_name(file),
            line,
            call,
            function,
            reason.describe()
        );
        self.manual.push(ManualAttention {
            file: self.file_name(file).to_string(),
            function: function.to_string(),
            line,
            call,
            reason,
        });
    }

    pub fn edits(&self) -> &[EditRecord] {
        &self.edits
    }

    pub fn manual(&self) -> &[ManualAttention] {
        &self.manual
    }

    pub fn into_records(self) -> (Vec<EditRecord>, Vec<ManualAttention>) {
        (self.edits, self.manual)
    }

    pub fn agent_injected(&self) -> bool {
        self.agent_injected
    }

    pub fn mark_agent_injected(&mut self) {
        self.agent_injected = true;
    }

    pub fn agent_source(&self, function: &str) -> Option<AgentSource> {
        if self.index.is_entry(function) {
            Some(AgentSource::Entry)
        } else if self.index.is_threadable(function) {
            Some(AgentSource::Parameter)
        } else {
            None
        }
    }

    pub fn transaction_source(&self, function: &str) -> Option<TransactionSource> {
        if let Some(info) = self.index.function(function) {
            if let Some(handler) = &info.handler {
                return handler
                    .request_param
                    .as_ref()
                    .map(|_| TransactionSource::Handler);
            }
        }
        if self.index.is_threadable(function) {
            Some(TransactionSource::Parameter)
        } else {
            None
        }
    }

    /// Notes that `function` refers to the agent variable.
    pub fn require_agent(&mut self, function: &str) -> Option<AgentSource> {
        let source = self.agent_source(function)?;
        if source == AgentSource::Parameter {
            self.agent_users.insert(function.to_string());
        }
        Some(source)
    }

    /// Notes that `function` refers to the transaction variable.
    pub fn require_transaction(&mut self, function: &str) -> Option<TransactionSource> {
        let source = self.transaction_source(function)?;
        self.transaction_users.insert(function.to_string());
        Some(source)
    }

    pub fn agent_users(&self) -> &BTreeSet<String> {
        &self.agent_users
    }

    pub fn transaction_users(&self) -> &BTreeSet<String> {
        &self.transaction_users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::go_parser::parse_package_source;

    const CODE: &str = r#"
package main

import "net/http"

func main() {
	routes()
}

func routes() {}

func index(w http.ResponseWriter, r *http.Request) {}

func blind(w http.ResponseWriter, _ *http.Request) {}
"#;

    #[test]
    fn sources_follow_function_roles() {
        let package = parse_package_source("main.go", CODE).unwrap();
        let mut manager = InstrumentationManager::new(&package, InstrumentConfig::default());

        assert_eq!(manager.agent_source("main"), Some(AgentSource::Entry));
        assert_eq!(manager.agent_source("routes"), Some(AgentSource::Parameter));
        assert_eq!(manager.agent_source("index"), None);

        assert_eq!(manager.transaction_source("main"), None);
        assert_eq!(manager.transaction_source("index"), Some(TransactionSource::Handler));
        assert_eq!(manager.transaction_source("blind"), None);

        manager.require_agent("main");
        manager.require_agent("routes");
        assert_eq!(manager.agent_users().len(), 1);
    }

    #[test]
    fn manual_records_serialize_with_reason() {
        let package = parse_package_source("main.go", CODE).unwrap();
        let mut manager = InstrumentationManager::new(&package, InstrumentConfig::default());
        manager.record_manual(
            0,
            "main",
            7,
            "http.Get(url)".to_string(),
            AttentionReason::ShorthandVerb {
                verb: ShorthandVerb::Get,
            },
        );
        let json = serde_json::to_value(manager.manual()).unwrap();
        assert_eq!(json[0]["reason"]["kind"], "shorthand_verb");
        assert_eq!(json[0]["reason"]["verb"], "Get");
        assert_eq!(json[0]["file"], "main.go");
    }
}
