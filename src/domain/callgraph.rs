// Call graph structures for one Go package.
// Maps each function key to the call sites in its body, in source order.

use std::collections::BTreeMap;

use crate::domain::package::Package;
use crate::domain::syntax::{for_each_expr, Expr, ExprKind, NodeId};

/// Shape of the callee expression of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalleeShape {
    /// `helper()`
    Ident(String),
    /// `pkg.Func()` where `pkg` is an import alias.
    Qualified { package: String, name: String },
    /// `x.m()` or `a.b.m()`; `receiver` is the rendered receiver path.
    Selector { receiver: String, method: String },
    Other,
}

impl CalleeShape {
    /// Name of a package function this callee could refer to.
    pub fn local_function(&self) -> Option<&str> {
        match self {
            CalleeShape::Ident(name) => Some(name),
            _ => None,
        }
    }
}

/// A call expression inside a function body.
#[derive(Debug, Clone)]
pub struct CallSite {
    /// Key of the enclosing function.
    pub caller: String,
    /// Index of the top-level body statement containing the call.
    pub stmt_index: usize,
    pub call_id: NodeId,
    pub line: usize,
    pub callee: CalleeShape,
    pub arg_count: usize,
}

/// A node in the call graph.
#[derive(Debug, Default)]
pub struct CallGraphNode {
    pub id: String,
    pub file: usize,
    pub calls: Vec<CallSite>,
}

/// The call graph of one package.
#[derive(Debug, Default)]
pub struct CallGraph {
    nodes: BTreeMap<String, CallGraphNode>,
}

impl CallGraph {
    /// Scans every function declaration of `package` once.
    pub fn build(package: &Package) -> Self {
        let mut nodes = BTreeMap::new();
        for (file_idx, func) in package.functions() {
            let imports = &package.files[file_idx].imports;
            let key = func.key();
            let mut calls = Vec::new();
            for (stmt_index, stmt) in func.body.stmts.iter().enumerate() {
                for_each_expr(stmt, &mut |expr| {
                    if let ExprKind::Call { fun, args, .. } = &expr.kind {
                        let callee = classify_callee(fun, |alias| imports.path_of(alias).is_some());
                        calls.push(CallSite {
                            caller: key.clone(),
                            stmt_index,
                            call_id: expr.id,
                            line: stmt.line,
                            callee,
                            arg_count: args.len(),
                        });
                    }
                });
            }
            nodes.insert(
                key.clone(),
                CallGraphNode {
                    id: key,
                    file: file_idx,
                    calls,
                },
            );
        }
        Self { nodes }
    }

    pub fn node(&self, key: &str) -> Option<&CallGraphNode> {
        self.nodes.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CallGraphNode> {
        self.nodes.values()
    }

    /// Ordered call sites of `key`; empty for unknown functions.
    pub fn call_sites(&self, key: &str) -> &[CallSite] {
        self.nodes.get(key).map(|n| n.calls.as_slice()).unwrap_or(&[])
    }

    /// Every call site whose callee is the package function `name`.
    pub fn callers_of(&self, name: &str) -> Vec<&CallSite> {
        self.nodes
            .values()
            .flat_map(|n| n.calls.iter())
            .filter(|site| site.callee.local_function() == Some(name))
            .collect()
    }

    /// Edges as `(caller, callee)` pairs between package functions.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.nodes
            .values()
            .flat_map(|n| n.calls.iter())
            .filter_map(|site| {
                let callee = site.callee.local_function()?;
                self.nodes
                    .contains_key(callee)
                    .then_some((site.caller.as_str(), callee))
            })
            .collect()
    }
}

fn classify_callee(fun: &Expr, is_import: impl Fn(&str) -> bool) -> CalleeShape {
    match &fun.unparen().kind {
        ExprKind::Ident(name) => CalleeShape::Ident(name.clone()),
        ExprKind::Selector { x, sel } => match x.as_ident() {
            Some(alias) if is_import(alias) => CalleeShape::Qualified {
                package: alias.to_string(),
                name: sel.clone(),
            },
            _ => match receiver_path(x) {
                Some(receiver) => CalleeShape::Selector {
                    receiver,
                    method: sel.clone(),
                },
                None => CalleeShape::Other,
            },
        },
        _ => CalleeShape::Other,
    }
}

/// `a`, `a.b`, `a.b.c`; anything else has no stable path.
fn receiver_path(expr: &Expr) -> Option<String> {
    match &expr.unparen().kind {
        ExprKind::Ident(name) => Some(name.clone()),
        ExprKind::Selector { x, sel } => Some(format!("{}.{}", receiver_path(x)?, sel)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::go_parser::parse_package_source;

    #[test]
    fn attributes_nested_calls_to_top_level_statement() {
        let package = parse_package_source(
            "main.go",
            r#"
package main

import "net/http"

func main() {
	setup()
	if ok() {
		go func() {
			worker(1, 2)
		}()
	}
	resp, _ := http.Get("http://example.com")
	_ = resp
}

func setup() {}
func ok() bool { return true }
func worker(a, b int) {}
"#,
        )
        .unwrap();
        let graph = CallGraph::build(&package);
        let sites = graph.call_sites("main");

        let indexed: Vec<(usize, &CalleeShape)> =
            sites.iter().map(|s| (s.stmt_index, &s.callee)).collect();
        assert_eq!(indexed[0], (0, &CalleeShape::Ident("setup".into())));
        assert!(indexed.contains(&(1, &CalleeShape::Ident("ok".into()))));
        assert!(indexed.contains(&(1, &CalleeShape::Ident("worker".into()))));
        assert!(indexed.contains(&(
            2,
            &CalleeShape::Qualified {
                package: "http".into(),
                name: "Get".into()
            }
        )));
        assert_eq!(graph.callers_of("worker").len(), 1);
        assert_eq!(graph.callers_of("worker")[0].arg_count, 2);
        assert!(graph.call_sites("setup").is_empty());
        assert!(graph.edges().contains(&("main", "setup")));
    }

    #[test]
    fn method_keys_and_selector_callees() {
        let package = parse_package_source(
            "server.go",
            r#"
package api

type server struct{ db store }

func (s *server) start() {
	s.db.open()
	s.listen()
}

func (s *server) listen() {}
"#,
        )
        .unwrap();
        let graph = CallGraph::build(&package);
        let sites = graph.call_sites("server.start");
        assert_eq!(
            sites[0].callee,
            CalleeShape::Selector {
                receiver: "s.db".into(),
                method: "open".into()
            }
        );
        assert_eq!(sites[1].stmt_index, 1);
        assert!(graph.node("server.listen").is_some());
    }
}
