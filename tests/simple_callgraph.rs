use go_instrumentor::domain::callgraph::{CallGraph, CalleeShape};
use go_instrumentor::infrastructure::parse_package_source;

#[test]
fn node_ids_include_method_receivers() {
    let code = r#"
package main

import "net/http"

type Server struct{}

func (s *Server) Start() { helper() }

func helper() {}

func main() {
	s := &Server{}
	s.Start()
	helper()
	http.ListenAndServe(":8080", nil)
}
"#;

    let package = parse_package_source("main.go", code).unwrap();
    let cg = CallGraph::build(&package);
    let mut ids: Vec<String> = cg.nodes().map(|n| n.id.clone()).collect();
    ids.sort();

    assert_eq!(ids, vec!["Server.Start", "helper", "main"], "unexpected nodes: {:?}", ids);

    let callees: Vec<&CalleeShape> = cg.call_sites("main").iter().map(|c| &c.callee).collect();
    assert_eq!(
        callees,
        vec![
            &CalleeShape::Selector {
                receiver: "s".into(),
                method: "Start".into()
            },
            &CalleeShape::Ident("helper".into()),
            &CalleeShape::Qualified {
                package: "http".into(),
                name: "ListenAndServe".into()
            },
        ]
    );

    let mut callers: Vec<&str> = cg.callers_of("helper").iter().map(|c| c.caller.as_str()).collect();
    callers.sort();
    assert_eq!(callers, vec!["Server.Start", "main"]);
    assert!(cg.edges().contains(&("main", "helper")));
}

#[test]
fn call_sites_keep_source_order_and_lines() {
    let code = "package main\n\nfunc a() {}\n\nfunc b(x int) {}\n\nfunc main() {\n\ta()\n\tif true {\n\t\tb(1)\n\t}\n}\n";
    let package = parse_package_source("main.go", code).unwrap();
    let cg = CallGraph::build(&package);

    let sites = cg.call_sites("main");
    assert_eq!(sites.len(), 2);
    assert_eq!(sites[0].line, 8);
    assert_eq!(sites[1].stmt_index, 1);
    assert_eq!(sites[1].arg_count, 1);
    assert!(cg.call_sites("missing").is_empty());
}
