use std::fs;

use go_instrumentor::application::{instrument, InstrumentUsecase, PackageReport};
use go_instrumentor::config::InstrumentConfig;
use go_instrumentor::domain::manager::{AttentionReason, EditKind};
use go_instrumentor::domain::recognizer::ShorthandVerb;
use go_instrumentor::infrastructure::{parse_package_source, DiffFileSink, GoPackageLoader, MemorySink};
use tempfile::tempdir;

const HANDLER_AND_SHORTHAND: &str = r#"package main

import (
	"fmt"
	"net/http"
)

func index(w http.ResponseWriter, r *http.Request) {
	fmt.Fprintf(w, "hello")
}

func fetch(url string) {
	resp, err := http.Get(url)
	if err != nil {
		return
	}
	defer resp.Body.Close()
}

func main() {
	http.HandleFunc("/", index)
	fetch("http://example.com")
	http.ListenAndServe(":8080", nil)
}
"#;

const CLIENT_DO: &str = r#"package main

import (
	"net/http"
)

func index(w http.ResponseWriter, r *http.Request) {
	client := &http.Client{}
	req, _ := http.NewRequest("GET", "http://example.com", nil)
	resp, err := client.Do(req)
	if err != nil {
		return
	}
	defer resp.Body.Close()
}

func main() {
	http.HandleFunc("/", index)
	http.ListenAndServe(":8080", nil)
}
"#;

const REGISTRATION_HELPER: &str = r#"package main

import "net/http"

func index(w http.ResponseWriter, r *http.Request) {}

func routes(mux *http.ServeMux) {
	mux.HandleFunc("/", index)
}

func main() {
	mux := http.NewServeMux()
	routes(mux)
	http.ListenAndServe(":8080", mux)
}
"#;

const REGISTRATION_AND_OUTBOUND_HELPER: &str = r#"package main

import "net/http"

func index(w http.ResponseWriter, r *http.Request) {}

func routes() {
	http.HandleFunc("/", index)
	fetch()
}

func fetch() {
	client := &http.Client{}
	req, _ := http.NewRequest("GET", "http://example.com", nil)
	client.Do(req)
}

func main() {
	routes()
	http.ListenAndServe(":8080", nil)
}
"#;

const SERVE_MUX_LOCAL: &str = r#"package main

import nethttp "net/http"

func index(w nethttp.ResponseWriter, r *nethttp.Request) {}

func main() {
	mux := nethttp.NewServeMux()
	mux.HandleFunc("/", index)
	mux.Handle("/h", nethttp.HandlerFunc(index))
	nethttp.ListenAndServe(":8080", mux)
}
"#;

fn run(code: &str) -> PackageReport {
    let mut package = parse_package_source("main.go", code).unwrap();
    instrument(&mut package, InstrumentConfig::default()).unwrap()
}

/// Instruments `code`, then instruments the result again.
fn run_twice(code: &str) -> (PackageReport, PackageReport) {
    let first = run(code);
    let output = first
        .rendered
        .first()
        .map(|f| f.text.clone())
        .unwrap_or_else(|| code.to_string());
    let second = run(&output);
    (first, second)
}

#[test]
fn handler_registration_and_shorthand_call() {
    let report = run(HANDLER_AND_SHORTHAND);
    let patch = &report.patch;

    assert!(patch.starts_with("--- a/main.go\n+++ b/main.go\n"));
    assert!(patch.contains("+\t\"os\"\n+\t\"time\"\n+\n+\t\"github.com/newrelic/go-agent/v3/newrelic\"\n"));
    assert!(patch.contains(
        "+\tNewRelicAgent, err := newrelic.NewApplication(newrelic.ConfigAppName(\"AST Example\"), newrelic.ConfigLicense(os.Getenv(\"NEW_RELIC_LICENSE_KEY\")))\n"
    ));
    assert!(patch.contains("+\tif err != nil {\n+\t\tpanic(err)\n+\t}\n+\tdefer NewRelicAgent.Shutdown(5 * time.Second)\n"));
    assert!(patch.contains("-\thttp.HandleFunc(\"/\", index)\n"));
    assert!(patch.contains("+\thttp.HandleFunc(newrelic.WrapHandleFunc(NewRelicAgent, \"/\", index))\n"));

    // The shorthand call is reported, never rewritten.
    assert!(!patch.contains("-\tresp, err := http.Get(url)"));
    assert!(!patch.contains("+\tresp, err := http.Get(url)"));
    assert_eq!(report.manual.len(), 1);
    let item = &report.manual[0];
    assert_eq!(item.function, "fetch");
    assert_eq!(item.line, 13);
    assert_eq!(item.call, "http.Get(url)");
    assert_eq!(
        item.reason,
        AttentionReason::ShorthandVerb {
            verb: ShorthandVerb::Get
        }
    );

    let kinds: Vec<EditKind> = report.edits.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EditKind::AgentInit));
    assert!(kinds.contains(&EditKind::AgentShutdown));
    assert!(kinds.contains(&EditKind::HandlerWrapped));
}

#[test]
fn client_do_gets_context_before_the_call() {
    let report = run(CLIENT_DO);
    let patch = &report.patch;

    assert!(patch.contains(
        "+\tclient.Transport = newrelic.NewRoundTripper(client.Transport)\n+\treq = newrelic.RequestWithTransactionContext(req, nrTxn)\n \tresp, err := client.Do(req)\n"
    ));
    assert!(patch.contains("+\tnrTxn := newrelic.FromContext(r.Context())\n"));
    assert!(report.manual.is_empty());
}

#[test]
fn agent_is_threaded_into_registration_helpers() {
    let report = run(REGISTRATION_HELPER);
    let patch = &report.patch;

    assert!(patch.contains("+func routes(mux *http.ServeMux, NewRelicAgent *newrelic.Application) {\n"));
    assert!(patch.contains("+\tmux.HandleFunc(newrelic.WrapHandleFunc(NewRelicAgent, \"/\", index))\n"));
    assert!(patch.contains("+\troutes(mux, NewRelicAgent)\n"));
    assert!(report.manual.is_empty());
}

#[test]
fn helper_needing_agent_and_transaction_gets_both_arguments() {
    let report = run(REGISTRATION_AND_OUTBOUND_HELPER);
    let patch = &report.patch;

    assert!(patch.contains(
        "+func routes(NewRelicAgent *newrelic.Application, nrTxn *newrelic.Transaction) {\n"
    ));
    assert!(patch.contains("+\troutes(NewRelicAgent, nil)\n"));
    assert!(patch.contains("+\tfetch(nrTxn)\n"));
    assert!(patch.contains("+func fetch(nrTxn *newrelic.Transaction) {\n"));
    assert!(!patch.contains("+\troutes(NewRelicAgent)\n"));
}

#[test]
fn registrations_on_a_local_serve_mux_are_wrapped() {
    let report = run(SERVE_MUX_LOCAL);
    let patch = &report.patch;

    assert!(patch.contains("+\tmux.HandleFunc(newrelic.WrapHandleFunc(NewRelicAgent, \"/\", index))\n"));
    assert!(patch.contains(
        "+\tmux.Handle(newrelic.WrapHandle(NewRelicAgent, \"/h\", nethttp.HandlerFunc(index)))\n"
    ));
    assert!(report.manual.is_empty());
    let wrapped = report
        .edits
        .iter()
        .filter(|e| e.kind == EditKind::HandlerWrapped)
        .count();
    assert_eq!(wrapped, 2);
}

#[test]
fn client_defined_outside_the_loop_body_is_reported() {
    let report = run(
        r#"package main

import "net/http"

func poll(reqs []*http.Request) {
	client := &http.Client{}
	for _, req := range reqs {
		client.Do(req)
	}
}

func main() {
	poll(nil)
}
"#,
    );
    assert_eq!(report.manual.len(), 1);
    let item = &report.manual[0];
    assert_eq!(item.function, "poll");
    assert_eq!(item.reason, AttentionReason::UnresolvedClient);
    assert!(item.reason.describe().contains("same block"));
    assert!(!report.patch.contains("NewRoundTripper"));
}

#[test]
fn second_run_produces_an_empty_diff() {
    for code in [
        HANDLER_AND_SHORTHAND,
        CLIENT_DO,
        REGISTRATION_HELPER,
        REGISTRATION_AND_OUTBOUND_HELPER,
        SERVE_MUX_LOCAL,
    ] {
        let (first, second) = run_twice(code);
        assert!(!first.patch.is_empty());
        assert!(second.patch.is_empty(), "second run changed:\n{}", second.patch);
        assert!(second.edits.is_empty());
    }
}

#[test]
fn handler_registration_outside_agent_scope_is_reported() {
    let report = run(
        r#"package main

import "net/http"

func index(w http.ResponseWriter, r *http.Request) {}

var mount = func() {
	http.HandleFunc("/", index)
}

func register(mux *http.ServeMux, extra ...int) {
	mux.HandleFunc("/x", index)
}

func main() {
	mount()
	register(http.NewServeMux())
}
"#,
    );
    assert_eq!(report.manual.len(), 1);
    assert_eq!(report.manual[0].function, "register");
    assert_eq!(report.manual[0].reason, AttentionReason::AgentOutOfScope);
    assert!(!report.patch.contains("WrapHandleFunc"));
}

#[test]
fn package_run_writes_only_changed_files() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("main.go"), HANDLER_AND_SHORTHAND).unwrap();
    let util = "package main\n\nfunc helper() int {\n\treturn 1\n}\n";
    fs::write(dir.path().join("util.go"), util).unwrap();
    fs::write(dir.path().join("main_test.go"), "package main\n").unwrap();

    let diff_path = dir.path().join("out").with_extension("diff");
    fs::write(&diff_path, "stale contents\n").unwrap();

    let config = InstrumentConfig {
        package_path: dir.path().to_path_buf(),
        diff_file: diff_path.clone(),
        ..Default::default()
    };
    let loader = GoPackageLoader::new(config.include_tests);
    let sink = DiffFileSink::new(&config.diff_file);
    let usecase = InstrumentUsecase {
        loader: &loader,
        sink: &sink,
    };
    let report = usecase.run(&config).unwrap();

    let written = fs::read_to_string(&diff_path).unwrap();
    assert_eq!(written, report.packages[0].patch);
    assert!(written.contains("--- a/main.go"));
    assert!(!written.contains("util.go"));
    assert!(!written.contains("stale contents"));
    assert_eq!(report.files_changed(), 1);
    assert_eq!(fs::read_to_string(dir.path().join("util.go")).unwrap(), util);
    assert_eq!(
        fs::read_to_string(dir.path().join("main.go")).unwrap(),
        HANDLER_AND_SHORTHAND
    );
}

#[test]
fn syntax_error_aborts_before_writing() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("main.go"), "package main\n\nfunc main() {\n").unwrap();

    let config = InstrumentConfig {
        package_path: dir.path().to_path_buf(),
        ..Default::default()
    };
    let loader = GoPackageLoader::new(false);
    let sink = MemorySink::new();
    let usecase = InstrumentUsecase {
        loader: &loader,
        sink: &sink,
    };
    assert!(usecase.run(&config).is_err());
    assert!(sink.contents().is_empty());
}
