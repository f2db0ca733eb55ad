/// Benchmarks for the go-instrumentor pipeline.
///
/// Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use go_instrumentor::application::instrument;
use go_instrumentor::config::InstrumentConfig;
use go_instrumentor::domain::render::render_file;
use go_instrumentor::infrastructure::parse_package_source;

// ═══════════════════════════════════════════════════════════════════════════
// Synthetic Data Generators
// ═══════════════════════════════════════════════════════════════════════════

/// A `main` package with `handlers` handlers, each making one outbound call
/// through a local client, plus a helper chain that registers them.
fn synthetic_package(handlers: usize) -> String {
    let mut code = String::from("package main\n\nimport (\n\t\"net/http\"\n)\n\n");
    for i in 0..handlers {
        code.push_str(&format!(
            "func handler{i}(w http.ResponseWriter, r *http.Request) {{\n\
             \tclient := &http.Client{{}}\n\
             \treq, _ := http.NewRequest(\"GET\", \"http://example.com/{i}\", nil)\n\
             \tresp, err := client.Do(req)\n\
             \tif err != nil {{\n\t\treturn\n\t}}\n\
             \tdefer resp.Body.Close()\n\
             }}\n\n"
        ));
    }
    code.push_str("func routes(mux *http.ServeMux) {\n");
    for i in 0..handlers {
        code.push_str(&format!("\tmux.HandleFunc(\"/{i}\", handler{i})\n"));
    }
    code.push_str("}\n\nfunc main() {\n\tmux := http.NewServeMux()\n\troutes(mux)\n\thttp.ListenAndServe(\":8080\", mux)\n}\n");
    code
}

// ═══════════════════════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════════════════════

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument/parse");
    for handlers in [10, 50, 200].iter() {
        let code = synthetic_package(*handlers);
        group.throughput(Throughput::Bytes(code.len() as u64));
        group.bench_with_input(BenchmarkId::new("handlers", handlers), &code, |b, code| {
            b.iter(|| parse_package_source("main.go", black_box(code)).unwrap())
        });
    }
    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// Full Pipeline
// ═══════════════════════════════════════════════════════════════════════════

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument/full_pipeline");
    group.sample_size(30);
    for handlers in [10, 50, 200].iter() {
        let code = synthetic_package(*handlers);
        group.throughput(Throughput::Elements(*handlers as u64));
        group.bench_with_input(BenchmarkId::new("handlers", handlers), &code, |b, code| {
            b.iter(|| {
                let mut package = parse_package_source("main.go", black_box(code)).unwrap();
                instrument(&mut package, InstrumentConfig::default()).unwrap()
            })
        });
    }
    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// Rendering of untouched files
// ═══════════════════════════════════════════════════════════════════════════

fn bench_render_untouched(c: &mut Criterion) {
    let code = synthetic_package(200);
    let package = parse_package_source("main.go", &code).unwrap();
    c.bench_function("instrument/render_untouched", |b| {
        b.iter(|| render_file(black_box(&package.files[0])).unwrap())
    });
}

criterion_group!(benches, bench_parse, bench_full_pipeline, bench_render_untouched);
criterion_main!(benches);
