// Infrastructure implementations for go-instrumentor.

pub mod diff_writer;
pub mod go_parser;
pub mod project_loader;

pub use diff_writer::{unified_diff, DiffFileSink, MemorySink};
pub use go_parser::{parse_package_source, GoParser};
pub use project_loader::GoPackageLoader;
