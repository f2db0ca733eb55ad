// Command-line entry point for go-instrumentor.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use go_instrumentor::application::InstrumentUsecase;
use go_instrumentor::config::InstrumentConfig;
use go_instrumentor::infrastructure::{DiffFileSink, GoPackageLoader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the Go package
    #[arg(value_name = "DIR")]
    package_path: Option<PathBuf>,

    /// Package selector: `.` or `./...`
    #[arg(long)]
    pattern: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where the unified diff is written
    #[arg(short = 'o', long)]
    diff_file: Option<PathBuf>,

    /// Application name passed to the agent
    #[arg(long)]
    app_name: Option<String>,

    /// Variable the agent application is bound to
    #[arg(long)]
    agent_variable: Option<String>,

    /// Also instrument `_test.go` files
    #[arg(long)]
    include_tests: bool,

    /// Write the calls left for manual attention as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Flags override the file, which overrides the defaults.
    fn resolve_config(&self) -> Result<InstrumentConfig> {
        let mut config = match &self.config {
            Some(path) => InstrumentConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => InstrumentConfig::default(),
        };
        if let Some(path) = &self.package_path {
            config.package_path = path.clone();
        }
        if let Some(pattern) = &self.pattern {
            config.pattern = pattern.clone();
        }
        if let Some(diff_file) = &self.diff_file {
            config.diff_file = diff_file.clone();
        }
        if let Some(app_name) = &self.app_name {
            config.app_name = app_name.clone();
        }
        if let Some(agent) = &self.agent_variable {
            config.agent_variable_name = agent.clone();
        }
        if self.include_tests {
            config.include_tests = true;
        }
        Ok(config)
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "go_instrumentor=info",
        1 => "go_instrumentor=debug",
        _ => "go_instrumentor=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.resolve_config()?;
    let loader = GoPackageLoader::new(config.include_tests);
    let sink = DiffFileSink::new(&config.diff_file);
    let usecase = InstrumentUsecase {
        loader: &loader,
        sink: &sink,
    };

    let report = usecase
        .run(&config)
        .with_context(|| format!("Failed to instrument {}", config.package_path.display()))?;

    if let Some(path) = &cli.report {
        let manual: Vec<_> = report.manual().collect();
        let json = serde_json::to_string_pretty(&manual).context("Failed to serialise report")?;
        fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    for item in report.manual() {
        eprintln!(
            "{}:{}: {}: {}",
            item.file,
            item.line,
            item.call,
            item.reason.describe()
        );
    }
    println!(
        "{} file(s) changed; diff written to {}",
        report.files_changed(),
        sink.path().display()
    );
    Ok(())
}
