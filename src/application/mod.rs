// Use cases for go-instrumentor.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::InstrumentConfig;
use crate::domain::inject::{default_chain, thread_context};
use crate::domain::manager::{EditRecord, InstrumentationManager, ManualAttention};
use crate::domain::package::Package;
use crate::domain::render::render_file;
use crate::domain::traversal::instrument_package;
use crate::error::Result;
use crate::infrastructure::diff_writer::unified_diff;
use crate::ports::{PackageLoader, PatchSink};

/// New text of a file the run changed.
#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub path: String,
    pub text: String,
}

/// Outcome of instrumenting one package.
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub package: String,
    pub dir: PathBuf,
    /// Concatenated unified diff sections, empty when nothing changed.
    #[serde(skip)]
    pub patch: String,
    #[serde(skip)]
    pub rendered: Vec<RenderedFile>,
    pub edits: Vec<EditRecord>,
    pub manual: Vec<ManualAttention>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub packages: Vec<PackageReport>,
}

impl RunReport {
    pub fn manual(&self) -> impl Iterator<Item = &ManualAttention> {
        self.packages.iter().flat_map(|p| p.manual.iter())
    }

    pub fn files_changed(&self) -> usize {
        self.packages.iter().map(|p| p.rendered.len()).sum()
    }
}

pub struct InstrumentUsecase<'a> {
    pub loader: &'a dyn PackageLoader,
    pub sink: &'a dyn PatchSink,
}

impl<'a> InstrumentUsecase<'a> {
    /// Loads every selected package, instruments it and appends its diff to
    /// the sink. A package that fails leaves no section behind.
    pub fn run(&self, config: &InstrumentConfig) -> Result<RunReport> {
        config.validate()?;
        let packages = self.loader.load(&config.package_path, &config.pattern)?;
        self.sink.begin()?;

        let mut report = RunReport::default();
        for mut package in packages {
            let result = instrument(&mut package, config.clone())?;
            if !result.patch.is_empty() {
                self.sink.append(&result.patch)?;
            }
            report.packages.push(result);
        }
        info!(
            packages = report.packages.len(),
            files_changed = report.files_changed(),
            manual = report.manual().count(),
            "instrumentation finished"
        );
        Ok(report)
    }
}

/// Runs the traversal chain and the plumbing pass over `package`, then renders
/// every file. Nothing is emitted unless all files render.
pub fn instrument(package: &mut Package, config: InstrumentConfig) -> Result<PackageReport> {
    info!(package = %package.name, dir = %package.dir.display(), files = package.files.len(), "instrumenting package");
    let mut manager = InstrumentationManager::new(package, config);
    instrument_package(package, &mut manager, &default_chain())?;
    thread_context(package, &mut manager)?;

    let mut rendered = Vec::new();
    let mut patch = String::new();
    for file in &package.files {
        let text = render_file(file)?;
        let path = file.display_path();
        match unified_diff(&path, &file.source, &text) {
            Some(section) => {
                debug!(file = %path, "file changed");
                patch.push_str(&section);
                rendered.push(RenderedFile { path, text });
            }
            None => debug!(file = %path, "file unchanged"),
        }
    }

    let (edits, manual) = manager.into_records();
    Ok(PackageReport {
        package: package.name.clone(),
        dir: package.dir.clone(),
        patch,
        rendered,
        edits,
        manual,
    })
}
