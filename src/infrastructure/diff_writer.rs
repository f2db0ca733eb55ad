//! Unified diff production and the sinks the patch is written to.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use similar::TextDiff;

use crate::error::{InstrumentError, Result};
use crate::ports::PatchSink;

/// Lines of context around each hunk.
pub const CONTEXT_LINES: usize = 3;

/// Unified diff between the original and rendered text of `path`, or `None`
/// when they are identical.
pub fn unified_diff(path: &str, original: &str, rendered: &str) -> Option<String> {
    if original == rendered {
        return None;
    }
    let diff = TextDiff::from_lines(original, rendered);
    let text = diff
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string();
    Some(text)
}

/// Writes the patch to one file. `begin` truncates it, `append` adds a
/// section at the end.
pub struct DiffFileSink {
    path: PathBuf,
}

impl DiffFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn output_error(&self, source: std::io::Error) -> InstrumentError {
        InstrumentError::Output {
            path: self.path.clone(),
            source,
        }
    }
}

impl PatchSink for DiffFileSink {
    fn begin(&self) -> Result<()> {
        File::create(&self.path).map_err(|e| self.output_error(e))?;
        Ok(())
    }

    fn append(&self, section: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.output_error(e))?;
        file.write_all(section.as_bytes())
            .map_err(|e| self.output_error(e))
    }
}

/// Collects the patch in memory.
#[derive(Default)]
pub struct MemorySink {
    patch: RefCell<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.patch.borrow().clone()
    }
}

impl PatchSink for MemorySink {
    fn begin(&self) -> Result<()> {
        self.patch.borrow_mut().clear();
        Ok(())
    }

    fn append(&self, section: &str) -> Result<()> {
        self.patch.borrow_mut().push_str(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_no_diff() {
        assert!(unified_diff("main.go", "a\nb\n", "a\nb\n").is_none());
    }

    #[test]
    fn diff_has_prefixed_headers_and_context() {
        let original = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let rendered = "1\n2\n3\n4\nfive\n6\n7\n8\n";
        let diff = unified_diff("cmd/main.go", original, rendered).unwrap();
        assert!(diff.starts_with("--- a/cmd/main.go\n+++ b/cmd/main.go\n"));
        assert!(diff.contains("@@ -2,7 +2,7 @@"));
        assert!(diff.contains("-5\n+five\n"));
    }

    #[test]
    fn file_sink_truncates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.diff");
        std::fs::write(&path, "stale").unwrap();

        let sink = DiffFileSink::new(&path);
        sink.begin().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        sink.append("one\n").unwrap();
        sink.append("two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
