use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::go_parser::GoParser;
use crate::domain::package::{Package, SourceFile};
use crate::error::{InstrumentError, Result};
use crate::ports::PackageLoader;

/// Directory names never searched for packages.
const SKIPPED_DIRS: [&str; 4] = ["target", ".git", "vendor", "testdata"];

/// Loads Go packages from disk. A package is the set of `.go` files of one
/// directory that share a package clause.
pub struct GoPackageLoader {
    include_tests: bool,
}

impl GoPackageLoader {
    pub fn new(include_tests: bool) -> Self {
        Self { include_tests }
    }

    fn collect_dirs(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
        out.push(dir.to_path_buf());
        if !recursive {
            return Ok(());
        }
        let mut children = Vec::new();
        for entry in fs::read_dir(dir).map_err(|source| io_error(dir, source))? {
            let path = entry.map_err(|source| io_error(dir, source))?.path();
            if path.is_dir() && !is_skipped(&path) {
                children.push(path);
            }
        }
        children.sort();
        for child in children {
            Self::collect_dirs(&child, true, out)?;
        }
        Ok(())
    }

    fn go_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|source| io_error(dir, source))? {
            let path = entry.map_err(|source| io_error(dir, source))?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !name.ends_with(".go") {
                continue;
            }
            if name.ends_with("_test.go") && !self.include_tests {
                debug!(file = %path.display(), "skipping test file");
                continue;
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }

    fn load_dir(&self, root: &Path, dir: &Path, parser: &mut GoParser) -> Result<Vec<Package>> {
        let mut by_name: BTreeMap<String, Vec<SourceFile>> = BTreeMap::new();
        for path in self.go_files(dir)? {
            let source = fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let file = parser.parse_file(relative, source)?;
            by_name.entry(file.package.clone()).or_default().push(file);
        }
        Ok(by_name
            .into_iter()
            .map(|(name, files)| Package {
                name,
                dir: dir.to_path_buf(),
                files,
            })
            .collect())
    }
}

impl PackageLoader for GoPackageLoader {
    fn load(&self, root: &Path, pattern: &str) -> Result<Vec<Package>> {
        if !root.is_dir() {
            return Err(InstrumentError::NoPackage(root.to_path_buf()));
        }
        let mut dirs = Vec::new();
        Self::collect_dirs(root, pattern == "./...", &mut dirs)?;

        let mut parser = GoParser::new()?;
        let mut packages = Vec::new();
        for dir in dirs {
            packages.extend(self.load_dir(root, &dir, &mut parser)?);
        }
        if packages.is_empty() {
            return Err(InstrumentError::NoPackage(root.to_path_buf()));
        }
        info!(
            root = %root.display(),
            packages = packages.len(),
            files = packages.iter().map(|p| p.files.len()).sum::<usize>(),
            "loaded Go packages"
        );
        Ok(packages)
    }
}

fn is_skipped(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| SKIPPED_DIRS.contains(&n) || n.starts_with('.') || n.starts_with('_'))
}

fn io_error(path: &Path, source: std::io::Error) -> InstrumentError {
    InstrumentError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn loads_one_directory_and_skips_tests() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "main.go", "package main\n\nfunc main() {}\n");
        write(tmp.path(), "util.go", "package main\n\nfunc util() {}\n");
        write(tmp.path(), "main_test.go", "package main\n\nfunc TestX() {}\n");
        write(tmp.path(), "sub/lib.go", "package sub\n");

        let packages = GoPackageLoader::new(false).load(tmp.path(), ".").unwrap();
        assert_eq!(packages.len(), 1);
        let names: Vec<String> = packages[0].files.iter().map(|f| f.display_path()).collect();
        assert_eq!(names, vec!["main.go", "util.go"]);
    }

    #[test]
    fn recursive_pattern_walks_subdirectories() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "main.go", "package main\n\nfunc main() {}\n");
        write(tmp.path(), "api/api.go", "package api\n");
        write(tmp.path(), "vendor/x/x.go", "package x\n");
        write(tmp.path(), "api/api_test.go", "package api_test\n");

        let packages = GoPackageLoader::new(true).load(tmp.path(), "./...").unwrap();
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["main", "api", "api_test"]);
        assert_eq!(packages[1].files[0].display_path(), "api/api.go");
    }

    #[test]
    fn empty_directory_has_no_package() {
        let tmp = tempdir().unwrap();
        let err = GoPackageLoader::new(false).load(tmp.path(), ".").unwrap_err();
        assert!(matches!(err, InstrumentError::NoPackage(_)));
    }
}
