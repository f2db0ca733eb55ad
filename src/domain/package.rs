//! Loaded Go package: the unit of analysis.

use std::path::PathBuf;

use crate::domain::imports::Imports;
use crate::domain::syntax::{Decl, FuncDecl};

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the package directory, used in diff headers.
    pub path: PathBuf,
    /// Original text, never modified.
    pub source: String,
    pub package: String,
    pub imports: Imports,
    pub decls: Vec<Decl>,
}

impl SourceFile {
    pub fn display_path(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }

    pub fn functions(&self) -> impl Iterator<Item = &FuncDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Func(f) => Some(f),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Package {
    pub name: String,
    pub dir: PathBuf,
    pub files: Vec<SourceFile>,
}

impl Package {
    /// Every function declaration with the index of its file, in source order.
    pub fn functions(&self) -> impl Iterator<Item = (usize, &FuncDecl)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(i, file)| file.functions().map(move |f| (i, f)))
    }

    pub fn function_mut(&mut self, key: &str) -> Option<(usize, &mut FuncDecl)> {
        for (i, file) in self.files.iter_mut().enumerate() {
            for decl in file.decls.iter_mut() {
                if let Decl::Func(func) = decl {
                    if func.key() == key {
                        return Some((i, func));
                    }
                }
            }
        }
        None
    }
}
