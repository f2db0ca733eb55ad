//! Run configuration.
//!
//! Values come from defaults, then an optional TOML file, then CLI flags.
//! The core only ever sees the merged [`InstrumentConfig`].

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{InstrumentError, Result};

pub const DEFAULT_AGENT_IMPORT: &str = "github.com/newrelic/go-agent/v3/newrelic";

const GO_KEYWORDS: [&str; 25] = [
    "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough",
    "for", "func", "go", "goto", "if", "import", "interface", "map", "package", "range",
    "return", "select", "struct", "switch", "type", "var",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Used verbatim in the generated `ConfigAppName` call.
    pub app_name: String,
    /// Identifier bound to the agent application in `main`.
    pub agent_variable_name: String,
    /// Identifier bound to the transaction inside handlers.
    pub transaction_variable_name: String,
    pub agent_import_path: String,
    /// Environment variable the generated code reads the license key from.
    pub license_env: String,
    pub shutdown_timeout_secs: u64,
    pub entry_function: String,
    pub include_tests: bool,
    pub diff_file: PathBuf,
    pub package_path: PathBuf,
    /// `.` for the directory itself, `./...` for every directory below it.
    pub pattern: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            app_name: "AST Example".to_string(),
            agent_variable_name: "NewRelicAgent".to_string(),
            transaction_variable_name: "nrTxn".to_string(),
            agent_import_path: DEFAULT_AGENT_IMPORT.to_string(),
            license_env: "NEW_RELIC_LICENSE_KEY".to_string(),
            shutdown_timeout_secs: 5,
            entry_function: "main".to_string(),
            include_tests: false,
            diff_file: PathBuf::from("instrumentation.diff"),
            package_path: PathBuf::from("."),
            pattern: ".".to_string(),
        }
    }
}

impl InstrumentConfig {
    /// Reads a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| InstrumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| InstrumentError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        for (label, ident) in [
            ("agent_variable_name", &self.agent_variable_name),
            ("transaction_variable_name", &self.transaction_variable_name),
            ("entry_function", &self.entry_function),
        ] {
            if !is_go_identifier(ident) {
                return Err(InstrumentError::Config(format!(
                    "{} `{}` is not a valid Go identifier",
                    label, ident
                )));
            }
        }
        if self.agent_variable_name == self.transaction_variable_name {
            return Err(InstrumentError::Config(
                "agent and transaction variables must differ".to_string(),
            ));
        }
        if self.agent_import_path.trim().is_empty() {
            return Err(InstrumentError::Config("agent_import_path is empty".to_string()));
        }
        if !matches!(self.pattern.as_str(), "." | "./...") {
            return Err(InstrumentError::Config(format!(
                "unsupported package pattern `{}` (expected `.` or `./...`)",
                self.pattern
            )));
        }
        Ok(())
    }
}

/// True for a Go identifier usable as a new binding.
pub fn is_go_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let re = IDENT.get_or_init(|| {
        Regex::new(r"^[\p{L}_][\p{L}\p{Nd}_]*$").expect("identifier pattern is valid")
    });
    name != "_" && re.is_match(name) && !GO_KEYWORDS.contains(&name)
}
