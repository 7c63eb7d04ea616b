use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_POINTER_FILE: &str = "max_migration.txt";
pub const DEFAULT_RECORDER_TABLE: &str = "django_migrations";

/// Top-level configuration for a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Identifiers of the apps that own migrations, e.g. `shop.billing`.
    #[serde(default)]
    pub apps: Vec<String>,

    /// Directory app identifiers are resolved against. Defaults to the
    /// directory holding the config file.
    #[serde(default)]
    pub project_root: Option<PathBuf>,

    /// Per-app directory overrides, relative to `project_root`.
    #[serde(default)]
    pub app_paths: BTreeMap<String, PathBuf>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default = "default_pointer_file")]
    pub pointer_file: String,

    #[serde(default)]
    pub on_app_error: AppErrorPolicy,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            apps: Vec::new(),
            project_root: None,
            app_paths: BTreeMap::new(),
            database: DatabaseConfig::default(),
            pointer_file: default_pointer_file(),
            on_app_error: AppErrorPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_recorder_table")]
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            table: default_recorder_table(),
        }
    }
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub database: Option<PathBuf>,
    pub on_app_error: Option<AppErrorPolicy>,
}

impl AlignConfig {
    pub fn apply(&mut self, overrides: &CliOverrides) {
        if let Some(db) = &overrides.database {
            self.database.path = Some(db.clone());
        }
        if let Some(policy) = overrides.on_app_error {
            self.on_app_error = policy;
        }
    }
}

/// What to do when processing a single app fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppErrorPolicy {
    /// Stop the run at the first per-app error.
    #[default]
    Abort,
    /// Record the error in the run report and move on to the next item.
    SkipAndContinue,
}

impl fmt::Display for AppErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppErrorPolicy::Abort => f.write_str("abort"),
            AppErrorPolicy::SkipAndContinue => f.write_str("skip-and-continue"),
        }
    }
}

impl FromStr for AppErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(AppErrorPolicy::Abort),
            "skip-and-continue" | "skip" => Ok(AppErrorPolicy::SkipAndContinue),
            other => Err(format!(
                "unknown app error policy `{other}` (expected `abort` or `skip-and-continue`)"
            )),
        }
    }
}

fn default_pointer_file() -> String {
    DEFAULT_POINTER_FILE.to_string()
}

fn default_recorder_table() -> String {
    DEFAULT_RECORDER_TABLE.to_string()
}
