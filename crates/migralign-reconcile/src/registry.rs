use std::collections::BTreeMap;
use std::path::PathBuf;

use migralign_config::AlignConfig;
use serde::Serialize;

const MIGRATIONS_DIR: &str = "migrations";

/// A configured app resolved to its location on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppRef {
    /// Identifier as written in the config, e.g. `shop.billing`.
    pub name: String,
    /// Short label the recorder and dependency tuples use, e.g. `billing`.
    pub label: String,
    #[serde(skip)]
    pub path: PathBuf,
}

impl AppRef {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            label: app_label(&name).to_string(),
            name,
            path: path.into(),
        }
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.path.join(MIGRATIONS_DIR)
    }
}

/// Default label of an app: the last segment of its dotted identifier.
pub fn app_label(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Resolves configured app identifiers to apps on disk.
pub trait AppRegistry {
    /// `None` when the identifier does not name a known app.
    fn resolve(&self, name: &str) -> Option<AppRef>;
}

/// Finds apps as directories under a project root, with optional
/// per-app overrides.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
    overrides: BTreeMap<String, PathBuf>,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &AlignConfig) -> Self {
        let root = config
            .project_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            root,
            overrides: config.app_paths.clone(),
        }
    }

    pub fn with_override(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(name.into(), path.into());
        self
    }

    fn candidate(&self, name: &str) -> PathBuf {
        match self.overrides.get(name) {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.root.join(path),
            None => name
                .split('.')
                .fold(self.root.clone(), |dir, segment| dir.join(segment)),
        }
    }
}

impl AppRegistry for DirectoryRegistry {
    fn resolve(&self, name: &str) -> Option<AppRef> {
        let path = self.candidate(name);
        path.is_dir().then(|| AppRef::new(name, path))
    }
}
