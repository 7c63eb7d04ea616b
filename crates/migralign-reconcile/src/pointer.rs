//! Per-app "latest migration" pointers.
//!
//! A pointer names the migration the next unapplied migration of an app
//! should depend on. It starts each run as the latest applied migration and
//! advances as pending migrations are re-chained.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use migralign_common::Result;
use migralign_config::model::DEFAULT_POINTER_FILE;
use migralign_db::MigrationStore;
use tracing::{debug, info};

use crate::registry::AppRef;

/// Key-value storage of one pointer per app.
pub trait PointerStore {
    fn get(&self, app: &AppRef) -> Result<Option<String>>;

    fn set(&mut self, app: &AppRef, migration: &str) -> Result<()>;

    /// Remove the pointer. Returns whether one existed.
    fn clear(&mut self, app: &AppRef) -> Result<bool>;
}

/// Pointers kept as a single-line text file in each app's migrations
/// directory. The file must stay out of version control: every environment
/// regenerates its own.
#[derive(Debug, Clone)]
pub struct FilePointerStore {
    file_name: String,
}

impl FilePointerStore {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn path_for(&self, app: &AppRef) -> PathBuf {
        app.migrations_dir().join(&self.file_name)
    }
}

impl Default for FilePointerStore {
    fn default() -> Self {
        Self::new(DEFAULT_POINTER_FILE)
    }
}

impl PointerStore for FilePointerStore {
    fn get(&self, app: &AppRef) -> Result<Option<String>> {
        let contents = match std::fs::read_to_string(self.path_for(app)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let first = contents.lines().next().unwrap_or("").trim();
        Ok((!first.is_empty()).then(|| first.to_string()))
    }

    fn set(&mut self, app: &AppRef, migration: &str) -> Result<()> {
        std::fs::write(self.path_for(app), migration)?;
        Ok(())
    }

    fn clear(&mut self, app: &AppRef) -> Result<bool> {
        match std::fs::remove_file(self.path_for(app)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Pointers held in memory, keyed by app identifier.
#[derive(Debug, Clone, Default)]
pub struct MemoryPointerStore {
    pointers: BTreeMap<String, String>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointerStore for MemoryPointerStore {
    fn get(&self, app: &AppRef) -> Result<Option<String>> {
        Ok(self.pointers.get(&app.name).cloned())
    }

    fn set(&mut self, app: &AppRef, migration: &str) -> Result<()> {
        self.pointers.insert(app.name.clone(), migration.to_string());
        Ok(())
    }

    fn clear(&mut self, app: &AppRef) -> Result<bool> {
        Ok(self.pointers.remove(&app.name).is_some())
    }
}

/// What is known about an app's pointer, kept apart so the caller decides
/// which one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerRead {
    /// Value held by the pointer store.
    pub file_value: Option<String>,
    /// Whether the migration store records any applied migration for the app.
    pub store_has_applied: bool,
}

/// Rebuild the app's pointer from the migration store. Returns whether a
/// pointer was written; apps without applied migrations end with none.
pub fn regenerate(
    store: &dyn MigrationStore,
    pointers: &mut dyn PointerStore,
    app: &AppRef,
) -> Result<bool> {
    if pointers.clear(app)? {
        debug!("removed stale pointer for {}", app.name);
    }
    match store.latest_applied(&app.label)? {
        Some(latest) => {
            pointers.set(app, &latest.name)?;
            info!("pointer for {} set to {}", app.name, latest.name);
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn read(
    store: &dyn MigrationStore,
    pointers: &dyn PointerStore,
    app: &AppRef,
) -> Result<PointerRead> {
    let store_has_applied = store.latest_applied(&app.label)?.is_some();
    let file_value = pointers.get(app)?;
    Ok(PointerRead {
        file_value,
        store_has_applied,
    })
}
