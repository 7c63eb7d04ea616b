use std::collections::BTreeSet;
use std::path::Path;

use migralign_common::{MigrationName, Result};
use tracing::debug;

/// Migration files present in `dir`, excluding the bootstrap migration and
/// anything that is not a numbered source file.
pub fn list_migrations(dir: &Path) -> Result<BTreeSet<MigrationName>> {
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        match MigrationName::from_file_name(file_name) {
            Some(name) if name.is_bootstrap() => debug!("ignoring bootstrap migration {name}"),
            Some(name) => {
                names.insert(name);
            }
            None => {}
        }
    }
    Ok(names)
}

/// On-disk migrations with no applied record, in name order.
pub fn unapplied(on_disk: &BTreeSet<MigrationName>, applied: &BTreeSet<String>) -> Vec<MigrationName> {
    on_disk
        .iter()
        .filter(|name| !applied.contains(name.as_str()))
        .cloned()
        .collect()
}
