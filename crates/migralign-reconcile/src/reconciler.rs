//! The reconciliation pass.
//!
//! 1. Rebuild every app's pointer from the migration store.
//! 2. Collect migrations present on disk but not recorded as applied, sorted
//!    by name across all apps.
//! 3. Re-chain each pending migration onto its app's pointer and advance the
//!    pointer to it.
//!
//! Ordering is by migration name only. Pending migrations of different apps
//! that depend on each other are not ordered causally; each app is chained
//! linearly on its own.

use std::fmt;

use migralign_common::{Error, MigrationName, Result};
use migralign_config::AppErrorPolicy;
use migralign_db::MigrationStore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dependencies::{self, DependencyDeclaration};
use crate::pointer::{self, PointerStore};
use crate::registry::{AppRef, AppRegistry};
use crate::report::{AppFailure, Outcome, RunReport, Stage};
use crate::scan;

/// A migration file with no applied record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMigration {
    pub app: AppRef,
    pub migration: MigrationName,
}

impl fmt::Display for PendingMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app.label, self.migration)
    }
}

pub struct Reconciler<'a> {
    store: &'a dyn MigrationStore,
    registry: &'a dyn AppRegistry,
    pointers: &'a mut dyn PointerStore,
    apps: Vec<String>,
    policy: AppErrorPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn MigrationStore,
        registry: &'a dyn AppRegistry,
        pointers: &'a mut dyn PointerStore,
        apps: Vec<String>,
    ) -> Self {
        Self {
            store,
            registry,
            pointers,
            apps,
            policy: AppErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AppErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run all three steps. Errors end up in the report, never as a panic
    /// or a lost outcome.
    pub fn run(&mut self) -> RunReport {
        let mut report = RunReport::default();
        if let Err(e) = self.execute(&mut report) {
            warn!("reconciliation aborted: {e}");
            report.abort(&e);
        }
        report
    }

    fn execute(&mut self, report: &mut RunReport) -> Result<()> {
        self.regenerate_pointers(report)?;
        let pending = self.collect_pending(report)?;
        self.relink(&pending, report)
    }

    /// Step 1: rebuild every app's pointer from the store.
    pub fn regenerate_pointers(&mut self, report: &mut RunReport) -> Result<()> {
        for name in &self.apps {
            let app = match resolve(self.registry, name) {
                Ok(app) => app,
                Err(e) => {
                    absorb(self.policy, report, name, Stage::Regenerate, e)?;
                    continue;
                }
            };
            match pointer::regenerate(self.store, &mut *self.pointers, &app) {
                Ok(true) => report.pointers_written.push(app.name),
                Ok(false) => debug!("no applied migrations for {}, no pointer written", app.name),
                Err(e) => absorb(self.policy, report, name, Stage::Regenerate, e)?,
            }
        }
        Ok(())
    }

    /// Step 2: diff on-disk migrations against the store for every app.
    pub fn collect_pending(&self, report: &mut RunReport) -> Result<Vec<PendingMigration>> {
        let mut pending = Vec::new();
        for name in &self.apps {
            match self.pending_for(name) {
                Ok(found) => pending.extend(found),
                Err(e) => absorb(self.policy, report, name, Stage::Scan, e)?,
            }
        }
        // Stable, so equal names keep the configured app order.
        pending.sort_by(|a, b| a.migration.cmp(&b.migration));
        report.pending = pending.clone();
        Ok(pending)
    }

    fn pending_for(&self, name: &str) -> Result<Vec<PendingMigration>> {
        let app = resolve(self.registry, name)?;
        let on_disk = scan::list_migrations(&app.migrations_dir())?;
        let applied = self.store.applied_names(&app.label)?;
        let unapplied = scan::unapplied(&on_disk, &applied);
        debug!(
            "{}: {} migrations on disk, {} unapplied",
            app.name,
            on_disk.len(),
            unapplied.len()
        );
        Ok(unapplied
            .into_iter()
            .map(|migration| PendingMigration {
                app: app.clone(),
                migration,
            })
            .collect())
    }

    /// Step 3: re-chain `pending` in order.
    ///
    /// A migration is removed from the in-flight set once its pointer has
    /// advanced; skipped ones stay, so a pointer naming one of them is
    /// recognised as corrupted.
    pub fn relink(&mut self, pending: &[PendingMigration], report: &mut RunReport) -> Result<()> {
        let mut remaining = pending.to_vec();
        for item in pending {
            match self.relink_one(item, &remaining) {
                Ok(outcome) => {
                    if outcome.advanced_pointer() {
                        remaining.retain(|p| p != item);
                    }
                    report.record(item, outcome);
                }
                Err(e) => {
                    warn!("failed to relink {item}: {e}");
                    report.record(
                        item,
                        Outcome::Failed {
                            reason: e.to_string(),
                        },
                    );
                    if e.is_fatal() || self.policy == AppErrorPolicy::Abort {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    fn relink_one(&mut self, item: &PendingMigration, remaining: &[PendingMigration]) -> Result<Outcome> {
        let app = &item.app;
        let state = pointer::read(self.store, &*self.pointers, app)?;

        let previous = match (state.file_value, state.store_has_applied) {
            (None, true) => {
                warn!("can't find the pointer for {}, skipping {item}", app.name);
                return Ok(Outcome::SkippedMissingPointer);
            }
            (Some(value), _)
                if remaining
                    .iter()
                    .any(|p| p.app.name == app.name && p.migration.as_str() == value) =>
            {
                warn!(
                    "corrupted pointer in app {}: {value} is not applied, skipping {item}",
                    app.name
                );
                return Ok(Outcome::SkippedCorruptedPointer { pointer: value });
            }
            (previous, _) => previous,
        };

        let outcome = match previous {
            Some(previous) => {
                let declaration = DependencyDeclaration::single(&app.label, &previous);
                dependencies::rewrite(&app.migrations_dir(), &item.migration, &declaration)?;
                info!("{item} now depends on {}.{previous}", app.label);
                Outcome::Relinked {
                    depends_on: previous,
                }
            }
            None => {
                info!("{item} starts the chain for {}", app.name);
                Outcome::Anchored
            }
        };
        self.pointers.set(app, item.migration.as_str())?;
        Ok(outcome)
    }
}

fn resolve(registry: &dyn AppRegistry, name: &str) -> Result<AppRef> {
    registry
        .resolve(name)
        .ok_or_else(|| Error::UnknownApp(format!("can't find app with label {name}")))
}

/// Apply the error policy to a per-app error: either propagate it or record
/// it and let the caller continue with the next app.
fn absorb(
    policy: AppErrorPolicy,
    report: &mut RunReport,
    app: &str,
    stage: Stage,
    err: Error,
) -> Result<()> {
    if err.is_fatal() || policy == AppErrorPolicy::Abort {
        return Err(err);
    }
    warn!("skipping app {app} during {stage}: {err}");
    report.app_errors.push(AppFailure {
        app: app.to_string(),
        stage,
        reason: err.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::{Duration, TimeZone, Utc};
    use migralign_db::MigrationRecorder;

    use super::*;
    use crate::pointer::{FilePointerStore, MemoryPointerStore};
    use crate::registry::DirectoryRegistry;

    const TABLE: &str = "django_migrations";

    fn write_migration(app_dir: &Path, name: &str, deps: &str) {
        let migrations = app_dir.join("migrations");
        std::fs::create_dir_all(&migrations).unwrap();
        std::fs::write(
            migrations.join(format!("{name}.py")),
            format!(
                "from django.db import migrations\n\n\nclass Migration(migrations.Migration):\n\n    dependencies = [\n        {deps}\n    ]\n\n    operations = []\n"
            ),
        )
        .unwrap();
    }

    fn deps_of(app_dir: &Path, name: &str) -> DependencyDeclaration {
        let migration = MigrationName::parse(name).unwrap();
        dependencies::read_declaration(&app_dir.join("migrations"), &migration).unwrap()
    }

    fn pending(app: &AppRef, name: &str) -> PendingMigration {
        PendingMigration {
            app: app.clone(),
            migration: MigrationName::parse(name).unwrap(),
        }
    }

    #[test]
    fn chains_pending_migrations_of_one_app() {
        let dir = tempfile::TempDir::new().unwrap();
        let app_dir = dir.path().join("a");
        write_migration(&app_dir, "0003_c", "('a', '0002_b'),");
        write_migration(&app_dir, "0004_d", "('a', '0002_b'),");
        let app = AppRef::new("a", &app_dir);

        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        store.record_applied("a", "0002_b", Utc::now()).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let mut pointers = MemoryPointerStore::new();
        pointers.set(&app, "0002_b").unwrap();

        let items = vec![pending(&app, "0003_c"), pending(&app, "0004_d")];
        let mut report = RunReport::default();
        Reconciler::new(&store, &registry, &mut pointers, vec!["a".into()])
            .relink(&items, &mut report)
            .unwrap();

        assert_eq!(deps_of(&app_dir, "0003_c"), DependencyDeclaration::single("a", "0002_b"));
        assert_eq!(deps_of(&app_dir, "0004_d"), DependencyDeclaration::single("a", "0003_c"));
        assert_eq!(pointers.get(&app).unwrap().as_deref(), Some("0004_d"));
        assert_eq!(report.relinked(), 2);
    }

    #[test]
    fn corrupted_pointer_skips_without_touching_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let app_dir = dir.path().join("a");
        write_migration(&app_dir, "0003_c", "('a', '0001_initial'),");
        let before = std::fs::read(app_dir.join("migrations/0003_c.py")).unwrap();
        let app = AppRef::new("a", &app_dir);

        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        store.record_applied("a", "0002_b", Utc::now()).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let mut pointers = MemoryPointerStore::new();
        pointers.set(&app, "0003_c").unwrap();

        let items = vec![pending(&app, "0003_c")];
        let mut report = RunReport::default();
        Reconciler::new(&store, &registry, &mut pointers, vec!["a".into()])
            .relink(&items, &mut report)
            .unwrap();

        assert_eq!(
            report.outcome_of("a", "0003_c"),
            Some(&Outcome::SkippedCorruptedPointer {
                pointer: "0003_c".into()
            })
        );
        assert_eq!(std::fs::read(app_dir.join("migrations/0003_c.py")).unwrap(), before);
        assert_eq!(pointers.get(&app).unwrap().as_deref(), Some("0003_c"));
        assert!(report.is_success());
    }

    #[test]
    fn missing_pointer_with_applied_history_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let app_dir = dir.path().join("a");
        write_migration(&app_dir, "0003_c", "('a', '0002_b'),");
        let app = AppRef::new("a", &app_dir);

        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        store.record_applied("a", "0002_b", Utc::now()).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let mut pointers = MemoryPointerStore::new();

        let items = vec![pending(&app, "0003_c")];
        let mut report = RunReport::default();
        Reconciler::new(&store, &registry, &mut pointers, vec!["a".into()])
            .relink(&items, &mut report)
            .unwrap();

        assert_eq!(
            report.outcome_of("a", "0003_c"),
            Some(&Outcome::SkippedMissingPointer)
        );
        assert_eq!(pointers.get(&app).unwrap(), None);
    }

    #[test]
    fn fresh_app_anchors_first_pending_then_chains() {
        let dir = tempfile::TempDir::new().unwrap();
        let app_dir = dir.path().join("a");
        write_migration(&app_dir, "0001_initial", "");
        write_migration(&app_dir, "0002_b", "('a', '0001_initial'),");
        write_migration(&app_dir, "0003_c", "('a', '0001_initial'),");

        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let mut pointers = MemoryPointerStore::new();

        let report = Reconciler::new(&store, &registry, &mut pointers, vec!["a".into()]).run();

        assert!(report.is_success());
        assert!(report.pointers_written.is_empty());
        assert_eq!(report.outcome_of("a", "0002_b"), Some(&Outcome::Anchored));
        assert_eq!(
            deps_of(&app_dir, "0002_b"),
            DependencyDeclaration::single("a", "0001_initial")
        );
        assert_eq!(deps_of(&app_dir, "0003_c"), DependencyDeclaration::single("a", "0002_b"));
    }

    #[test]
    fn missing_dependency_block_aborts_under_default_policy() {
        let dir = tempfile::TempDir::new().unwrap();
        let app_dir = dir.path().join("a");
        std::fs::create_dir_all(app_dir.join("migrations")).unwrap();
        std::fs::write(app_dir.join("migrations/0003_c.py"), "operations = []\n").unwrap();
        write_migration(&app_dir, "0004_d", "('a', '0002_b'),");

        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        store.record_applied("a", "0002_b", Utc::now()).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let mut pointers = MemoryPointerStore::new();

        let report = Reconciler::new(&store, &registry, &mut pointers, vec!["a".into()]).run();

        assert!(!report.is_success());
        assert!(report.aborted.as_deref().unwrap().contains("0003_c.py"));
        assert!(report.outcome_of("a", "0003_c").unwrap().is_failure());
        assert_eq!(report.outcome_of("a", "0004_d"), None);
        assert_eq!(report.unprocessed(), 1);
    }

    #[test]
    fn missing_dependency_block_is_recorded_under_skip_policy() {
        let dir = tempfile::TempDir::new().unwrap();
        let app_dir = dir.path().join("a");
        std::fs::create_dir_all(app_dir.join("migrations")).unwrap();
        std::fs::write(app_dir.join("migrations/0003_c.py"), "operations = []\n").unwrap();
        write_migration(&app_dir, "0004_d", "('a', '0001_initial'),");

        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        store.record_applied("a", "0002_b", Utc::now()).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let mut pointers = MemoryPointerStore::new();

        let report = Reconciler::new(&store, &registry, &mut pointers, vec!["a".into()])
            .with_policy(AppErrorPolicy::SkipAndContinue)
            .run();

        assert!(report.aborted.is_none());
        assert!(!report.is_success());
        assert_eq!(report.failed(), 1);
        // The failed migration never advanced the pointer.
        assert_eq!(
            report.outcome_of("a", "0004_d"),
            Some(&Outcome::Relinked {
                depends_on: "0002_b".into()
            })
        );
    }

    #[test]
    fn unknown_app_follows_error_policy() {
        let dir = tempfile::TempDir::new().unwrap();
        let app_dir = dir.path().join("a");
        write_migration(&app_dir, "0002_b", "('a', '0001_initial'),");
        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let apps = vec!["ghost".to_string(), "a".to_string()];

        let mut pointers = MemoryPointerStore::new();
        let report = Reconciler::new(&store, &registry, &mut pointers, apps.clone()).run();
        assert!(report.aborted.as_deref().unwrap().contains("ghost"));
        assert!(report.outcomes.is_empty());

        let mut pointers = MemoryPointerStore::new();
        let report = Reconciler::new(&store, &registry, &mut pointers, apps)
            .with_policy(AppErrorPolicy::SkipAndContinue)
            .run();
        assert!(report.aborted.is_none());
        assert_eq!(report.app_errors.len(), 2);
        assert_eq!(report.app_errors[0].stage, Stage::Regenerate);
        assert_eq!(report.app_errors[1].stage, Stage::Scan);
        assert_eq!(report.outcome_of("a", "0002_b"), Some(&Outcome::Anchored));
    }

    #[test]
    fn regenerate_uses_latest_applied_per_app() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/migrations")).unwrap();
        std::fs::create_dir_all(dir.path().join("b/migrations")).unwrap();

        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        store.record_applied("a", "0002_b", t0).unwrap();
        store.record_applied("a", "0003_c", t0 + Duration::seconds(30)).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let mut pointers = FilePointerStore::default();

        let mut report = RunReport::default();
        Reconciler::new(&store, &registry, &mut pointers, vec!["a".into(), "b".into()])
            .regenerate_pointers(&mut report)
            .unwrap();

        assert_eq!(report.pointers_written, ["a"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a/migrations/max_migration.txt")).unwrap(),
            "0003_c"
        );
        assert!(!dir.path().join("b/migrations/max_migration.txt").exists());
    }

    #[test]
    fn pending_is_sorted_by_name_across_apps() {
        let dir = tempfile::TempDir::new().unwrap();
        write_migration(&dir.path().join("a"), "0003_a", "");
        write_migration(&dir.path().join("b"), "0002_b", "");
        write_migration(&dir.path().join("b"), "0003_b", "");

        let store = MigrationRecorder::in_memory(TABLE).unwrap();
        let registry = DirectoryRegistry::new(dir.path());
        let mut pointers = MemoryPointerStore::new();

        let mut report = RunReport::default();
        let pending = Reconciler::new(&store, &registry, &mut pointers, vec!["a".into(), "b".into()])
            .collect_pending(&mut report)
            .unwrap();

        let order: Vec<String> = pending.iter().map(ToString::to_string).collect();
        assert_eq!(order, ["b.0002_b", "a.0003_a", "b.0003_b"]);
        assert_eq!(report.pending, pending);
    }
}
