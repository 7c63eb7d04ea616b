use std::fmt;

use migralign_common::{Error, Result};
use serde::Serialize;

use crate::reconciler::PendingMigration;

/// What happened to one pending migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Dependencies rewritten onto the previous pointer, pointer advanced.
    Relinked { depends_on: String },
    /// No previous pointer existed; file left as is, pointer advanced.
    Anchored,
    /// The pointer names a migration that is itself pending.
    SkippedCorruptedPointer { pointer: String },
    /// The store has applied migrations but no pointer could be read.
    SkippedMissingPointer,
    Failed { reason: String },
}

impl Outcome {
    pub fn advanced_pointer(&self) -> bool {
        matches!(self, Outcome::Relinked { .. } | Outcome::Anchored)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Outcome::SkippedCorruptedPointer { .. } | Outcome::SkippedMissingPointer
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub app: String,
    pub migration: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Regenerate,
    Scan,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Regenerate => f.write_str("pointer regeneration"),
            Stage::Scan => f.write_str("scan"),
        }
    }
}

/// An app skipped as a whole under the skip-and-continue policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppFailure {
    pub app: String,
    pub stage: Stage,
    pub reason: String,
}

/// Everything a reconciliation run did, including what it did before an
/// abort.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Apps whose pointer was rebuilt from the store.
    pub pointers_written: Vec<String>,
    pub app_errors: Vec<AppFailure>,
    /// Pending migrations in processing order.
    pub pending: Vec<PendingMigration>,
    pub outcomes: Vec<MigrationOutcome>,
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn record(&mut self, item: &PendingMigration, outcome: Outcome) {
        self.outcomes.push(MigrationOutcome {
            app: item.app.label.clone(),
            migration: item.migration.to_string(),
            outcome,
        });
    }

    pub fn abort(&mut self, err: &Error) {
        self.aborted = Some(err.to_string());
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none()
            && self.app_errors.is_empty()
            && !self.outcomes.iter().any(|o| o.outcome.is_failure())
    }

    /// Migrations whose dependencies were rewritten.
    pub fn relinked(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Relinked { .. }))
    }

    /// Migrations that started a chain and kept their file as is.
    pub fn anchored(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Anchored))
    }

    pub fn skipped(&self) -> usize {
        self.count(Outcome::is_skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    /// Pending migrations the run never reached.
    pub fn unprocessed(&self) -> usize {
        self.pending.len().saturating_sub(self.outcomes.len())
    }

    pub fn outcome_of(&self, app: &str, migration: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.app == app && o.migration == migration)
            .map(|o| &o.outcome)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}
