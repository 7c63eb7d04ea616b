use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequence number of the migration every app starts with. It never takes
/// part in re-chaining.
pub const BOOTSTRAP_SEQUENCE: &str = "0001";

/// Extension of migration source files.
const SOURCE_EXTENSION: &str = ".py";

/// A migration identifier of the form `<4-digit-sequence>_<description>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationName(String);

impl MigrationName {
    /// Parse a bare migration name (no extension, no path).
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() < 6 {
            return None;
        }
        if !bytes[..4].iter().all(u8::is_ascii_digit) || bytes[4] != b'_' {
            return None;
        }
        Some(Self(s.to_string()))
    }

    /// Parse a migration source file name such as `0003_add_field.py`.
    ///
    /// Returns `None` for package markers, non-source files and anything not
    /// following the numbered-prefix convention.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(SOURCE_EXTENSION)?;
        Self::parse(stem)
    }

    pub fn sequence(&self) -> &str {
        &self.0[..4]
    }

    pub fn is_bootstrap(&self) -> bool {
        self.sequence() == BOOTSTRAP_SEQUENCE
    }

    pub fn file_name(&self) -> String {
        format!("{}{SOURCE_EXTENSION}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigrationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the applied-migrations store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub app: String,
    pub name: String,
    pub applied: Option<DateTime<Utc>>,
}
