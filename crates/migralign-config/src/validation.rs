use std::collections::BTreeSet;

use migralign_common::{Error, Result};

use crate::model::AlignConfig;

const MAX_APP_ID_LEN: usize = 255;

/// Checks a loaded configuration before anything touches the filesystem.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AlignConfig) -> Result<()> {
        if config.apps.is_empty() {
            return Err(Error::Config(
                "no apps configured. Please set `apps` in the config file and assign \
                 the apps that have migrations to it"
                    .into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for app in &config.apps {
            Self::validate_app_id(app)?;
            if !seen.insert(app.as_str()) {
                return Err(Error::Config(format!("app `{app}` is listed twice")));
            }
        }

        for app in config.app_paths.keys() {
            if !seen.contains(app.as_str()) {
                return Err(Error::Config(format!(
                    "`app_paths` names `{app}` which is not in `apps`"
                )));
            }
        }

        if config.database.path.is_none() {
            return Err(Error::Config("`database.path` is required".into()));
        }
        Self::validate_table_name(&config.database.table)?;
        Self::validate_pointer_file(&config.pointer_file)?;
        Ok(())
    }

    /// An app identifier is a dotted path of non-empty word segments.
    pub fn validate_app_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Config("app identifier cannot be empty".into()));
        }
        if id.len() > MAX_APP_ID_LEN {
            return Err(Error::Config(format!("app identifier too long: {id}")));
        }
        let well_formed = id.split('.').all(|segment| {
            !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
        if !well_formed {
            return Err(Error::Config(format!("malformed app identifier: `{id}`")));
        }
        Ok(())
    }

    /// The recorder table name is interpolated into SQL, so only plain
    /// identifiers are accepted.
    pub fn validate_table_name(table: &str) -> Result<()> {
        let mut chars = table.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::Config(format!("invalid recorder table name: `{table}`")));
        }
        Ok(())
    }

    pub fn validate_pointer_file(name: &str) -> Result<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "pointer file must be a bare file name, got `{name}`"
            )));
        }
        Ok(())
    }
}
