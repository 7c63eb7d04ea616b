use std::path::{Path, PathBuf};

use migralign_common::{Error, Result};
use tracing::{debug, info};

use crate::model::{AlignConfig, CliOverrides};
use crate::validation::ConfigValidator;

/// Reads an [`AlignConfig`] from disk and anchors its relative paths.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the config at `path`, resolve its relative paths, apply command
    /// line overrides and validate the result.
    pub fn load(path: &Path, overrides: Option<&CliOverrides>) -> Result<AlignConfig> {
        let mut config = Self::read(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self::resolve_paths(&mut config, base_dir);
        if let Some(overrides) = overrides {
            config.apply(overrides);
        }
        ConfigValidator::validate(&config)?;
        info!(
            "loaded config from {} ({} apps)",
            path.display(),
            config.apps.len()
        );
        Ok(config)
    }

    /// Parse the config without resolving or validating it. The format is
    /// picked from the file extension.
    pub fn read(path: &Path) -> Result<AlignConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::parse(&contents, ext)
    }

    pub fn parse(contents: &str, ext: &str) -> Result<AlignConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Anchor `project_root` at `base_dir`, then the database path at
    /// `base_dir` and the per-app overrides at the project root.
    pub fn resolve_paths(config: &mut AlignConfig, base_dir: &Path) {
        let root = match config.project_root.take() {
            Some(root) => anchor(base_dir, root),
            None => base_dir.to_path_buf(),
        };
        debug!("project root resolved to {}", root.display());

        if let Some(db) = config.database.path.take() {
            config.database.path = Some(anchor(base_dir, db));
        }
        for dir in config.app_paths.values_mut() {
            *dir = anchor(&root, std::mem::take(dir));
        }
        config.project_root = Some(root);
    }
}

fn anchor(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::ConfigLoader;
    use crate::model::{AppErrorPolicy, CliOverrides};

    #[test]
    fn parses_toml() {
        let config = ConfigLoader::parse(
            r#"
apps = ["shop.billing", "accounts"]
on_app_error = "skip-and-continue"

[database]
path = "db.sqlite3"

[app_paths]
accounts = "src/accounts"
"#,
            "toml",
        )
        .unwrap();

        assert_eq!(config.apps, ["shop.billing", "accounts"]);
        assert_eq!(config.on_app_error, AppErrorPolicy::SkipAndContinue);
        assert_eq!(config.database.path, Some(PathBuf::from("db.sqlite3")));
        assert_eq!(config.database.table, "django_migrations");
        assert_eq!(config.pointer_file, "max_migration.txt");
        assert_eq!(
            config.app_paths.get("accounts"),
            Some(&PathBuf::from("src/accounts"))
        );
    }

    #[test]
    fn parses_yaml() {
        let config = ConfigLoader::parse(
            "apps:\n  - billing\ndatabase:\n  path: /var/db.sqlite3\n  table: schema_log\n",
            "yaml",
        )
        .unwrap();
        assert_eq!(config.apps, ["billing"]);
        assert_eq!(config.database.table, "schema_log");
        assert_eq!(config.on_app_error, AppErrorPolicy::Abort);
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = ConfigLoader::parse("apps = []", "ini").unwrap_err();
        assert!(err.to_string().contains("unsupported config extension"));
    }

    #[test]
    fn resolves_relative_paths_against_config_dir() {
        let mut config = ConfigLoader::parse(
            r#"
apps = ["accounts"]
project_root = "backend"

[database]
path = "db.sqlite3"

[app_paths]
accounts = "src/accounts"
"#,
            "toml",
        )
        .unwrap();

        ConfigLoader::resolve_paths(&mut config, Path::new("/srv/site"));
        assert_eq!(config.project_root, Some(PathBuf::from("/srv/site/backend")));
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/srv/site/db.sqlite3"))
        );
        assert_eq!(
            config.app_paths.get("accounts"),
            Some(&PathBuf::from("/srv/site/backend/src/accounts"))
        );
    }

    #[test]
    fn load_reads_and_validates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("migralign.toml");
        std::fs::write(&path, "apps = [\"billing\"]\n[database]\npath = \"db.sqlite3\"\n").unwrap();

        let config = ConfigLoader::load(&path, None).unwrap();
        assert_eq!(config.project_root.as_deref(), Some(dir.path()));
        assert_eq!(config.database.path, Some(dir.path().join("db.sqlite3")));
    }

    #[test]
    fn load_fails_without_app_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("migralign.toml");
        std::fs::write(&path, "[database]\npath = \"db.sqlite3\"\n").unwrap();

        let err = ConfigLoader::load(&path, None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn overrides_apply_before_validation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("migralign.yml");
        std::fs::write(&path, "apps: [billing]\n").unwrap();

        assert!(ConfigLoader::load(&path, None).is_err());

        let overrides = CliOverrides {
            database: Some(PathBuf::from("/var/lib/site/db.sqlite3")),
            on_app_error: Some(AppErrorPolicy::SkipAndContinue),
        };
        let config = ConfigLoader::load(&path, Some(&overrides)).unwrap();
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/site/db.sqlite3"))
        );
        assert_eq!(config.on_app_error, AppErrorPolicy::SkipAndContinue);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ConfigLoader::load(Path::new("/nonexistent/migralign.toml"), None).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
