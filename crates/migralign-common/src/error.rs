use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("unknown app: {0}")]
    UnknownApp(String),

    #[error("migration file error: {0}")]
    MigrationFile(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Fatal errors abort the whole run regardless of the per-app error
    /// policy: a broken configuration or an unreachable migration store
    /// leaves nothing meaningful to reconcile.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Database(_))
    }
}
