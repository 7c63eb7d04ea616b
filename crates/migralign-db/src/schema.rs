/// Layout of the recorder table the migration executor maintains.
///
/// One row per applied migration; `applied` holds the application time as
/// `YYYY-MM-DD HH:MM:SS.ffffff`. migralign only reads it, the DDL exists so
/// fixtures can stand up an equivalent table.
pub fn recorder_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            applied DATETIME NOT NULL
        );"
    )
}

/// Timestamp format the recorder writes into `applied`.
pub const APPLIED_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
