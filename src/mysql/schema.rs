// ABOUTME: information_schema queries behind table classification
// ABOUTME: Table sizes, predicate matches, and the create-database preamble

use sqlx::mysql::MySqlPool;
use sqlx::{Executor, Row};

use crate::backup::classify::{MetadataSource, TableSizeInfo};
use crate::error::{BackupError, Result};

/// Size query for every table the predicate does not select.
///
/// The predicate is wrapped in `COALESCE(.., FALSE)` so a condition that
/// evaluates to NULL counts as "no match" here and in [`matching_tables_query`];
/// a table can never fall out of both queries.
pub fn table_sizes_query(excluded_by: &str) -> String {
    format!(
        "SELECT CAST(table_name AS CHAR) AS table_name,
                ROUND(COALESCE(data_length + index_length, 0) / 1048576E0, 2) AS size_mb
         FROM information_schema.TABLES
         WHERE table_schema = ?
           AND NOT COALESCE(({}), FALSE)
         ORDER BY table_name",
        excluded_by
    )
}

/// Names of the tables the predicate selects.
pub fn matching_tables_query(predicate: &str) -> String {
    format!(
        "SELECT CAST(table_name AS CHAR) AS table_name
         FROM information_schema.TABLES
         WHERE table_schema = ?
           AND COALESCE(({}), FALSE)
         ORDER BY table_name",
        predicate
    )
}

impl MetadataSource for MySqlPool {
    async fn table_sizes(&self, schema: &str, excluded_by: &str) -> Result<Vec<TableSizeInfo>> {
        let rows = sqlx::query(&table_sizes_query(excluded_by))
            .bind(schema)
            .fetch_all(self)
            .await
            .map_err(|e| BackupError::query("Failed to query table sizes", e))?;

        rows.iter()
            .map(|row| -> std::result::Result<TableSizeInfo, sqlx::Error> {
                Ok(TableSizeInfo {
                    name: row.try_get(0)?,
                    size_mb: row.try_get(1)?,
                })
            })
            .collect::<std::result::Result<_, sqlx::Error>>()
            .map_err(|e| BackupError::query("Failed to read table sizes", e))
    }

    async fn tables_matching(&self, schema: &str, predicate: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(&matching_tables_query(predicate))
            .bind(schema)
            .fetch_all(self)
            .await
            .map_err(|e| BackupError::query("Failed to list tables matching the always-empty predicate", e))?;

        rows.iter()
            .map(|row| row.try_get(0))
            .collect::<std::result::Result<_, sqlx::Error>>()
            .map_err(|e| BackupError::query("Failed to read matching tables", e))
    }
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Build the drop/create/use preamble from a `SHOW CREATE DATABASE` statement.
///
/// Keeps the server's versioned comments and marks the create as
/// `IF NOT EXISTS` the way `mysqldump --add-drop-database` does.
pub fn build_preamble(database: &str, create_statement: &str) -> String {
    let quoted = quote_identifier(database);
    let create = match create_statement.strip_prefix("CREATE DATABASE ") {
        Some(rest) if !rest.contains("IF NOT EXISTS") => {
            format!("CREATE DATABASE /*!32312 IF NOT EXISTS*/ {}", rest)
        }
        _ => create_statement.to_string(),
    };

    format!(
        "/*!40000 DROP DATABASE IF EXISTS {quoted}*/;\n\n{create};\n\nUSE {quoted};\n\n",
        quoted = quoted,
        create = create.trim_end_matches(';'),
    )
}

/// Fetch the database definition and turn it into the preamble.
pub async fn database_preamble(pool: &MySqlPool, database: &str) -> Result<String> {
    // SHOW statements go over the text protocol; not all of them can be prepared.
    let statement = format!("SHOW CREATE DATABASE {}", quote_identifier(database));
    let row = pool
        .fetch_one(statement.as_str())
        .await
        .map_err(|e| BackupError::query(format!("Failed to read definition of '{}'", database), e))?;

    let create: String = row
        .try_get(1)
        .map_err(|e| BackupError::query("Failed to read CREATE DATABASE statement", e))?;

    Ok(build_preamble(database, &create))
}
