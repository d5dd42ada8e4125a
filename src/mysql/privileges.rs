// ABOUTME: Grant inspection deciding whether a consistent snapshot is safe
// ABOUTME: Probe failures degrade to "no snapshot" instead of failing the run

use sqlx::mysql::MySqlPool;
use sqlx::{Executor, Row};
use std::future::Future;

use crate::error::{BackupError, Result};

/// Privilege that marks an account allowed to take the global read lock a
/// consistent snapshot relies on.
pub const SNAPSHOT_PRIVILEGE: &str = "SUPER";

/// Source of the current account's grant lines.
pub trait GrantSource {
    fn current_grants(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

impl GrantSource for MySqlPool {
    async fn current_grants(&self) -> Result<Vec<String>> {
        let rows = self
            .fetch_all("SHOW GRANTS FOR CURRENT_USER()")
            .await
            .map_err(|e| BackupError::query("Failed to query account grants", e))?;

        Ok(rows.iter().map(grant_line).collect())
    }
}

/// Grant lines arrive as text on most servers and as binary strings on some.
fn grant_line(row: &sqlx::mysql::MySqlRow) -> String {
    row.try_get::<String, _>(0)
        .or_else(|_| {
            row.try_get::<Vec<u8>, _>(0)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })
        .unwrap_or_default()
}

/// True iff any grant line mentions [`SNAPSHOT_PRIVILEGE`], ignoring case.
pub fn grants_allow_consistent_snapshot<S: AsRef<str>>(grants: &[S]) -> bool {
    grants
        .iter()
        .any(|line| line.as_ref().to_ascii_uppercase().contains(SNAPSHOT_PRIVILEGE))
}

/// Check whether dumps can run with `--single-transaction`.
///
/// Never fails: if the grants cannot be read the dump proceeds without the
/// transactional guarantee.
///
/// # Examples
///
/// ```no_run
/// # use mysql_large_dump::mysql::{connect, has_consistent_snapshot_capability, Credentials};
/// # async fn example(credentials: Credentials) -> mysql_large_dump::error::Result<()> {
/// let pool = connect(&credentials).await?;
/// if has_consistent_snapshot_capability(&pool).await {
///     println!("dumping from a consistent snapshot");
/// }
/// # Ok(())
/// # }
/// ```
pub async fn has_consistent_snapshot_capability<G>(source: &G) -> bool
where
    G: GrantSource + Sync,
{
    match source.current_grants().await {
        Ok(grants) => grants_allow_consistent_snapshot(&grants),
        Err(e) => {
            tracing::warn!("⚠ Could not read account grants, assuming no snapshot support: {}", e);
            false
        }
    }
}
