// ABOUTME: MySQL connection setup for metadata queries
// ABOUTME: Maps driver failures to actionable connection errors

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::fmt;
use std::time::Duration;

use crate::error::{BackupError, Result};

/// A password that never shows up in logs or debug output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(****)")
    }
}

/// Where and as whom to connect. Shared by the metadata connection and the
/// dump tool so both see the same server.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Password,
    pub database: String,
}

impl Credentials {
    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose())
            .database(&self.database)
    }
}

/// Open a single-connection pool to the database in `credentials`.
pub async fn connect(credentials: &Credentials) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(credentials.connect_options())
        .await
        .map_err(|e| describe_connect_error(credentials, e))
}

fn describe_connect_error(credentials: &Credentials, err: sqlx::Error) -> BackupError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|c| c.into_owned());
    let error_msg = err.to_string();

    let message = match code.as_deref() {
        Some("1045") => format!(
            "Authentication failed: Access denied for user '{}'.\n\
             Please verify your database credentials.",
            credentials.username
        ),
        Some("1044") | Some("1049") => format!(
            "Database '{}' does not exist or is not accessible.\n\
             Error: {}",
            credentials.database, error_msg
        ),
        _ if matches!(err, sqlx::Error::PoolTimedOut)
            || error_msg.contains("timed out")
            || error_msg.contains("timeout") =>
        {
            format!(
                "Connection timeout: {}:{} did not respond in time.\n\
                 This could indicate network issues or server overload.\n\
                 Error: {}",
                credentials.host, credentials.port, error_msg
            )
        }
        _ if error_msg.contains("Connection refused") => format!(
            "Connection refused: Unable to reach {}:{}.\n\
             Please check:\n\
             - The host and port are correct\n\
             - The database server is running\n\
             - Firewall rules allow connections\n\
             Error: {}",
            credentials.host, credentials.port, error_msg
        ),
        _ => format!("Failed to connect to database: {}", error_msg),
    };

    BackupError::Connection {
        message,
        source: Some(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(port: u16) -> Credentials {
        Credentials {
            host: "127.0.0.1".to_string(),
            port,
            username: "backup".to_string(),
            password: Password::new("s3cret"),
            database: "shop".to_string(),
        }
    }

    #[test]
    fn test_password_is_redacted() {
        let rendered = format!("{:?}", credentials(3306));
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("Password(****)"));
    }

    #[test]
    fn test_timeout_is_described() {
        let err = describe_connect_error(&credentials(3306), sqlx::Error::PoolTimedOut);
        assert!(matches!(err, BackupError::Connection { .. }));
        assert!(err.to_string().starts_with("Connection timeout"));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Port 1 is privileged and practically never has a MySQL server.
        let result = connect(&credentials(1)).await;
        assert!(matches!(result, Err(BackupError::Connection { .. })));
    }

    // NOTE: Requires a real MySQL instance, see tests/integration_test.rs
    #[tokio::test]
    #[ignore]
    async fn test_connect_with_valid_credentials_succeeds() {
        let credentials = Credentials {
            host: std::env::var("TEST_MYSQL_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: 3306,
            username: std::env::var("TEST_MYSQL_USER").expect("TEST_MYSQL_USER must be set"),
            password: Password::new(std::env::var("TEST_MYSQL_PASSWORD").unwrap_or_default()),
            database: std::env::var("TEST_MYSQL_DATABASE").expect("TEST_MYSQL_DATABASE must be set"),
        };
        assert!(connect(&credentials).await.is_ok());
    }
}
