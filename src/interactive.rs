// ABOUTME: Interactive terminal prompts
// ABOUTME: Reads the database password without echoing it

use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Password};

use crate::mysql;

/// Ask for the password of `username` on the terminal.
///
/// An empty answer is accepted; some accounts have no password.
///
/// # Examples
///
/// ```no_run
/// # use mysql_large_dump::interactive::prompt_password;
/// # fn example() -> anyhow::Result<()> {
/// let password = prompt_password("backup")?;
/// # Ok(())
/// # }
/// ```
pub fn prompt_password(username: &str) -> Result<mysql::Password> {
    let password = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Password for {}", username))
        .allow_empty_password(true)
        .interact()
        .context("Failed to read password from terminal")?;

    Ok(mysql::Password::new(password))
}
