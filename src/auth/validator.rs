//! Authentication validator
//!
//! Implements FTP user authentication logic, including username and password
//! validation against the accounts listed in the server configuration.

use std::path::PathBuf;

use crate::config::ServerConfig;
use crate::error::AuthError;

/// An authenticated user, resolved against the server root.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub name: String,
    /// Real path of the user's home directory
    pub home: PathBuf,
    pub writable: bool,
    pub upload_rate_kbps: i64,
    pub download_rate_kbps: i64,
    pub quota_bytes: Option<u64>,
}

/// Performs basic input sanitation to check for malicious or malformed usernames/passwords.
fn is_valid_input(input: &str, max_length: usize) -> bool {
    !input.trim().is_empty() && input.len() <= max_length && !input.contains(['\r', '\n', '\0'])
}

/// Validates that the given username exists in the configured accounts.
pub fn validate_user(username: &str, config: &ServerConfig) -> Result<(), AuthError> {
    // Check for invalid username characters/format
    if username.contains(['@', '#', ',', '%', '/']) || username.starts_with(char::is_numeric) {
        return Err(AuthError::InvalidUsername(username.to_string()));
    }

    if !is_valid_input(username, config.server.max_username_length) {
        return Err(AuthError::MalformedInput("Invalid username format".into()));
    }

    match config.find_user(username) {
        Some(_) => Ok(()),
        None => Err(AuthError::UserNotFound(username.to_string())),
    }
}

/// Validates the password and resolves the user's account.
pub fn validate_password(
    username: &str,
    password: &str,
    config: &ServerConfig,
) -> Result<UserAccount, AuthError> {
    if !is_valid_input(password, config.server.max_command_length) {
        return Err(AuthError::MalformedInput("Invalid password format".into()));
    }

    let user = config
        .find_user(username)
        .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
    if user.password != password {
        return Err(AuthError::InvalidPassword(username.to_string()));
    }

    Ok(UserAccount {
        name: user.name.clone(),
        home: config.server.server_root_path().join(&user.home),
        writable: user.writable,
        upload_rate_kbps: user.upload_rate(&config.limits),
        download_rate_kbps: user.download_rate(&config.limits),
        quota_bytes: user.quota_bytes(),
    })
}
