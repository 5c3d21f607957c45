//! File permissions
//!
//! Access and quota checks run before a transfer opens its data connection.

use std::path::Path;

use log::info;

use crate::auth::UserAccount;
use crate::error::{StorageError, TransferError};
use crate::storage::filesystem::{directory_size, file_exists};

/// Outcome of a successful access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessGrant {
    /// Bytes the user may still store, `None` when no quota applies.
    pub remaining_quota: Option<u64>,
}

/// Decides whether a user may store or fetch a file.
pub trait AccessPolicy: Send + Sync {
    fn check_upload(
        &self,
        user: &UserAccount,
        virtual_path: &str,
        real_path: &Path,
    ) -> Result<AccessGrant, TransferError>;

    fn check_download(
        &self,
        user: &UserAccount,
        virtual_path: &str,
        real_path: &Path,
    ) -> Result<AccessGrant, TransferError>;
}

/// Grants access inside the user's home directory according to the
/// account's `writable` flag and storage quota.
#[derive(Debug, Default)]
pub struct HomeDirectoryPolicy;

impl AccessPolicy for HomeDirectoryPolicy {
    fn check_upload(
        &self,
        user: &UserAccount,
        virtual_path: &str,
        real_path: &Path,
    ) -> Result<AccessGrant, TransferError> {
        if !user.writable || !real_path.starts_with(&user.home) {
            info!("Upload of {} denied for {}", virtual_path, user.name);
            return Err(TransferError::PermissionDenied(virtual_path.to_string()));
        }

        let Some(quota) = user.quota_bytes else {
            return Ok(AccessGrant::default());
        };

        let used = directory_size(&user.home).map_err(StorageError::from)?;
        if used >= quota {
            return Err(TransferError::QuotaExceeded {
                limit: quota,
                attempted: used,
            });
        }
        Ok(AccessGrant {
            remaining_quota: Some(quota - used),
        })
    }

    fn check_download(
        &self,
        user: &UserAccount,
        virtual_path: &str,
        real_path: &Path,
    ) -> Result<AccessGrant, TransferError> {
        if !real_path.starts_with(&user.home) {
            return Err(TransferError::PermissionDenied(virtual_path.to_string()));
        }
        if !real_path.exists() {
            return Err(StorageError::FileNotFound(virtual_path.to_string()).into());
        }
        if !file_exists(real_path) {
            return Err(StorageError::NotAFile(virtual_path.to_string()).into());
        }
        Ok(AccessGrant::default())
    }
}
