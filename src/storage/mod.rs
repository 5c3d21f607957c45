//! File system storage management
//!
//! Handles file operations, permissions, and path validation.

pub mod filesystem;
pub mod permissions;
pub mod validation;

pub use permissions::{AccessGrant, AccessPolicy, HomeDirectoryPolicy};
pub use validation::{
    MAX_DIRECTORY_DEPTH, change_directory, resolve_file_path, resolve_virtual_path,
    virtual_to_real_path,
};
