//! Authentication system
//!
//! Handles user authentication and credential validation.

pub mod validator;

pub use validator::{UserAccount, validate_password, validate_user};
