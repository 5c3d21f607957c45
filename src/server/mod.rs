//! Server core functionality
//!
//! This module contains the accept loop and the services injected into
//! every session.

pub mod collaborators;
pub mod core;

pub use collaborators::Collaborators;
pub use core::Server;
