//! RAX FTP server library
//!
//! An RFC 959 FTP server with block-mode and record-structured transfers,
//! charset transcoding, compressed modes, restart markers and per-user
//! quotas and rate limits.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod middleware;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transfer;

pub use config::ServerConfig;
pub use server::{Collaborators, Server};
