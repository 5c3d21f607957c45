//! FTP Protocol implementation
//!
//! Handles FTP command parsing, the command handlers, and response generation.

pub mod commands;
pub mod handlers;
pub mod parser;
pub mod responses;

pub use commands::{AsyncReply, CommandResult, CommandStatus, FtpCommand};
pub use handlers::standard_registry;
pub use parser::CommandRegistry;
