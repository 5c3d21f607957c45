//! Client session management
//!
//! Handles the per-connection session state, the command reader thread and
//! the worker loop that executes commands.

pub mod control;
pub mod handler;
pub mod reader;
pub mod state;

pub use control::ControlChannel;
pub use handler::run_session;
pub use reader::CommandReader;
pub use state::SessionContext;
