//! Module `command`
//!
//! Defines the command objects produced by the parser, their status, and
//! the results they hand back to the session worker.

use crate::client::control::SocketSwap;
use crate::client::state::SessionContext;

/// Represents the outcome status of executing a command.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure(String),
    CloseConnection,
}

/// Struct encapsulating the full result of a command execution.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub message: Option<String>,
}

impl CommandResult {
    pub fn success(message: String) -> Self {
        Self {
            status: CommandStatus::Success,
            message: Some(message),
        }
    }

    pub fn failure(reason: impl Into<String>, message: String) -> Self {
        Self {
            status: CommandStatus::Failure(reason.into()),
            message: Some(message),
        }
    }
}

/// How a command in flight treated a line from the control connection.
#[derive(Debug, PartialEq, Eq)]
pub enum AsyncReply {
    /// Not for this command; queue it normally.
    NotHandled,
    /// Consumed without a reply.
    Handled,
    /// Consumed; send this reply right away.
    Reply(String),
}

/// A parsed FTP command bound to its argument.
///
/// Commands are shared between the worker, which runs `execute`, and the
/// reader thread, which may route STAT/ABOR lines to the command while it
/// is still executing. Mutable progress state therefore lives behind
/// atomics or locks inside the implementation.
pub trait FtpCommand: Send + Sync {
    fn name(&self) -> &'static str;

    fn requires_login(&self) -> bool {
        true
    }

    fn execute(&self, session: &mut SessionContext) -> CommandResult;

    /// Offered every control line that arrives while this is the most
    /// recently dispatched command.
    fn handle_async_cmd(&self, _line: &str) -> AsyncReply {
        AsyncReply::NotHandled
    }

    /// Requests cancellation; called on ABOR and when the control
    /// connection goes away.
    fn abort(&self) {}

    /// Present for commands that replace or rebind sockets. The reader
    /// stops reading until the swap completes.
    fn socket_swap(&self) -> Option<&SocketSwap> {
        None
    }
}
