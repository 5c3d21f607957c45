use log::{debug, info, warn};

use crate::client::control::SwapGuard;
use crate::client::reader::CommandReader;
use crate::client::state::SessionContext;
use crate::error::SessionError;
use crate::middleware::logging::log_command;
use crate::protocol::commands::CommandStatus;
use crate::protocol::responses::{self, messages};

/// Runs one FTP session on the worker thread.
///
/// - Takes commands from the reader in arrival order.
/// - Gates everything but the session setup commands behind a login.
/// - Ends on QUIT, on idle timeout, or when the reader goes away.
pub fn run_session(mut session: SessionContext, reader: CommandReader) {
    let client_addr = session.client_addr();
    let idle_timeout = session.config().server.idle_timeout();

    loop {
        let command = match reader.wait_for_next_command(idle_timeout) {
            Ok(command) => command,
            Err(SessionError::CommandTimeout) => {
                info!("Client {} idle, closing connection", client_addr);
                session
                    .control()
                    .send_logged(responses::SERVICE_UNAVAILABLE, messages::IDLE_TIMEOUT);
                break;
            }
            Err(SessionError::IllegalCommand(line)) => {
                debug!("Unrecognized command from {}: {:?}", client_addr, line);
                session
                    .control()
                    .send_logged(responses::SYNTAX_ERROR, messages::UNRECOGNIZED);
                continue;
            }
            Err(SessionError::ReaderTerminated) => break,
        };

        log_command(&client_addr, command.name());

        // Releases a waiting reader however the command ends.
        let _guard = SwapGuard(command.socket_swap());

        if command.requires_login() && !session.is_logged_in() {
            session
                .control()
                .send_logged(responses::AUTH_FAILED, messages::NOT_LOGGED_IN);
            continue;
        }

        let result = command.execute(&mut session);

        if let Some(message) = &result.message {
            if let Err(e) = session.control().reply(message) {
                warn!("Failed to send reply to {}: {}", client_addr, e);
                break;
            }
        }

        match result.status {
            CommandStatus::CloseConnection => {
                info!("Client {} requested to quit", client_addr);
                break;
            }
            CommandStatus::Failure(reason) => {
                debug!("{} failed for {}: {}", command.name(), client_addr, reason);
            }
            CommandStatus::Success => {}
        }
    }

    session.close_control();
    session.events().session_closed(client_addr);
    info!("Client {} disconnected", client_addr);
}
