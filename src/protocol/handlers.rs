//! Command handlers module for the Rax FTP server.
//!
//! This module defines handler functions for FTP commands, handling
//! authentication, session parameters, data channel setup and TLS
//! negotiation, and the registry mapping command tokens to them.

use log::{error, info, warn};
use std::fs;
use std::io::BufReader;
use std::sync::Arc;

use crate::auth::{validate_password, validate_user};
use crate::client::control::{SocketSwap, SwapOutcome};
use crate::client::state::SessionContext;
use crate::error::handlers::transfer_error_reply;
use crate::error::{AuthError, TransferError};
use crate::protocol::commands::{CommandResult, CommandStatus, FtpCommand};
use crate::protocol::parser::CommandRegistry;
use crate::protocol::responses::{self, format_multiline, format_response, messages};
use crate::storage::{change_directory, resolve_virtual_path};
use crate::transfer::charset::Charset;
use crate::transfer::data_channel::{
    DataChannel, passive_reply_address, setup_active_mode, setup_passive_mode,
};
use crate::transfer::file_ops::{RetrDirection, StorDirection, TransferCommand};
use crate::transfer::modes::{DataProtection, DataType, StorageStructure, TransmissionMode};

type Handler = fn(&mut SessionContext, &str) -> CommandResult;
type SwapHandler = fn(&mut SessionContext, &str, &SocketSwap) -> CommandResult;

/// A command that runs a plain handler function on the worker.
struct BasicCommand {
    name: &'static str,
    arg: String,
    requires_login: bool,
    handler: Handler,
}

impl BasicCommand {
    fn public(name: &'static str, arg: &str, handler: Handler) -> Arc<dyn FtpCommand> {
        Arc::new(Self {
            name,
            arg: arg.to_string(),
            requires_login: false,
            handler,
        })
    }

    fn private(name: &'static str, arg: &str, handler: Handler) -> Arc<dyn FtpCommand> {
        Arc::new(Self {
            name,
            arg: arg.to_string(),
            requires_login: true,
            handler,
        })
    }
}

impl FtpCommand for BasicCommand {
    fn name(&self) -> &'static str {
        self.name
    }

    fn requires_login(&self) -> bool {
        self.requires_login
    }

    fn execute(&self, session: &mut SessionContext) -> CommandResult {
        (self.handler)(session, &self.arg)
    }
}

/// A command that rebinds sockets. The reader stops reading until the
/// handler has completed the swap.
struct SocketCommand {
    name: &'static str,
    arg: String,
    requires_login: bool,
    handler: SwapHandler,
    swap: SocketSwap,
}

impl SocketCommand {
    fn create(
        name: &'static str,
        arg: &str,
        requires_login: bool,
        handler: SwapHandler,
    ) -> Arc<dyn FtpCommand> {
        Arc::new(Self {
            name,
            arg: arg.to_string(),
            requires_login,
            handler,
            swap: SocketSwap::new(),
        })
    }
}

impl FtpCommand for SocketCommand {
    fn name(&self) -> &'static str {
        self.name
    }

    fn requires_login(&self) -> bool {
        self.requires_login
    }

    fn execute(&self, session: &mut SessionContext) -> CommandResult {
        (self.handler)(session, &self.arg, &self.swap)
    }

    fn socket_swap(&self) -> Option<&SocketSwap> {
        Some(&self.swap)
    }
}

/// The full command set served on a control connection.
pub fn standard_registry() -> CommandRegistry {
    CommandRegistry::new()
        .with("USER", |arg| BasicCommand::public("USER", arg, handle_cmd_user))
        .with("PASS", |arg| BasicCommand::public("PASS", arg, handle_cmd_pass))
        .with("QUIT", |arg| BasicCommand::public("QUIT", arg, handle_cmd_quit))
        .with("NOOP", |arg| BasicCommand::public("NOOP", arg, handle_cmd_noop))
        .with("SYST", |arg| BasicCommand::public("SYST", arg, handle_cmd_syst))
        .with("FEAT", |arg| BasicCommand::public("FEAT", arg, handle_cmd_feat))
        .with("PWD", |arg| BasicCommand::private("PWD", arg, handle_cmd_pwd))
        .with("CWD", |arg| BasicCommand::private("CWD", arg, handle_cmd_cwd))
        .with("TYPE", |arg| BasicCommand::private("TYPE", arg, handle_cmd_type))
        .with("MODE", |arg| BasicCommand::private("MODE", arg, handle_cmd_mode))
        .with("STRU", |arg| BasicCommand::private("STRU", arg, handle_cmd_stru))
        .with("REST", |arg| BasicCommand::private("REST", arg, handle_cmd_rest))
        .with("STAT", |arg| BasicCommand::private("STAT", arg, handle_cmd_stat))
        .with("ABOR", |arg| BasicCommand::private("ABOR", arg, handle_cmd_abor))
        .with("PBSZ", |arg| BasicCommand::public("PBSZ", arg, handle_cmd_pbsz))
        .with("PROT", |arg| BasicCommand::public("PROT", arg, handle_cmd_prot))
        .with("SITE", |arg| BasicCommand::private("SITE", arg, handle_cmd_site))
        .with("SITE CHARSET", |arg| {
            BasicCommand::private("SITE CHARSET", arg, handle_cmd_site_charset)
        })
        .with("PASV", |arg| SocketCommand::create("PASV", arg, true, handle_cmd_pasv))
        .with("PORT", |arg| SocketCommand::create("PORT", arg, true, handle_cmd_port))
        .with("AUTH", |arg| SocketCommand::create("AUTH", arg, false, handle_cmd_auth))
        .with("STOR", |arg| {
            Arc::new(TransferCommand::new(StorDirection::new(arg, false, false)))
        })
        .with("STOU", |arg| {
            Arc::new(TransferCommand::new(StorDirection::new(arg, true, false)))
        })
        .with("APPE", |arg| {
            Arc::new(TransferCommand::new(StorDirection::new(arg, false, true)))
        })
        .with("RETR", |arg| Arc::new(TransferCommand::new(RetrDirection::new(arg))))
}

fn reply(code: u16, message: &str) -> CommandResult {
    CommandResult::success(format_response(code, message))
}

fn reject(code: u16, message: &str) -> CommandResult {
    CommandResult::failure(message, format_response(code, message))
}

fn require_argument(arg: &str) -> Option<CommandResult> {
    arg.is_empty()
        .then(|| reject(responses::BAD_PARAMETERS, "Syntax error in parameters or arguments"))
}

/// Handles the USER command: records the username pending its password.
fn handle_cmd_user(session: &mut SessionContext, username: &str) -> CommandResult {
    if let Some(missing) = require_argument(username) {
        return missing;
    }

    match validate_user(username, session.config()) {
        Ok(()) => {
            session.set_pending_user(Some(username.to_string()));
            reply(
                responses::PASSWORD_REQUIRED,
                &format!("Password required for {}", username),
            )
        }
        Err(e) => {
            session.set_pending_user(None);
            info!("USER rejected for {}: {}", session.client_addr(), e);
            match e {
                AuthError::InvalidUsername(_) | AuthError::MalformedInput(_) => {
                    reject(responses::BAD_PARAMETERS, &e.to_string())
                }
                _ => reject(responses::AUTH_FAILED, messages::LOGIN_INCORRECT),
            }
        }
    }
}

/// Handles the PASS command: validates the password for the pending user
/// and moves the session into the user's home directory.
fn handle_cmd_pass(session: &mut SessionContext, password: &str) -> CommandResult {
    let Some(username) = session.pending_user().map(str::to_string) else {
        return reject(responses::BAD_SEQUENCE, messages::USER_FIRST);
    };

    let account = match validate_password(&username, password, session.config()) {
        Ok(account) => account,
        Err(e) => {
            session.set_pending_user(None);
            info!("Login failed for {} from {}: {}", username, session.client_addr(), e);
            return reject(responses::AUTH_FAILED, messages::LOGIN_INCORRECT);
        }
    };

    if let Err(e) = fs::create_dir_all(&account.home) {
        warn!("Failed to create home directory {}: {}", account.home.display(), e);
    }

    let home = session
        .config()
        .find_user(&username)
        .map(|u| u.home.clone())
        .unwrap_or_default();
    let virtual_home = resolve_virtual_path("/", &home).unwrap_or_else(|_| "/".to_string());

    session.login(account);
    session.set_current_virtual_path(virtual_home);
    session.events().login(session.client_addr(), &username);

    reply(
        responses::LOGIN_SUCCESS,
        &format!("User {} logged in", username),
    )
}

/// Handles the QUIT command: logs out the client and signals connection close.
fn handle_cmd_quit(session: &mut SessionContext, _: &str) -> CommandResult {
    session.logout();

    CommandResult {
        status: CommandStatus::CloseConnection,
        message: Some(format_response(responses::GOODBYE, messages::GOODBYE)),
    }
}

fn handle_cmd_noop(_: &mut SessionContext, _: &str) -> CommandResult {
    reply(responses::OK, messages::NOOP)
}

fn handle_cmd_syst(_: &mut SessionContext, _: &str) -> CommandResult {
    reply(responses::SYSTEM_TYPE, messages::SYSTEM)
}

fn handle_cmd_feat(session: &mut SessionContext, _: &str) -> CommandResult {
    let mut features = vec![
        "MODE B".to_string(),
        "MODE C".to_string(),
        "MODE Z".to_string(),
        "REST STREAM".to_string(),
        "SITE CHARSET".to_string(),
        "STRU R".to_string(),
    ];
    if session.transport().is_some() {
        features.push("AUTH TLS".to_string());
        features.push("PBSZ".to_string());
        features.push("PROT".to_string());
    }
    CommandResult::success(format_multiline(
        responses::FEATURES,
        "Extensions supported:",
        &features,
        "End",
    ))
}

/// Handles the PWD command: returns the current virtual directory to the client.
fn handle_cmd_pwd(session: &mut SessionContext, _: &str) -> CommandResult {
    reply(
        responses::PATH_CREATED,
        &format!("\"{}\" is the current directory", session.current_virtual_path()),
    )
}

/// Handles the CWD command: changes to an existing directory under the root.
fn handle_cmd_cwd(session: &mut SessionContext, path: &str) -> CommandResult {
    if let Some(missing) = require_argument(path) {
        return missing;
    }

    match change_directory(&session.server_root(), session.current_virtual_path(), path) {
        Ok(new_virtual_path) => {
            info!(
                "Client {} changed directory to {}",
                session.client_addr(),
                new_virtual_path
            );
            session.set_current_virtual_path(new_virtual_path);
            reply(responses::FILE_ACTION_OK, "Directory changed successfully")
        }
        Err(e) => {
            info!("CWD {} failed for {}: {}", path, session.client_addr(), e);
            reject(responses::FILE_NOT_FOUND, &e.to_string())
        }
    }
}

fn handle_cmd_type(session: &mut SessionContext, arg: &str) -> CommandResult {
    if let Some(missing) = require_argument(arg) {
        return missing;
    }
    match DataType::from_argument(arg) {
        Some(data_type) => {
            session.set_data_type(data_type);
            reply(responses::OK, &format!("Type set to {}", data_type.code()))
        }
        None => reject(
            responses::PARAMETER_NOT_IMPLEMENTED,
            &format!("Type {} not implemented", arg),
        ),
    }
}

fn handle_cmd_mode(session: &mut SessionContext, arg: &str) -> CommandResult {
    if let Some(missing) = require_argument(arg) {
        return missing;
    }
    match TransmissionMode::from_code(arg) {
        Ok(mode) => {
            session.set_mode(mode);
            reply(responses::OK, &format!("Mode set to {}", mode.code()))
        }
        Err(e) => reject(responses::PARAMETER_NOT_IMPLEMENTED, &e.to_string()),
    }
}

fn handle_cmd_stru(session: &mut SessionContext, arg: &str) -> CommandResult {
    if let Some(missing) = require_argument(arg) {
        return missing;
    }
    match StorageStructure::from_code(arg) {
        Some(structure) => {
            session.set_structure(structure);
            reply(
                responses::OK,
                &format!("Structure set to {}", structure.code()),
            )
        }
        None => reject(
            responses::PARAMETER_NOT_IMPLEMENTED,
            &format!("Structure {} not implemented", arg),
        ),
    }
}

/// Handles the REST command. In block mode a marker received on an earlier
/// upload maps to the byte count it was recorded at.
fn handle_cmd_rest(session: &mut SessionContext, arg: &str) -> CommandResult {
    let Ok(value) = arg.parse::<u64>() else {
        return reject(responses::BAD_PARAMETERS, "Invalid restart position");
    };

    let offset = match session.mode() {
        TransmissionMode::Block => session.restart_markers().get(value).unwrap_or(value),
        _ => value,
    };
    session.set_file_offset(offset);

    reply(
        responses::PENDING_FURTHER_INFO,
        &format!("Restarting at {}. Send STORE or RETRIEVE", offset),
    )
}

/// STAT outside a transfer reports the session parameters.
fn handle_cmd_stat(session: &mut SessionContext, arg: &str) -> CommandResult {
    if !arg.is_empty() {
        return reject(
            responses::PARAMETER_NOT_IMPLEMENTED,
            "STAT with arguments not implemented",
        );
    }

    let mut body = vec![
        format!("Connected from {}", session.client_addr().ip()),
        format!(
            "Logged in as {}",
            session.user().map_or("(nobody)", |u| u.name.as_str())
        ),
        format!(
            "TYPE: {}, MODE: {}, STRU: {}",
            session.data_type().code(),
            session.mode().code(),
            session.structure().code()
        ),
    ];
    if let Some(charset) = session.charset() {
        body.push(format!("Charset: {}", charset));
    }
    if session.is_control_secured() {
        body.push("Control connection secured with TLS".to_string());
    }
    if session.protection() == DataProtection::Private {
        body.push("Data connections protected".to_string());
    }
    if session.file_offset() > 0 {
        body.push(format!("Restart offset: {}", session.file_offset()));
    }

    CommandResult::success(format_multiline(
        responses::FEATURES,
        "FTP server status:",
        &body,
        "End of status",
    ))
}

/// ABOR with no transfer in flight.
fn handle_cmd_abor(_: &mut SessionContext, _: &str) -> CommandResult {
    reply(responses::NO_TRANSFER, messages::NO_TRANSFER)
}

fn handle_cmd_pbsz(session: &mut SessionContext, arg: &str) -> CommandResult {
    if !session.is_control_secured() {
        return reject(responses::BAD_SEQUENCE, "PBSZ requires a secured control connection");
    }
    if arg.parse::<u64>().is_err() {
        return reject(responses::BAD_PARAMETERS, "Invalid buffer size");
    }
    session.set_attribute("PBSZ", "0");
    reply(responses::OK, "PBSZ=0")
}

fn handle_cmd_prot(session: &mut SessionContext, arg: &str) -> CommandResult {
    if session.attribute("PBSZ").is_none() {
        return reject(responses::BAD_SEQUENCE, "PBSZ must precede PROT");
    }
    let protection = match arg.to_ascii_uppercase().as_str() {
        "C" => DataProtection::Clear,
        "P" => DataProtection::Private,
        _ => {
            return reject(
                responses::PARAMETER_NOT_IMPLEMENTED,
                &format!("Protection level {} not supported", arg),
            );
        }
    };
    session.set_protection(protection);
    reply(
        responses::OK,
        &format!("Protection level set to {}", arg.to_ascii_uppercase()),
    )
}

fn handle_cmd_site(_: &mut SessionContext, arg: &str) -> CommandResult {
    reject(
        responses::NOT_IMPLEMENTED,
        &format!("SITE {} not implemented", arg),
    )
}

/// SITE CHARSET: reports or sets the charset used for text transfers.
fn handle_cmd_site_charset(session: &mut SessionContext, arg: &str) -> CommandResult {
    if arg.is_empty() {
        let current = session
            .charset()
            .map(str::to_string)
            .or_else(|| session.data_type().default_charset().map(str::to_string))
            .unwrap_or_else(|| "none".to_string());
        return reply(responses::OK, &format!("Charset is {}", current));
    }

    match Charset::for_name(arg) {
        Ok(charset) => {
            session.set_charset(Some(charset.name().to_string()));
            reply(responses::OK, &format!("Charset set to {}", charset.name()))
        }
        Err(e) => reject(responses::FILE_NOT_FOUND, &e.to_string()),
    }
}

/// Handles the PASV command: binds a data listener and reports its address.
fn handle_cmd_pasv(session: &mut SessionContext, _: &str, _: &SocketSwap) -> CommandResult {
    let listener = match setup_passive_mode(session.local_ip(), session.config().server.data_port_range()) {
        Ok(listener) => listener,
        Err(e) => {
            error!("PASV failed for {}: {}", session.client_addr(), e);
            return CommandResult::failure(e.to_string(), transfer_error_reply(&e));
        }
    };

    let address = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            let e = TransferError::ListenerConfigurationFailed(e);
            return CommandResult::failure(e.to_string(), transfer_error_reply(&e));
        }
    };

    session.set_data_channel(DataChannel::Passive(listener));
    reply(
        responses::PASSIVE_MODE,
        &format!("Entering Passive Mode ({})", passive_reply_address(address)),
    )
}

/// Handles the PORT command: records the client's data address.
fn handle_cmd_port(session: &mut SessionContext, arg: &str, _: &SocketSwap) -> CommandResult {
    match setup_active_mode(
        session.client_addr(),
        arg,
        session.config().server.min_client_port,
    ) {
        Ok(addr) => {
            session.set_data_channel(DataChannel::Active(addr));
            reply(responses::OK, "PORT command successful")
        }
        Err(e) => {
            info!("PORT rejected for {}: {}", session.client_addr(), e);
            CommandResult::failure(e.to_string(), transfer_error_reply(&e))
        }
    }
}

/// Handles AUTH TLS: replies 234 in the clear, then upgrades the control
/// connection and hands the secured reader to the reader thread.
fn handle_cmd_auth(session: &mut SessionContext, arg: &str, swap: &SocketSwap) -> CommandResult {
    let mechanism = arg.to_ascii_uppercase();
    if mechanism != "TLS" && mechanism != "SSL" && mechanism != "TLS-C" {
        return reject(
            responses::PARAMETER_NOT_IMPLEMENTED,
            &format!("AUTH {} not supported", arg),
        );
    }
    if session.is_control_secured() {
        return reject(responses::BAD_SEQUENCE, "Control connection already secured");
    }
    let Some(transport) = session.transport() else {
        return reject(responses::SECURITY_UNAVAILABLE, "TLS not available");
    };
    let Some(socket) = session.control_socket().and_then(|s| s.try_clone().ok()) else {
        return reject(responses::SECURITY_UNAVAILABLE, "Control socket unavailable");
    };

    if let Err(e) = session
        .control()
        .send(responses::AUTH_OK, &format!("AUTH {} successful", mechanism))
    {
        warn!("Failed to send AUTH reply to {}: {}", session.client_addr(), e);
        return CommandResult {
            status: CommandStatus::CloseConnection,
            message: None,
        };
    }

    match transport.secure_control(socket) {
        Ok((reader, writer)) => {
            session.control().replace(writer);
            swap.complete(SwapOutcome::Replaced(Box::new(BufReader::new(reader))));
            session.set_control_secured(true);
            info!("Control connection of {} secured", session.client_addr());
            CommandResult {
                status: CommandStatus::Success,
                message: None,
            }
        }
        Err(e) => {
            error!("TLS handshake with {} failed: {}", session.client_addr(), e);
            CommandResult {
                status: CommandStatus::CloseConnection,
                message: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_command() {
        let registry = standard_registry();
        for token in [
            "USER", "PASS", "QUIT", "NOOP", "SYST", "FEAT", "PWD", "CWD", "TYPE", "MODE", "STRU",
            "REST", "PASV", "PORT", "STOR", "STOU", "APPE", "RETR", "STAT", "ABOR", "AUTH",
            "PBSZ", "PROT",
        ] {
            let command = registry.parse(token).unwrap();
            assert_eq!(command.name(), token);
        }
        assert_eq!(
            registry.parse("site charset EBCDIC").unwrap().name(),
            "SITE CHARSET"
        );
    }

    #[test]
    fn only_session_setup_commands_skip_login() {
        let registry = standard_registry();
        for token in ["USER x", "PASS x", "QUIT", "NOOP", "FEAT", "AUTH TLS"] {
            assert!(!registry.parse(token).unwrap().requires_login(), "{}", token);
        }
        for token in ["STOR a", "RETR a", "CWD /", "PASV", "TYPE A"] {
            assert!(registry.parse(token).unwrap().requires_login(), "{}", token);
        }
    }

    #[test]
    fn socket_modifiers_expose_a_swap() {
        let registry = standard_registry();
        assert!(registry.parse("PASV").unwrap().socket_swap().is_some());
        assert!(registry.parse("AUTH TLS").unwrap().socket_swap().is_some());
        assert!(registry.parse("NOOP").unwrap().socket_swap().is_none());
    }
}
