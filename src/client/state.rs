//! Module `state`
//!
//! Defines `SessionContext`, the per-connection protocol state mutated by
//! command execution: login status, working directory, transfer parameters,
//! restart markers and the negotiated data channel.

use log::debug;
use std::collections::HashMap;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::auth::UserAccount;
use crate::client::control::ControlChannel;
use crate::config::ServerConfig;
use crate::error::TransferError;
use crate::middleware::EventFanout;
use crate::server::collaborators::Collaborators;
use crate::storage::AccessPolicy;
use crate::transfer::block::RestartMarkers;
use crate::transfer::data_channel::{ConnectionRequest, DataChannel, DataConnection, SecureTransport};
use crate::transfer::modes::{DataProtection, DataType, StorageStructure, TransmissionMode};
use crate::transfer::pipeline::PipelineBuilder;

/// State of one control connection. Owned by the session worker; the
/// reader thread never touches it.
pub struct SessionContext {
    client_addr: SocketAddr,
    local_ip: IpAddr,
    config: Arc<ServerConfig>,
    collaborators: Collaborators,
    control: ControlChannel,
    control_socket: Option<TcpStream>,

    pending_user: Option<String>,
    user: Option<UserAccount>,
    current_virtual_path: String,

    data_type: DataType,
    mode: TransmissionMode,
    structure: StorageStructure,
    charset: Option<String>,
    file_offset: u64,
    restart_markers: RestartMarkers,
    attributes: HashMap<String, String>,

    data_channel: DataChannel,
    protection: DataProtection,
    control_secured: bool,
}

impl SessionContext {
    pub fn new(
        client_addr: SocketAddr,
        local_ip: IpAddr,
        config: Arc<ServerConfig>,
        collaborators: Collaborators,
        control: ControlChannel,
    ) -> Self {
        Self {
            client_addr,
            local_ip,
            config,
            collaborators,
            control,
            control_socket: None,
            pending_user: None,
            user: None,
            current_virtual_path: "/".to_string(),
            data_type: DataType::default(),
            mode: TransmissionMode::default(),
            structure: StorageStructure::default(),
            charset: None,
            file_offset: 0,
            restart_markers: RestartMarkers::new(),
            attributes: HashMap::new(),
            data_channel: DataChannel::Unset,
            protection: DataProtection::default(),
            control_secured: false,
        }
    }

    /// Keeps a handle on the raw control socket for AUTH and for shutdown.
    pub fn with_control_socket(mut self, socket: TcpStream) -> Self {
        self.control_socket = Some(socket);
        self
    }

    // --------------------
    // Connection and services
    // --------------------

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    pub fn access_policy(&self) -> &dyn AccessPolicy {
        self.collaborators.access.as_ref()
    }

    pub fn events(&self) -> &EventFanout {
        &self.collaborators.events
    }

    pub fn transport(&self) -> Option<&dyn SecureTransport> {
        self.collaborators.transport.as_deref()
    }

    pub fn control_socket(&self) -> Option<&TcpStream> {
        self.control_socket.as_ref()
    }

    /// Shuts the control socket down so a blocked reader thread returns.
    pub fn close_control(&mut self) {
        if let Some(socket) = self.control_socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    pub fn is_control_secured(&self) -> bool {
        self.control_secured
    }

    pub fn set_control_secured(&mut self, secured: bool) {
        self.control_secured = secured;
    }

    // --------------------
    // Authentication
    // --------------------

    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }

    pub fn user(&self) -> Option<&UserAccount> {
        self.user.as_ref()
    }

    pub fn pending_user(&self) -> Option<&str> {
        self.pending_user.as_deref()
    }

    /// Records a USER that still needs its PASS; drops any prior login.
    pub fn set_pending_user(&mut self, username: Option<String>) {
        self.pending_user = username;
        self.user = None;
    }

    pub fn login(&mut self, account: UserAccount) {
        self.pending_user = None;
        self.current_virtual_path = "/".to_string();
        self.user = Some(account);
    }

    /// Server root, against which virtual paths resolve.
    pub fn server_root(&self) -> PathBuf {
        self.config.server.server_root_path()
    }

    pub fn current_virtual_path(&self) -> &str {
        &self.current_virtual_path
    }

    pub fn set_current_virtual_path(&mut self, path: String) {
        self.current_virtual_path = path;
    }

    // --------------------
    // Transfer parameters
    // --------------------

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Changing TYPE drops a charset declared for the previous type.
    pub fn set_data_type(&mut self, data_type: DataType) {
        if data_type != self.data_type {
            self.charset = None;
        }
        self.data_type = data_type;
    }

    pub fn mode(&self) -> TransmissionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TransmissionMode) {
        self.mode = mode;
    }

    pub fn structure(&self) -> StorageStructure {
        self.structure
    }

    pub fn set_structure(&mut self, structure: StorageStructure) {
        self.structure = structure;
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn set_charset(&mut self, charset: Option<String>) {
        self.charset = charset;
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn set_file_offset(&mut self, offset: u64) {
        self.file_offset = offset;
    }

    /// Returns the REST offset and resets it; it applies to one transfer.
    pub fn take_file_offset(&mut self) -> u64 {
        std::mem::take(&mut self.file_offset)
    }

    pub fn restart_markers(&self) -> &RestartMarkers {
        &self.restart_markers
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Pipeline builder for the current TYPE, MODE and STRU.
    pub fn pipeline_builder(&self) -> PipelineBuilder {
        PipelineBuilder::new(
            self.mode,
            self.structure,
            self.data_type,
            self.charset.clone(),
            self.restart_markers.clone(),
        )
        .local_charset(self.config.server.local_charset.clone())
        .block_size(self.config.server.block_size)
    }

    // --------------------
    // Data channel
    // --------------------

    pub fn data_channel(&self) -> &DataChannel {
        &self.data_channel
    }

    pub fn set_data_channel(&mut self, channel: DataChannel) {
        if self.data_channel.is_set() {
            debug!(
                "Replacing existing data channel for client {}",
                self.client_addr
            );
        }
        self.data_channel = channel;
    }

    pub fn protection(&self) -> DataProtection {
        self.protection
    }

    pub fn set_protection(&mut self, protection: DataProtection) {
        self.protection = protection;
    }

    /// Opens the data connection for a transfer.
    /// Opens the negotiated data connection. Waiting for a passive peer
    /// stops early once `cancelled` is set.
    pub fn open_data_connection(
        &self,
        cancelled: Option<&AtomicBool>,
    ) -> Result<DataConnection, TransferError> {
        let request = ConnectionRequest {
            client_addr: self.client_addr,
            timeout: self.config.server.connection_timeout(),
            protection: self.protection,
            transport: self.transport(),
            cancelled,
        };
        self.data_channel.open(&request)
    }

    /// Clears per-login state (REIN-style); the connection stays up.
    pub fn logout(&mut self) {
        self.pending_user = None;
        self.user = None;
        self.current_virtual_path = "/".to_string();
        self.data_channel = DataChannel::Unset;
        self.file_offset = 0;
        self.restart_markers.clear();
    }
}
