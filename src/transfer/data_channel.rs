//! Module `data_channel`
//!
//! Manages the data connection used by transfer commands. PASV keeps a
//! listener owned by the session until the next PASV or PORT; PORT records
//! the client's address and the server connects out for every transfer.

use log::{debug, error, info, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TransferError;
use crate::transfer::modes::DataProtection;

/// Byte stream carried by a data or control connection, possibly encrypted.
pub trait DataStream: Read + Write + Send {}

impl<T: Read + Write + Send> DataStream for T {}

/// Reader and writer halves of a control connection.
pub type ControlHalves = (Box<dyn Read + Send>, Box<dyn Write + Send>);

/// Provider of encrypted sockets for AUTH and PROT.
pub trait SecureTransport: Send + Sync {
    /// Upgrades the control connection after `AUTH TLS`.
    fn secure_control(&self, stream: TcpStream) -> io::Result<ControlHalves>;

    /// Wraps a freshly connected data socket when `PROT P` is in effect.
    fn secure_data(&self, stream: TcpStream) -> io::Result<Box<dyn DataStream>>;
}

/// Data connection setup negotiated by PASV or PORT.
#[derive(Debug, Default)]
pub enum DataChannel {
    #[default]
    Unset,
    Passive(TcpListener),
    Active(SocketAddr),
}

/// Everything needed to open a data connection for one transfer.
pub struct ConnectionRequest<'a> {
    pub client_addr: SocketAddr,
    pub timeout: Duration,
    pub protection: DataProtection,
    pub transport: Option<&'a dyn SecureTransport>,
    /// Set from another thread to give up waiting for the peer.
    pub cancelled: Option<&'a AtomicBool>,
}

/// An open data connection. The socket is shut down when this is dropped.
pub struct DataConnection {
    raw: TcpStream,
    stream: Box<dyn DataStream>,
    peer: SocketAddr,
}

impl DataConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut dyn DataStream {
        self.stream.as_mut()
    }

    /// A second handle on the raw socket, used to interrupt a blocked
    /// transfer from another thread.
    pub fn abort_handle(&self) -> io::Result<TcpStream> {
        self.raw.try_clone()
    }
}

impl Drop for DataConnection {
    fn drop(&mut self) {
        let _ = self.stream.flush();
        if let Err(e) = self.raw.shutdown(Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                debug!("Data connection to {} shutdown failed: {}", self.peer, e);
            }
        }
    }
}

impl DataChannel {
    pub fn is_set(&self) -> bool {
        !matches!(self, DataChannel::Unset)
    }

    /// Opens the data connection: accepts on the PASV listener or connects
    /// to the PORT address.
    pub fn open(&self, request: &ConnectionRequest<'_>) -> Result<DataConnection, TransferError> {
        let (raw, peer) = match self {
            DataChannel::Unset => return Err(TransferError::DataChannelNotInitialized),
            DataChannel::Passive(listener) => {
                info!(
                    "Passive mode detected for client {} - waiting for client to connect",
                    request.client_addr
                );
                accept_from_owner(
                    listener,
                    request.client_addr.ip(),
                    request.timeout,
                    request.cancelled,
                )?
            }
            DataChannel::Active(data_socket) => {
                info!(
                    "Active mode: Server connecting to client {} at data socket {}",
                    request.client_addr, data_socket
                );
                let stream = TcpStream::connect_timeout(data_socket, request.timeout).map_err(|e| {
                    error!(
                        "Failed to connect to client {} at data socket {} in active mode: {}",
                        request.client_addr, data_socket, e
                    );
                    TransferError::ConnectionTimeout(*data_socket)
                })?;
                (stream, *data_socket)
            }
        };

        if let Err(e) = raw.set_nonblocking(false) {
            warn!("Failed to set data stream to blocking mode: {}", e);
        }

        let plain = raw
            .try_clone()
            .map_err(|e| TransferError::DataChannelSetupFailed(e.to_string()))?;
        let stream: Box<dyn DataStream> = match (request.protection, request.transport) {
            (DataProtection::Clear, _) => Box::new(plain),
            (DataProtection::Private, Some(transport)) => transport
                .secure_data(plain)
                .map_err(|e| TransferError::DataChannelSetupFailed(e.to_string()))?,
            (DataProtection::Private, None) => {
                return Err(TransferError::DataChannelSetupFailed(
                    "PROT P requested without a secure transport".into(),
                ));
            }
        };

        Ok(DataConnection { raw, stream, peer })
    }
}

/// Polls the listener with exponential backoff until the owning client
/// connects or `timeout` passes. Connections from other hosts are dropped.
fn accept_from_owner(
    listener: &TcpListener,
    owner: IpAddr,
    timeout: Duration,
    cancelled: Option<&AtomicBool>,
) -> Result<(TcpStream, SocketAddr), TransferError> {
    const INITIAL_SLEEP_MS: u64 = 10;
    const MAX_SLEEP_MS: u64 = 200;

    let local = listener
        .local_addr()
        .map_err(TransferError::ListenerConfigurationFailed)?;
    listener
        .set_nonblocking(true)
        .map_err(TransferError::ListenerConfigurationFailed)?;

    let deadline = Instant::now() + timeout;
    let mut delay = INITIAL_SLEEP_MS;

    loop {
        match listener.accept() {
            Ok((stream, peer)) if peer.ip() == owner => {
                info!("Data connection accepted from {} on {}", peer, local);
                return Ok((stream, peer));
            }
            Ok((stream, peer)) => {
                warn!("Rejected data connection from {} (expected {})", peer, owner);
                let _ = stream.shutdown(Shutdown::Both);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                if cancelled.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                    info!("Stopped waiting for data connection on {}", local);
                    return Err(TransferError::DataChannelSetupFailed(
                        "data connection cancelled".into(),
                    ));
                }
                if Instant::now() >= deadline {
                    error!("Timeout waiting for data connection on {}", local);
                    return Err(TransferError::ConnectionTimeout(local));
                }
                thread::sleep(Duration::from_millis(delay));
                delay = (delay * 2).min(MAX_SLEEP_MS);
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Fatal error accepting data connection: {}", e);
                return Err(TransferError::DataChannelSetupFailed(e.to_string()));
            }
        }
    }
}

/// Binds a PASV listener on `ip`, inside `port_range` or on an ephemeral
/// port when no range is configured.
pub fn setup_passive_mode(
    ip: IpAddr,
    port_range: Option<std::ops::RangeInclusive<u16>>,
) -> Result<TcpListener, TransferError> {
    let listener = match port_range {
        None => {
            let addr = SocketAddr::new(ip, 0);
            TcpListener::bind(addr).map_err(|e| TransferError::PortBindingFailed(addr, e))?
        }
        Some(range) => range
            .map(|port| SocketAddr::new(ip, port))
            .find_map(|addr| TcpListener::bind(addr).ok())
            .ok_or(TransferError::NoAvailablePort)?,
    };

    listener
        .set_nonblocking(true)
        .map_err(TransferError::ListenerConfigurationFailed)?;

    if let Ok(addr) = listener.local_addr() {
        info!("Bound data socket {} in PASV mode", addr);
    }
    Ok(listener)
}

/// Parses a PORT argument (`h1,h2,h3,h4,p1,p2`) and checks it against the
/// client's address and the minimum allowed port.
pub fn setup_active_mode(
    client_addr: SocketAddr,
    port_argument: &str,
    min_client_port: u16,
) -> Result<SocketAddr, TransferError> {
    let fields = port_argument
        .trim()
        .split(',')
        .map(|f| f.trim().parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| TransferError::InvalidPortCommand("Invalid address format".into()))?;

    let [h1, h2, h3, h4, p1, p2] = fields[..] else {
        return Err(TransferError::InvalidPortCommand(
            "Expected six comma-separated numbers".into(),
        ));
    };

    let ip = IpAddr::from([h1, h2, h3, h4]);
    let port = u16::from_be_bytes([p1, p2]);

    // Validate IP matches client (for security)
    if ip != client_addr.ip() {
        return Err(TransferError::IpMismatch {
            expected: client_addr.ip().to_string(),
            provided: ip.to_string(),
        });
    }

    if port < min_client_port {
        return Err(TransferError::InvalidPortRange(port));
    }

    info!("Client {} registered data socket {}:{} in PORT mode", client_addr, ip, port);
    Ok(SocketAddr::new(ip, port))
}

/// Formats the `227` reply body for a PASV listener address.
pub fn passive_reply_address(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(_) => [127, 0, 0, 1],
    };
    let [p1, p2] = addr.port().to_be_bytes();
    format!("{},{},{},{},{},{}", ip[0], ip[1], ip[2], ip[3], p1, p2)
}
