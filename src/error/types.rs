//! Error types
//!
//! Defines domain-specific error types for each module of the FTP server.

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Authentication module errors
#[derive(Debug)]
pub enum AuthError {
    InvalidUsername(String),
    InvalidPassword(String),
    UserNotFound(String),
    MalformedInput(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidUsername(u) => write!(f, "Invalid username: {}", u),
            AuthError::InvalidPassword(u) => write!(f, "Invalid password for user: {}", u),
            AuthError::UserNotFound(u) => write!(f, "User not found: {}", u),
            AuthError::MalformedInput(s) => write!(f, "Malformed input: {}", s),
        }
    }
}

impl std::error::Error for AuthError {}

/// Storage module errors
#[derive(Debug)]
pub enum StorageError {
    FileNotFound(String),
    DirectoryNotFound(String),
    InvalidPath(String),
    NotAFile(String),
    PathTraversal(String),
    IoError(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::FileNotFound(p) => write!(f, "File not found: {}", p),
            StorageError::DirectoryNotFound(p) => write!(f, "Directory not found: {}", p),
            StorageError::InvalidPath(p) => write!(f, "Invalid path: {}", p),
            StorageError::NotAFile(p) => write!(f, "Not a plain file: {}", p),
            StorageError::PathTraversal(p) => write!(f, "Path traversal attempt: {}", p),
            StorageError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(error: io::Error) -> Self {
        StorageError::IoError(error)
    }
}

/// Framing and negotiation errors raised by the data pipeline codecs.
///
/// Codecs sit behind `std::io::Read`/`Write`, so these travel wrapped in an
/// `io::Error` and are recovered with [`CodecError::from_io`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    UnexpectedEndOfStream,
    MalformedFrame(u8),
    MarkerTooLarge(usize),
    StreamAlreadyFinalized,
    UnsupportedEncoding(String),
    UnsupportedTransferMode(String),
}

impl CodecError {
    /// Wraps the codec error in an `io::Error` with a matching kind.
    pub fn into_io(self) -> io::Error {
        let kind = match self {
            CodecError::UnexpectedEndOfStream => io::ErrorKind::UnexpectedEof,
            CodecError::StreamAlreadyFinalized => io::ErrorKind::BrokenPipe,
            CodecError::UnsupportedEncoding(_) | CodecError::UnsupportedTransferMode(_) => {
                io::ErrorKind::Unsupported
            }
            CodecError::MalformedFrame(_) | CodecError::MarkerTooLarge(_) => {
                io::ErrorKind::InvalidData
            }
        };
        io::Error::new(kind, self)
    }

    /// Recovers a codec error previously wrapped by [`CodecError::into_io`].
    pub fn from_io(error: &io::Error) -> Option<&CodecError> {
        error.get_ref().and_then(|inner| inner.downcast_ref::<CodecError>())
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnexpectedEndOfStream => write!(f, "Unexpected end of data stream"),
            CodecError::MalformedFrame(d) => {
                write!(f, "Malformed block (descriptor 0x{:02X})", d)
            }
            CodecError::MarkerTooLarge(len) => {
                write!(f, "Restart marker too large ({} bytes, max 8)", len)
            }
            CodecError::StreamAlreadyFinalized => write!(f, "Record stream already finalized"),
            CodecError::UnsupportedEncoding(name) => write!(f, "Unsupported encoding: {}", name),
            CodecError::UnsupportedTransferMode(mode) => {
                write!(f, "Unsupported transfer mode: {}", mode)
            }
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for io::Error {
    fn from(error: CodecError) -> Self {
        error.into_io()
    }
}

/// Transfer module errors
#[derive(Debug)]
pub enum TransferError {
    DataChannelNotInitialized,
    PortBindingFailed(SocketAddr, io::Error),
    NoAvailablePort,
    ListenerConfigurationFailed(io::Error),
    ConnectionTimeout(SocketAddr),
    DataChannelSetupFailed(String),
    InvalidPortCommand(String),
    IpMismatch { expected: String, provided: String },
    InvalidPortRange(u16),
    UniqueConstraintViolation(String),
    PermissionDenied(String),
    QuotaExceeded { limit: u64, attempted: u64 },
    FileTooLarge(u64),
    Codec(CodecError),
    Storage(StorageError),
    TransferFailed(io::Error),
}

impl TransferError {
    /// Classifies an I/O failure from inside the pipeline, lifting codec
    /// errors back out of their `io::Error` wrapper.
    pub fn from_pipeline(error: io::Error) -> Self {
        match CodecError::from_io(&error) {
            Some(codec) => TransferError::Codec(codec.clone()),
            None => TransferError::TransferFailed(error),
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::DataChannelNotInitialized => write!(f, "Data channel not initialized"),
            TransferError::PortBindingFailed(addr, e) => {
                write!(f, "Failed to bind to {}: {}", addr, e)
            }
            TransferError::NoAvailablePort => write!(f, "No available port for data connection"),
            TransferError::ListenerConfigurationFailed(e) => {
                write!(f, "Failed to configure listener: {}", e)
            }
            TransferError::ConnectionTimeout(addr) => {
                write!(f, "Timeout waiting for connection from {}", addr)
            }
            TransferError::DataChannelSetupFailed(msg) => {
                write!(f, "Data channel setup failed: {}", msg)
            }
            TransferError::InvalidPortCommand(msg) => write!(f, "Invalid PORT command: {}", msg),
            TransferError::IpMismatch { expected, provided } => {
                write!(f, "IP mismatch: expected {}, got {}", expected, provided)
            }
            TransferError::InvalidPortRange(port) => {
                write!(f, "Invalid port {}: below the allowed client port range", port)
            }
            TransferError::UniqueConstraintViolation(p) => write!(f, "{}: File already exists", p),
            TransferError::PermissionDenied(p) => write!(f, "{}: Permission denied", p),
            TransferError::QuotaExceeded { limit, attempted } => write!(
                f,
                "Quota exceeded: {} bytes allowed, {} bytes attempted",
                limit, attempted
            ),
            TransferError::FileTooLarge(max) => {
                write!(f, "File exceeds the maximum size of {} bytes", max)
            }
            TransferError::Codec(e) => write!(f, "{}", e),
            TransferError::Storage(e) => write!(f, "{}", e),
            TransferError::TransferFailed(e) => write!(f, "Transfer failed: {}", e),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<CodecError> for TransferError {
    fn from(error: CodecError) -> Self {
        TransferError::Codec(error)
    }
}

impl From<StorageError> for TransferError {
    fn from(error: StorageError) -> Self {
        TransferError::Storage(error)
    }
}

/// Control-connection session errors
#[derive(Debug)]
pub enum SessionError {
    CommandTimeout,
    IllegalCommand(String),
    ReaderTerminated,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::CommandTimeout => write!(f, "Timed out waiting for a command"),
            SessionError::IllegalCommand(line) => write!(f, "Illegal command: {}", line),
            SessionError::ReaderTerminated => write!(f, "Command reader terminated"),
        }
    }
}

impl std::error::Error for SessionError {}

/// General FTP server error that encompasses all error types
#[derive(Debug)]
pub enum FtpServerError {
    Auth(AuthError),
    Storage(StorageError),
    Transfer(TransferError),
    Session(SessionError),
    Codec(CodecError),
    ConfigError(String),
    IoError(io::Error),
}

impl fmt::Display for FtpServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpServerError::Auth(e) => write!(f, "Authentication error: {}", e),
            FtpServerError::Storage(e) => write!(f, "Storage error: {}", e),
            FtpServerError::Transfer(e) => write!(f, "Transfer error: {}", e),
            FtpServerError::Session(e) => write!(f, "Session error: {}", e),
            FtpServerError::Codec(e) => write!(f, "Codec error: {}", e),
            FtpServerError::ConfigError(e) => write!(f, "Configuration error: {}", e),
            FtpServerError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for FtpServerError {}

// Implement conversions from specific errors to FtpServerError
impl From<AuthError> for FtpServerError {
    fn from(error: AuthError) -> Self {
        FtpServerError::Auth(error)
    }
}

impl From<StorageError> for FtpServerError {
    fn from(error: StorageError) -> Self {
        FtpServerError::Storage(error)
    }
}

impl From<TransferError> for FtpServerError {
    fn from(error: TransferError) -> Self {
        FtpServerError::Transfer(error)
    }
}

impl From<SessionError> for FtpServerError {
    fn from(error: SessionError) -> Self {
        FtpServerError::Session(error)
    }
}

impl From<CodecError> for FtpServerError {
    fn from(error: CodecError) -> Self {
        FtpServerError::Codec(error)
    }
}

impl From<config::ConfigError> for FtpServerError {
    fn from(error: config::ConfigError) -> Self {
        FtpServerError::ConfigError(error.to_string())
    }
}

impl From<io::Error> for FtpServerError {
    fn from(error: io::Error) -> Self {
        FtpServerError::IoError(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_error_survives_io_wrapping() {
        let io_err = CodecError::MarkerTooLarge(9).into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(
            CodecError::from_io(&io_err),
            Some(&CodecError::MarkerTooLarge(9))
        );

        let plain = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(CodecError::from_io(&plain).is_none());
    }

    #[test]
    fn pipeline_errors_are_classified() {
        let err = TransferError::from_pipeline(CodecError::UnexpectedEndOfStream.into_io());
        assert!(matches!(
            err,
            TransferError::Codec(CodecError::UnexpectedEndOfStream)
        ));

        let err = TransferError::from_pipeline(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(err, TransferError::TransferFailed(_)));
    }
}
