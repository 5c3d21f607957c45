//! Error handlers
//!
//! Maps domain errors onto FTP reply codes and decides how loudly to log them.

use crate::error::types::{CodecError, FtpServerError, TransferError};
use log::{error, info};

/// Handle an FTP server error
pub fn handle_error(err: &FtpServerError) {
    error!("FTP Server Error ({}): {}", error_to_ftp_code(err), err);
}

/// Convert error to FTP response code
pub fn error_to_ftp_code(err: &FtpServerError) -> u16 {
    match err {
        FtpServerError::Auth(_) => 530,
        FtpServerError::Storage(_) => 550,
        FtpServerError::Transfer(e) => transfer_error_code(e),
        FtpServerError::Session(_) => 500,
        FtpServerError::Codec(e) => codec_error_code(e),
        FtpServerError::ConfigError(_) => 451,
        FtpServerError::IoError(_) => 451,
    }
}

/// Reply code for a failed transfer.
pub fn transfer_error_code(err: &TransferError) -> u16 {
    match err {
        TransferError::UniqueConstraintViolation(_) => 553,
        TransferError::PermissionDenied(_) => 550,
        TransferError::QuotaExceeded { .. } | TransferError::FileTooLarge(_) => 552,
        TransferError::Storage(_) => 550,
        TransferError::Codec(e) => codec_error_code(e),
        TransferError::TransferFailed(_) => 451,
        TransferError::InvalidPortCommand(_)
        | TransferError::IpMismatch { .. }
        | TransferError::InvalidPortRange(_) => 501,
        TransferError::DataChannelNotInitialized
        | TransferError::PortBindingFailed(..)
        | TransferError::NoAvailablePort
        | TransferError::ListenerConfigurationFailed(_)
        | TransferError::ConnectionTimeout(_)
        | TransferError::DataChannelSetupFailed(_) => 425,
    }
}

fn codec_error_code(err: &CodecError) -> u16 {
    match err {
        CodecError::UnsupportedEncoding(_) | CodecError::UnsupportedTransferMode(_) => 550,
        CodecError::UnexpectedEndOfStream
        | CodecError::MalformedFrame(_)
        | CodecError::MarkerTooLarge(_)
        | CodecError::StreamAlreadyFinalized => 426,
    }
}

/// Business-rule rejections are expected outcomes and are not logged as errors.
pub fn log_transfer_error(client: &str, verb: &str, err: &TransferError) {
    match err {
        TransferError::UniqueConstraintViolation(_)
        | TransferError::PermissionDenied(_)
        | TransferError::QuotaExceeded { .. }
        | TransferError::FileTooLarge(_)
        | TransferError::Storage(_) => info!("{} {} rejected: {}", client, verb, err),
        _ => error!("{} {} failed: {}", client, verb, err),
    }
}

/// Formats the reply line for a failed transfer.
pub fn transfer_error_reply(err: &TransferError) -> String {
    let code = transfer_error_code(err);
    match err {
        TransferError::TransferFailed(_) => {
            format!("{} Requested action aborted: local error in processing\r\n", code)
        }
        TransferError::PermissionDenied(_) => format!("{} {}\r\n", code, err),
        _ if code == 425 => format!("{} Can't open data connection\r\n", code),
        _ => format!("{} {}\r\n", code, err),
    }
}
