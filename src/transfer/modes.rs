//! FTP transfer parameters
//!
//! Representation types (TYPE), transmission modes (MODE) and file
//! structures (STRU) negotiated on the control connection.

use crate::error::CodecError;
use log::warn;

/// Representation type set by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    Ascii,
    Ebcdic,
    Binary,
}

impl DataType {
    /// Parses the `TYPE` argument. `L 8` is treated as image.
    pub fn from_argument(arg: &str) -> Option<Self> {
        let mut parts = arg.split_whitespace();
        let code = parts.next()?.to_ascii_uppercase();
        let param = parts.next().map(|p| p.to_ascii_uppercase());
        match (code.as_str(), param.as_deref()) {
            ("A", None | Some("N")) => Some(DataType::Ascii),
            ("E", None | Some("N")) => Some(DataType::Ebcdic),
            ("I", None) | ("L", Some("8")) => Some(DataType::Binary),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        !matches!(self, DataType::Binary)
    }

    /// Network encoding used when the client has not declared one.
    pub fn default_charset(&self) -> Option<&'static str> {
        match self {
            DataType::Ascii => Some("US-ASCII"),
            DataType::Ebcdic => Some("IBM037"),
            DataType::Binary => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DataType::Ascii => "A",
            DataType::Ebcdic => "E",
            DataType::Binary => "I",
        }
    }
}

/// Transmission mode set by `MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionMode {
    #[default]
    Stream,
    Block,
    Compressed,
    Zip,
}

impl TransmissionMode {
    /// Parses a `MODE` code; anything unrecognized is rejected and logged.
    pub fn from_code(code: &str) -> Result<Self, CodecError> {
        match code.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(TransmissionMode::Stream),
            "B" => Ok(TransmissionMode::Block),
            "C" => Ok(TransmissionMode::Compressed),
            "Z" => Ok(TransmissionMode::Zip),
            other => {
                warn!("Rejected unsupported transmission mode '{}'", other);
                Err(CodecError::UnsupportedTransferMode(other.to_string()))
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TransmissionMode::Stream => "S",
            TransmissionMode::Block => "B",
            TransmissionMode::Compressed => "C",
            TransmissionMode::Zip => "Z",
        }
    }
}

/// File structure set by `STRU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageStructure {
    #[default]
    File,
    Record,
}

impl StorageStructure {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "F" => Some(StorageStructure::File),
            "R" => Some(StorageStructure::Record),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StorageStructure::File => "F",
            StorageStructure::Record => "R",
        }
    }
}

/// Data channel protection level set by `PROT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataProtection {
    #[default]
    Clear,
    Private,
}
