//! Transfer module for FTP server
//!
//! Handles data channel management, the transfer pipeline codecs (block
//! framing, record escapes, charset transcoding, compression) and the
//! STOR/RETR transfer commands.

pub mod block;
pub mod charset;
pub mod data_channel;
pub mod file_ops;
pub mod modes;
pub mod pipeline;
pub mod record;
pub mod text;

// Re-export key types and functions
pub use block::{BlockReader, BlockWriter, RestartMarkers};
pub use data_channel::{DataChannel, DataConnection, SecureTransport};
pub use file_ops::{RetrDirection, StorDirection, TransferCommand, TransferDirection, TransferState};
pub use modes::{DataProtection, DataType, StorageStructure, TransmissionMode};
pub use pipeline::{InboundPipeline, OutboundPipeline, PipelineBuilder};
pub use record::{DataSink, RecordRead, RecordReader, RecordWrite, RecordWriter};
pub use text::Transcoder;
