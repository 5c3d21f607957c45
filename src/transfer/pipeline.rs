//! Transfer pipeline composition
//!
//! Stacks compression, framing and transcoding layers over a data
//! connection according to the session's TYPE, MODE and STRU settings.

use flate2::Compression;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use log::debug;
use std::io::{self, Read, Write};

use crate::error::CodecError;
use crate::transfer::block::{BlockReader, BlockWriter, MAX_BLOCK_SIZE, RestartMarkers};
use crate::transfer::modes::{DataType, StorageStructure, TransmissionMode};
use crate::transfer::record::{DataSink, RawSink, RecordRead, RecordReader, RecordWrite, RecordWriter};
use crate::transfer::text::{
    NATIVE_EOL, NETWORK_EOL, TextReader, TextRecordReader, TextRecordWriter, TextWriter, Transcoder,
};

/// Source side of a transfer (STOR).
pub enum InboundPipeline<'a> {
    Bytes(Box<dyn Read + 'a>),
    Records(Box<dyn RecordRead + 'a>),
}

/// Sink side of a transfer (RETR).
pub enum OutboundPipeline<'a> {
    Bytes(Box<dyn DataSink + 'a>),
    Records(Box<dyn RecordWrite + 'a>),
}

impl OutboundPipeline<'_> {
    pub fn finish(&mut self) -> io::Result<()> {
        match self {
            OutboundPipeline::Bytes(sink) => sink.finish(),
            OutboundPipeline::Records(sink) => sink.finish(),
        }
    }

    pub fn restart_marker(&mut self, marker: u64) -> io::Result<bool> {
        match self {
            OutboundPipeline::Bytes(sink) => sink.restart_marker(marker),
            OutboundPipeline::Records(sink) => sink.restart_marker(marker),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    mode: TransmissionMode,
    structure: StorageStructure,
    data_type: DataType,
    charset: Option<String>,
    markers: RestartMarkers,
    local_charset: String,
    eor_marker: Option<Vec<u8>>,
    block_size: usize,
}

impl PipelineBuilder {
    pub fn new(
        mode: TransmissionMode,
        structure: StorageStructure,
        data_type: DataType,
        charset: Option<String>,
        markers: RestartMarkers,
    ) -> Self {
        Self {
            mode,
            structure,
            data_type,
            charset,
            markers,
            local_charset: "UTF-8".to_string(),
            eor_marker: None,
            block_size: MAX_BLOCK_SIZE,
        }
    }

    /// Encoding of files on the server side.
    pub fn local_charset(mut self, charset: impl Into<String>) -> Self {
        self.local_charset = charset.into();
        self
    }

    /// Bytes spliced in after each block-mode record in a byte pipeline.
    pub fn eor_marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.eor_marker = Some(marker.into());
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Charset spoken on the data connection, or `None` for binary types.
    pub fn network_charset(&self) -> Option<&str> {
        if !self.data_type.is_text() {
            return None;
        }
        self.charset
            .as_deref()
            .or_else(|| self.data_type.default_charset())
    }

    fn transcoder(&self, inbound: bool, eol: Option<&'static str>) -> Result<Option<Transcoder>, CodecError> {
        let Some(network) = self.network_charset() else {
            return Ok(None);
        };
        let transcoder = if inbound {
            Transcoder::new(network, &self.local_charset, eol)?
        } else {
            Transcoder::new(&self.local_charset, network, eol)?
        };
        Ok(Some(transcoder))
    }

    fn block_eor_marker(&self) -> Vec<u8> {
        match &self.eor_marker {
            Some(marker) => marker.clone(),
            None if self.data_type.is_text() => NETWORK_EOL.as_bytes().to_vec(),
            None => NATIVE_EOL.as_bytes().to_vec(),
        }
    }

    pub fn build_inbound<'a>(&self, source: impl Read + 'a) -> Result<InboundPipeline<'a>, CodecError> {
        debug!(
            "Building inbound pipeline: TYPE {} MODE {} STRU {}",
            self.data_type.code(),
            self.mode.code(),
            self.structure.code()
        );

        let source: Box<dyn Read + 'a> = match self.mode {
            TransmissionMode::Compressed => Box::new(DeflateDecoder::new(source)),
            TransmissionMode::Zip => Box::new(ZlibDecoder::new(source)),
            TransmissionMode::Stream | TransmissionMode::Block => Box::new(source),
        };

        match self.structure {
            StorageStructure::File => {
                let transcoder = self.transcoder(true, Some(NATIVE_EOL))?;
                let framed: Box<dyn Read + 'a> = if self.mode == TransmissionMode::Block {
                    Box::new(BlockReader::new(source, self.block_eor_marker(), self.markers.clone()))
                } else {
                    source
                };
                Ok(match transcoder {
                    Some(transcoder) => InboundPipeline::Bytes(Box::new(TextReader::new(framed, transcoder))),
                    None => InboundPipeline::Bytes(framed),
                })
            }
            StorageStructure::Record => {
                let transcoder = self.transcoder(true, None)?;
                let framed: Box<dyn RecordRead + 'a> = if self.mode == TransmissionMode::Block {
                    Box::new(BlockReader::new(source, Vec::new(), self.markers.clone()))
                } else {
                    Box::new(RecordReader::new(source))
                };
                Ok(match transcoder {
                    Some(transcoder) => {
                        InboundPipeline::Records(Box::new(TextRecordReader::new(framed, transcoder)))
                    }
                    None => InboundPipeline::Records(framed),
                })
            }
        }
    }

    pub fn build_outbound<'a>(&self, sink: impl Write + 'a) -> Result<OutboundPipeline<'a>, CodecError> {
        debug!(
            "Building outbound pipeline: TYPE {} MODE {} STRU {}",
            self.data_type.code(),
            self.mode.code(),
            self.structure.code()
        );

        match self.structure {
            StorageStructure::File => {
                let transcoder = self.transcoder(false, Some(NETWORK_EOL))?;
                let framed: Box<dyn DataSink + 'a> = match self.mode {
                    TransmissionMode::Stream => Box::new(RawSink::new(sink)),
                    TransmissionMode::Block => Box::new(BlockWriter::with_block_size(
                        sink,
                        self.markers.clone(),
                        self.block_size,
                    )),
                    TransmissionMode::Compressed | TransmissionMode::Zip => Box::new(self.deflater(sink)),
                };
                Ok(match transcoder {
                    Some(transcoder) => OutboundPipeline::Bytes(Box::new(TextWriter::new(framed, transcoder))),
                    None => OutboundPipeline::Bytes(framed),
                })
            }
            StorageStructure::Record => {
                let transcoder = self.transcoder(false, None)?;
                let framed: Box<dyn RecordWrite + 'a> = match self.mode {
                    TransmissionMode::Stream => Box::new(RecordWriter::new(sink)),
                    TransmissionMode::Block => Box::new(BlockWriter::with_block_size(
                        sink,
                        self.markers.clone(),
                        self.block_size,
                    )),
                    TransmissionMode::Compressed | TransmissionMode::Zip => {
                        Box::new(DeflatedRecords(RecordWriter::new(self.deflater(sink))))
                    }
                };
                Ok(match transcoder {
                    Some(transcoder) => {
                        OutboundPipeline::Records(Box::new(TextRecordWriter::new(framed, transcoder)))
                    }
                    None => OutboundPipeline::Records(framed),
                })
            }
        }
    }

    fn deflater<W: Write>(&self, sink: W) -> Deflater<W> {
        if self.mode == TransmissionMode::Zip {
            Deflater::Zlib(ZlibEncoder::new(sink, Compression::default()))
        } else {
            Deflater::Raw(DeflateEncoder::new(sink, Compression::default()))
        }
    }
}

/// Compressing sink for MODE C (raw deflate) and MODE Z (zlib).
enum Deflater<W: Write> {
    Raw(DeflateEncoder<W>),
    Zlib(ZlibEncoder<W>),
}

impl<W: Write> Write for Deflater<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Deflater::Raw(encoder) => encoder.write(buf),
            Deflater::Zlib(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Deflater::Raw(encoder) => encoder.flush(),
            Deflater::Zlib(encoder) => encoder.flush(),
        }
    }
}

impl<W: Write> DataSink for Deflater<W> {
    fn finish(&mut self) -> io::Result<()> {
        match self {
            Deflater::Raw(encoder) => {
                encoder.try_finish()?;
                encoder.get_mut().flush()
            }
            Deflater::Zlib(encoder) => {
                encoder.try_finish()?;
                encoder.get_mut().flush()
            }
        }
    }
}

/// Stream-mode records over a compressor; finishing also closes the
/// compressed stream.
struct DeflatedRecords<W: Write>(RecordWriter<Deflater<W>>);

impl<W: Write> RecordWrite for DeflatedRecords<W> {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.0.write_record(record)
    }

    fn finish(&mut self) -> io::Result<()> {
        RecordWriter::finish(&mut self.0)?;
        self.0.get_mut().finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::block::descriptor;

    fn builder(mode: TransmissionMode, structure: StorageStructure, data_type: DataType) -> PipelineBuilder {
        PipelineBuilder::new(mode, structure, data_type, None, RestartMarkers::new())
    }

    fn read_bytes(pipeline: InboundPipeline<'_>) -> Vec<u8> {
        match pipeline {
            InboundPipeline::Bytes(mut reader) => {
                let mut out = Vec::new();
                reader.read_to_end(&mut out).unwrap();
                out
            }
            InboundPipeline::Records(_) => panic!("expected a byte pipeline"),
        }
    }

    fn read_records(pipeline: InboundPipeline<'_>) -> Vec<Vec<u8>> {
        match pipeline {
            InboundPipeline::Records(mut reader) => {
                let mut out = Vec::new();
                while let Some(record) = reader.read_record().unwrap() {
                    out.push(record);
                }
                out
            }
            InboundPipeline::Bytes(_) => panic!("expected a record pipeline"),
        }
    }

    #[test]
    fn ascii_stream_file_uses_local_line_endings() {
        let pipeline = builder(TransmissionMode::Stream, StorageStructure::File, DataType::Ascii)
            .build_inbound(&b"AB\r\nCD"[..])
            .unwrap();
        assert_eq!(read_bytes(pipeline), format!("AB{}CD", NATIVE_EOL).into_bytes());
    }

    #[test]
    fn binary_stream_file_passes_bytes_through() {
        let data = b"\x00\xFF\r\n\x85";
        let pipeline = builder(TransmissionMode::Stream, StorageStructure::File, DataType::Binary)
            .build_inbound(&data[..])
            .unwrap();
        assert_eq!(read_bytes(pipeline), data);
    }

    #[test]
    fn block_file_records_markers_and_splices_line_endings() {
        let markers = RestartMarkers::new();
        let wire = [
            &[descriptor::EOR, 0, 2][..],
            b"AB",
            &[descriptor::RESTART, 0, 1, 5],
            &[descriptor::EOF, 0, 2],
            b"CD",
        ]
        .concat();
        let pipeline = PipelineBuilder::new(
            TransmissionMode::Block,
            StorageStructure::File,
            DataType::Binary,
            None,
            markers.clone(),
        )
        .eor_marker(b"\r\n".to_vec())
        .build_inbound(&wire[..])
        .unwrap();
        assert_eq!(read_bytes(pipeline), b"AB\r\nCD");
        assert_eq!(markers.get(5), Some(2));
    }

    #[test]
    fn ebcdic_block_records_are_transcoded() {
        let markers = RestartMarkers::new();
        let mut wire = Vec::new();
        {
            let mut writer = BlockWriter::new(&mut wire, markers.clone());
            writer.write_record(&[0xC8, 0x89]).unwrap();
            writer.write_record(&[0xF4, 0xF2]).unwrap();
            writer.finish().unwrap();
        }
        let pipeline = builder(TransmissionMode::Block, StorageStructure::Record, DataType::Ebcdic)
            .build_inbound(&wire[..])
            .unwrap();
        assert_eq!(read_records(pipeline), vec![b"Hi".to_vec(), b"42".to_vec()]);
    }

    #[test]
    fn compressed_modes_round_trip() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 7) as u8).collect();
        for mode in [TransmissionMode::Compressed, TransmissionMode::Zip] {
            let b = builder(mode, StorageStructure::File, DataType::Binary);
            let mut wire = Vec::new();
            {
                let mut out = b.build_outbound(&mut wire).unwrap();
                if let OutboundPipeline::Bytes(sink) = &mut out {
                    sink.write_all(&data).unwrap();
                }
                out.finish().unwrap();
            }
            assert!(wire.len() < data.len());
            assert_eq!(read_bytes(b.build_inbound(&wire[..]).unwrap()), data);
        }
    }

    #[test]
    fn zipped_records_round_trip() {
        let b = builder(TransmissionMode::Zip, StorageStructure::Record, DataType::Binary);
        let mut wire = Vec::new();
        {
            let mut out = b.build_outbound(&mut wire).unwrap();
            match &mut out {
                OutboundPipeline::Records(sink) => {
                    sink.write_record(b"first\xFF").unwrap();
                    sink.write_record(b"").unwrap();
                    sink.write_record(b"third").unwrap();
                }
                OutboundPipeline::Bytes(_) => panic!("expected a record pipeline"),
            }
            out.finish().unwrap();
        }
        let records = read_records(b.build_inbound(&wire[..]).unwrap());
        assert_eq!(records, vec![b"first\xFF".to_vec(), Vec::new(), b"third".to_vec()]);
    }

    #[test]
    fn outbound_ascii_uses_crlf() {
        let b = builder(TransmissionMode::Stream, StorageStructure::File, DataType::Ascii);
        let mut wire = Vec::new();
        {
            let mut out = b.build_outbound(&mut wire).unwrap();
            if let OutboundPipeline::Bytes(sink) = &mut out {
                sink.write_all(b"a\nb\n").unwrap();
            }
            out.finish().unwrap();
        }
        assert_eq!(wire, b"a\r\nb\r\n");
    }

    #[test]
    fn block_outbound_accepts_restart_markers() {
        let markers = RestartMarkers::new();
        let b = PipelineBuilder::new(
            TransmissionMode::Block,
            StorageStructure::File,
            DataType::Binary,
            None,
            markers.clone(),
        );
        let mut wire = Vec::new();
        {
            let mut out = b.build_outbound(&mut wire).unwrap();
            if let OutboundPipeline::Bytes(sink) = &mut out {
                sink.write_all(b"abc").unwrap();
            }
            assert!(out.restart_marker(3).unwrap());
            out.finish().unwrap();
        }
        assert_eq!(markers.get(3), Some(3));
        assert_eq!(
            wire,
            [&[0u8, 0, 3][..], b"abc", &[descriptor::RESTART, 0, 1, 3], &[descriptor::EOF, 0, 0]].concat()
        );
    }

    #[test]
    fn stream_mode_has_no_restart_markers() {
        let b = builder(TransmissionMode::Stream, StorageStructure::File, DataType::Binary);
        let mut wire = Vec::new();
        let mut out = b.build_outbound(&mut wire).unwrap();
        assert!(!out.restart_marker(1).unwrap());
    }

    #[test]
    fn unknown_declared_charset_fails_the_build() {
        let b = PipelineBuilder::new(
            TransmissionMode::Stream,
            StorageStructure::File,
            DataType::Ascii,
            Some("X-MARTIAN".into()),
            RestartMarkers::new(),
        );
        assert!(matches!(
            b.build_inbound(&b""[..]),
            Err(CodecError::UnsupportedEncoding(name)) if name == "X-MARTIAN"
        ));
    }
}
