//! Block-mode framing (RFC 959 section 3.4.2)
//!
//! Every block is a 3-byte header (descriptor, big-endian u16 length)
//! followed by exactly `length` payload bytes. Descriptor bits follow
//! RFC 959 Appendix I.

use log::debug;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use crate::error::CodecError;
use crate::transfer::record::{DataSink, RecordRead, RecordWrite};

/// Block descriptor codes.
pub mod descriptor {
    pub const EOR: u8 = 0x80;
    pub const EOF: u8 = 0x40;
    pub const ERRORS: u8 = 0x20;
    pub const RESTART: u8 = 0x10;
}

pub const HEADER_LEN: usize = 3;
pub const MAX_BLOCK_SIZE: usize = u16::MAX as usize;
pub const MAX_MARKER_LEN: usize = 8;

/// Restart markers seen during one transfer: marker value to the number of
/// data bytes that had crossed the wire when the marker appeared.
#[derive(Debug, Clone, Default)]
pub struct RestartMarkers {
    inner: Arc<Mutex<BTreeMap<u64, u64>>>,
}

impl RestartMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, marker: u64, byte_offset: u64) {
        self.inner.lock().insert(marker, byte_offset);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn get(&self, marker: u64) -> Option<u64> {
        self.inner.lock().get(&marker).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<u64, u64> {
        self.inner.lock().clone()
    }
}

/// Reads until `buf` is full or the source is exhausted; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct DataBlock {
    payload: Vec<u8>,
    eor: bool,
    eof: bool,
}

/// Decodes block-mode frames into a flat byte stream or into records.
///
/// As a `Read`, the configured end-of-record marker is spliced in after
/// every EOR-flagged block. Use either `Read` or `read_record`, not both.
pub struct BlockReader<R: Read> {
    inner: R,
    eor_marker: Vec<u8>,
    markers: RestartMarkers,
    pending: Vec<u8>,
    pos: usize,
    data_bytes: u64,
    eof_seen: bool,
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R, eor_marker: impl Into<Vec<u8>>, markers: RestartMarkers) -> Self {
        Self {
            inner,
            eor_marker: eor_marker.into(),
            markers,
            pending: Vec::new(),
            pos: 0,
            data_bytes: 0,
            eof_seen: false,
        }
    }

    /// Count of data payload bytes decoded so far (markers excluded).
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    fn next_block(&mut self) -> io::Result<Option<DataBlock>> {
        loop {
            if self.eof_seen {
                return Ok(None);
            }

            let mut header = [0u8; HEADER_LEN];
            match read_full(&mut self.inner, &mut header)? {
                0 => return Ok(None),
                HEADER_LEN => {}
                _ => return Err(CodecError::UnexpectedEndOfStream.into_io()),
            }

            let flags = header[0];
            let len = u16::from_be_bytes([header[1], header[2]]) as usize;
            if flags & descriptor::ERRORS != 0 {
                return Err(CodecError::MalformedFrame(flags).into_io());
            }
            if flags & descriptor::RESTART != 0 && len > MAX_MARKER_LEN {
                return Err(CodecError::MarkerTooLarge(len).into_io());
            }

            let mut payload = vec![0u8; len];
            if read_full(&mut self.inner, &mut payload)? < len {
                return Err(CodecError::UnexpectedEndOfStream.into_io());
            }
            let eof = flags & descriptor::EOF != 0;
            self.eof_seen = eof;

            if flags & descriptor::RESTART != 0 {
                let marker = payload
                    .iter()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
                debug!("Restart marker {} at data offset {}", marker, self.data_bytes);
                self.markers.record(marker, self.data_bytes);
                continue;
            }

            self.data_bytes += len as u64;
            return Ok(Some(DataBlock {
                payload,
                eor: flags & descriptor::EOR != 0,
                eof,
            }));
        }
    }
}

impl<R: Read> Read for BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            match self.next_block()? {
                None => return Ok(0),
                Some(block) => {
                    self.pending = block.payload;
                    if block.eor {
                        self.pending.extend_from_slice(&self.eor_marker);
                    }
                    self.pos = 0;
                }
            }
        }

        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl<R: Read> RecordRead for BlockReader<R> {
    fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut record = Vec::new();
        loop {
            match self.next_block()? {
                None => return Ok((!record.is_empty()).then_some(record)),
                Some(block) => {
                    record.extend_from_slice(&block.payload);
                    if block.eor {
                        return Ok(Some(record));
                    }
                    if block.eof {
                        return Ok((!record.is_empty()).then_some(record));
                    }
                }
            }
        }
    }
}

/// Encodes bytes and records into block-mode frames.
pub struct BlockWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    block_size: usize,
    markers: RestartMarkers,
    bytes_sent: u64,
    finished: bool,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(inner: W, markers: RestartMarkers) -> Self {
        Self::with_block_size(inner, markers, MAX_BLOCK_SIZE)
    }

    pub fn with_block_size(inner: W, markers: RestartMarkers, block_size: usize) -> Self {
        let block_size = block_size.clamp(1, MAX_BLOCK_SIZE);
        Self {
            inner,
            buffer: Vec::with_capacity(block_size),
            block_size,
            markers,
            bytes_sent: 0,
            finished: false,
        }
    }

    /// Data payload bytes written so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.finished {
            return Err(CodecError::StreamAlreadyFinalized.into_io());
        }
        Ok(())
    }

    fn emit(&mut self, flags: u8, payload: &[u8]) -> io::Result<()> {
        let len = payload.len() as u16;
        let [hi, lo] = len.to_be_bytes();
        self.inner.write_all(&[flags, hi, lo])?;
        self.inner.write_all(payload)
    }

    /// Writes out everything buffered; `flags` go on the final block, which
    /// is zero-length when nothing is buffered.
    fn drain(&mut self, flags: u8) -> io::Result<()> {
        let buffer = std::mem::take(&mut self.buffer);
        let mut chunks = buffer.chunks(self.block_size).peekable();
        if flags != 0 && chunks.peek().is_none() {
            self.emit(flags, &[])?;
        }
        while let Some(chunk) = chunks.next() {
            let chunk_flags = if chunks.peek().is_none() { flags } else { 0 };
            self.emit(chunk_flags, chunk)?;
            self.bytes_sent += chunk.len() as u64;
        }
        self.buffer = buffer;
        self.buffer.clear();
        Ok(())
    }

    /// Writes one record, flagging its last block with EOR.
    pub fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(record);
        self.drain(descriptor::EOR)
    }

    /// Emits a restart marker and records it against the bytes sent so far.
    pub fn write_restart_marker(&mut self, marker: u64) -> io::Result<()> {
        self.ensure_open()?;
        self.drain(0)?;
        let bytes = marker.to_be_bytes();
        let first = bytes
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(bytes.len() - 1);
        self.emit(descriptor::RESTART, &bytes[first..])?;
        self.markers.record(marker, self.bytes_sent);
        Ok(())
    }

    /// Flushes buffered data with EOF on the final block. Idempotent.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.finished {
            self.drain(descriptor::EOF)?;
            self.finished = true;
        }
        self.inner.flush()
    }
}

impl<W: Write> Write for BlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(buf);
        while self.buffer.len() >= self.block_size {
            let rest = self.buffer.split_off(self.block_size);
            let block = std::mem::replace(&mut self.buffer, rest);
            self.emit(0, &block)?;
            self.bytes_sent += block.len() as u64;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.finished {
            self.drain(0)?;
        }
        self.inner.flush()
    }
}

impl<W: Write> DataSink for BlockWriter<W> {
    fn finish(&mut self) -> io::Result<()> {
        BlockWriter::finish(self)
    }

    fn restart_marker(&mut self, marker: u64) -> io::Result<bool> {
        self.write_restart_marker(marker)?;
        Ok(true)
    }
}

impl<W: Write> RecordWrite for BlockWriter<W> {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        BlockWriter::write_record(self, record)
    }

    fn finish(&mut self) -> io::Result<()> {
        BlockWriter::finish(self)
    }

    fn restart_marker(&mut self, marker: u64) -> io::Result<bool> {
        self.write_restart_marker(marker)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![flags];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn codec_error(err: &io::Error) -> Option<CodecError> {
        CodecError::from_io(err).cloned()
    }

    #[test]
    fn eor_block_then_marker() {
        let mut wire = block(descriptor::EOR, b"AB");
        wire.extend(block(descriptor::RESTART, &[5]));

        let markers = RestartMarkers::new();
        let mut reader = BlockReader::new(wire.as_slice(), b"\r\n".to_vec(), markers.clone());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"AB\r\n");
        assert_eq!(markers.snapshot(), BTreeMap::from([(5, 2)]));
    }

    #[test]
    fn short_payload_is_unexpected_end() {
        let mut wire = block(0, b"ABCDEF");
        wire.truncate(HEADER_LEN + 3);
        let mut reader = BlockReader::new(wire.as_slice(), Vec::new(), RestartMarkers::new());
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(codec_error(&err), Some(CodecError::UnexpectedEndOfStream));
    }

    #[test]
    fn short_header_is_unexpected_end() {
        let mut wire = block(0, b"ok");
        wire.extend_from_slice(&[descriptor::EOF, 0]);
        let mut reader = BlockReader::new(wire.as_slice(), Vec::new(), RestartMarkers::new());
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(codec_error(&err), Some(CodecError::UnexpectedEndOfStream));
    }

    #[test]
    fn oversized_marker_is_rejected() {
        let wire = block(descriptor::RESTART, &[1; 9]);
        let mut reader = BlockReader::new(wire.as_slice(), Vec::new(), RestartMarkers::new());
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(codec_error(&err), Some(CodecError::MarkerTooLarge(9)));
    }

    #[test]
    fn error_descriptor_faults_the_stream() {
        let wire = block(descriptor::ERRORS | descriptor::EOR, b"bad");
        let mut reader = BlockReader::new(wire.as_slice(), Vec::new(), RestartMarkers::new());
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(
            codec_error(&err),
            Some(CodecError::MalformedFrame(descriptor::ERRORS | descriptor::EOR))
        );
    }

    #[test]
    fn nothing_is_read_after_eof_block() {
        let mut wire = block(descriptor::EOF, b"last");
        wire.extend_from_slice(b"trailing garbage");
        let mut reader = BlockReader::new(wire.as_slice(), Vec::new(), RestartMarkers::new());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"last");
    }

    #[test]
    fn records_span_multiple_blocks() {
        let mut wire = block(0, b"hel");
        wire.extend(block(descriptor::EOR, b"lo"));
        wire.extend(block(descriptor::RESTART, &[0x01, 0x00]));
        wire.extend(block(descriptor::EOR | descriptor::EOF, b"world"));

        let markers = RestartMarkers::new();
        let mut reader = BlockReader::new(wire.as_slice(), Vec::new(), markers.clone());
        assert_eq!(reader.read_record().unwrap(), Some(b"hello".to_vec()));
        assert_eq!(reader.read_record().unwrap(), Some(b"world".to_vec()));
        assert_eq!(reader.read_record().unwrap(), None);
        assert_eq!(markers.get(256), Some(5));
    }

    #[test]
    fn writer_output_decodes_to_same_bytes_and_markers() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let sent = RestartMarkers::new();
        let mut wire = Vec::new();
        {
            let mut writer = BlockWriter::with_block_size(&mut wire, sent.clone(), 64);
            writer.write_all(&payload[..300]).unwrap();
            writer.write_restart_marker(7).unwrap();
            writer.write_all(&payload[300..]).unwrap();
            writer.write_restart_marker(0x0102_0304_0506).unwrap();
            writer.finish().unwrap();
            assert_eq!(writer.bytes_sent(), 1000);
        }

        let received = RestartMarkers::new();
        let mut reader = BlockReader::new(wire.as_slice(), Vec::new(), received.clone());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, payload);
        assert_eq!(received.snapshot(), sent.snapshot());
        assert_eq!(received.get(7), Some(300));
        assert_eq!(received.get(0x0102_0304_0506), Some(1000));
    }

    #[test]
    fn writer_records_carry_eor_and_final_eof() {
        let mut wire = Vec::new();
        {
            let mut writer = BlockWriter::new(&mut wire, RestartMarkers::new());
            writer.write_record(b"AB").unwrap();
            writer.write_record(b"").unwrap();
            writer.finish().unwrap();
            assert!(writer.write_record(b"late").is_err());
        }
        let mut expected = block(descriptor::EOR, b"AB");
        expected.extend(block(descriptor::EOR, b""));
        expected.extend(block(descriptor::EOF, b""));
        assert_eq!(wire, expected);
    }
}
