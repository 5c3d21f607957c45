//! Record-oriented stream codec
//!
//! Stream mode carries record boundaries in-band: `0xFF` escapes a control
//! byte whose low bits flag end-of-record (`0x01`) and end-of-file (`0x02`).
//! A literal `0xFF` data byte travels doubled.

use std::io::{self, BufRead, BufReader, Read, Write};

use crate::error::CodecError;

pub const ESCAPE: u8 = 0xFF;
pub const CONTROL_EOR: u8 = 0x01;
pub const CONTROL_EOF: u8 = 0x02;

/// A source that yields whole records.
pub trait RecordRead {
    /// Returns the next record, or `None` once the stream is exhausted.
    fn read_record(&mut self) -> io::Result<Option<Vec<u8>>>;
}

impl<T: RecordRead + ?Sized> RecordRead for Box<T> {
    fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        (**self).read_record()
    }
}

/// A sink that accepts whole records.
pub trait RecordWrite {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()>;

    /// Marks end of file and flushes the underlying writer.
    fn finish(&mut self) -> io::Result<()>;

    /// Emits a restart marker if the framing supports one.
    fn restart_marker(&mut self, _marker: u64) -> io::Result<bool> {
        Ok(false)
    }
}

impl<T: RecordWrite + ?Sized> RecordWrite for Box<T> {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        (**self).write_record(record)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }

    fn restart_marker(&mut self, marker: u64) -> io::Result<bool> {
        (**self).restart_marker(marker)
    }
}

/// A byte sink that needs an explicit end-of-data step (EOF block, deflate
/// trailer, pending transcoder bytes).
pub trait DataSink: Write {
    fn finish(&mut self) -> io::Result<()>;

    /// Emits a restart marker if the framing supports one.
    fn restart_marker(&mut self, _marker: u64) -> io::Result<bool> {
        Ok(false)
    }
}

impl<T: DataSink + ?Sized> DataSink for Box<T> {
    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }

    fn restart_marker(&mut self, marker: u64) -> io::Result<bool> {
        (**self).restart_marker(marker)
    }
}

/// Plain pass-through sink for stream mode.
pub struct RawSink<W: Write> {
    inner: W,
}

impl<W: Write> RawSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RawSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> DataSink for RawSink<W> {
    fn finish(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decodes escape-delimited records from a stream-mode byte source.
pub struct RecordReader<R: Read> {
    inner: BufReader<R>,
    eof: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            eof: false,
        }
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let next = self.inner.fill_buf()?.first().copied();
        if next.is_some() {
            self.inner.consume(1);
        }
        Ok(next)
    }
}

impl<R: Read> RecordRead for RecordReader<R> {
    fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.eof {
            return Ok(None);
        }

        let mut record = Vec::new();
        loop {
            let buf = self.inner.fill_buf()?;
            if buf.is_empty() {
                // Input ended without an EOF control; keep whatever arrived.
                self.eof = true;
                return Ok((!record.is_empty()).then_some(record));
            }

            match buf.iter().position(|&b| b == ESCAPE) {
                None => {
                    let n = buf.len();
                    record.extend_from_slice(buf);
                    self.inner.consume(n);
                }
                Some(pos) => {
                    record.extend_from_slice(&buf[..pos]);
                    self.inner.consume(pos + 1);

                    let control = self
                        .next_byte()?
                        .ok_or_else(|| CodecError::UnexpectedEndOfStream.into_io())?;
                    if control == ESCAPE {
                        record.push(ESCAPE);
                        continue;
                    }

                    let eor = control & CONTROL_EOR != 0;
                    let eof = control & CONTROL_EOF != 0;
                    if !eor && !eof {
                        return Err(CodecError::MalformedFrame(control).into_io());
                    }
                    if eof {
                        self.eof = true;
                        return Ok((eor || !record.is_empty()).then_some(record));
                    }
                    return Ok(Some(record));
                }
            }
        }
    }
}

/// Encodes records into stream-mode bytes.
///
/// Dropping the writer without an EOF finalize writes one implicitly.
pub struct RecordWriter<W: Write> {
    inner: W,
    open: bool,
    finalized: bool,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            open: false,
            finalized: false,
        }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.finalized {
            return Err(CodecError::StreamAlreadyFinalized.into_io());
        }
        Ok(())
    }

    /// Appends data to the current record, doubling escape bytes.
    pub fn write_data(&mut self, mut data: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        self.open = true;
        while let Some(pos) = data.iter().position(|&b| b == ESCAPE) {
            self.inner.write_all(&data[..pos])?;
            self.inner.write_all(&[ESCAPE, ESCAPE])?;
            data = &data[pos + 1..];
        }
        self.inner.write_all(data)
    }

    /// Terminates the current record; with `eof` the stream is closed too.
    pub fn end_record(&mut self, eof: bool) -> io::Result<()> {
        self.ensure_open()?;
        let control = if eof {
            CONTROL_EOR | CONTROL_EOF
        } else {
            CONTROL_EOR
        };
        self.inner.write_all(&[ESCAPE, control])?;
        self.open = false;
        self.finalized = eof;
        Ok(())
    }

    /// Finalizes with EOF unless that already happened, then flushes.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.finalized {
            let control = if self.open {
                CONTROL_EOR | CONTROL_EOF
            } else {
                CONTROL_EOF
            };
            self.inner.write_all(&[ESCAPE, control])?;
            self.open = false;
            self.finalized = true;
        }
        self.inner.flush()
    }
}

impl<W: Write> Write for RecordWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> RecordWrite for RecordWriter<W> {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.write_data(record)?;
        self.end_record(false)
    }

    fn finish(&mut self) -> io::Result<()> {
        RecordWriter::finish(self)
    }
}

impl<W: Write> Drop for RecordWriter<W> {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = RecordWriter::finish(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> io::Result<Vec<Vec<u8>>> {
        let mut reader = RecordReader::new(bytes);
        let mut records = Vec::new();
        while let Some(record) = reader.read_record()? {
            records.push(record);
        }
        Ok(records)
    }

    fn encode_all(records: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = RecordWriter::new(&mut out);
            for record in records {
                writer.write_record(record).unwrap();
            }
            writer.finish().unwrap();
        }
        out
    }

    #[test]
    fn escapes_and_terminators_are_encoded() {
        let out = encode_all(&[b"a\xFFb".to_vec(), Vec::new()]);
        assert_eq!(out, b"a\xFF\xFFb\xFF\x01\xFF\x01\xFF\x02");
    }

    #[test]
    fn records_survive_encoding_with_escape_bytes_and_empty_records() {
        let records = vec![
            Vec::new(),
            b"a\xFFb".to_vec(),
            Vec::new(),
            b"\xFF\xFF".to_vec(),
            b"plain".to_vec(),
        ];
        let encoded = encode_all(&records);
        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(decoded, records);
        assert_eq!(encode_all(&decoded), encoded);
    }

    #[test]
    fn eor_and_eof_in_one_control_byte() {
        let decoded = decode_all(b"one\xFF\x01two\xFF\x03ignored").unwrap();
        assert_eq!(decoded, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn eof_only_flushes_pending_bytes() {
        assert_eq!(decode_all(b"tail\xFF\x02").unwrap(), vec![b"tail".to_vec()]);
        assert!(decode_all(b"\xFF\x02").unwrap().is_empty());
    }

    #[test]
    fn dangling_escape_is_unexpected_end() {
        let err = decode_all(b"abc\xFF").unwrap_err();
        assert_eq!(
            CodecError::from_io(&err),
            Some(&CodecError::UnexpectedEndOfStream)
        );
    }

    #[test]
    fn control_without_flags_is_malformed() {
        let err = decode_all(b"abc\xFF\x00").unwrap_err();
        assert_eq!(CodecError::from_io(&err), Some(&CodecError::MalformedFrame(0)));
    }

    #[test]
    fn writes_after_eof_are_rejected() {
        let mut out = Vec::new();
        let mut writer = RecordWriter::new(&mut out);
        writer.write_data(b"x").unwrap();
        writer.end_record(true).unwrap();
        let err = writer.write_data(b"y").unwrap_err();
        assert_eq!(
            CodecError::from_io(&err),
            Some(&CodecError::StreamAlreadyFinalized)
        );
        assert!(writer.end_record(false).is_err());
        drop(writer);
        assert_eq!(out, b"x\xFF\x03");
    }

    #[test]
    fn dropping_open_record_finalizes_with_eof() {
        let mut out = Vec::new();
        {
            let mut writer = RecordWriter::new(&mut out);
            writer.write_data(b"open").unwrap();
        }
        assert_eq!(out, b"open\xFF\x03");
        assert_eq!(decode_all(&out).unwrap(), vec![b"open".to_vec()]);
    }
}
