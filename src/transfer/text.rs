//! Text transcoding for ASCII and EBCDIC transfers
//!
//! Converts between the network charset and the local charset. For file
//! structure, line endings are normalized as well: every network line break
//! (CRLF, bare LF, NEL) becomes the local line ending on the way in, and a
//! local line break becomes CRLF on the way out. Records are converted one at
//! a time with their bytes otherwise untouched.

use std::io::{self, Read, Write};

use crate::error::CodecError;
use crate::transfer::charset::Charset;
use crate::transfer::record::{DataSink, RecordRead, RecordWrite};

/// Line ending written to local files.
pub const NATIVE_EOL: &str = if cfg!(windows) { "\r\n" } else { "\n" };
/// Line ending used on the wire for text types.
pub const NETWORK_EOL: &str = "\r\n";

const NEXT_LINE: char = '\u{85}';
const CHUNK_SIZE: usize = 8192;

/// Stateful charset and line-ending converter.
///
/// Holds back an incomplete multi-byte sequence and a trailing CR between
/// calls so neither is split by chunk boundaries.
#[derive(Debug)]
pub struct Transcoder {
    from: Charset,
    to: Charset,
    eol: Option<&'static str>,
    carry: Vec<u8>,
    pending_cr: bool,
}

impl Transcoder {
    /// Builds a converter; unknown charset names fail here, before any data.
    pub fn new(from: &str, to: &str, eol: Option<&'static str>) -> Result<Self, CodecError> {
        Ok(Self {
            from: Charset::for_name(from)?,
            to: Charset::for_name(to)?,
            eol,
            carry: Vec::new(),
            pending_cr: false,
        })
    }

    /// Converts `input`, appending the result to `out`. Set `last` on the
    /// final call so held-back state is flushed.
    pub fn convert(&mut self, input: &[u8], last: bool, out: &mut Vec<u8>) {
        self.carry.extend_from_slice(input);
        let mut text = String::new();
        let consumed = self.from.decode(&self.carry, last, &mut text);
        self.carry.drain(..consumed);

        match self.eol {
            Some(eol) => {
                let normalized = self.normalize_lines(&text, last, eol);
                self.to.encode(&normalized, out);
            }
            None => self.to.encode(&text, out),
        }
    }

    /// Converts one self-contained record without touching line endings.
    pub fn convert_record(&self, record: &[u8]) -> Vec<u8> {
        let mut text = String::new();
        self.from.decode(record, true, &mut text);
        let mut out = Vec::with_capacity(record.len());
        self.to.encode(&text, &mut out);
        out
    }

    fn normalize_lines(&mut self, text: &str, last: bool, eol: &str) -> String {
        let mut out = String::with_capacity(text.len() + 8);
        let mut chars = text.chars().peekable();

        if self.pending_cr {
            self.pending_cr = false;
            match chars.peek() {
                Some('\n') => {
                    chars.next();
                    out.push_str(eol);
                }
                Some(_) => out.push('\r'),
                None if last => out.push('\r'),
                None => {
                    self.pending_cr = true;
                    return out;
                }
            }
        }

        while let Some(c) = chars.next() {
            match c {
                '\r' => match chars.peek() {
                    Some('\n') => {
                        chars.next();
                        out.push_str(eol);
                    }
                    Some(_) => out.push('\r'),
                    None if last => out.push('\r'),
                    None => self.pending_cr = true,
                },
                '\n' | NEXT_LINE => out.push_str(eol),
                other => out.push(other),
            }
        }
        out
    }
}

/// Reading adapter: transcodes a byte stream as it is read.
pub struct TextReader<R: Read> {
    inner: R,
    transcoder: Transcoder,
    output: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> TextReader<R> {
    pub fn new(inner: R, transcoder: Transcoder) -> Self {
        Self {
            inner,
            transcoder,
            output: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl<R: Read> Read for TextReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut chunk = [0u8; CHUNK_SIZE];
        while self.pos >= self.output.len() && !self.done {
            self.output.clear();
            self.pos = 0;
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                self.done = true;
                self.transcoder.convert(&[], true, &mut self.output);
            } else {
                self.transcoder.convert(&chunk[..n], false, &mut self.output);
            }
        }

        let n = buf.len().min(self.output.len() - self.pos);
        buf[..n].copy_from_slice(&self.output[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Writing adapter: transcodes bytes before handing them to a sink.
pub struct TextWriter<S: DataSink> {
    inner: S,
    transcoder: Transcoder,
    finished: bool,
}

impl<S: DataSink> TextWriter<S> {
    pub fn new(inner: S, transcoder: Transcoder) -> Self {
        Self {
            inner,
            transcoder,
            finished: false,
        }
    }
}

impl<S: DataSink> Write for TextWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(CodecError::StreamAlreadyFinalized.into_io());
        }
        let mut out = Vec::with_capacity(buf.len() + buf.len() / 16);
        self.transcoder.convert(buf, false, &mut out);
        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: DataSink> DataSink for TextWriter<S> {
    fn finish(&mut self) -> io::Result<()> {
        if !self.finished {
            self.finished = true;
            let mut out = Vec::new();
            self.transcoder.convert(&[], true, &mut out);
            self.inner.write_all(&out)?;
        }
        self.inner.finish()
    }

    fn restart_marker(&mut self, marker: u64) -> io::Result<bool> {
        self.inner.restart_marker(marker)
    }
}

pub struct TextRecordReader<R: RecordRead> {
    inner: R,
    transcoder: Transcoder,
}

impl<R: RecordRead> TextRecordReader<R> {
    pub fn new(inner: R, transcoder: Transcoder) -> Self {
        Self { inner, transcoder }
    }
}

impl<R: RecordRead> RecordRead for TextRecordReader<R> {
    fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .inner
            .read_record()?
            .map(|record| self.transcoder.convert_record(&record)))
    }
}

pub struct TextRecordWriter<W: RecordWrite> {
    inner: W,
    transcoder: Transcoder,
}

impl<W: RecordWrite> TextRecordWriter<W> {
    pub fn new(inner: W, transcoder: Transcoder) -> Self {
        Self { inner, transcoder }
    }
}

impl<W: RecordWrite> RecordWrite for TextRecordWriter<W> {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        let converted = self.transcoder.convert_record(record);
        self.inner.write_record(&converted)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.inner.finish()
    }

    fn restart_marker(&mut self, marker: u64) -> io::Result<bool> {
        self.inner.restart_marker(marker)
    }
}
