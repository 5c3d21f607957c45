//! Module `reader`
//!
//! The command reader runs on its own thread and owns the reading half of
//! the control connection. Every line it reads is either offered to the
//! command currently executing (STAT and ABOR during a transfer), or parsed
//! and queued for the session worker in arrival order.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::io::{self, BufRead, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crate::client::control::{ControlChannel, SocketSwap, SwapOutcome};
use crate::error::SessionError;
use crate::protocol::commands::{AsyncReply, FtpCommand};
use crate::protocol::parser::CommandRegistry;

const IAC: u8 = 0xFF;

/// An item on the command queue.
enum Incoming {
    Command(Arc<dyn FtpCommand>),
    Illegal(String),
}

struct ReaderShared {
    terminated: AtomicBool,
    dispatched: Mutex<Option<Arc<dyn FtpCommand>>>,
}

/// Worker-side handle on the reader thread.
///
/// The thread is detached. It exits on end of input, on a read error, or
/// once the worker drops this handle and the next line cannot be queued.
pub struct CommandReader {
    receiver: Receiver<Incoming>,
    shared: Arc<ReaderShared>,
}

impl CommandReader {
    pub fn spawn(
        input: Box<dyn BufRead + Send>,
        control: ControlChannel,
        registry: Arc<CommandRegistry>,
        max_line_len: usize,
        client_addr: SocketAddr,
    ) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(ReaderShared {
            terminated: AtomicBool::new(false),
            dispatched: Mutex::new(None),
        });

        let loop_state = ReadLoop {
            input,
            control,
            registry,
            max_line_len,
            client_addr,
            sender,
            shared: shared.clone(),
        };
        thread::Builder::new()
            .name(format!("ftp-reader-{}", client_addr))
            .spawn(move || loop_state.run())?;

        Ok(Self { receiver, shared })
    }

    /// Blocks until the next queued item, or until `timeout` elapses.
    ///
    /// A returned command becomes the most recently dispatched one, which
    /// is where the reader routes asynchronous lines from then on.
    pub fn wait_for_next_command(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Arc<dyn FtpCommand>, SessionError> {
        let incoming = match timeout {
            Some(timeout) => self.receiver.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => SessionError::CommandTimeout,
                RecvTimeoutError::Disconnected => SessionError::ReaderTerminated,
            })?,
            None => self
                .receiver
                .recv()
                .map_err(|_| SessionError::ReaderTerminated)?,
        };

        match incoming {
            Incoming::Illegal(line) => Err(SessionError::IllegalCommand(line)),
            Incoming::Command(command) => {
                *self.shared.dispatched.lock() = Some(command.clone());
                Ok(command)
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    /// The most recently dispatched command, if any.
    pub fn dispatched(&self) -> Option<Arc<dyn FtpCommand>> {
        self.shared.dispatched.lock().clone()
    }
}

struct ReadLoop {
    input: Box<dyn BufRead + Send>,
    control: ControlChannel,
    registry: Arc<CommandRegistry>,
    max_line_len: usize,
    client_addr: SocketAddr,
    sender: Sender<Incoming>,
    shared: Arc<ReaderShared>,
}

impl ReadLoop {
    fn run(mut self) {
        loop {
            let line = match read_control_line(&mut self.input, self.max_line_len) {
                Ok(ControlLine::Line(line)) => line,
                Ok(ControlLine::TooLong(prefix)) => {
                    warn!("Command line too long from {}: {:?}...", self.client_addr, prefix);
                    if self.queue(Incoming::Illegal(prefix)).is_err() {
                        break;
                    }
                    continue;
                }
                Ok(ControlLine::Eof) => {
                    info!("Connection closed by client {}", self.client_addr);
                    break;
                }
                Err(e) => {
                    debug!("Control read from {} ended: {}", self.client_addr, e);
                    break;
                }
            };

            if self.route_to_dispatched(&line) {
                continue;
            }

            let Some(command) = self.registry.parse(&line) else {
                if self.queue(Incoming::Illegal(line)).is_err() {
                    break;
                }
                continue;
            };

            // Claim the waiter before the worker can see the command.
            let waiter = command.socket_swap().and_then(SocketSwap::waiter);
            if self.queue(Incoming::Command(command)).is_err() {
                break;
            }
            if let Some(waiter) = waiter {
                if let SwapOutcome::Replaced(input) = waiter.wait() {
                    debug!("Control reader for {} replaced", self.client_addr);
                    self.input = input;
                }
            }
        }

        self.shared.terminated.store(true, Ordering::Release);
        let dispatched = self.shared.dispatched.lock().clone();
        if let Some(command) = dispatched {
            command.abort();
        }
    }

    /// Offers the line to the command in flight. Returns true if consumed.
    fn route_to_dispatched(&self, line: &str) -> bool {
        // Clone out so the lock is not held while the command runs its hook.
        let dispatched = self.shared.dispatched.lock().clone();
        let Some(command) = dispatched else {
            return false;
        };
        match command.handle_async_cmd(line) {
            AsyncReply::NotHandled => false,
            AsyncReply::Handled => true,
            AsyncReply::Reply(text) => {
                if let Err(e) = self.control.reply(&text) {
                    warn!("Failed to send reply to {}: {}", self.client_addr, e);
                }
                true
            }
        }
    }

    fn queue(&self, incoming: Incoming) -> Result<(), ()> {
        self.sender.send(incoming).map_err(|_| {
            debug!("Session worker for {} is gone", self.client_addr);
        })
    }
}

enum ControlLine {
    Line(String),
    /// Carries the start of the line, for logging.
    TooLong(String),
    Eof,
}

const TOO_LONG_PREFIX: usize = 32;

/// Reads one CRLF- or LF-terminated line of at most `max_len` characters.
/// The remainder of an over-long line is discarded.
fn read_control_line(input: &mut dyn BufRead, max_len: usize) -> io::Result<ControlLine> {
    let limit = max_len as u64 + 2;
    let mut raw = Vec::new();
    let n = (&mut *input).take(limit).read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(ControlLine::Eof);
    }

    if !raw.ends_with(b"\n") && n as u64 == limit {
        let stripped = strip_telnet(&raw[..raw.len().min(TOO_LONG_PREFIX)]);
        let prefix = String::from_utf8_lossy(&stripped).into_owned();
        loop {
            raw.clear();
            let n = (&mut *input).take(limit).read_until(b'\n', &mut raw)?;
            if n == 0 || raw.ends_with(b"\n") {
                break;
            }
        }
        return Ok(ControlLine::TooLong(prefix));
    }

    let stripped = strip_telnet(&raw);
    let line = String::from_utf8_lossy(&stripped);
    Ok(ControlLine::Line(
        line.trim_end_matches(['\r', '\n']).to_string(),
    ))
}

/// Removes Telnet IAC sequences. `IAC IAC` stands for a literal 0xFF;
/// WILL/WONT/DO/DONT carry one option byte.
fn strip_telnet(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != IAC {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        match raw.get(i + 1) {
            Some(&IAC) => {
                out.push(IAC);
                i += 2;
            }
            Some(0xFB..=0xFE) => i += 3,
            _ => i += 2,
        }
    }
    out
}
