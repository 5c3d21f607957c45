//! Control connection plumbing shared by the reader thread and the worker.

use log::warn;
use parking_lot::Mutex;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};

use crate::protocol::responses::format_response;

/// Writing half of the control connection. Clones share one writer, so
/// replies from both session threads never interleave mid-line.
#[derive(Clone)]
pub struct ControlChannel {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ControlChannel {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Writes a pre-formatted, CRLF-terminated reply.
    pub fn reply(&self, text: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(text.as_bytes())?;
        writer.flush()
    }

    pub fn send(&self, code: u16, message: &str) -> io::Result<()> {
        self.reply(&format_response(code, message))
    }

    /// Like `send`, for replies whose failure only needs logging.
    pub fn send_logged(&self, code: u16, message: &str) {
        if let Err(e) = self.send(code, message) {
            warn!("Failed to send {} reply: {}", code, e);
        }
    }

    /// Swaps in a new writer, e.g. after the connection is upgraded to TLS.
    pub fn replace(&self, writer: Box<dyn Write + Send>) {
        *self.writer.lock() = writer;
    }
}

/// What a socket-modifying command did to the control connection.
pub enum SwapOutcome {
    Unchanged,
    Replaced(Box<dyn BufRead + Send>),
}

/// Rendezvous between the reader thread, which must stop reading while a
/// socket-modifying command runs, and the worker executing that command.
pub struct SocketSwap {
    sender: Mutex<Option<SyncSender<SwapOutcome>>>,
    receiver: Mutex<Option<Receiver<SwapOutcome>>>,
}

impl SocketSwap {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::sync_channel(1);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Takes the waiting half. Only the first caller gets it.
    pub fn waiter(&self) -> Option<SwapWaiter> {
        self.receiver.lock().take().map(SwapWaiter)
    }

    /// Releases the reader. Later calls are no-ops.
    pub fn complete(&self, outcome: SwapOutcome) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(outcome);
        }
    }
}

impl Default for SocketSwap {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SwapWaiter(Receiver<SwapOutcome>);

impl SwapWaiter {
    /// Blocks until the swap completes. A command dropped without completing
    /// counts as `Unchanged`.
    pub fn wait(self) -> SwapOutcome {
        self.0.recv().unwrap_or(SwapOutcome::Unchanged)
    }
}

/// Completes a pending swap as `Unchanged` when the command finishes
/// without having done so itself.
pub struct SwapGuard<'a>(pub Option<&'a SocketSwap>);

impl Drop for SwapGuard<'_> {
    fn drop(&mut self) {
        if let Some(swap) = self.0 {
            swap.complete(SwapOutcome::Unchanged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn replies_go_to_the_current_writer() {
        let first = Shared::default();
        let second = Shared::default();
        let control = ControlChannel::new(first.clone());
        control.send(220, "Ready").unwrap();
        control.replace(Box::new(second.clone()));
        control.send(221, "Bye").unwrap();

        assert_eq!(&*first.0.lock(), b"220 Ready\r\n");
        assert_eq!(&*second.0.lock(), b"221 Bye\r\n");
    }

    #[test]
    fn waiter_sees_replacement() {
        let swap = Arc::new(SocketSwap::new());
        let waiter = swap.waiter().unwrap();
        assert!(swap.waiter().is_none());

        let worker = {
            let swap = swap.clone();
            thread::spawn(move || {
                swap.complete(SwapOutcome::Replaced(Box::new(io::Cursor::new(b"x".to_vec()))));
                swap.complete(SwapOutcome::Unchanged);
            })
        };
        assert!(matches!(waiter.wait(), SwapOutcome::Replaced(_)));
        worker.join().unwrap();
    }

    #[test]
    fn dropped_swap_releases_the_waiter() {
        let swap = SocketSwap::new();
        let waiter = swap.waiter().unwrap();
        drop(swap);
        assert!(matches!(waiter.wait(), SwapOutcome::Unchanged));
    }

    #[test]
    fn guard_completes_unchanged() {
        let swap = SocketSwap::new();
        let waiter = swap.waiter().unwrap();
        {
            let _guard = SwapGuard(Some(&swap));
        }
        assert!(matches!(waiter.wait(), SwapOutcome::Unchanged));
    }
}
