//! Module `file_ops`
//!
//! STOR/STOU/APPE and RETR as one generic transfer driver over a
//! `TransferDirection`. The driver owns the protocol sequence (access
//! checks, 150, data connection, pipeline, 226/426) and the direction
//! supplies the file handling for its side of the copy.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};

use crate::auth::UserAccount;
use crate::client::state::SessionContext;
use crate::error::handlers::{log_transfer_error, transfer_error_reply};
use crate::error::{StorageError, TransferError};
use crate::middleware::{EventFanout, TransferEvent, TransferRateLimiter};
use crate::protocol::commands::{AsyncReply, CommandResult, FtpCommand};
use crate::protocol::responses::{self, format_response, messages};
use crate::storage::filesystem::unique_path;
use crate::storage::{AccessGrant, AccessPolicy, resolve_file_path};
use crate::transfer::data_channel::DataStream;
use crate::transfer::pipeline::{InboundPipeline, OutboundPipeline, PipelineBuilder};
use crate::transfer::record::{DataSink, RecordRead, RecordWrite};
use crate::transfer::text::NATIVE_EOL;

/// Lifecycle of one transfer command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferState {
    Idle = 0,
    AccessChecked = 1,
    Transferring = 2,
    Completed = 3,
    Aborted = 4,
    Failed = 5,
}

impl TransferState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransferState::AccessChecked,
            2 => TransferState::Transferring,
            3 => TransferState::Completed,
            4 => TransferState::Aborted,
            5 => TransferState::Failed,
            _ => TransferState::Idle,
        }
    }
}

/// Progress of a transfer, readable from the reader thread while the
/// worker is copying data.
#[derive(Debug)]
pub struct TransferProgress {
    state: AtomicU8,
    completed: AtomicU64,
    // -1 while the size is unknown
    total: AtomicI64,
    aborted: AtomicBool,
    abort_socket: Mutex<Option<TcpStream>>,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TransferState::Idle as u8),
            completed: AtomicU64::new(0),
            total: AtomicI64::new(-1),
            aborted: AtomicBool::new(false),
            abort_socket: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TransferState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn add_completed(&self, bytes: u64) {
        self.completed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total(&self) -> Option<u64> {
        u64::try_from(self.total.load(Ordering::Relaxed)).ok()
    }

    pub fn set_total(&self, total: Option<u64>) {
        let value = total.and_then(|t| i64::try_from(t).ok()).unwrap_or(-1);
        self.total.store(value, Ordering::Relaxed);
    }

    pub fn status_line(&self) -> String {
        let total = self
            .total()
            .map_or_else(|| "unknown".to_string(), |t| t.to_string());
        format!("Status: {} of {} bytes transferred", self.completed(), total)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// The raw abort flag, for waits that poll it.
    pub fn abort_flag(&self) -> &AtomicBool {
        &self.aborted
    }

    /// Flags the transfer as aborted and shuts the data socket down so the
    /// worker's blocked read or write returns.
    pub fn request_abort(&self) {
        self.aborted.store(true, Ordering::Release);
        if let Some(socket) = self.abort_socket.lock().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    /// Registers the data socket to shut down on abort. An abort that came
    /// in before arming takes effect immediately.
    pub fn arm(&self, socket: TcpStream) {
        let mut slot = self.abort_socket.lock();
        if self.is_aborted() {
            let _ = socket.shutdown(Shutdown::Both);
        } else {
            *slot = Some(socket);
        }
    }

    pub fn disarm(&self) {
        self.abort_socket.lock().take();
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved transfer target.
#[derive(Debug, Clone)]
pub struct TransferTarget {
    pub virtual_path: String,
    pub real_path: PathBuf,
}

/// Everything a direction needs while copying data.
pub struct TransferJob<'a> {
    pub target: TransferTarget,
    pub offset: u64,
    pub grant: AccessGrant,
    /// 0 means no limit
    pub max_file_size: u64,
    pub buffer_size: usize,
    /// Bytes between outgoing restart markers, 0 for none
    pub marker_interval: u64,
    pub limiter: TransferRateLimiter,
    pub progress: &'a TransferProgress,
}

impl TransferJob<'_> {
    /// Books `bytes` against the rate limiter and the progress counter.
    fn account(&mut self, bytes: usize) {
        self.limiter.transferred(bytes);
        self.progress.add_completed(bytes as u64);
    }

    /// Upload ceilings: remaining quota and maximum file size.
    fn check_upload_limits(&self, written: u64) -> Result<(), TransferError> {
        if let Some(limit) = self.grant.remaining_quota {
            if written > limit {
                return Err(TransferError::QuotaExceeded {
                    limit,
                    attempted: written,
                });
            }
        }
        if self.max_file_size > 0 && self.offset + written > self.max_file_size {
            return Err(TransferError::FileTooLarge(self.max_file_size));
        }
        Ok(())
    }
}

/// One side of the copy between a file and the data connection.
pub trait TransferDirection: Send + Sync {
    fn verb(&self) -> &'static str;

    fn resolve(&self, session: &SessionContext) -> Result<TransferTarget, TransferError>;

    fn perform_access_checks(
        &self,
        policy: &dyn AccessPolicy,
        user: &UserAccount,
        target: &TransferTarget,
    ) -> Result<AccessGrant, TransferError>;

    /// Ceiling in KB/s for this user and direction.
    fn rate_limit(&self, user: &UserAccount) -> i64;

    /// Bytes the transfer will move, if known up front.
    fn expected_size(&self, _target: &TransferTarget, _offset: u64) -> Option<u64> {
        None
    }

    /// Builds the pipeline over `stream` and copies the data.
    fn transfer(
        &self,
        job: &mut TransferJob<'_>,
        stream: &mut dyn DataStream,
        builder: &PipelineBuilder,
    ) -> Result<(), TransferError>;

    fn performed(&self, events: &EventFanout, event: &TransferEvent);
}

/// STOR, STOU and APPE.
#[derive(Debug, Clone)]
pub struct StorDirection {
    path: String,
    unique: bool,
    append: bool,
}

impl StorDirection {
    pub fn new(path: &str, unique: bool, append: bool) -> Self {
        Self {
            path: path.trim().to_string(),
            unique,
            append,
        }
    }

    fn open_destination(&self, path: &Path, offset: u64) -> Result<File, TransferError> {
        let file = if self.append {
            OpenOptions::new().append(true).create(true).open(path)
        } else if offset > 0 {
            OpenOptions::new().write(true).create(true).truncate(false).open(path)
        } else {
            File::create(path)
        };
        let mut file = file.map_err(StorageError::from)?;
        if !self.append && offset > 0 {
            file.set_len(offset).map_err(StorageError::from)?;
            file.seek(SeekFrom::Start(offset)).map_err(StorageError::from)?;
        }
        Ok(file)
    }

    fn transfer_file_data(
        &self,
        job: &mut TransferJob<'_>,
        source: &mut dyn Read,
        file: &mut File,
    ) -> Result<(), TransferError> {
        let mut buffer = vec![0u8; job.buffer_size.max(1)];
        let mut written = 0u64;
        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransferError::from_pipeline(e)),
            };
            job.check_upload_limits(written + n as u64)?;
            file.write_all(&buffer[..n])
                .map_err(TransferError::TransferFailed)?;
            written += n as u64;
            job.account(n);
        }
        Ok(())
    }

    fn transfer_record_data(
        &self,
        job: &mut TransferJob<'_>,
        source: &mut dyn RecordRead,
        file: &mut File,
    ) -> Result<(), TransferError> {
        let mut written = 0u64;
        while let Some(record) = source.read_record().map_err(TransferError::from_pipeline)? {
            let n = record.len() + NATIVE_EOL.len();
            job.check_upload_limits(written + n as u64)?;
            file.write_all(&record)
                .and_then(|_| file.write_all(NATIVE_EOL.as_bytes()))
                .map_err(TransferError::TransferFailed)?;
            written += n as u64;
            job.account(n);
        }
        Ok(())
    }
}

impl TransferDirection for StorDirection {
    fn verb(&self) -> &'static str {
        match (self.unique, self.append) {
            (true, _) => "STOU",
            (false, true) => "APPE",
            (false, false) => "STOR",
        }
    }

    fn resolve(&self, session: &SessionContext) -> Result<TransferTarget, TransferError> {
        let (virtual_path, real_path) = resolve_file_path(
            &session.server_root(),
            session.current_virtual_path(),
            &self.path,
        )?;

        if real_path.is_dir() {
            return Err(StorageError::NotAFile(virtual_path).into());
        }

        if self.unique && real_path.exists() {
            let fresh = unique_path(&real_path);
            let name = fresh
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let parent = virtual_path
                .rsplit_once('/')
                .map_or("", |(parent, _)| parent);
            debug!("{} exists, storing as {}", virtual_path, name);
            return Ok(TransferTarget {
                virtual_path: format!("{}/{}", parent, name),
                real_path: fresh,
            });
        }

        if !self.unique
            && !self.append
            && session.config().limits.unique_required
            && real_path.exists()
        {
            return Err(TransferError::UniqueConstraintViolation(virtual_path));
        }

        Ok(TransferTarget {
            virtual_path,
            real_path,
        })
    }

    fn perform_access_checks(
        &self,
        policy: &dyn AccessPolicy,
        user: &UserAccount,
        target: &TransferTarget,
    ) -> Result<AccessGrant, TransferError> {
        policy.check_upload(user, &target.virtual_path, &target.real_path)
    }

    fn rate_limit(&self, user: &UserAccount) -> i64 {
        user.upload_rate_kbps
    }

    fn transfer(
        &self,
        job: &mut TransferJob<'_>,
        stream: &mut dyn DataStream,
        builder: &PipelineBuilder,
    ) -> Result<(), TransferError> {
        let mut pipeline = builder.build_inbound(stream)?;

        let created = !job.target.real_path.exists();
        let mut file = self.open_destination(&job.target.real_path, job.offset)?;

        let result = match &mut pipeline {
            InboundPipeline::Bytes(source) => self.transfer_file_data(job, source.as_mut(), &mut file),
            InboundPipeline::Records(source) => {
                self.transfer_record_data(job, source.as_mut(), &mut file)
            }
        }
        .and_then(|_| file.flush().map_err(TransferError::TransferFailed));
        drop(file);

        if let Err(
            TransferError::QuotaExceeded { .. } | TransferError::FileTooLarge(_),
        ) = &result
        {
            if created {
                if let Err(e) = fs::remove_file(&job.target.real_path) {
                    warn!("Failed to remove {}: {}", job.target.real_path.display(), e);
                }
            }
        }
        result
    }

    fn performed(&self, events: &EventFanout, event: &TransferEvent) {
        events.upload_performed(event);
    }
}

/// RETR.
#[derive(Debug, Clone)]
pub struct RetrDirection {
    path: String,
}

impl RetrDirection {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.trim().to_string(),
        }
    }

    fn transfer_file_data(
        &self,
        job: &mut TransferJob<'_>,
        file: &mut File,
        sink: &mut dyn DataSink,
    ) -> Result<(), TransferError> {
        let mut buffer = vec![0u8; job.buffer_size.max(1)];
        let mut position = job.offset;
        let mut since_marker = 0u64;
        loop {
            let n = file.read(&mut buffer).map_err(TransferError::TransferFailed)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buffer[..n])
                .map_err(TransferError::from_pipeline)?;
            position += n as u64;
            job.account(n);

            since_marker += n as u64;
            if job.marker_interval > 0 && since_marker >= job.marker_interval {
                since_marker = 0;
                sink.restart_marker(position)
                    .map_err(TransferError::from_pipeline)?;
            }
        }
        sink.finish().map_err(TransferError::from_pipeline)
    }

    /// Lines of the file become records; the line terminator is dropped.
    fn transfer_record_data(
        &self,
        job: &mut TransferJob<'_>,
        file: &mut File,
        sink: &mut dyn RecordWrite,
    ) -> Result<(), TransferError> {
        let mut reader = BufReader::with_capacity(job.buffer_size.max(1), file);
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(TransferError::TransferFailed)?;
            if n == 0 {
                break;
            }
            let record = line
                .strip_suffix(b"\n")
                .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
                .unwrap_or(&line[..]);
            sink.write_record(record)
                .map_err(TransferError::from_pipeline)?;
            job.account(n);
        }
        sink.finish().map_err(TransferError::from_pipeline)
    }
}

impl TransferDirection for RetrDirection {
    fn verb(&self) -> &'static str {
        "RETR"
    }

    fn resolve(&self, session: &SessionContext) -> Result<TransferTarget, TransferError> {
        let (virtual_path, real_path) = resolve_file_path(
            &session.server_root(),
            session.current_virtual_path(),
            &self.path,
        )?;
        Ok(TransferTarget {
            virtual_path,
            real_path,
        })
    }

    fn perform_access_checks(
        &self,
        policy: &dyn AccessPolicy,
        user: &UserAccount,
        target: &TransferTarget,
    ) -> Result<AccessGrant, TransferError> {
        policy.check_download(user, &target.virtual_path, &target.real_path)
    }

    fn rate_limit(&self, user: &UserAccount) -> i64 {
        user.download_rate_kbps
    }

    fn expected_size(&self, target: &TransferTarget, offset: u64) -> Option<u64> {
        fs::metadata(&target.real_path)
            .ok()
            .map(|m| m.len().saturating_sub(offset))
    }

    fn transfer(
        &self,
        job: &mut TransferJob<'_>,
        stream: &mut dyn DataStream,
        builder: &PipelineBuilder,
    ) -> Result<(), TransferError> {
        let mut pipeline = builder.build_outbound(stream)?;

        let mut file = File::open(&job.target.real_path).map_err(StorageError::from)?;
        if job.offset > 0 {
            file.seek(SeekFrom::Start(job.offset))
                .map_err(StorageError::from)?;
        }

        match &mut pipeline {
            OutboundPipeline::Bytes(sink) => self.transfer_file_data(job, &mut file, sink.as_mut()),
            OutboundPipeline::Records(sink) => {
                self.transfer_record_data(job, &mut file, sink.as_mut())
            }
        }
    }

    fn performed(&self, events: &EventFanout, event: &TransferEvent) {
        events.download_performed(event);
    }
}

/// An FTP transfer command driving one `TransferDirection`.
pub struct TransferCommand<D: TransferDirection> {
    direction: D,
    progress: TransferProgress,
}

impl<D: TransferDirection> TransferCommand<D> {
    pub fn new(direction: D) -> Self {
        Self {
            direction,
            progress: TransferProgress::new(),
        }
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }

    /// Runs the transfer and returns the final reply.
    fn run(&self, session: &mut SessionContext) -> Result<String, TransferError> {
        let Some(user) = session.user().cloned() else {
            return Err(TransferError::PermissionDenied(self.direction.verb().into()));
        };

        let target = self.direction.resolve(session)?;
        let grant =
            self.direction
                .perform_access_checks(session.access_policy(), &user, &target)?;
        self.progress.set_state(TransferState::AccessChecked);

        session.restart_markers().clear();
        let limiter = TransferRateLimiter::new(self.direction.rate_limit(&user));
        let offset = session.take_file_offset();
        self.progress
            .set_total(self.direction.expected_size(&target, offset));

        session
            .control()
            .send(
                responses::OPENING_DATA,
                &format!(
                    "Opening {} mode data connection for {}",
                    session.data_type().code(),
                    target.virtual_path
                ),
            )
            .map_err(TransferError::TransferFailed)?;

        let mut connection = match session.open_data_connection(Some(self.progress.abort_flag())) {
            Ok(connection) => connection,
            Err(_) if self.progress.is_aborted() => {
                return Ok(self.finish_aborted(session, &target.virtual_path));
            }
            Err(e) => {
                warn!(
                    "Data connection for {} failed for {}: {}",
                    self.direction.verb(),
                    session.client_addr(),
                    e
                );
                return Err(TransferError::DataChannelSetupFailed(e.to_string()));
            }
        };
        debug!(
            "{} data connection open to {}",
            self.direction.verb(),
            connection.peer()
        );

        match connection.abort_handle() {
            Ok(socket) => self.progress.arm(socket),
            Err(e) => debug!("No abort handle for data connection: {}", e),
        }
        self.progress.set_state(TransferState::Transferring);

        let builder = session.pipeline_builder();
        let config = session.config();
        let mut job = TransferJob {
            target,
            offset,
            grant,
            max_file_size: config.limits.max_file_size_bytes(),
            buffer_size: config.server.buffer_size,
            marker_interval: config.server.restart_marker_interval,
            limiter,
            progress: &self.progress,
        };
        let result = self
            .direction
            .transfer(&mut job, connection.stream_mut(), &builder);

        self.progress.disarm();
        drop(connection);

        if self.progress.is_aborted() {
            return Ok(self.finish_aborted(session, &job.target.virtual_path));
        }
        result?;

        self.progress.set_state(TransferState::Completed);
        let event = TransferEvent {
            client: session.client_addr(),
            user: user.name.clone(),
            path: job.target.real_path.clone(),
            bytes: self.progress.completed(),
        };
        self.direction.performed(session.events(), &event);

        Ok(format_response(
            responses::TRANSFER_COMPLETE,
            "Transfer complete",
        ))
    }

    /// Sends the 426 for an aborted transfer and returns the closing 226.
    fn finish_aborted(&self, session: &SessionContext, virtual_path: &str) -> String {
        self.progress.set_state(TransferState::Aborted);
        info!(
            "{} of {} aborted by {} after {} bytes",
            self.direction.verb(),
            virtual_path,
            session.client_addr(),
            self.progress.completed()
        );
        session
            .control()
            .send_logged(responses::TRANSFER_ABORTED, messages::TRANSFER_ABORTED);
        format_response(responses::TRANSFER_COMPLETE, messages::ABORT_SUCCESSFUL)
    }
}

impl<D: TransferDirection> FtpCommand for TransferCommand<D> {
    fn name(&self) -> &'static str {
        self.direction.verb()
    }

    fn execute(&self, session: &mut SessionContext) -> CommandResult {
        match self.run(session) {
            Ok(reply) => CommandResult::success(reply),
            Err(e) => {
                self.progress.set_state(TransferState::Failed);
                log_transfer_error(
                    &session.client_addr().to_string(),
                    self.direction.verb(),
                    &e,
                );
                CommandResult::failure(e.to_string(), transfer_error_reply(&e))
            }
        }
    }

    fn handle_async_cmd(&self, line: &str) -> AsyncReply {
        // ABOR also covers the wait for the data connection.
        let state = self.progress.state();
        let verb = line.trim();
        if verb.eq_ignore_ascii_case("ABOR")
            && matches!(state, TransferState::AccessChecked | TransferState::Transferring)
        {
            self.progress.request_abort();
            return AsyncReply::Handled;
        }
        if state != TransferState::Transferring {
            return AsyncReply::NotHandled;
        }
        if verb.eq_ignore_ascii_case("STAT") {
            AsyncReply::Reply(format_response(
                responses::FILE_STATUS,
                &self.progress.status_line(),
            ))
        } else {
            AsyncReply::NotHandled
        }
    }

    fn abort(&self) {
        self.progress.request_abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_reports_unknown_totals() {
        let progress = TransferProgress::new();
        progress.add_completed(512);
        assert_eq!(progress.status_line(), "Status: 512 of unknown bytes transferred");
        progress.set_total(Some(2048));
        assert_eq!(progress.status_line(), "Status: 512 of 2048 bytes transferred");
    }

    #[test]
    fn async_commands_only_apply_while_transferring() {
        let command = TransferCommand::new(RetrDirection::new("a.txt"));
        assert_eq!(command.handle_async_cmd("STAT"), AsyncReply::NotHandled);

        command.progress().set_state(TransferState::Transferring);
        command.progress().add_completed(10);
        assert_eq!(
            command.handle_async_cmd("stat"),
            AsyncReply::Reply("213 Status: 10 of unknown bytes transferred\r\n".into())
        );
        assert_eq!(command.handle_async_cmd("NOOP"), AsyncReply::NotHandled);
        assert_eq!(command.handle_async_cmd("ABOR"), AsyncReply::Handled);
        assert!(command.progress().is_aborted());

        command.progress().set_state(TransferState::Completed);
        assert_eq!(command.handle_async_cmd("ABOR"), AsyncReply::NotHandled);
    }

    #[test]
    fn abor_is_taken_while_waiting_for_the_data_connection() {
        let command = TransferCommand::new(StorDirection::new("a.bin", false, false));
        command.progress().set_state(TransferState::AccessChecked);

        assert_eq!(command.handle_async_cmd("STAT"), AsyncReply::NotHandled);
        assert_eq!(command.handle_async_cmd("abor"), AsyncReply::Handled);
        assert!(command.progress().is_aborted());
        assert!(command.progress().abort_flag().load(Ordering::Acquire));
    }

    #[test]
    fn quota_overrun_keeps_only_earlier_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let mut file = File::create(&path).unwrap();

        let progress = TransferProgress::new();
        let mut job = TransferJob {
            target: TransferTarget {
                virtual_path: "/upload.bin".into(),
                real_path: path.clone(),
            },
            offset: 0,
            grant: AccessGrant {
                remaining_quota: Some(10),
            },
            max_file_size: 0,
            buffer_size: 8,
            marker_interval: 0,
            limiter: TransferRateLimiter::default(),
            progress: &progress,
        };

        let mut source = io::Cursor::new(vec![7u8; 25]);
        let direction = StorDirection::new("upload.bin", false, false);
        let result = direction.transfer_file_data(&mut job, &mut source, &mut file);
        drop(file);

        assert!(matches!(
            result,
            Err(TransferError::QuotaExceeded { limit: 10, attempted: 16 })
        ));
        assert_eq!(fs::metadata(&path).unwrap().len(), 8);
        assert_eq!(progress.completed(), 8);
    }

    #[test]
    fn abort_before_arming_shuts_the_socket_at_once() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        let progress = TransferProgress::new();
        progress.request_abort();
        progress.arm(server.try_clone().unwrap());

        let mut buf = [0u8; 1];
        let mut server = server;
        assert_eq!(server.read(&mut buf).unwrap(), 0);
        drop(client);
    }

    #[test]
    fn verbs_follow_the_store_flavor() {
        assert_eq!(StorDirection::new("a", false, false).verb(), "STOR");
        assert_eq!(StorDirection::new("a", true, false).verb(), "STOU");
        assert_eq!(StorDirection::new("a", false, true).verb(), "APPE");
    }

    #[test]
    fn upload_limits_cover_quota_and_file_size() {
        let progress = TransferProgress::new();
        let mut job = TransferJob {
            target: TransferTarget {
                virtual_path: "/a".into(),
                real_path: PathBuf::from("a"),
            },
            offset: 0,
            grant: AccessGrant {
                remaining_quota: Some(100),
            },
            max_file_size: 150,
            buffer_size: 16,
            marker_interval: 0,
            limiter: TransferRateLimiter::default(),
            progress: &progress,
        };
        assert!(job.check_upload_limits(100).is_ok());
        assert!(matches!(
            job.check_upload_limits(101),
            Err(TransferError::QuotaExceeded { limit: 100, attempted: 101 })
        ));

        job.grant = AccessGrant::default();
        job.offset = 100;
        assert!(matches!(
            job.check_upload_limits(60),
            Err(TransferError::FileTooLarge(150))
        ));
        job.account(7);
        assert_eq!(progress.completed(), 7);
    }
}
