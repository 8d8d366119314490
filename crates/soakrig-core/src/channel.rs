//! One supervised console.
//!
//! A [`LineChannel`] owns a transport, a background reader thread, an
//! append-only session log and a bounded ring buffer of recent lines. The
//! reader is the only thing that ever reads the device; everything else
//! (waiters, probes) works off the buffer.
//!
//! ```text
//! device ──read_chunk──▶ LineDecoder ──▶ session log (flushed per line)
//!                                    └─▶ RingBuffer<LineRecord> ◀── probes
//! control task ──send()──▶ transport (one command per write, CR-terminated)
//! ```

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::line_codec::LineDecoder;
use crate::ring_buffer::{RingBuffer, RingBufferStats};
use crate::transport::{Transport, TransportFactory};

/// Backoff after a failed read before trying again.
pub const READ_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// How long `stop()` waits for the reader thread before abandoning it.
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK_BYTES: usize = 4096;
const SESSION_TS_FORMAT: &str = "%m-%d %H:%M:%S";

/// A decoded console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineRecord {
    /// Position in the channel's push sequence (1-based)
    pub seq: u64,
    /// Host receipt time
    pub at: DateTime<Local>,
    pub text: String,
}

/// Everything needed to bring a channel up besides its identity.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub baud: u32,
    pub read_timeout: Duration,
    pub buffer_capacity: usize,
    /// Session log file; `None` keeps lines in memory only
    pub session_log: Option<PathBuf>,
}

struct SessionLog {
    file: Mutex<Option<File>>,
    failed: AtomicBool,
}

impl SessionLog {
    fn open(channel: &str, path: Option<&Path>) -> Self {
        let file = path.and_then(|path| {
            let opened = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path);
            match opened {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(channel, path = %path.display(), error = %e, "Session log unavailable");
                    None
                }
            }
        });
        Self {
            file: Mutex::new(file),
            failed: AtomicBool::new(false),
        }
    }

    fn write(&self, channel: &str, at: DateTime<Local>, marker: &str, text: &str) {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = guard.as_mut() else {
            return;
        };
        let result = writeln!(file, "[{}] {marker}{text}", at.format(SESSION_TS_FORMAT))
            .and_then(|()| file.flush());
        if let Err(e) = result {
            if !self.failed.swap(true, Ordering::Relaxed) {
                warn!(channel, error = %e, "Session log write failed");
            }
        }
    }
}

/// A managed serial console.
pub struct LineChannel {
    name: String,
    port: String,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    buffer: Arc<Mutex<RingBuffer<LineRecord>>>,
    log: Arc<SessionLog>,
    shutdown: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl LineChannel {
    /// Open the device for `config` through `factory`.
    pub fn open(
        config: &ChannelConfig,
        settings: &ChannelSettings,
        factory: &dyn TransportFactory,
    ) -> Result<Self, ChannelError> {
        let transport = factory
            .open(config, settings.baud, settings.read_timeout)
            .map_err(|source| ChannelError::OpenFailed {
                name: config.name.clone(),
                port: config.port.clone(),
                source,
            })?;
        info!(channel = %config.name, port = %config.port, baud = settings.baud, "Channel opened");
        Ok(Self::attach(&config.name, &config.port, transport, settings))
    }

    /// Wrap an already open transport.
    ///
    /// # Panics
    ///
    /// Panics if `settings.buffer_capacity` is 0; config validation rejects it.
    pub fn attach(
        name: &str,
        port: &str,
        transport: Arc<dyn Transport>,
        settings: &ChannelSettings,
    ) -> Self {
        Self {
            name: name.to_string(),
            port: port.to_string(),
            transport: Mutex::new(Some(transport)),
            buffer: Arc::new(Mutex::new(RingBuffer::new(settings.buffer_capacity))),
            log: Arc::new(SessionLog::open(name, settings.session_log.as_deref())),
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.transport).is_some()
    }

    /// Launch the background reader. Calling it twice is a no-op.
    pub fn start_reading(&self) -> Result<(), ChannelError> {
        let mut reader = lock(&self.reader);
        if reader.is_some() {
            return Ok(());
        }
        let transport = lock(&self.transport)
            .clone()
            .ok_or_else(|| ChannelError::NotOpen(self.name.clone()))?;

        let ctx = ReaderContext {
            name: self.name.clone(),
            transport,
            buffer: Arc::clone(&self.buffer),
            log: Arc::clone(&self.log),
            shutdown: Arc::clone(&self.shutdown),
        };
        let handle = std::thread::Builder::new()
            .name(format!("soakrig-reader-{}", self.name))
            .spawn(move || ctx.run())
            .map_err(|e| ChannelError::ReaderSpawn {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        *reader = Some(handle);
        debug!(channel = %self.name, "Reader started");
        Ok(())
    }

    /// Send one command, CR-terminated, in a single write.
    pub fn send(&self, text: &str) -> Result<(), ChannelError> {
        let transport = lock(&self.transport)
            .clone()
            .ok_or_else(|| ChannelError::NotOpen(self.name.clone()))?;

        let mut wire = String::with_capacity(text.len() + 1);
        wire.push_str(text);
        wire.push('\r');
        transport
            .write_all(wire.as_bytes())
            .map_err(|e| ChannelError::WriteFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        self.log.write(&self.name, Local::now(), ">> ", text);
        debug!(channel = %self.name, command = text, "Command sent");
        Ok(())
    }

    /// Drop every buffered line. The read cursor keeps counting.
    pub fn clear(&self) {
        lock(&self.buffer).clear();
    }

    /// Cursor marking "everything received so far".
    #[must_use]
    pub fn cursor(&self) -> u64 {
        lock(&self.buffer).mark()
    }

    /// Lines received after `cursor`, oldest first.
    #[must_use]
    pub fn lines_since(&self, cursor: u64) -> Vec<LineRecord> {
        lock(&self.buffer).since(cursor).cloned().collect()
    }

    /// Newest buffered line satisfying `pred`.
    pub fn find_newest<F>(&self, pred: F) -> Option<LineRecord>
    where
        F: Fn(&str) -> bool,
    {
        lock(&self.buffer)
            .iter()
            .rev()
            .find(|record| pred(&record.text))
            .cloned()
    }

    /// Copy of the buffer, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LineRecord> {
        lock(&self.buffer).to_owned_vec()
    }

    #[must_use]
    pub fn buffer_stats(&self) -> RingBufferStats {
        lock(&self.buffer).stats()
    }

    /// Stop the reader and close the device. Idempotent.
    ///
    /// A reader still blocked in the device after [`READER_JOIN_TIMEOUT`]
    /// is abandoned.
    pub fn stop(&self) {
        let Some(transport) = lock(&self.transport).take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        transport.close();

        if let Some(handle) = lock(&self.reader).take() {
            let deadline = Instant::now() + READER_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!(channel = %self.name, "Reader thread panicked");
                }
            } else {
                warn!(
                    channel = %self.name,
                    timeout_ms = READER_JOIN_TIMEOUT.as_millis() as u64,
                    "Reader did not exit in time; abandoning it"
                );
            }
        }

        let stats = self.buffer_stats();
        info!(channel = %self.name, lines = stats.total_pushed, "Channel stopped");
    }
}

impl Drop for LineChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LineChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineChannel")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ReaderContext {
    name: String,
    transport: Arc<dyn Transport>,
    buffer: Arc<Mutex<RingBuffer<LineRecord>>>,
    log: Arc<SessionLog>,
    shutdown: Arc<AtomicBool>,
}

impl ReaderContext {
    fn run(self) {
        let mut decoder = LineDecoder::new();
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];

        while !self.shutdown.load(Ordering::Acquire) {
            match self.transport.read_chunk(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    for line in decoder.push(&chunk[..n]) {
                        self.append(line);
                    }
                }
                Err(e) => {
                    warn!(channel = %self.name, error = %e, "Read error");
                    std::thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }

        if let Some(tail) = decoder.finish() {
            self.append(tail);
        }
        debug!(channel = %self.name, "Reader exited");
    }

    fn append(&self, text: String) {
        let at = Local::now();
        self.log.write(&self.name, at, "", &text);
        let mut buffer = lock(&self.buffer);
        let seq = buffer.mark() + 1;
        buffer.push(LineRecord { seq, at, text });
    }
}
