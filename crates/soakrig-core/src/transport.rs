//! Physical line abstraction.
//!
//! A [`LineChannel`](crate::channel::LineChannel) never talks to a device
//! directly; it goes through a [`Transport`]. Production code uses
//! [`SerialTransport`] on top of `serial2`; tests and dry runs use
//! [`ScriptedTransport`], an in-memory console whose replies come from a
//! responder closure.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use serial2::SerialPort;

use crate::config::ChannelConfig;

/// Byte-level access to one console.
///
/// Both methods take `&self`: the reader thread blocks in `read_chunk`
/// while the control task writes commands.
pub trait Transport: Send + Sync {
    /// Read available bytes, waiting at most the configured read timeout.
    ///
    /// `Ok(0)` means nothing arrived before the timeout.
    fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer as one unit.
    fn write_all(&self, data: &[u8]) -> io::Result<()>;

    /// Release the device early. Implementations that close on drop can
    /// leave this empty.
    fn close(&self) {}
}

/// Opens transports for configured channels.
pub trait TransportFactory: Send + Sync {
    fn open(
        &self,
        channel: &ChannelConfig,
        baud: u32,
        read_timeout: Duration,
    ) -> io::Result<Arc<dyn Transport>>;
}

// =============================================================================
// Serial
// =============================================================================

/// A real serial port.
pub struct SerialTransport {
    port: SerialPort,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud: u32, read_timeout: Duration) -> io::Result<Self> {
        let path = resolve_port_path(port_name);
        let mut port = SerialPort::open(&path, baud)?;
        port.set_read_timeout(read_timeout)?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }
}

/// Production factory: every channel is a serial port.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialFactory;

impl TransportFactory for SerialFactory {
    fn open(
        &self,
        channel: &ChannelConfig,
        baud: u32,
        read_timeout: Duration,
    ) -> io::Result<Arc<dyn Transport>> {
        let transport = SerialTransport::open(&channel.port, baud, read_timeout)?;
        Ok(Arc::new(transport))
    }
}

/// Map a configured port name to the device path `serial2` opens.
///
/// On POSIX a bare name like `ttyUSB0` means `/dev/ttyUSB0`. Windows names
/// (`COM13`) are passed through.
#[must_use]
pub fn resolve_port_path(port: &str) -> String {
    if cfg!(unix) && !port.contains('/') {
        format!("/dev/{port}")
    } else {
        port.to_string()
    }
}

/// Serial devices visible to this host.
pub fn available_ports() -> io::Result<Vec<PathBuf>> {
    let mut ports = SerialPort::available_ports()?;
    ports.sort();
    Ok(ports)
}

// =============================================================================
// Scripted
// =============================================================================

type Responder = dyn Fn(&str) -> Vec<String> + Send + Sync;

#[derive(Default)]
struct Inbound {
    bytes: VecDeque<u8>,
}

/// In-memory console.
///
/// Each CR-terminated command written to it is recorded and passed to the
/// responder; the returned lines are queued as `\r\n`-terminated output for
/// the reader. Extra chatter can be injected at any time.
pub struct ScriptedTransport {
    inbound: Mutex<Inbound>,
    ready: Condvar,
    pending_write: Mutex<Vec<u8>>,
    sent: Mutex<Vec<String>>,
    responder: Box<Responder>,
    read_timeout: Duration,
    echo: AtomicBool,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

impl ScriptedTransport {
    /// A console that answers every command with the responder's lines.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            inbound: Mutex::new(Inbound::default()),
            ready: Condvar::new(),
            pending_write: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            read_timeout: Duration::from_millis(20),
            echo: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// A console that never answers.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Echo each command back before its reply, like an interactive shell.
    #[must_use]
    pub fn with_echo(self, echo: bool) -> Self {
        self.echo.store(echo, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Make every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Queue raw console output as if the device had printed it.
    pub fn inject(&self, text: &str) {
        let mut inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        inbound.bytes.extend(text.as_bytes());
        self.ready.notify_all();
    }

    /// Queue one line of console output.
    pub fn inject_line(&self, line: &str) {
        self.inject(&format!("{line}\r\n"));
    }

    /// Commands received so far, terminator removed.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn handle_command(&self, command: String) {
        let mut reply = Vec::new();
        if self.echo.load(Ordering::Relaxed) {
            reply.push(command.clone());
        }
        reply.extend((self.responder)(&command));
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
        for line in reply {
            self.inject_line(&line);
        }
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("read_timeout", &self.read_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Transport for ScriptedTransport {
    fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        let inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut inbound, _) = self
            .ready
            .wait_timeout_while(inbound, self.read_timeout, |i| {
                i.bytes.is_empty() && !self.closed.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);

        let n = buf.len().min(inbound.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }

        let commands = {
            let mut pending = self
                .pending_write
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.extend_from_slice(data);
            let mut commands = Vec::new();
            while let Some(pos) = pending.iter().position(|&b| b == b'\r' || b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&raw[..pos]).to_string();
                if !text.is_empty() {
                    commands.push(text);
                }
            }
            commands
        };

        for command in commands {
            self.handle_command(command);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_all();
    }
}

/// Factory handing out pre-built scripted consoles by channel name.
///
/// Channels without a registered console fail to open with `NotFound`,
/// which is how tests model an unplugged adapter.
#[derive(Default)]
pub struct ScriptedFactory {
    consoles: HashMap<String, Arc<ScriptedTransport>>,
}

impl ScriptedFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_console(mut self, name: &str, console: Arc<ScriptedTransport>) -> Self {
        self.consoles.insert(name.to_string(), console);
        self
    }
}

impl TransportFactory for ScriptedFactory {
    fn open(
        &self,
        channel: &ChannelConfig,
        _baud: u32,
        _read_timeout: Duration,
    ) -> io::Result<Arc<dyn Transport>> {
        match self.consoles.get(&channel.name) {
            Some(console) => {
                let transport: Arc<dyn Transport> = console.clone();
                Ok(transport)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device: {}", resolve_port_path(&channel.port)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(t: &ScriptedTransport) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = t.read_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn resolves_bare_posix_names() {
        if cfg!(unix) {
            assert_eq!(resolve_port_path("ttyUSB0"), "/dev/ttyUSB0");
        }
        assert_eq!(resolve_port_path("/dev/ttyACM1"), "/dev/ttyACM1");
    }

    #[test]
    fn scripted_replies_per_command() {
        let t = ScriptedTransport::new(|cmd| vec![format!("got {cmd}")]);
        t.write_all(b"one\rtwo\r").unwrap();
        assert_eq!(t.sent(), vec!["one", "two"]);
        assert_eq!(read_all(&t), "got one\r\ngot two\r\n");
    }

    #[test]
    fn command_split_across_writes() {
        let t = ScriptedTransport::silent();
        t.write_all(b"ec").unwrap();
        assert!(t.sent().is_empty());
        t.write_all(b"ho hi\r").unwrap();
        assert_eq!(t.sent(), vec!["echo hi"]);
    }

    #[test]
    fn echo_precedes_reply() {
        let t = ScriptedTransport::new(|_| vec!["ok".to_string()]).with_echo(true);
        t.write_all(b"ls\r").unwrap();
        assert_eq!(read_all(&t), "ls\r\nok\r\n");
    }

    #[test]
    fn read_times_out_with_zero() {
        let t = ScriptedTransport::silent().with_read_timeout(Duration::from_millis(5));
        let mut buf = [0u8; 8];
        assert_eq!(t.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn closed_transport_rejects_writes() {
        let t = ScriptedTransport::silent();
        t.close();
        let err = t.write_all(b"x\r").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn factory_reports_missing_console() {
        let factory = ScriptedFactory::new().with_console("QNX", Arc::new(ScriptedTransport::silent()));
        let qnx = ChannelConfig {
            name: "QNX".to_string(),
            port: "COM13".to_string(),
            baud: None,
            required: false,
        };
        let sail = ChannelConfig {
            name: "SAIL".to_string(),
            ..qnx.clone()
        };
        assert!(factory.open(&qnx, 115_200, Duration::from_millis(10)).is_ok());
        let err = factory
            .open(&sail, 115_200, Duration::from_millis(10))
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
