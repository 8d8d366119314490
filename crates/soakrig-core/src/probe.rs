//! Tagged request/response probes over a plain shell console.
//!
//! There is no RPC on the remote side, only a shell. A probe wraps a command
//! in `echo` markers carrying a unique tag, sends it as one line and then
//! reads the channel buffer until a marker with that exact tag shows up:
//!
//! ```text
//! __EXISTS__ <tag>   | __MISSING__ <tag>          existence probe
//! __BEGIN__ <tag>                                  capture
//! <payload lines>
//! __END__ <tag>      (or __MISSING__ <tag> when the guard path is absent)
//! ```
//!
//! Markers only count when the whole trimmed line is the marker, so the
//! console's echo of the command itself (which contains the marker text
//! inside `echo "..."`) never satisfies a probe.
//!
//! Probes assume they are the only one in flight on their channel. The
//! buffer is cleared before each send and only lines received after the
//! send are scanned.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Local;
use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::LineChannel;
use crate::config::ConsoleConfig;
use crate::error::ProbeError;
use crate::logging::CONSOLE_TARGET;
use crate::wait::{POLL_INTERVAL, wait_for_any};

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^__(BEGIN|END|MISSING|EXISTS)__\s+(.+)$").expect("marker regex")
});
static CORE_COPIED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*__CORE_COPIED__\s*$").expect("core copied regex"));
static CORE_MISSING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*__CORE_MISSING__\s*$").expect("core missing regex"));

// =============================================================================
// Marker grammar
// =============================================================================

/// Kind of a tag-qualified marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Begin,
    End,
    Missing,
    Exists,
}

/// A parsed marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker<'a> {
    pub kind: MarkerKind,
    pub tag: &'a str,
}

impl Marker<'_> {
    #[must_use]
    pub fn is(&self, kind: MarkerKind, tag: &str) -> bool {
        self.kind == kind && self.tag == tag
    }
}

/// Parse a console line as a marker. The whole line must be the marker.
#[must_use]
pub fn parse_marker(line: &str) -> Option<Marker<'_>> {
    let caps = MARKER_RE.captures(line.trim())?;
    let kind = match caps.get(1)?.as_str() {
        "BEGIN" => MarkerKind::Begin,
        "END" => MarkerKind::End,
        "MISSING" => MarkerKind::Missing,
        "EXISTS" => MarkerKind::Exists,
        _ => return None,
    };
    let tag = caps.get(2)?.as_str().trim();
    Some(Marker { kind, tag })
}

// =============================================================================
// Command builders
// =============================================================================

/// `ls`-based existence test answering with EXISTS or MISSING.
#[must_use]
pub fn exists_command(path: &str, tag: &str) -> String {
    format!(
        "if ls \"{path}\" >/dev/null 2>&1; then echo \"__EXISTS__ {tag}\"; \
         else echo \"__MISSING__ {tag}\"; fi"
    )
}

/// Wrap `command` in BEGIN/END markers, optionally guarded by a path test.
#[must_use]
pub fn capture_command(tag: &str, command: &str, guard: Option<&str>) -> String {
    match guard {
        Some(path) => format!(
            "if ls \"{path}\" >/dev/null 2>&1; then echo \"__BEGIN__ {tag}\"; {command}; \
             echo \"__END__ {tag}\"; else echo \"__MISSING__ {tag}\"; fi"
        ),
        None => format!("echo \"__BEGIN__ {tag}\"; {command}; echo \"__END__ {tag}\""),
    }
}

/// Dump a remote text file. The trailing `echo` terminates a last line that
/// lacks a newline so END lands on its own line.
#[must_use]
pub fn pull_command(path: &str) -> String {
    format!("cat \"{path}\"; echo")
}

#[must_use]
pub fn listing_command(path: &str) -> String {
    format!("ls -la \"{path}\"")
}

/// Remote-side copy of the core artifact with an untagged confirmation.
#[must_use]
pub fn core_copy_command(core: &str, dest: &str) -> String {
    format!(
        "if ls \"{core}\" >/dev/null 2>&1; then cp \"{core}\" \"{dest}\" && echo \"__CORE_COPIED__\"; \
         else echo \"__CORE_MISSING__\"; fi"
    )
}

// =============================================================================
// Capture parser
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for BEGIN or MISSING
    Searching,
    /// Between BEGIN and END
    Accumulating,
    Done,
}

/// What a fed line did to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStep {
    /// Not ours (chatter, echo, other tags)
    Ignored,
    Opened,
    Payload,
    /// Payload-phase line dropped by the noise filter
    Filtered,
    Missing,
    Closed,
}

impl ParseStep {
    /// Whether the line counts as probe activity for the idle timer.
    #[must_use]
    pub fn is_activity(self) -> bool {
        matches!(self, Self::Opened | Self::Payload | Self::Filtered)
    }
}

/// Searching/accumulating state machine for one capture.
#[derive(Debug, Clone)]
pub struct CaptureParser {
    tag: String,
    noise_prefix: Option<String>,
    state: ParserState,
    payload: Vec<String>,
}

impl CaptureParser {
    #[must_use]
    pub fn new(tag: &str, noise_prefix: Option<String>) -> Self {
        Self {
            tag: tag.to_string(),
            noise_prefix,
            state: ParserState::Searching,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    #[must_use]
    pub fn payload(&self) -> &[String] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<String> {
        self.payload
    }

    pub fn feed(&mut self, line: &str) -> ParseStep {
        match self.state {
            ParserState::Searching => match parse_marker(line) {
                Some(m) if m.is(MarkerKind::Missing, &self.tag) => {
                    self.state = ParserState::Done;
                    ParseStep::Missing
                }
                Some(m) if m.is(MarkerKind::Begin, &self.tag) => {
                    self.state = ParserState::Accumulating;
                    ParseStep::Opened
                }
                _ => ParseStep::Ignored,
            },
            ParserState::Accumulating => {
                if parse_marker(line).is_some_and(|m| m.is(MarkerKind::End, &self.tag)) {
                    self.state = ParserState::Done;
                    return ParseStep::Closed;
                }
                if self
                    .noise_prefix
                    .as_deref()
                    .is_some_and(|prefix| line.trim_start().starts_with(prefix))
                {
                    return ParseStep::Filtered;
                }
                self.payload.push(line.to_string());
                ParseStep::Payload
            }
            ParserState::Done => ParseStep::Ignored,
        }
    }
}

// =============================================================================
// Requests and outcomes
// =============================================================================

/// Where captured payload goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDestination {
    File(PathBuf),
    /// Emit each payload line on the console log target
    Console,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub tag: String,
    pub command: String,
    pub destination: CaptureDestination,
    pub idle_timeout: Duration,
    /// Only run `command` if this remote path exists
    pub guard: Option<String>,
}

/// How a capture ended. Send and write failures are errors instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CaptureOutcome {
    Saved {
        path: PathBuf,
        lines: usize,
    },
    Printed {
        lines: usize,
    },
    /// The guard path did not exist
    Absent,
    /// The console went quiet before END
    TimedOut {
        partial_lines: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        salvaged: Option<PathBuf>,
    },
}

impl CaptureOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Saved { .. } | Self::Printed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistsOutcome {
    Present,
    Absent,
    /// No marker before the deadline, or the probe could not be sent
    Unknown,
}

impl ExistsOutcome {
    /// Unconfirmed counts as absent.
    #[must_use]
    pub fn is_present(self) -> bool {
        self == Self::Present
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreCopyOutcome {
    Copied,
    Missing,
    Unconfirmed,
}

/// Per-probe-shape deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    /// Total wait for an existence marker
    pub exists: Duration,
    /// Idle limits for streamed captures, file pulls and listings
    pub capture_idle: Duration,
    pub pull_idle: Duration,
    pub listing_idle: Duration,
    /// Total wait for the core copy confirmation
    pub core_confirm: Duration,
}

impl From<&ConsoleConfig> for ProbeTimeouts {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            exists: config.exists_timeout(),
            capture_idle: config.capture_idle_timeout(),
            pull_idle: config.pull_idle_timeout(),
            listing_idle: config.listing_timeout(),
            core_confirm: config.core_confirm_timeout(),
        }
    }
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self::from(&ConsoleConfig::default())
    }
}

// =============================================================================
// ProbeClient
// =============================================================================

/// Issues probes on one console channel.
#[derive(Debug)]
pub struct ProbeClient {
    channel: Arc<LineChannel>,
    timeouts: ProbeTimeouts,
    noise_prefix: Option<String>,
    sequence: AtomicU64,
}

impl ProbeClient {
    #[must_use]
    pub fn new(
        channel: Arc<LineChannel>,
        timeouts: ProbeTimeouts,
        noise_prefix: Option<String>,
    ) -> Self {
        Self {
            channel,
            timeouts,
            noise_prefix,
            sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(channel: Arc<LineChannel>, config: &ConsoleConfig) -> Self {
        Self::new(channel, ProbeTimeouts::from(config), config.noise_prefix.clone())
    }

    #[must_use]
    pub fn channel(&self) -> &Arc<LineChannel> {
        &self.channel
    }

    #[must_use]
    pub fn timeouts(&self) -> ProbeTimeouts {
        self.timeouts
    }

    /// Host timestamp plus a per-client counter, e.g. `1016_101010-0007`.
    pub fn next_tag(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n:04}", Local::now().format("%m%d_%H%M%S"))
    }

    /// Clear the buffer and send; returns the cursor replies start after.
    fn issue(&self, command: &str) -> Result<u64, ProbeError> {
        self.channel.clear();
        let cursor = self.channel.cursor();
        self.channel
            .send(command)
            .map_err(|e| ProbeError::SendFailed {
                channel: self.channel.name().to_string(),
                reason: e.to_string(),
            })?;
        Ok(cursor)
    }

    /// Whether `path` exists on the remote side; unconfirmed means no.
    pub async fn exists(&self, path: &str) -> bool {
        self.exists_outcome(path, self.timeouts.exists)
            .await
            .is_present()
    }

    pub async fn exists_outcome(&self, path: &str, timeout: Duration) -> ExistsOutcome {
        let tag = self.next_tag();
        let mut cursor = match self.issue(&exists_command(path, &tag)) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(path, error = %e, "Existence probe not sent");
                return ExistsOutcome::Unknown;
            }
        };

        let deadline = Instant::now() + timeout;
        loop {
            for record in self.channel.lines_since(cursor) {
                cursor = record.seq;
                let Some(marker) = parse_marker(&record.text) else {
                    continue;
                };
                if marker.tag != tag {
                    continue;
                }
                match marker.kind {
                    MarkerKind::Exists => return ExistsOutcome::Present,
                    MarkerKind::Missing => return ExistsOutcome::Absent,
                    MarkerKind::Begin | MarkerKind::End => {}
                }
            }
            if Instant::now() >= deadline {
                warn!(
                    path,
                    %tag,
                    timeout_ms = timeout.as_millis() as u64,
                    "Existence probe unanswered; treating as absent"
                );
                return ExistsOutcome::Unknown;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Run one capture to completion, absence, or idle timeout.
    pub async fn generic_capture(
        &self,
        request: &CaptureRequest,
    ) -> Result<CaptureOutcome, ProbeError> {
        let command = capture_command(&request.tag, &request.command, request.guard.as_deref());
        let mut cursor = self.issue(&command)?;
        let mut parser = CaptureParser::new(&request.tag, self.noise_prefix.clone());
        let mut last_activity = Instant::now();

        loop {
            for record in self.channel.lines_since(cursor) {
                cursor = record.seq;
                match parser.feed(&record.text) {
                    ParseStep::Missing => {
                        info!(tag = %request.tag, path = ?request.guard, "Capture target absent");
                        return Ok(CaptureOutcome::Absent);
                    }
                    ParseStep::Closed => {
                        return self.deliver(request, parser.into_payload()).await;
                    }
                    step if step.is_activity() => last_activity = Instant::now(),
                    _ => {}
                }
            }
            if last_activity.elapsed() > request.idle_timeout {
                return self.salvage(request, parser).await;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Unguarded capture of an open-ended command into a file.
    pub async fn stream_capture(
        &self,
        tag: &str,
        command: &str,
        destination: &Path,
    ) -> Result<CaptureOutcome, ProbeError> {
        self.generic_capture(&CaptureRequest {
            tag: tag.to_string(),
            command: command.to_string(),
            destination: CaptureDestination::File(destination.to_path_buf()),
            idle_timeout: self.timeouts.capture_idle,
            guard: None,
        })
        .await
    }

    /// Copy a remote text file to `destination`.
    pub async fn pull_file(
        &self,
        remote: &str,
        destination: &Path,
    ) -> Result<CaptureOutcome, ProbeError> {
        self.generic_capture(&CaptureRequest {
            tag: self.next_tag(),
            command: pull_command(remote),
            destination: CaptureDestination::File(destination.to_path_buf()),
            idle_timeout: self.timeouts.pull_idle,
            guard: Some(remote.to_string()),
        })
        .await
    }

    /// Print `ls -la <path>` to the console log.
    pub async fn print_listing(&self, path: &str) -> Result<CaptureOutcome, ProbeError> {
        self.generic_capture(&CaptureRequest {
            tag: self.next_tag(),
            command: listing_command(path),
            destination: CaptureDestination::Console,
            idle_timeout: self.timeouts.listing_idle,
            guard: Some(path.to_string()),
        })
        .await
    }

    /// Copy the core artifact on the remote side and wait for confirmation.
    pub async fn copy_core(&self, core: &str, dest: &str) -> Result<CoreCopyOutcome, ProbeError> {
        self.issue(&core_copy_command(core, dest))?;
        let outcome = match wait_for_any(
            &self.channel,
            &[&*CORE_COPIED_RE, &*CORE_MISSING_RE],
            self.timeouts.core_confirm,
        )
        .await
        {
            Some((0, _)) => CoreCopyOutcome::Copied,
            Some(_) => CoreCopyOutcome::Missing,
            None => CoreCopyOutcome::Unconfirmed,
        };
        match outcome {
            CoreCopyOutcome::Copied => info!(core, dest, "Core copied"),
            CoreCopyOutcome::Missing => info!(core, "Core not present; nothing to copy"),
            CoreCopyOutcome::Unconfirmed => warn!(core, dest, "Core copy not confirmed"),
        }
        Ok(outcome)
    }

    async fn deliver(
        &self,
        request: &CaptureRequest,
        payload: Vec<String>,
    ) -> Result<CaptureOutcome, ProbeError> {
        let lines = payload.len();
        match &request.destination {
            CaptureDestination::File(path) => {
                write_payload(path, &payload).await?;
                info!(tag = %request.tag, path = %path.display(), lines, "Capture saved");
                Ok(CaptureOutcome::Saved {
                    path: path.clone(),
                    lines,
                })
            }
            CaptureDestination::Console => {
                emit_to_console(self.channel.name(), &request.tag, &payload);
                debug!(tag = %request.tag, lines, "Capture printed");
                Ok(CaptureOutcome::Printed { lines })
            }
        }
    }

    async fn salvage(
        &self,
        request: &CaptureRequest,
        parser: CaptureParser,
    ) -> Result<CaptureOutcome, ProbeError> {
        let opened = parser.state() == ParserState::Accumulating;
        let payload = parser.into_payload();
        let partial_lines = payload.len();

        if !opened || payload.is_empty() {
            warn!(
                tag = %request.tag,
                timeout_ms = request.idle_timeout.as_millis() as u64,
                "Capture idle timeout"
            );
            return Ok(CaptureOutcome::TimedOut {
                partial_lines,
                salvaged: None,
            });
        }

        let salvaged = match &request.destination {
            CaptureDestination::File(path) => {
                let partial = partial_path(path);
                write_payload(&partial, &payload).await?;
                Some(partial)
            }
            CaptureDestination::Console => {
                emit_to_console(self.channel.name(), &request.tag, &payload);
                None
            }
        };
        warn!(
            tag = %request.tag,
            partial_lines,
            salvaged = ?salvaged,
            "Capture idle timeout before END; kept partial payload"
        );
        Ok(CaptureOutcome::TimedOut {
            partial_lines,
            salvaged,
        })
    }
}

fn emit_to_console(channel: &str, tag: &str, payload: &[String]) {
    for line in payload {
        info!(target: CONSOLE_TARGET, channel, tag, "{line}");
    }
}

/// `<dest>.partial`
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

async fn write_payload(path: &Path, payload: &[String]) -> Result<(), ProbeError> {
    let to_err = |source: std::io::Error| ProbeError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
        }
    }
    let mut content = payload.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    tokio::fs::write(path, content).await.map_err(to_err)
}
