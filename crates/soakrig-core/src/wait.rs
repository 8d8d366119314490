//! Polling waiters over a channel's line buffer.
//!
//! The console has no "notify me" primitive, so waiting means looking at the
//! buffer every [`POLL_INTERVAL`] until a line matches or time runs out.
//! Only the calling task sleeps; the reader thread keeps filling the buffer.

use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

use crate::channel::LineChannel;

/// Delay between buffer scans.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The newest matching line
    Matched(String),
    TimedOut,
}

impl WaitOutcome {
    #[must_use]
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Wait until a buffered line matches `pattern`, scanning newest first.
pub async fn wait_for(channel: &LineChannel, pattern: &Regex, timeout: Duration) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(record) = channel.find_newest(|line| pattern.is_match(line)) {
            return WaitOutcome::Matched(record.text);
        }
        if Instant::now() >= deadline {
            return WaitOutcome::TimedOut;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Wait until any of `patterns` matches; reports which one.
///
/// When several patterns match, the one matching the newest line wins.
pub async fn wait_for_any(
    channel: &LineChannel,
    patterns: &[&Regex],
    timeout: Duration,
) -> Option<(usize, String)> {
    let deadline = Instant::now() + timeout;
    loop {
        let hit = channel.find_newest(|line| patterns.iter().any(|p| p.is_match(line)));
        if let Some(record) = hit {
            let index = patterns
                .iter()
                .position(|p| p.is_match(&record.text))
                .unwrap_or_default();
            return Some((index, record.text));
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
