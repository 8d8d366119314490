//! Run summary and stop reasons.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Why the endurance loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `max_cycles` reached
    Completed,
    /// Fault policy decided to stop
    FaultDetected,
    /// Ctrl-C or another external interrupt
    UserInterrupt,
    /// A required channel could not be opened
    ChannelFailure,
}

impl StopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::FaultDetected => "fault_detected",
            Self::UserInterrupt => "user_interrupt",
            Self::ChannelFailure => "channel_failure",
        }
    }

    /// Process exit code the CLI reports for this reason.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::ChannelFailure => 1,
            Self::FaultDetected => 2,
            Self::UserInterrupt => 130,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final counters of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub duration_secs: u64,
    pub cycles_completed: u64,
    pub faults_detected: u64,
    pub stop_reason: StopReason,
}

impl RunSummary {
    #[must_use]
    pub fn new(
        started_at: DateTime<Local>,
        ended_at: DateTime<Local>,
        cycles_completed: u64,
        faults_detected: u64,
        stop_reason: StopReason,
    ) -> Self {
        let duration_secs = (ended_at - started_at).num_seconds().max(0) as u64;
        Self {
            started_at,
            ended_at,
            duration_secs,
            cycles_completed,
            faults_detected,
            stop_reason,
        }
    }

    /// `HH:MM:SS`; hours grow past 99 on very long runs.
    #[must_use]
    pub fn duration_hms(&self) -> String {
        let hh = self.duration_secs / 3600;
        let mm = (self.duration_secs % 3600) / 60;
        let ss = self.duration_secs % 60;
        format!("{hh:02}:{mm:02}:{ss:02}")
    }

    #[must_use]
    pub fn render_text(&self) -> String {
        let ts = "%Y-%m-%d %H:%M:%S";
        let mut out = String::from("===== TEST SUMMARY =====\n");
        out.push_str(&format!("Start time : {}\n", self.started_at.format(ts)));
        out.push_str(&format!("End time   : {}\n", self.ended_at.format(ts)));
        out.push_str(&format!("Duration   : {}\n", self.duration_hms()));
        out.push_str(&format!("Cycles done: {}\n", self.cycles_completed));
        out.push_str(&format!("Faults     : {}\n", self.faults_detected));
        out.push_str(&format!("Stop reason: {}\n", self.stop_reason));
        out.push_str("========================\n");
        out
    }

    /// Write `summary.txt` and `summary.json`.
    pub fn persist(&self, text_path: &Path, json_path: &Path) -> Result<()> {
        std::fs::write(text_path, self.render_text())?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(json_path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary(secs: i64, reason: StopReason) -> RunSummary {
        let start = Local.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap();
        RunSummary::new(start, start + chrono::TimeDelta::seconds(secs), 12, 1, reason)
    }

    #[test]
    fn duration_formats_as_hms() {
        assert_eq!(summary(3 * 3600 + 4 * 60 + 5, StopReason::Completed).duration_hms(), "03:04:05");
        assert_eq!(summary(0, StopReason::Completed).duration_hms(), "00:00:00");
    }

    #[test]
    fn text_layout() {
        let text = summary(61, StopReason::UserInterrupt).render_text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "===== TEST SUMMARY =====");
        assert_eq!(lines[1], "Start time : 2026-10-16 08:00:00");
        assert_eq!(lines[3], "Duration   : 00:01:01");
        assert_eq!(lines[4], "Cycles done: 12");
        assert_eq!(lines[5], "Faults     : 1");
        assert_eq!(lines[6], "Stop reason: user_interrupt");
        assert_eq!(lines[7], "========================");
    }

    #[test]
    fn clock_going_backwards_clamps_to_zero() {
        assert_eq!(summary(-5, StopReason::Completed).duration_secs, 0);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(StopReason::Completed.exit_code(), 0);
        assert_eq!(StopReason::ChannelFailure.exit_code(), 1);
        assert_eq!(StopReason::FaultDetected.exit_code(), 2);
        assert_eq!(StopReason::UserInterrupt.exit_code(), 130);
    }

    #[test]
    fn persist_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("summary.txt");
        let json = dir.path().join("summary.json");
        summary(10, StopReason::FaultDetected).persist(&txt, &json).unwrap();

        assert!(std::fs::read_to_string(&txt).unwrap().contains("fault_detected"));
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(value["stop_reason"], "fault_detected");
        assert_eq!(value["cycles_completed"], 12);
    }
}
