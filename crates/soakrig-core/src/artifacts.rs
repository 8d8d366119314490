//! Per-run directory layout.
//!
//! ```text
//! <output_root>/logs_<MMDD_HHMMSS>/
//!     log_<CHANNEL>_<MMDD_HHMMSS>.txt   one per channel
//!     testflow.log                      unified event/console log
//!     fault_files/                      pulled text artifacts
//!     showmem/  showmem_s/              memory snapshots
//!     summary.txt  summary.json
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Host timestamp format used in directory and file names.
pub const FILE_TS_FORMAT: &str = "%m%d_%H%M%S";

/// Which snapshot a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotLabel {
    /// Taken once at startup
    Init,
    /// Taken while processing artifacts for a cycle
    Cycle { index: u64, fault: bool },
}

impl SnapshotLabel {
    /// `init` or `cycle0003_error`
    #[must_use]
    pub fn suffix(&self) -> String {
        match self {
            Self::Init => "init".to_string(),
            Self::Cycle { index, fault } => {
                let flag = if *fault { "error" } else { "ok" };
                format!("cycle{index:04}_{flag}")
            }
        }
    }
}

/// Paths of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
    stamp: String,
}

impl RunLayout {
    /// Layout for a run started at `started`, without touching the disk.
    #[must_use]
    pub fn new(output_root: &Path, started: DateTime<Local>) -> Self {
        let stamp = started.format(FILE_TS_FORMAT).to_string();
        Self {
            root: output_root.join(format!("logs_{stamp}")),
            stamp,
        }
    }

    /// Create the run directory and its subdirectories.
    pub fn create(output_root: &Path, started: DateTime<Local>) -> io::Result<Self> {
        let layout = Self::new(output_root, started);
        for dir in [
            layout.root.clone(),
            layout.fault_dir(),
            layout.showmem_dir(),
            layout.showmem_summary_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(layout)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn fault_dir(&self) -> PathBuf {
        self.root.join("fault_files")
    }

    #[must_use]
    pub fn showmem_dir(&self) -> PathBuf {
        self.root.join("showmem")
    }

    #[must_use]
    pub fn showmem_summary_dir(&self) -> PathBuf {
        self.root.join("showmem_s")
    }

    #[must_use]
    pub fn session_log(&self, channel: &str) -> PathBuf {
        self.root.join(format!("log_{channel}_{}.txt", self.stamp))
    }

    #[must_use]
    pub fn event_log(&self) -> PathBuf {
        self.root.join("testflow.log")
    }

    #[must_use]
    pub fn summary_text(&self) -> PathBuf {
        self.root.join("summary.txt")
    }

    #[must_use]
    pub fn summary_json(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    /// Local file for a pulled remote artifact, named by remote basename.
    #[must_use]
    pub fn fault_file(&self, remote: &str) -> PathBuf {
        self.fault_dir().join(remote_basename(remote))
    }

    /// Full and summary snapshot destinations, named
    /// `<kind>_<MMDD_HHMMSS>_<suffix>.txt`.
    #[must_use]
    pub fn snapshot_files(&self, taken: DateTime<Local>, label: SnapshotLabel) -> SnapshotFiles {
        let ts = taken.format(FILE_TS_FORMAT);
        let suffix = label.suffix();
        SnapshotFiles {
            full: self.showmem_dir().join(format!("showmem_{ts}_{suffix}.txt")),
            summary: self
                .showmem_summary_dir()
                .join(format!("showmem_s_{ts}_{suffix}.txt")),
        }
    }
}

/// Destinations of one snapshot pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFiles {
    pub full: PathBuf,
    pub summary: PathBuf,
}

/// Last component of a remote POSIX path.
///
/// Paths are remote, so host separators play no part. A path with no usable
/// basename is flattened instead.
#[must_use]
pub fn remote_basename(remote: &str) -> String {
    let trimmed = remote.trim().trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name.to_string(),
        _ => {
            let flat: String = remote
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
                .collect();
            format!("remote{flat}")
        }
    }
}
