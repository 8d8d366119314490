//! Error types for soakrig-core

use std::fmt::Write;
use std::path::PathBuf;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
    /// Optional platform hint (e.g., "Windows", "Linux")
    pub platform: Option<String>,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command without a platform hint
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
            platform: None,
        });
        self
    }

    /// Add a command with a platform hint
    #[must_use]
    pub fn platform_command(
        mut self,
        label: impl Into<String>,
        command: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
            platform: Some(platform.into()),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let label = cmd.platform.as_ref().map_or_else(
                    || cmd.label.clone(),
                    |platform| format!("{} ({platform})", cmd.label),
                );
                let _ = writeln!(output, "    - {label}: {}", cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for soakrig-core
#[derive(Error, Debug)]
pub enum Error {
    /// Serial channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Probe protocol errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (external collaborator failures, task joins, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Channel(err) => Some(err.remediation()),
            Self::Probe(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Check output root", "ls -ld .")
                    .alternative("Pass --output-dir pointing at a writable directory."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Serializing the run summary failed; the text summary is still written.")
                    .command("Inspect summary", "cat logs_*/summary.txt")
                    .alternative("Check the disk is not full."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Retry the command; check testflow.log for the failing step.")
                    .command("Tail event log", "tail -n 50 logs_*/testflow.log")
                    .alternative("Run with RUST_LOG=soakrig_core=debug for more detail."),
            ),
        }
    }
}

/// Serial channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The device could not be opened
    #[error("Failed to open {name} on {port}: {source}")]
    OpenFailed {
        name: String,
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// A command was sent on a channel that is not open
    #[error("Channel {0} is not open")]
    NotOpen(String),

    /// Writing a command to the device failed
    #[error("Write to {name} failed: {reason}")]
    WriteFailed { name: String, reason: String },

    /// The background reader could not be started
    #[error("Failed to start reader for {name}: {reason}")]
    ReaderSpawn { name: String, reason: String },
}

impl ChannelError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::OpenFailed { port, .. } => Remediation::new(format!(
                "Verify {port} exists and is not held by another terminal program."
            ))
            .command("List serial ports", "soakrig ports")
            .platform_command("Check device", format!("ls -l {port}"), "Linux")
            .platform_command("Check device", "mode", "Windows")
            .alternative("Update the port name under [serial.channels] and retry."),
            Self::NotOpen(name) => Remediation::new(format!(
                "Channel {name} was never opened; features depending on it are skipped."
            ))
            .command("List serial ports", "soakrig ports")
            .alternative("Fix the port assignment in the config file."),
            Self::WriteFailed { .. } => Remediation::new(
                "The console rejected a write. Check the cable and USB-serial adapter.",
            )
            .command("List serial ports", "soakrig ports")
            .alternative("Power-cycle the adapter and restart the run."),
            Self::ReaderSpawn { .. } => {
                Remediation::new("The reader thread could not be started. Check system limits.")
                    .command("Thread limit", "ulimit -u")
                    .alternative("Close other serial monitors and retry.")
            }
        }
    }
}

/// Probe protocol errors
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The probe command never reached the console
    #[error("Probe command could not be sent on {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    /// Captured payload could not be written to the local artifact
    #[error("Failed to write artifact {}: {source}", .path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProbeError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::SendFailed { .. } => {
                Remediation::new("The console channel is down; reopen it and retry the probe.")
                    .command("List serial ports", "soakrig ports")
                    .alternative("Check the channel's session log for read errors.")
            }
            Self::ArtifactWrite { path, .. } => Remediation::new(format!(
                "Make sure {} is writable.",
                path.display()
            ))
            .command("Check directory", "ls -ld logs_*/fault_files")
            .alternative("Free disk space or choose another --output-dir."),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config or set SOAKRIG_CONFIG to the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the syntax and retry.")
                .command("Print defaults", "soakrig default-config")
                .alternative("Compare against the default config layout."),
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
                    .command("Print defaults", "soakrig default-config")
                    .alternative("Recreate the config from known-good defaults.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Validate", "soakrig check-config --config soakrig.toml")
                    .alternative("Review the validation message and adjust the file.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
