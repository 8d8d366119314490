//! Typed harness configuration (soakrig.toml).
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys
//! it changes. [`HarnessConfig::load`] parses and validates in one step; the
//! rest of the crate never looks at untyped values.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV_VAR: &str = "SOAKRIG_CONFIG";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// What the cycle loop does after a fault has been detected and its
/// artifacts collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Stop right after the faulting cycle.
    Halt,
    /// Count the fault and keep cycling.
    Continue,
    /// Keep the consoles recording for `post_fault_wait_secs`, then stop.
    #[default]
    HaltAfterDelay,
}

impl fmt::Display for FaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halt => write!(f, "halt"),
            Self::Continue => write!(f, "continue"),
            Self::HaltAfterDelay => write!(f, "halt_after_delay"),
        }
    }
}

impl FromStr for FaultPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "halt" => Ok(Self::Halt),
            "continue" => Ok(Self::Continue),
            "halt_after_delay" => Ok(Self::HaltAfterDelay),
            _ => Err(format!(
                "unknown fault policy: {s}. Expected halt, continue or halt_after_delay"
            )),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub log: LogConfig,
    pub run: RunConfig,
    pub serial: SerialConfig,
    pub console: ConsoleConfig,
    pub fault: FaultConfig,
    pub features: FeatureToggles,
    pub snapshot: SnapshotConfig,
    pub ui_action: UiActionConfig,
}

/// Loop pacing and output location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Directory under which `logs_<MMDD_HHMMSS>` is created
    pub output_root: PathBuf,
    /// Sleep between cycles
    pub post_cycle_wait_secs: u64,
    /// Stop with reason `completed` after this many cycles (unset = unbounded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            post_cycle_wait_secs: 10,
            max_cycles: None,
        }
    }
}

/// One serial console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub port: String,
    /// Overrides `serial.baud` for this channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud: Option<u32>,
    /// A required channel that fails to open stops the run with
    /// `channel_failure` instead of degrading.
    #[serde(default)]
    pub required: bool,
}

impl ChannelConfig {
    fn new(name: &str, port: &str) -> Self {
        Self {
            name: name.to_string(),
            port: port.to_string(),
            baud: None,
            required: false,
        }
    }
}

/// Serial line settings shared by all channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud: u32,
    pub read_timeout_ms: u64,
    /// Ring buffer capacity in lines, per channel
    pub buffer_capacity: usize,
    pub channels: Vec<ChannelConfig>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            read_timeout_ms: 1000,
            buffer_capacity: 2000,
            channels: vec![
                ChannelConfig::new("UCOM", "COM22"),
                ChannelConfig::new("QNX", "COM13"),
                ChannelConfig::new("SAIL", "COM3"),
                ChannelConfig::new("ANDROID", "COM12"),
            ],
        }
    }
}

impl SerialConfig {
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Effective baud rate for a channel
    #[must_use]
    pub fn baud_for(&self, channel: &ChannelConfig) -> u32 {
        channel.baud.unwrap_or(self.baud)
    }
}

/// The real-time-domain console that answers probes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Name of the channel used for probes and artifact pulls
    pub channel: String,
    /// Sent once at startup, one command per write
    pub init_commands: Vec<String>,
    /// Payload lines starting with this prefix are dropped from artifacts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_prefix: Option<String>,
    pub exists_timeout_secs: u64,
    pub capture_idle_timeout_secs: u64,
    pub pull_idle_timeout_secs: u64,
    pub listing_timeout_secs: u64,
    pub core_confirm_timeout_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            channel: "QNX".to_string(),
            init_commands: vec![
                "echo apibtdump > /dev/displaylog0".to_string(),
                "echo apibtdump > /dev/displaylog1".to_string(),
            ],
            noise_prefix: Some("[NSLog]".to_string()),
            exists_timeout_secs: 5,
            capture_idle_timeout_secs: 12,
            pull_idle_timeout_secs: 10,
            listing_timeout_secs: 8,
            core_confirm_timeout_secs: 5,
        }
    }
}

impl ConsoleConfig {
    #[must_use]
    pub fn exists_timeout(&self) -> Duration {
        Duration::from_secs(self.exists_timeout_secs)
    }

    #[must_use]
    pub fn capture_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_idle_timeout_secs)
    }

    #[must_use]
    pub fn pull_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_idle_timeout_secs)
    }

    #[must_use]
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    #[must_use]
    pub fn core_confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.core_confirm_timeout_secs)
    }
}

/// Fault indicators and what to do about them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Remote files whose presence means a fault
    pub monitored_files: Vec<String>,
    /// Binary core artifact: copied on the remote side, never pulled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_path: Option<String>,
    pub core_dest: String,
    /// Directories listed to the console when artifacts are processed
    pub listing_paths: Vec<String>,
    /// Diagnostic dump command sent when a fault is detected
    pub diagnostic_command: String,
    pub diagnostic_settle_secs: u64,
    pub policy: FaultPolicy,
    /// Used by `halt_after_delay`
    pub post_fault_wait_secs: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            monitored_files: vec![
                "/var/log/display_smmu_fault_info.txt".to_string(),
                "/var/log/postmortem_smmu.txt".to_string(),
                "/var/log/openwfd_server-QM.core".to_string(),
            ],
            core_path: Some("/var/log/openwfd_server-QM.core".to_string()),
            core_dest: "/data/".to_string(),
            listing_paths: vec![
                "/var/log".to_string(),
                "/var/data".to_string(),
                "/dev/shmem/".to_string(),
            ],
            diagnostic_command: "echo surfacedump=0xFF > /dev/displaylog".to_string(),
            diagnostic_settle_secs: 1,
            policy: FaultPolicy::default(),
            post_fault_wait_secs: 80,
        }
    }
}

/// Feature switches for the artifact pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub collect_memory_snapshot: bool,
    pub pull_fault_files: bool,
    pub copy_core: bool,
    pub print_listings: bool,
    pub diagnostic_dump_on_fault: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            collect_memory_snapshot: true,
            pull_fault_files: true,
            copy_core: true,
            print_listings: true,
            diagnostic_dump_on_fault: true,
        }
    }
}

/// Memory snapshot commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub full_command: String,
    pub summary_command: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            full_command: "showmem".to_string(),
            summary_command: "showmem -s".to_string(),
        }
    }
}

/// One external command in the UI action sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiStep {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub delay_after_ms: u64,
}

/// External UI action collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiActionConfig {
    /// Per-step timeout
    pub timeout_secs: u64,
    pub steps: Vec<UiStep>,
}

impl Default for UiActionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            steps: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }

    /// Reject configurations the harness cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(ConfigError::ValidationError(msg).into()) };

        if let Err(msg) = self.log.level.parse::<crate::logging::LogLevel>() {
            return invalid(msg);
        }
        if self.run.max_cycles == Some(0) {
            return invalid(
                "run.max_cycles must be > 0 (omit it to run until stopped)".to_string(),
            );
        }
        if self.serial.baud == 0 {
            return invalid("serial.baud must be > 0".to_string());
        }
        if self.serial.buffer_capacity == 0 {
            return invalid("serial.buffer_capacity must be > 0".to_string());
        }
        if self.serial.channels.is_empty() {
            return invalid("serial.channels must list at least one channel".to_string());
        }

        let mut seen = HashSet::new();
        for channel in &self.serial.channels {
            if channel.name.trim().is_empty() || channel.port.trim().is_empty() {
                return invalid("every channel needs a name and a port".to_string());
            }
            if channel.baud == Some(0) {
                return invalid(format!("channel {} has baud 0", channel.name));
            }
            if !seen.insert(channel.name.as_str()) {
                return invalid(format!("duplicate channel name: {}", channel.name));
            }
        }

        if !seen.contains(self.console.channel.as_str()) {
            return invalid(format!(
                "console.channel {} does not name a configured channel",
                self.console.channel
            ));
        }

        if let Some(core) = &self.fault.core_path {
            if !self.fault.monitored_files.iter().any(|p| p == core) {
                return invalid(format!(
                    "fault.core_path {core} must also appear in fault.monitored_files"
                ));
            }
        }
        if self.fault.monitored_files.iter().any(|p| p.trim().is_empty()) {
            return invalid("fault.monitored_files contains an empty path".to_string());
        }

        if self.ui_action.steps.iter().any(|s| s.program.trim().is_empty()) {
            return invalid("ui_action.steps entries need a program".to_string());
        }

        Ok(())
    }

    /// Configuration of the probe console, if it is configured.
    #[must_use]
    pub fn console_channel(&self) -> Option<&ChannelConfig> {
        self.serial
            .channels
            .iter()
            .find(|c| c.name == self.console.channel)
    }
}

/// Resolve the config path from an explicit flag or `SOAKRIG_CONFIG`.
#[must_use]
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    std::env::var_os(CONFIG_ENV_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
