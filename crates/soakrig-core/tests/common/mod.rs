//! Fake remote shell for integration tests.
//!
//! Understands exactly the command shapes the probe layer emits and answers
//! them from an in-memory filesystem. Wrap it in a scripted console with
//! [`FakeShell::console`]; the console echoes every command first, the way a
//! real interactive shell does.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use soakrig_core::channel::{ChannelSettings, LineChannel};
use soakrig_core::config::{ChannelConfig, HarnessConfig, UiActionConfig};
use soakrig_core::probe::{ProbeClient, ProbeTimeouts};
use soakrig_core::transport::ScriptedTransport;

static EXISTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^if ls "(.+?)" >/dev/null 2>&1; then echo "__EXISTS__ (.+?)"; else echo "__MISSING__ (.+?)"; fi$"#,
    )
    .unwrap()
});
static GUARDED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^if ls "(.+?)" >/dev/null 2>&1; then echo "__BEGIN__ (.+?)"; (.*); echo "__END__ (.+?)"; else echo "__MISSING__ (.+?)"; fi$"#,
    )
    .unwrap()
});
static UNGUARDED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^echo "__BEGIN__ (.+?)"; (.*); echo "__END__ (.+?)"$"#).unwrap()
});
static CORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^if ls "(.+?)" >/dev/null 2>&1; then cp "(.+?)" "(.+?)" && echo "__CORE_COPIED__"; else echo "__CORE_MISSING__"; fi$"#,
    )
    .unwrap()
});
static CAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^cat "(.+?)"; echo$"#).unwrap());
static LS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^ls -la "(.+?)"$"#).unwrap());

#[derive(Default)]
struct ShellState {
    files: BTreeMap<String, Vec<String>>,
    dirs: BTreeSet<String>,
    outputs: HashMap<String, Vec<String>>,
    lose_end_for: HashSet<String>,
    ignore_exists_for: HashSet<String>,
    chatter: Vec<String>,
    copies: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct FakeShell {
    state: Arc<Mutex<ShellState>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, lines: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), lines.iter().map(ToString::to_string).collect());
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.state.lock().unwrap().dirs.insert(path.to_string());
        self
    }

    /// Output lines of a plain command such as `showmem`.
    pub fn with_output(self, command: &str, lines: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .outputs
            .insert(command.to_string(), lines.iter().map(ToString::to_string).collect());
        self
    }

    /// Captures of `command` print BEGIN and payload but never END.
    pub fn losing_end_for(self, command: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .lose_end_for
            .insert(command.to_string());
        self
    }

    /// Existence probes for `path` get no answer at all.
    pub fn ignoring_exists_for(self, path: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .ignore_exists_for
            .insert(path.to_string());
        self
    }

    /// Unrelated console output printed before every reply.
    pub fn with_chatter(self, line: &str) -> Self {
        self.state.lock().unwrap().chatter.push(line.to_string());
        self
    }

    pub fn copies(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().copies.clone()
    }

    pub fn console(&self) -> Arc<ScriptedTransport> {
        let shell = self.clone();
        Arc::new(ScriptedTransport::new(move |cmd| shell.respond(cmd)).with_echo(true))
    }

    fn exists(state: &ShellState, path: &str) -> bool {
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn run_inner(state: &ShellState, command: &str) -> Vec<String> {
        if let Some(caps) = CAT_RE.captures(command) {
            return state.files.get(&caps[1]).cloned().unwrap_or_default();
        }
        if let Some(caps) = LS_RE.captures(command) {
            let dir = caps[1].trim_end_matches('/').to_string();
            let mut lines = vec!["total 8".to_string()];
            for name in state.files.keys().filter(|f| f.starts_with(&format!("{dir}/"))) {
                lines.push(format!("-rw-r--r--  1 root root 10 Oct 16 10:00 {name}"));
            }
            return lines;
        }
        state.outputs.get(command).cloned().unwrap_or_default()
    }

    pub fn respond(&self, command: &str) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        let mut out = state.chatter.clone();

        if let Some(caps) = EXISTS_RE.captures(command) {
            let path = &caps[1];
            if state.ignore_exists_for.contains(path) {
                return out;
            }
            if Self::exists(&state, path) {
                out.push(format!("__EXISTS__ {}", &caps[2]));
            } else {
                out.push(format!("__MISSING__ {}", &caps[3]));
            }
        } else if let Some(caps) = CORE_RE.captures(command) {
            if Self::exists(&state, &caps[1]) {
                state.copies.push((caps[2].to_string(), caps[3].to_string()));
                out.push("__CORE_COPIED__".to_string());
            } else {
                out.push("__CORE_MISSING__".to_string());
            }
        } else if let Some(caps) = GUARDED_RE.captures(command) {
            if Self::exists(&state, &caps[1]) {
                out.push(format!("__BEGIN__ {}", &caps[2]));
                out.extend(Self::run_inner(&state, &caps[3]));
                if !state.lose_end_for.contains(&caps[3]) {
                    out.push(format!("__END__ {}", &caps[4]));
                }
            } else {
                out.push(format!("__MISSING__ {}", &caps[5]));
            }
        } else if let Some(caps) = UNGUARDED_RE.captures(command) {
            out.push(format!("__BEGIN__ {}", &caps[1]));
            out.extend(Self::run_inner(&state, &caps[2]));
            if !state.lose_end_for.contains(&caps[2]) {
                out.push(format!("__END__ {}", &caps[3]));
            }
        }
        out
    }
}

pub fn settings() -> ChannelSettings {
    ChannelSettings {
        baud: 115_200,
        read_timeout: Duration::from_millis(20),
        buffer_capacity: 2000,
        session_log: None,
    }
}

pub fn start_channel(console: Arc<ScriptedTransport>) -> Arc<LineChannel> {
    let channel = LineChannel::attach("QNX", "COM13", console, &settings());
    channel.start_reading().unwrap();
    Arc::new(channel)
}

pub fn fast_timeouts() -> ProbeTimeouts {
    ProbeTimeouts {
        exists: Duration::from_millis(800),
        capture_idle: Duration::from_millis(500),
        pull_idle: Duration::from_millis(500),
        listing_idle: Duration::from_millis(500),
        core_confirm: Duration::from_millis(800),
    }
}

pub fn probe_client(shell: &FakeShell) -> (ProbeClient, Arc<ScriptedTransport>) {
    let console = shell.console();
    let channel = start_channel(console.clone());
    (
        ProbeClient::new(channel, fast_timeouts(), Some("[NSLog]".to_string())),
        console,
    )
}

/// Harness config tuned for tests: one QNX channel, no waits, `/a` and `/b`
/// monitored, no core artifact.
pub fn test_config(output_root: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.run.output_root = output_root.to_path_buf();
    config.run.post_cycle_wait_secs = 0;
    config.serial.read_timeout_ms = 20;
    config.serial.channels = vec![
        ChannelConfig {
            name: "QNX".to_string(),
            port: "ttyQNX".to_string(),
            baud: None,
            required: false,
        },
        ChannelConfig {
            name: "UCOM".to_string(),
            port: "ttyUCOM".to_string(),
            baud: None,
            required: false,
        },
    ];
    config.console.exists_timeout_secs = 1;
    config.console.capture_idle_timeout_secs = 1;
    config.console.pull_idle_timeout_secs = 1;
    config.console.listing_timeout_secs = 1;
    config.console.core_confirm_timeout_secs = 1;
    config.fault.monitored_files = vec!["/a".to_string(), "/b".to_string()];
    config.fault.core_path = None;
    config.fault.listing_paths = vec!["/var/log".to_string()];
    config.fault.diagnostic_settle_secs = 0;
    config.fault.post_fault_wait_secs = 0;
    config.ui_action = UiActionConfig::default();
    config
}
