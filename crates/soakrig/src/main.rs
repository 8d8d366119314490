//! soakrig CLI: endurance loop runner for multi-console rigs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use soakrig_core::artifacts::RunLayout;
use soakrig_core::channel::{ChannelSettings, LineChannel};
use soakrig_core::config::{FaultPolicy, HarnessConfig, resolve_config_path};
use soakrig_core::controller::CycleController;
use soakrig_core::error::format_error_with_remediation;
use soakrig_core::logging::{LogConfig, init_logging};
use soakrig_core::probe::ProbeClient;
use soakrig_core::transport::{SerialFactory, available_ports};
use soakrig_core::ui_action::CommandSequence;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "soakrig", version, about = "Serial console endurance loop with fault capture")]
struct Cli {
    /// Config file (defaults apply when neither this nor SOAKRIG_CONFIG is set)
    #[arg(long, short = 'c', global = true, env = "SOAKRIG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the endurance loop until a stop condition
    Run {
        /// Stop with `completed` after this many cycles
        #[arg(long)]
        max_cycles: Option<u64>,

        /// Directory under which the run directory is created
        #[arg(long)]
        output_root: Option<PathBuf>,

        /// halt, continue or halt_after_delay
        #[arg(long)]
        policy: Option<FaultPolicy>,
    },

    /// Fetch remote files over a console without running the loop
    Pull {
        /// Remote paths to fetch
        #[arg(required = true)]
        remote: Vec<String>,

        /// Local directory for the fetched files
        #[arg(long, default_value = ".")]
        dest: PathBuf,

        /// Channel to use (defaults to the probe console)
        #[arg(long)]
        channel: Option<String>,

        /// Override the channel's port
        #[arg(long)]
        port: Option<String>,
    },

    /// List serial devices on this host
    Ports,

    /// Validate the configuration and print the effective settings
    CheckConfig,

    /// Print the default configuration as TOML
    DefaultConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<soakrig_core::Error>() {
                Some(core) => eprintln!("{}", format_error_with_remediation(core)),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::DefaultConfig => {
            print!("{}", HarnessConfig::default().to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckConfig => {
            let (config, source) = load_config(cli.config.as_deref())?;
            println!("Config OK ({source})");
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Ports => {
            let ports = available_ports().context("listing serial ports")?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}", port.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            max_cycles,
            output_root,
            policy,
        } => {
            let (mut config, _) = load_config(cli.config.as_deref())?;
            if max_cycles.is_some() {
                config.run.max_cycles = max_cycles;
            }
            if let Some(root) = output_root {
                config.run.output_root = root;
            }
            if let Some(policy) = policy {
                config.fault.policy = policy;
            }
            if let Some(level) = cli.log_level {
                config.log.level = level;
            }
            config.validate()?;
            runtime()?.block_on(run_loop(config))
        }
        Command::Pull {
            remote,
            dest,
            channel,
            port,
        } => {
            let (mut config, _) = load_config(cli.config.as_deref())?;
            if let Some(level) = cli.log_level {
                config.log.level = level;
            }
            init_logging(&config.log).context("initializing logging")?;
            runtime()?.block_on(pull(&config, &remote, &dest, channel, port))
        }
    }
}

fn load_config(cli_path: Option<&Path>) -> anyhow::Result<(HarnessConfig, String)> {
    let path = resolve_config_path(cli_path);
    let config = HarnessConfig::load_or_default(path.as_deref())?;
    let source = path.map_or_else(|| "defaults".to_string(), |p| p.display().to_string());
    Ok((config, source))
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
}

async fn run_loop(config: HarnessConfig) -> anyhow::Result<ExitCode> {
    let started = Local::now();
    let layout = RunLayout::create(&config.run.output_root, started).with_context(|| {
        format!(
            "creating run directory under {}",
            config.run.output_root.display()
        )
    })?;

    let log = LogConfig {
        file: Some(layout.event_log()),
        ..config.log.clone()
    };
    init_logging(&log).context("initializing logging")?;
    info!(
        run_dir = %layout.root().display(),
        channels = config.serial.channels.len(),
        policy = %config.fault.policy,
        max_cycles = ?config.run.max_cycles,
        "Starting endurance run"
    );

    let action = CommandSequence::from_config(&config.ui_action);
    let mut controller = CycleController::new(
        config,
        layout,
        started,
        Arc::new(SerialFactory),
        Box::new(action),
    );
    let summary = controller.run(shutdown_signal()).await;

    println!("{}", summary.render_text());
    let code = u8::try_from(summary.stop_reason.exit_code()).unwrap_or(1);
    Ok(ExitCode::from(code))
}

/// Resolves on Ctrl-C (or SIGTERM on unix). If no handler can be installed
/// the run is only stopped by its own stop conditions.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Ctrl-C handler failed");
                            std::future::pending::<()>().await;
                        }
                    }
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler failed"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler failed; interrupt disabled");
        std::future::pending::<()>().await;
    }
}

async fn pull(
    config: &HarnessConfig,
    remote: &[String],
    dest: &Path,
    channel: Option<String>,
    port: Option<String>,
) -> anyhow::Result<ExitCode> {
    let name = channel.unwrap_or_else(|| config.console.channel.clone());
    let mut channel_config = config
        .serial
        .channels
        .iter()
        .find(|c| c.name == name)
        .cloned()
        .with_context(|| format!("channel {name} is not configured"))?;
    if let Some(port) = port {
        channel_config.port = port;
    }

    let settings = ChannelSettings {
        baud: config.serial.baud_for(&channel_config),
        read_timeout: config.serial.read_timeout(),
        buffer_capacity: config.serial.buffer_capacity,
        session_log: None,
    };
    let channel = LineChannel::open(&channel_config, &settings, &SerialFactory)
        .map_err(soakrig_core::Error::from)?;
    channel.start_reading().map_err(soakrig_core::Error::from)?;
    let channel = Arc::new(channel);
    let probe = ProbeClient::from_config(Arc::clone(&channel), &config.console);

    let mut fetched = 0usize;
    for path in remote {
        let local = dest.join(soakrig_core::artifacts::remote_basename(path));
        match probe.pull_file(path, &local).await {
            Ok(outcome) if outcome.is_complete() => {
                fetched += 1;
                println!("{path} -> {}", local.display());
            }
            Ok(outcome) => {
                let rendered = serde_json::to_string(&outcome)?;
                println!("{path}: {rendered}");
            }
            Err(e) => {
                let err = soakrig_core::Error::from(e);
                eprintln!("{path}: {}", format_error_with_remediation(&err));
            }
        }
    }
    if let Err(e) = tokio::task::spawn_blocking(move || channel.stop()).await {
        warn!(error = %e, "Channel stop task failed");
    }

    info!(fetched, requested = remote.len(), "Pull finished");
    Ok(if fetched == remote.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
