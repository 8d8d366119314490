//! The endurance loop.
//!
//! ```text
//! Init ──open channels, init sequence──▶ Running(1..N) ──▶ Stopped(reason)
//! ```
//!
//! Each cycle runs the UI action, scans the monitored files and, on a fault,
//! fires the diagnostic dump, collects artifacts once and applies the fault
//! policy. Whatever ends the run (policy, `max_cycles`, interrupt, a required
//! channel that would not open) goes through the same finish path: channels
//! stopped, summary computed and written.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::artifacts::RunLayout;
use crate::channel::{ChannelSettings, LineChannel};
use crate::config::{FaultPolicy, HarnessConfig};
use crate::error::Error;
use crate::orchestrator::FaultOrchestrator;
use crate::probe::ProbeClient;
use crate::summary::{RunSummary, StopReason};
use crate::transport::TransportFactory;
use crate::ui_action::CycleAction;

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Init,
    Running { cycle: u64 },
    Stopped(StopReason),
}

/// Owns channels, counters and the fault orchestrator for one run.
pub struct CycleController {
    config: HarnessConfig,
    layout: RunLayout,
    factory: Arc<dyn TransportFactory>,
    action: Box<dyn CycleAction>,
    channels: Vec<Arc<LineChannel>>,
    orchestrator: Option<FaultOrchestrator>,
    state: ControllerState,
    started_at: DateTime<Local>,
    cycles_completed: u64,
    faults_detected: u64,
}

impl CycleController {
    #[must_use]
    pub fn new(
        config: HarnessConfig,
        layout: RunLayout,
        started_at: DateTime<Local>,
        factory: Arc<dyn TransportFactory>,
        action: Box<dyn CycleAction>,
    ) -> Self {
        Self {
            config,
            layout,
            factory,
            action,
            channels: Vec::new(),
            orchestrator: None,
            state: ControllerState::Init,
            started_at,
            cycles_completed: 0,
            faults_detected: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Channels that opened successfully.
    #[must_use]
    pub fn channels(&self) -> &[Arc<LineChannel>] {
        &self.channels
    }

    /// Whether fault checks are active (the probe console opened).
    #[must_use]
    pub fn fault_checks_enabled(&self) -> bool {
        self.orchestrator.is_some()
    }

    /// Run until a stop decision or until `interrupt` resolves, then
    /// finalize. The summary is also written to the run directory.
    pub async fn run<S>(&mut self, interrupt: S) -> RunSummary
    where
        S: Future<Output = ()>,
    {
        let reason = tokio::select! {
            reason = self.drive() => reason,
            () = interrupt => {
                warn!("Interrupted; stopping channels");
                StopReason::UserInterrupt
            }
        };
        self.finish(reason).await
    }

    async fn drive(&mut self) -> StopReason {
        if let Err(reason) = self.open_channels() {
            return reason;
        }
        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.run_init().await;
        } else {
            warn!(
                channel = %self.config.console.channel,
                "Probe console unavailable; fault checks skipped"
            );
        }

        let post_cycle_wait = Duration::from_secs(self.config.run.post_cycle_wait_secs);
        let mut cycle = 1;
        loop {
            self.state = ControllerState::Running { cycle };
            info!(cycle, "Cycle start");
            let decision = self.run_cycle(cycle).await;
            self.cycles_completed += 1;

            if let Some(reason) = decision {
                return reason;
            }
            if self
                .config
                .run
                .max_cycles
                .is_some_and(|max| self.cycles_completed >= max)
            {
                return StopReason::Completed;
            }
            tokio::time::sleep(post_cycle_wait).await;
            cycle += 1;
        }
    }

    /// Open and start every configured channel. A failing channel is
    /// skipped unless it is marked required.
    pub fn open_channels(&mut self) -> Result<(), StopReason> {
        let serial = &self.config.serial;
        for channel_config in &serial.channels {
            let settings = ChannelSettings {
                baud: serial.baud_for(channel_config),
                read_timeout: serial.read_timeout(),
                buffer_capacity: serial.buffer_capacity,
                session_log: Some(self.layout.session_log(&channel_config.name)),
            };
            let opened = LineChannel::open(channel_config, &settings, self.factory.as_ref())
                .and_then(|channel| channel.start_reading().map(|()| channel));

            match opened {
                Ok(channel) => self.channels.push(Arc::new(channel)),
                Err(e) => {
                    let err = Error::from(e);
                    if channel_config.required {
                        error!(channel = %channel_config.name, error = %err, "Required channel failed");
                        return Err(StopReason::ChannelFailure);
                    }
                    warn!(
                        channel = %channel_config.name,
                        port = %channel_config.port,
                        error = %err,
                        "Channel unavailable; continuing without it"
                    );
                }
            }
        }

        let console_name = &self.config.console.channel;
        if let Some(console) = self.channels.iter().find(|c| c.name() == console_name) {
            let probe = ProbeClient::from_config(Arc::clone(console), &self.config.console);
            self.orchestrator = Some(FaultOrchestrator::new(
                probe,
                self.layout.clone(),
                &self.config,
            ));
        }
        info!(
            opened = self.channels.len(),
            configured = serial.channels.len(),
            fault_checks = self.orchestrator.is_some(),
            "Channels started"
        );
        Ok(())
    }

    /// One cycle. Returns a stop reason when the fault policy ends the run.
    pub async fn run_cycle(&mut self, cycle: u64) -> Option<StopReason> {
        if let Err(e) = self.action.run(cycle).await {
            warn!(cycle, error = %e, "UI action failed; continuing with fault check");
        }

        let orchestrator = self.orchestrator.as_mut()?;
        let report = orchestrator.scan().await;
        if !report.any_present() {
            return None;
        }

        self.faults_detected += 1;
        warn!(cycle, faults = self.faults_detected, summary = %report.summary_line(), "Fault detected");
        orchestrator.fire_diagnostic_dump().await;
        orchestrator.process_artifacts(&report, cycle).await;

        let fault = &self.config.fault;
        match fault.policy {
            FaultPolicy::Continue => None,
            FaultPolicy::Halt => Some(StopReason::FaultDetected),
            FaultPolicy::HaltAfterDelay => {
                if fault.post_fault_wait_secs > 0 {
                    info!(wait_secs = fault.post_fault_wait_secs, "Stopping after post-fault wait");
                    tokio::time::sleep(Duration::from_secs(fault.post_fault_wait_secs)).await;
                }
                Some(StopReason::FaultDetected)
            }
        }
    }

    async fn finish(&mut self, reason: StopReason) -> RunSummary {
        // Readers wind down concurrently on the blocking pool.
        let stops: Vec<_> = self
            .channels
            .iter()
            .map(|channel| {
                let channel = Arc::clone(channel);
                tokio::task::spawn_blocking(move || channel.stop())
            })
            .collect();
        for stop in stops {
            if let Err(e) = stop.await {
                warn!(error = %e, "Channel stop task failed");
            }
        }
        self.state = ControllerState::Stopped(reason);

        let summary = RunSummary::new(
            self.started_at,
            Local::now(),
            self.cycles_completed,
            self.faults_detected,
            reason,
        );
        if let Err(e) = summary.persist(&self.layout.summary_text(), &self.layout.summary_json()) {
            warn!(error = %e, "Could not write summary");
        }
        info!(
            stop_reason = %reason,
            cycles = summary.cycles_completed,
            faults = summary.faults_detected,
            duration = %summary.duration_hms(),
            "Run finished"
        );
        summary
    }
}

impl std::fmt::Debug for CycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleController")
            .field("state", &self.state)
            .field("layout", &self.layout)
            .field("channels", &self.channels)
            .field("cycles_completed", &self.cycles_completed)
            .field("faults_detected", &self.faults_detected)
            .finish_non_exhaustive()
    }
}
