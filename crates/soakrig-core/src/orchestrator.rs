//! Fault scan and artifact collection on the probe console.
//!
//! Per cycle the controller asks for a [`ScanReport`] over the monitored
//! files. If anything is present it fires the diagnostic dump and calls
//! [`FaultOrchestrator::process_artifacts`], which does its work at most
//! once per cycle id. Every probe here runs sequentially: the console has
//! one outstanding probe at a time.

use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifacts::{RunLayout, SnapshotLabel};
use crate::config::{FaultConfig, FeatureToggles, HarnessConfig, SnapshotConfig};
use crate::probe::{CaptureOutcome, CoreCopyOutcome, ProbeClient};

/// Existence of each monitored path, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub statuses: Vec<(String, bool)>,
}

impl ScanReport {
    /// Overall fault flag: any monitored path present.
    #[must_use]
    pub fn any_present(&self) -> bool {
        self.statuses.iter().any(|(_, present)| *present)
    }

    #[must_use]
    pub fn is_present(&self, path: &str) -> bool {
        self.statuses.iter().any(|(p, present)| *present && p == path)
    }

    pub fn present(&self) -> impl Iterator<Item = &str> {
        self.statuses
            .iter()
            .filter(|(_, present)| *present)
            .map(|(p, _)| p.as_str())
    }

    /// `/a=MISSING, /b=EXISTS`
    #[must_use]
    pub fn summary_line(&self) -> String {
        self.statuses
            .iter()
            .map(|(p, present)| format!("{p}={}", if *present { "EXISTS" } else { "MISSING" }))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// What one artifact pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactReport {
    pub cycle: u64,
    pub listings_printed: usize,
    pub pulled: Vec<(String, CaptureOutcome)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core: Option<CoreCopyOutcome>,
    pub snapshots: Vec<CaptureOutcome>,
    /// Steps that errored (send or local write failures)
    pub failures: Vec<String>,
}

/// Drives scans and artifact capture through one [`ProbeClient`].
#[derive(Debug)]
pub struct FaultOrchestrator {
    probe: ProbeClient,
    layout: RunLayout,
    fault: FaultConfig,
    features: FeatureToggles,
    snapshot: SnapshotConfig,
    init_commands: Vec<String>,
    last_processed_cycle: Option<u64>,
}

impl FaultOrchestrator {
    #[must_use]
    pub fn new(probe: ProbeClient, layout: RunLayout, config: &HarnessConfig) -> Self {
        Self {
            probe,
            layout,
            fault: config.fault.clone(),
            features: config.features.clone(),
            snapshot: config.snapshot.clone(),
            init_commands: config.console.init_commands.clone(),
            last_processed_cycle: None,
        }
    }

    #[must_use]
    pub fn probe(&self) -> &ProbeClient {
        &self.probe
    }

    #[must_use]
    pub fn last_processed_cycle(&self) -> Option<u64> {
        self.last_processed_cycle
    }

    /// One-time setup: init commands, then the init memory snapshot.
    pub async fn run_init(&self) {
        for command in &self.init_commands {
            if let Err(e) = self.probe.channel().send(command) {
                warn!(command = %command, error = %e, "Init command not sent");
            }
        }
        if self.features.collect_memory_snapshot {
            self.collect_memory_snapshot(SnapshotLabel::Init).await;
        }
    }

    /// Probe every monitored file.
    pub async fn scan(&self) -> ScanReport {
        self.scan_paths(&self.fault.monitored_files).await
    }

    /// Probe `paths` one after another, in order.
    pub async fn scan_paths(&self, paths: &[String]) -> ScanReport {
        let mut statuses = Vec::with_capacity(paths.len());
        for path in paths {
            let present = self.probe.exists(path).await;
            statuses.push((path.clone(), present));
        }
        let report = ScanReport { statuses };
        info!(summary = %report.summary_line(), "Fault scan");
        report
    }

    /// Send the diagnostic dump command and give the target time to act.
    pub async fn fire_diagnostic_dump(&self) {
        if !self.features.diagnostic_dump_on_fault {
            return;
        }
        match self.probe.channel().send(&self.fault.diagnostic_command) {
            Ok(()) => {
                tokio::time::sleep(Duration::from_secs(self.fault.diagnostic_settle_secs)).await;
            }
            Err(e) => warn!(error = %e, "Diagnostic dump not sent"),
        }
    }

    /// Collect artifacts for `cycle`. Returns `None` if this cycle was
    /// already processed.
    pub async fn process_artifacts(
        &mut self,
        report: &ScanReport,
        cycle: u64,
    ) -> Option<ArtifactReport> {
        if self.last_processed_cycle == Some(cycle) {
            debug!(cycle, "Artifacts already processed for this cycle");
            return None;
        }
        self.last_processed_cycle = Some(cycle);

        let mut out = ArtifactReport {
            cycle,
            ..ArtifactReport::default()
        };

        if self.features.print_listings {
            for path in &self.fault.listing_paths {
                match self.probe.print_listing(path).await {
                    Ok(outcome) if outcome.is_complete() => out.listings_printed += 1,
                    Ok(outcome) => debug!(path = %path, ?outcome, "Listing incomplete"),
                    Err(e) => {
                        warn!(path = %path, error = %e, "Listing failed");
                        out.failures.push(format!("listing {path}: {e}"));
                    }
                }
            }
        }

        if self.features.pull_fault_files {
            let core = self.fault.core_path.as_deref();
            for remote in report.present().filter(|p| Some(*p) != core) {
                let dest = self.layout.fault_file(remote);
                match self.probe.pull_file(remote, &dest).await {
                    Ok(outcome) => out.pulled.push((remote.to_string(), outcome)),
                    Err(e) => {
                        warn!(path = %remote, error = %e, "Pull failed");
                        out.failures.push(format!("pull {remote}: {e}"));
                    }
                }
            }
        }

        if self.features.copy_core {
            if let Some(core) = self.fault.core_path.as_deref().filter(|c| report.is_present(c)) {
                match self.probe.copy_core(core, &self.fault.core_dest).await {
                    Ok(outcome) => out.core = Some(outcome),
                    Err(e) => {
                        warn!(path = %core, error = %e, "Core copy failed");
                        out.failures.push(format!("core copy {core}: {e}"));
                    }
                }
            }
        }

        if self.features.collect_memory_snapshot {
            let label = SnapshotLabel::Cycle {
                index: cycle,
                fault: report.any_present(),
            };
            out.snapshots = self.collect_memory_snapshot(label).await;
        }

        info!(
            cycle,
            listings = out.listings_printed,
            pulled = out.pulled.len(),
            core = ?out.core,
            failures = out.failures.len(),
            "Artifacts processed"
        );
        Some(out)
    }

    /// Stream the full and summary memory dumps into the run directory.
    pub async fn collect_memory_snapshot(&self, label: SnapshotLabel) -> Vec<CaptureOutcome> {
        let files = self.layout.snapshot_files(Local::now(), label);
        let jobs = [
            (&self.snapshot.full_command, &files.full),
            (&self.snapshot.summary_command, &files.summary),
        ];

        let mut outcomes = Vec::with_capacity(jobs.len());
        for (command, dest) in jobs {
            let tag = dest
                .file_stem()
                .map_or_else(|| self.probe.next_tag(), |s| s.to_string_lossy().to_string());
            match self.probe.stream_capture(&tag, command, dest).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(command = %command, error = %e, "Memory snapshot failed"),
            }
        }
        outcomes
    }
}
