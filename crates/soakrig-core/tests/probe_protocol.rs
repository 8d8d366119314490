//! Probe protocol against a fake remote shell.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeShell, probe_client};
use soakrig_core::error::ProbeError;
use soakrig_core::probe::{
    CaptureDestination, CaptureOutcome, CaptureRequest, CoreCopyOutcome, ExistsOutcome,
    ProbeClient,
};
use soakrig_core::transport::ScriptedTransport;

#[tokio::test]
async fn exists_reports_presence_and_absence() {
    let shell = FakeShell::new()
        .with_file("/var/log/postmortem_smmu.txt", &["fault"])
        .with_chatter("[NSLog] display: vsync 60");
    let (probe, _console) = probe_client(&shell);

    assert!(probe.exists("/var/log/postmortem_smmu.txt").await);
    assert!(!probe.exists("/var/log/display_smmu_fault_info.txt").await);
}

#[tokio::test]
async fn exists_ignores_markers_for_other_tags() {
    // Chatter carries an EXISTS marker with a foreign tag ahead of the real reply.
    let shell = FakeShell::new().with_chatter("__EXISTS__ 0101_000000-9999");
    let (probe, _console) = probe_client(&shell);

    assert_eq!(
        probe.exists_outcome("/a", Duration::from_secs(1)).await,
        ExistsOutcome::Absent
    );
}

#[tokio::test]
async fn exists_without_answer_is_unknown_and_false() {
    let shell = FakeShell::new()
        .with_file("/a", &["x"])
        .ignoring_exists_for("/a");
    let (probe, _console) = probe_client(&shell);

    let started = std::time::Instant::now();
    assert_eq!(
        probe.exists_outcome("/a", Duration::from_millis(300)).await,
        ExistsOutcome::Unknown
    );
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(!probe.exists("/a").await);
}

#[tokio::test]
async fn capture_saves_payload_without_markers() {
    let dir = tempfile::tempdir().unwrap();
    let shell = FakeShell::new().with_output("showmem", &["line1", "line2"]);
    let (probe, _console) = probe_client(&shell);

    let dest = dir.path().join("showmem/snap.txt");
    let outcome = probe.stream_capture("snap-1", "showmem", &dest).await.unwrap();

    assert_eq!(
        outcome,
        CaptureOutcome::Saved {
            path: dest.clone(),
            lines: 2
        }
    );
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "line1\nline2\n");
}

#[tokio::test]
async fn guarded_capture_of_missing_path_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let shell = FakeShell::new();
    let (probe, _console) = probe_client(&shell);

    let dest = dir.path().join("fault_files/a.txt");
    let outcome = probe.pull_file("/var/log/a.txt", &dest).await.unwrap();

    assert_eq!(outcome, CaptureOutcome::Absent);
    assert!(!dest.exists());
}

#[tokio::test]
async fn pull_drops_noise_prefixed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let shell = FakeShell::new().with_file(
        "/var/log/b.txt",
        &["smmu fault at 0xdead", "[NSLog] unrelated", "context bank 3"],
    );
    let (probe, _console) = probe_client(&shell);

    let dest = dir.path().join("b.txt");
    let outcome = probe.pull_file("/var/log/b.txt", &dest).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(
        std::fs::read_to_string(&dest).unwrap(),
        "smmu fault at 0xdead\ncontext bank 3\n"
    );
}

#[tokio::test]
async fn idle_timeout_after_begin_salvages_partial() {
    let dir = tempfile::tempdir().unwrap();
    let shell = FakeShell::new()
        .with_output("showmem -s", &["total 512M", "free 100M"])
        .losing_end_for("showmem -s");
    let (probe, _console) = probe_client(&shell);

    let dest = dir.path().join("snap_s.txt");
    let started = std::time::Instant::now();
    let outcome = probe
        .stream_capture("snap-s", "showmem -s", &dest)
        .await
        .unwrap();

    let partial = dir.path().join("snap_s.txt.partial");
    assert_eq!(
        outcome,
        CaptureOutcome::TimedOut {
            partial_lines: 2,
            salvaged: Some(partial.clone())
        }
    );
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(!dest.exists());
    assert_eq!(
        std::fs::read_to_string(partial).unwrap(),
        "total 512M\nfree 100M\n"
    );
}

#[tokio::test]
async fn unanswered_capture_times_out_empty() {
    let dir = tempfile::tempdir().unwrap();
    let channel = common::start_channel(Arc::new(ScriptedTransport::silent()));
    let probe = ProbeClient::new(channel, common::fast_timeouts(), None);

    let dest = dir.path().join("q.txt");
    let outcome = probe
        .generic_capture(&CaptureRequest {
            tag: "quiet".to_string(),
            command: "showmem".to_string(),
            destination: CaptureDestination::File(dest.clone()),
            idle_timeout: Duration::from_millis(300),
            guard: None,
        })
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CaptureOutcome::TimedOut {
            partial_lines: 0,
            salvaged: None
        }
    );
    assert!(!dest.exists());
}

#[tokio::test]
async fn send_failure_returns_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let (probe, console) = probe_client(&FakeShell::new().with_output("showmem", &["x"]));
    console.set_fail_writes(true);

    let started = std::time::Instant::now();
    let err = probe
        .stream_capture("t", "showmem", &dir.path().join("s.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::SendFailed { .. }));
    assert!(started.elapsed() < Duration::from_millis(200));
    assert!(!probe.exists("/a").await);
}

#[tokio::test]
async fn listing_prints_to_console() {
    let shell = FakeShell::new()
        .with_dir("/var/log")
        .with_file("/var/log/a.txt", &["x"]);
    let (probe, console) = probe_client(&shell);

    let outcome = probe.print_listing("/var/log").await.unwrap();
    assert_eq!(outcome, CaptureOutcome::Printed { lines: 2 });
    assert!(console.sent()[0].contains("ls -la \"/var/log\""));
}

#[tokio::test]
async fn core_copy_confirmation() {
    let shell = FakeShell::new().with_file("/var/log/openwfd_server-QM.core", &["ELF"]);
    let (probe, _console) = probe_client(&shell);

    assert_eq!(
        probe
            .copy_core("/var/log/openwfd_server-QM.core", "/data/")
            .await
            .unwrap(),
        CoreCopyOutcome::Copied
    );
    assert_eq!(
        shell.copies(),
        vec![(
            "/var/log/openwfd_server-QM.core".to_string(),
            "/data/".to_string()
        )]
    );
    assert_eq!(
        probe.copy_core("/var/log/other.core", "/data/").await.unwrap(),
        CoreCopyOutcome::Missing
    );
}

#[tokio::test]
async fn each_probe_sends_exactly_one_command() {
    let shell = FakeShell::new().with_file("/a", &["x"]);
    let (probe, console) = probe_client(&shell);

    probe.exists("/a").await;
    probe.exists("/b").await;
    let sent = console.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|c| c.starts_with("if ls ")));
    // Tags differ between consecutive probes.
    assert_ne!(sent[0].split('"').nth(1), sent[1].split('"').nth(1));
}

#[tokio::test]
async fn pull_keeps_whitespace_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let shell = FakeShell::new().with_file(
        "/var/log/showmem_table.txt",
        &["col1    col2   ", "    ", "\tindented"],
    );
    let (probe, _console) = probe_client(&shell);

    let dest = dir.path().join("showmem_table.txt");
    let outcome = probe
        .pull_file("/var/log/showmem_table.txt", &dest)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CaptureOutcome::Saved {
            path: dest.clone(),
            lines: 3
        }
    );
    assert_eq!(
        std::fs::read_to_string(&dest).unwrap(),
        "col1    col2   \n    \n\tindented\n"
    );
}

/// Tag carried by an existence command.
fn exists_tag(command: &str) -> String {
    command
        .split("__EXISTS__ ")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap_or_default()
        .to_string()
}

fn answering_both(first: &'static str, second: &'static str) -> ProbeClient {
    let console = ScriptedTransport::new(move |command| {
        let tag = exists_tag(command);
        vec![format!("{first} {tag}"), format!("{second} {tag}")]
    })
    .with_echo(true);
    let channel = common::start_channel(Arc::new(console));
    ProbeClient::new(channel, common::fast_timeouts(), None)
}

#[tokio::test]
async fn exists_first_marker_for_tag_wins() {
    let probe = answering_both("__MISSING__", "__EXISTS__");
    assert_eq!(
        probe.exists_outcome("/a", Duration::from_secs(1)).await,
        ExistsOutcome::Absent
    );
    assert!(!probe.exists("/a").await);

    let probe = answering_both("__EXISTS__", "__MISSING__");
    assert_eq!(
        probe.exists_outcome("/a", Duration::from_secs(1)).await,
        ExistsOutcome::Present
    );
    assert!(probe.exists("/a").await);
}

#[tokio::test]
async fn paths_with_spaces_probe_consistently() {
    let dir = tempfile::tempdir().unwrap();
    let remote = "/var/log/core dump.txt";
    let shell = FakeShell::new().with_file(remote, &["frame 0"]);
    let (probe, console) = probe_client(&shell);

    assert!(probe.exists(remote).await);
    let dest = dir.path().join("core dump.txt");
    assert!(probe.pull_file(remote, &dest).await.unwrap().is_complete());
    assert_eq!(
        probe.copy_core(remote, "/data/").await.unwrap(),
        CoreCopyOutcome::Copied
    );
    assert_eq!(shell.copies(), vec![(remote.to_string(), "/data/".to_string())]);

    let sent = console.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|c| c.contains("\"/var/log/core dump.txt\"")));
}
