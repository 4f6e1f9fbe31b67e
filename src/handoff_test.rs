use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{sleep, timeout, Instant};

use crate::assembly::PipelineAssembly;
use crate::config::RecorderConfig;
use crate::container::{self, SegmentSummary, SEGMENT_FILE_EXT};
use crate::handoff::HandoffCoordinator;
use crate::session::SessionBuilder;
use crate::source::{parse_source_address, SimRtspSource, SourceScript};
use crate::stage::StageFactory;
use crate::types::BusMessage;

fn segment_summaries(dir: &Path) -> Vec<SegmentSummary> {
    let mut summaries: Vec<SegmentSummary> = std::fs::read_dir(dir)
        .expect("read output dir")
        .map(|entry| entry.expect("dir entry").path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_FILE_EXT))
        .map(|path| container::read_summary(&path).expect("segment summary"))
        .collect();
    summaries.sort_by_key(|s| s.first_pts);
    summaries
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn handoff_preserves_every_unit_across_the_boundary() {
    let dir = tempdir().expect("tempdir");
    let (bus_tx, mut bus_rx) = unbounded_channel();

    let address = parse_source_address("rtsp://127.0.0.1:8554/camera").expect("address");
    let source = Arc::new(SimRtspSource::new(
        address,
        SourceScript {
            pts_step: Duration::from_millis(10),
            pacing: Duration::from_millis(2),
            total_samples: Some(200),
            fail_after: None,
        },
    ));

    let assembly = Arc::new(
        PipelineAssembly::new(
            source.clone(),
            "application/x-rtp".to_string(),
            bus_tx.clone(),
        )
        .expect("assembly"),
    );
    let factory = StageFactory::new(dir.path().to_path_buf(), bus_tx);
    let initial = factory.create_stage().expect("initial stage");
    let coordinator = HandoffCoordinator::new(Arc::clone(&assembly), factory);
    assembly.attach(initial).expect("attach initial stage");

    assembly.start().await.expect("start");

    {
        let assembly = Arc::clone(&assembly);
        wait_until("mid-stream position", move || {
            assembly.query_position() >= Duration::from_millis(500)
        })
        .await;
    }

    assert!(coordinator.begin(), "hand-off should start");
    {
        let coordinator = Arc::clone(&coordinator);
        wait_until("hand-off completion", move || coordinator.is_idle()).await;
    }

    // The source runs out of samples and pushes its end of stream through
    // the replacement stage.
    timeout(Duration::from_secs(10), async {
        loop {
            match bus_rx.recv().await.expect("bus open") {
                BusMessage::EndOfStream { .. } => break,
                BusMessage::Error { component, message } => {
                    panic!("unexpected error from {component}: {message}")
                }
                _ => {}
            }
        }
    })
    .await
    .expect("session end of stream");

    assembly.shutdown();

    let summaries = segment_summaries(dir.path());
    assert_eq!(summaries.len(), 2, "one rotation produces two segments");
    assert!(summaries.iter().all(|s| s.finalized));
    assert!(summaries.iter().all(|s| s.frame_count > 0));

    let total: u64 = summaries.iter().map(|s| s.frame_count).sum();
    assert_eq!(total, source.samples_emitted(), "no unit lost or duplicated");
    assert!(
        summaries[0].last_pts < summaries[1].first_pts,
        "segment pts ranges must not overlap"
    );
    assert_eq!(assembly.lost_units(), 0);
}

#[tokio::test]
async fn failed_swap_loses_data_but_not_the_session() {
    let dir = tempdir().expect("tempdir");
    let output_dir = dir.path().join("out");

    let mut config = RecorderConfig::default();
    config.recording.segment_interval = Duration::from_secs(1);
    config.recording.recording_ceiling = Duration::from_secs(3);
    config.recording.output_dir = output_dir.clone();
    config.session.poll_period = Duration::from_millis(1);
    config.simulation.pts_step = Duration::from_millis(100);
    config.simulation.pacing = Duration::from_millis(2);

    let mut session = SessionBuilder::new(config).build().expect("session");

    // Pull the directory out from under the recorder: the open segment
    // file keeps writing, but every replacement stage fails to build.
    std::fs::remove_dir_all(&output_dir).expect("remove output dir");

    let outcome = timeout(Duration::from_secs(30), session.run())
        .await
        .expect("session should terminate")
        .expect("session should finish despite failed swaps");

    assert!(outcome.elapsed >= Duration::from_secs(3));
    assert!(!output_dir.exists());
}
