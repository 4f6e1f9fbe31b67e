use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::time::timeout;

use crate::config::RecorderConfig;
use crate::container::{self, SegmentSummary, SEGMENT_FILE_EXT};
use crate::errors::RecorderError;
use crate::session::SessionBuilder;
use crate::source::{parse_source_address, SimRtspSource, SourceScript};

fn test_config(output_dir: &Path) -> RecorderConfig {
    let mut config = RecorderConfig::default();
    config.recording.segment_interval = Duration::from_secs(10);
    config.recording.recording_ceiling = Duration::from_secs(30);
    config.recording.output_dir = output_dir.to_path_buf();
    config.session.poll_period = Duration::from_millis(1);
    config
}

fn scripted_source(script: SourceScript) -> Arc<SimRtspSource> {
    let address = parse_source_address("rtsp://127.0.0.1:8554/camera").expect("address");
    Arc::new(SimRtspSource::new(address, script))
}

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

#[tokio::test]
async fn session_rotates_twice_then_finishes_at_the_ceiling() {
    let dir = tempdir().expect("tempdir");

    // One sample per playback second, paced fast enough that the ceiling
    // fires before the script runs out.
    let source = scripted_source(SourceScript {
        pts_step: Duration::from_secs(1),
        pacing: Duration::from_millis(10),
        total_samples: Some(35),
        fail_after: None,
    });

    let mut session = SessionBuilder::new(test_config(dir.path()))
        .with_source(source.clone())
        .build()
        .expect("session");

    let outcome = timeout(Duration::from_secs(30), session.run())
        .await
        .expect("session should terminate")
        .expect("session should finish cleanly");

    assert!(outcome.elapsed >= Duration::from_secs(30));
    assert!(
        source.samples_emitted() < 35,
        "the ceiling, not script exhaustion, must end the session"
    );

    let summaries = segment_summaries(dir.path());
    assert_eq!(summaries.len(), 3, "30s at 10s per segment is three files");
    assert!(summaries.iter().all(|s| s.finalized));
    assert!(summaries.iter().all(|s| s.frame_count > 0));

    let total: u64 = summaries.iter().map(|s| s.frame_count).sum();
    assert_eq!(total, source.samples_emitted());

    for pair in summaries.windows(2) {
        assert!(pair[0].last_pts < pair[1].first_pts);
    }
}

#[tokio::test]
async fn transport_failure_is_fatal_and_leaves_a_torn_segment() {
    let dir = tempdir().expect("tempdir");

    let source = scripted_source(SourceScript {
        pts_step: Duration::from_secs(1),
        pacing: Duration::from_millis(5),
        total_samples: None,
        fail_after: Some(5),
    });

    let mut session = SessionBuilder::new(test_config(dir.path()))
        .with_source(source.clone())
        .build()
        .expect("session");

    let result = timeout(Duration::from_secs(30), session.run())
        .await
        .expect("session should terminate");
    assert!(matches!(result, Err(RecorderError::Transport(_))));

    assert_eq!(source.samples_emitted(), 5);

    // Teardown released the file handle without draining the stage, so
    // the segment scans cleanly but reports itself unfinalized.
    let summaries = segment_summaries(dir.path());
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].frame_count, 5);
    assert!(!summaries[0].finalized);
}
