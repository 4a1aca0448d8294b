//! Integration tests for gazetrack-core.
//!
//! These tests verify the capture pipeline without a network in between:
//! lifecycle store → command poll → session manager → fixation extraction →
//! artifact upload → reload.

use std::sync::Arc;

use gazetrack_core::{
    ArtifactKind, ArtifactTable, CommandKind, DataService, DiskArtifactStore, FixationProfile,
    GazeSample, GazeSource, MemoryStageStore, ScriptedGazeSource, SessionManager, StageStatus,
    TrackingService,
};

fn services(root: &std::path::Path) -> (TrackingService, DataService) {
    let store = Arc::new(MemoryStageStore::new());
    let tracking = TrackingService::new(store.clone());
    let data = DataService::new(store, Arc::new(DiskArtifactStore::new(root)));
    (tracking, data)
}

/// 15 samples: two clusters of 5 + 5 at (0.1, 0.1), then 5 at (0.9, 0.9),
/// 40 ms apart so each cluster spans more than 150 ms.
fn two_cluster_script(t0: f64) -> ScriptedGazeSource {
    let mut samples = Vec::new();
    for i in 0..10 {
        samples.push(GazeSample::new(t0 + i as f64 * 40.0, 0.1, 0.1, 0.95));
    }
    for i in 0..5 {
        samples.push(GazeSample::new(t0 + 600.0 + i as f64 * 40.0, 0.9, 0.9, 0.95));
    }
    ScriptedGazeSource::new(samples)
}

#[test]
fn capture_pipeline_uploads_two_fixations() {
    let dir = tempfile::tempdir().unwrap();
    let (tracking, data) = services(dir.path());

    let test = tracking.create_test("T1").unwrap();
    let started = tracking.send_start_command(&test.token, None, None).unwrap();

    let mut manager = SessionManager::new(&test.token, FixationProfile::hardware());
    let commands = tracking.get_pending_commands(&test.token).unwrap();
    assert!(manager.apply_commands(&commands, 1000.0).is_empty());
    assert!(manager.is_active(started.stage_id));

    let mut source = two_cluster_script(1000.0);
    while let Some(sample) = source.next_sample(0.0) {
        manager.append_sample(sample);
    }

    tracking.send_stop_command(&test.token, started.stage_id).unwrap();
    let commands = tracking.get_pending_commands(&test.token).unwrap();
    assert_eq!(commands[0].command, CommandKind::Stop);

    let jobs = manager.apply_commands(&commands, 2000.0);
    assert_eq!(jobs.len(), 1);
    let artifacts = jobs[0].session.build_artifacts(manager.profile());
    assert_eq!(artifacts.fixations.len(), 2);

    for scratch in artifacts.write_scratch(None).unwrap() {
        data.upload(
            &test.token,
            started.stage_id,
            &scratch.file_name,
            Some("text/csv"),
            &scratch.read().unwrap(),
        )
        .unwrap();
    }
    manager.complete_stop(started.stage_id).unwrap();

    // The stop keeps coming back but is never handled twice.
    let again = tracking.get_pending_commands(&test.token).unwrap();
    assert!(manager.apply_commands(&again, 3000.0).is_empty());

    let listing = data.list(&test.token, None, Some(started.stage_id)).unwrap();
    assert_eq!(listing.total_count, 3);

    let text = data
        .read_table(&test.token, started.stage_id, ArtifactKind::HeatmapLong)
        .unwrap();
    let rows = ArtifactTable::parse(&text)
        .unwrap()
        .value_rows(ArtifactKind::HeatmapLong);
    assert_eq!(rows.len(), 2);
    assert!((rows[0].x - 0.1).abs() < 1e-9);
    assert!((rows[1].value - 160.0).abs() < 1e-9);
}

#[test]
fn concurrent_stages_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let (tracking, _data) = services(dir.path());
    let test = tracking.create_test("parallel").unwrap();

    let a = tracking.send_start_command(&test.token, Some(1), None).unwrap();
    let b = tracking.send_start_command(&test.token, Some(2), None).unwrap();
    assert_eq!((a.stage_id, b.stage_id), (1, 2));

    let mut manager = SessionManager::new(&test.token, FixationProfile::synthetic());
    manager.apply_commands(&tracking.get_pending_commands(&test.token).unwrap(), 0.0);
    manager.append_sample(GazeSample::new(10.0, 5.0, 5.0, 0.9));

    tracking.send_stop_command(&test.token, a.stage_id).unwrap();
    let jobs = manager.apply_commands(&tracking.get_pending_commands(&test.token).unwrap(), 0.0);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].session.test_number, Some(1));
    assert!(manager.is_active(b.stage_id));
    assert_eq!(
        tracking.store().get_stage(&test.token, b.stage_id).unwrap().status,
        StageStatus::Started
    );
}
