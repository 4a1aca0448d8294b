//! Capture session manager.
//!
//! Consumes the polled command snapshot on the capture side. The manager is
//! the only defense against the protocol's repetition:
//!
//! - `start` opens a session only if that stage is not already active.
//! - `stop` hands the session out for artifact building exactly once. The stage
//!   id then lands in the processed-stop set and later redeliveries are
//!   ignored.
//!
//! A session whose upload failed is parked rather than marked processed. The
//! next redelivered `stop` hands it out again.
//!
//! The manager does no I/O besides the optional processed-stop ledger; the
//! async runtime in `gazetrack-client` drives it and performs the network
//! calls outside its lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactSet;
use crate::error::Result;
use crate::fixation::FixationProfile;
use crate::gaze::GazeSample;
use crate::lifecycle::CalibrationPoint;
use crate::protocol::{Command, CommandKind};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// In-memory buffer for one locally started stage.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub token: String,
    pub stage_id: u64,
    pub start_time_ms: f64,
    pub buffer: Vec<GazeSample>,
    pub test_number: Option<u32>,
    pub calibration_point: Option<CalibrationPoint>,
}

impl CaptureSession {
    pub fn build_artifacts(&self, profile: &FixationProfile) -> ArtifactSet {
        ArtifactSet::build(self.stage_id, &self.buffer, self.start_time_ms, profile)
    }
}

/// A session removed from the active map, waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct StopJob {
    pub session: CaptureSession,
    /// True when the stop was synthesized by a shutdown drain.
    pub synthesized: bool,
}

impl StopJob {
    pub fn stage_id(&self) -> u64 {
        self.session.stage_id
    }
}

// ---------------------------------------------------------------------------
// Processed-stop ledger
// ---------------------------------------------------------------------------

/// Stage ids whose stop was fully handled, optionally persisted as JSON keyed
/// by token so a restarted client does not re-upload.
#[derive(Debug, Default)]
pub struct ProcessedStops {
    token: String,
    stages: BTreeSet<u64>,
    path: Option<PathBuf>,
}

impl ProcessedStops {
    pub fn in_memory(token: &str) -> Self {
        Self {
            token: token.to_string(),
            ..Self::default()
        }
    }

    /// Load the ledger for `token` from `path`, creating it on first insert.
    pub fn load(path: &Path, token: &str) -> Result<Self> {
        let stages = if path.exists() {
            let all: HashMap<String, BTreeSet<u64>> =
                serde_json::from_str(&fs::read_to_string(path)?)?;
            all.get(token).cloned().unwrap_or_default()
        } else {
            BTreeSet::new()
        };
        Ok(Self {
            token: token.to_string(),
            stages,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn contains(&self, stage_id: u64) -> bool {
        self.stages.contains(&stage_id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn insert(&mut self, stage_id: u64) -> Result<()> {
        if self.stages.insert(stage_id) {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut all: HashMap<String, BTreeSet<u64>> = if path.exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            HashMap::new()
        };
        all.insert(self.token.clone(), self.stages.clone());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&all)?)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Aggregate counts reported by the status loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub active_stages: Vec<u64>,
    pub total_samples: usize,
    pub processed_stops: usize,
    pub parked_uploads: usize,
}

pub struct SessionManager {
    token: String,
    profile: FixationProfile,
    active: BTreeMap<u64, CaptureSession>,
    parked: BTreeMap<u64, CaptureSession>,
    processed: ProcessedStops,
}

impl SessionManager {
    pub fn new(token: &str, profile: FixationProfile) -> Self {
        Self::with_ledger(token, profile, ProcessedStops::in_memory(token))
    }

    pub fn with_ledger(token: &str, profile: FixationProfile, processed: ProcessedStops) -> Self {
        Self {
            token: token.to_string(),
            profile,
            active: BTreeMap::new(),
            parked: BTreeMap::new(),
            processed,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn profile(&self) -> &FixationProfile {
        &self.profile
    }

    pub fn is_active(&self, stage_id: u64) -> bool {
        self.active.contains_key(&stage_id)
    }

    pub fn is_processed(&self, stage_id: u64) -> bool {
        self.processed.contains(stage_id)
    }

    /// React to one poll. Returns the stops that need artifact upload.
    pub fn apply_commands(&mut self, commands: &[Command], now_ms: f64) -> Vec<StopJob> {
        let mut jobs = Vec::new();
        for command in commands {
            let id = command.stage_id;
            match command.command {
                CommandKind::Start => {
                    if self.active.contains_key(&id)
                        || self.parked.contains_key(&id)
                        || self.processed.contains(id)
                    {
                        continue;
                    }
                    log::info!("stage {id}: capture started");
                    self.active.insert(
                        id,
                        CaptureSession {
                            token: self.token.clone(),
                            stage_id: id,
                            start_time_ms: now_ms,
                            buffer: Vec::new(),
                            test_number: command.test_number,
                            calibration_point: command.calibration_point,
                        },
                    );
                }
                CommandKind::Stop => {
                    if self.processed.contains(id) {
                        continue;
                    }
                    if let Some(session) = self.active.remove(&id) {
                        log::info!(
                            "stage {id}: capture stopped with {} sample(s)",
                            session.buffer.len()
                        );
                        jobs.push(StopJob {
                            session,
                            synthesized: false,
                        });
                    } else if let Some(session) = self.parked.remove(&id) {
                        log::info!("stage {id}: retrying parked upload");
                        jobs.push(StopJob {
                            session,
                            synthesized: false,
                        });
                    } else {
                        log::debug!("stage {id}: stop for a stage never started here");
                    }
                }
            }
        }
        jobs
    }

    /// Append a sample to every active session. Returns how many received it.
    pub fn append_sample(&mut self, sample: GazeSample) -> usize {
        for session in self.active.values_mut() {
            session.buffer.push(sample);
        }
        self.active.len()
    }

    /// Mark a stop as handled after a successful upload.
    pub fn complete_stop(&mut self, stage_id: u64) -> Result<()> {
        self.processed.insert(stage_id)
    }

    /// Keep a failed upload for retry on the next redelivered stop.
    pub fn park(&mut self, job: StopJob) {
        log::warn!("stage {}: upload parked for retry", job.stage_id());
        self.parked.insert(job.stage_id(), job.session);
    }

    /// Hand out every active and parked session for a final upload.
    pub fn drain(&mut self) -> Vec<StopJob> {
        let active = std::mem::take(&mut self.active);
        let parked = std::mem::take(&mut self.parked);
        active
            .into_values()
            .chain(parked.into_values())
            .map(|session| StopJob {
                session,
                synthesized: true,
            })
            .collect()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            active_stages: self.active.keys().copied().collect(),
            total_samples: self.active.values().map(|s| s.buffer.len()).sum(),
            processed_stops: self.processed.len(),
            parked_uploads: self.parked.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::StageStatus;

    fn cmd(kind: CommandKind, stage_id: u64) -> Command {
        Command {
            command: kind,
            stage_id,
            test_number: None,
            calibration_point: None,
            status: match kind {
                CommandKind::Start => StageStatus::Started,
                CommandKind::Stop => StageStatus::Stopped,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Start / stop idempotency
    // -----------------------------------------------------------------------

    #[test]
    fn test_start_is_idempotent() {
        let mut mgr = SessionManager::new("tok", FixationProfile::synthetic());
        mgr.apply_commands(&[cmd(CommandKind::Start, 1)], 1000.0);
        mgr.append_sample(GazeSample::new(1010.0, 1.0, 1.0, 0.9));
        mgr.apply_commands(&[cmd(CommandKind::Start, 1)], 5000.0);

        let status = mgr.status();
        assert_eq!(status.active_stages, vec![1]);
        assert_eq!(status.total_samples, 1);
    }

    #[test]
    fn test_stop_handled_once() {
        let mut mgr = SessionManager::new("tok", FixationProfile::synthetic());
        mgr.apply_commands(&[cmd(CommandKind::Start, 1)], 0.0);
        let jobs = mgr.apply_commands(&[cmd(CommandKind::Stop, 1)], 0.0);
        assert_eq!(jobs.len(), 1);
        mgr.complete_stop(1).unwrap();

        assert!(mgr.apply_commands(&[cmd(CommandKind::Stop, 1)], 0.0).is_empty());
        assert!(mgr.is_processed(1));
        assert!(!mgr.is_active(1));
    }

    #[test]
    fn test_stop_for_unknown_stage_ignored() {
        let mut mgr = SessionManager::new("tok", FixationProfile::synthetic());
        assert!(mgr.apply_commands(&[cmd(CommandKind::Stop, 3)], 0.0).is_empty());
    }

    #[test]
    fn test_parked_upload_retried_on_next_stop() {
        let mut mgr = SessionManager::new("tok", FixationProfile::synthetic());
        mgr.apply_commands(&[cmd(CommandKind::Start, 2)], 0.0);
        mgr.append_sample(GazeSample::new(1.0, 1.0, 1.0, 0.9));
        let job = mgr.apply_commands(&[cmd(CommandKind::Stop, 2)], 0.0).remove(0);
        mgr.park(job);
        assert_eq!(mgr.status().parked_uploads, 1);

        // Parked sessions no longer receive samples.
        assert_eq!(mgr.append_sample(GazeSample::new(2.0, 1.0, 1.0, 0.9)), 0);

        let retry = mgr.apply_commands(&[cmd(CommandKind::Stop, 2)], 0.0);
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].session.buffer.len(), 1);
        assert_eq!(mgr.status().parked_uploads, 0);
    }

    #[test]
    fn test_sample_fans_out_to_all_active() {
        let mut mgr = SessionManager::new("tok", FixationProfile::synthetic());
        mgr.apply_commands(
            &[cmd(CommandKind::Start, 1), cmd(CommandKind::Start, 2)],
            0.0,
        );
        assert_eq!(mgr.append_sample(GazeSample::new(1.0, 1.0, 1.0, 0.9)), 2);
        assert_eq!(mgr.status().total_samples, 2);
    }

    #[test]
    fn test_drain_takes_active_and_parked() {
        let mut mgr = SessionManager::new("tok", FixationProfile::synthetic());
        mgr.apply_commands(
            &[cmd(CommandKind::Start, 1), cmd(CommandKind::Start, 2)],
            0.0,
        );
        let job = mgr.apply_commands(&[cmd(CommandKind::Stop, 2)], 0.0).remove(0);
        mgr.park(job);

        let drained = mgr.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|j| j.synthesized));
        assert!(mgr.status().active_stages.is_empty());
    }

    // -----------------------------------------------------------------------
    // Ledger persistence
    // -----------------------------------------------------------------------

    #[test]
    fn test_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("processed.json");

        let mut ledger = ProcessedStops::load(&path, "tok-a").unwrap();
        ledger.insert(4).unwrap();
        let mut other = ProcessedStops::load(&path, "tok-b").unwrap();
        other.insert(1).unwrap();

        let reloaded = ProcessedStops::load(&path, "tok-a").unwrap();
        assert!(reloaded.contains(4));
        assert!(!reloaded.contains(1));

        let mut mgr = SessionManager::with_ledger("tok-a", FixationProfile::synthetic(), reloaded);
        assert!(mgr.apply_commands(&[cmd(CommandKind::Start, 4)], 0.0).is_empty());
        assert!(!mgr.is_active(4));
    }
}
