//! Command synchronization protocol.
//!
//! The capture client never receives pushed messages. It polls
//! [`TrackingService::get_pending_commands`], which re-derives a command list
//! from the current stage statuses every time:
//!
//! - STARTED → `start`
//! - STOPPED → `stop`
//! - CREATED → nothing
//!
//! Commands are a snapshot, not a queue. A stopped stage keeps emitting `stop`
//! on every poll, so the consumer owns all deduplication. The only way a
//! status changes is through [`TrackingService::send_start_command`] and
//! [`TrackingService::send_stop_command`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lifecycle::{CalibrationPoint, Stage, StageStatus, StageStore, Test};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Stop,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl std::str::FromStr for CommandKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(Error::bad_request(format!("unknown command type: {other}"))),
        }
    }
}

/// One entry of a poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command: CommandKind,
    pub stage_id: u64,
    #[serde(default)]
    pub test_number: Option<u32>,
    #[serde(default)]
    pub calibration_point: Option<CalibrationPoint>,
    pub status: StageStatus,
}

impl Command {
    /// Command implied by a stage's current status, if any.
    pub fn from_stage(stage: &Stage) -> Option<Self> {
        let command = match stage.status {
            StageStatus::Started => CommandKind::Start,
            StageStatus::Stopped => CommandKind::Stop,
            StageStatus::Created => return None,
        };
        Some(Self {
            command,
            stage_id: stage.stage_id,
            test_number: stage.test_number,
            calibration_point: stage.calibration_point,
            status: stage.status,
        })
    }
}

/// Derive the command snapshot for a set of stages, in stage order.
pub fn derive_commands(stages: &[Stage]) -> Vec<Command> {
    stages.iter().filter_map(Command::from_stage).collect()
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTest {
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedStage {
    pub token: String,
    pub stage_id: u64,
    pub status: StageStatus,
    #[serde(default)]
    pub test_number: Option<u32>,
    #[serde(default)]
    pub calibration_point: Option<CalibrationPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedStage {
    pub message: String,
    pub token: String,
    pub stage_id: u64,
    pub test_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub message: String,
    pub token: String,
    pub stage_id: u64,
    pub command_type: CommandKind,
    pub status: String,
    pub test_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivatedTest {
    pub message: String,
    pub token: String,
    pub test_name: String,
    pub stopped_stages: Vec<u64>,
    pub total_stopped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub name: String,
    pub token: String,
    pub stages_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestList {
    pub tests: Vec<TestSummary>,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDetail {
    pub name: String,
    pub token: String,
    pub stages: Vec<Stage>,
    pub stages_count: usize,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Lifecycle operations over an injected [`StageStore`].
#[derive(Clone)]
pub struct TrackingService {
    store: Arc<dyn StageStore>,
}

impl TrackingService {
    pub fn new(store: Arc<dyn StageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn StageStore> {
        &self.store
    }

    fn require_test(&self, token: &str) -> Result<Test> {
        self.store
            .get_test(token)
            .ok_or_else(|| Error::not_found("test not found"))
    }

    fn require_stage(&self, token: &str, stage_id: u64) -> Result<Stage> {
        self.store
            .get_stage(token, stage_id)
            .ok_or_else(|| Error::not_found(format!("stage {stage_id} not found")))
    }

    pub fn create_test(&self, name: &str) -> Result<CreatedTest> {
        let test = self.store.create_test(name)?;
        log::info!("created test '{}' ({})", test.name, test.token_prefix());
        Ok(CreatedTest {
            name: test.name,
            token: test.token,
        })
    }

    /// Allocate a new stage and move it straight to STARTED.
    pub fn send_start_command(
        &self,
        token: &str,
        test_number: Option<u32>,
        calibration_point: Option<CalibrationPoint>,
    ) -> Result<StartedStage> {
        let stage = self
            .store
            .create_stage(token, test_number, calibration_point)?;
        self.store
            .update_stage_status(token, stage.stage_id, StageStatus::Started);
        log::info!(
            "stage {} started for test {}",
            stage.stage_id,
            crate::lifecycle::token_prefix(token)
        );
        Ok(StartedStage {
            token: token.to_string(),
            stage_id: stage.stage_id,
            status: StageStatus::Started,
            test_number: stage.test_number,
            calibration_point: stage.calibration_point,
        })
    }

    /// Move a STARTED stage to STOPPED. Any other status is rejected.
    pub fn send_stop_command(&self, token: &str, stage_id: u64) -> Result<StoppedStage> {
        let test = self.require_test(token)?;
        let stage = self.require_stage(token, stage_id)?;
        if stage.status != StageStatus::Started {
            return Err(Error::bad_request(format!(
                "only a started stage can be stopped (stage {stage_id} is {})",
                stage.status
            )));
        }
        self.store
            .update_stage_status(token, stage_id, StageStatus::Stopped);
        log::info!("stage {stage_id} stopped for test {}", test.token_prefix());
        Ok(StoppedStage {
            message: format!("stop command sent for stage {stage_id}"),
            token: test.token,
            stage_id,
            test_name: test.name,
        })
    }

    /// Record a client acknowledgment. Acknowledgments never change state.
    pub fn webhook_ack(
        &self,
        token: &str,
        stage_id: u64,
        command_type: CommandKind,
        status: &str,
    ) -> Result<WebhookAck> {
        let test = self.require_test(token)?;
        self.require_stage(token, stage_id)?;
        log::debug!(
            "ack '{}' for stage {stage_id} of {}: {status}",
            command_type.as_str(),
            test.token_prefix()
        );
        Ok(WebhookAck {
            message: format!("{} acknowledged", command_type.as_str()),
            token: test.token,
            stage_id,
            command_type,
            status: status.to_string(),
            test_name: test.name,
        })
    }

    /// Current command snapshot for a test.
    pub fn get_pending_commands(&self, token: &str) -> Result<Vec<Command>> {
        self.require_test(token)?;
        Ok(derive_commands(&self.store.list_stages(token)))
    }

    /// Stop every STARTED stage of a test.
    pub fn deactivate_test(&self, token: &str) -> Result<DeactivatedTest> {
        let test = self.require_test(token)?;
        let stopped_stages: Vec<u64> = self
            .store
            .list_active_stages(token)
            .into_iter()
            .map(|stage| {
                self.store
                    .update_stage_status(token, stage.stage_id, StageStatus::Stopped);
                stage.stage_id
            })
            .collect();
        log::info!(
            "deactivated test {}: {} stage(s) stopped",
            test.token_prefix(),
            stopped_stages.len()
        );
        Ok(DeactivatedTest {
            message: format!("test '{}' deactivated", test.name),
            token: test.token,
            test_name: test.name,
            total_stopped: stopped_stages.len(),
            stopped_stages,
        })
    }

    /// All tests sorted by name, with their stage counts.
    pub fn list_tests(&self) -> TestList {
        let mut tests: Vec<TestSummary> = self
            .store
            .list_tests()
            .into_iter()
            .map(|t| TestSummary {
                stages_count: self.store.list_stages(&t.token).len(),
                name: t.name,
                token: t.token,
            })
            .collect();
        tests.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.token.cmp(&b.token)));
        TestList {
            total_count: tests.len(),
            tests,
        }
    }

    pub fn test_detail(&self, token: &str) -> Result<TestDetail> {
        let test = self.require_test(token)?;
        let stages = self.store.list_stages(token);
        Ok(TestDetail {
            name: test.name,
            token: test.token,
            stages_count: stages.len(),
            stages,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::MemoryStageStore;

    fn service() -> TrackingService {
        TrackingService::new(Arc::new(MemoryStageStore::new()))
    }

    // -----------------------------------------------------------------------
    // Command derivation
    // -----------------------------------------------------------------------

    #[test]
    fn test_created_stage_emits_nothing() {
        let svc = service();
        let test = svc.create_test("T").unwrap();
        svc.store().create_stage(&test.token, None, None).unwrap();
        assert!(svc.get_pending_commands(&test.token).unwrap().is_empty());
    }

    #[test]
    fn test_poll_is_a_repeatable_snapshot() {
        let svc = service();
        let test = svc.create_test("T").unwrap();
        let cp = CalibrationPoint::new(2).unwrap();
        svc.send_start_command(&test.token, Some(7), Some(cp)).unwrap();
        let second = svc.send_start_command(&test.token, None, None).unwrap();
        svc.send_stop_command(&test.token, second.stage_id).unwrap();

        let first_poll = svc.get_pending_commands(&test.token).unwrap();
        let second_poll = svc.get_pending_commands(&test.token).unwrap();

        assert_eq!(first_poll.len(), 2);
        assert_eq!(first_poll[0].command, CommandKind::Start);
        assert_eq!(first_poll[0].test_number, Some(7));
        assert_eq!(first_poll[0].calibration_point, Some(cp));
        assert_eq!(first_poll[1].command, CommandKind::Stop);
        assert_eq!(first_poll[1].status, StageStatus::Stopped);
        assert_eq!(first_poll, second_poll);
    }

    #[test]
    fn test_poll_unknown_token() {
        let svc = service();
        assert!(matches!(
            svc.get_pending_commands("nope"),
            Err(Error::NotFound(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Start / stop
    // -----------------------------------------------------------------------

    #[test]
    fn test_start_allocates_sequential_ids() {
        let svc = service();
        let test = svc.create_test("T").unwrap();
        let ids: Vec<u64> = (0..3)
            .map(|_| {
                svc.send_start_command(&test.token, None, None)
                    .unwrap()
                    .stage_id
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_start_unknown_token() {
        let svc = service();
        assert!(matches!(
            svc.send_start_command("nope", None, None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_stop_only_from_started() {
        let svc = service();
        let test = svc.create_test("T").unwrap();
        let created = svc.store().create_stage(&test.token, None, None).unwrap();
        assert!(matches!(
            svc.send_stop_command(&test.token, created.stage_id),
            Err(Error::BadRequest(_))
        ));

        let started = svc.send_start_command(&test.token, None, None).unwrap();
        let stopped = svc.send_stop_command(&test.token, started.stage_id).unwrap();
        assert_eq!(stopped.test_name, "T");
        assert!(matches!(
            svc.send_stop_command(&test.token, started.stage_id),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_stop_unknown_stage() {
        let svc = service();
        let test = svc.create_test("T").unwrap();
        assert!(matches!(
            svc.send_stop_command(&test.token, 9),
            Err(Error::NotFound(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Ack, deactivate, admin views
    // -----------------------------------------------------------------------

    #[test]
    fn test_webhook_ack_does_not_change_state() {
        let svc = service();
        let test = svc.create_test("T").unwrap();
        let started = svc.send_start_command(&test.token, None, None).unwrap();
        let ack = svc
            .webhook_ack(&test.token, started.stage_id, CommandKind::Stop, "done")
            .unwrap();
        assert_eq!(ack.status, "done");
        assert_eq!(
            svc.store()
                .get_stage(&test.token, started.stage_id)
                .unwrap()
                .status,
            StageStatus::Started
        );
        assert!(matches!(
            svc.webhook_ack(&test.token, 99, CommandKind::Start, "ok"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_deactivate_stops_started_stages_only() {
        let svc = service();
        let test = svc.create_test("T").unwrap();
        svc.send_start_command(&test.token, None, None).unwrap();
        svc.send_start_command(&test.token, None, None).unwrap();
        svc.send_stop_command(&test.token, 1).unwrap();
        svc.store().create_stage(&test.token, None, None).unwrap();

        let report = svc.deactivate_test(&test.token).unwrap();
        assert_eq!(report.stopped_stages, vec![2]);
        assert_eq!(report.total_stopped, 1);
        assert!(svc.store().list_active_stages(&test.token).is_empty());
        assert_eq!(
            svc.store().get_stage(&test.token, 3).unwrap().status,
            StageStatus::Created
        );
    }

    #[test]
    fn test_list_tests_sorted_by_name() {
        let svc = service();
        let b = svc.create_test("beta").unwrap();
        svc.create_test("alpha").unwrap();
        svc.send_start_command(&b.token, None, None).unwrap();

        let list = svc.list_tests();
        assert_eq!(list.total_count, 2);
        assert_eq!(list.tests[0].name, "alpha");
        assert_eq!(list.tests[1].stages_count, 1);

        let detail = svc.test_detail(&b.token).unwrap();
        assert_eq!(detail.stages_count, 1);
        assert_eq!(detail.stages[0].status, StageStatus::Started);
    }

    #[test]
    fn test_command_wire_shape() {
        let stage = Stage {
            test_token: "tok".into(),
            stage_id: 3,
            status: StageStatus::Started,
            test_number: None,
            calibration_point: None,
        };
        let cmd = Command::from_stage(&stage).unwrap();
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "start");
        assert_eq!(json["status"], "started");
        assert_eq!(json["stage_id"], 3);
        assert!(json["calibration_point"].is_null());
    }
}
