//! Stage lifecycle store.
//!
//! A test is addressed only by its token. Each test owns an ordered set of
//! stages whose ids come from a per-token counter starting at 1. Stages move
//! CREATED → STARTED → STOPPED; several stages of one test may be STARTED at
//! the same time.
//!
//! Storage sits behind the [`StageStore`] trait so the services can be handed
//! any backing store at construction. [`MemoryStageStore`] is the in-process
//! implementation used by the server and the tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of random bytes behind a test token.
const TOKEN_BYTES: usize = 24;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Created,
    Started,
    Stopped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four screen-corner calibration targets (1..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CalibrationPoint(u8);

impl CalibrationPoint {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;

    pub fn new(point: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&point) {
            Ok(Self(point))
        } else {
            Err(Error::bad_request(format!(
                "calibration point must be between {} and {}, got {point}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CalibrationPoint {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(value).map_err(|e| e.to_string())
    }
}

impl From<CalibrationPoint> for u8 {
    fn from(point: CalibrationPoint) -> Self {
        point.0
    }
}

/// A named test. The token is generated once and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    pub token: String,
}

impl Test {
    /// First eight characters of the token, used to key storage directories.
    pub fn token_prefix(&self) -> &str {
        token_prefix(&self.token)
    }
}

/// Short form of a token used in directory names and log lines.
pub fn token_prefix(token: &str) -> &str {
    match token.char_indices().nth(8) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}

/// One capture run within a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub test_token: String,
    pub stage_id: u64,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_point: Option<CalibrationPoint>,
}

/// Generate an unguessable hex token from the thread RNG.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Durable key/value state for tests and their stages.
pub trait StageStore: Send + Sync {
    /// Create a test under a freshly generated token.
    fn create_test(&self, name: &str) -> Result<Test>;

    fn get_test(&self, token: &str) -> Option<Test>;

    /// All tests, in no particular order.
    fn list_tests(&self) -> Vec<Test>;

    /// Allocate the next stage id for `token` and record it as CREATED.
    ///
    /// Fails with [`Error::NotFound`] when the token is unknown.
    fn create_stage(
        &self,
        token: &str,
        test_number: Option<u32>,
        calibration_point: Option<CalibrationPoint>,
    ) -> Result<Stage>;

    /// Overwrite a stage's status. Unknown tokens or stages are ignored.
    fn update_stage_status(&self, token: &str, stage_id: u64, status: StageStatus);

    fn get_stage(&self, token: &str, stage_id: u64) -> Option<Stage>;

    /// Every stage under `token`, ordered by stage id.
    fn list_stages(&self, token: &str) -> Vec<Stage>;

    /// Stages currently STARTED, ordered by stage id.
    fn list_active_stages(&self, token: &str) -> Vec<Stage> {
        self.list_stages(token)
            .into_iter()
            .filter(|s| s.status == StageStatus::Started)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

struct TestRecord {
    test: Test,
    last_stage_id: u64,
    stages: BTreeMap<u64, Stage>,
}

/// Process-local [`StageStore`]. Allocation and updates happen under one lock,
/// so stage ids never collide under concurrent creation.
#[derive(Default)]
pub struct MemoryStageStore {
    tests: Mutex<HashMap<String, TestRecord>>,
}

impl MemoryStageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TestRecord>> {
        self.tests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StageStore for MemoryStageStore {
    fn create_test(&self, name: &str) -> Result<Test> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::bad_request("test name must not be empty"));
        }

        let mut tests = self.lock();
        let mut token = generate_token();
        while tests.contains_key(&token) {
            token = generate_token();
        }
        let test = Test {
            name: name.to_string(),
            token: token.clone(),
        };
        tests.insert(
            token,
            TestRecord {
                test: test.clone(),
                last_stage_id: 0,
                stages: BTreeMap::new(),
            },
        );
        Ok(test)
    }

    fn get_test(&self, token: &str) -> Option<Test> {
        self.lock().get(token).map(|r| r.test.clone())
    }

    fn list_tests(&self) -> Vec<Test> {
        self.lock().values().map(|r| r.test.clone()).collect()
    }

    fn create_stage(
        &self,
        token: &str,
        test_number: Option<u32>,
        calibration_point: Option<CalibrationPoint>,
    ) -> Result<Stage> {
        let mut tests = self.lock();
        let record = tests
            .get_mut(token)
            .ok_or_else(|| Error::not_found("test not found"))?;

        record.last_stage_id += 1;
        let stage = Stage {
            test_token: token.to_string(),
            stage_id: record.last_stage_id,
            status: StageStatus::Created,
            test_number,
            calibration_point,
        };
        record.stages.insert(stage.stage_id, stage.clone());
        Ok(stage)
    }

    fn update_stage_status(&self, token: &str, stage_id: u64, status: StageStatus) {
        let mut tests = self.lock();
        if let Some(stage) = tests
            .get_mut(token)
            .and_then(|r| r.stages.get_mut(&stage_id))
        {
            stage.status = status;
        }
    }

    fn get_stage(&self, token: &str, stage_id: u64) -> Option<Stage> {
        self.lock()
            .get(token)
            .and_then(|r| r.stages.get(&stage_id).cloned())
    }

    fn list_stages(&self, token: &str) -> Vec<Stage> {
        self.lock()
            .get(token)
            .map(|r| r.stages.values().cloned().collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
