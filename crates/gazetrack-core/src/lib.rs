//! # gazetrack-core
//!
//! Backend-held stage lifecycle and the capture-side machinery that follows it.
//!
//! ## Architecture
//!
//! Store → Protocol → Session Manager → Fixation Extractor → Artifacts
//!
//! - [`lifecycle`]: tests, stages and the [`StageStore`] that owns them.
//! - [`protocol`]: the polled command snapshot and [`TrackingService`].
//! - [`session`]: the capture-side [`SessionManager`] that deduplicates
//!   the repeating commands.
//! - [`fixation`]: one parameterized clustering pass for both capture modes.
//! - [`artifact`]: the three per-stage CSV tables and their parser.
//! - [`storage`]: where uploaded tables live and [`DataService`] on top.
//!
//! ```
//! use std::sync::Arc;
//! use gazetrack_core::{MemoryStageStore, TrackingService};
//!
//! let service = TrackingService::new(Arc::new(MemoryStageStore::new()));
//! let test = service.create_test("reading").unwrap();
//! let stage = service.send_start_command(&test.token, None, None).unwrap();
//! assert_eq!(stage.stage_id, 1);
//! assert_eq!(service.get_pending_commands(&test.token).unwrap().len(), 1);
//! ```

pub mod artifact;
pub mod error;
pub mod fixation;
pub mod gaze;
pub mod lifecycle;
pub mod protocol;
pub mod session;
pub mod storage;

pub use artifact::{ArtifactKind, ArtifactSet, ArtifactTable, ScratchArtifact, ValueRow};
pub use error::{Error, Result};
pub use fixation::{CoordinateSpace, Fixation, FixationProfile, extract_fixations};
pub use gaze::{GazeSample, GazeSource, ScriptedGazeSource, SyntheticGazeSource, now_ms};
pub use lifecycle::{CalibrationPoint, MemoryStageStore, Stage, StageStatus, StageStore, Test};
pub use protocol::{Command, CommandKind, TrackingService};
pub use session::{CaptureSession, ProcessedStops, SessionManager, SessionStatus, StopJob};
pub use storage::{ArtifactFile, ArtifactInfo, ArtifactStore, DataService, DiskArtifactStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
