//! # gazetrack-client
//!
//! The capture side of gazetrack. A [`CaptureRuntime`] polls the server's
//! command snapshot through a [`ControlChannel`], buffers gaze samples for
//! every started stage and uploads the three artifact tables when a stage is
//! stopped.
//!
//! ```no_run
//! use gazetrack_client::{CaptureRuntime, ClientConfig, HttpChannel};
//! use gazetrack_core::SyntheticGazeSource;
//!
//! # async fn demo() -> gazetrack_core::Result<()> {
//! let config = ClientConfig {
//!     token: "0123abcd...".into(),
//!     ..ClientConfig::default()
//! };
//! let channel = HttpChannel::new(&config.api_base_url, config.request_timeout)?;
//! let runtime = CaptureRuntime::new(channel, config)?;
//! let status = runtime
//!     .run(SyntheticGazeSource::default(), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//! println!("{} stop(s) processed", status.processed_stops);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod runtime;

use std::path::PathBuf;
use std::time::Duration;

use gazetrack_core::FixationProfile;

pub use channel::{ControlChannel, HttpChannel, LocalChannel};
pub use runtime::{CaptureRuntime, StopOutcome};

/// Capture client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://127.0.0.1:8000`.
    pub api_base_url: String,
    /// Token of the test to follow.
    pub token: String,
    pub poll_interval: Duration,
    pub sample_interval: Duration,
    pub status_interval: Duration,
    pub request_timeout: Duration,
    pub profile: FixationProfile,
    /// Where the processed-stop ledger is persisted. In-memory when unset.
    pub state_file: Option<PathBuf>,
    /// Directory for scratch CSV files. System temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".to_string(),
            token: String::new(),
            poll_interval: Duration::from_secs(2),
            sample_interval: Duration::from_millis(100),
            status_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            profile: FixationProfile::synthetic(),
            state_file: None,
            scratch_dir: None,
        }
    }
}
