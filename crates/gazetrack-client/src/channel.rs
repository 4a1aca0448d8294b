//! Control channels between the capture client and the server.
//!
//! [`ControlChannel`] is the seam the runtime talks through. Two
//! implementations:
//!
//! - [`HttpChannel`] speaks the server's JSON API over `reqwest`.
//! - [`LocalChannel`] calls [`TrackingService`] and [`DataService`] in-process,
//!   which lets the full capture loop run without a listener.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use gazetrack_core::protocol::{
    CreatedTest, DeactivatedTest, StartedStage, StoppedStage, WebhookAck,
};
use gazetrack_core::storage::ArtifactList;
use gazetrack_core::{
    ArtifactInfo, ArtifactKind, CalibrationPoint, Command, CommandKind, DataService, Error,
    Result, TrackingService,
};

/// Calls the capture runtime makes against the server.
pub trait ControlChannel: Send + Sync + 'static {
    /// Current command snapshot for `token`.
    fn poll_commands(&self, token: &str) -> impl Future<Output = Result<Vec<Command>>> + Send;

    /// Upload one artifact table for `(token, stage_id)`.
    fn upload_artifact(
        &self,
        token: &str,
        stage_id: u64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<ArtifactInfo>> + Send;

    /// Move a started stage to stopped.
    fn stop_stage(
        &self,
        token: &str,
        stage_id: u64,
    ) -> impl Future<Output = Result<StoppedStage>> + Send;

    /// Report the outcome of handling a command.
    fn webhook_ack(
        &self,
        token: &str,
        stage_id: u64,
        command_type: CommandKind,
        status: &str,
    ) -> impl Future<Output = Result<WebhookAck>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// JSON-over-HTTP channel to a running `gazetrack server`.
#[derive(Clone)]
pub struct HttpChannel {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct StartBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    test_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    calibration_point: Option<CalibrationPoint>,
}

impl HttpChannel {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::bad_request("api base url must not be empty"));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map a non-2xx reply to the error taxonomy using its `detail` field.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
                .unwrap_or(body);
            return Err(Error::from_status(status.as_u16(), detail));
        }
        response.json().await.map_err(transport)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }

    // -- experimenter-side calls used by the CLI --

    pub async fn create_test(&self, name: &str) -> Result<CreatedTest> {
        self.post_json("/api/tracking/tests", &serde_json::json!({ "name": name }))
            .await
    }

    pub async fn start_stage(
        &self,
        token: &str,
        test_number: Option<u32>,
        calibration_point: Option<CalibrationPoint>,
    ) -> Result<StartedStage> {
        let body = StartBody {
            test_number,
            calibration_point,
        };
        self.post_json(&format!("/api/tracking/{token}/start"), &body)
            .await
    }

    pub async fn deactivate_test(&self, token: &str) -> Result<DeactivatedTest> {
        self.post_json(
            &format!("/api/tracking/{token}/deactivate"),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn list_artifacts(
        &self,
        token: &str,
        kind: Option<ArtifactKind>,
        stage_id: Option<u64>,
    ) -> Result<ArtifactList> {
        let mut query = Vec::new();
        if let Some(kind) = kind {
            query.push(("type", kind.as_str().to_string()));
        }
        if let Some(stage_id) = stage_id {
            query.push(("stage_id", stage_id.to_string()));
        }
        self.get_json(&format!("/api/data/{token}/files"), &query)
            .await
    }

    /// Statistics for one stored artifact, as the server renders them.
    pub async fn stats(
        &self,
        token: &str,
        stage_id: u64,
        kind: ArtifactKind,
    ) -> Result<serde_json::Value> {
        let query = [
            ("stage_id", stage_id.to_string()),
            ("type", kind.as_str().to_string()),
        ];
        self.get_json(&format!("/api/data/{token}/stats"), &query)
            .await
    }

    /// Raw bytes of one stored artifact.
    pub async fn download(&self, token: &str, stage_id: u64, kind: ArtifactKind) -> Result<Vec<u8>> {
        let query = [
            ("stage_id", stage_id.to_string()),
            ("type", kind.as_str().to_string()),
        ];
        let response = self
            .client
            .get(self.url(&format!("/api/data/{token}/download")))
            .query(&query)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status.as_u16(), detail));
        }
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}

fn transport(e: reqwest::Error) -> Error {
    Error::Transport(e.to_string())
}

impl ControlChannel for HttpChannel {
    async fn poll_commands(&self, token: &str) -> Result<Vec<Command>> {
        self.get_json(&format!("/api/tracking/{token}/commands"), &[])
            .await
    }

    async fn upload_artifact(
        &self,
        token: &str,
        stage_id: u64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<ArtifactInfo> {
        let query = [
            ("stage_id", stage_id.to_string()),
            ("filename", filename.to_string()),
        ];
        let response = self
            .client
            .post(self.url(&format!("/api/data/{token}/upload")))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(bytes)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }

    async fn stop_stage(&self, token: &str, stage_id: u64) -> Result<StoppedStage> {
        self.post_json(
            &format!("/api/tracking/{token}/stop"),
            &serde_json::json!({ "stage_id": stage_id }),
        )
        .await
    }

    async fn webhook_ack(
        &self,
        token: &str,
        stage_id: u64,
        command_type: CommandKind,
        status: &str,
    ) -> Result<WebhookAck> {
        self.post_json(
            &format!("/api/tracking/{token}/webhook"),
            &serde_json::json!({
                "stage_id": stage_id,
                "command_type": command_type,
                "status": status,
            }),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// Channel that calls the services directly.
#[derive(Clone)]
pub struct LocalChannel {
    tracking: TrackingService,
    data: DataService,
}

impl LocalChannel {
    pub fn new(tracking: TrackingService, data: DataService) -> Self {
        Self { tracking, data }
    }

    pub fn tracking(&self) -> &TrackingService {
        &self.tracking
    }

    pub fn data(&self) -> &DataService {
        &self.data
    }
}

impl ControlChannel for LocalChannel {
    async fn poll_commands(&self, token: &str) -> Result<Vec<Command>> {
        self.tracking.get_pending_commands(token)
    }

    async fn upload_artifact(
        &self,
        token: &str,
        stage_id: u64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<ArtifactInfo> {
        self.data
            .upload(token, stage_id, filename, Some("text/csv"), &bytes)
    }

    async fn stop_stage(&self, token: &str, stage_id: u64) -> Result<StoppedStage> {
        self.tracking.send_stop_command(token, stage_id)
    }

    async fn webhook_ack(
        &self,
        token: &str,
        stage_id: u64,
        command_type: CommandKind,
        status: &str,
    ) -> Result<WebhookAck> {
        self.tracking
            .webhook_ack(token, stage_id, command_type, status)
    }
}
