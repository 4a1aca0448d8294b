//! Artifact storage and the upload/list/download service.
//!
//! # Storage Format
//!
//! Each test gets one directory under the data root, named
//! `{sanitized_test_name}_{token[:8]}`, holding flat files
//! `{heatmap|heatmap_first|heatmap_long}_{stage}.csv`. A rendered image may
//! sit next to a table as `{kind}_{stage}.png`; downloads prefer the CSV.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactKind, parse_file_name};
use crate::error::{Error, Result};
use crate::lifecycle::{StageStore, Test};

const PNG_SIGNATURE: &[u8] = b"\x89PNG";

/// Content types accepted for a CSV upload.
const CSV_CONTENT_TYPES: &[&str] = &[
    "text/csv",
    "text/plain",
    "application/octet-stream",
];

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Metadata for one stored artifact file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub filename: String,
    pub path: String,
    pub token: String,
    pub stage_id: u64,
    pub kind: ArtifactKind,
    pub test_name: String,
    pub upload_time: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactList {
    pub files: Vec<ArtifactInfo>,
    pub total_count: usize,
}

/// Bytes of a downloaded artifact plus what to call them.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ArtifactFile {
    pub fn is_png(&self) -> bool {
        self.content_type == "image/png"
    }
}

/// `image/png` when the bytes carry the PNG signature, CSV text otherwise.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(PNG_SIGNATURE) {
        "image/png"
    } else {
        "text/csv"
    }
}

/// Keep alphanumerics, spaces, `-` and `_`, trim, then turn spaces into `_`.
pub fn sanitize_test_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim().replace(' ', "_")
}

pub fn test_dir_name(test: &Test) -> String {
    format!("{}_{}", sanitize_test_name(&test.name), test.token_prefix())
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Where uploaded artifacts live.
pub trait ArtifactStore: Send + Sync {
    fn save(&self, test: &Test, filename: &str, bytes: &[u8]) -> Result<ArtifactInfo>;

    /// Every artifact stored for `test`, sorted by file name.
    fn list(&self, test: &Test) -> Result<Vec<ArtifactInfo>>;

    fn read(&self, test: &Test, kind: ArtifactKind, stage_id: u64) -> Result<ArtifactFile>;
}

/// [`ArtifactStore`] on the local filesystem.
pub struct DiskArtifactStore {
    root: PathBuf,
}

impl DiskArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn test_dir(&self, test: &Test) -> PathBuf {
        self.root.join(test_dir_name(test))
    }

    /// Directories belonging to `test`. Matching is on the token suffix so a
    /// renamed test still finds its files.
    fn test_dirs(&self, test: &Test) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let suffix = format!("_{}", test.token_prefix());
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter(|e| e.file_name().to_string_lossy().ends_with(&suffix))
            .map(|e| e.path())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    fn describe(&self, test: &Test, path: &Path) -> Option<ArtifactInfo> {
        let filename = path.file_name()?.to_string_lossy().into_owned();
        let (kind, stage_id) = parse_file_name(&filename)?;
        let meta = fs::metadata(path).ok()?;
        let upload_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(format_iso8601)
            .unwrap_or_default();
        Some(ArtifactInfo {
            filename,
            path: path.to_string_lossy().into_owned(),
            token: test.token.clone(),
            stage_id,
            kind,
            test_name: test.name.clone(),
            upload_time,
            size: meta.len(),
        })
    }
}

impl ArtifactStore for DiskArtifactStore {
    fn save(&self, test: &Test, filename: &str, bytes: &[u8]) -> Result<ArtifactInfo> {
        let dir = self.test_dir(test);
        fs::create_dir_all(&dir)?;
        let path = dir.join(filename);
        fs::write(&path, bytes)?;
        log::info!("stored {} ({} bytes)", path.display(), bytes.len());
        self.describe(test, &path)
            .ok_or_else(|| Error::bad_request(format!("invalid artifact name: {filename}")))
    }

    fn list(&self, test: &Test) -> Result<Vec<ArtifactInfo>> {
        let mut files = Vec::new();
        for dir in self.test_dirs(test)? {
            for entry in fs::read_dir(&dir)?.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "csv") {
                    files.extend(self.describe(test, &path));
                }
            }
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    fn read(&self, test: &Test, kind: ArtifactKind, stage_id: u64) -> Result<ArtifactFile> {
        let stem = kind.file_stem(stage_id);
        for ext in ["csv", "png"] {
            for dir in self.test_dirs(test)? {
                let path = dir.join(format!("{stem}.{ext}"));
                if path.is_file() {
                    let bytes = fs::read(&path)?;
                    let content_type = sniff_content_type(&bytes);
                    let ext = if content_type == "image/png" { "png" } else { "csv" };
                    return Ok(ArtifactFile {
                        filename: format!("{stem}.{ext}"),
                        content_type,
                        bytes,
                    });
                }
            }
        }
        Err(Error::not_found(format!("artifact {stem} not found")))
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Upload, listing and download over the lifecycle store and an artifact store.
#[derive(Clone)]
pub struct DataService {
    stages: Arc<dyn StageStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl DataService {
    pub fn new(stages: Arc<dyn StageStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { stages, artifacts }
    }

    fn require_test(&self, token: &str) -> Result<Test> {
        self.stages
            .get_test(token)
            .ok_or_else(|| Error::not_found("test not found"))
    }

    /// Validate and store one artifact for `(token, stage_id)`.
    pub fn upload(
        &self,
        token: &str,
        stage_id: u64,
        filename: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<ArtifactInfo> {
        let test = self.require_test(token)?;
        if self.stages.get_stage(token, stage_id).is_none() {
            return Err(Error::not_found(format!("stage {stage_id} not found")));
        }

        if !filename.ends_with(".csv") {
            return Err(Error::bad_request("only CSV files are accepted"));
        }
        let (kind, named_stage) = parse_file_name(filename).ok_or_else(|| {
            Error::bad_request(format!(
                "file name must look like {{heatmap|heatmap_first|heatmap_long}}_{{stage}}.csv, got {filename}"
            ))
        })?;
        if named_stage != stage_id {
            return Err(Error::bad_request(format!(
                "file {filename} does not belong to stage {stage_id}"
            )));
        }
        if let Some(ct) = content_type {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            if !mime.is_empty() && !CSV_CONTENT_TYPES.contains(&mime.as_str()) {
                return Err(Error::bad_request(format!("unsupported content type: {ct}")));
            }
        }
        if bytes.is_empty() {
            return Err(Error::bad_request("uploaded file is empty"));
        }

        let info = self.artifacts.save(&test, &kind.file_name(stage_id), bytes)?;
        log::info!(
            "stage {stage_id} of {}: {} uploaded",
            test.token_prefix(),
            info.filename
        );
        Ok(info)
    }

    /// Stored artifacts, optionally narrowed by kind and stage.
    pub fn list(
        &self,
        token: &str,
        kind: Option<ArtifactKind>,
        stage_id: Option<u64>,
    ) -> Result<ArtifactList> {
        let test = self.require_test(token)?;
        let files: Vec<ArtifactInfo> = self
            .artifacts
            .list(&test)?
            .into_iter()
            .filter(|f| kind.is_none_or(|k| f.kind == k))
            .filter(|f| stage_id.is_none_or(|s| f.stage_id == s))
            .collect();
        Ok(ArtifactList {
            total_count: files.len(),
            files,
        })
    }

    pub fn download(&self, token: &str, stage_id: u64, kind: ArtifactKind) -> Result<ArtifactFile> {
        let test = self.require_test(token)?;
        self.artifacts.read(&test, kind, stage_id)
    }

    /// CSV text of a stored table. Images are rejected.
    pub fn read_table(&self, token: &str, stage_id: u64, kind: ArtifactKind) -> Result<String> {
        let file = self.download(token, stage_id, kind)?;
        if file.is_png() {
            return Err(Error::bad_request(format!(
                "{} is an image, not a table",
                file.filename
            )));
        }
        String::from_utf8(file.bytes)
            .map_err(|_| Error::bad_request(format!("{} is not valid UTF-8", file.filename)))
    }
}

// ---------------------------------------------------------------------------
// Time formatting
// ---------------------------------------------------------------------------

/// Format a duration-since-epoch as a full ISO-8601 timestamp.
/// Example: `2026-02-15T01:30:00Z`
pub fn format_iso8601(since_epoch: Duration) -> String {
    let (year, month, day, hour, min, sec) = secs_to_utc(since_epoch.as_secs());
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{min:02}:{sec:02}Z")
}

/// Seconds since the Unix epoch to (year, month, day, hour, minute, second) UTC.
fn secs_to_utc(secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let sec = secs % 60;
    let min = (secs / 60) % 60;
    let hour = (secs / 3600) % 24;

    let mut days = secs / 86400;
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let months_days: [u64; 12] = if is_leap(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 12u64;
    for (i, &md) in months_days.iter().enumerate() {
        if days < md {
            month = i as u64 + 1;
            break;
        }
        days -= md;
    }

    (year, month, days + 1, hour, min, sec)
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
