//! Per-stage artifacts.
//!
//! A stopped capture session turns into three CSV files:
//!
//! - `heatmap_{stage}.csv`: `x,y,T,Tn` one row per retained position, where
//!   `T` is ms since session start and `Tn` is the dwell at that position.
//! - `heatmap_first_{stage}.csv`: `x,y,time_to_first_fixation` for every cell
//!   of a 20×15 grid over the 1920×1080 reference frame, 0 when the cell never
//!   saw a confident sample.
//! - `heatmap_long_{stage}.csv`: `x,y,fixation_duration` per fixation.
//!
//! [`ArtifactTable`] parses any of them back, skipping malformed rows.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::fixation::{CoordinateSpace, Fixation, FixationProfile, extract_fixations};
use crate::gaze::GazeSample;

// ---------------------------------------------------------------------------
// Kinds and file names
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Heatmap,
    HeatmapFirst,
    HeatmapLong,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Heatmap, Self::HeatmapFirst, Self::HeatmapLong];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heatmap => "heatmap",
            Self::HeatmapFirst => "heatmap_first",
            Self::HeatmapLong => "heatmap_long",
        }
    }

    pub fn header(&self) -> &'static str {
        match self {
            Self::Heatmap => "x,y,T,Tn",
            Self::HeatmapFirst => "x,y,time_to_first_fixation",
            Self::HeatmapLong => "x,y,fixation_duration",
        }
    }

    /// Column summarized by the statistics engine.
    pub fn value_column(&self) -> &'static str {
        match self {
            Self::Heatmap => "Tn",
            Self::HeatmapFirst => "time_to_first_fixation",
            Self::HeatmapLong => "fixation_duration",
        }
    }

    /// Zero means "no event here" rather than a real measurement.
    pub fn is_time_oriented(&self) -> bool {
        !matches!(self, Self::Heatmap)
    }

    pub fn file_stem(&self, stage_id: u64) -> String {
        format!("{}_{stage_id}", self.as_str())
    }

    pub fn file_name(&self, stage_id: u64) -> String {
        format!("{}.csv", self.file_stem(stage_id))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::bad_request(format!("unknown artifact type: {s}")))
    }
}

/// Split `{kind}_{stage}.{ext}` into its kind and stage id.
///
/// The stage is whatever follows the last underscore, so `heatmap_first_3.csv`
/// parses as `(HeatmapFirst, 3)`.
pub fn parse_file_name(name: &str) -> Option<(ArtifactKind, u64)> {
    let (stem, _ext) = name.rsplit_once('.')?;
    let (kind, stage) = stem.rsplit_once('_')?;
    Some((kind.parse().ok()?, stage.parse().ok()?))
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "T")]
    pub t: f64,
    #[serde(rename = "Tn")]
    pub tn: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridRow {
    pub x: f64,
    pub y: f64,
    pub time_to_first_fixation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationRow {
    pub x: f64,
    pub y: f64,
    pub fixation_duration: f64,
}

/// Positions with their dwell times.
///
/// The first sample anchors a position. Each later sample that moves more
/// than `position_epsilon` away closes the anchor as a row: `T` is the time of
/// the move since `start_ms`, `Tn` is how long the anchor was held. The last
/// anchor is flushed at the final sample's time.
pub fn build_raw_rows(
    samples: &[GazeSample],
    start_ms: f64,
    profile: &FixationProfile,
) -> Vec<RawRow> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };

    let mut rows = Vec::with_capacity(samples.len());
    let mut anchor = *first;
    for sample in &samples[1..] {
        let moved = sample.distance_to(anchor.x, anchor.y);
        if moved > profile.position_epsilon {
            rows.push(RawRow {
                x: anchor.x,
                y: anchor.y,
                t: sample.timestamp_ms - start_ms,
                tn: sample.timestamp_ms - anchor.timestamp_ms,
            });
            anchor = *sample;
        }
    }

    let end = samples.last().map_or(anchor.timestamp_ms, |s| s.timestamp_ms);
    rows.push(RawRow {
        x: anchor.x,
        y: anchor.y,
        t: end - start_ms,
        tn: end - anchor.timestamp_ms,
    });
    rows
}

/// Time to the first confident sample in every grid cell, column-major
/// (x outer, y inner).
pub fn build_grid_rows(
    samples: &[GazeSample],
    start_ms: f64,
    profile: &FixationProfile,
) -> Vec<GridRow> {
    let cols = profile.grid_cols.max(1);
    let rows = profile.grid_rows.max(1);
    let cell_w = profile.frame_width / cols as f64;
    let cell_h = profile.frame_height / rows as f64;

    let mut first_seen: Vec<Option<f64>> = vec![None; cols * rows];
    for sample in samples.iter().filter(|s| profile.accepts(s)) {
        let (px, py) = match profile.space {
            CoordinateSpace::Pixels => (sample.x, sample.y),
            CoordinateSpace::Normalized => {
                (sample.x * profile.frame_width, sample.y * profile.frame_height)
            }
        };
        if !(0.0..=profile.frame_width).contains(&px) || !(0.0..=profile.frame_height).contains(&py)
        {
            continue;
        }
        let gx = ((px / cell_w) as usize).min(cols - 1);
        let gy = ((py / cell_h) as usize).min(rows - 1);
        let slot = &mut first_seen[gx * rows + gy];
        if slot.is_none() {
            *slot = Some(sample.timestamp_ms - start_ms);
        }
    }

    let scale = |cx: f64, cy: f64| match profile.space {
        CoordinateSpace::Pixels => (cx, cy),
        CoordinateSpace::Normalized => (cx / profile.frame_width, cy / profile.frame_height),
    };

    let mut out = Vec::with_capacity(cols * rows);
    for gx in 0..cols {
        for gy in 0..rows {
            let (x, y) = scale(
                gx as f64 * cell_w + cell_w / 2.0,
                gy as f64 * cell_h + cell_h / 2.0,
            );
            out.push(GridRow {
                x,
                y,
                time_to_first_fixation: first_seen[gx * rows + gy].unwrap_or(0.0),
            });
        }
    }
    out
}

pub fn build_duration_rows(fixations: &[Fixation]) -> Vec<DurationRow> {
    fixations
        .iter()
        .map(|f| DurationRow {
            x: f.centroid_x,
            y: f.centroid_y,
            fixation_duration: f.duration,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Artifact set
// ---------------------------------------------------------------------------

/// The three derived tables for one stage.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub stage_id: u64,
    pub raw: Vec<RawRow>,
    pub first: Vec<GridRow>,
    pub long: Vec<DurationRow>,
    pub fixations: Vec<Fixation>,
}

impl ArtifactSet {
    pub fn build(
        stage_id: u64,
        samples: &[GazeSample],
        start_ms: f64,
        profile: &FixationProfile,
    ) -> Self {
        let fixations = extract_fixations(samples, profile);
        Self {
            stage_id,
            raw: build_raw_rows(samples, start_ms, profile),
            first: build_grid_rows(samples, start_ms, profile),
            long: build_duration_rows(&fixations),
            fixations,
        }
    }

    pub fn row_count(&self, kind: ArtifactKind) -> usize {
        match kind {
            ArtifactKind::Heatmap => self.raw.len(),
            ArtifactKind::HeatmapFirst => self.first.len(),
            ArtifactKind::HeatmapLong => self.long.len(),
        }
    }

    pub fn write_csv<W: Write>(&self, kind: ArtifactKind, w: &mut W) -> io::Result<()> {
        writeln!(w, "{}", kind.header())?;
        match kind {
            ArtifactKind::Heatmap => {
                for r in &self.raw {
                    writeln!(w, "{},{},{},{}", r.x, r.y, r.t, r.tn)?;
                }
            }
            ArtifactKind::HeatmapFirst => {
                for r in &self.first {
                    writeln!(w, "{},{},{}", r.x, r.y, r.time_to_first_fixation)?;
                }
            }
            ArtifactKind::HeatmapLong => {
                for r in &self.long {
                    writeln!(w, "{},{},{}", r.x, r.y, r.fixation_duration)?;
                }
            }
        }
        Ok(())
    }

    pub fn to_csv(&self, kind: ArtifactKind) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_csv(kind, &mut buf)?;
        Ok(buf)
    }

    /// Write every table to a temporary file under `dir` (or the system temp
    /// dir). The files are removed when the returned handles drop.
    pub fn write_scratch(&self, dir: Option<&Path>) -> io::Result<Vec<ScratchArtifact>> {
        ArtifactKind::ALL
            .into_iter()
            .map(|kind| {
                let prefix = format!("{}_", kind.file_stem(self.stage_id));
                let mut builder = tempfile::Builder::new();
                builder.prefix(&prefix).suffix(".csv");
                let mut file = match dir {
                    Some(dir) => builder.tempfile_in(dir)?,
                    None => builder.tempfile()?,
                };
                self.write_csv(kind, &mut file)?;
                file.flush()?;
                Ok(ScratchArtifact {
                    kind,
                    file_name: kind.file_name(self.stage_id),
                    file,
                })
            })
            .collect()
    }
}

/// A table written to disk awaiting upload. Deleted on drop.
pub struct ScratchArtifact {
    pub kind: ArtifactKind,
    /// Name the server expects, e.g. `heatmap_long_3.csv`.
    pub file_name: String,
    file: NamedTempFile,
}

impl ScratchArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        std::fs::read(self.file.path())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// `(x, y, value)` view of an artifact row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRow {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// A parsed CSV artifact: header plus every row whose fields all parse.
#[derive(Debug, Clone)]
pub struct ArtifactTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub skipped: usize,
}

impl ArtifactTable {
    /// Parse CSV text. Fails when there is no row after the header.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let header: Vec<String> = lines
            .next()
            .ok_or_else(|| Error::bad_request("artifact is empty"))?
            .split(',')
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        let mut seen = 0usize;
        for line in lines {
            seen += 1;
            let parsed: std::result::Result<Vec<f64>, _> =
                line.split(',').map(|f| f.trim().parse::<f64>()).collect();
            match parsed {
                Ok(values) if values.len() == header.len() && values.iter().all(|v| v.is_finite()) => {
                    rows.push(values)
                }
                _ => skipped += 1,
            }
        }
        if seen == 0 {
            return Err(Error::bad_request("artifact has a header but no data rows"));
        }
        if skipped > 0 {
            log::debug!("skipped {skipped} malformed artifact row(s)");
        }
        Ok(Self {
            header,
            rows,
            skipped,
        })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Project rows onto `(x, y, value)` using the kind's value column.
    pub fn value_rows(&self, kind: ArtifactKind) -> Vec<ValueRow> {
        let last = self.header.len().saturating_sub(1);
        let xi = self.column("x").unwrap_or(0);
        let yi = self.column("y").unwrap_or(1.min(last));
        let vi = self.column(kind.value_column()).unwrap_or(last);
        self.rows
            .iter()
            .map(|r| ValueRow {
                x: r[xi],
                y: r[yi],
                value: r[vi],
            })
            .collect()
    }

    /// Rows of a raw `x,y,T,Tn` table.
    pub fn raw_rows(&self) -> Result<Vec<RawRow>> {
        let col = |name: &str| {
            self.column(name)
                .ok_or_else(|| Error::bad_request(format!("artifact has no '{name}' column")))
        };
        let (xi, yi, ti, tni) = (col("x")?, col("y")?, col("T")?, col("Tn")?);
        Ok(self
            .rows
            .iter()
            .map(|r| RawRow {
                x: r[xi],
                y: r[yi],
                t: r[ti],
                tn: r[tni],
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(points: &[(f64, f64, f64)]) -> Vec<GazeSample> {
        points
            .iter()
            .map(|&(t, x, y)| GazeSample::new(t, x, y, 0.95))
            .collect()
    }

    // -----------------------------------------------------------------------
    // File names
    // -----------------------------------------------------------------------

    #[test]
    fn test_file_name_round_trip() {
        for kind in ArtifactKind::ALL {
            assert_eq!(parse_file_name(&kind.file_name(12)), Some((kind, 12)));
        }
        assert_eq!(parse_file_name("heatmap_x.csv"), None);
        assert_eq!(parse_file_name("other_1.csv"), None);
        assert_eq!(parse_file_name("heatmap_1"), None);
    }

    // -----------------------------------------------------------------------
    // Raw rows
    // -----------------------------------------------------------------------

    #[test]
    fn test_raw_rows_collapse_repeated_positions() {
        let s = samples(&[
            (1000.0, 0.1, 0.1),
            (1050.0, 0.1, 0.1),
            (1200.0, 0.1, 0.1),
            (1300.0, 0.9, 0.9),
            (1400.0, 0.9, 0.9),
        ]);
        let rows = build_raw_rows(&s, 1000.0, &FixationProfile::hardware());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], RawRow { x: 0.1, y: 0.1, t: 300.0, tn: 300.0 });
        assert_eq!(rows[1], RawRow { x: 0.9, y: 0.9, t: 400.0, tn: 100.0 });
    }

    #[test]
    fn test_raw_rows_zero_epsilon_keeps_every_move() {
        let s = samples(&[(0.0, 1.0, 1.0), (10.0, 2.0, 1.0), (30.0, 3.0, 1.0)]);
        let rows = build_raw_rows(&s, 0.0, &FixationProfile::synthetic());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].tn, 20.0);
        assert_eq!(rows[2].tn, 0.0);
    }

    #[test]
    fn test_raw_rows_empty() {
        assert!(build_raw_rows(&[], 0.0, &FixationProfile::synthetic()).is_empty());
    }

    // -----------------------------------------------------------------------
    // Grid rows
    // -----------------------------------------------------------------------

    #[test]
    fn test_grid_covers_frame_in_column_major_order() {
        let rows = build_grid_rows(&[], 0.0, &FixationProfile::synthetic());
        assert_eq!(rows.len(), 300);
        assert_eq!((rows[0].x, rows[0].y), (48.0, 36.0));
        assert_eq!((rows[1].x, rows[1].y), (48.0, 108.0));
        assert_eq!((rows[15].x, rows[15].y), (144.0, 36.0));
        assert!(rows.iter().all(|r| r.time_to_first_fixation == 0.0));
    }

    #[test]
    fn test_grid_records_first_confident_sample() {
        let mut s = samples(&[(250.0, 10.0, 10.0), (400.0, 20.0, 20.0)]);
        s.insert(0, GazeSample::new(100.0, 10.0, 10.0, 0.2));
        let rows = build_grid_rows(&s, 0.0, &FixationProfile::synthetic());
        assert_eq!(rows[0].time_to_first_fixation, 250.0);
    }

    #[test]
    fn test_grid_normalized_space() {
        let s = samples(&[(500.0, 0.99, 0.99), (600.0, 1.0, 1.0)]);
        let rows = build_grid_rows(&s, 0.0, &FixationProfile::hardware());
        let last = rows.last().unwrap();
        assert!((last.x - (1872.0 / 1920.0)).abs() < 1e-12);
        assert_eq!(last.time_to_first_fixation, 500.0);
    }

    // -----------------------------------------------------------------------
    // CSV
    // -----------------------------------------------------------------------

    #[test]
    fn test_write_then_reload_preserves_rows() {
        let mut pts = Vec::new();
        for i in 0..10 {
            pts.push((i as f64 * 30.0, 300.5, 200.25));
        }
        for i in 0..10 {
            pts.push((400.0 + i as f64 * 30.0, 1500.0, 900.0));
        }
        let set = ArtifactSet::build(4, &samples(&pts), 0.0, &FixationProfile::synthetic());
        for kind in ArtifactKind::ALL {
            let bytes = set.to_csv(kind).unwrap();
            let text = String::from_utf8(bytes).unwrap();
            assert!(text.starts_with(kind.header()));
            let table = ArtifactTable::parse(&text).unwrap();
            assert_eq!(table.rows.len(), set.row_count(kind));
        }

        let long = ArtifactTable::parse(&String::from_utf8(set.to_csv(ArtifactKind::HeatmapLong).unwrap()).unwrap())
            .unwrap()
            .value_rows(ArtifactKind::HeatmapLong);
        assert_eq!(long.len(), 2);
        assert!((long[0].x - 300.5).abs() < 1e-9);
        assert!((long[0].value - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_skips_bad_rows() {
        let table = ArtifactTable::parse("x,y,fixation_duration\n1,2,3\nbad,row,here\n4,5\n6,7,8\n").unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.skipped, 2);
    }

    #[test]
    fn test_parse_header_only_fails() {
        assert!(matches!(ArtifactTable::parse("x,y,T,Tn\n"), Err(Error::BadRequest(_))));
        assert!(matches!(ArtifactTable::parse(""), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_raw_rows_require_columns() {
        let table = ArtifactTable::parse("x,y,fixation_duration\n1,2,3\n").unwrap();
        assert!(table.raw_rows().is_err());
    }

    #[test]
    fn test_scratch_files_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let set = ArtifactSet::build(1, &samples(&[(0.0, 1.0, 1.0)]), 0.0, &FixationProfile::synthetic());
        let scratch = set.write_scratch(Some(dir.path())).unwrap();
        assert_eq!(scratch.len(), 3);
        let paths: Vec<_> = scratch.iter().map(|s| s.path().to_path_buf()).collect();
        assert!(paths.iter().all(|p| p.exists()));
        assert_eq!(scratch[2].file_name, "heatmap_long_1.csv");
        assert!(scratch[0].read().unwrap().starts_with(b"x,y,T,Tn"));
        drop(scratch);
        assert!(paths.iter().all(|p| !p.exists()));
    }
}
