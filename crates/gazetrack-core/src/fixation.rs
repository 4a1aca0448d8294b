//! Fixation extraction.
//!
//! A single pass over a time-ordered buffer groups consecutive confident
//! samples that stay within `radius` of the running centroid. A cluster is
//! kept as a [`Fixation`] only if it spans at least `min_duration_ms`.
//!
//! The same routine serves both capture modes; only the [`FixationProfile`]
//! differs:
//!
//! | profile      | space      | radius | raw position epsilon |
//! |--------------|------------|--------|----------------------|
//! | `synthetic`  | pixels     | 50     | 0                    |
//! | `hardware`   | normalized | 0.01   | 0.01                 |

use serde::{Deserialize, Serialize};

use crate::gaze::GazeSample;

/// Coordinate space the samples are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Device pixels within the reference frame.
    Pixels,
    /// Fractions of the reference frame in `[0,1]`.
    Normalized,
}

/// Thresholds and frame geometry for one capture mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixationProfile {
    /// Maximum distance from the running centroid that still extends a cluster.
    pub radius: f64,
    /// Shortest cluster span kept as a fixation.
    pub min_duration_ms: f64,
    /// Samples below this confidence are discarded as noise.
    pub min_confidence: f64,
    /// Smallest move that counts as a new position in the raw artifact.
    pub position_epsilon: f64,
    pub space: CoordinateSpace,
    pub frame_width: f64,
    pub frame_height: f64,
    pub grid_cols: usize,
    pub grid_rows: usize,
}

impl FixationProfile {
    /// High-rate synthetic generator in device pixels.
    pub fn synthetic() -> Self {
        Self {
            radius: 50.0,
            min_duration_ms: 100.0,
            min_confidence: 0.7,
            position_epsilon: 0.0,
            space: CoordinateSpace::Pixels,
            frame_width: 1920.0,
            frame_height: 1080.0,
            grid_cols: 20,
            grid_rows: 15,
        }
    }

    /// Hardware tracker reporting normalized positions.
    pub fn hardware() -> Self {
        Self {
            radius: 0.01,
            position_epsilon: 0.01,
            space: CoordinateSpace::Normalized,
            ..Self::synthetic()
        }
    }

    /// Look up a preset by name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "synthetic" => Some(Self::synthetic()),
            "hardware" => Some(Self::hardware()),
            _ => None,
        }
    }

    pub fn accepts(&self, sample: &GazeSample) -> bool {
        sample.confidence >= self.min_confidence
    }
}

impl Default for FixationProfile {
    fn default() -> Self {
        Self::synthetic()
    }
}

/// A closed cluster of gaze samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fixation {
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
}

struct Cluster {
    sum_x: f64,
    sum_y: f64,
    start_time: f64,
    end_time: f64,
    members: usize,
}

impl Cluster {
    fn start(sample: &GazeSample) -> Self {
        Self {
            sum_x: sample.x,
            sum_y: sample.y,
            start_time: sample.timestamp_ms,
            end_time: sample.timestamp_ms,
            members: 1,
        }
    }

    fn centroid(&self) -> (f64, f64) {
        let n = self.members as f64;
        (self.sum_x / n, self.sum_y / n)
    }

    fn extend(&mut self, sample: &GazeSample) {
        self.sum_x += sample.x;
        self.sum_y += sample.y;
        self.end_time = sample.timestamp_ms;
        self.members += 1;
    }

    fn close(self, min_duration_ms: f64) -> Option<Fixation> {
        let duration = self.end_time - self.start_time;
        if duration < min_duration_ms {
            return None;
        }
        let (centroid_x, centroid_y) = self.centroid();
        Some(Fixation {
            centroid_x,
            centroid_y,
            start_time: self.start_time,
            end_time: self.end_time,
            duration,
        })
    }
}

/// Extract fixations from a time-ordered sample buffer.
pub fn extract_fixations(samples: &[GazeSample], profile: &FixationProfile) -> Vec<Fixation> {
    let mut fixations = Vec::new();
    let mut current: Option<Cluster> = None;

    for sample in samples.iter().filter(|s| profile.accepts(s)) {
        let within = current.as_ref().is_some_and(|c| {
            let (cx, cy) = c.centroid();
            sample.distance_to(cx, cy) < profile.radius
        });
        match current.as_mut() {
            Some(cluster) if within => cluster.extend(sample),
            _ => {
                if let Some(done) = current.replace(Cluster::start(sample)) {
                    fixations.extend(done.close(profile.min_duration_ms));
                }
            }
        }
    }

    if let Some(last) = current {
        fixations.extend(last.close(profile.min_duration_ms));
    }
    fixations
}
