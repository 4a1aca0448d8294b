//! Gaze samples and the producers that emit them.
//!
//! Acquisition hardware is opaque here: anything that can hand out
//! `(timestamp, x, y, confidence)` tuples implements [`GazeSource`].

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// One gaze reading. Timestamps are milliseconds on a shared wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    pub timestamp_ms: f64,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pupil_diameter: Option<f64>,
}

impl GazeSample {
    pub fn new(timestamp_ms: f64, x: f64, y: f64, confidence: f64) -> Self {
        Self {
            timestamp_ms,
            x,
            y,
            confidence,
            pupil_diameter: None,
        }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}

/// A producer of gaze samples.
pub trait GazeSource: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Produce the sample for `now_ms`, or `None` when nothing is available.
    fn next_sample(&mut self, now_ms: f64) -> Option<GazeSample>;
}

// ---------------------------------------------------------------------------
// Synthetic
// ---------------------------------------------------------------------------

/// Uniformly random gaze over a pixel frame. Stands in for a tracker during
/// protocol testing.
pub struct SyntheticGazeSource {
    width: f64,
    height: f64,
    rng: StdRng,
}

impl SyntheticGazeSource {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic variant for tests.
    pub fn seeded(width: f64, height: f64, seed: u64) -> Self {
        Self {
            width,
            height,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SyntheticGazeSource {
    fn default() -> Self {
        Self::new(1920.0, 1080.0)
    }
}

impl GazeSource for SyntheticGazeSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn next_sample(&mut self, now_ms: f64) -> Option<GazeSample> {
        Some(GazeSample {
            timestamp_ms: now_ms,
            x: self.rng.random_range(0.0..self.width),
            y: self.rng.random_range(0.0..self.height),
            confidence: self.rng.random_range(0.8..1.0),
            pupil_diameter: Some(self.rng.random_range(2.0..8.0)),
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted
// ---------------------------------------------------------------------------

/// Replays recorded samples in order, keeping their original timestamps.
pub struct ScriptedGazeSource {
    samples: VecDeque<GazeSample>,
}

impl ScriptedGazeSource {
    pub fn new(samples: impl IntoIterator<Item = GazeSample>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl GazeSource for ScriptedGazeSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn next_sample(&mut self, _now_ms: f64) -> Option<GazeSample> {
        self.samples.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_stays_in_frame() {
        let mut source = SyntheticGazeSource::seeded(1920.0, 1080.0, 7);
        for i in 0..500 {
            let s = source.next_sample(i as f64).unwrap();
            assert!((0.0..1920.0).contains(&s.x));
            assert!((0.0..1080.0).contains(&s.y));
            assert!((0.8..1.0).contains(&s.confidence));
            let pupil = s.pupil_diameter.unwrap();
            assert!((2.0..8.0).contains(&pupil));
            assert_eq!(s.timestamp_ms, i as f64);
        }
    }

    #[test]
    fn test_scripted_replays_then_exhausts() {
        let mut source = ScriptedGazeSource::new([
            GazeSample::new(10.0, 1.0, 2.0, 0.9),
            GazeSample::new(20.0, 3.0, 4.0, 0.9),
        ]);
        assert_eq!(source.next_sample(999.0).unwrap().timestamp_ms, 10.0);
        assert_eq!(source.remaining(), 1);
        assert_eq!(source.next_sample(999.0).unwrap().x, 3.0);
        assert!(source.next_sample(999.0).is_none());
    }

    #[test]
    fn test_now_ms_is_positive() {
        assert!(now_ms() > 1.0e12);
    }
}
