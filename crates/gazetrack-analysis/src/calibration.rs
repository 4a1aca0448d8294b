//! Calibration boundary and screen-space normalization.
//!
//! The boundary is the bounding rectangle of up to four reference-point
//! files. Samples outside it are dropped; the rest are mapped into `[0,1]²`
//! with y flipped so that 1 is the top of the screen.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use gazetrack_core::artifact::RawRow;
use gazetrack_core::{ArtifactTable, Error, Result};

/// Maximum number of reference files read for one boundary.
pub const MAX_REFERENCE_FILES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBoundary {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl CalibrationBoundary {
    /// Bounding rectangle of `points`. Fails when it has zero width or height.
    pub fn from_points(points: &[(f64, f64)]) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::bad_request("no calibration points"));
        }
        let mut b = Self {
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_min: f64::INFINITY,
            y_max: f64::NEG_INFINITY,
        };
        for &(x, y) in points {
            b.x_min = b.x_min.min(x);
            b.x_max = b.x_max.max(x);
            b.y_min = b.y_min.min(y);
            b.y_max = b.y_max.max(y);
        }
        if b.x_max <= b.x_min || b.y_max <= b.y_min {
            return Err(Error::bad_request(format!(
                "calibration boundary is degenerate: x [{}, {}], y [{}, {}]",
                b.x_min, b.x_max, b.y_min, b.y_max
            )));
        }
        Ok(b)
    }

    /// Read up to [`MAX_REFERENCE_FILES`] CSV files with `x` and `y` columns.
    /// Missing or unreadable files are skipped with a warning.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut points = Vec::new();
        for path in paths.iter().take(MAX_REFERENCE_FILES) {
            let path = path.as_ref();
            let text = match fs::read_to_string(path) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("calibration file {} skipped: {e}", path.display());
                    continue;
                }
            };
            let table = match ArtifactTable::parse(&text) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("calibration file {} skipped: {e}", path.display());
                    continue;
                }
            };
            let xi = table.column("x").unwrap_or(0);
            let yi = table.column("y").unwrap_or(1);
            points.extend(
                table
                    .rows
                    .iter()
                    .filter(|r| r.len() > xi.max(yi))
                    .map(|r| (r[xi], r[yi])),
            );
        }
        Self::from_points(&points)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (self.x_min..=self.x_max).contains(&x) && (self.y_min..=self.y_max).contains(&y)
    }

    /// Map a point into `[0,1]²`, flipping y.
    pub fn normalize(&self, x: f64, y: f64) -> (f64, f64) {
        let nx = (x - self.x_min) / (self.x_max - self.x_min);
        let ny = 1.0 - (y - self.y_min) / (self.y_max - self.y_min);
        (nx, ny)
    }

    /// Drop rows outside the boundary and normalize the rest. Timing columns
    /// pass through untouched.
    pub fn apply(&self, rows: &[RawRow]) -> Vec<RawRow> {
        rows.iter()
            .filter(|r| self.contains(r.x, r.y))
            .map(|r| {
                let (x, y) = self.normalize(r.x, r.y);
                RawRow { x, y, ..*r }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_from_points() {
        let b = CalibrationBoundary::from_points(&[(100.0, 50.0), (900.0, 700.0), (500.0, 20.0)])
            .unwrap();
        assert_eq!((b.x_min, b.x_max, b.y_min, b.y_max), (100.0, 900.0, 20.0, 700.0));
    }

    #[test]
    fn test_degenerate_boundary_rejected() {
        assert!(CalibrationBoundary::from_points(&[(1.0, 1.0), (1.0, 5.0)]).is_err());
        assert!(CalibrationBoundary::from_points(&[]).is_err());
    }

    #[test]
    fn test_normalize_flips_y() {
        let b = CalibrationBoundary::from_points(&[(0.0, 0.0), (200.0, 100.0)]).unwrap();
        assert_eq!(b.normalize(0.0, 0.0), (0.0, 1.0));
        assert_eq!(b.normalize(200.0, 100.0), (1.0, 0.0));
        assert_eq!(b.normalize(50.0, 25.0), (0.25, 0.75));
    }

    #[test]
    fn test_apply_filters_outside() {
        let b = CalibrationBoundary::from_points(&[(0.0, 0.0), (10.0, 10.0)]).unwrap();
        let rows = [
            RawRow { x: 5.0, y: 5.0, t: 1.0, tn: 2.0 },
            RawRow { x: 11.0, y: 5.0, t: 3.0, tn: 4.0 },
            RawRow { x: 5.0, y: -1.0, t: 5.0, tn: 6.0 },
        ];
        let out = b.apply(&rows);
        assert_eq!(out, vec![RawRow { x: 0.5, y: 0.5, t: 1.0, tn: 2.0 }]);
    }

    #[test]
    fn test_from_files_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("calib1.csv");
        let c = dir.path().join("calib3.csv");
        fs::write(&a, "x,y,T,Tn\n10,20,0,0\n").unwrap();
        fs::write(&c, "x,y,T,Tn\n810,620,0,0\n").unwrap();
        let missing = dir.path().join("calib2.csv");

        let b = CalibrationBoundary::from_files(&[a, missing, c]).unwrap();
        assert_eq!((b.x_min, b.x_max, b.y_min, b.y_max), (10.0, 810.0, 20.0, 620.0));
    }
}
