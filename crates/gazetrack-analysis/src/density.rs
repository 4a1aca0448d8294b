//! Weighted 2-D Gaussian kernel density over normalized screen space.
//!
//! The estimator follows the usual weighted KDE construction: weights are
//! normalized to sum to one, the effective sample size is `1/Σw²`, the data
//! covariance is the reliability-weighted covariance `Σw(x-μ)(y-μ) / (1-Σw²)`,
//! and the kernel covariance is that scaled by `factor²`. Scott's rule gives
//! `factor = neff^(-1/6)` in two dimensions; the weighted heatmaps halve it
//! for sharper localization.
//!
//! # Weightings
//!
//! - [`Weighting::Uniform`]: raw attention density.
//! - [`Weighting::EarlyAttention`]: `1 − norm(T)`, earlier gaze weighs more.
//! - [`Weighting::Dwell`]: `norm(Tn)`, longer dwell weighs more.
//!
//! `norm` is min-max over the whole sample set. When every value is equal the
//! weights all collapse to 0 and the grid comes back fully masked.

use std::f64::consts::PI;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use gazetrack_core::artifact::RawRow;
use gazetrack_core::{ArtifactKind, Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Weights
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    Uniform,
    EarlyAttention,
    Dwell,
}

impl Weighting {
    pub const ALL: [Weighting; 3] = [Self::Uniform, Self::EarlyAttention, Self::Dwell];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::EarlyAttention => "early_attention",
            Self::Dwell => "dwell",
        }
    }

    /// The stored heatmap each weighting renders.
    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            Self::Uniform => ArtifactKind::Heatmap,
            Self::EarlyAttention => ArtifactKind::HeatmapFirst,
            Self::Dwell => ArtifactKind::HeatmapLong,
        }
    }

    /// Multiplier applied to Scott's factor.
    pub fn bandwidth_scale(&self) -> f64 {
        match self {
            Self::Uniform => 1.0,
            Self::EarlyAttention | Self::Dwell => 0.5,
        }
    }

    /// Per-row weights, or `None` for the uniform case. A zero-width
    /// T or Tn range weighs every row equally.
    pub fn weights(&self, rows: &[RawRow]) -> Option<Vec<f64>> {
        let (values, invert): (Vec<f64>, bool) = match self {
            Self::Uniform => return None,
            Self::EarlyAttention => (rows.iter().map(|r| r.t).collect(), true),
            Self::Dwell => (rows.iter().map(|r| r.tn).collect(), false),
        };
        Some(match min_max_normalize(&values) {
            Some(norm) if invert => norm.into_iter().map(|v| 1.0 - v).collect(),
            Some(norm) => norm,
            None => vec![1.0; values.len()],
        })
    }
}

impl fmt::Display for Weighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weighting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| Error::bad_request(format!("unknown weighting: {s}")))
    }
}

/// Min-max scale into `[0,1]`. `None` when the range is empty or zero.
pub fn min_max_normalize(values: &[f64]) -> Option<Vec<f64>> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if values.is_empty() || !range.is_finite() || range <= 0.0 {
        return None;
    }
    Some(values.iter().map(|v| (v - min) / range).collect())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Estimator
// ═══════════════════════════════════════════════════════════════════════════════

/// Fitted 2-D Gaussian KDE.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    points: Vec<(f64, f64)>,
    weights: Vec<f64>,
    inv_cov: [[f64; 2]; 2],
    norm: f64,
    factor: f64,
    neff: f64,
}

impl GaussianKde {
    /// Fit over `points`. `weights` must be non-negative with a positive sum;
    /// `bandwidth_scale` multiplies Scott's factor.
    pub fn fit(points: &[(f64, f64)], weights: Option<&[f64]>, bandwidth_scale: f64) -> Result<Self> {
        if points.len() < 2 {
            return Err(Error::bad_request(format!(
                "density needs at least 2 samples, got {}",
                points.len()
            )));
        }
        let weights: Vec<f64> = match weights {
            Some(w) if w.len() != points.len() => {
                return Err(Error::bad_request("weights and samples differ in length"));
            }
            Some(w) => {
                let total: f64 = w.iter().sum();
                if !total.is_finite() || total <= 0.0 || w.iter().any(|v| *v < 0.0) {
                    return Err(Error::bad_request("weights must be non-negative with a positive sum"));
                }
                w.iter().map(|v| v / total).collect()
            }
            None => vec![1.0 / points.len() as f64; points.len()],
        };

        let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
        let neff = 1.0 / sum_sq;
        let factor = neff.powf(-1.0 / 6.0) * bandwidth_scale;

        let (mx, my) = points
            .iter()
            .zip(&weights)
            .fold((0.0, 0.0), |(ax, ay), (&(x, y), w)| (ax + w * x, ay + w * y));
        let mut cov = [[0.0f64; 2]; 2];
        for (&(x, y), w) in points.iter().zip(&weights) {
            let (dx, dy) = (x - mx, y - my);
            cov[0][0] += w * dx * dx;
            cov[0][1] += w * dx * dy;
            cov[1][1] += w * dy * dy;
        }
        let denom = 1.0 - sum_sq;
        if denom <= 0.0 {
            return Err(Error::bad_request("effective sample size too small for a density"));
        }
        let f2 = factor * factor;
        let (a, b, d) = (cov[0][0] / denom * f2, cov[0][1] / denom * f2, cov[1][1] / denom * f2);
        let det = a * d - b * b;
        if !det.is_finite() || det <= f64::EPSILON * (a * d).abs().max(f64::MIN_POSITIVE) {
            return Err(Error::bad_request(
                "sample covariance is singular (points are collinear or identical)",
            ));
        }

        Ok(Self {
            points: points.to_vec(),
            weights,
            inv_cov: [[d / det, -b / det], [-b / det, a / det]],
            norm: 1.0 / (2.0 * PI * det.sqrt()),
            factor,
            neff,
        })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn neff(&self) -> f64 {
        self.neff
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let [[p, q], [_, s]] = self.inv_cov;
        self.points
            .iter()
            .zip(&self.weights)
            .map(|(&(px, py), w)| {
                let (dx, dy) = (x - px, y - py);
                let m = p * dx * dx + 2.0 * q * dx * dy + s * dy * dy;
                w * (-0.5 * m).exp()
            })
            .sum::<f64>()
            * self.norm
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Grid
// ═══════════════════════════════════════════════════════════════════════════════

/// Grid extent and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    pub resolution: usize,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            resolution: 100,
            x_range: (0.0, 1.0),
            y_range: (0.0, 1.0),
        }
    }
}

/// Padding around the sample extent when the grid follows the data.
pub const DATA_RANGE_PADDING: f64 = 0.05;

impl DensityConfig {
    /// Same resolution, with the grid spanning the samples' min/max padded
    /// by [`DATA_RANGE_PADDING`]. Empty input keeps the current ranges.
    pub fn fitted_to(&self, rows: &[RawRow]) -> Self {
        let pad = |(lo, hi): (f64, f64)| (lo - DATA_RANGE_PADDING, hi + DATA_RANGE_PADDING);
        match (
            extent(rows.iter().map(|r| r.x)),
            extent(rows.iter().map(|r| r.y)),
        ) {
            (Some(x), Some(y)) => Self {
                x_range: pad(x),
                y_range: pad(y),
                ..*self
            },
            _ => *self,
        }
    }
}

fn extent(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
        None => Some((v, v)),
    })
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Density evaluated over a uniform grid. `density[j][i]` is at
/// `(xs[i], ys[j])`; `mask[j][i]` is true where the density is exactly 0.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    pub weighting: Weighting,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub density: Vec<Vec<f64>>,
    pub mask: Vec<Vec<bool>>,
}

impl DensityGrid {
    fn zeros(weighting: Weighting, xs: Vec<f64>, ys: Vec<f64>) -> Self {
        let density = vec![vec![0.0; xs.len()]; ys.len()];
        let mask = vec![vec![true; xs.len()]; ys.len()];
        Self {
            weighting,
            xs,
            ys,
            density,
            mask,
        }
    }

    pub fn cell_area(&self) -> f64 {
        let step = |v: &[f64]| {
            if v.len() > 1 {
                (v[v.len() - 1] - v[0]) / (v.len() - 1) as f64
            } else {
                0.0
            }
        };
        step(&self.xs) * step(&self.ys)
    }

    /// Riemann sum of the density over the grid.
    pub fn integral(&self) -> f64 {
        self.density.iter().flatten().sum::<f64>() * self.cell_area()
    }

    pub fn max_density(&self) -> f64 {
        self.density.iter().flatten().copied().fold(0.0, f64::max)
    }

    pub fn masked_count(&self) -> usize {
        self.mask.iter().flatten().filter(|m| **m).count()
    }

    /// CSV matrix: a header of x coordinates, then one row per y.
    /// Masked cells are left blank.
    pub fn write_csv<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write!(w, "y\\x")?;
        for x in &self.xs {
            write!(w, ",{x}")?;
        }
        writeln!(w)?;
        for (j, y) in self.ys.iter().enumerate() {
            write!(w, "{y}")?;
            for (i, d) in self.density[j].iter().enumerate() {
                if self.mask[j][i] {
                    write!(w, ",")?;
                } else {
                    write!(w, ",{d}")?;
                }
            }
            writeln!(w)?;
        }
        Ok(())
    }
}

/// Evaluate the weighted density of normalized rows over the grid.
pub fn compute_density(
    rows: &[RawRow],
    weighting: Weighting,
    config: &DensityConfig,
) -> Result<DensityGrid> {
    let xs = linspace(config.x_range.0, config.x_range.1, config.resolution);
    let ys = linspace(config.y_range.0, config.y_range.1, config.resolution);

    let weights = weighting.weights(rows);
    if weights
        .as_ref()
        .is_some_and(|w| w.iter().all(|v| *v == 0.0))
    {
        log::warn!("{weighting} weights are all zero; density grid fully masked");
        return Ok(DensityGrid::zeros(weighting, xs, ys));
    }

    let points: Vec<(f64, f64)> = rows.iter().map(|r| (r.x, r.y)).collect();
    let kde = GaussianKde::fit(&points, weights.as_deref(), weighting.bandwidth_scale())?;
    log::debug!(
        "{weighting} density: n={} neff={:.1} factor={:.4}",
        points.len(),
        kde.neff(),
        kde.factor()
    );

    let mut grid = DensityGrid::zeros(weighting, xs, ys);
    for (j, &y) in grid.ys.iter().enumerate() {
        for (i, &x) in grid.xs.iter().enumerate() {
            let d = kde.evaluate(x, y);
            grid.density[j][i] = d;
            grid.mask[j][i] = d == 0.0;
        }
    }
    Ok(grid)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic cloud around (0.5, 0.5) with spread well inside the unit square.
    fn cloud(n: usize) -> Vec<RawRow> {
        (0..n)
            .map(|i| {
                let a = i as f64 * 2.399_963;
                let r = 0.12 * ((i as f64 + 0.5) / n as f64).sqrt();
                RawRow {
                    x: 0.5 + r * a.cos(),
                    y: 0.5 + r * a.sin(),
                    t: i as f64 * 100.0,
                    tn: (i % 7) as f64 * 10.0 + 5.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_linspace_endpoints() {
        let v = linspace(0.0, 1.0, 5);
        assert_eq!(v, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_min_max_normalize() {
        assert_eq!(min_max_normalize(&[2.0, 4.0, 3.0]), Some(vec![0.0, 1.0, 0.5]));
        assert_eq!(min_max_normalize(&[5.0, 5.0]), None);
        assert_eq!(min_max_normalize(&[]), None);
    }

    #[test]
    fn test_equal_times_weigh_rows_equally() {
        let rows: Vec<RawRow> = cloud(10)
            .into_iter()
            .map(|r| RawRow { t: 42.0, tn: 7.0, ..r })
            .collect();
        for w in [Weighting::EarlyAttention, Weighting::Dwell] {
            assert!(w.weights(&rows).unwrap().iter().all(|v| *v == 1.0));
        }
    }

    #[test]
    fn test_early_attention_with_one_timestamp_is_not_empty() {
        let rows = vec![
            RawRow { x: 0.3, y: 0.4, t: 1.0, tn: 0.0 },
            RawRow { x: 0.5, y: 0.6, t: 1.0, tn: 0.0 },
            RawRow { x: 0.7, y: 0.5, t: 1.0, tn: 0.0 },
        ];
        let grid =
            compute_density(&rows, Weighting::EarlyAttention, &DensityConfig::default()).unwrap();
        assert!(grid.max_density() > 0.1);
        assert!(grid.masked_count() < 100 * 100);
    }

    #[test]
    fn test_fitted_config_pads_sample_extent() {
        let rows = vec![
            RawRow { x: 500.0, y: 400.0, t: 0.0, tn: 0.0 },
            RawRow { x: 1200.0, y: 700.0, t: 1.0, tn: 0.0 },
        ];
        let config = DensityConfig { resolution: 40, ..Default::default() }.fitted_to(&rows);
        assert_eq!(config.resolution, 40);
        assert_eq!(config.x_range, (500.0 - 0.05, 1200.0 + 0.05));
        assert_eq!(config.y_range, (400.0 - 0.05, 700.0 + 0.05));
        assert_eq!(DensityConfig::default().fitted_to(&[]), DensityConfig::default());
    }

    #[test]
    fn test_early_attention_favors_early_samples() {
        let rows = cloud(5);
        let w = Weighting::EarlyAttention.weights(&rows).unwrap();
        assert_eq!(w[0], 1.0);
        assert_eq!(w[4], 0.0);
    }

    #[test]
    fn test_uniform_density_integrates_to_one() {
        let grid = compute_density(&cloud(200), Weighting::Uniform, &DensityConfig::default()).unwrap();
        let total = grid.integral();
        assert!((total - 1.0).abs() < 0.03, "integral = {total}");
        assert_eq!(grid.density.len(), 100);
        assert_eq!(grid.density[0].len(), 100);
    }

    #[test]
    fn test_weighted_bandwidth_is_halved() {
        let pts: Vec<(f64, f64)> = cloud(50).iter().map(|r| (r.x, r.y)).collect();
        let plain = GaussianKde::fit(&pts, None, 1.0).unwrap();
        let sharp = GaussianKde::fit(&pts, None, 0.5).unwrap();
        assert!((sharp.factor() - plain.factor() / 2.0).abs() < 1e-12);
        assert!((plain.factor() - 50f64.powf(-1.0 / 6.0)).abs() < 1e-12);
        // Sharper kernel concentrates more mass at the center.
        assert!(sharp.evaluate(0.5, 0.5) > plain.evaluate(0.5, 0.5));
    }

    #[test]
    fn test_neff_from_weights() {
        let pts = [(0.1, 0.2), (0.4, 0.9), (0.8, 0.3), (0.5, 0.5)];
        let kde = GaussianKde::fit(&pts, Some(&[1.0, 1.0, 2.0, 0.0]), 1.0).unwrap();
        // normalized weights 0.25, 0.25, 0.5, 0 → Σw² = 0.375
        assert!((kde.neff() - 1.0 / 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        assert!(GaussianKde::fit(&[(0.5, 0.5)], None, 1.0).is_err());
        assert!(GaussianKde::fit(&[(0.1, 0.1), (0.2, 0.2), (0.3, 0.3)], None, 1.0).is_err());
        assert!(GaussianKde::fit(&[(0.1, 0.1), (0.9, 0.3)], Some(&[1.0]), 1.0).is_err());
        assert!(GaussianKde::fit(&[(0.1, 0.1), (0.9, 0.3), (0.2, 0.7)], Some(&[1.0, 0.0, 0.0]), 1.0).is_err());
    }

    #[test]
    fn test_csv_export_shape() {
        let config = DensityConfig {
            resolution: 4,
            ..DensityConfig::default()
        };
        let grid = compute_density(&cloud(20), Weighting::Dwell, &config).unwrap();
        let mut buf = Vec::new();
        grid.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("y\\x,0,"));
        assert!(lines.iter().all(|l| l.split(',').count() == 5));
    }

    #[test]
    fn test_weighting_names() {
        for w in Weighting::ALL {
            assert_eq!(w.as_str().parse::<Weighting>().unwrap(), w);
        }
        assert_eq!(Weighting::Dwell.artifact_kind(), ArtifactKind::HeatmapLong);
    }
}
