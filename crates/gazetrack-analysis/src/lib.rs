//! Analysis over stored gaze artifacts.
//!
//! - [`stats`]: kind-specific summaries (extremum points, mean, median, counts).
//! - [`calibration`]: the reference-point boundary and `[0,1]²` normalization.
//! - [`density`]: weighted Gaussian KDE heatmaps with zero-density masking.

pub mod calibration;
pub mod density;
pub mod stats;

pub use calibration::CalibrationBoundary;
pub use density::{DensityConfig, DensityGrid, GaussianKde, Weighting, compute_density};
pub use stats::{ArtifactStats, compute_stats, stats_from_csv};

use gazetrack_core::{ArtifactTable, Result};

/// Density of a raw `x,y,T,Tn` table.
///
/// With a boundary, samples are filtered and normalized into `config`'s
/// grid. Without one the grid follows the samples' own extent.
pub fn density_from_csv(
    text: &str,
    boundary: Option<&CalibrationBoundary>,
    weighting: Weighting,
    config: &DensityConfig,
) -> Result<DensityGrid> {
    let rows = ArtifactTable::parse(text)?.raw_rows()?;
    let (rows, config) = match boundary {
        Some(b) => {
            let kept = b.apply(&rows);
            if kept.len() < rows.len() {
                log::info!(
                    "{} of {} sample(s) outside the calibration boundary dropped",
                    rows.len() - kept.len(),
                    rows.len()
                );
            }
            (kept, *config)
        }
        None => {
            let fitted = config.fitted_to(&rows);
            (rows, fitted)
        }
    };
    compute_density(&rows, weighting, &config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncalibrated_pixel_samples_land_on_grid() {
        let text = "x,y,T,Tn\n500,400,0,100\n900,600,100,200\n1200,700,200,100\n";
        let grid =
            density_from_csv(text, None, Weighting::Uniform, &DensityConfig::default()).unwrap();
        assert_eq!(grid.xs.len(), 100);
        assert!((grid.xs[0] - 499.95).abs() < 1e-9);
        assert!((grid.ys[99] - 700.05).abs() < 1e-9);
        assert!(grid.max_density() > 1e-8);
        assert!(grid.masked_count() < 100 * 100);
    }
}
