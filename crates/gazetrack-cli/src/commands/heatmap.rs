//! Offline density grid over a raw heatmap table.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use gazetrack_analysis::{CalibrationBoundary, DensityConfig, DensityGrid, Weighting, density_from_csv};
use gazetrack_core::Result;

pub fn run(
    input: &Path,
    calibration: &[PathBuf],
    weighting: &str,
    resolution: usize,
    output: Option<&Path>,
) -> Result<()> {
    let weighting: Weighting = weighting.parse()?;
    let text = fs::read_to_string(input)?;
    let boundary = if calibration.is_empty() {
        None
    } else {
        Some(CalibrationBoundary::from_files(calibration)?)
    };
    let config = DensityConfig {
        resolution,
        ..DensityConfig::default()
    };

    let grid = density_from_csv(&text, boundary.as_ref(), weighting, &config)?;
    print_summary(&grid, boundary.as_ref());

    if let Some(path) = output {
        write_grid(&grid, path)?;
        println!("  Wrote {}", path.display());
    }
    Ok(())
}

fn print_summary(grid: &DensityGrid, boundary: Option<&CalibrationBoundary>) {
    println!("Density ({})", grid.weighting);
    if let Some(b) = boundary {
        println!(
            "  boundary     x [{}, {}]  y [{}, {}]",
            b.x_min, b.x_max, b.y_min, b.y_max
        );
    }
    println!("  grid         {}x{}", grid.xs.len(), grid.ys.len());
    println!("  max density  {:.4}", grid.max_density());
    println!("  integral     {:.4}", grid.integral());
    println!("  masked cells {}", grid.masked_count());
}

fn write_grid(grid: &DensityGrid, path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    grid.write_csv(&mut out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_table() -> String {
        let mut text = String::from("x,y,T,Tn\n");
        for i in 0..40 {
            let a = f64::from(i) * 0.7;
            let r = 40.0 + f64::from(i % 7) * 10.0;
            text.push_str(&format!("{},{},{},{}\n", 500.0 + r * a.cos(), 400.0 + r * a.sin(), i * 100, 100 + i % 5));
        }
        text
    }

    #[test]
    fn test_heatmap_with_calibration_writes_grid() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("heatmap_1.csv");
        fs::write(&input, raw_table()).unwrap();
        let calib = dir.path().join("calib.csv");
        fs::write(&calib, "x,y,T,Tn\n0,0,0,0\n1000,800,0,0\n").unwrap();
        let output = dir.path().join("density.csv");

        run(&input, &[calib], "dwell", 20, Some(&output)).unwrap();

        let written = fs::read_to_string(&output).unwrap();
        // Header row plus one row per y.
        assert_eq!(written.lines().count(), 21);
    }

    #[test]
    fn test_heatmap_without_calibration_spans_pixel_samples() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("heatmap_1.csv");
        fs::write(&input, raw_table()).unwrap();
        let output = dir.path().join("density.csv");

        run(&input, &[], "uniform", 20, Some(&output)).unwrap();

        let written = fs::read_to_string(&output).unwrap();
        let header: Vec<f64> = written
            .lines()
            .next()
            .unwrap()
            .split(',')
            .skip(1)
            .map(|v| v.parse().unwrap())
            .collect();
        assert!(header[0] > 390.0 && header[0] < 500.0);
        assert!(header[19] > 500.0 && header[19] < 610.0);
        let filled = written
            .lines()
            .skip(1)
            .flat_map(|l| l.split(',').skip(1))
            .filter(|c| !c.is_empty())
            .count();
        assert!(filled > 0);
    }

    #[test]
    fn test_heatmap_rejects_unknown_weighting() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("heatmap_1.csv");
        fs::write(&input, raw_table()).unwrap();
        assert!(run(&input, &[], "loudest", 20, None).is_err());
    }
}
