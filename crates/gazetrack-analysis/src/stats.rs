//! Aggregate statistics over a stored artifact.
//!
//! Every artifact reduces to `(x, y, value)` rows. `median_point` is always a
//! positional pick: the row at index `⌊n/2⌋` of the value-sorted list, which
//! is not the interpolated median for even `n`. The interpolated medians
//! (`median_time`, `median_duration`) are reported separately.
//!
//! For the time-oriented tables a value of 0 means "nothing happened here".
//! Those rows count toward `total_areas` but are left out of the fastest or
//! shortest extremum and of the mean/median population.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

use gazetrack_core::{ArtifactKind, ArtifactTable, Error, Result, ValueRow};

// ═══════════════════════════════════════════════════════════════════════════════
// Report types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatPoint {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

impl From<ValueRow> for StatPoint {
    fn from(r: ValueRow) -> Self {
        Self {
            x: r.x,
            y: r.y,
            value: r.value,
        }
    }
}

/// `heatmap` (dwell) summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapStats {
    pub max_point: StatPoint,
    pub mean_value: f64,
    pub median_point: StatPoint,
    pub total_points: usize,
}

/// `heatmap_first` (time to first fixation) summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstFixationStats {
    pub fastest_point: StatPoint,
    pub slowest_point: StatPoint,
    pub mean_time: f64,
    pub median_time: f64,
    pub median_point: StatPoint,
    pub total_areas: usize,
}

/// `heatmap_long` (fixation duration) summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub longest_point: StatPoint,
    pub shortest_point: StatPoint,
    pub mean_duration: f64,
    pub median_duration: f64,
    pub median_point: StatPoint,
    pub total_fixations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactStats {
    Heatmap(HeatmapStats),
    FirstFixation(FirstFixationStats),
    Duration(DurationStats),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Primitives
// ═══════════════════════════════════════════════════════════════════════════════

/// Row with the greatest value; the earliest wins ties.
pub fn max_point(rows: &[ValueRow]) -> Option<ValueRow> {
    rows.iter()
        .copied()
        .reduce(|best, r| if r.value > best.value { r } else { best })
}

/// Row with the smallest value; the earliest wins ties.
pub fn min_point(rows: &[ValueRow]) -> Option<ValueRow> {
    rows.iter()
        .copied()
        .reduce(|best, r| if r.value < best.value { r } else { best })
}

/// Row at index `⌊n/2⌋` of the value-sorted list.
pub fn median_point(rows: &[ValueRow]) -> Option<ValueRow> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| a.value.total_cmp(&b.value));
    sorted.get(sorted.len() / 2).copied()
}

fn values(rows: &[ValueRow]) -> Vec<f64> {
    rows.iter().map(|r| r.value).collect()
}

fn mean(rows: &[ValueRow]) -> f64 {
    values(rows).iter().mean()
}

fn median(rows: &[ValueRow]) -> f64 {
    Data::new(values(rows)).median()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Per-kind summaries
// ═══════════════════════════════════════════════════════════════════════════════

fn no_points() -> Error {
    Error::bad_request("no valid data points")
}

/// Summarize parsed rows of one artifact kind.
pub fn compute_stats(kind: ArtifactKind, rows: &[ValueRow]) -> Result<ArtifactStats> {
    if rows.is_empty() {
        return Err(no_points());
    }

    if !kind.is_time_oriented() {
        return Ok(ArtifactStats::Heatmap(HeatmapStats {
            max_point: max_point(rows).ok_or_else(no_points)?.into(),
            mean_value: mean(rows),
            median_point: median_point(rows).ok_or_else(no_points)?.into(),
            total_points: rows.len(),
        }));
    }

    let events: Vec<ValueRow> = rows.iter().copied().filter(|r| r.value > 0.0).collect();
    if events.is_empty() {
        return Err(Error::bad_request(format!(
            "{kind} has no non-zero {}",
            kind.value_column()
        )));
    }
    let low: StatPoint = min_point(&events).ok_or_else(no_points)?.into();
    let high: StatPoint = max_point(&events).ok_or_else(no_points)?.into();
    let mid: StatPoint = median_point(&events).ok_or_else(no_points)?.into();

    Ok(match kind {
        ArtifactKind::HeatmapFirst => ArtifactStats::FirstFixation(FirstFixationStats {
            fastest_point: low,
            slowest_point: high,
            mean_time: mean(&events),
            median_time: median(&events),
            median_point: mid,
            total_areas: rows.len(),
        }),
        _ => ArtifactStats::Duration(DurationStats {
            longest_point: high,
            shortest_point: low,
            mean_duration: mean(&events),
            median_duration: median(&events),
            median_point: mid,
            total_fixations: events.len(),
        }),
    })
}

/// Parse CSV text and summarize it.
pub fn stats_from_csv(kind: ArtifactKind, text: &str) -> Result<ArtifactStats> {
    let table = ArtifactTable::parse(text)?;
    compute_stats(kind, &table.value_rows(kind))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[f64]) -> Vec<ValueRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| ValueRow {
                x: i as f64,
                y: 10.0 * i as f64,
                value,
            })
            .collect()
    }

    #[test]
    fn test_max_point_dominates() {
        let r = rows(&[3.0, 9.0, 1.0, 9.0, 4.0]);
        let max = max_point(&r).unwrap();
        assert!(r.iter().all(|row| max.value >= row.value));
        assert_eq!(max.x, 1.0);
    }

    #[test]
    fn test_median_point_is_positional() {
        let r = rows(&[4.0, 1.0, 3.0, 2.0]);
        // Sorted: 1,2,3,4 → index 2 → value 3, not the interpolated 2.5.
        assert_eq!(median_point(&r).unwrap().value, 3.0);
        assert_eq!(median(&r), 2.5);
    }

    #[test]
    fn test_heatmap_summary() {
        let ArtifactStats::Heatmap(s) = compute_stats(ArtifactKind::Heatmap, &rows(&[0.0, 10.0, 20.0])).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(s.total_points, 3);
        assert_eq!(s.mean_value, 10.0);
        assert_eq!(s.max_point.value, 20.0);
        assert_eq!(s.median_point.value, 10.0);
    }

    #[test]
    fn test_first_fixation_excludes_zero() {
        let ArtifactStats::FirstFixation(s) =
            compute_stats(ArtifactKind::HeatmapFirst, &rows(&[0.0, 300.0, 0.0, 100.0, 200.0])).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(s.fastest_point.value, 100.0);
        assert_eq!(s.slowest_point.value, 300.0);
        assert_eq!(s.mean_time, 200.0);
        assert_eq!(s.median_time, 200.0);
        assert_eq!(s.total_areas, 5);
    }

    #[test]
    fn test_duration_counts_only_fixations() {
        let ArtifactStats::Duration(s) =
            compute_stats(ArtifactKind::HeatmapLong, &rows(&[150.0, 0.0, 450.0])).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(s.total_fixations, 2);
        assert_eq!(s.longest_point.value, 450.0);
        assert_eq!(s.shortest_point.value, 150.0);
        assert_eq!(s.mean_duration, 300.0);
    }

    #[test]
    fn test_all_zero_time_table_rejected() {
        assert!(matches!(
            compute_stats(ArtifactKind::HeatmapFirst, &rows(&[0.0, 0.0])),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_csv_errors_and_skips() {
        assert!(matches!(
            stats_from_csv(ArtifactKind::HeatmapLong, "x,y,fixation_duration\n"),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            stats_from_csv(ArtifactKind::HeatmapLong, "x,y,fixation_duration\na,b,c\n"),
            Err(Error::BadRequest(_))
        ));
        let stats = stats_from_csv(
            ArtifactKind::HeatmapLong,
            "x,y,fixation_duration\n1,1,200\nbroken\n2,2,400\n",
        )
        .unwrap();
        let ArtifactStats::Duration(s) = stats else {
            panic!("wrong variant");
        };
        assert_eq!(s.total_fixations, 2);
    }

    #[test]
    fn test_heatmap_reads_tn_column() {
        let stats = stats_from_csv(ArtifactKind::Heatmap, "x,y,T,Tn\n1,1,500,50\n2,2,900,400\n").unwrap();
        let ArtifactStats::Heatmap(s) = stats else {
            panic!("wrong variant");
        };
        assert_eq!(s.max_point.value, 400.0);
        assert_eq!(s.max_point.x, 2.0);
    }

    #[test]
    fn test_untagged_serialization() {
        let stats = compute_stats(ArtifactKind::HeatmapLong, &rows(&[100.0])).unwrap();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_fixations"], 1);
        assert_eq!(json["longest_point"]["value"], 100.0);
    }
}
