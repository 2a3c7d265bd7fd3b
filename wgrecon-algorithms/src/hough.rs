//! Hough-transform line finder over (z, transverse) hit positions.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

use wgrecon_core::{FlatTable, HoughConfig, HoughLine, View};

/// A local maximum of the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    pub slope_bin: usize,
    pub intercept_bin: usize,
    pub votes: usize,
}

/// Votes lines `xy = intercept + slope * z` through a set of points.
#[derive(Debug, Clone)]
pub struct HoughTransform {
    config: HoughConfig,
    intercept_bins: usize,
}

impl HoughTransform {
    /// Creates a transform with the given binning.
    #[must_use]
    pub fn new(config: HoughConfig) -> Self {
        let intercept_bins = config.intercept_bins();
        Self {
            config,
            intercept_bins,
        }
    }

    /// Slope represented by bin `i`.
    #[must_use]
    pub fn slope_at(&self, i: usize) -> f64 {
        self.config.slope_min + i as f64 * self.config.slope_step()
    }

    /// Center of intercept bin `j`.
    #[must_use]
    pub fn intercept_at(&self, j: usize) -> f64 {
        self.config.intercept_min + (j as f64 + 0.5) * self.config.intercept_bin_width
    }

    /// Fills the (slope, intercept) accumulator. Each point votes once per
    /// slope bin.
    #[must_use]
    pub fn accumulate(&self, points: &[(f64, f64)]) -> FlatTable<usize> {
        let mut acc = FlatTable::filled(&[self.config.slope_bins, self.intercept_bins], 0usize);
        for &(z, xy) in points {
            for i in 0..self.config.slope_bins {
                let c = xy - self.slope_at(i) * z;
                let j = ((c - self.config.intercept_min) / self.config.intercept_bin_width).floor();
                if j < 0.0 || j >= self.intercept_bins as f64 {
                    continue;
                }
                if let Ok(v) = acc.get_mut(&[i, j as usize]) {
                    *v += 1;
                }
            }
        }
        acc
    }

    /// Non-maximum suppression followed by the vote threshold.
    ///
    /// A bin is a peak when it beats every neighbor within the suppression
    /// radius that precedes it in row-major order and is not beaten by any
    /// that follows it, so plateaus yield their first bin. Peaks are
    /// returned by descending votes.
    #[must_use]
    pub fn find_peaks(&self, acc: &FlatTable<usize>) -> Vec<Peak> {
        let (rows, cols) = (self.config.slope_bins, self.intercept_bins);
        let r = self.config.suppression_radius;
        let value = |i: usize, j: usize| acc.get(&[i, j]).copied().unwrap_or(0);

        let mut peaks = Vec::new();
        for i in 0..rows {
            for j in 0..cols {
                let votes = value(i, j);
                if votes < self.config.min_votes.max(1) {
                    continue;
                }
                let mut is_peak = true;
                'scan: for ni in i.saturating_sub(r)..=(i + r).min(rows - 1) {
                    for nj in j.saturating_sub(r)..=(j + r).min(cols - 1) {
                        if (ni, nj) == (i, j) {
                            continue;
                        }
                        let other = value(ni, nj);
                        let before = (ni, nj) < (i, j);
                        if (before && other >= votes) || (!before && other > votes) {
                            is_peak = false;
                            break 'scan;
                        }
                    }
                }
                if is_peak {
                    peaks.push(Peak {
                        slope_bin: i,
                        intercept_bin: j,
                        votes,
                    });
                }
            }
        }
        peaks.sort_by(|a, b| b.votes.cmp(&a.votes));
        peaks
    }

    /// Finds candidate lines through one view's points.
    #[must_use]
    pub fn find_lines(
        &self,
        points: &[(f64, f64)],
        view: View,
        time_cluster: usize,
    ) -> Vec<HoughLine> {
        if points.is_empty() || self.intercept_bins == 0 || self.config.slope_bins == 0 {
            return Vec::new();
        }
        let acc = self.accumulate(points);
        self.find_peaks(&acc)
            .into_iter()
            .map(|p| HoughLine {
                view,
                time_cluster,
                slope: self.slope_at(p.slope_bin),
                intercept: self.intercept_at(p.intercept_bin),
                votes: p.votes,
                slope_bin: p.slope_bin,
                intercept_bin: p.intercept_bin,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> HoughTransform {
        HoughTransform::new(HoughConfig {
            slope_min: -2.0,
            slope_max: 2.0,
            slope_bins: 81,
            intercept_min: -500.0,
            intercept_max: 500.0,
            intercept_bin_width: 4.0,
            suppression_radius: 2,
            min_votes: 8,
            ..HoughConfig::default()
        })
    }

    #[test]
    fn test_single_line_single_peak() {
        let hough = transform();
        let points: Vec<(f64, f64)> = (0..=10)
            .map(|k| {
                let z = f64::from(k) * 10.0;
                (z, 10.0 + 0.5 * z)
            })
            .collect();

        let lines = hough.find_lines(&points, View::Side, 0);
        assert_eq!(lines.len(), 1);
        let line = lines[0];
        assert_eq!(line.votes, 11);
        assert!((line.slope - 0.5).abs() <= 0.05);
        assert!((line.intercept - 10.0).abs() <= 4.0);
    }

    #[test]
    fn test_plateau_yields_first_bin() {
        let hough = transform();
        let mut acc = FlatTable::filled(&[81, 250], 0usize);
        *acc.get_mut(&[10, 20]).unwrap() = 9;
        *acc.get_mut(&[10, 21]).unwrap() = 9;
        let peaks = hough.find_peaks(&acc);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].slope_bin, peaks[0].intercept_bin), (10, 20));
    }

    #[test]
    fn test_no_points() {
        assert!(transform().find_lines(&[], View::Top, 0).is_empty());
    }
}
