//! Reconstruction configuration.
//!
//! Every tolerance used by the pipeline lives here. Defaults follow the
//! water-module detector constants; any subset can be overridden from JSON.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Event-level limits and temporal clustering tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Hit-count cap; larger events fail fast with `TooManyHits`.
    pub max_hits: usize,
    /// Minimum hits for an event to enter bunch-crossing clustering.
    pub min_event_hits: usize,
    /// Minimum hits for a bunch-crossing cluster to be kept.
    pub min_cluster_hits: usize,
    /// Maximum bcid gap inside one bunch-crossing cluster.
    pub max_bcid_gap: u32,
    /// Maximum corrected-time spread (ns) from the earliest hit of a time
    /// cluster.
    pub time_tolerance_ns: f64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_hits: 1000,
            min_event_hits: 4,
            min_cluster_hits: 2,
            max_bcid_gap: 1,
            time_tolerance_ns: 100.0,
        }
    }
}

/// Slot-parity TDC correction.
///
/// `t = bcid * bcid_width_ns + coefficient * (raw_time - offset)` where the
/// offset and coefficient depend on the parity of the capacitor slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeCorrection {
    pub even_offset: f64,
    pub odd_offset: f64,
    pub even_coefficient: f64,
    pub odd_coefficient: f64,
    pub bcid_width_ns: f64,
}

impl Default for TimeCorrection {
    fn default() -> Self {
        Self {
            even_offset: 400.0,
            odd_offset: 4000.0,
            even_coefficient: 1.0,
            odd_coefficient: -1.0,
            bcid_width_ns: 580.0,
        }
    }
}

impl TimeCorrection {
    /// Corrected time of a hit.
    #[must_use]
    pub fn apply(&self, bcid: u32, raw_time: u16, capacitor_slot: u8) -> f64 {
        let (offset, coefficient) = if capacitor_slot % 2 == 0 {
            (self.even_offset, self.even_coefficient)
        } else {
            (self.odd_offset, self.odd_coefficient)
        };
        f64::from(bcid) * self.bcid_width_ns + coefficient * (f64::from(raw_time) - offset)
    }
}

/// Cluster pairing tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    /// Maximum recon-plane gap between paired clusters.
    pub max_plane_gap: usize,
    /// Maximum gap when both clusters lie in grid sub-layers.
    pub max_plane_gap_grid: usize,
    /// Positional tolerance (mm) indexed by `plane gap - 1`.
    pub position_tolerance: Vec<f64>,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            max_plane_gap: 6,
            max_plane_gap_grid: 9,
            position_tolerance: vec![155.0; 6],
        }
    }
}

/// Cell-graph adjacency tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborConfig {
    /// Maximum recon-plane separation between linked cells.
    pub max_plane_gap: usize,
    /// Maximum separation when both cells are sub-layer cells.
    pub max_plane_gap_grid: usize,
    /// Positional tolerance (mm) indexed by separation.
    pub position_tolerance: Vec<f64>,
    /// Minimum direction cosine between consecutive links.
    pub min_cosine: f64,
    /// Minimum direction cosine for sub-layer cells.
    pub min_cosine_grid: f64,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            max_plane_gap: 6,
            max_plane_gap_grid: 9,
            position_tolerance: vec![155.0; 10],
            min_cosine: 0.65,
            min_cosine_grid: 0.707_107,
        }
    }
}

/// Track growth and ranking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Minimum member cells (including end partials) for acceptance.
    pub min_track_cells: usize,
    /// Chi-square threshold base value.
    pub chi2_base: f64,
    /// Chi-square threshold increment per included cell.
    pub chi2_per_cell: f64,
    /// Tracks sharing more clusters than this are duplicates.
    pub max_shared_clusters: usize,
    /// Raw-plane tolerance when pairing side and top tracks.
    pub pair_plane_tolerance: usize,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            min_track_cells: 2,
            chi2_base: 15.0,
            chi2_per_cell: 0.1,
            max_shared_clusters: 7,
            pair_plane_tolerance: 1,
        }
    }
}

impl TrackConfig {
    /// Chi-square acceptance threshold for a fit over `cells` cells.
    #[inline]
    #[must_use]
    pub fn chi2_limit(&self, cells: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let n = cells as f64;
        self.chi2_base + self.chi2_per_cell * n
    }
}

/// Near-hit recovery window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearHitConfig {
    /// Maximum transverse distance (mm) from the fitted line.
    pub max_distance: f64,
    /// Maximum time difference (ns) from the track mean time.
    pub max_time_diff_ns: f64,
    /// Depth margin (mm) beyond the track ends.
    pub depth_margin: f64,
}

impl Default for NearHitConfig {
    fn default() -> Self {
        Self {
            max_distance: 25.0,
            max_time_diff_ns: 50.0,
            depth_margin: 30.0,
        }
    }
}

/// Veto and side-escape boundaries, in raw plane/channel units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VetoConfig {
    /// Tracks starting at or before this plane are vetoed.
    pub upstream_plane: u8,
    /// Tracks stopping before this plane may escape sideways.
    pub downstream_plane: u8,
    /// Upper edge channel.
    pub top_channel: u8,
    /// Lower edge channel.
    pub bottom_channel: u8,
}

impl Default for VetoConfig {
    fn default() -> Self {
        Self {
            upstream_plane: 0,
            downstream_plane: 7,
            top_channel: 38,
            bottom_channel: 1,
        }
    }
}

/// Hough accumulator binning and peak selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughConfig {
    pub slope_min: f64,
    pub slope_max: f64,
    /// Number of slope bins (inclusive of both range ends).
    pub slope_bins: usize,
    pub intercept_min: f64,
    pub intercept_max: f64,
    /// Intercept bin width (mm).
    pub intercept_bin_width: f64,
    /// Non-maximum suppression radius in bins.
    pub suppression_radius: usize,
    /// Minimum votes for a peak.
    pub min_votes: usize,
    /// Hit-to-line distance (mm) used when matching tracks and lines.
    pub association_distance: f64,
    /// Promote Hough lines to tracks when the cell pipeline finds none.
    pub fallback: bool,
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            slope_min: -2.0,
            slope_max: 2.0,
            slope_bins: 81,
            intercept_min: -1200.0,
            intercept_max: 1200.0,
            intercept_bin_width: 10.0,
            suppression_radius: 2,
            min_votes: 4,
            association_distance: 25.0,
            fallback: true,
        }
    }
}

impl HoughConfig {
    /// Width of one slope bin.
    #[must_use]
    pub fn slope_step(&self) -> f64 {
        if self.slope_bins < 2 {
            return self.slope_max - self.slope_min;
        }
        #[allow(clippy::cast_precision_loss)]
        let intervals = (self.slope_bins - 1) as f64;
        (self.slope_max - self.slope_min) / intervals
    }

    /// Number of intercept bins.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn intercept_bins(&self) -> usize {
        ((self.intercept_max - self.intercept_min) / self.intercept_bin_width).ceil() as usize
    }
}

/// Complete reconstruction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub event: EventConfig,
    /// TDC correction; `None` uses each hit's `corrected_time` as given.
    pub time_correction: Option<TimeCorrection>,
    pub cell: CellConfig,
    pub neighbor: NeighborConfig,
    pub track: TrackConfig,
    pub near_hits: NearHitConfig,
    pub veto: VetoConfig,
    pub hough: HoughConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            event: EventConfig::default(),
            time_correction: Some(TimeCorrection::default()),
            cell: CellConfig::default(),
            neighbor: NeighborConfig::default(),
            track: TrackConfig::default(),
            near_hits: NearHitConfig::default(),
            veto: VetoConfig::default(),
            hough: HoughConfig::default(),
        }
    }
}

impl ReconConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hit-count cap.
    #[must_use]
    pub fn with_max_hits(mut self, max_hits: usize) -> Self {
        self.event.max_hits = max_hits;
        self
    }

    /// Sets the minimum hit count for an event.
    #[must_use]
    pub fn with_min_event_hits(mut self, hits: usize) -> Self {
        self.event.min_event_hits = hits;
        self
    }

    /// Sets the corrected-time tolerance.
    #[must_use]
    pub fn with_time_tolerance(mut self, tolerance_ns: f64) -> Self {
        self.event.time_tolerance_ns = tolerance_ns;
        self
    }

    /// Sets or disables the TDC correction.
    #[must_use]
    pub fn with_time_correction(mut self, correction: Option<TimeCorrection>) -> Self {
        self.time_correction = correction;
        self
    }

    /// Sets the chi-square threshold terms.
    #[must_use]
    pub fn with_chi2_limit(mut self, base: f64, per_cell: f64) -> Self {
        self.track.chi2_base = base;
        self.track.chi2_per_cell = per_cell;
        self
    }

    /// Sets the shared-cluster limit for duplicate erasure.
    #[must_use]
    pub fn with_max_shared_clusters(mut self, max: usize) -> Self {
        self.track.max_shared_clusters = max;
        self
    }

    /// Sets the minimum number of cells for an accepted track.
    #[must_use]
    pub fn with_min_track_cells(mut self, cells: usize) -> Self {
        self.track.min_track_cells = cells;
        self
    }

    /// Replaces the Hough configuration.
    #[must_use]
    pub fn with_hough(mut self, hough: HoughConfig) -> Self {
        self.hough = hough;
        self
    }

    /// Load configuration from a JSON string. Missing keys keep defaults.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::ConfigError(msg.to_string()));

        if self.event.max_hits == 0 {
            return fail("event.max_hits must be positive");
        }
        if self.event.time_tolerance_ns.is_nan() || self.event.time_tolerance_ns < 0.0 {
            return fail("event.time_tolerance_ns must be non-negative");
        }
        if self.cell.position_tolerance.is_empty() {
            return fail("cell.position_tolerance must not be empty");
        }
        if self.neighbor.position_tolerance.is_empty() {
            return fail("neighbor.position_tolerance must not be empty");
        }
        if !(-1.0..=1.0).contains(&self.neighbor.min_cosine)
            || !(-1.0..=1.0).contains(&self.neighbor.min_cosine_grid)
        {
            return fail("neighbor cosine thresholds must lie in [-1, 1]");
        }
        if self.track.min_track_cells < 2 {
            return fail("track.min_track_cells must be at least 2");
        }

        let h = &self.hough;
        if h.slope_bins == 0 || h.slope_max <= h.slope_min {
            return fail("hough slope range is empty");
        }
        if h.intercept_bin_width.is_nan() || h.intercept_bin_width <= 0.0 {
            return fail("hough.intercept_bin_width must be positive");
        }
        if h.intercept_max <= h.intercept_min {
            return fail("hough intercept range is empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_validate() {
        let config = ReconConfig::default();
        config.validate().unwrap();
        assert_eq!(config.event.max_hits, 1000);
        assert_eq!(config.track.max_shared_clusters, 7);
        assert_relative_eq!(config.track.chi2_limit(3), 15.3);
    }

    #[test]
    fn test_time_correction_parity() {
        let tc = TimeCorrection::default();
        assert_relative_eq!(tc.apply(2, 1000, 4), 2.0 * 580.0 + 600.0);
        assert_relative_eq!(tc.apply(2, 1000, 5), 2.0 * 580.0 + 3000.0);
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "event": { "time_tolerance_ns": 40.0 },
            "track": { "max_shared_clusters": 3 },
            "time_correction": null
        }"#;
        let config = ReconConfig::from_json(json).unwrap();
        assert_relative_eq!(config.event.time_tolerance_ns, 40.0);
        assert_eq!(config.event.max_hits, 1000);
        assert_eq!(config.track.max_shared_clusters, 3);
        assert!(config.time_correction.is_none());
        assert_eq!(config.cell.position_tolerance.len(), 6);
    }

    #[test]
    fn test_validate_rejects_bad_tables() {
        let json = r#"{ "cell": { "position_tolerance": [] } }"#;
        assert!(matches!(
            ReconConfig::from_json(json),
            Err(Error::ConfigError(_))
        ));

        let mut config = ReconConfig::default();
        config.hough.intercept_bin_width = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hough_binning() {
        let h = HoughConfig {
            slope_min: -2.0,
            slope_max: 2.0,
            slope_bins: 81,
            intercept_min: -500.0,
            intercept_max: 500.0,
            intercept_bin_width: 4.0,
            ..HoughConfig::default()
        };
        assert_relative_eq!(h.slope_step(), 0.05);
        assert_eq!(h.intercept_bins(), 250);
    }
}
