//! Reconstruction output records.
//!
//! Hit indices in these records refer to the store order after sorting, which
//! is also the row order of [`ReconOutput::hits`].

use crate::geometry::ReconAddress;
use crate::hit::{Axis, Hit, View};
use serde::{Deserialize, Serialize};

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    BcidCluster,
    TimeCluster,
    TrackAlongZ,
    TrackAlongXy,
    EraseDuplicates,
    TrackPair,
    NearHits,
    FillTrackHits,
}

/// How a track was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackOrigin {
    /// Cell graph and incremental fit.
    #[default]
    CellPath,
    /// Promoted Hough line.
    Hough,
}

/// One cluster on a track.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackPoint {
    pub recon: ReconAddress,
    pub depth: f64,
    pub transverse: f64,
    pub energy: f64,
    pub hits: Vec<usize>,
}

/// A member cell: a cluster pair, or a bare cluster at a track end.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CellRecord {
    pub lower: TrackPoint,
    pub upper: Option<TrackPoint>,
}

impl CellRecord {
    /// Member clusters in depth order.
    pub fn points(&self) -> impl Iterator<Item = &TrackPoint> {
        std::iter::once(&self.lower).chain(self.upper.as_ref())
    }
}

/// Track endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackEnd {
    pub recon: ReconAddress,
    /// Raw plane of the end cluster.
    pub plane: usize,
    /// Raw channel of the end cluster.
    pub channel: usize,
    /// Sub-layer of the end cluster.
    pub grid: u8,
    pub depth: f64,
    pub transverse: f64,
    /// Beam coordinate of the end cluster.
    pub z: f64,
}

/// A reconstructed two-dimensional track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Index in the track set.
    pub id: usize,
    pub time_cluster: usize,
    pub view: View,
    pub axis: Axis,
    /// Fitted `transverse = intercept + slope * depth`.
    pub slope: f64,
    pub intercept: f64,
    pub chi2: f64,
    /// RMS transverse residual of member clusters.
    pub dispersion: f64,
    /// Summed energy proxy of member clusters.
    pub energy: f64,
    /// Mean corrected time of member hits.
    pub mean_time: f64,
    /// Distance between the fitted start and stop points.
    pub length: f64,
    /// Cosine between the track and the depth axis.
    pub cos_angle: f64,
    /// Summed scintillator path length (mm) of member and near hits.
    pub path_length: f64,
    /// Energy proxy per mm over the same hits.
    pub mean_dedx: f64,
    pub start: TrackEnd,
    pub stop: TrackEnd,
    /// Member cells ordered by depth.
    pub cells: Vec<CellRecord>,
    /// Hits attached after the fit, ascending.
    pub near_hits: Vec<usize>,
    pub veto: bool,
    pub side_escape: bool,
    pub origin: TrackOrigin,
    /// Index of the Hough line that agrees with this track.
    pub hough_line: Option<usize>,
}

impl TrackRecord {
    /// Hit indices of member clusters and attached near hits. Clusters
    /// shared by consecutive cells repeat their hits.
    pub fn hits(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .flat_map(CellRecord::points)
            .flat_map(|p| p.hits.iter().copied())
            .chain(self.near_hits.iter().copied())
    }

    /// End with the smaller beam coordinate.
    #[must_use]
    pub fn upstream_end(&self) -> &TrackEnd {
        if self.stop.z < self.start.z {
            &self.stop
        } else {
            &self.start
        }
    }

    /// End with the larger beam coordinate.
    #[must_use]
    pub fn downstream_end(&self) -> &TrackEnd {
        if self.stop.z < self.start.z {
            &self.start
        } else {
            &self.stop
        }
    }

    /// Number of distinct member clusters.
    #[must_use]
    pub fn num_clusters(&self) -> usize {
        let mut recon: Vec<ReconAddress> = self
            .cells
            .iter()
            .flat_map(CellRecord::points)
            .map(|p| p.recon)
            .collect();
        recon.sort_unstable();
        recon.dedup();
        recon.len()
    }
}

/// A side-view track matched with a top-view track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPair {
    pub side: usize,
    pub top: usize,
    /// Unit direction (x, y, z).
    pub direction: [f64; 3],
    /// Cosine between the direction and the beam (z) axis.
    pub cos_zenith: f64,
    /// Cosine of the azimuth from +x in the x-y plane; `None` for a track
    /// parallel to the beam.
    pub cos_azimuth: Option<f64>,
}

/// Deduplicated, ranked tracks of one event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackSet {
    pub tracks: Vec<TrackRecord>,
    pub pairs: Vec<TrackPair>,
}

impl TrackSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackRecord> {
        self.tracks.iter()
    }

    #[must_use]
    pub fn get(&self, id: usize) -> Option<&TrackRecord> {
        self.tracks.get(id)
    }
}

/// Per-hit output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub hit: Hit,
    pub view: View,
    pub grid: u8,
    pub time_cluster: Option<usize>,
    pub on_track: bool,
    /// Ids of tracks using this hit, ascending.
    pub track_ids: Vec<usize>,
    /// Energy of the along-z cluster containing the hit.
    pub cluster_energy: f64,
    /// Path length through the scintillator for the first owning track.
    pub path_length: f64,
    /// Energy proxy per millimetre of path.
    pub pe_per_mm: f64,
}

impl HitRecord {
    /// Number of tracks using this hit.
    #[must_use]
    pub fn num_tracks(&self) -> usize {
        self.track_ids.len()
    }
}

/// A line found by the Hough tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoughLine {
    pub view: View,
    pub time_cluster: usize,
    /// `xy = intercept + slope * z`.
    pub slope: f64,
    pub intercept: f64,
    pub votes: usize,
    pub slope_bin: usize,
    pub intercept_bin: usize,
}

impl HoughLine {
    /// Transverse distance of `(z, xy)` from the line.
    #[must_use]
    pub fn distance(&self, z: f64, xy: f64) -> f64 {
        (xy - self.intercept - self.slope * z).abs() / self.slope.hypot(1.0)
    }
}

/// Object counts per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub hits: usize,
    pub bcid_clusters: usize,
    pub time_clusters: usize,
    /// Spatial clusters per axis.
    pub clusters: [usize; 2],
    /// Cells per axis.
    pub cells: [usize; 2],
    /// Accepted tracks per axis before duplicate erasure.
    pub candidates: [usize; 2],
    pub tracks: usize,
    pub pairs: usize,
    pub near_hits: usize,
    pub hough_lines: usize,
}

/// Everything produced for one event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconOutput {
    pub hits: Vec<HitRecord>,
    pub tracks: TrackSet,
    pub hough_lines: Vec<HoughLine>,
    pub counts: StageCounts,
    /// First stage that produced no result, if any.
    pub stopped_at: Option<Stage>,
}

impl ReconOutput {
    /// Whether at least one track was found.
    #[must_use]
    pub fn found_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }
}
