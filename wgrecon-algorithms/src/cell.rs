//! Cluster pairing into cells.
//!
//! A cell is a segment joining two clusters of the same view and time
//! cluster at different recon planes. Every compatible partner is kept;
//! the closest one is the primary hypothesis (rank 0) and the rest are
//! alternatives left for track competition to resolve.

use crate::spatial::SpatialCluster;
use wgrecon_core::CellConfig;

/// Track-building status of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CellState {
    /// No competing hypothesis.
    #[default]
    Free,
    /// Shares an end cluster with another cell.
    Ambiguous,
    /// Consumed by an accepted track.
    Used,
}

/// Pair of clusters with `lower.recon_plane < upper.recon_plane`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Cluster indices into the axis' cluster arena.
    pub lower: usize,
    pub upper: usize,
    /// Candidate order among the pairings of `lower`, closest first.
    pub rank: usize,
    /// Transverse difference between the two clusters.
    pub residual: f64,
    pub energy: f64,
    /// Both clusters lie in grid sub-layers.
    pub sub_layer: bool,
    pub state: CellState,
    /// Length of the longest chain of cells ending here.
    pub level: usize,
    /// Linked cells further along the depth axis.
    pub up: Vec<usize>,
    /// Linked cells closer to the origin of the depth axis.
    pub down: Vec<usize>,
}

/// Builds cells from spatial clusters.
#[derive(Debug, Clone)]
pub struct CellBuilder {
    config: CellConfig,
}

impl CellBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(config: CellConfig) -> Self {
        Self { config }
    }

    /// Maximum recon-plane gap between two clusters.
    #[must_use]
    pub fn max_gap(&self, a: &SpatialCluster, b: &SpatialCluster) -> usize {
        if a.sub_layer && b.sub_layer {
            self.config.max_plane_gap_grid
        } else {
            self.config.max_plane_gap
        }
    }

    /// Positional tolerance for a plane gap.
    #[must_use]
    pub fn tolerance(&self, gap: usize) -> f64 {
        let table = &self.config.position_tolerance;
        let index = gap.saturating_sub(1).min(table.len().saturating_sub(1));
        table.get(index).copied().unwrap_or(0.0)
    }

    /// Whether `a` and `b` (with `a` upstream) can form a cell.
    #[must_use]
    pub fn compatible(&self, a: &SpatialCluster, b: &SpatialCluster) -> bool {
        if a.time_cluster != b.time_cluster || a.view != b.view || b.recon_plane <= a.recon_plane
        {
            return false;
        }
        let gap = b.recon_plane - a.recon_plane;
        gap <= self.max_gap(a, b) && (b.transverse - a.transverse).abs() <= self.tolerance(gap)
    }

    /// Whether `b` lies above `a` within the widest allowed plane gap.
    ///
    /// Used for bare clusters at track ends, where the fit rather than the
    /// positional table decides.
    #[must_use]
    pub fn reachable(&self, a: &SpatialCluster, b: &SpatialCluster) -> bool {
        let widest = self.config.max_plane_gap.max(self.config.max_plane_gap_grid);
        a.time_cluster == b.time_cluster
            && a.view == b.view
            && b.recon_plane > a.recon_plane
            && b.recon_plane - a.recon_plane <= widest
    }

    /// Pairs clusters into cells.
    ///
    /// Clusters that end up in no cell are written to `partials`. Returns
    /// whether any cell was built.
    pub fn find_cluster_pairs(
        &self,
        clusters: &[SpatialCluster],
        cells: &mut Vec<Cell>,
        partials: &mut Vec<usize>,
    ) -> bool {
        cells.clear();
        partials.clear();
        let mut paired = vec![false; clusters.len()];

        for (i, a) in clusters.iter().enumerate() {
            let mut candidates: Vec<(f64, usize)> = clusters
                .iter()
                .enumerate()
                .filter(|(_, b)| self.compatible(a, b))
                .map(|(j, b)| ((b.transverse - a.transverse).abs(), j))
                .collect();
            candidates.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));

            for (rank, (residual, j)) in candidates.into_iter().enumerate() {
                let b = &clusters[j];
                paired[i] = true;
                paired[j] = true;
                cells.push(Cell {
                    lower: i,
                    upper: j,
                    rank,
                    residual,
                    energy: a.energy + b.energy,
                    sub_layer: a.sub_layer && b.sub_layer,
                    state: CellState::Free,
                    level: 0,
                    up: Vec::new(),
                    down: Vec::new(),
                });
            }
        }

        partials.extend(paired.iter().enumerate().filter(|(_, &p)| !p).map(|(i, _)| i));
        !cells.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wgrecon_core::{Axis, ScintillatorSize, View};

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn cluster(plane: usize, transverse: f64) -> SpatialCluster {
        SpatialCluster {
            time_cluster: 0,
            view: View::Side,
            axis: Axis::AlongZ,
            recon_plane: plane,
            channels: (0, 0),
            hits: Vec::new(),
            representative: 0,
            depth: plane as f64 * 19.0,
            transverse,
            energy: 1.0,
            sub_layer: false,
            size: ScintillatorSize {
                half_width: 12.5,
                half_thickness: 1.5,
            },
        }
    }

    #[test]
    fn test_pairing_ranks_by_residual() {
        let builder = CellBuilder::new(CellConfig::default());
        let clusters = vec![
            cluster(0, 0.0),
            cluster(3, 40.0),
            cluster(3, 10.0),
            cluster(3, 400.0),
        ];
        let mut cells = Vec::new();
        let mut partials = Vec::new();

        assert!(builder.find_cluster_pairs(&clusters, &mut cells, &mut partials));
        assert_eq!(cells.len(), 2);
        assert_eq!((cells[0].upper, cells[0].rank), (2, 0));
        assert_eq!((cells[1].upper, cells[1].rank), (1, 1));
        assert_eq!(partials, vec![3]);
    }

    #[test]
    fn test_gap_limits() {
        let builder = CellBuilder::new(CellConfig::default());
        assert!(builder.compatible(&cluster(0, 0.0), &cluster(6, 0.0)));
        assert!(!builder.compatible(&cluster(0, 0.0), &cluster(7, 0.0)));
        assert!(!builder.compatible(&cluster(3, 0.0), &cluster(3, 0.0)));

        let mut a = cluster(0, 0.0);
        let mut b = cluster(9, 0.0);
        a.sub_layer = true;
        b.sub_layer = true;
        assert!(builder.compatible(&a, &b));
    }

    #[test]
    fn test_no_clusters() {
        let builder = CellBuilder::new(CellConfig::default());
        let mut cells = Vec::new();
        let mut partials = Vec::new();
        assert!(!builder.find_cluster_pairs(&[], &mut cells, &mut partials));
        assert!(partials.is_empty());
    }
}
