//! Neighbor links between cells.

use crate::cell::{Cell, CellState};
use crate::spatial::SpatialCluster;
use wgrecon_core::NeighborConfig;

/// Links cells into a directed graph ordered along the depth axis.
#[derive(Debug, Clone)]
pub struct CellGraph {
    config: NeighborConfig,
}

fn direction(lower: &SpatialCluster, upper: &SpatialCluster) -> (f64, f64) {
    let d = upper.depth - lower.depth;
    let t = upper.transverse - lower.transverse;
    let norm = d.hypot(t);
    if norm > 0.0 {
        (d / norm, t / norm)
    } else {
        (0.0, 0.0)
    }
}

impl CellGraph {
    /// Creates a graph builder.
    #[must_use]
    pub fn new(config: NeighborConfig) -> Self {
        Self { config }
    }

    fn tolerance(&self, separation: usize) -> f64 {
        let table = &self.config.position_tolerance;
        let index = separation.min(table.len().saturating_sub(1));
        table.get(index).copied().unwrap_or(0.0)
    }

    /// Whether `up` can follow `down` on a track.
    #[must_use]
    pub fn linked(&self, clusters: &[SpatialCluster], down: &Cell, up: &Cell) -> bool {
        let d_lower = &clusters[down.lower];
        let d_upper = &clusters[down.upper];
        let u_lower = &clusters[up.lower];
        let u_upper = &clusters[up.upper];

        if d_upper.time_cluster != u_lower.time_cluster || d_upper.view != u_lower.view {
            return false;
        }
        if u_lower.recon_plane < d_upper.recon_plane {
            return false;
        }
        let both_grid = down.sub_layer && up.sub_layer;
        let max_gap = if both_grid {
            self.config.max_plane_gap_grid
        } else {
            self.config.max_plane_gap
        };
        let separation = u_lower.recon_plane - d_upper.recon_plane;
        if separation > max_gap {
            return false;
        }
        if separation == 0 {
            if up.lower != down.upper {
                return false;
            }
        } else if (u_lower.transverse - d_upper.transverse).abs() > self.tolerance(separation) {
            return false;
        }

        let (a0, a1) = direction(d_lower, d_upper);
        let (b0, b1) = direction(u_lower, u_upper);
        let min_cosine = if both_grid {
            self.config.min_cosine_grid
        } else {
            self.config.min_cosine
        };
        a0 * b0 + a1 * b1 > min_cosine
    }

    /// Fills `up`/`down` links of every cell. Returns the number of links.
    pub fn find_neighbor_cells(&self, clusters: &[SpatialCluster], cells: &mut [Cell]) -> usize {
        for cell in cells.iter_mut() {
            cell.up.clear();
            cell.down.clear();
        }
        let mut links = 0;
        for i in 0..cells.len() {
            for j in 0..cells.len() {
                if i != j && self.linked(clusters, &cells[i], &cells[j]) {
                    cells[i].up.push(j);
                    cells[j].down.push(i);
                    links += 1;
                }
            }
        }
        links
    }
}

/// Assigns the initial state and chain level of every cell.
///
/// A cell is ambiguous when it is an alternative pairing or when another
/// cell starts or ends on the same cluster. Levels count the longest chain
/// of linked cells ending at each cell, starting from 1.
pub fn define_cell_state(clusters: &[SpatialCluster], cells: &mut [Cell]) {
    let mut starts = vec![0usize; clusters.len()];
    let mut ends = vec![0usize; clusters.len()];
    for cell in cells.iter() {
        starts[cell.lower] += 1;
        ends[cell.upper] += 1;
    }
    for cell in cells.iter_mut() {
        cell.state = if cell.rank > 0 || starts[cell.lower] > 1 || ends[cell.upper] > 1 {
            CellState::Ambiguous
        } else {
            CellState::Free
        };
    }

    let mut order: Vec<usize> = (0..cells.len()).collect();
    order.sort_by_key(|&i| (clusters[cells[i].lower].recon_plane, i));
    for i in order {
        let level = cells[i]
            .down
            .iter()
            .map(|&d| cells[d].level)
            .max()
            .unwrap_or(0)
            + 1;
        cells[i].level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::tests::cluster;
    use crate::cell::CellBuilder;
    use wgrecon_core::CellConfig;

    fn build(clusters: &[SpatialCluster]) -> Vec<Cell> {
        let mut cells = Vec::new();
        let mut partials = Vec::new();
        CellBuilder::new(CellConfig::default()).find_cluster_pairs(
            clusters,
            &mut cells,
            &mut partials,
        );
        cells
    }

    #[test]
    fn test_straight_chain_links() {
        let clusters = vec![cluster(0, 0.0), cluster(3, 10.0), cluster(6, 20.0)];
        let mut cells = build(&clusters);
        // 0->3, 0->6, 3->6
        assert_eq!(cells.len(), 3);

        let graph = CellGraph::new(NeighborConfig::default());
        let links = graph.find_neighbor_cells(&clusters, &mut cells);
        assert_eq!(links, 1);
        let first = cells.iter().position(|c| (c.lower, c.upper) == (0, 1)).unwrap();
        let second = cells.iter().position(|c| (c.lower, c.upper) == (1, 2)).unwrap();
        assert_eq!(cells[first].up, vec![second]);
        assert_eq!(cells[second].down, vec![first]);

        define_cell_state(&clusters, &mut cells);
        assert_eq!(cells[first].level, 1);
        assert_eq!(cells[second].level, 2);
        assert_eq!(cells[second].state, CellState::Ambiguous);
    }

    #[test]
    fn test_sharp_turn_rejected() {
        // Along then sharply across: cosine well below threshold.
        let clusters = vec![cluster(0, 0.0), cluster(3, 0.0), cluster(6, 150.0)];
        let mut cells = build(&clusters);
        let graph = CellGraph::new(NeighborConfig::default());
        graph.find_neighbor_cells(&clusters, &mut cells);

        let first = cells.iter().position(|c| (c.lower, c.upper) == (0, 1)).unwrap();
        assert!(cells[first].up.is_empty());
    }

    #[test]
    fn test_separated_cells_link_within_tolerance() {
        let clusters = vec![
            cluster(0, 0.0),
            cluster(3, 0.0),
            cluster(9, 0.0),
            cluster(12, 0.0),
        ];
        let mut cells = build(&clusters);
        let graph = CellGraph::new(NeighborConfig::default());
        graph.find_neighbor_cells(&clusters, &mut cells);

        let a = cells.iter().position(|c| (c.lower, c.upper) == (0, 1)).unwrap();
        let b = cells.iter().position(|c| (c.lower, c.upper) == (2, 3)).unwrap();
        assert!(cells[a].up.contains(&b));
    }
}
