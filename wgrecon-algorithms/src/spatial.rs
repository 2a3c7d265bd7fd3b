//! Channel-adjacency clustering within one (view, recon plane).
#![allow(clippy::cast_precision_loss)]

use crate::temporal::TimeCluster;
use wgrecon_core::{Axis, Geometry, HitStore, ReconAddress, ScintillatorSize, View};

/// A run of adjacent channels in one recon plane.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialCluster {
    pub time_cluster: usize,
    pub view: View,
    pub axis: Axis,
    pub recon_plane: usize,
    /// Lowest and highest recon channel.
    pub channels: (usize, usize),
    /// Member hit indices, ascending by recon channel.
    pub hits: Vec<usize>,
    /// Hit with the largest energy proxy.
    pub representative: usize,
    /// Energy-weighted centroid along the depth coordinate.
    pub depth: f64,
    /// Energy-weighted centroid along the transverse coordinate.
    pub transverse: f64,
    pub energy: f64,
    /// Whether the representative hit lies in a grid sub-layer.
    pub sub_layer: bool,
    pub size: ScintillatorSize,
}

impl SpatialCluster {
    /// Recon address of the lowest channel.
    #[must_use]
    pub fn recon(&self) -> ReconAddress {
        ReconAddress {
            plane: self.recon_plane,
            channel: self.channels.0,
        }
    }
}

struct Located {
    hit: usize,
    view: View,
    recon: ReconAddress,
    depth: f64,
    transverse: f64,
    energy: f64,
    grid: u8,
    size: ScintillatorSize,
}

/// Merges channel-adjacent hits of one time cluster into spatial clusters.
///
/// Clusters are appended to `out` ordered by (view, recon plane, channel).
/// Hits the geometry cannot place are skipped; their count is returned.
pub fn find_neighbor_hits<G: Geometry + ?Sized>(
    geometry: &G,
    store: &HitStore,
    time_cluster: &TimeCluster,
    axis: Axis,
    out: &mut Vec<SpatialCluster>,
) -> usize {
    let mut dropped = 0;
    let mut located: Vec<Located> = Vec::with_capacity(time_cluster.hits.len());

    for &i in &time_cluster.hits {
        let Some(hit) = store.get(i) else {
            dropped += 1;
            continue;
        };
        let view = store.view(i);
        let plane = usize::from(hit.plane);
        let channel = usize::from(hit.channel);
        let placed = geometry
            .recon_address(view, plane, channel, axis)
            .and_then(|recon| {
                let pos = geometry.recon_position(view, recon, axis)?;
                let size = geometry.scintillator_size(view, recon, axis)?;
                let grid = geometry.grid(view, plane, channel)?;
                Ok(Located {
                    hit: i,
                    view,
                    recon,
                    depth: pos.depth(axis),
                    transverse: pos.transverse(axis),
                    energy: hit.energy_proxy,
                    grid,
                    size,
                })
            });
        match placed {
            Ok(l) => located.push(l),
            Err(_) => dropped += 1,
        }
    }

    located.sort_by_key(|l| (l.view, l.recon.plane, l.recon.channel, l.hit));

    let mut start = 0;
    while start < located.len() {
        let mut end = start + 1;
        while end < located.len()
            && located[end].view == located[start].view
            && located[end].recon.plane == located[start].recon.plane
            && located[end].recon.channel - located[end - 1].recon.channel <= 1
        {
            end += 1;
        }
        out.push(build_cluster(&located[start..end], time_cluster.id, axis));
        start = end;
    }

    dropped
}

fn build_cluster(members: &[Located], time_cluster: usize, axis: Axis) -> SpatialCluster {
    let first = &members[0];
    let last = &members[members.len() - 1];

    let mut representative = first;
    let mut sum_depth = 0.0;
    let mut sum_transverse = 0.0;
    let mut sum_weight = 0.0;
    for m in members {
        if m.energy > representative.energy {
            representative = m;
        }
        if m.energy > 0.0 {
            sum_depth += m.depth * m.energy;
            sum_transverse += m.transverse * m.energy;
            sum_weight += m.energy;
        }
    }

    let (depth, transverse) = if sum_weight > 0.0 {
        (sum_depth / sum_weight, sum_transverse / sum_weight)
    } else {
        let n = members.len() as f64;
        (
            members.iter().map(|m| m.depth).sum::<f64>() / n,
            members.iter().map(|m| m.transverse).sum::<f64>() / n,
        )
    };

    SpatialCluster {
        time_cluster,
        view: first.view,
        axis,
        recon_plane: first.recon.plane,
        channels: (first.recon.channel, last.recon.channel),
        hits: members.iter().map(|m| m.hit).collect(),
        representative: representative.hit,
        depth,
        transverse,
        energy: members.iter().map(|m| m.energy).sum(),
        sub_layer: representative.grid != 0,
        size: representative.size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use wgrecon_core::{AddressLimits, Hit, WaterModuleGeometry};

    fn cluster_hits(hits: &[Hit], axis: Axis) -> Vec<SpatialCluster> {
        let geometry = WaterModuleGeometry::new();
        let mut store = HitStore::new(AddressLimits::new(8, 80));
        for &h in hits {
            store.push(h).unwrap();
        }
        store.sort();
        let tc = TimeCluster {
            hits: (0..store.len()).collect(),
            ..TimeCluster::default()
        };
        let mut out = Vec::new();
        assert_eq!(find_neighbor_hits(&geometry, &store, &tc, axis, &mut out), 0);
        out
    }

    #[test]
    fn test_equal_energy_centroid_is_mean() {
        let geometry = WaterModuleGeometry::new();
        let out = cluster_hits(
            &[
                Hit::new(1, 0, 2, 10).with_energy(5.0),
                Hit::new(1, 0, 2, 11).with_energy(5.0),
            ],
            Axis::AlongZ,
        );
        assert_eq!(out.len(), 1);

        let a = geometry.position(View::Side, 2, 10).unwrap();
        let b = geometry.position(View::Side, 2, 11).unwrap();
        assert_relative_eq!(out[0].transverse, (a.y + b.y) / 2.0);
        assert_relative_eq!(out[0].depth, a.z);
        assert_relative_eq!(out[0].energy, 10.0);
        assert_eq!(out[0].channels, (10, 11));
        assert!(!out[0].sub_layer);
    }

    #[test]
    fn test_weighted_centroid_and_gaps() {
        let out = cluster_hits(
            &[
                Hit::new(1, 0, 0, 4).with_energy(3.0),
                Hit::new(1, 0, 0, 5).with_energy(1.0),
                Hit::new(1, 0, 0, 7).with_energy(2.0),
                Hit::new(1, 1, 0, 5).with_energy(2.0),
            ],
            Axis::AlongZ,
        );
        assert_eq!(out.len(), 3);
        // (-487.5 + 25*4) * 0.75 + (-487.5 + 25*5) * 0.25
        assert_relative_eq!(out[0].transverse, -381.25);
        assert_eq!(out[0].hits, vec![0, 1]);
        assert_eq!(out[0].representative, 0);
        assert_eq!(out[1].channels, (7, 7));
        assert_eq!(out[2].view, View::Top);
    }

    #[test]
    fn test_zero_energy_falls_back_to_mean() {
        let out = cluster_hits(
            &[Hit::new(1, 0, 0, 0), Hit::new(1, 0, 0, 1)],
            Axis::AlongZ,
        );
        assert_relative_eq!(out[0].transverse, -475.0);
    }

    #[test]
    fn test_along_xy_groups_by_transverse_plane() {
        // Same channel in consecutive planes: one recon plane, adjacent
        // recon channels.
        let out = cluster_hits(
            &[
                Hit::new(1, 0, 3, 6).with_energy(1.0),
                Hit::new(1, 0, 4, 6).with_energy(1.0),
            ],
            Axis::AlongXy,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recon_plane, 9);
        assert_eq!(out[0].channels, (3, 4));
    }
}
