//! Track finalization: output records, near-hit recovery, per-hit table and
//! boundary flags.
#![allow(clippy::cast_precision_loss)]

use crate::cell::Cell;
use crate::fit::{dispersion, path_length};
use crate::spatial::SpatialCluster;
use crate::temporal::TimeCluster;
use crate::track::Track;
use wgrecon_core::{
    Axis, CellRecord, Geometry, HitRecord, HitStore, HoughLine, NearHitConfig, TrackEnd,
    TrackPair, TrackPoint, TrackRecord, VetoConfig, View,
};

/// Maps a (depth, transverse) pair of `axis` to (z, xy).
#[inline]
#[must_use]
pub fn to_z_xy(axis: Axis, depth: f64, transverse: f64) -> (f64, f64) {
    match axis {
        Axis::AlongZ => (depth, transverse),
        Axis::AlongXy => (transverse, depth),
    }
}

/// Maps (z, xy) to the (depth, transverse) pair of `axis`.
#[inline]
#[must_use]
pub fn from_z_xy(axis: Axis, z: f64, xy: f64) -> (f64, f64) {
    to_z_xy(axis, z, xy)
}

fn point(cluster: &SpatialCluster) -> TrackPoint {
    TrackPoint {
        recon: cluster.recon(),
        depth: cluster.depth,
        transverse: cluster.transverse,
        energy: cluster.energy,
        hits: cluster.hits.clone(),
    }
}

fn end(cluster: &SpatialCluster, store: &HitStore, geometry: &dyn Geometry) -> TrackEnd {
    let (plane, channel) = store
        .get(cluster.representative)
        .map_or((0, 0), |h| (usize::from(h.plane), usize::from(h.channel)));
    let grid = geometry
        .grid(cluster.view, plane, channel)
        .unwrap_or_default();
    TrackEnd {
        recon: cluster.recon(),
        plane,
        channel,
        grid,
        depth: cluster.depth,
        transverse: cluster.transverse,
        z: to_z_xy(cluster.axis, cluster.depth, cluster.transverse).0,
    }
}

/// Builds the output record of an arena track.
///
/// `times` holds the corrected time of every hit.
#[must_use]
pub fn track_record(
    id: usize,
    track: &Track,
    clusters: &[SpatialCluster],
    cells: &[Cell],
    store: &HitStore,
    geometry: &dyn Geometry,
    times: &[f64],
) -> Option<TrackRecord> {
    let first = clusters.get(*track.clusters.first()?)?;
    let last = clusters.get(*track.clusters.last()?)?;

    let mut members: Vec<CellRecord> = Vec::with_capacity(track.num_cells());
    if let Some(h) = track.head {
        members.push(CellRecord {
            lower: point(&clusters[h]),
            upper: None,
        });
    }
    members.extend(track.cells.iter().map(|&c| CellRecord {
        lower: point(&clusters[cells[c].lower]),
        upper: Some(point(&clusters[cells[c].upper])),
    }));
    if let Some(t) = track.tail {
        members.push(CellRecord {
            lower: point(&clusters[t]),
            upper: None,
        });
    }
    if track.cells.is_empty() && track.head.is_none() && track.tail.is_none() {
        members.extend(track.clusters.iter().map(|&c| CellRecord {
            lower: point(&clusters[c]),
            upper: None,
        }));
    }

    let mean_time = if track.hits.is_empty() {
        0.0
    } else {
        track.hits.iter().map(|&h| times[h]).sum::<f64>() / track.hits.len() as f64
    };
    let points: Vec<(f64, f64)> = track
        .clusters
        .iter()
        .filter_map(|&c| clusters.get(c))
        .map(|c| (c.depth, c.transverse))
        .collect();
    let (z0, xy0) = to_z_xy(track.axis, first.depth, track.fit.at(first.depth));
    let (z1, xy1) = to_z_xy(track.axis, last.depth, track.fit.at(last.depth));

    Some(TrackRecord {
        id,
        time_cluster: track.time_cluster,
        view: track.view,
        axis: track.axis,
        slope: track.fit.slope,
        intercept: track.fit.intercept,
        chi2: track.fit.chi2,
        dispersion: dispersion(&points, track.fit.slope, track.fit.intercept),
        energy: track.energy,
        mean_time,
        length: (z1 - z0).hypot(xy1 - xy0),
        cos_angle: track.fit.cos_angle(),
        path_length: 0.0,
        mean_dedx: 0.0,
        start: end(first, store, geometry),
        stop: end(last, store, geometry),
        cells: members,
        near_hits: Vec::new(),
        veto: false,
        side_escape: false,
        origin: track.origin,
        hough_line: None,
    })
}

fn at_edge(end: &TrackEnd, config: &VetoConfig) -> bool {
    end.grid == 0
        && (end.channel >= usize::from(config.top_channel)
            || end.channel <= usize::from(config.bottom_channel))
}

/// Boundary flags of a finished track: `(veto, side_escape)`.
///
/// A track is vetoed when its upstream end sits in the first planes or on
/// an edge channel; it escapes sideways when it stops on an edge channel
/// before the downstream planes.
#[must_use]
pub fn check_veto_side_escape(track: &TrackRecord, config: &VetoConfig) -> (bool, bool) {
    let up = track.upstream_end();
    let down = track.downstream_end();
    let veto = up.plane <= usize::from(config.upstream_plane) || at_edge(up, config);
    let side_escape = down.plane < usize::from(config.downstream_plane) && at_edge(down, config);
    (veto, side_escape)
}

/// Attaches each Hough line index to the track most of whose points lie
/// within `distance` of it.
pub fn match_hough_lines(tracks: &mut [TrackRecord], lines: &[HoughLine], distance: f64) {
    for track in tracks.iter_mut() {
        let points: Vec<(f64, f64)> = track
            .cells
            .iter()
            .flat_map(CellRecord::points)
            .map(|p| to_z_xy(track.axis, p.depth, p.transverse))
            .collect();
        if points.is_empty() {
            continue;
        }
        let mut best: Option<(usize, usize)> = None;
        for (l, line) in lines.iter().enumerate() {
            if line.view != track.view || line.time_cluster != track.time_cluster {
                continue;
            }
            let close = points
                .iter()
                .filter(|&&(z, xy)| line.distance(z, xy) <= distance)
                .count();
            if 2 * close >= points.len() && best.map_or(true, |(b, _)| close > b) {
                best = Some((close, l));
            }
        }
        track.hough_line = best.map(|(_, l)| l);
    }
}

/// Recovers unassigned hits lying close to a finished track.
#[derive(Debug, Clone)]
pub struct NearHitFinder {
    config: NearHitConfig,
}

impl NearHitFinder {
    #[must_use]
    pub fn new(config: NearHitConfig) -> Self {
        Self { config }
    }

    /// Attaches every free hit of a time cluster to the closest track within
    /// the distance, time and depth windows. Returns the number attached.
    pub fn add_near_hits(
        &self,
        geometry: &dyn Geometry,
        store: &HitStore,
        times: &[f64],
        time_clusters: &[TimeCluster],
        tracks: &mut [TrackRecord],
    ) -> usize {
        let mut assigned = vec![false; store.len()];
        for track in tracks.iter() {
            for h in track.hits() {
                if let Some(a) = assigned.get_mut(h) {
                    *a = true;
                }
            }
        }

        let mut attached = 0;
        for tc in time_clusters {
            for &h in &tc.hits {
                if assigned[h] {
                    continue;
                }
                let Some(hit) = store.get(h) else {
                    continue;
                };
                let view = store.view(h);
                let (plane, channel) = (usize::from(hit.plane), usize::from(hit.channel));
                let Ok(pos) = geometry.position(view, plane, channel) else {
                    continue;
                };

                let mut best: Option<(f64, usize)> = None;
                for (t, track) in tracks.iter().enumerate() {
                    if track.view != view || track.time_cluster != tc.id {
                        continue;
                    }
                    if (times[h] - track.mean_time).abs() > self.config.max_time_diff_ns {
                        continue;
                    }
                    let (depth, transverse) = from_z_xy(track.axis, pos.z, pos.transverse(view));
                    let lo = track.start.depth.min(track.stop.depth) - self.config.depth_margin;
                    let hi = track.start.depth.max(track.stop.depth) + self.config.depth_margin;
                    if depth < lo || depth > hi {
                        continue;
                    }
                    let distance = (transverse - track.intercept - track.slope * depth).abs()
                        / track.slope.hypot(1.0);
                    if distance <= self.config.max_distance
                        && best.map_or(true, |(d, _)| distance < d)
                    {
                        best = Some((distance, t));
                    }
                }

                if let Some((_, t)) = best {
                    tracks[t].near_hits.push(h);
                    assigned[h] = true;
                    attached += 1;
                }
            }
        }
        for track in tracks.iter_mut() {
            track.near_hits.sort_unstable();
        }
        attached
    }
}

/// Per-hit context gathered during reconstruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct HitContext {
    pub time_cluster: Option<usize>,
    pub cluster_energy: f64,
}

/// In-view and cross-view slopes of a track, per unit depth.
///
/// A paired track takes both from the pair's 3-D direction; an unpaired one
/// has no cross slope.
#[must_use]
pub fn track_slopes(track: &TrackRecord, pairs: &[TrackPair]) -> (f64, f64) {
    let Some([x, y, z]) = pairs
        .iter()
        .find(|p| p.side == track.id || p.top == track.id)
        .map(|p| p.direction)
    else {
        return (track.slope, 0.0);
    };
    let (own, other) = match track.view {
        View::Side => (y, x),
        View::Top => (x, y),
    };
    let (depth, transverse) = match track.axis {
        Axis::AlongZ => (z, own),
        Axis::AlongXy => (own, z),
    };
    if depth.abs() <= f64::EPSILON {
        return (track.slope, 0.0);
    }
    (transverse / depth, other / depth)
}

fn hit_path_length(
    geometry: &dyn Geometry,
    store: &HitStore,
    hit: usize,
    axis: Axis,
    (slope, cross_slope): (f64, f64),
) -> Option<f64> {
    let h = store.get(hit)?;
    let view = store.view(hit);
    let recon = geometry
        .recon_address(view, usize::from(h.plane), usize::from(h.channel), axis)
        .ok()?;
    let size = geometry.scintillator_size(view, recon, axis).ok()?;
    Some(path_length(slope, cross_slope, size))
}

/// Sums the path length of every distinct member and near hit of each track
/// and derives the mean energy proxy per mm.
pub fn measure_tracks(
    geometry: &dyn Geometry,
    store: &HitStore,
    tracks: &mut [TrackRecord],
    pairs: &[TrackPair],
) {
    for track in tracks.iter_mut() {
        let slopes = track_slopes(track, pairs);
        let mut hits: Vec<usize> = track.hits().collect();
        hits.sort_unstable();
        hits.dedup();

        let (mut path, mut energy) = (0.0, 0.0);
        for h in hits {
            if let (Some(len), Some(hit)) = (
                hit_path_length(geometry, store, h, track.axis, slopes),
                store.get(h),
            ) {
                path += len;
                energy += hit.energy_proxy;
            }
        }
        track.path_length = path;
        track.mean_dedx = if path > 0.0 { energy / path } else { 0.0 };
    }
}

/// Materializes the per-hit track assignment table.
///
/// Path lengths use the first owning track, with the other view's slope
/// when that track is paired.
#[must_use]
pub fn fill_track_hits(
    geometry: &dyn Geometry,
    store: &HitStore,
    context: &[HitContext],
    tracks: &[TrackRecord],
    pairs: &[TrackPair],
) -> Vec<HitRecord> {
    let mut owners: Vec<Vec<usize>> = vec![Vec::new(); store.len()];
    for track in tracks {
        for h in track.hits() {
            if let Some(o) = owners.get_mut(h) {
                if !o.contains(&track.id) {
                    o.push(track.id);
                }
            }
        }
    }

    store
        .hits()
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let view = store.view(i);
            let plane = usize::from(hit.plane);
            let channel = usize::from(hit.channel);
            let mut track_ids = std::mem::take(&mut owners[i]);
            track_ids.sort_unstable();
            let ctx = context.get(i).copied().unwrap_or_default();

            let path = track_ids
                .first()
                .and_then(|&id| tracks.iter().find(|t| t.id == id))
                .and_then(|t| hit_path_length(geometry, store, i, t.axis, track_slopes(t, pairs)))
                .unwrap_or(0.0);

            HitRecord {
                hit: *hit,
                view,
                grid: geometry.grid(view, plane, channel).unwrap_or_default(),
                time_cluster: ctx.time_cluster,
                on_track: !track_ids.is_empty(),
                track_ids,
                cluster_energy: ctx.cluster_energy,
                path_length: path,
                pe_per_mm: if path > 0.0 { hit.energy_proxy / path } else { 0.0 },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgrecon_core::{AddressLimits, Hit, ReconAddress, TrackOrigin, WaterModuleGeometry};

    fn record(start: TrackEnd, stop: TrackEnd) -> TrackRecord {
        TrackRecord {
            id: 0,
            time_cluster: 0,
            view: View::Side,
            axis: Axis::AlongZ,
            slope: 0.0,
            intercept: 0.0,
            chi2: 0.0,
            dispersion: 0.0,
            energy: 0.0,
            mean_time: 0.0,
            length: 0.0,
            cos_angle: 1.0,
            path_length: 0.0,
            mean_dedx: 0.0,
            start,
            stop,
            cells: Vec::new(),
            near_hits: Vec::new(),
            veto: false,
            side_escape: false,
            origin: TrackOrigin::CellPath,
            hough_line: None,
        }
    }

    fn end_at(plane: usize, channel: usize, z: f64) -> TrackEnd {
        TrackEnd {
            recon: ReconAddress::default(),
            plane,
            channel,
            grid: 0,
            depth: z,
            transverse: 0.0,
            z,
        }
    }

    #[test]
    fn test_veto_and_side_escape() {
        let config = VetoConfig::default();

        let through = record(end_at(0, 20, 0.0), end_at(7, 20, 400.0));
        assert_eq!(check_veto_side_escape(&through, &config), (true, false));

        let contained = record(end_at(2, 20, 100.0), end_at(5, 20, 300.0));
        assert_eq!(check_veto_side_escape(&contained, &config), (false, false));

        let escaping = record(end_at(2, 20, 100.0), end_at(4, 39, 250.0));
        assert_eq!(check_veto_side_escape(&escaping, &config), (false, true));

        // Ends given in reverse beam order.
        let entering = record(end_at(5, 20, 300.0), end_at(3, 0, 150.0));
        assert_eq!(check_veto_side_escape(&entering, &config), (true, false));
    }

    fn paired_side_and_top() -> (TrackRecord, TrackRecord, TrackPair) {
        let side = record(end_at(0, 5, 0.0), end_at(7, 5, 400.0));
        let mut top = record(end_at(0, 5, 0.0), end_at(7, 5, 400.0));
        top.id = 1;
        top.view = View::Top;
        top.slope = 0.877;
        let norm = 0.877f64.hypot(1.0);
        let pair = TrackPair {
            side: 0,
            top: 1,
            direction: [0.877 / norm, 0.0, 1.0 / norm],
            cos_zenith: 1.0 / norm,
            cos_azimuth: Some(1.0),
        };
        (side, top, pair)
    }

    #[test]
    fn test_track_slopes_take_partner_view() {
        let (side, top, pair) = paired_side_and_top();
        let (slope, cross) = track_slopes(&side, &[pair]);
        assert!(slope.abs() < 1e-12);
        assert!((cross - 0.877).abs() < 1e-12);

        let (slope, cross) = track_slopes(&top, &[pair]);
        assert!((slope - 0.877).abs() < 1e-12);
        assert!(cross.abs() < 1e-12);

        assert_eq!(track_slopes(&top, &[]), (0.877, 0.0));
    }

    #[test]
    fn test_measure_tracks_sums_member_hits() {
        let geometry = WaterModuleGeometry::new();
        let mut store = HitStore::new(AddressLimits::new(8, 80));
        for plane in 0..2 {
            store
                .push(Hit::new(0, 0, plane, 5).with_energy(10.0))
                .unwrap();
        }
        let (mut side, _, pair) = paired_side_and_top();
        side.cells = vec![CellRecord {
            lower: TrackPoint {
                hits: vec![0],
                ..TrackPoint::default()
            },
            upper: Some(TrackPoint {
                hits: vec![1],
                ..TrackPoint::default()
            }),
        }];
        // The near hit repeats a member and counts once.
        side.near_hits = vec![1];

        let mut tracks = vec![side.clone()];
        measure_tracks(&geometry, &store, &mut tracks, &[]);
        assert!((tracks[0].path_length - 6.0).abs() < 1e-9);
        assert!((tracks[0].mean_dedx - 20.0 / 6.0).abs() < 1e-9);

        let mut tracks = vec![side];
        measure_tracks(&geometry, &store, &mut tracks, &[pair]);
        let expected = 6.0 * 0.877f64.hypot(1.0);
        assert!((tracks[0].path_length - expected).abs() < 1e-9);
        assert!(tracks[0].path_length > 7.9);
    }

    #[test]
    fn test_axis_mapping() {
        assert_eq!(to_z_xy(Axis::AlongZ, 1.0, 2.0), (1.0, 2.0));
        assert_eq!(to_z_xy(Axis::AlongXy, 1.0, 2.0), (2.0, 1.0));
        assert_eq!(from_z_xy(Axis::AlongXy, 2.0, 1.0), (1.0, 2.0));
    }
}
