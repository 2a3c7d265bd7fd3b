//! Track building, ranking and pairing.
//!
//! Tracks grow cell by cell from a seed along the graph links, keeping a
//! running least-squares fit over every member cluster.

use crate::cell::{Cell, CellBuilder, CellState};
use crate::fit::{fit_line, FitPoint, LineFit, EXACT_FIT_CHI2};
use crate::spatial::SpatialCluster;
use wgrecon_core::{Axis, HitStore, ReconConfig, TrackConfig, TrackOrigin, TrackPair, View};

/// Life cycle of a track candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateState {
    Seeded,
    Growing,
    Accepted,
    Rejected,
}

/// A track in arena form, referring to clusters and cells by index.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub time_cluster: usize,
    pub view: View,
    pub axis: Axis,
    /// Cell indices in depth order.
    pub cells: Vec<usize>,
    /// Bare cluster preceding the first cell.
    pub head: Option<usize>,
    /// Bare cluster following the last cell.
    pub tail: Option<usize>,
    /// Distinct member clusters in depth order.
    pub clusters: Vec<usize>,
    pub fit: LineFit,
    pub energy: f64,
    /// Member hit indices, ascending.
    pub hits: Vec<usize>,
    /// Lowest and highest raw plane among member hits.
    pub planes: (usize, usize),
    pub origin: TrackOrigin,
}

impl Track {
    /// Assembles a track from ordered clusters.
    #[must_use]
    pub fn from_clusters(
        clusters: &[SpatialCluster],
        members: Vec<usize>,
        fit: LineFit,
        store: &HitStore,
    ) -> Option<Self> {
        let first = clusters.get(*members.first()?)?;
        let mut hits: Vec<usize> = members
            .iter()
            .flat_map(|&c| clusters[c].hits.iter().copied())
            .collect();
        hits.sort_unstable();
        hits.dedup();
        let planes = hits
            .iter()
            .filter_map(|&h| store.get(h))
            .map(|h| usize::from(h.plane))
            .fold((usize::MAX, 0), |(lo, hi), p| (lo.min(p), hi.max(p)));

        Some(Self {
            time_cluster: first.time_cluster,
            view: first.view,
            axis: first.axis,
            cells: Vec::new(),
            head: None,
            tail: None,
            energy: members.iter().map(|&c| clusters[c].energy).sum(),
            clusters: members,
            fit,
            hits,
            planes,
            origin: TrackOrigin::CellPath,
        })
    }

    /// Cells plus bare end clusters.
    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cells.len() + usize::from(self.head.is_some()) + usize::from(self.tail.is_some())
    }

    fn contains_hit(&self, hit: usize) -> bool {
        self.hits.binary_search(&hit).is_ok()
    }
}

/// Fits a line through the given clusters.
#[must_use]
pub fn fit_clusters(clusters: &[SpatialCluster], members: &[usize]) -> Option<LineFit> {
    let points: Vec<FitPoint> = members
        .iter()
        .map(|&c| {
            let cl = &clusters[c];
            FitPoint::new(cl.depth, cl.transverse).with_size(cl.size)
        })
        .collect();
    fit_line(&points)
}

struct Candidate {
    state: CandidateState,
    cells: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    clusters: Vec<usize>,
    fit: Option<LineFit>,
}

impl Candidate {
    fn num_cells(&self) -> usize {
        self.cells.len() + usize::from(self.head.is_some()) + usize::from(self.tail.is_some())
    }
}

/// An acceptable next cell for a growing candidate.
struct Extension {
    /// Recon planes between the current last cluster and the nearest new one.
    step: usize,
    /// Whether the cell starts on the current last cluster.
    shared: bool,
    fit: LineFit,
    cell: usize,
    clusters: Vec<usize>,
}

impl Extension {
    /// Next-depth cells first, then links through the shared cluster, then
    /// the better fit.
    fn precedes(&self, other: &Self) -> bool {
        self.step
            .cmp(&other.step)
            .then(other.shared.cmp(&self.shared))
            .then(self.fit.chi2.total_cmp(&other.fit.chi2))
            .is_lt()
    }
}

/// Grows track candidates over the cell graph.
#[derive(Debug, Clone)]
pub struct TrackBuilder {
    config: TrackConfig,
    pairing: CellBuilder,
}

impl TrackBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(config: &ReconConfig) -> Self {
        Self {
            config: config.track.clone(),
            pairing: CellBuilder::new(config.cell.clone()),
        }
    }

    /// Whether a fit over `cells` cells is good enough to keep.
    ///
    /// An exact fit always passes.
    #[must_use]
    pub fn accepts(&self, chi2: f64, cells: usize) -> bool {
        chi2 <= EXACT_FIT_CHI2 || chi2 < self.config.chi2_limit(cells)
    }

    /// Builds tracks from every usable seed cell.
    ///
    /// Accepted tracks mark their cells as used and are appended to `out`.
    /// Returns the number of accepted tracks.
    pub fn build(
        &self,
        clusters: &[SpatialCluster],
        cells: &mut [Cell],
        partials: &[usize],
        store: &HitStore,
        out: &mut Vec<Track>,
    ) -> usize {
        let mut seeds: Vec<usize> = (0..cells.len()).collect();
        seeds.sort_by(|&a, &b| {
            let (ca, cb) = (&cells[a], &cells[b]);
            let (la, lb) = (&clusters[ca.lower], &clusters[cb.lower]);
            (la.time_cluster, la.view, ca.level, ca.state, ca.rank)
                .cmp(&(lb.time_cluster, lb.view, cb.level, cb.state, cb.rank))
                .then(cb.energy.total_cmp(&ca.energy))
                .then(a.cmp(&b))
        });

        let mut accepted = 0;
        let mut claimed = vec![false; clusters.len()];
        for seed in seeds {
            let cell = &cells[seed];
            if cell.state == CellState::Used || (claimed[cell.lower] && claimed[cell.upper]) {
                continue;
            }
            let mut candidate = self.grow(clusters, cells, seed);
            self.extend_ends(clusters, partials, &mut candidate);

            candidate.state = if candidate.num_cells() >= self.config.min_track_cells {
                CandidateState::Accepted
            } else {
                CandidateState::Rejected
            };
            if candidate.state != CandidateState::Accepted {
                continue;
            }
            let Some(fit) = candidate.fit else {
                continue;
            };
            let Some(mut track) =
                Track::from_clusters(clusters, candidate.clusters, fit, store)
            else {
                continue;
            };
            for &c in &candidate.cells {
                cells[c].state = CellState::Used;
            }
            for &c in &track.clusters {
                claimed[c] = true;
            }
            track.cells = candidate.cells;
            track.head = candidate.head;
            track.tail = candidate.tail;
            out.push(track);
            accepted += 1;
        }
        accepted
    }

    fn grow(&self, clusters: &[SpatialCluster], cells: &[Cell], seed: usize) -> Candidate {
        let first = &cells[seed];
        let members = vec![first.lower, first.upper];
        let mut candidate = Candidate {
            state: CandidateState::Seeded,
            cells: vec![seed],
            head: None,
            tail: None,
            fit: fit_clusters(clusters, &members),
            clusters: members,
        };

        loop {
            let Some(&last_cell) = candidate.cells.last() else {
                break;
            };
            let last_cluster = cells[last_cell].upper;
            let last_plane = clusters[last_cluster].recon_plane;
            let mut best: Option<Extension> = None;

            for &next in &cells[last_cell].up {
                let cell = &cells[next];
                if cell.state == CellState::Used {
                    continue;
                }
                let shared = cell.lower == last_cluster;
                let mut trial = candidate.clusters.clone();
                if !shared {
                    trial.push(cell.lower);
                }
                trial.push(cell.upper);
                let Some(fit) = fit_clusters(clusters, &trial) else {
                    continue;
                };
                if !self.accepts(fit.chi2, candidate.cells.len() + 1) {
                    continue;
                }
                let nearest = if shared { cell.upper } else { cell.lower };
                let extension = Extension {
                    step: clusters[nearest].recon_plane.saturating_sub(last_plane),
                    shared,
                    fit,
                    cell: next,
                    clusters: trial,
                };
                if best.as_ref().map_or(true, |b| extension.precedes(b)) {
                    best = Some(extension);
                }
            }

            let Some(extension) = best else {
                break;
            };
            candidate.state = CandidateState::Growing;
            candidate.cells.push(extension.cell);
            candidate.clusters = extension.clusters;
            candidate.fit = Some(extension.fit);
        }
        candidate
    }

    fn extend_ends(
        &self,
        clusters: &[SpatialCluster],
        partials: &[usize],
        candidate: &mut Candidate,
    ) {
        let (Some(&first), Some(&last)) = (candidate.clusters.first(), candidate.clusters.last())
        else {
            return;
        };

        let mut best_tail: Option<(LineFit, usize)> = None;
        let mut best_head: Option<(LineFit, usize)> = None;
        for &p in partials {
            let tail = self.pairing.reachable(&clusters[last], &clusters[p]);
            let head = self.pairing.reachable(&clusters[p], &clusters[first]);
            if !tail && !head {
                continue;
            }
            let mut trial = candidate.clusters.clone();
            if tail {
                trial.push(p);
            } else {
                trial.insert(0, p);
            }
            let Some(fit) = fit_clusters(clusters, &trial) else {
                continue;
            };
            let slot = if tail { &mut best_tail } else { &mut best_head };
            if slot.as_ref().map_or(true, |(b, _)| fit.chi2 < b.chi2) {
                *slot = Some((fit, p));
            }
        }

        if let Some((fit, p)) = best_tail {
            if self.accepts(fit.chi2, candidate.num_cells() + 1) {
                candidate.clusters.push(p);
                candidate.tail = Some(p);
                candidate.fit = Some(fit);
            }
        }
        if let Some((_, p)) = best_head {
            let mut trial = candidate.clusters.clone();
            trial.insert(0, p);
            if let Some(fit) = fit_clusters(clusters, &trial) {
                if self.accepts(fit.chi2, candidate.num_cells() + 1) {
                    candidate.clusters = trial;
                    candidate.head = Some(p);
                    candidate.fit = Some(fit);
                }
            }
        }
    }
}

/// Orders tracks by total energy, highest first. Equal energies keep their
/// build order.
pub fn rank_tracks_by_energy(tracks: &mut [Track]) {
    tracks.sort_by(|a, b| b.energy.total_cmp(&a.energy));
}

/// Number of `candidate` clusters that share a hit with `kept`.
#[must_use]
pub fn shared_clusters(
    candidate: &Track,
    candidate_clusters: &[SpatialCluster],
    kept: &Track,
) -> usize {
    candidate
        .clusters
        .iter()
        .filter(|&&c| candidate_clusters[c].hits.iter().any(|&h| kept.contains_hit(h)))
        .count()
}

/// Drops tracks that duplicate a higher-ranked track of the same time
/// cluster and view.
///
/// `tracks` must already be ranked. A track is erased when it shares more
/// than `max_shared` clusters with a kept track, or when every one of its
/// clusters is shared.
#[must_use]
pub fn erase_duplicate_tracks(
    tracks: Vec<Track>,
    arenas: &[Vec<SpatialCluster>; 2],
    max_shared: usize,
) -> Vec<Track> {
    let mut kept: Vec<Track> = Vec::with_capacity(tracks.len());
    for track in tracks {
        let arena = &arenas[track.axis.index()];
        let duplicate = kept
            .iter()
            .filter(|k| k.time_cluster == track.time_cluster && k.view == track.view)
            .any(|k| {
                let shared = shared_clusters(&track, arena, k);
                shared > max_shared || shared == track.clusters.len()
            });
        if !duplicate {
            kept.push(track);
        }
    }
    kept
}

/// Direction of a fitted line in (z, transverse), oriented towards +z.
#[must_use]
pub fn projected_direction(axis: Axis, slope: f64) -> (f64, f64) {
    let (dz, dt) = match axis {
        Axis::AlongZ => (1.0, slope),
        Axis::AlongXy => (slope, 1.0),
    };
    if dz < 0.0 {
        (-dz, -dt)
    } else {
        (dz, dt)
    }
}

/// Combines a side-view and a top-view direction into a unit 3-D vector.
#[must_use]
pub fn combine_directions(side: (f64, f64), top: (f64, f64)) -> [f64; 3] {
    let (dz_side, dy) = side;
    let (dz_top, dx) = top;
    let mut v = [dx * dz_side, dy * dz_top, dz_side * dz_top];
    if v.iter().all(|c| c.abs() <= f64::EPSILON) {
        v = [dx, dy, 0.0];
    }
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if norm > 0.0 {
        [v[0] / norm, v[1] / norm, v[2] / norm]
    } else {
        [0.0, 0.0, 1.0]
    }
}

/// Matches side-view tracks with top-view tracks of the same time cluster.
///
/// Two tracks match when both their first and last raw planes agree within
/// `tolerance`. Each track joins at most one pair; side tracks pick in rank
/// order, taking the closest available top track.
#[must_use]
pub fn find_track_pairs(tracks: &[Track], tolerance: usize) -> Vec<TrackPair> {
    let mut taken = vec![false; tracks.len()];
    let mut pairs = Vec::new();

    for (s, side) in tracks.iter().enumerate() {
        if side.view != View::Side {
            continue;
        }
        let mut best: Option<(usize, usize)> = None;
        for (t, top) in tracks.iter().enumerate() {
            if taken[t] || top.view != View::Top || top.time_cluster != side.time_cluster {
                continue;
            }
            let d_start = side.planes.0.abs_diff(top.planes.0);
            let d_stop = side.planes.1.abs_diff(top.planes.1);
            if d_start > tolerance || d_stop > tolerance {
                continue;
            }
            let score = d_start + d_stop;
            if best.map_or(true, |(b, _)| score < b) {
                best = Some((score, t));
            }
        }
        if let Some((_, t)) = best {
            taken[t] = true;
            let direction = combine_directions(
                projected_direction(side.axis, side.fit.slope),
                projected_direction(tracks[t].axis, tracks[t].fit.slope),
            );
            let transverse = direction[0].hypot(direction[1]);
            pairs.push(TrackPair {
                side: s,
                top: t,
                direction,
                cos_zenith: direction[2],
                cos_azimuth: (transverse > f64::EPSILON).then_some(direction[0] / transverse),
            });
        }
    }
    pairs
}
