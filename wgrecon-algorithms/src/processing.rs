//! The reconstruction engine: one instance per worker, reused across events.

use std::sync::Arc;

use rayon::prelude::*;
use wgrecon_core::{
    AddressLimits, Axis, Error, Geometry, Hit, HitRecord, HitStore, HoughLine, LogSink,
    ReconConfig, ReconOutput, Result, Stage, StageCounts, TrackOrigin, TrackPair, TrackRecord,
    TrackSet, View, WaterModuleGeometry,
};

use crate::cell::{Cell, CellBuilder};
use crate::graph::{define_cell_state, CellGraph};
use crate::hough::HoughTransform;
use crate::post::{
    check_veto_side_escape, fill_track_hits, match_hough_lines, measure_tracks, track_record,
    HitContext, NearHitFinder,
};
use crate::spatial::{find_neighbor_hits, SpatialCluster};
use crate::temporal::{TemporalClustering, TimeCluster};
use crate::track::{
    erase_duplicate_tracks, find_track_pairs, fit_clusters, rank_tracks_by_energy, Track,
    TrackBuilder,
};

/// Per-event arenas, cleared between events.
#[derive(Debug, Default)]
struct EventState {
    times: Vec<f64>,
    bcid_clusters: Vec<Vec<usize>>,
    time_clusters: Vec<TimeCluster>,
    clusters: [Vec<SpatialCluster>; 2],
    cells: [Vec<Cell>; 2],
    partials: [Vec<usize>; 2],
    candidates: Vec<Track>,
    tracks: Vec<Track>,
    records: Vec<TrackRecord>,
    pairs: Vec<TrackPair>,
    hough_lines: Vec<HoughLine>,
    counts: StageCounts,
    stopped_at: Option<Stage>,
}

impl EventState {
    fn clear(&mut self) {
        self.times.clear();
        self.bcid_clusters.clear();
        self.time_clusters.clear();
        for axis in Axis::ALL {
            self.clusters[axis.index()].clear();
            self.cells[axis.index()].clear();
            self.partials[axis.index()].clear();
        }
        self.candidates.clear();
        self.tracks.clear();
        self.records.clear();
        self.pairs.clear();
        self.hough_lines.clear();
        self.counts = StageCounts::default();
        self.stopped_at = None;
    }
}

/// Runs the full pipeline on the hits of one event.
///
/// All per-event state lives inside the engine; only the geometry is
/// shared. Call [`ReconEngine::reset`] before loading the next event.
#[derive(Debug)]
pub struct ReconEngine<G: Geometry = WaterModuleGeometry> {
    config: ReconConfig,
    geometry: Arc<G>,
    sink: LogSink,
    temporal: TemporalClustering,
    cell_builder: CellBuilder,
    graph: CellGraph,
    track_builder: TrackBuilder,
    near_hits: NearHitFinder,
    hough: HoughTransform,
    store: HitStore,
    state: EventState,
}

impl<G: Geometry> ReconEngine<G> {
    /// Creates an engine.
    #[must_use]
    pub fn new(config: ReconConfig, geometry: Arc<G>, sink: LogSink) -> Self {
        let limits = AddressLimits::new(geometry.num_planes(), geometry.num_channels());
        Self {
            temporal: TemporalClustering::new(&config),
            cell_builder: CellBuilder::new(config.cell.clone()),
            graph: CellGraph::new(config.neighbor.clone()),
            track_builder: TrackBuilder::new(&config),
            near_hits: NearHitFinder::new(config.near_hits.clone()),
            hough: HoughTransform::new(config.hough.clone()),
            store: HitStore::with_capacity(limits, config.event.max_hits),
            state: EventState::default(),
            config,
            geometry,
            sink,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    #[must_use]
    pub fn geometry(&self) -> &Arc<G> {
        &self.geometry
    }

    #[must_use]
    pub fn store(&self) -> &HitStore {
        &self.store
    }

    /// Number of ingested hits.
    #[must_use]
    pub fn num_hits(&self) -> usize {
        self.store.len()
    }

    /// Ingests one hit. Invalid hits are logged and skipped.
    pub fn push_hit(&mut self, hit: Hit) -> bool {
        match self.store.push(hit) {
            Ok(()) => true,
            Err(e) => {
                self.sink.warn(format_args!("dropping hit: {e}"));
                false
            }
        }
    }

    /// Ingests hits, returning how many were accepted.
    pub fn push_hits<I: IntoIterator<Item = Hit>>(&mut self, hits: I) -> usize {
        hits.into_iter().filter(|&h| self.push_hit(h)).count()
    }

    /// Clears the hit store and every per-event container.
    pub fn reset(&mut self) {
        self.store.clear();
        self.state.clear();
    }

    #[must_use]
    pub fn bcid_clusters(&self) -> &[Vec<usize>] {
        &self.state.bcid_clusters
    }

    #[must_use]
    pub fn time_clusters(&self) -> &[TimeCluster] {
        &self.state.time_clusters
    }

    #[must_use]
    pub fn clusters(&self, axis: Axis) -> &[SpatialCluster] {
        &self.state.clusters[axis.index()]
    }

    #[must_use]
    pub fn cells(&self, axis: Axis) -> &[Cell] {
        &self.state.cells[axis.index()]
    }

    /// Accepted tracks before duplicate erasure.
    #[must_use]
    pub fn candidates(&self) -> &[Track] {
        &self.state.candidates
    }

    /// Finalized track records.
    #[must_use]
    pub fn tracks(&self) -> &[TrackRecord] {
        &self.state.records
    }

    #[must_use]
    pub fn hough_lines(&self) -> &[HoughLine] {
        &self.state.hough_lines
    }

    /// Sorts the hits and groups them by bunch crossing.
    pub fn find_bcid_clusters(&mut self) -> bool {
        self.store.sort();
        let found = self
            .temporal
            .find_bcid_clusters(self.store.hits(), &mut self.state.bcid_clusters);
        self.state.counts.bcid_clusters = self.state.bcid_clusters.len();
        self.sink.debug(format_args!(
            "bcid clusters: {}",
            self.state.bcid_clusters.len()
        ));
        found
    }

    /// Splits bunch-crossing clusters on corrected time.
    pub fn find_time_clusters(&mut self) -> bool {
        let state = &mut self.state;
        let found = self.temporal.find_time_clusters(
            self.store.hits(),
            &state.bcid_clusters,
            &mut state.times,
            &mut state.time_clusters,
        );
        state.counts.time_clusters = state.time_clusters.len();
        self.sink
            .debug(format_args!("time clusters: {}", state.time_clusters.len()));
        found
    }

    /// Clusters, pairs, links and grows tracks along one axis.
    pub fn track_along(&mut self, axis: Axis) -> bool {
        let a = axis.index();
        let EventState {
            time_clusters,
            clusters,
            cells,
            partials,
            candidates,
            counts,
            ..
        } = &mut self.state;
        let (clusters, cells, partials) = (&mut clusters[a], &mut cells[a], &mut partials[a]);

        clusters.clear();
        let mut dropped = 0;
        for tc in time_clusters.iter() {
            dropped += find_neighbor_hits(&*self.geometry, &self.store, tc, axis, clusters);
        }
        if dropped > 0 {
            self.sink
                .warn(format_args!("{axis:?}: {dropped} hits outside the geometry"));
        }

        self.cell_builder
            .find_cluster_pairs(clusters, cells, partials);
        let links = self.graph.find_neighbor_cells(clusters, cells);
        define_cell_state(clusters, cells);
        let accepted = self
            .track_builder
            .build(clusters, cells, partials, &self.store, candidates);

        counts.clusters[a] = clusters.len();
        counts.cells[a] = cells.len();
        counts.candidates[a] = accepted;
        self.sink.debug(format_args!(
            "{axis:?}: {} clusters, {} cells, {links} links, {accepted} tracks",
            clusters.len(),
            cells.len()
        ));
        accepted > 0
    }

    /// Runs the Hough transform over each view of each time cluster.
    pub fn find_hough_lines(&mut self) -> usize {
        let state = &mut self.state;
        state.hough_lines.clear();
        for tc in &state.time_clusters {
            for view in View::ALL {
                let points: Vec<(f64, f64)> = tc
                    .hits
                    .iter()
                    .filter(|&&h| self.store.view(h) == view)
                    .filter_map(|&h| {
                        let hit = self.store.get(h)?;
                        let pos = self
                            .geometry
                            .position(view, usize::from(hit.plane), usize::from(hit.channel))
                            .ok()?;
                        Some((pos.z, pos.transverse(view)))
                    })
                    .collect();
                state
                    .hough_lines
                    .extend(self.hough.find_lines(&points, view, tc.id));
            }
        }
        state.counts.hough_lines = state.hough_lines.len();
        state.hough_lines.len()
    }

    /// Ranks candidates by energy and drops duplicates.
    pub fn erase_duplicate_tracks(&mut self) -> bool {
        let mut ranked = self.state.candidates.clone();
        rank_tracks_by_energy(&mut ranked);
        self.state.tracks = erase_duplicate_tracks(
            ranked,
            &self.state.clusters,
            self.config.track.max_shared_clusters,
        );
        self.sink.debug(format_args!(
            "duplicate erasure: {} -> {} tracks",
            self.state.candidates.len(),
            self.state.tracks.len()
        ));
        !self.state.tracks.is_empty()
    }

    /// Promotes Hough lines to tracks in views where the cell path found
    /// nothing. Returns the number of promoted lines.
    pub fn hough_fallback(&mut self) -> usize {
        if !self.config.hough.fallback {
            return 0;
        }
        let state = &mut self.state;
        let arena = &state.clusters[Axis::AlongZ.index()];
        let min_clusters = self.config.track.min_track_cells + 1;
        let distance = self.config.hough.association_distance;
        let mut claimed = vec![false; arena.len()];
        let mut promoted = Vec::new();

        for line in &state.hough_lines {
            let covered = state
                .tracks
                .iter()
                .any(|t| t.time_cluster == line.time_cluster && t.view == line.view);
            if covered {
                continue;
            }
            let mut members: Vec<usize> = arena
                .iter()
                .enumerate()
                .filter(|(i, c)| {
                    !claimed[*i]
                        && c.time_cluster == line.time_cluster
                        && c.view == line.view
                        && line.distance(c.depth, c.transverse) <= distance
                })
                .map(|(i, _)| i)
                .collect();
            if members.len() < min_clusters {
                continue;
            }
            members.sort_by_key(|&i| (arena[i].recon_plane, i));
            let Some(fit) = fit_clusters(arena, &members) else {
                continue;
            };
            for &m in &members {
                claimed[m] = true;
            }
            if let Some(mut track) = Track::from_clusters(arena, members, fit, &self.store) {
                track.origin = TrackOrigin::Hough;
                promoted.push(track);
            }
        }

        let n = promoted.len();
        if n > 0 {
            self.sink
                .debug(format_args!("hough fallback: {n} tracks"));
        }
        state.tracks.extend(promoted);
        n
    }

    /// Builds output records with boundary flags and Hough matches.
    pub fn finalize_tracks(&mut self) {
        let state = &mut self.state;
        let geometry: &dyn Geometry = &*self.geometry;
        let mut kept = Vec::with_capacity(state.tracks.len());
        state.records.clear();

        for track in state.tracks.drain(..) {
            let a = track.axis.index();
            let record = track_record(
                state.records.len(),
                &track,
                &state.clusters[a],
                &state.cells[a],
                &self.store,
                geometry,
                &state.times,
            );
            if let Some(mut record) = record {
                let (veto, side_escape) = check_veto_side_escape(&record, &self.config.veto);
                record.veto = veto;
                record.side_escape = side_escape;
                state.records.push(record);
                kept.push(track);
            }
        }
        state.tracks = kept;
        match_hough_lines(
            &mut state.records,
            &state.hough_lines,
            self.config.hough.association_distance,
        );
        state.counts.tracks = state.records.len();
    }

    /// Matches side-view and top-view tracks.
    pub fn find_track_pairs(&mut self) -> bool {
        self.state.pairs =
            find_track_pairs(&self.state.tracks, self.config.track.pair_plane_tolerance);
        self.state.counts.pairs = self.state.pairs.len();
        !self.state.pairs.is_empty()
    }

    /// Attaches free hits close to finished tracks.
    pub fn add_near_hits(&mut self) -> usize {
        let state = &mut self.state;
        let attached = self.near_hits.add_near_hits(
            &*self.geometry,
            &self.store,
            &state.times,
            &state.time_clusters,
            &mut state.records,
        );
        state.counts.near_hits = attached;
        attached
    }

    /// Fills path length and mean dE/dx of every finished track.
    pub fn measure_tracks(&mut self) {
        measure_tracks(
            &*self.geometry,
            &self.store,
            &mut self.state.records,
            &self.state.pairs,
        );
    }

    /// Builds the per-hit output table.
    #[must_use]
    pub fn fill_track_hits(&self) -> Vec<HitRecord> {
        let mut context = vec![HitContext::default(); self.store.len()];
        for tc in &self.state.time_clusters {
            for &h in &tc.hits {
                context[h].time_cluster = Some(tc.id);
            }
        }
        for cluster in &self.state.clusters[Axis::AlongZ.index()] {
            for &h in &cluster.hits {
                context[h].cluster_energy = cluster.energy;
            }
        }
        fill_track_hits(
            &*self.geometry,
            &self.store,
            &context,
            &self.state.records,
            &self.state.pairs,
        )
    }

    fn output(&mut self) -> ReconOutput {
        let hits = self.fill_track_hits();
        let state = &mut self.state;
        ReconOutput {
            hits,
            tracks: TrackSet {
                tracks: std::mem::take(&mut state.records),
                pairs: std::mem::take(&mut state.pairs),
            },
            hough_lines: std::mem::take(&mut state.hough_lines),
            counts: state.counts,
            stopped_at: state.stopped_at,
        }
    }

    fn stop(&mut self, stage: Stage) -> ReconOutput {
        self.state.stopped_at = Some(stage);
        self.sink.debug(format_args!(
            "{} hits: no result at {stage:?}",
            self.store.len()
        ));
        self.output()
    }

    /// Runs every stage on the ingested hits.
    ///
    /// A stage without result ends the event early; the output then records
    /// where it stopped.
    ///
    /// # Errors
    /// Returns [`Error::TooManyHits`] when the event exceeds the hit cap.
    pub fn reconstruct(&mut self) -> Result<ReconOutput> {
        self.state.clear();
        let n = self.store.len();
        self.state.counts.hits = n;
        if n > self.config.event.max_hits {
            self.sink.warn(format_args!(
                "event skipped: {n} hits exceed limit {}",
                self.config.event.max_hits
            ));
            return Err(Error::TooManyHits {
                count: n,
                limit: self.config.event.max_hits,
            });
        }

        if !self.find_bcid_clusters() {
            return Ok(self.stop(Stage::BcidCluster));
        }
        if !self.find_time_clusters() {
            return Ok(self.stop(Stage::TimeCluster));
        }
        self.track_along(Axis::AlongZ);
        self.track_along(Axis::AlongXy);
        self.find_hough_lines();
        self.erase_duplicate_tracks();
        self.hough_fallback();
        if self.state.tracks.is_empty() {
            return Ok(self.stop(Stage::TrackAlongXy));
        }

        self.finalize_tracks();
        self.find_track_pairs();
        self.add_near_hits();
        self.measure_tracks();

        let output = self.output();
        self.sink.info(format_args!(
            "{n} hits, {} time clusters, {} tracks, {} pairs",
            output.counts.time_clusters,
            output.tracks.len(),
            output.tracks.pairs.len()
        ));
        Ok(output)
    }
}

/// Reconstructs many events in parallel, one engine per worker.
///
/// Results are returned in input order.
#[must_use]
pub fn reconstruct_events<G: Geometry>(
    config: &ReconConfig,
    geometry: &Arc<G>,
    sink: &LogSink,
    events: &[Vec<Hit>],
) -> Vec<Result<ReconOutput>> {
    events
        .par_iter()
        .map_init(
            || ReconEngine::new(config.clone(), Arc::clone(geometry), sink.clone()),
            |engine, hits| {
                engine.reset();
                engine.push_hits(hits.iter().copied());
                engine.reconstruct()
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ReconEngine {
        ReconEngine::new(
            ReconConfig::default(),
            Arc::new(WaterModuleGeometry::new()),
            LogSink::discard(),
        )
    }

    #[test]
    fn test_empty_event() {
        let mut engine = engine();
        let output = engine.reconstruct().unwrap();
        assert!(!output.found_tracks());
        assert_eq!(output.stopped_at, Some(Stage::BcidCluster));
        assert!(output.hits.is_empty());
        assert!(!engine.find_time_clusters());
        assert!(!engine.track_along(Axis::AlongZ));
        assert!(!engine.track_along(Axis::AlongXy));
        assert!(!engine.erase_duplicate_tracks());
        assert!(!engine.find_track_pairs());
        assert_eq!(engine.add_near_hits(), 0);
        assert_eq!(engine.find_hough_lines(), 0);
    }

    #[test]
    fn test_push_rejects_invalid() {
        let mut engine = engine();
        assert!(!engine.push_hit(Hit::new(0, 3, 0, 0)));
        assert!(engine.push_hit(Hit::new(0, 1, 0, 0)));
        assert_eq!(engine.num_hits(), 1);
    }

    #[test]
    fn test_hit_cap() {
        let mut engine = ReconEngine::new(
            ReconConfig::default().with_max_hits(3),
            Arc::new(WaterModuleGeometry::new()),
            LogSink::discard(),
        );
        for ch in 0..4 {
            engine.push_hit(Hit::new(0, 0, 0, ch));
        }
        assert!(matches!(
            engine.reconstruct(),
            Err(Error::TooManyHits { count: 4, limit: 3 })
        ));
    }
}
