//! wgrecon-algorithms: Track reconstruction stages for scintillator hits.
//!
//! The pipeline runs in this order:
//! - **Temporal** - bunch-crossing runs, then corrected-time windows
//! - **Spatial** - adjacent-channel clusters per plane
//! - **Cells** - cluster pairs across planes, linked into a cell graph
//! - **Tracks** - chi-square guided growth, duplicate erasure and pairing
//! - **Hough** - line votes used for matching and as a fallback finder
//! - **Post** - boundary flags, near hits and the per-hit table
//!

pub mod cell;
pub mod fit;
pub mod graph;
pub mod hough;
pub mod post;
mod processing;
pub mod spatial;
pub mod temporal;
pub mod track;

pub use cell::{Cell, CellBuilder, CellState};
pub use fit::{dispersion, fit_line, path_length, FitPoint, LineFit};
pub use graph::{define_cell_state, CellGraph};
pub use hough::{HoughTransform, Peak};
pub use post::{
    check_veto_side_escape, fill_track_hits, measure_tracks, track_slopes, HitContext,
    NearHitFinder,
};
pub use processing::{reconstruct_events, ReconEngine};
pub use spatial::{find_neighbor_hits, SpatialCluster};
pub use temporal::{TemporalClustering, TimeCluster};
pub use track::{
    erase_duplicate_tracks, find_track_pairs, rank_tracks_by_energy, CandidateState, Track,
    TrackBuilder,
};

// Re-export the core types used in engine signatures
pub use wgrecon_core::{Geometry, Hit, LogSink, ReconConfig, ReconOutput, WaterModuleGeometry};
