//! wgrecon-core: Core types for scintillator track reconstruction.
//!
//! This crate provides the hit model and store, the geometry adapter
//! contract with the water-module implementation, configuration, the log
//! sink, and the output records produced by the reconstruction engine.
//!

pub mod config;
pub mod error;
pub mod geometry;
pub mod hit;
pub mod sink;
pub mod store;
pub mod table;
pub mod track;

pub use config::{
    CellConfig, EventConfig, HoughConfig, NearHitConfig, NeighborConfig, ReconConfig,
    TimeCorrection, TrackConfig, VetoConfig,
};
pub use error::{Error, GeometryError, Result};
pub use geometry::{
    Geometry, Position, RawAddress, ReconAddress, ReconPosition, ScintillatorSize,
    WaterModuleGeometry,
};
pub use hit::{Axis, Hit, View};
pub use sink::LogSink;
pub use store::{AddressLimits, HitStore};
pub use table::FlatTable;
pub use track::{
    CellRecord, HitRecord, HoughLine, ReconOutput, Stage, StageCounts, TrackEnd, TrackOrigin,
    TrackPair, TrackPoint, TrackRecord, TrackSet,
};
