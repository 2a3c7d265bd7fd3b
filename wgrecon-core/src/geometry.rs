//! Geometry adapter: channel addressing and physical positions.
//!
//! The reconstruction works in "recon" coordinates: for each view and axis,
//! every scintillator maps to a (recon plane, recon channel) pair where the
//! recon plane increases along the fit's depth coordinate.

use crate::error::GeometryError;
use crate::hit::{Axis, View};
use crate::table::FlatTable;
use serde::{Deserialize, Serialize};

/// Physical position of a scintillator center in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// The coordinate measured by channels of `view`.
    #[inline]
    #[must_use]
    pub fn transverse(&self, view: View) -> f64 {
        match view {
            View::Side => self.y,
            View::Top => self.x,
        }
    }
}

/// Address in reconstruction coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ReconAddress {
    pub plane: usize,
    pub channel: usize,
}

/// Raw detector address split into sub-layer (grid) and channel within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawAddress {
    pub plane: usize,
    /// Sub-layer index; 0 is the plane layer, higher values are grid layers.
    pub grid: u8,
    pub grid_channel: usize,
}

/// Two-dimensional position of a recon address within its view.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconPosition {
    /// Transverse coordinate of the view (x or y).
    pub xy: f64,
    pub z: f64,
}

impl ReconPosition {
    /// Coordinate along which recon planes are ordered.
    #[inline]
    #[must_use]
    pub fn depth(&self, axis: Axis) -> f64 {
        match axis {
            Axis::AlongZ => self.z,
            Axis::AlongXy => self.xy,
        }
    }

    /// Coordinate measured by recon channels.
    #[inline]
    #[must_use]
    pub fn transverse(&self, axis: Axis) -> f64 {
        match axis {
            Axis::AlongZ => self.xy,
            Axis::AlongXy => self.z,
        }
    }
}

/// Half extents of a scintillator in recon coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScintillatorSize {
    /// Half extent along the transverse coordinate.
    pub half_width: f64,
    /// Half extent along the depth coordinate.
    pub half_thickness: f64,
}

/// Geometry adapter contract.
///
/// Implementations are pure lookups, shared read-only across engines.
pub trait Geometry: Send + Sync {
    /// Number of planes per view.
    fn num_planes(&self) -> usize;

    /// Number of raw channels per plane.
    fn num_channels(&self) -> usize;

    /// Scintillator center for a raw address.
    ///
    /// # Errors
    /// Returns a [`GeometryError`] for an address outside the detector.
    fn position(&self, view: View, plane: usize, channel: usize)
        -> Result<Position, GeometryError>;

    /// Sub-layer index of a raw channel.
    ///
    /// # Errors
    /// Returns a [`GeometryError`] for an address outside the detector.
    fn grid(&self, view: View, plane: usize, channel: usize) -> Result<u8, GeometryError>;

    /// Raw address to recon address.
    ///
    /// # Errors
    /// Returns a [`GeometryError`] for an address outside the detector.
    fn recon_address(
        &self,
        view: View,
        plane: usize,
        channel: usize,
        axis: Axis,
    ) -> Result<ReconAddress, GeometryError>;

    /// Recon address back to the raw address.
    ///
    /// # Errors
    /// Returns [`GeometryError::UnknownAddress`] when no scintillator maps to
    /// `recon`.
    fn raw_address(
        &self,
        view: View,
        recon: ReconAddress,
        axis: Axis,
    ) -> Result<RawAddress, GeometryError>;

    /// Number of recon planes for a view and axis.
    fn max_recon_plane(&self, view: View, axis: Axis) -> usize;

    /// Number of recon channels in one recon plane.
    fn max_recon_channel(&self, view: View, recon_plane: usize, axis: Axis) -> usize;

    /// Half width and thickness of the scintillator at `recon`.
    ///
    /// # Errors
    /// Returns a [`GeometryError`] when `recon` is unknown.
    fn scintillator_size(
        &self,
        view: View,
        recon: ReconAddress,
        axis: Axis,
    ) -> Result<ScintillatorSize, GeometryError>;

    /// Raw channel number of a raw address.
    fn raw_channel(&self, raw: RawAddress) -> usize;

    /// Position of a recon address within its view.
    ///
    /// # Errors
    /// Returns a [`GeometryError`] when `recon` is unknown.
    fn recon_position(
        &self,
        view: View,
        recon: ReconAddress,
        axis: Axis,
    ) -> Result<ReconPosition, GeometryError> {
        let raw = self.raw_address(view, recon, axis)?;
        let pos = self.position(view, raw.plane, self.raw_channel(raw))?;
        Ok(ReconPosition {
            xy: pos.transverse(view),
            z: pos.z,
        })
    }
}

const NUM_VIEWS: usize = 2;
const NUM_PLANES: usize = 8;
const NUM_CHANNELS: usize = 80;
const PLANE_LAYER_CHANNELS: usize = 40;
const GRID_LAYER_CHANNELS: usize = 20;

const PLANE_PITCH: f64 = 57.0;
const LAYER_PITCH: f64 = 28.5;
const PLANE_START: f64 = -226.5;
const CHANNEL_START: f64 = -487.5;
const GRID_CHANNEL_START: f64 = -474.9;
const GRID_SLIT_STEP: f64 = 50.0;
const SCINTI_WIDTH: f64 = 25.0;
const SCINTI_THICKNESS: f64 = 3.0;
const GRID_GAP: f64 = 0.1;

/// Recon planes along xy: 40 plane-layer channels interleaved with 20 grid
/// channels.
const XY_RECON_PLANES: usize = PLANE_LAYER_CHANNELS + GRID_LAYER_CHANNELS;
const Z_RECON_PLANES: usize = NUM_PLANES * 3;

/// The WAGASCI water module: two views of eight planes, each plane a layer of
/// 40 scintillators plus two perpendicular grid layers of 20.
#[derive(Debug, Clone)]
pub struct WaterModuleGeometry {
    positions: FlatTable<Position>,
    recon: FlatTable<ReconAddress>,
    raw: FlatTable<Option<RawAddress>>,
}

impl Default for WaterModuleGeometry {
    fn default() -> Self {
        Self::new()
    }
}

impl WaterModuleGeometry {
    /// Builds the lookup tables.
    #[must_use]
    pub fn new() -> Self {
        let positions = FlatTable::from_fn(&[NUM_VIEWS, NUM_PLANES, NUM_CHANNELS], |i| {
            wm_position(View::ALL[i[0]], i[1], i[2])
        });
        let recon = FlatTable::from_fn(&[2, NUM_VIEWS, NUM_PLANES, NUM_CHANNELS], |i| {
            wm_recon_address(View::ALL[i[1]], i[2], i[3], Axis::ALL[i[0]])
        });
        let raw = FlatTable::from_fn(
            &[2, NUM_VIEWS, XY_RECON_PLANES, PLANE_LAYER_CHANNELS],
            |i| {
                let recon = ReconAddress {
                    plane: i[2],
                    channel: i[3],
                };
                wm_raw_address(View::ALL[i[1]], recon, Axis::ALL[i[0]])
            },
        );
        Self {
            positions,
            recon,
            raw,
        }
    }
}

fn split_channel(channel: usize) -> (u8, usize) {
    if channel < PLANE_LAYER_CHANNELS {
        (0, channel)
    } else if channel < PLANE_LAYER_CHANNELS + GRID_LAYER_CHANNELS {
        (1, channel - PLANE_LAYER_CHANNELS)
    } else {
        (2, channel - PLANE_LAYER_CHANNELS - GRID_LAYER_CHANNELS)
    }
}

#[allow(clippy::cast_precision_loss)]
fn wm_position(view: View, plane: usize, channel: usize) -> Position {
    let (grid, grid_channel) = split_channel(channel);
    let plane_z = PLANE_START + PLANE_PITCH * plane as f64;
    let grid_z = SCINTI_THICKNESS / 2.0 + SCINTI_WIDTH / 2.0 + GRID_GAP;
    let (transverse, z) = match grid {
        0 => {
            let layer = if view == View::Top { LAYER_PITCH } else { 0.0 };
            (CHANNEL_START + SCINTI_WIDTH * grid_channel as f64, plane_z + layer)
        }
        1 => (
            GRID_CHANNEL_START + GRID_SLIT_STEP * grid_channel as f64,
            plane_z + grid_z,
        ),
        _ => (
            GRID_CHANNEL_START + GRID_SLIT_STEP * grid_channel as f64,
            plane_z + LAYER_PITCH + grid_z,
        ),
    };
    match view {
        View::Side => Position {
            x: 0.0,
            y: transverse,
            z,
        },
        View::Top => Position {
            x: transverse,
            y: 0.0,
            z,
        },
    }
}

fn wm_recon_address(view: View, plane: usize, channel: usize, axis: Axis) -> ReconAddress {
    let (grid, grid_channel) = split_channel(channel);
    match axis {
        Axis::AlongZ => {
            // The plane layer sits upstream of the first grid layer in the
            // side view and downstream of it in the top view.
            let order = match (view, grid) {
                (View::Side, g) | (View::Top, g @ 2) => usize::from(g),
                (View::Top, 0) => 1,
                (View::Top, _) => 0,
            };
            ReconAddress {
                plane: plane * 3 + order,
                channel: grid_channel,
            }
        }
        Axis::AlongXy => {
            if grid == 0 {
                ReconAddress {
                    plane: (3 * grid_channel + 1) / 2,
                    channel: plane,
                }
            } else {
                ReconAddress {
                    plane: grid_channel * 3 + 1,
                    channel: plane * 2 + usize::from(grid - 1),
                }
            }
        }
    }
}

fn wm_raw_address(view: View, recon: ReconAddress, axis: Axis) -> Option<RawAddress> {
    let raw = match axis {
        Axis::AlongZ => {
            if recon.plane >= Z_RECON_PLANES {
                return None;
            }
            let grid = match (view, recon.plane % 3) {
                (View::Side, 0) | (View::Top, 1) => 0,
                (View::Side, 1) | (View::Top, 0) => 1,
                _ => 2,
            };
            let channels = if grid == 0 {
                PLANE_LAYER_CHANNELS
            } else {
                GRID_LAYER_CHANNELS
            };
            if recon.channel >= channels {
                return None;
            }
            RawAddress {
                plane: recon.plane / 3,
                grid,
                grid_channel: recon.channel,
            }
        }
        Axis::AlongXy => {
            if recon.plane >= XY_RECON_PLANES {
                return None;
            }
            if recon.plane % 3 == 1 {
                if recon.channel >= NUM_PLANES * 2 {
                    return None;
                }
                RawAddress {
                    plane: recon.channel / 2,
                    grid: if recon.channel % 2 == 0 { 1 } else { 2 },
                    grid_channel: recon.plane / 3,
                }
            } else {
                if recon.channel >= NUM_PLANES {
                    return None;
                }
                RawAddress {
                    plane: recon.channel,
                    grid: 0,
                    grid_channel: (2 * recon.plane) / 3,
                }
            }
        }
    };
    Some(raw)
}

impl Geometry for WaterModuleGeometry {
    fn num_planes(&self) -> usize {
        NUM_PLANES
    }

    fn num_channels(&self) -> usize {
        NUM_CHANNELS
    }

    fn position(
        &self,
        view: View,
        plane: usize,
        channel: usize,
    ) -> Result<Position, GeometryError> {
        self.positions
            .get(&[view.index(), plane, channel])
            .copied()
    }

    fn grid(&self, _view: View, plane: usize, channel: usize) -> Result<u8, GeometryError> {
        if plane >= NUM_PLANES {
            return Err(GeometryError::OutOfRange {
                dimension: 1,
                index: plane,
                len: NUM_PLANES,
            });
        }
        if channel >= NUM_CHANNELS {
            return Err(GeometryError::OutOfRange {
                dimension: 2,
                index: channel,
                len: NUM_CHANNELS,
            });
        }
        Ok(split_channel(channel).0)
    }

    fn recon_address(
        &self,
        view: View,
        plane: usize,
        channel: usize,
        axis: Axis,
    ) -> Result<ReconAddress, GeometryError> {
        self.recon
            .get(&[axis.index(), view.index(), plane, channel])
            .copied()
    }

    fn raw_address(
        &self,
        view: View,
        recon: ReconAddress,
        axis: Axis,
    ) -> Result<RawAddress, GeometryError> {
        let unknown = || GeometryError::UnknownAddress {
            view: u8::from(view == View::Top),
            plane: recon.plane,
            channel: recon.channel,
        };
        match self
            .raw
            .get(&[axis.index(), view.index(), recon.plane, recon.channel])
        {
            Ok(Some(raw)) => Ok(*raw),
            Ok(None) | Err(GeometryError::OutOfRange { .. }) => Err(unknown()),
            Err(e) => Err(e),
        }
    }

    fn max_recon_plane(&self, _view: View, axis: Axis) -> usize {
        match axis {
            Axis::AlongZ => Z_RECON_PLANES,
            Axis::AlongXy => XY_RECON_PLANES,
        }
    }

    fn max_recon_channel(&self, view: View, recon_plane: usize, axis: Axis) -> usize {
        match axis {
            Axis::AlongZ => {
                let plane_layer = match view {
                    View::Side => 0,
                    View::Top => 1,
                };
                if recon_plane % 3 == plane_layer {
                    PLANE_LAYER_CHANNELS
                } else {
                    GRID_LAYER_CHANNELS
                }
            }
            Axis::AlongXy => {
                if recon_plane % 3 == 1 {
                    NUM_PLANES * 2
                } else {
                    NUM_PLANES
                }
            }
        }
    }

    fn scintillator_size(
        &self,
        view: View,
        recon: ReconAddress,
        axis: Axis,
    ) -> Result<ScintillatorSize, GeometryError> {
        let raw = self.raw_address(view, recon, axis)?;
        let wide = ScintillatorSize {
            half_width: SCINTI_WIDTH / 2.0,
            half_thickness: SCINTI_THICKNESS / 2.0,
        };
        let thin = ScintillatorSize {
            half_width: SCINTI_THICKNESS / 2.0,
            half_thickness: SCINTI_WIDTH / 2.0,
        };
        Ok(match (axis, raw.grid) {
            (Axis::AlongZ, 0) => wide,
            (Axis::AlongZ, _) | (Axis::AlongXy, 0) => thin,
            (Axis::AlongXy, _) => wide,
        })
    }

    fn raw_channel(&self, raw: RawAddress) -> usize {
        if raw.grid == 0 {
            raw.grid_channel
        } else {
            raw.grid_channel + GRID_LAYER_CHANNELS * (usize::from(raw.grid) + 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_positions() {
        let geo = WaterModuleGeometry::new();

        let p = geo.position(View::Side, 0, 0).unwrap();
        assert_relative_eq!(p.y, -487.5);
        assert_relative_eq!(p.z, -226.5);

        let p = geo.position(View::Top, 1, 2).unwrap();
        assert_relative_eq!(p.x, -437.5);
        assert_relative_eq!(p.z, -226.5 + 57.0 + 28.5);

        let p = geo.position(View::Side, 0, 41).unwrap();
        assert_relative_eq!(p.y, -424.9);
        assert_relative_eq!(p.z, -226.5 + 14.1);

        let p = geo.position(View::Top, 0, 60).unwrap();
        assert_relative_eq!(p.z, -226.5 + 28.5 + 14.1);

        assert!(geo.position(View::Side, 8, 0).is_err());
        assert!(geo.position(View::Side, 0, 80).is_err());
    }

    #[test]
    fn test_recon_addressing() {
        let geo = WaterModuleGeometry::new();

        let r = geo.recon_address(View::Side, 2, 5, Axis::AlongZ).unwrap();
        assert_eq!(r, ReconAddress { plane: 6, channel: 5 });
        let r = geo.recon_address(View::Top, 2, 5, Axis::AlongZ).unwrap();
        assert_eq!(r, ReconAddress { plane: 7, channel: 5 });
        let r = geo.recon_address(View::Top, 2, 45, Axis::AlongZ).unwrap();
        assert_eq!(r, ReconAddress { plane: 6, channel: 5 });

        let r = geo.recon_address(View::Side, 3, 3, Axis::AlongXy).unwrap();
        assert_eq!(r, ReconAddress { plane: 5, channel: 3 });
        let r = geo.recon_address(View::Side, 3, 62, Axis::AlongXy).unwrap();
        assert_eq!(r, ReconAddress { plane: 7, channel: 7 });
    }

    #[test]
    fn test_recon_round_trip() {
        let geo = WaterModuleGeometry::new();
        for axis in Axis::ALL {
            for view in View::ALL {
                for plane in 0..NUM_PLANES {
                    for channel in 0..NUM_CHANNELS {
                        let recon = geo.recon_address(view, plane, channel, axis).unwrap();
                        assert!(recon.plane < geo.max_recon_plane(view, axis));
                        assert!(
                            recon.channel < geo.max_recon_channel(view, recon.plane, axis)
                        );
                        let raw = geo.raw_address(view, recon, axis).unwrap();
                        assert_eq!(raw.plane, plane);
                        assert_eq!(geo.raw_channel(raw), channel);
                    }
                }
            }
        }
    }

    #[test]
    fn test_recon_position_depth_order() {
        let geo = WaterModuleGeometry::new();
        for view in View::ALL {
            let mut last = f64::NEG_INFINITY;
            for plane in 0..geo.max_recon_plane(view, Axis::AlongZ) {
                let recon = ReconAddress { plane, channel: 0 };
                let z = geo
                    .recon_position(view, recon, Axis::AlongZ)
                    .unwrap()
                    .depth(Axis::AlongZ);
                assert!(z > last);
                last = z;
            }
        }
    }

    #[test]
    fn test_unknown_address() {
        let geo = WaterModuleGeometry::new();
        let bad = ReconAddress { plane: 2, channel: 30 };
        assert!(matches!(
            geo.raw_address(View::Side, bad, Axis::AlongZ),
            Err(GeometryError::UnknownAddress { .. })
        ));
        let bad = ReconAddress { plane: 99, channel: 0 };
        assert!(geo.raw_address(View::Side, bad, Axis::AlongXy).is_err());
    }

    #[test]
    fn test_scintillator_size() {
        let geo = WaterModuleGeometry::new();
        let plane_layer = ReconAddress { plane: 0, channel: 3 };
        let s = geo
            .scintillator_size(View::Side, plane_layer, Axis::AlongZ)
            .unwrap();
        assert_relative_eq!(s.half_width, 12.5);
        assert_relative_eq!(s.half_thickness, 1.5);

        let s = geo
            .scintillator_size(View::Side, plane_layer, Axis::AlongXy)
            .unwrap();
        assert_relative_eq!(s.half_width, 1.5);
        assert_relative_eq!(s.half_thickness, 12.5);
    }
}
