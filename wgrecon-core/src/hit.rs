//! Hit records and detector addressing.

use serde::{Deserialize, Serialize};

/// Readout projection of a scintillator layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum View {
    /// Side view, channels measure the vertical (y) coordinate.
    Side,
    /// Top view, channels measure the horizontal (x) coordinate.
    Top,
}

impl View {
    /// Both views in index order.
    pub const ALL: [View; 2] = [View::Side, View::Top];

    /// Converts a raw view index.
    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(View::Side),
            1 => Some(View::Top),
            _ => None,
        }
    }

    /// Raw view index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            View::Side => 0,
            View::Top => 1,
        }
    }

    /// The complementary projection.
    #[inline]
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            View::Side => View::Top,
            View::Top => View::Side,
        }
    }
}

/// Reconstruction axis: which coordinate plays the role of depth.
///
/// Tracks are fitted as `transverse = intercept + slope * depth`. Along z the
/// depth is the beam coordinate and the transverse coordinate is x or y;
/// along xy the roles swap, which keeps steep tracks well conditioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Depth is z.
    AlongZ,
    /// Depth is the view's transverse coordinate.
    AlongXy,
}

impl Axis {
    /// Both axes in index order.
    pub const ALL: [Axis; 2] = [Axis::AlongZ, Axis::AlongXy];

    /// Raw axis index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Axis::AlongZ => 0,
            Axis::AlongXy => 1,
        }
    }
}

/// A single digitized scintillator hit.
///
/// Hits are immutable once ingested into a [`crate::HitStore`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Hit {
    /// Bunch-crossing identifier.
    pub bcid: u32,
    /// Raw view index (0 = side, 1 = top).
    pub view: u8,
    /// Plane (depth) index.
    pub plane: u8,
    /// Channel within the plane.
    pub channel: u8,
    /// Readout interface (DIF) identifier.
    pub interface_id: u8,
    /// Readout chip (ASIC) identifier.
    pub chip_id: u8,
    /// Channel within the chip.
    pub chip_channel: u8,
    /// Analog memory (capacitor) slot.
    pub capacitor_slot: u8,
    /// ADC amplitude.
    pub amplitude: u16,
    /// Gain selection flag (true = high gain).
    pub gain_flag: bool,
    /// Raw TDC value.
    pub raw_time: u16,
    /// Energy proxy in photo-electrons.
    pub energy_proxy: f64,
    /// Calibrated hit time in nanoseconds.
    pub corrected_time: f64,
}

impl Hit {
    /// Creates a hit at a geometric address with empty readout fields.
    #[must_use]
    pub fn new(bcid: u32, view: u8, plane: u8, channel: u8) -> Self {
        Self {
            bcid,
            view,
            plane,
            channel,
            ..Default::default()
        }
    }

    /// Sets the readout address.
    #[must_use]
    pub fn with_readout(
        mut self,
        interface_id: u8,
        chip_id: u8,
        chip_channel: u8,
        capacitor_slot: u8,
    ) -> Self {
        self.interface_id = interface_id;
        self.chip_id = chip_id;
        self.chip_channel = chip_channel;
        self.capacitor_slot = capacitor_slot;
        self
    }

    /// Sets the digitized amplitude and timing fields.
    #[must_use]
    pub fn with_signal(mut self, amplitude: u16, gain_flag: bool, raw_time: u16) -> Self {
        self.amplitude = amplitude;
        self.gain_flag = gain_flag;
        self.raw_time = raw_time;
        self
    }

    /// Sets the energy proxy (photo-electrons).
    #[must_use]
    pub fn with_energy(mut self, energy_proxy: f64) -> Self {
        self.energy_proxy = energy_proxy;
        self
    }

    /// Sets the calibrated time.
    #[must_use]
    pub fn with_time(mut self, corrected_time: f64) -> Self {
        self.corrected_time = corrected_time;
        self
    }

    /// Sort key used by the hit store.
    #[inline]
    #[must_use]
    pub fn order_key(&self) -> (u32, u8, u8, u8) {
        (self.bcid, self.view, self.plane, self.channel)
    }
}
