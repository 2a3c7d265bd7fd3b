//! Per-event hit storage.

use crate::error::{Error, Result};
use crate::hit::{Hit, View};

/// Address bounds a hit must satisfy to be ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLimits {
    /// Number of planes per view.
    pub planes: usize,
    /// Number of channels per plane.
    pub channels: usize,
}

impl AddressLimits {
    /// Creates address limits.
    #[must_use]
    pub fn new(planes: usize, channels: usize) -> Self {
        Self { planes, channels }
    }
}

/// Holds the hits of one event.
///
/// The resolved [`View`] of every stored hit is kept in a parallel column so
/// downstream stages never re-validate the raw view index.
#[derive(Debug, Clone)]
pub struct HitStore {
    hits: Vec<Hit>,
    views: Vec<View>,
    limits: AddressLimits,
    sorted: bool,
}

impl HitStore {
    /// Creates an empty store for the given address bounds.
    #[must_use]
    pub fn new(limits: AddressLimits) -> Self {
        Self {
            hits: Vec::new(),
            views: Vec::new(),
            limits,
            sorted: true,
        }
    }

    /// Creates an empty store with reserved capacity.
    #[must_use]
    pub fn with_capacity(limits: AddressLimits, capacity: usize) -> Self {
        Self {
            hits: Vec::with_capacity(capacity),
            views: Vec::with_capacity(capacity),
            limits,
            sorted: true,
        }
    }

    /// Appends a hit after validating its address and values.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAddress`] for an out-of-range view, plane or
    /// channel, and [`Error::InvalidHitValue`] for a non-finite energy proxy
    /// or corrected time. A rejected hit is not stored.
    pub fn push(&mut self, hit: Hit) -> Result<()> {
        let invalid = || Error::InvalidAddress {
            view: hit.view,
            plane: hit.plane,
            channel: hit.channel,
        };
        let view = View::from_index(hit.view).ok_or_else(invalid)?;
        if usize::from(hit.plane) >= self.limits.planes
            || usize::from(hit.channel) >= self.limits.channels
        {
            return Err(invalid());
        }
        if !hit.energy_proxy.is_finite() {
            return Err(Error::InvalidHitValue("energy proxy is not finite"));
        }
        if !hit.corrected_time.is_finite() {
            return Err(Error::InvalidHitValue("corrected time is not finite"));
        }

        if let Some(last) = self.hits.last() {
            if last.order_key() > hit.order_key() {
                self.sorted = false;
            }
        }
        self.hits.push(hit);
        self.views.push(view);
        Ok(())
    }

    /// Stable-sorts hits by (bcid, view, plane, channel).
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        let mut order: Vec<usize> = (0..self.hits.len()).collect();
        order.sort_by_key(|&i| self.hits[i].order_key());

        self.hits = order.iter().map(|&i| self.hits[i]).collect();
        self.views = order.iter().map(|&i| self.views[i]).collect();
        self.sorted = true;
    }

    /// Whether hits are currently in (bcid, view, plane, channel) order.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Number of stored hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Address bounds used for validation.
    #[must_use]
    pub fn limits(&self) -> AddressLimits {
        self.limits
    }

    /// All stored hits.
    #[must_use]
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    /// Hit at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Hit> {
        self.hits.get(index)
    }

    /// Resolved view of the hit at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    #[inline]
    #[must_use]
    pub fn view(&self, index: usize) -> View {
        self.views[index]
    }

    /// Removes every hit.
    pub fn clear(&mut self) {
        self.hits.clear();
        self.views.clear();
        self.sorted = true;
    }
}
