//! Straight-line fitting and track geometry helpers.

use wgrecon_core::ScintillatorSize;

/// Chi-square at or below this value counts as an exact fit.
pub const EXACT_FIT_CHI2: f64 = 1e-9;

/// A measured point with its scintillator half extents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPoint {
    pub depth: f64,
    pub transverse: f64,
    pub half_width: f64,
    pub half_thickness: f64,
}

impl FitPoint {
    /// Creates a point with unit uncertainty.
    #[must_use]
    pub fn new(depth: f64, transverse: f64) -> Self {
        Self {
            depth,
            transverse,
            half_width: 1.0,
            half_thickness: 0.0,
        }
    }

    /// Sets the half extents.
    #[must_use]
    pub fn with_size(mut self, size: ScintillatorSize) -> Self {
        self.half_width = size.half_width;
        self.half_thickness = size.half_thickness;
        self
    }

    fn variance(&self, slope: f64) -> f64 {
        let v = self.half_width * self.half_width
            + slope * slope * self.half_thickness * self.half_thickness;
        if v > 0.0 {
            v
        } else {
            1.0
        }
    }
}

/// Result of a weighted least-squares line fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    /// `transverse = intercept + slope * depth`.
    pub slope: f64,
    pub intercept: f64,
    pub chi2: f64,
}

impl LineFit {
    /// Line value at `depth`.
    #[inline]
    #[must_use]
    pub fn at(&self, depth: f64) -> f64 {
        self.intercept + self.slope * depth
    }

    /// Perpendicular distance of a point from the line.
    #[must_use]
    pub fn distance(&self, depth: f64, transverse: f64) -> f64 {
        (transverse - self.at(depth)).abs() / self.slope.hypot(1.0)
    }

    /// Cosine between the line and the depth axis.
    #[must_use]
    pub fn cos_angle(&self) -> f64 {
        1.0 / self.slope.hypot(1.0)
    }
}

fn weighted_fit(points: &[FitPoint], slope_hint: f64) -> Option<(f64, f64)> {
    let (mut sw, mut sd, mut st, mut sdd, mut sdt) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        let w = 1.0 / p.variance(slope_hint);
        sw += w;
        sd += w * p.depth;
        st += w * p.transverse;
        sdd += w * p.depth * p.depth;
        sdt += w * p.depth * p.transverse;
    }
    let det = sw * sdd - sd * sd;
    if det.abs() <= f64::EPSILON * sw * sdd.abs().max(1.0) {
        return None;
    }
    let slope = (sw * sdt - sd * st) / det;
    let intercept = (st - slope * sd) / sw;
    Some((slope, intercept))
}

/// Fits `transverse = intercept + slope * depth`.
///
/// Each point is weighted by the inverse of its projected scintillator
/// extent; the fit is repeated once with the slope-dependent extent of the
/// first pass. Returns `None` for fewer than two distinct depths.
#[must_use]
pub fn fit_line(points: &[FitPoint]) -> Option<LineFit> {
    if points.len() < 2 {
        return None;
    }
    let (first_slope, _) = weighted_fit(points, 0.0)?;
    let (slope, intercept) = weighted_fit(points, first_slope)?;
    let chi2 = points
        .iter()
        .map(|p| {
            let r = p.transverse - (intercept + slope * p.depth);
            r * r / p.variance(slope)
        })
        .sum();
    Some(LineFit {
        slope,
        intercept,
        chi2,
    })
}

/// Root-mean-square transverse deviation of points from a line.
#[must_use]
pub fn dispersion(points: &[(f64, f64)], slope: f64, intercept: f64) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum: f64 = points
        .iter()
        .map(|&(depth, transverse)| {
            let r = transverse - (intercept + slope * depth);
            r * r
        })
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    (sum / n).sqrt()
}

/// Distance travelled through one scintillator.
///
/// The track direction is `(1, slope, cross_slope)` in (depth, transverse,
/// along the bar); `cross_slope` comes from the other view and is zero for
/// an unpaired track. The path is cut by whichever face pair, thickness or
/// width, it crosses first.
#[must_use]
pub fn path_length(slope: f64, cross_slope: f64, size: ScintillatorSize) -> f64 {
    let thickness = 2.0 * size.half_thickness;
    let width = 2.0 * size.half_width;
    let norm = slope.hypot(1.0).hypot(cross_slope);
    let along_depth = thickness;
    let along_width = width / slope.abs();
    norm * along_depth.min(along_width)
}
