//! Outline sampling and Hausdorff distance.
//!
//! Shapes are compared in the normalised 1000-unit square. Each contour is
//! split into segments at its on-curve points, every segment is sampled at
//! roughly `step` spacing, and two outlines are compared by the symmetric
//! Hausdorff distance between their sample sets.
//!
//! Control points are expanded into curves before sampling, so a quadratic and
//! a cubic drawing of the same curve compare as close shapes even though their
//! signatures differ.

use crate::fonts::outline::PointKind;
use crate::signature::{NormalizedShape, ShapePoint};

/// One sample on an outline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    /// X in normalised units
    pub x: f64,
    /// Y in normalised units
    pub y: f64,
}

impl SamplePoint {
    #[inline]
    fn distance_sq(&self, other: &SamplePoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    #[inline]
    fn lerp(a: SamplePoint, b: SamplePoint, t: f64) -> SamplePoint {
        SamplePoint {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
        }
    }
}

impl From<&ShapePoint> for SamplePoint {
    fn from(p: &ShapePoint) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// Axis-aligned bounds of a sample set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum X
    pub min_x: f64,
    /// Minimum Y
    pub min_y: f64,
    /// Maximum X
    pub max_x: f64,
    /// Maximum Y
    pub max_y: f64,
}

impl Bounds {
    /// Lower bound on the Hausdorff distance between two sample sets.
    ///
    /// If one set extends `d` further than the other in any direction, the
    /// extreme sample is at least `d` away from every sample of the other set.
    pub fn hausdorff_lower_bound(&self, other: &Bounds) -> f64 {
        (self.min_x - other.min_x)
            .abs()
            .max((self.min_y - other.min_y).abs())
            .max((self.max_x - other.max_x).abs())
            .max((self.max_y - other.max_y).abs())
    }
}

/// Sample set of one outline.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledShape {
    points: Vec<SamplePoint>,
    bounds: Option<Bounds>,
}

impl SampledShape {
    /// Sample every contour of `shape` at about `step` units spacing.
    pub fn from_shape(shape: &NormalizedShape, step: f64) -> Self {
        let step = if step.is_finite() && step > 0.0 { step } else { 1.0 };
        let mut points = Vec::new();
        for contour in &shape.contours {
            sample_contour(contour, step, &mut points);
        }
        let bounds = bounds_of(&points);
        Self { points, bounds }
    }

    /// Samples in contour order.
    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    /// Bounds of the samples, `None` when there are none.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// True if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Symmetric Hausdorff distance, `INFINITY` if either side is empty.
pub fn hausdorff(a: &SampledShape, b: &SampledShape) -> f64 {
    hausdorff_within(a, b, f64::INFINITY).unwrap_or(f64::INFINITY)
}

/// Symmetric Hausdorff distance if it does not exceed `limit`.
///
/// Stops as soon as the running maximum passes `limit`.
pub fn hausdorff_within(a: &SampledShape, b: &SampledShape, limit: f64) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let limit_sq = if limit.is_finite() { limit * limit } else { f64::INFINITY };
    let forward = directed_sq(&a.points, &b.points, limit_sq)?;
    let backward = directed_sq(&b.points, &a.points, limit_sq)?;
    Some(forward.max(backward).sqrt())
}

/// Squared directed Hausdorff distance from `from` to `to`, `None` past `limit_sq`.
fn directed_sq(from: &[SamplePoint], to: &[SamplePoint], limit_sq: f64) -> Option<f64> {
    let mut worst = 0.0f64;
    for a in from {
        let mut nearest = f64::INFINITY;
        for b in to {
            let d = a.distance_sq(b);
            if d < nearest {
                nearest = d;
                // This point can no longer raise the maximum.
                if nearest <= worst {
                    break;
                }
            }
        }
        if nearest > worst {
            worst = nearest;
            if worst > limit_sq {
                return None;
            }
        }
    }
    Some(worst)
}

fn bounds_of(points: &[SamplePoint]) -> Option<Bounds> {
    let first = points.first()?;
    let mut b = Bounds {
        min_x: first.x,
        min_y: first.y,
        max_x: first.x,
        max_y: first.y,
    };
    for p in &points[1..] {
        b.min_x = b.min_x.min(p.x);
        b.min_y = b.min_y.min(p.y);
        b.max_x = b.max_x.max(p.x);
        b.max_y = b.max_y.max(p.y);
    }
    Some(b)
}

/// Append samples of one closed contour.
///
/// The contour is walked from its first on-curve point; control points
/// between two on-curve points form one segment, and the last segment wraps
/// back to the start.
fn sample_contour(contour: &[ShapePoint], step: f64, out: &mut Vec<SamplePoint>) {
    let Some(start) = contour.iter().position(|p| p.kind == PointKind::On) else {
        // No on-curve point: treat the control polygon as the outline.
        let poly: Vec<SamplePoint> = contour.iter().map(SamplePoint::from).collect();
        if let Some(&first) = poly.first() {
            sample_segment(first, &poly[1..], first, step, out);
        }
        return;
    };

    let n = contour.len();
    let mut from = SamplePoint::from(&contour[start]);
    let mut controls: Vec<SamplePoint> = Vec::new();
    for offset in 1..=n {
        let p = &contour[(start + offset) % n];
        if p.kind == PointKind::On {
            let to = SamplePoint::from(p);
            sample_segment(from, &controls, to, step, out);
            controls.clear();
            from = to;
        } else {
            controls.push(SamplePoint::from(p));
        }
    }
}

/// Append samples of one segment, excluding its end point.
fn sample_segment(
    from: SamplePoint,
    controls: &[SamplePoint],
    to: SamplePoint,
    step: f64,
    out: &mut Vec<SamplePoint>,
) {
    // Control polygon length bounds the arc length from above.
    let mut length = 0.0;
    let mut prev = from;
    for &p in controls.iter().chain(std::iter::once(&to)) {
        length += prev.distance_sq(&p).sqrt();
        prev = p;
    }
    let n = ((length / step).ceil() as usize).max(1);

    for i in 0..n {
        let t = i as f64 / n as f64;
        out.push(evaluate(from, controls, to, t));
    }
}

fn evaluate(from: SamplePoint, controls: &[SamplePoint], to: SamplePoint, t: f64) -> SamplePoint {
    let mt = 1.0 - t;
    match controls {
        [] => SamplePoint::lerp(from, to, t),
        [c] => SamplePoint {
            x: mt * mt * from.x + 2.0 * mt * t * c.x + t * t * to.x,
            y: mt * mt * from.y + 2.0 * mt * t * c.y + t * t * to.y,
        },
        [c1, c2] => SamplePoint {
            x: mt * mt * mt * from.x
                + 3.0 * mt * mt * t * c1.x
                + 3.0 * mt * t * t * c2.x
                + t * t * t * to.x,
            y: mt * mt * mt * from.y
                + 3.0 * mt * mt * t * c1.y
                + 3.0 * mt * t * t * c2.y
                + t * t * t * to.y,
        },
        _ => {
            // Polyline through the controls, parameterised per edge.
            let mut poly = Vec::with_capacity(controls.len() + 2);
            poly.push(from);
            poly.extend_from_slice(controls);
            poly.push(to);
            let edges = (poly.len() - 1) as f64;
            let pos = t * edges;
            let idx = (pos.floor() as usize).min(poly.len() - 2);
            SamplePoint::lerp(poly[idx], poly[idx + 1], pos - idx as f64)
        },
    }
}
