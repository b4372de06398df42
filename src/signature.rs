//! Shape signatures.
//!
//! A [`ShapeSignature`] is the lookup key of the coordinate table. It encodes a
//! glyph outline after removing everything an obfuscation font is free to
//! change without changing what the reader sees:
//!
//! - **Translation**: points are shifted so the bounding-box minimum is the origin.
//! - **Uniform scale**: the larger bounding-box side is scaled to
//!   [`SIGNATURE_EXTENT`] (1000) units.
//! - **Start point and winding**: each contour is rotated so its smallest point
//!   (ordered by `x`, `y`, kind) comes first, in whichever direction gives the
//!   smaller sequence.
//! - **Contour order**: contours are sorted.
//!
//! Coordinates are rounded to whole units, i.e. 0.1% of the glyph's extent.
//! Two glyphs that differ only below that resolution share a signature. For CJK
//! faces, where stems sit tens of units apart at this scale, such collisions
//! require near-identical shapes; they lower accuracy but are never fatal.
//!
//! # Encoding
//!
//! Contours are separated by `|`, points by a space, each point is `x,y` with a
//! `q` (quadratic) or `c` (cubic) suffix for control points:
//!
//! ```text
//! 0,0 0,1000 1000,1000 1000,0|250,250 500,750q 750,250
//! ```
//!
//! The scale and translation are computed in `f64` from exact font-unit
//! coordinates, so an outline and its integer rescaled copy normalise to
//! bit-identical values before rounding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fonts::outline::{GlyphOutline, PointKind};

/// Size of the longer bounding-box side after normalisation.
pub const SIGNATURE_EXTENT: f64 = 1000.0;

/// Canonical, comparable encoding of a glyph outline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeSignature(String);

impl ShapeSignature {
    /// Wrap an already encoded signature (e.g. read from a table file).
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The textual encoding.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Signature of an outline without contours.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of contours encoded.
    pub fn contour_count(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.split('|').count()
        }
    }

    /// Number of points per contour, in canonical order.
    pub fn point_counts(&self) -> Vec<usize> {
        if self.0.is_empty() {
            return Vec::new();
        }
        self.0
            .split('|')
            .map(|c| c.split(' ').filter(|p| !p.is_empty()).count())
            .collect()
    }
}

impl fmt::Display for ShapeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point in normalised space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapePoint {
    /// X in `0..=SIGNATURE_EXTENT`
    pub x: f64,
    /// Y in `0..=SIGNATURE_EXTENT`
    pub y: f64,
    /// Point role
    pub kind: PointKind,
}

/// An outline translated and scaled into the normalised square.
///
/// Contours keep their drawing order; only [`NormalizedShape::signature`]
/// canonicalises ordering. The slow path samples these contours directly.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedShape {
    /// Normalised contours in drawing order
    pub contours: Vec<Vec<ShapePoint>>,
}

impl NormalizedShape {
    /// Translate and scale an outline into the normalised square.
    pub fn from_outline(outline: &GlyphOutline) -> Self {
        let Some((x_min, y_min, x_max, y_max)) = outline.bounds() else {
            return Self {
                contours: Vec::new(),
            };
        };
        let (x_min, y_min) = (x_min as f64, y_min as f64);
        let extent = (x_max as f64 - x_min).max(y_max as f64 - y_min);
        // Single-point or zero-area outlines collapse onto the origin.
        let extent = if extent > 0.0 { extent } else { 1.0 };

        let contours = outline
            .contours
            .iter()
            .filter(|c| !c.points.is_empty())
            .map(|c| {
                c.points
                    .iter()
                    .map(|p| ShapePoint {
                        x: ((p.x as f64 - x_min) * SIGNATURE_EXTENT) / extent,
                        y: ((p.y as f64 - y_min) * SIGNATURE_EXTENT) / extent,
                        kind: p.kind,
                    })
                    .collect()
            })
            .collect();

        Self { contours }
    }

    /// True if there is nothing to compare.
    pub fn is_empty(&self) -> bool {
        self.contours.is_empty()
    }

    /// Canonical signature of this shape.
    pub fn signature(&self) -> ShapeSignature {
        let mut contours: Vec<Vec<GridPoint>> = self
            .contours
            .iter()
            .map(|c| canonical_contour(c.iter().map(GridPoint::from).collect()))
            .collect();
        contours.sort();

        let mut out = String::new();
        for (i, contour) in contours.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            for (j, p) in contour.iter().enumerate() {
                if j > 0 {
                    out.push(' ');
                }
                p.encode(&mut out);
            }
        }
        ShapeSignature(out)
    }
}

/// Compute the signature of an outline.
pub fn signature(outline: &GlyphOutline) -> ShapeSignature {
    NormalizedShape::from_outline(outline).signature()
}

/// A rounded point; field order gives the canonical lexicographic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct GridPoint {
    x: i64,
    y: i64,
    kind: PointKind,
}

impl From<&ShapePoint> for GridPoint {
    fn from(p: &ShapePoint) -> Self {
        Self {
            x: p.x.round() as i64,
            y: p.y.round() as i64,
            kind: p.kind,
        }
    }
}

impl GridPoint {
    fn encode(&self, out: &mut String) {
        use std::fmt::Write;
        let _ = write!(out, "{},{}", self.x, self.y);
        match self.kind {
            PointKind::On => {},
            PointKind::Quad => out.push('q'),
            PointKind::Cubic => out.push('c'),
        }
    }
}

/// Fix the cyclic start point and direction of a contour.
fn canonical_contour(points: Vec<GridPoint>) -> Vec<GridPoint> {
    let forward = smallest_rotation(&points);
    let mut reversed_points = points;
    reversed_points.reverse();
    let backward = smallest_rotation(&reversed_points);
    forward.min(backward)
}

/// Lexicographically smallest rotation, trying every position of the minimum point.
fn smallest_rotation(points: &[GridPoint]) -> Vec<GridPoint> {
    let Some(min) = points.iter().min() else {
        return Vec::new();
    };
    let rotate = |start: usize| -> Vec<GridPoint> {
        points[start..]
            .iter()
            .chain(points[..start].iter())
            .copied()
            .collect()
    };
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| *p == min)
        .map(|(i, _)| rotate(i))
        .min()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::outline::{Contour, OutlinePoint};

    fn outline(contours: &[&[(f32, f32, PointKind)]]) -> GlyphOutline {
        GlyphOutline {
            glyph_id: 0,
            contours: contours
                .iter()
                .map(|c| Contour {
                    points: c
                        .iter()
                        .map(|&(x, y, kind)| OutlinePoint { x, y, kind })
                        .collect(),
                })
                .collect(),
        }
    }

    const ON: PointKind = PointKind::On;
    const Q: PointKind = PointKind::Quad;

    #[test]
    fn test_square_encoding() {
        let sq = outline(&[&[(10.0, 10.0, ON), (10.0, 60.0, ON), (60.0, 60.0, ON), (60.0, 10.0, ON)]]);
        assert_eq!(signature(&sq).as_str(), "0,0 0,1000 1000,1000 1000,0");
    }

    #[test]
    fn test_control_point_suffix() {
        let bump = outline(&[&[(0.0, 0.0, ON), (50.0, 100.0, Q), (100.0, 0.0, ON)]]);
        let sig = signature(&bump);
        assert!(sig.as_str().contains("500,1000q"), "{}", sig);
    }

    #[test]
    fn test_translation_and_scale_invariance() {
        let a = outline(&[&[(0.0, 0.0, ON), (30.0, 80.0, Q), (70.0, 10.0, ON)]]);
        let b = outline(&[&[(-500.0, 200.0, ON), (-410.0, 440.0, Q), (-290.0, 230.0, ON)]]);
        assert_eq!(signature(&a), signature(&b));
    }

    #[test]
    fn test_start_point_and_winding_invariance() {
        let a = outline(&[&[(0.0, 0.0, ON), (0.0, 10.0, ON), (10.0, 10.0, ON), (10.0, 0.0, ON)]]);
        let rotated = outline(&[&[(10.0, 10.0, ON), (10.0, 0.0, ON), (0.0, 0.0, ON), (0.0, 10.0, ON)]]);
        let reversed = outline(&[&[(0.0, 0.0, ON), (10.0, 0.0, ON), (10.0, 10.0, ON), (0.0, 10.0, ON)]]);
        assert_eq!(signature(&a), signature(&rotated));
        assert_eq!(signature(&a), signature(&reversed));
    }

    #[test]
    fn test_contour_order_invariance() {
        let outer: &[(f32, f32, PointKind)] = &[(0.0, 0.0, ON), (0.0, 100.0, ON), (100.0, 100.0, ON), (100.0, 0.0, ON)];
        let inner: &[(f32, f32, PointKind)] = &[(25.0, 25.0, ON), (75.0, 25.0, ON), (50.0, 75.0, ON)];
        assert_eq!(
            signature(&outline(&[outer, inner])),
            signature(&outline(&[inner, outer]))
        );
    }

    #[test]
    fn test_topology_changes_signature() {
        let square = outline(&[&[(0.0, 0.0, ON), (0.0, 10.0, ON), (10.0, 10.0, ON), (10.0, 0.0, ON)]]);
        let triangle = outline(&[&[(0.0, 0.0, ON), (5.0, 10.0, ON), (10.0, 0.0, ON)]]);
        let sig_sq = signature(&square);
        let sig_tri = signature(&triangle);
        assert_ne!(sig_sq, sig_tri);
        assert_eq!(sig_sq.point_counts(), vec![4]);
        assert_eq!(sig_tri.point_counts(), vec![3]);
    }

    #[test]
    fn test_on_and_control_points_differ() {
        let on = outline(&[&[(0.0, 0.0, ON), (50.0, 100.0, ON), (100.0, 0.0, ON)]]);
        let quad = outline(&[&[(0.0, 0.0, ON), (50.0, 100.0, Q), (100.0, 0.0, ON)]]);
        assert_ne!(signature(&on), signature(&quad));
    }

    #[test]
    fn test_empty_outline() {
        let sig = signature(&GlyphOutline::empty(4));
        assert!(sig.is_empty());
        assert_eq!(sig.contour_count(), 0);
    }

    #[test]
    fn test_single_point_does_not_divide_by_zero() {
        let dot = outline(&[&[(7.0, 7.0, ON)]]);
        assert_eq!(signature(&dot).as_str(), "0,0");
    }

    #[test]
    fn test_aspect_ratio_is_kept() {
        let wide = outline(&[&[(0.0, 0.0, ON), (0.0, 10.0, ON), (40.0, 10.0, ON), (40.0, 0.0, ON)]]);
        assert_eq!(signature(&wide).as_str(), "0,0 0,250 1000,250 1000,0");
    }
}
