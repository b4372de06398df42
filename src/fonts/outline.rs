//! Glyph outline data model.
//!
//! A [`GlyphOutline`] is the flat contour set of one glyph as decoded from the
//! font: composite glyphs are already resolved, implied on-curve points of
//! TrueType quadratic contours are explicit, and the closing point that repeats
//! a contour's start has been dropped.

use serde::{Deserialize, Serialize};
use ttf_parser::OutlineBuilder;

/// Role of an outline point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PointKind {
    /// On-curve point
    On,
    /// Off-curve control point of a quadratic segment
    Quad,
    /// Off-curve control point of a cubic segment
    Cubic,
}

/// One outline point in font units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlinePoint {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
    /// On-curve or control point
    pub kind: PointKind,
}

impl OutlinePoint {
    /// Create an on-curve point.
    pub fn on(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            kind: PointKind::On,
        }
    }

    fn same_position(&self, other: &OutlinePoint) -> bool {
        self.x == other.x && self.y == other.y
    }
}

/// A closed contour. The first point is always on-curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    /// Points in drawing order
    pub points: Vec<OutlinePoint>,
}

/// The decoded shape of one glyph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlyphOutline {
    /// Glyph id inside the font that produced the outline
    pub glyph_id: u16,
    /// Contours in drawing order
    pub contours: Vec<Contour>,
}

impl GlyphOutline {
    /// An outline without contours (space, `.notdef` placeholders).
    pub fn empty(glyph_id: u16) -> Self {
        Self {
            glyph_id,
            contours: Vec::new(),
        }
    }

    /// True if the glyph draws nothing.
    pub fn is_empty(&self) -> bool {
        self.contours.iter().all(|c| c.points.is_empty())
    }

    /// Total number of points over all contours.
    pub fn point_count(&self) -> usize {
        self.contours.iter().map(|c| c.points.len()).sum()
    }

    /// Iterate over all points.
    pub fn points(&self) -> impl Iterator<Item = &OutlinePoint> {
        self.contours.iter().flat_map(|c| c.points.iter())
    }

    /// Bounding box of all points as `(x_min, y_min, x_max, y_max)`.
    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let mut points = self.points();
        let first = points.next()?;
        let init = (first.x, first.y, first.x, first.y);
        Some(points.fold(init, |(x0, y0, x1, y1), p| {
            (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y))
        }))
    }
}

/// Collects `ttf-parser` outline callbacks into contours.
#[derive(Debug, Default)]
pub(crate) struct OutlineCollector {
    contours: Vec<Contour>,
    current: Vec<OutlinePoint>,
}

impl OutlineCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn has_points(&self) -> bool {
        !self.current.is_empty() || !self.contours.is_empty()
    }

    fn finish_contour(&mut self) {
        if self.current.len() > 1 {
            let first = self.current[0];
            if let Some(last) = self.current.last() {
                if last.kind == PointKind::On && last.same_position(&first) {
                    self.current.pop();
                }
            }
        }
        if !self.current.is_empty() {
            self.contours.push(Contour {
                points: std::mem::take(&mut self.current),
            });
        }
    }

    pub(crate) fn into_outline(mut self, glyph_id: u16) -> GlyphOutline {
        self.finish_contour();
        GlyphOutline {
            glyph_id,
            contours: self.contours,
        }
    }

    fn push(&mut self, x: f32, y: f32, kind: PointKind) {
        self.current.push(OutlinePoint { x, y, kind });
    }
}

impl OutlineBuilder for OutlineCollector {
    fn move_to(&mut self, x: f32, y: f32) {
        self.finish_contour();
        self.push(x, y, PointKind::On);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.push(x, y, PointKind::On);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.push(x1, y1, PointKind::Quad);
        self.push(x, y, PointKind::On);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.push(x1, y1, PointKind::Cubic);
        self.push(x2, y2, PointKind::Cubic);
        self.push(x, y, PointKind::On);
    }

    fn close(&mut self) {
        self.finish_contour();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_drops_closing_duplicate() {
        let mut c = OutlineCollector::new();
        c.move_to(0.0, 0.0);
        c.line_to(10.0, 0.0);
        c.line_to(10.0, 10.0);
        c.line_to(0.0, 0.0);
        c.close();
        let outline = c.into_outline(3);
        assert_eq!(outline.glyph_id, 3);
        assert_eq!(outline.contours.len(), 1);
        assert_eq!(outline.point_count(), 3);
    }

    #[test]
    fn test_collector_records_control_points() {
        let mut c = OutlineCollector::new();
        c.move_to(0.0, 0.0);
        c.quad_to(5.0, 10.0, 10.0, 0.0);
        c.curve_to(8.0, -4.0, 2.0, -4.0, 0.0, 0.0);
        c.close();
        let outline = c.into_outline(1);
        let kinds: Vec<_> = outline.points().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PointKind::On,
                PointKind::Quad,
                PointKind::On,
                PointKind::Cubic,
                PointKind::Cubic
            ]
        );
    }

    #[test]
    fn test_collector_splits_on_move_without_close() {
        let mut c = OutlineCollector::new();
        c.move_to(0.0, 0.0);
        c.line_to(1.0, 0.0);
        c.move_to(5.0, 5.0);
        c.line_to(6.0, 5.0);
        let outline = c.into_outline(0);
        assert_eq!(outline.contours.len(), 2);
    }

    #[test]
    fn test_bounds_and_empty() {
        assert!(GlyphOutline::empty(0).is_empty());
        assert_eq!(GlyphOutline::empty(0).bounds(), None);

        let outline = GlyphOutline {
            glyph_id: 1,
            contours: vec![Contour {
                points: vec![
                    OutlinePoint::on(-5.0, 2.0),
                    OutlinePoint::on(7.0, 9.0),
                    OutlinePoint::on(1.0, -3.0),
                ],
            }],
        };
        assert_eq!(outline.bounds(), Some((-5.0, -3.0, 7.0, 9.0)));
    }
}
