//! Geometry processing: simplify, clip and quantize one feature into the
//! tile's integer grid.
//!
//! All work happens in tile-local pixel coordinates (0..extent, Y down), not
//! geographic degrees. Degree-based tolerances over-simplify at high
//! latitudes because a degree of longitude shrinks toward the poles;
//! simplifying after the transform makes identical shapes behave identically
//! at any latitude.
//!
//! Order is load-bearing: simplify first (on the full shape), then clip
//! (so simplification cannot pull clipped edges back out of bounds), then
//! quantize (rounding happens exactly once).

use geo::{
    BooleanOps, BoundingRect, Contains, Coord, Geometry, LineString, MultiLineString,
    MultiPolygon, Point, Polygon, Simplify,
};

use crate::envelope::{ClipShape, Envelope};

/// The affine mapping from geographic space into one tile's pixel grid.
#[derive(Debug, Clone, Copy)]
pub struct TileFrame {
    pub envelope: Envelope,
    pub extent: u32,
}

impl TileFrame {
    pub fn new(envelope: Envelope, extent: u32) -> Self {
        Self { envelope, extent }
    }

    /// Geographic coordinate to tile-local pixels, Y increasing downward.
    pub fn to_px(&self, lon: f64, lat: f64) -> (f64, f64) {
        let extent = self.extent as f64;
        let x_ratio = (lon - self.envelope.min_x) / self.envelope.width();
        let y_ratio = (lat - self.envelope.min_y) / self.envelope.height();
        (x_ratio * extent, (1.0 - y_ratio) * extent)
    }
}

/// The clip region in tile-pixel space.
///
/// Rect regions carry the seam buffer; polygon regions (radius circles,
/// boundary polygons) are exact shapes whose output is never stitched next
/// to an adjacent tile, so no buffer applies.
#[derive(Debug, Clone)]
pub enum TileClip {
    Rect {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },
    Polygon(Polygon<f64>),
}

impl TileClip {
    /// Project a clip shape into `frame`'s pixel space.
    pub fn new(shape: &ClipShape, frame: &TileFrame, buffer_px: f64) -> Self {
        match shape {
            ClipShape::Rect(env) => {
                let (min_x, max_y) = frame.to_px(env.min_x, env.min_y);
                let (max_x, min_y) = frame.to_px(env.max_x, env.max_y);
                TileClip::Rect {
                    min_x: min_x - buffer_px,
                    min_y: min_y - buffer_px,
                    max_x: max_x + buffer_px,
                    max_y: max_y + buffer_px,
                }
            }
            ClipShape::Polygon(poly) => TileClip::Polygon(polygon_to_px(poly, frame)),
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            TileClip::Rect {
                min_x,
                min_y,
                max_x,
                max_y,
            } => x >= *min_x && x <= *max_x && y >= *min_y && y <= *max_y,
            TileClip::Polygon(poly) => poly.contains(&Point::new(x, y)),
        }
    }

    /// The region as a polygon, for boolean clipping.
    fn as_polygon(&self) -> Polygon<f64> {
        match self {
            TileClip::Rect {
                min_x,
                min_y,
                max_x,
                max_y,
            } => geo::Rect::new(
                Coord {
                    x: *min_x,
                    y: *min_y,
                },
                Coord {
                    x: *max_x,
                    y: *max_y,
                },
            )
            .to_polygon(),
            TileClip::Polygon(poly) => poly.clone(),
        }
    }
}

/// A quantized tile-space geometry, ready for the encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum TileGeometry {
    /// One or more points.
    Points(Vec<(i32, i32)>),
    /// One or more linestrings, each with at least two vertices.
    Lines(Vec<Vec<(i32, i32)>>),
    /// One or more polygons with oriented, closed rings: exterior rings have
    /// positive shoelace area in Y-down coordinates (screen clockwise),
    /// interiors negative.
    Polygons(Vec<TilePolygon>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TilePolygon {
    pub exterior: Vec<(i32, i32)>,
    pub interiors: Vec<Vec<(i32, i32)>>,
}

/// Simplify, clip and quantize one feature geometry.
///
/// `None` means the feature has nothing to contribute to this tile: empty
/// intersection with the clip region, or a shape that collapsed below the
/// minimum vertex count. Both are the expected per-feature outcome, not an
/// error; the caller logs and moves on.
pub fn process(
    geometry: &Geometry<f64>,
    clip: &TileClip,
    frame: &TileFrame,
    tolerance_px: f64,
) -> Option<TileGeometry> {
    match geometry {
        Geometry::Point(p) => {
            let (x, y) = frame.to_px(p.x(), p.y());
            process_points(&[(x, y)], clip)
        }
        Geometry::MultiPoint(mp) => {
            let px: Vec<(f64, f64)> = mp.0.iter().map(|p| frame.to_px(p.x(), p.y())).collect();
            process_points(&px, clip)
        }
        Geometry::LineString(ls) => {
            process_lines(&MultiLineString::new(vec![line_to_px(ls, frame)]), clip, tolerance_px)
        }
        Geometry::MultiLineString(mls) => {
            let lines = MultiLineString::new(mls.0.iter().map(|ls| line_to_px(ls, frame)).collect());
            process_lines(&lines, clip, tolerance_px)
        }
        Geometry::Polygon(poly) => process_polygons(
            &MultiPolygon::new(vec![polygon_to_px(poly, frame)]),
            clip,
            tolerance_px,
        ),
        Geometry::MultiPolygon(mp) => {
            let polys = MultiPolygon::new(mp.0.iter().map(|p| polygon_to_px(p, frame)).collect());
            process_polygons(&polys, clip, tolerance_px)
        }
        other => {
            log::warn!("unsupported geometry type {:?}, dropping feature", kind_name(other));
            None
        }
    }
}

fn kind_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Line(_) => "Line",
        Geometry::Triangle(_) => "Triangle",
        _ => "Geometry",
    }
}

fn line_to_px(ls: &LineString<f64>, frame: &TileFrame) -> LineString<f64> {
    LineString::new(
        ls.coords()
            .map(|c| {
                let (x, y) = frame.to_px(c.x, c.y);
                Coord { x, y }
            })
            .collect(),
    )
}

fn polygon_to_px(poly: &Polygon<f64>, frame: &TileFrame) -> Polygon<f64> {
    Polygon::new(
        line_to_px(poly.exterior(), frame),
        poly.interiors()
            .iter()
            .map(|ring| line_to_px(ring, frame))
            .collect(),
    )
}

fn process_points(points: &[(f64, f64)], clip: &TileClip) -> Option<TileGeometry> {
    let kept: Vec<(i32, i32)> = points
        .iter()
        .filter(|(x, y)| clip.contains(*x, *y))
        .map(|(x, y)| (x.round() as i32, y.round() as i32))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(TileGeometry::Points(kept))
    }
}

fn process_lines(
    lines: &MultiLineString<f64>,
    clip: &TileClip,
    tolerance_px: f64,
) -> Option<TileGeometry> {
    let simplified = MultiLineString::new(
        lines
            .0
            .iter()
            .map(|ls| {
                if tolerance_px > 0.0 && ls.0.len() >= 2 {
                    ls.simplify(&tolerance_px)
                } else {
                    ls.clone()
                }
            })
            .collect(),
    );

    // Cheap rejection before the boolean op.
    let rect = simplified.bounding_rect()?;
    let clip_poly = clip.as_polygon();
    let clip_rect = clip_poly.bounding_rect()?;
    if rect.min().x > clip_rect.max().x
        || rect.max().x < clip_rect.min().x
        || rect.min().y > clip_rect.max().y
        || rect.max().y < clip_rect.min().y
    {
        return None;
    }

    let clipped = clip_poly.clip(&simplified, false);

    let quantized: Vec<Vec<(i32, i32)>> = clipped
        .0
        .iter()
        .filter_map(|ls| {
            let line = quantize_line(ls);
            if line.len() >= 2 {
                Some(line)
            } else {
                None
            }
        })
        .collect();

    if quantized.is_empty() {
        None
    } else {
        Some(TileGeometry::Lines(quantized))
    }
}

fn process_polygons(
    polygons: &MultiPolygon<f64>,
    clip: &TileClip,
    tolerance_px: f64,
) -> Option<TileGeometry> {
    let mut out = Vec::new();

    for poly in &polygons.0 {
        let simplified = if tolerance_px > 0.0 {
            poly.simplify(&tolerance_px)
        } else {
            poly.clone()
        };
        if simplified.exterior().0.len() < 4 {
            // Collapsed below a valid ring; drop, not an error.
            continue;
        }

        for clipped in clip_polygon(&simplified, clip) {
            if let Some(tile_poly) = quantize_polygon(&clipped) {
                out.push(tile_poly);
            }
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(TileGeometry::Polygons(out))
    }
}

/// Clip one polygon to the region.
///
/// Rect regions use Sutherland-Hodgman, O(n) against an axis-aligned box.
/// Polygon regions need a full boolean intersection, which may split the
/// input into several parts.
fn clip_polygon(poly: &Polygon<f64>, clip: &TileClip) -> Vec<Polygon<f64>> {
    let Some(rect) = poly.bounding_rect() else {
        return Vec::new();
    };

    match clip {
        TileClip::Rect {
            min_x,
            min_y,
            max_x,
            max_y,
        } => {
            if rect.min().x > *max_x
                || rect.max().x < *min_x
                || rect.min().y > *max_y
                || rect.max().y < *min_y
            {
                return Vec::new();
            }
            // Fully inside: nothing to cut.
            if rect.min().x >= *min_x
                && rect.max().x <= *max_x
                && rect.min().y >= *min_y
                && rect.max().y <= *max_y
            {
                return vec![poly.clone()];
            }

            let exterior = sutherland_hodgman(poly.exterior(), *min_x, *min_y, *max_x, *max_y);
            if exterior.0.len() < 4 {
                return Vec::new();
            }
            let interiors: Vec<LineString<f64>> = poly
                .interiors()
                .iter()
                .map(|ring| sutherland_hodgman(ring, *min_x, *min_y, *max_x, *max_y))
                .filter(|ring| ring.0.len() >= 4)
                .collect();
            vec![Polygon::new(exterior, interiors)]
        }
        TileClip::Polygon(clip_poly) => {
            let Some(clip_rect) = clip_poly.bounding_rect() else {
                return Vec::new();
            };
            if rect.min().x > clip_rect.max().x
                || rect.max().x < clip_rect.min().x
                || rect.min().y > clip_rect.max().y
                || rect.max().y < clip_rect.min().y
            {
                return Vec::new();
            }
            poly.intersection(clip_poly).0
        }
    }
}

/// Sutherland-Hodgman ring clipping against an axis-aligned rectangle.
fn sutherland_hodgman(
    ring: &LineString<f64>,
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
) -> LineString<f64> {
    let mut output: Vec<Coord<f64>> = ring.0.clone();

    output = clip_against_edge(
        &output,
        |c| c.x >= min_x,
        |c1, c2| {
            let t = (min_x - c1.x) / (c2.x - c1.x);
            Coord {
                x: min_x,
                y: c1.y + t * (c2.y - c1.y),
            }
        },
    );
    output = clip_against_edge(
        &output,
        |c| c.x <= max_x,
        |c1, c2| {
            let t = (max_x - c1.x) / (c2.x - c1.x);
            Coord {
                x: max_x,
                y: c1.y + t * (c2.y - c1.y),
            }
        },
    );
    output = clip_against_edge(
        &output,
        |c| c.y >= min_y,
        |c1, c2| {
            let t = (min_y - c1.y) / (c2.y - c1.y);
            Coord {
                x: c1.x + t * (c2.x - c1.x),
                y: min_y,
            }
        },
    );
    output = clip_against_edge(
        &output,
        |c| c.y <= max_y,
        |c1, c2| {
            let t = (max_y - c1.y) / (c2.y - c1.y);
            Coord {
                x: c1.x + t * (c2.x - c1.x),
                y: max_y,
            }
        },
    );

    if !output.is_empty() && output.first() != output.last() {
        output.push(output[0]);
    }

    LineString::new(output)
}

fn clip_against_edge<F, I>(vertices: &[Coord<f64>], inside: F, intersect: I) -> Vec<Coord<f64>>
where
    F: Fn(&Coord<f64>) -> bool,
    I: Fn(&Coord<f64>, &Coord<f64>) -> Coord<f64>,
{
    if vertices.is_empty() {
        return Vec::new();
    }

    let mut output = Vec::with_capacity(vertices.len());

    for i in 0..vertices.len() {
        let current = &vertices[i];
        let next = &vertices[(i + 1) % vertices.len()];

        let current_inside = inside(current);
        let next_inside = inside(next);

        if current_inside {
            output.push(*current);
            if !next_inside {
                output.push(intersect(current, next));
            }
        } else if next_inside {
            output.push(intersect(current, next));
        }
    }

    output
}

/// Round a line to integer pixels, collapsing consecutive duplicates.
fn quantize_line(ls: &LineString<f64>) -> Vec<(i32, i32)> {
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(ls.0.len());
    for c in &ls.0 {
        let p = (c.x.round() as i32, c.y.round() as i32);
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    out
}

/// Round a ring to integer pixels, keeping it closed. Returns `None` when
/// rounding collapses it below three distinct vertices.
fn quantize_ring(ls: &LineString<f64>) -> Option<Vec<(i32, i32)>> {
    let mut out = quantize_line(ls);
    if out.first() != out.last() {
        if let Some(&first) = out.first() {
            out.push(first);
        }
    }
    // Closed ring: 3 distinct vertices + closing point.
    if out.len() < 4 {
        return None;
    }
    Some(out)
}

fn quantize_polygon(poly: &Polygon<f64>) -> Option<TilePolygon> {
    let mut exterior = quantize_ring(poly.exterior())?;
    if ring_area2(&exterior) == 0 {
        return None;
    }
    orient_ring(&mut exterior, false);

    let mut interiors = Vec::new();
    for ring in poly.interiors() {
        if let Some(mut q) = quantize_ring(ring) {
            if ring_area2(&q) != 0 {
                orient_ring(&mut q, true);
                interiors.push(q);
            }
        }
    }

    Some(TilePolygon {
        exterior,
        interiors,
    })
}

/// Twice the signed shoelace area of a closed ring in tile coordinates.
///
/// Positive means screen-clockwise in the Y-down convention, the MVT
/// exterior winding.
pub fn ring_area2(ring: &[(i32, i32)]) -> i64 {
    let mut sum = 0i64;
    for pair in ring.windows(2) {
        let (x1, y1) = pair[0];
        let (x2, y2) = pair[1];
        sum += x1 as i64 * y2 as i64 - x2 as i64 * y1 as i64;
    }
    sum
}

/// Enforce winding after quantization: rounding can flip near-degenerate
/// rings, so orienting any earlier would not stick.
fn orient_ring(ring: &mut [(i32, i32)], interior: bool) {
    let area = ring_area2(ring);
    let wrong = if interior { area > 0 } else { area < 0 };
    if wrong {
        ring.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon};

    fn frame() -> TileFrame {
        TileFrame::new(Envelope::new(0.0, 0.0, 1.0, 1.0), 4096)
    }

    fn rect_clip(buffer: f64) -> TileClip {
        TileClip::new(&ClipShape::Rect(Envelope::new(0.0, 0.0, 1.0, 1.0)), &frame(), buffer)
    }

    #[test]
    fn frame_maps_corners_with_y_flip() {
        let f = frame();
        assert_eq!(f.to_px(0.0, 0.0), (0.0, 4096.0));
        assert_eq!(f.to_px(1.0, 1.0), (4096.0, 0.0));
        assert_eq!(f.to_px(0.5, 0.5), (2048.0, 2048.0));
    }

    #[test]
    fn inside_point_survives_outside_point_drops() {
        let f = frame();
        let clip = rect_clip(64.0);

        let inside = process(&Geometry::Point(point!(x: 0.5, y: 0.5)), &clip, &f, 0.0);
        assert_eq!(inside, Some(TileGeometry::Points(vec![(2048, 2048)])));

        let outside = process(&Geometry::Point(point!(x: 3.0, y: 3.0)), &clip, &f, 0.0);
        assert_eq!(outside, None);
    }

    #[test]
    fn line_is_clipped_to_buffered_bounds() {
        let f = frame();
        let clip = rect_clip(64.0);
        // Crosses the whole tile and far beyond on both sides.
        let line = line_string![(x: -1.0, y: 0.5), (x: 2.0, y: 0.5)];

        let got = process(&Geometry::LineString(line), &clip, &f, 0.0).unwrap();
        let TileGeometry::Lines(lines) = got else {
            panic!("expected lines");
        };
        for line in &lines {
            for (x, _) in line {
                assert!(*x >= -64 && *x <= 4096 + 64, "x={x} outside buffered range");
            }
        }
    }

    #[test]
    fn straddling_polygon_stays_within_buffered_grid() {
        let f = frame();
        let buffer = 64.0;
        let clip = rect_clip(buffer);
        // Sticks out past the right tile edge.
        let poly = polygon![
            (x: 0.5, y: 0.2),
            (x: 1.5, y: 0.2),
            (x: 1.5, y: 0.8),
            (x: 0.5, y: 0.8),
            (x: 0.5, y: 0.2),
        ];

        let got = process(&Geometry::Polygon(poly), &clip, &f, 0.0).unwrap();
        let TileGeometry::Polygons(polys) = got else {
            panic!("expected polygons");
        };
        for p in &polys {
            for (x, y) in p.exterior.iter().chain(p.interiors.iter().flatten()) {
                assert!((-64..=4096 + 64).contains(x), "x={x}");
                assert!((-64..=4096 + 64).contains(y), "y={y}");
            }
        }
    }

    #[test]
    fn disjoint_polygon_is_dropped() {
        let f = frame();
        let clip = rect_clip(64.0);
        let poly = polygon![
            (x: 5.0, y: 5.0),
            (x: 6.0, y: 5.0),
            (x: 6.0, y: 6.0),
            (x: 5.0, y: 5.0),
        ];
        assert_eq!(process(&Geometry::Polygon(poly), &clip, &f, 0.0), None);
    }

    #[test]
    fn simplification_removes_collinear_noise() {
        let f = frame();
        let clip = rect_clip(64.0);
        // A near-straight line with sub-pixel wobble.
        let coords: Vec<(f64, f64)> = (0..50)
            .map(|i| {
                let t = i as f64 / 49.0;
                (0.1 + 0.8 * t, 0.5 + 0.00001 * (i % 2) as f64)
            })
            .collect();
        let line = LineString::from(coords);

        let got = process(&Geometry::LineString(line), &clip, &f, 2.0).unwrap();
        let TileGeometry::Lines(lines) = got else {
            panic!("expected lines");
        };
        assert_eq!(lines.len(), 1);
        assert!(lines[0].len() <= 3, "wobble should simplify away, got {} pts", lines[0].len());
    }

    #[test]
    fn zero_tolerance_keeps_vertices() {
        let f = frame();
        let clip = rect_clip(64.0);
        let line = line_string![
            (x: 0.1, y: 0.1),
            (x: 0.3, y: 0.5),
            (x: 0.5, y: 0.1),
            (x: 0.7, y: 0.5),
        ];
        let got = process(&Geometry::LineString(line), &clip, &f, 0.0).unwrap();
        let TileGeometry::Lines(lines) = got else {
            panic!("expected lines");
        };
        assert_eq!(lines[0].len(), 4);
    }

    #[test]
    fn degenerate_polygon_is_dropped_not_error() {
        let f = frame();
        let clip = rect_clip(64.0);
        // Under a tenth of a pixel across: collapses in quantization.
        let tiny = polygon![
            (x: 0.50000, y: 0.50000),
            (x: 0.50001, y: 0.50000),
            (x: 0.50001, y: 0.50001),
            (x: 0.50000, y: 0.50000),
        ];
        assert_eq!(process(&Geometry::Polygon(tiny), &clip, &f, 0.0), None);
    }

    #[test]
    fn exterior_ring_winds_clockwise_in_screen_space() {
        let f = frame();
        let clip = rect_clip(64.0);
        // Geographic CCW square.
        let poly = polygon![
            (x: 0.2, y: 0.2),
            (x: 0.8, y: 0.2),
            (x: 0.8, y: 0.8),
            (x: 0.2, y: 0.8),
            (x: 0.2, y: 0.2),
        ];
        let got = process(&Geometry::Polygon(poly), &clip, &f, 0.0).unwrap();
        let TileGeometry::Polygons(polys) = got else {
            panic!("expected polygons");
        };
        assert!(ring_area2(&polys[0].exterior) > 0, "exterior must be screen-CW");
    }

    #[test]
    fn hole_winds_opposite_to_exterior() {
        let f = frame();
        let clip = rect_clip(64.0);
        let poly = polygon![
            exterior: [
                (x: 0.1, y: 0.1),
                (x: 0.9, y: 0.1),
                (x: 0.9, y: 0.9),
                (x: 0.1, y: 0.9),
                (x: 0.1, y: 0.1),
            ],
            interiors: [
                [
                    (x: 0.4, y: 0.4),
                    (x: 0.6, y: 0.4),
                    (x: 0.6, y: 0.6),
                    (x: 0.4, y: 0.6),
                    (x: 0.4, y: 0.4),
                ],
            ],
        ];
        let got = process(&Geometry::Polygon(poly), &clip, &f, 0.0).unwrap();
        let TileGeometry::Polygons(polys) = got else {
            panic!("expected polygons");
        };
        assert!(ring_area2(&polys[0].exterior) > 0);
        assert_eq!(polys[0].interiors.len(), 1);
        assert!(ring_area2(&polys[0].interiors[0]) < 0, "hole must be screen-CCW");
    }

    #[test]
    fn circular_clip_cuts_off_shape_features() {
        // Point inside the envelope but outside the circle must drop: radius
        // responses clip to the circle, not its bounding box.
        let f = frame();
        let center = (0.5, 0.5);
        let ring: Vec<(f64, f64)> = (0..=32)
            .map(|i| {
                let theta = 2.0 * std::f64::consts::PI * (i % 32) as f64 / 32.0;
                (center.0 + 0.3 * theta.cos(), center.1 + 0.3 * theta.sin())
            })
            .collect();
        let circle = Polygon::new(LineString::from(ring), vec![]);
        let clip = TileClip::new(&ClipShape::Polygon(circle), &f, 64.0);

        let corner = process(&Geometry::Point(point!(x: 0.05, y: 0.05)), &clip, &f, 0.0);
        assert_eq!(corner, None);

        let middle = process(&Geometry::Point(point!(x: 0.5, y: 0.5)), &clip, &f, 0.0);
        assert!(middle.is_some());
    }
}
