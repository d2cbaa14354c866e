//! Envelope mapping: tile coordinates, radius queries and boundary polygons
//! all reduce to a geographic query envelope plus the exact clip shape.
//!
//! Tile math follows the standard slippy-map scheme (Web Mercator,
//! EPSG:3857); envelopes are in geographic degrees (`x` = longitude,
//! `y` = latitude).

use std::f64::consts::PI;

use geo::{Coord, LineString, Polygon};

use crate::{Error, Result, MAX_ZOOM};

/// Kilometres covered by one degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// Number of segments used when polygonizing a radius circle.
const CIRCLE_SEGMENTS: usize = 64;

/// Axis-aligned bounding box in geographic coordinates.
///
/// Invariant: `min_x <= max_x` and `min_y <= max_y` for any valid envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// An inverted envelope that becomes valid once expanded.
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Grow to include another envelope.
    pub fn expand(&mut self, other: &Self) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// A copy grown by `margin` units on every side.
    pub fn buffered(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Slippy-map tile coordinates: x, y and zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Geographic envelope of this tile.
    ///
    /// Pure: repeated calls return bit-identical bounds.
    pub fn envelope(&self) -> Envelope {
        let n = 2_f64.powi(self.z as i32);
        let lon_min = (self.x as f64) / n * 360.0 - 180.0;
        let lon_max = (self.x as f64 + 1.0) / n * 360.0 - 180.0;

        let lat_at = |y: f64| {
            let y_rad = PI * (1.0 - 2.0 * y / n);
            y_rad.sinh().atan().to_degrees()
        };

        let lat_max = lat_at(self.y as f64);
        let lat_min = lat_at(self.y as f64 + 1.0);

        Envelope::new(lon_min, lat_min, lon_max, lat_max)
    }
}

/// The exact shape features are cut to, distinct from its bounding envelope.
///
/// Clipping to the bounding envelope alone would leak off-shape features into
/// radius and boundary responses.
#[derive(Debug, Clone)]
pub enum ClipShape {
    /// Rectangular viewport (tile requests).
    Rect(Envelope),
    /// Polygonized radius circle or a stored boundary polygon.
    Polygon(Polygon<f64>),
}

impl ClipShape {
    /// Bounding envelope of the clip shape.
    pub fn envelope(&self) -> Envelope {
        match self {
            ClipShape::Rect(env) => *env,
            ClipShape::Polygon(poly) => {
                let mut env = Envelope::empty();
                for c in poly.exterior().coords() {
                    env.expand(&Envelope::new(c.x, c.y, c.x, c.y));
                }
                env
            }
        }
    }
}

/// Envelope for a slippy tile address.
///
/// # Errors
///
/// `InvalidZoom` when `z` exceeds [`MAX_ZOOM`], `InvalidTileIndex` when `x`
/// or `y` fall outside `[0, 2^z)`.
pub fn tile_envelope(z: u8, x: u32, y: u32) -> Result<Envelope> {
    if z > MAX_ZOOM {
        return Err(Error::InvalidZoom(z));
    }
    let n = 1u32 << z;
    if x >= n || y >= n {
        return Err(Error::InvalidTileIndex { z, x, y });
    }
    Ok(TileCoord::new(x, y, z).envelope())
}

/// Envelope and circular clip shape for a point-plus-radius query.
///
/// The circle is approximated as planar after converting the radius to
/// degrees, with the longitude scale corrected for latitude.
pub fn radius_envelope(lat: f64, lon: f64, radius_km: f64) -> Result<(Envelope, ClipShape)> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(Error::InvalidCoordinate { lat, lon });
    }
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(Error::InvalidRadius(radius_km));
    }

    let r_lat = radius_km / KM_PER_DEGREE;
    // cos(lat) shrinks toward the poles; clamp so the envelope stays bounded.
    let r_lon = r_lat / lat.to_radians().cos().max(0.01);

    let envelope = Envelope::new(lon - r_lon, lat - r_lat, lon + r_lon, lat + r_lat);

    let ring: Vec<Coord<f64>> = (0..=CIRCLE_SEGMENTS)
        .map(|i| {
            let theta = 2.0 * PI * (i % CIRCLE_SEGMENTS) as f64 / CIRCLE_SEGMENTS as f64;
            Coord {
                x: lon + r_lon * theta.cos(),
                y: lat + r_lat * theta.sin(),
            }
        })
        .collect();
    let circle = Polygon::new(LineString::new(ring), vec![]);

    Ok((envelope, ClipShape::Polygon(circle)))
}

/// Envelope and clip shape for a stored boundary polygon.
///
/// Polygon lookup belongs to the boundary store; this only derives the
/// spatial query window from the geometry it returned.
pub fn boundary_envelope(boundary: &Polygon<f64>) -> (Envelope, ClipShape) {
    let shape = ClipShape::Polygon(boundary.clone());
    (shape.envelope(), shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_zero_covers_the_world() {
        let env = tile_envelope(0, 0, 0).unwrap();
        assert!((env.min_x - (-180.0)).abs() < 1e-9);
        assert!((env.max_x - 180.0).abs() < 1e-9);
        // Web Mercator latitude limits (~85.05 degrees)
        assert!(env.min_y < -85.0);
        assert!(env.max_y > 85.0);
    }

    #[test]
    fn tile_envelope_is_pure() {
        let a = tile_envelope(7, 66, 43).unwrap();
        let b = tile_envelope(7, 66, 43).unwrap();
        assert_eq!(a.min_x.to_bits(), b.min_x.to_bits());
        assert_eq!(a.min_y.to_bits(), b.min_y.to_bits());
        assert_eq!(a.max_x.to_bits(), b.max_x.to_bits());
        assert_eq!(a.max_y.to_bits(), b.max_y.to_bits());
    }

    #[test]
    fn adjacent_tiles_share_an_edge() {
        let left = tile_envelope(5, 10, 12).unwrap();
        let right = tile_envelope(5, 11, 12).unwrap();
        assert_eq!(left.max_x, right.min_x);
    }

    #[test]
    fn zoom_out_of_range_is_rejected() {
        assert!(matches!(tile_envelope(19, 0, 0), Err(Error::InvalidZoom(19))));
    }

    #[test]
    fn tile_index_out_of_range_is_rejected() {
        assert!(matches!(
            tile_envelope(3, 8, 0),
            Err(Error::InvalidTileIndex { z: 3, x: 8, y: 0 })
        ));
        assert!(tile_envelope(3, 7, 7).is_ok());
    }

    #[test]
    fn radius_envelope_contains_the_circle() {
        let (env, shape) = radius_envelope(52.52, 13.405, 5.0).unwrap();
        assert!(env.is_valid());
        assert!(env.contains_point(13.405, 52.52));

        let ClipShape::Polygon(circle) = shape else {
            panic!("radius clip shape must be a polygon");
        };
        for c in circle.exterior().coords() {
            assert!(env.contains_point(c.x, c.y), "circle vertex outside envelope");
        }
        // Ring is closed.
        assert_eq!(circle.exterior().0.first(), circle.exterior().0.last());
    }

    #[test]
    fn radius_widens_with_latitude() {
        let (equator, _) = radius_envelope(0.0, 0.0, 10.0).unwrap();
        let (arctic, _) = radius_envelope(60.0, 0.0, 10.0).unwrap();
        assert!(arctic.width() > equator.width());
        assert!((arctic.height() - equator.height()).abs() < 1e-9);
    }

    #[test]
    fn invalid_radius_inputs_are_rejected() {
        assert!(matches!(
            radius_envelope(91.0, 0.0, 1.0),
            Err(Error::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            radius_envelope(0.0, 181.0, 1.0),
            Err(Error::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            radius_envelope(0.0, 0.0, 0.0),
            Err(Error::InvalidRadius(_))
        ));
        assert!(matches!(
            radius_envelope(0.0, 0.0, -2.5),
            Err(Error::InvalidRadius(_))
        ));
    }

    #[test]
    fn boundary_envelope_is_the_polygon_bbox() {
        let poly = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 3.0), (0.0, 3.0), (0.0, 0.0)]),
            vec![],
        );
        let (env, _) = boundary_envelope(&poly);
        assert_eq!(env, Envelope::new(0.0, 0.0, 4.0, 3.0));
    }

    #[test]
    fn envelope_expand_and_buffer() {
        let mut env = Envelope::empty();
        assert!(!env.is_valid());
        env.expand(&Envelope::new(-10.0, -5.0, 10.0, 5.0));
        assert!(env.is_valid());

        let buffered = env.buffered(1.0);
        assert_eq!(buffered.min_x, -11.0);
        assert_eq!(buffered.max_y, 6.0);
    }
}
