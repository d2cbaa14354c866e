//! Level-of-detail policy: a fixed step function of zoom, per feature kind.
//!
//! "Adaptive" means documented zoom bands, not a learned system: finer
//! geometry and higher feature counts only appear as zoom increases, and
//! coarser admin categories give way to finer subdivisions. The table is
//! built once at startup, immutable, and injected into the engine.

use geo::{Centroid, Geometry};

use crate::provider::{AttributeFilter, Feature};
use crate::{Error, Result, MAX_ZOOM};

/// The independent feature collections the engine serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    AdminBoundary,
    Poi,
    TransportStation,
    TransportLine,
    WaterBody,
}

impl FeatureKind {
    /// Discriminator used in cache keys and request paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::AdminBoundary => "admin_boundary",
            FeatureKind::Poi => "poi",
            FeatureKind::TransportStation => "transport_station",
            FeatureKind::TransportLine => "transport_line",
            FeatureKind::WaterBody => "water_body",
        }
    }

    /// MVT layer name this kind is encoded under.
    pub fn layer_name(&self) -> &'static str {
        match self {
            FeatureKind::AdminBoundary => "boundaries",
            FeatureKind::Poi => "poi",
            FeatureKind::TransportStation => "stations",
            FeatureKind::TransportLine => "lines",
            FeatureKind::WaterBody => "water",
        }
    }
}

/// POI category with an explicit total priority order.
///
/// The order decides which features survive truncation, so it is part of the
/// cache-visible contract: healthcare < education < shopping < leisure <
/// food < other (lower rank = kept first).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Healthcare,
    Education,
    Shopping,
    Leisure,
    Food,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Healthcare,
        Category::Education,
        Category::Shopping,
        Category::Leisure,
        Category::Food,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Healthcare => "healthcare",
            Category::Education => "education",
            Category::Shopping => "shopping",
            Category::Leisure => "leisure",
            Category::Food => "food",
            Category::Other => "other",
        }
    }

    /// Truncation priority; lower wins.
    pub fn priority(&self) -> u8 {
        *self as u8
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "healthcare" => Ok(Category::Healthcare),
            "education" => Ok(Category::Education),
            "shopping" => Ok(Category::Shopping),
            "leisure" => Ok(Category::Leisure),
            "food" => Ok(Category::Food),
            "other" => Ok(Category::Other),
            _ => Err(Error::UnknownCategory(s.to_string())),
        }
    }
}

/// Policy decided for one (kind, zoom) lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPolicy {
    /// Attribute constraints the provider query must carry.
    pub attribute_filter: AttributeFilter,
    /// Hard cap on encoded features; candidates beyond it are truncated in
    /// priority order.
    pub max_features: usize,
    /// Douglas-Peucker tolerance in tile pixels; 0 disables simplification.
    pub tolerance_px: f64,
}

/// One zoom band of a kind's policy.
///
/// `policy: None` means the kind is not visible in this band; resolving it
/// yields an empty tile, not an error.
#[derive(Debug, Clone)]
pub struct LodBand {
    pub zoom_floor: u8,
    pub zoom_ceil: u8,
    pub policy: Option<ResolvedPolicy>,
}

impl LodBand {
    pub fn visible(zoom_floor: u8, zoom_ceil: u8, policy: ResolvedPolicy) -> Self {
        Self {
            zoom_floor,
            zoom_ceil,
            policy: Some(policy),
        }
    }

    pub fn hidden(zoom_floor: u8, zoom_ceil: u8) -> Self {
        Self {
            zoom_floor,
            zoom_ceil,
            policy: None,
        }
    }
}

/// Immutable per-kind zoom band tables.
///
/// Invariant: each kind's bands partition `[0, MAX_ZOOM]` without gaps or
/// overlap, checked by [`LodTable::validate`] at construction.
#[derive(Debug, Clone)]
pub struct LodTable {
    bands: Vec<(FeatureKind, Vec<LodBand>)>,
}

impl LodTable {
    /// Build a table from per-kind band lists.
    ///
    /// # Panics
    ///
    /// Panics if any kind's bands do not partition `[0, MAX_ZOOM]`; the
    /// table is process configuration and a malformed one is a programming
    /// error, not a request error.
    pub fn new(bands: Vec<(FeatureKind, Vec<LodBand>)>) -> Self {
        let table = Self { bands };
        table.validate();
        table
    }

    fn validate(&self) {
        for (kind, bands) in &self.bands {
            let mut next = 0u16;
            for band in bands {
                assert_eq!(
                    band.zoom_floor as u16,
                    next,
                    "{}: band starts at {} but previous ended at {}",
                    kind.as_str(),
                    band.zoom_floor,
                    next
                );
                assert!(
                    band.zoom_ceil >= band.zoom_floor,
                    "{}: inverted band {}..{}",
                    kind.as_str(),
                    band.zoom_floor,
                    band.zoom_ceil
                );
                next = band.zoom_ceil as u16 + 1;
            }
            assert_eq!(
                next,
                MAX_ZOOM as u16 + 1,
                "{}: bands end at {} instead of {MAX_ZOOM}",
                kind.as_str(),
                next.saturating_sub(1)
            );
        }
    }

    /// Deterministic table lookup.
    ///
    /// `None` means the kind is not visible at this zoom: the caller renders
    /// a reproducible empty layer.
    pub fn resolve(&self, kind: FeatureKind, zoom: u8) -> Option<ResolvedPolicy> {
        let zoom = zoom.min(MAX_ZOOM);
        self.bands
            .iter()
            .find(|(k, _)| *k == kind)?
            .1
            .iter()
            .find(|band| zoom >= band.zoom_floor && zoom <= band.zoom_ceil)
            .and_then(|band| band.policy.clone())
    }
}

impl Default for LodTable {
    /// Reference policy.
    ///
    /// Admin boundaries: countries at z<=4, regions to z7, provinces to z10,
    /// cities to z13, districts beyond. POIs and stations appear from z12,
    /// transport lines from z9, water from z6.
    fn default() -> Self {
        let admin = |level: &str, max: usize, tol: f64| ResolvedPolicy {
            attribute_filter: AttributeFilter::new().with_exact("admin_level", level),
            max_features: max,
            tolerance_px: tol,
        };
        let open = |max: usize, tol: f64| ResolvedPolicy {
            attribute_filter: AttributeFilter::new(),
            max_features: max,
            tolerance_px: tol,
        };

        Self::new(vec![
            (
                FeatureKind::AdminBoundary,
                vec![
                    LodBand::visible(0, 4, admin("2", 300, 4.0)),
                    LodBand::visible(5, 7, admin("4", 400, 3.0)),
                    LodBand::visible(8, 10, admin("6", 600, 2.0)),
                    LodBand::visible(11, 13, admin("8", 800, 1.0)),
                    LodBand::visible(14, MAX_ZOOM, admin("10", 1200, 0.5)),
                ],
            ),
            (
                FeatureKind::Poi,
                vec![
                    LodBand::hidden(0, 11),
                    LodBand::visible(12, 13, open(150, 0.0)),
                    LodBand::visible(14, 15, open(400, 0.0)),
                    LodBand::visible(16, MAX_ZOOM, open(1000, 0.0)),
                ],
            ),
            (
                FeatureKind::TransportStation,
                vec![
                    LodBand::hidden(0, 9),
                    LodBand::visible(10, 12, open(100, 0.0)),
                    LodBand::visible(13, MAX_ZOOM, open(500, 0.0)),
                ],
            ),
            (
                FeatureKind::TransportLine,
                vec![
                    LodBand::hidden(0, 8),
                    LodBand::visible(9, 11, open(80, 2.0)),
                    LodBand::visible(12, 14, open(200, 1.0)),
                    LodBand::visible(15, MAX_ZOOM, open(500, 0.5)),
                ],
            ),
            (
                FeatureKind::WaterBody,
                vec![
                    LodBand::hidden(0, 5),
                    LodBand::visible(6, 9, open(200, 3.0)),
                    LodBand::visible(10, 13, open(500, 1.5)),
                    LodBand::visible(14, MAX_ZOOM, open(1000, 0.5)),
                ],
            ),
        ])
    }
}

/// The canonical priority order over candidate features.
///
/// Total order: category priority rank, then name (alphabetical), then
/// distance to the query center when one applies, then feature id. The id
/// tiebreaker makes two runs over identical input produce identical retained
/// subsets in identical order, which the cache contract requires.
///
/// Providers that honor a query limit must truncate in this order too, so
/// the engine's ranking pool never loses a high-priority feature to an
/// arbitrary upstream cutoff.
pub fn priority_cmp(a: &Feature, b: &Feature, center: Option<(f64, f64)>) -> std::cmp::Ordering {
    category_rank(a)
        .cmp(&category_rank(b))
        .then_with(|| name_of(a).cmp(name_of(b)))
        .then_with(|| match center {
            Some(c) => distance_sq(a, c).total_cmp(&distance_sq(b, c)),
            None => std::cmp::Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Order candidates by [`priority_cmp`] and truncate to the policy's cap.
pub fn rank_and_truncate(
    mut features: Vec<Feature>,
    max_features: usize,
    center: Option<(f64, f64)>,
) -> Vec<Feature> {
    features.sort_by(|a, b| priority_cmp(a, b, center));
    features.truncate(max_features);
    features
}

fn category_rank(feature: &Feature) -> u8 {
    feature
        .property_text("category")
        .and_then(|s| Category::parse(&s).ok())
        .map(|c| c.priority())
        .unwrap_or(Category::Other.priority())
}

fn name_of(feature: &Feature) -> &str {
    feature.property_str("name").unwrap_or("")
}

fn distance_sq(feature: &Feature, center: (f64, f64)) -> f64 {
    let point = match &feature.geometry {
        Geometry::Point(p) => Some(*p),
        g => g.centroid(),
    };
    match point {
        Some(p) => {
            let dx = p.x() - center.0;
            let dy = p.y() - center.1;
            dx * dx + dy * dy
        }
        None => f64::INFINITY,
    }
}
