//! External collaborator seams: the spatial feature provider and the
//! boundary store, plus the in-memory implementations used by tests and the
//! CLI.
//!
//! The engine only ever asks one question of a provider: "features of this
//! kind whose geometry intersects this envelope, matching these attribute
//! constraints, in this order, up to this limit". The sort key matters when
//! the limit bites: a provider that cuts off in its own order would drop
//! high-priority features before the engine ever ranks them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use geo::{BoundingRect, Geometry, Polygon};

use crate::envelope::Envelope;
use crate::lod::FeatureKind;
use crate::mvt::PropertyValue;
use crate::{Error, Result};

/// A candidate feature returned by the provider. Immutable once returned.
#[derive(Debug, Clone)]
pub struct Feature {
    /// Opaque identifier, carried through to the encoded tile.
    pub id: u64,
    /// Geometry in geographic coordinates (lon/lat).
    pub geometry: Geometry<f64>,
    /// Ordered property mapping; order is preserved into the tile.
    pub properties: Vec<(String, PropertyValue)>,
}

impl Feature {
    pub fn new(id: u64, geometry: Geometry<f64>, properties: Vec<(String, PropertyValue)>) -> Self {
        Self {
            id,
            geometry,
            properties,
        }
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// String property value, if the property exists and is a string.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        match self.property(name) {
            Some(PropertyValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Any scalar property rendered as text, the form attribute filters
    /// compare against.
    pub fn property_text(&self, name: &str) -> Option<String> {
        self.property(name).map(PropertyValue::as_text)
    }
}

/// Exact-match / any-of attribute constraints.
///
/// Clauses are conjunctive across names; within one name the value set is
/// disjunctive ("any of"). Backed by ordered containers so the canonical
/// rendering is sorted and deduplicated by construction, which the cache key
/// contract requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeFilter {
    clauses: BTreeMap<String, BTreeSet<String>>,
}

impl AttributeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name` to equal `value`.
    pub fn with_exact(mut self, name: &str, value: &str) -> Self {
        self.clauses
            .entry(name.to_string())
            .or_default()
            .insert(value.to_string());
        self
    }

    /// Require `name` to match any of `values`.
    pub fn with_any_of<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = self.clauses.entry(name.to_string()).or_default();
        for v in values {
            set.insert(v.into());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Combine two filters into one that satisfies both.
    ///
    /// Distinct names are conjoined; a name present in both keeps the
    /// intersection of its value sets (an empty intersection matches
    /// nothing, which is a legitimate empty result).
    pub fn merge(&self, other: &Self) -> Self {
        let mut clauses = self.clauses.clone();
        for (name, values) in &other.clauses {
            match clauses.get_mut(name) {
                Some(existing) => {
                    *existing = existing.intersection(values).cloned().collect();
                }
                None => {
                    clauses.insert(name.clone(), values.clone());
                }
            }
        }
        Self { clauses }
    }

    /// True when `feature` satisfies every clause.
    pub fn matches(&self, feature: &Feature) -> bool {
        self.clauses.iter().all(|(name, values)| {
            feature
                .property_text(name)
                .map(|text| values.contains(&text))
                .unwrap_or(false)
        })
    }

    /// Canonical string form, e.g. `admin_level=2;category=food|shopping`.
    ///
    /// Sorted and deduplicated, so two filters with the same effective
    /// constraints render identically regardless of construction order.
    pub fn canonical(&self) -> String {
        self.clauses
            .iter()
            .map(|(name, values)| {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                format!("{}={}", name, joined.join("|"))
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Candidate ordering for provider-side truncation: the canonical priority
/// order (see [`crate::lod::priority_cmp`]), parameterized by the distance
/// tiebreak center.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SortKey {
    /// Query center for the distance tiebreak; radius requests only.
    pub center: Option<(f64, f64)>,
}

impl SortKey {
    pub fn centered(lon: f64, lat: f64) -> Self {
        Self {
            center: Some((lon, lat)),
        }
    }
}

/// One spatial range query against the provider.
#[derive(Debug, Clone)]
pub struct FeatureQuery {
    pub kind: FeatureKind,
    pub envelope: Envelope,
    pub filter: AttributeFilter,
    /// Ordering the provider must truncate by when `limit` applies.
    pub sort_key: SortKey,
    /// Upper bound on returned candidates; the engine caps this above the
    /// LOD policy's `max_features` so ranking still has a pool to pick from.
    pub limit: usize,
}

/// Spatial feature source.
///
/// When a query's `limit` cuts the result set, the cutoff must follow the
/// query's sort key; truncating in any other order silently loses
/// high-priority features. Infrastructure failure maps to
/// [`Error::ProviderUnavailable`], never to an empty result.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    async fn query(&self, query: &FeatureQuery) -> Result<Vec<Feature>>;
}

/// Lookup of stored boundary polygons by id.
#[async_trait]
pub trait BoundaryStore: Send + Sync {
    /// # Errors
    ///
    /// [`Error::BoundaryNotFound`] when no boundary has this id — a caller
    /// mistake, distinct from a valid spatial query that found nothing.
    async fn boundary(&self, id: &str) -> Result<Polygon<f64>>;
}

/// Linear-scan in-memory provider for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    features: HashMap<FeatureKind, Vec<Feature>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: FeatureKind, feature: Feature) {
        self.features.entry(kind).or_default().push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FeatureProvider for MemoryProvider {
    async fn query(&self, query: &FeatureQuery) -> Result<Vec<Feature>> {
        let candidates = self
            .features
            .get(&query.kind)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut matched: Vec<Feature> = candidates
            .iter()
            .filter(|f| {
                f.geometry
                    .bounding_rect()
                    .map(|r| {
                        query.envelope.intersects(&Envelope::new(
                            r.min().x,
                            r.min().y,
                            r.max().x,
                            r.max().y,
                        ))
                    })
                    .unwrap_or(false)
            })
            .filter(|f| query.filter.matches(f))
            .cloned()
            .collect();

        // Sort before the limit cuts, so truncation follows the sort key.
        matched.sort_by(|a, b| crate::lod::priority_cmp(a, b, query.sort_key.center));
        matched.truncate(query.limit);
        Ok(matched)
    }
}

/// In-memory boundary store keyed by id.
#[derive(Debug, Default)]
pub struct MemoryBoundaryStore {
    boundaries: HashMap<String, Polygon<f64>>,
}

impl MemoryBoundaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str, polygon: Polygon<f64>) {
        self.boundaries.insert(id.to_string(), polygon);
    }
}

#[async_trait]
impl BoundaryStore for MemoryBoundaryStore {
    async fn boundary(&self, id: &str) -> Result<Polygon<f64>> {
        self.boundaries
            .get(id)
            .cloned()
            .ok_or_else(|| Error::BoundaryNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, LineString};

    fn named_point(id: u64, x: f64, y: f64, category: &str) -> Feature {
        Feature::new(
            id,
            Geometry::Point(point!(x: x, y: y)),
            vec![(
                "category".to_string(),
                PropertyValue::String(category.to_string()),
            )],
        )
    }

    #[test]
    fn filter_canonical_is_order_independent() {
        let a = AttributeFilter::new().with_any_of("category", ["healthcare", "shopping"]);
        let b = AttributeFilter::new().with_any_of("category", ["shopping", "healthcare"]);
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "category=healthcare|shopping");
    }

    #[test]
    fn filter_deduplicates_values() {
        let f = AttributeFilter::new().with_any_of("category", ["food", "food", "food"]);
        assert_eq!(f.canonical(), "category=food");
    }

    #[test]
    fn filter_matches_any_of() {
        let f = AttributeFilter::new().with_any_of("category", ["food", "shopping"]);
        assert!(f.matches(&named_point(1, 0.0, 0.0, "food")));
        assert!(f.matches(&named_point(2, 0.0, 0.0, "shopping")));
        assert!(!f.matches(&named_point(3, 0.0, 0.0, "leisure")));
    }

    #[test]
    fn filter_requires_property_presence() {
        let f = AttributeFilter::new().with_exact("admin_level", "2");
        let feature = named_point(1, 0.0, 0.0, "food");
        assert!(!f.matches(&feature));
    }

    #[test]
    fn merge_intersects_shared_names() {
        let band = AttributeFilter::new().with_any_of("category", ["food", "shopping"]);
        let request = AttributeFilter::new().with_any_of("category", ["shopping", "leisure"]);
        let merged = band.merge(&request);
        assert_eq!(merged.canonical(), "category=shopping");
    }

    #[test]
    fn merge_conjoins_distinct_names() {
        let a = AttributeFilter::new().with_exact("admin_level", "2");
        let b = AttributeFilter::new().with_exact("category", "food");
        let merged = a.merge(&b);
        assert_eq!(merged.canonical(), "admin_level=2;category=food");
    }

    #[test]
    fn filter_compares_numeric_properties_as_text() {
        let f = AttributeFilter::new().with_exact("admin_level", "2");
        let feature = Feature::new(
            1,
            Geometry::Point(point!(x: 0.0, y: 0.0)),
            vec![("admin_level".to_string(), PropertyValue::Int(2))],
        );
        assert!(f.matches(&feature));
    }

    #[tokio::test]
    async fn memory_provider_filters_by_envelope_and_attributes() {
        let mut provider = MemoryProvider::new();
        provider.insert(FeatureKind::Poi, named_point(1, 1.0, 1.0, "food"));
        provider.insert(FeatureKind::Poi, named_point(2, 50.0, 50.0, "food"));
        provider.insert(FeatureKind::Poi, named_point(3, 1.5, 1.5, "leisure"));

        let query = FeatureQuery {
            kind: FeatureKind::Poi,
            envelope: Envelope::new(0.0, 0.0, 10.0, 10.0),
            filter: AttributeFilter::new().with_exact("category", "food"),
            sort_key: SortKey::default(),
            limit: 10,
        };
        let found = provider.query(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
    }

    #[tokio::test]
    async fn memory_provider_honors_limit() {
        let mut provider = MemoryProvider::new();
        for i in 0..20 {
            provider.insert(FeatureKind::Poi, named_point(i, 1.0, 1.0, "food"));
        }
        let query = FeatureQuery {
            kind: FeatureKind::Poi,
            envelope: Envelope::new(0.0, 0.0, 10.0, 10.0),
            filter: AttributeFilter::new(),
            sort_key: SortKey::default(),
            limit: 5,
        };
        assert_eq!(provider.query(&query).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn memory_provider_truncates_in_priority_order() {
        let mut provider = MemoryProvider::new();
        // A high-priority feature inserted after enough low-priority ones
        // to overflow the limit.
        for i in 0..10 {
            provider.insert(FeatureKind::Poi, named_point(i, 1.0, 1.0, "food"));
        }
        provider.insert(FeatureKind::Poi, named_point(99, 1.0, 1.0, "healthcare"));

        let query = FeatureQuery {
            kind: FeatureKind::Poi,
            envelope: Envelope::new(0.0, 0.0, 10.0, 10.0),
            filter: AttributeFilter::new(),
            sort_key: SortKey::default(),
            limit: 5,
        };
        let found = provider.query(&query).await.unwrap();
        assert_eq!(found.len(), 5);
        // Insertion order must not decide the cutoff.
        assert_eq!(found[0].id, 99);
    }

    #[tokio::test]
    async fn memory_provider_sorts_by_distance_center() {
        let mut provider = MemoryProvider::new();
        provider.insert(FeatureKind::Poi, named_point(1, 5.0, 5.0, "food"));
        provider.insert(FeatureKind::Poi, named_point(2, 1.0, 1.0, "food"));

        let query = FeatureQuery {
            kind: FeatureKind::Poi,
            envelope: Envelope::new(0.0, 0.0, 10.0, 10.0),
            filter: AttributeFilter::new(),
            sort_key: SortKey::centered(0.0, 0.0),
            limit: 1,
        };
        let found = provider.query(&query).await.unwrap();
        assert_eq!(found[0].id, 2);
    }

    #[tokio::test]
    async fn missing_boundary_is_not_found() {
        let mut store = MemoryBoundaryStore::new();
        store.insert(
            "b1",
            Polygon::new(
                LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
                vec![],
            ),
        );
        assert!(store.boundary("b1").await.is_ok());
        assert!(matches!(
            store.boundary("nope").await,
            Err(Error::BoundaryNotFound(_))
        ));
    }
}
