//! The tile engine: envelope mapping, LOD resolution, provider queries,
//! geometry processing, encoding, caching and composition for one request.
//!
//! Layers of one request are independent sub-queries and run concurrently;
//! each is cached separately, so a request for `poi + stations` reuses the
//! `poi` bytes a previous poi-only request produced.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::cache::{CacheBackend, CacheKey};
use crate::compose::compose;
use crate::envelope::{
    boundary_envelope, radius_envelope, tile_envelope, ClipShape, Envelope, TileCoord,
};
use crate::geometry::{self, TileClip, TileFrame};
use crate::lod::{rank_and_truncate, Category, FeatureKind, LodTable};
use crate::mvt::LayerBuilder;
use crate::provider::{AttributeFilter, BoundaryStore, FeatureProvider, FeatureQuery, SortKey};
use crate::{Result, MAX_ZOOM};

/// Engine tuning knobs. The defaults match the MVT conventions: 4096 extent
/// with a 64px seam buffer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tile extent in integer units per axis.
    pub extent: u32,
    /// Clip buffer beyond the tile edge, in extent units. Applies to
    /// rectangular viewports only; radius and boundary shapes clip exactly.
    pub buffer_px: f64,
    /// TTL for cached layer results.
    pub cache_ttl: Duration,
    /// Provider over-fetch factor: candidates fetched per layer are
    /// `max_features * fetch_multiplier`, so ranking has a pool to pick the
    /// highest-priority survivors from.
    pub fetch_multiplier: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extent: 4096,
            buffer_px: 64.0,
            cache_ttl: Duration::from_secs(3600),
            fetch_multiplier: 4,
        }
    }
}

/// The three request shapes the engine answers.
#[derive(Debug, Clone)]
pub enum TileRequest {
    /// Standard slippy-map tile.
    Tile { coord: TileCoord },
    /// Everything within `radius_km` of a point.
    Radius { lat: f64, lon: f64, radius_km: f64 },
    /// Everything within a stored boundary polygon.
    Boundary { id: String },
}

/// One layer of a request: a feature kind plus an optional category filter.
#[derive(Debug, Clone)]
pub struct LayerQuery {
    pub kind: FeatureKind,
    /// Restrict to these categories; empty means all.
    pub categories: Vec<Category>,
    /// Mandatory layers fail the whole request on provider failure; optional
    /// ones are omitted with a warning.
    pub mandatory: bool,
}

impl LayerQuery {
    pub fn new(kind: FeatureKind) -> Self {
        Self {
            kind,
            categories: Vec::new(),
            mandatory: true,
        }
    }

    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }

    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }
}

/// A complete tile request: the spatial shape and the layers to fill.
#[derive(Debug, Clone)]
pub struct TileQuery {
    pub request: TileRequest,
    pub layers: Vec<LayerQuery>,
}

/// Resolved spatial context shared by all layers of one request.
struct RequestFrame {
    envelope: Envelope,
    clip: ClipShape,
    zoom: u8,
    /// Ranking center for distance tiebreaks; radius requests only.
    center: Option<(f64, f64)>,
}

/// Renders tile requests. Cheap to clone behind `Arc`s; hold one per process.
pub struct TileEngine {
    config: EngineConfig,
    lod: LodTable,
    provider: Arc<dyn FeatureProvider>,
    boundaries: Arc<dyn BoundaryStore>,
    cache: Arc<dyn CacheBackend>,
}

impl TileEngine {
    pub fn new(
        config: EngineConfig,
        lod: LodTable,
        provider: Arc<dyn FeatureProvider>,
        boundaries: Arc<dyn BoundaryStore>,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            config,
            lod,
            provider,
            boundaries,
            cache,
        }
    }

    /// Render one request into MVT bytes.
    ///
    /// An empty buffer is the valid empty tile: every requested layer was
    /// hidden at this zoom or had no features. Errors mean the request was
    /// invalid or an upstream failed; they are never masked as empty tiles.
    pub async fn render(&self, query: &TileQuery) -> Result<Vec<u8>> {
        let frame = self.resolve_request(&query.request).await?;
        log::debug!(
            "rendering {} layer(s) at zoom {} over {:?}",
            query.layers.len(),
            frame.zoom,
            frame.envelope
        );

        let results = join_all(
            query
                .layers
                .iter()
                .map(|layer| self.render_layer(&query.request, &frame, layer)),
        )
        .await;

        let mut layer_tiles = Vec::with_capacity(results.len());
        for (layer, result) in query.layers.iter().zip(results) {
            match result {
                Ok(bytes) => layer_tiles.push(bytes),
                Err(err) if !layer.mandatory => {
                    log::warn!(
                        "omitting optional layer {}: {}",
                        layer.kind.as_str(),
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(compose(&layer_tiles))
    }

    /// Render a plain z/x/y tile with the given layers.
    pub async fn render_tile(&self, coord: TileCoord, layers: Vec<LayerQuery>) -> Result<Vec<u8>> {
        self.render(&TileQuery {
            request: TileRequest::Tile { coord },
            layers,
        })
        .await
    }

    /// Render everything within `radius_km` of a point.
    pub async fn render_radius(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        layers: Vec<LayerQuery>,
    ) -> Result<Vec<u8>> {
        self.render(&TileQuery {
            request: TileRequest::Radius {
                lat,
                lon,
                radius_km,
            },
            layers,
        })
        .await
    }

    /// Render everything within a stored boundary.
    pub async fn render_boundary(&self, id: &str, layers: Vec<LayerQuery>) -> Result<Vec<u8>> {
        self.render(&TileQuery {
            request: TileRequest::Boundary { id: id.to_string() },
            layers,
        })
        .await
    }

    /// Validate the request shape and fix the envelope, clip shape and zoom
    /// all layers share.
    async fn resolve_request(&self, request: &TileRequest) -> Result<RequestFrame> {
        match request {
            TileRequest::Tile { coord } => {
                let envelope = tile_envelope(coord.z, coord.x, coord.y)?;
                Ok(RequestFrame {
                    envelope,
                    clip: ClipShape::Rect(envelope),
                    zoom: coord.z,
                    center: None,
                })
            }
            TileRequest::Radius {
                lat,
                lon,
                radius_km,
            } => {
                let (envelope, clip) = radius_envelope(*lat, *lon, *radius_km)?;
                Ok(RequestFrame {
                    zoom: derive_zoom(&envelope),
                    envelope,
                    clip,
                    center: Some((*lon, *lat)),
                })
            }
            TileRequest::Boundary { id } => {
                let polygon = self.boundaries.boundary(id).await?;
                let (envelope, clip) = boundary_envelope(&polygon);
                Ok(RequestFrame {
                    zoom: derive_zoom(&envelope),
                    envelope,
                    clip,
                    center: None,
                })
            }
        }
    }

    /// Render one layer, consulting the cache first.
    async fn render_layer(
        &self,
        request: &TileRequest,
        frame: &RequestFrame,
        layer: &LayerQuery,
    ) -> Result<Vec<u8>> {
        let Some(policy) = self.lod.resolve(layer.kind, frame.zoom) else {
            // Hidden at this zoom: a reproducible empty layer, not an error.
            return Ok(Vec::new());
        };

        // Cache read failure is a server error, not a miss: misreporting it
        // as a recomputed tile would hide a broken cache tier from callers.
        let key = layer_cache_key(request, layer);
        if let Some(bytes) = self.cache.get(key.as_str()).await? {
            log::debug!("cache hit for {}", key.as_str());
            return Ok(bytes);
        }

        let mut filter = policy.attribute_filter.clone();
        if !layer.categories.is_empty() {
            filter = filter.merge(
                &AttributeFilter::new()
                    .with_any_of("category", layer.categories.iter().map(|c| c.as_str())),
            );
        }

        let candidates = self
            .provider
            .query(&FeatureQuery {
                kind: layer.kind,
                envelope: self.query_envelope(frame),
                filter,
                sort_key: SortKey {
                    center: frame.center,
                },
                limit: policy.max_features * self.config.fetch_multiplier,
            })
            .await?;
        let kept = rank_and_truncate(candidates, policy.max_features, frame.center);

        let tile_frame = TileFrame::new(frame.envelope, self.config.extent);
        let tile_clip = TileClip::new(&frame.clip, &tile_frame, self.config.buffer_px);

        let mut builder = LayerBuilder::new(layer.kind.layer_name()).with_extent(self.config.extent);
        for feature in &kept {
            match geometry::process(&feature.geometry, &tile_clip, &tile_frame, policy.tolerance_px)
            {
                Some(tile_geometry) => {
                    builder.add_feature(Some(feature.id), &tile_geometry, &feature.properties)
                }
                None => log::debug!(
                    "feature {} contributed no geometry to layer {}",
                    feature.id,
                    layer.kind.as_str()
                ),
            }
        }
        let encoded = builder.feature_count();
        let bytes = builder.encode();
        log::debug!(
            "layer {}: {} candidate(s), {} encoded, {} bytes",
            layer.kind.as_str(),
            kept.len(),
            encoded,
            bytes.len()
        );

        if let Err(err) = self
            .cache
            .set(key.as_str(), bytes.clone(), self.config.cache_ttl)
            .await
        {
            log::warn!("cache write failed, serving uncached: {}", err);
        }

        Ok(bytes)
    }

    /// Provider query envelope: the clip envelope grown by the seam buffer
    /// for rectangular viewports, exact for radius and boundary shapes.
    fn query_envelope(&self, frame: &RequestFrame) -> Envelope {
        match frame.clip {
            ClipShape::Rect(_) => {
                let margin =
                    frame.envelope.width() * self.config.buffer_px / self.config.extent as f64;
                frame.envelope.buffered(margin)
            }
            ClipShape::Polygon(_) => frame.envelope,
        }
    }
}

/// Zoom implied by an envelope's extent: the level at which one tile spans
/// roughly the envelope's width.
fn derive_zoom(envelope: &Envelope) -> u8 {
    let width = envelope.width().max(1e-9);
    let zoom = (360.0 / width).log2().round();
    zoom.clamp(0.0, MAX_ZOOM as f64) as u8
}

fn layer_cache_key(request: &TileRequest, layer: &LayerQuery) -> CacheKey {
    match request {
        TileRequest::Tile { coord } => {
            CacheKey::for_tile(coord.z, coord.x, coord.y, layer.kind, &layer.categories)
        }
        TileRequest::Radius {
            lat,
            lon,
            radius_km,
        } => CacheKey::for_radius(*lat, *lon, *radius_km, layer.kind, &layer.categories),
        TileRequest::Boundary { id } => CacheKey::for_boundary(id, layer.kind, &layer.categories),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_zoom_tracks_envelope_width() {
        // Whole world.
        assert_eq!(derive_zoom(&Envelope::new(-180.0, -85.0, 180.0, 85.0)), 0);
        // A ~0.02 degree window (2km-ish) lands deep in the detail zooms.
        let z = derive_zoom(&Envelope::new(13.39, 52.51, 13.41, 52.53));
        assert!(z >= 13 && z <= MAX_ZOOM, "zoom {z}");
        // Vanishingly small windows clamp instead of overflowing.
        assert_eq!(
            derive_zoom(&Envelope::new(0.0, 0.0, 1e-12, 1e-12)),
            MAX_ZOOM
        );
    }

    #[test]
    fn smaller_radius_means_deeper_zoom() {
        let (wide, _) = radius_envelope(52.52, 13.405, 50.0).unwrap();
        let (narrow, _) = radius_envelope(52.52, 13.405, 0.5).unwrap();
        assert!(derive_zoom(&narrow) > derive_zoom(&wide));
    }

    #[test]
    fn layer_query_builder_defaults() {
        let layer = LayerQuery::new(FeatureKind::Poi);
        assert!(layer.mandatory);
        assert!(layer.categories.is_empty());

        let tuned = LayerQuery::new(FeatureKind::WaterBody)
            .with_categories(vec![Category::Food])
            .optional();
        assert!(!tuned.mandatory);
        assert_eq!(tuned.categories, vec![Category::Food]);
    }
}
