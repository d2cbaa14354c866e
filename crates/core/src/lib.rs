//! Core library for the adaptive spatial tile engine.
//!
//! Answers "give me the map features visible in this viewport (or radius, or
//! boundary) at this zoom level, filtered by category" as a Mapbox Vector Tile:
//!
//! 1. [`envelope`] maps the request shape to a query envelope and clip shape
//! 2. [`lod`] decides per kind and zoom what is visible, how many features,
//!    and how simplified
//! 3. [`provider`] fetches candidate features from an external source
//! 4. [`geometry`] simplifies, clips and quantizes each feature
//! 5. [`mvt`] encodes the survivors into MVT layers
//! 6. [`cache`] serves repeated requests from a TTL byte cache
//! 7. [`engine`] wires it all together
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilekit_core::cache::MemoryCache;
//! use tilekit_core::engine::{EngineConfig, LayerQuery, TileEngine, TileQuery, TileRequest};
//! use tilekit_core::envelope::TileCoord;
//! use tilekit_core::lod::{FeatureKind, LodTable};
//! use tilekit_core::provider::{MemoryBoundaryStore, MemoryProvider};
//!
//! # async fn run() -> tilekit_core::Result<()> {
//! let engine = TileEngine::new(
//!     EngineConfig::default(),
//!     LodTable::default(),
//!     Arc::new(MemoryProvider::new()),
//!     Arc::new(MemoryBoundaryStore::new()),
//!     Arc::new(MemoryCache::new()),
//! );
//!
//! let query = TileQuery {
//!     request: TileRequest::Tile { coord: TileCoord::new(8, 5, 4) },
//!     layers: vec![LayerQuery::new(FeatureKind::AdminBoundary)],
//! };
//! let mvt_bytes = engine.render(&query).await?;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod cache;
pub mod compose;
pub mod compression;
pub mod engine;
pub mod envelope;
pub mod geometry;
pub mod lod;
pub mod mvt;
pub mod provider;
pub mod vector_tile;

/// Maximum supported zoom level for tile addressing and LOD tables.
pub const MAX_ZOOM: u8 = 18;

/// Errors surfaced by the tile engine.
///
/// Input errors are rejected before any provider or cache call.
/// `ProviderUnavailable` / `CacheUnavailable` mean the upstream failed and are
/// never silently converted into an empty tile: an empty tile always means
/// "no features found". A single feature failing to simplify or clip is not
/// an error at all; it is logged and dropped (see [`geometry`]).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid zoom {0}: must be within 0..={MAX_ZOOM}")]
    InvalidZoom(u8),

    #[error("invalid tile index x={x} y={y}: must be within [0, 2^{z})")]
    InvalidTileIndex { z: u8, x: u32, y: u32 },

    #[error("invalid coordinate lat={lat} lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("invalid radius {0} km: must be positive")]
    InvalidRadius(f64),

    #[error("unknown category: {0:?}")]
    UnknownCategory(String),

    #[error("boundary not found: {0}")]
    BoundaryNotFound(String),

    #[error("feature provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl Error {
    /// True for errors caused by the caller's input (the HTTP surface maps
    /// these to 400, everything else to 500).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidZoom(_)
                | Error::InvalidTileIndex { .. }
                | Error::InvalidCoordinate { .. }
                | Error::InvalidRadius(_)
                | Error::UnknownCategory(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_classified() {
        assert!(Error::InvalidZoom(25).is_input_error());
        assert!(Error::InvalidRadius(-1.0).is_input_error());
        assert!(Error::UnknownCategory("bogus".into()).is_input_error());
        assert!(!Error::BoundaryNotFound("b1".into()).is_input_error());
        assert!(!Error::ProviderUnavailable("timeout".into()).is_input_error());
    }
}
