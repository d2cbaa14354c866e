//! Tile cache: canonical keys plus a pluggable async backend.
//!
//! Keys are canonical over request semantics, not request syntax: two
//! requests differing only in filter ordering produce the same key and hit
//! the same entry. Read errors surface to the caller as
//! [`crate::Error::CacheUnavailable`]; only writes are best-effort.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::lod::{Category, FeatureKind};
use crate::Result;

/// Async cache backend over opaque encoded tile bytes.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Canonical cache key for one layer of one tile request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a z/x/y tile request layer.
    pub fn for_tile(z: u8, x: u32, y: u32, kind: FeatureKind, categories: &[Category]) -> Self {
        Self(format!(
            "tile:{}:{}:{}:{}:{}",
            z,
            x,
            y,
            kind.as_str(),
            canonical_categories(categories)
        ))
    }

    /// Key for a radius request layer. Coordinates are rounded so requests
    /// within ~1m of each other share an entry.
    pub fn for_radius(
        lat: f64,
        lon: f64,
        radius_km: f64,
        kind: FeatureKind,
        categories: &[Category],
    ) -> Self {
        Self(format!(
            "radius:{:.5}:{:.5}:{:.2}:{}:{}",
            lat,
            lon,
            radius_km,
            kind.as_str(),
            canonical_categories(categories)
        ))
    }

    /// Key for a named-boundary request layer.
    pub fn for_boundary(boundary_id: &str, kind: FeatureKind, categories: &[Category]) -> Self {
        Self(format!(
            "boundary:{}:{}:{}",
            boundary_id,
            kind.as_str(),
            canonical_categories(categories)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Sorted, deduplicated category list; empty filter renders as `*`.
fn canonical_categories(categories: &[Category]) -> String {
    if categories.is_empty() {
        return "*".to_string();
    }
    let mut names: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names.join(",")
}

/// In-process cache backed by a mutex-guarded map, with lazy TTL expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| crate::Error::CacheUnavailable("poisoned cache lock".to_string()))?;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| crate::Error::CacheUnavailable("poisoned cache lock".to_string()))?;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| crate::Error::CacheUnavailable("poisoned cache lock".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}
