//! Command-line tile renderer over GeoJSON feature sets.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geo::Geometry;
use geojson::{FeatureCollection, GeoJson, JsonValue};

use tilekit_core::cache::MemoryCache;
use tilekit_core::engine::{EngineConfig, LayerQuery, TileEngine};
use tilekit_core::envelope::TileCoord;
use tilekit_core::lod::{Category, FeatureKind, LodTable};
use tilekit_core::mvt::PropertyValue;
use tilekit_core::provider::{Feature, MemoryBoundaryStore, MemoryProvider};

#[derive(Parser)]
#[command(name = "tilekit", version, about = "Render MVT tiles from GeoJSON")]
struct Cli {
    /// GeoJSON FeatureCollection to serve features from. Each feature may
    /// carry a "kind" property (admin_boundary, poi, transport_station,
    /// transport_line, water_body); the default is poi.
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Output path for the encoded tile.
    #[arg(short, long, global = true, default_value = "tile.mvt")]
    output: PathBuf,

    /// Gzip the encoded tile.
    #[arg(long, global = true)]
    gzip: bool,

    /// Comma-separated POI categories to keep (healthcare, education,
    /// shopping, leisure, food, other).
    #[arg(long, global = true, value_delimiter = ',')]
    categories: Vec<String>,

    /// Comma-separated layers to render; defaults to all kinds.
    #[arg(long, global = true, value_delimiter = ',')]
    layers: Vec<String>,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a z/x/y slippy-map tile.
    Tile {
        #[arg(short)]
        z: u8,
        #[arg(short)]
        x: u32,
        #[arg(short)]
        y: u32,
    },
    /// Render everything within a radius of a point.
    Radius {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
        #[arg(long)]
        radius_km: f64,
    },
    /// Render everything within a named boundary. Boundaries are read from
    /// a separate GeoJSON file whose features carry an "id" property.
    Boundary {
        #[arg(long)]
        id: String,
        #[arg(long)]
        boundaries: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut provider = MemoryProvider::new();
    if let Some(input) = &cli.input {
        let count = load_features(input, &mut provider)?;
        log::info!("loaded {} feature(s) from {}", count, input.display());
    }

    let mut boundaries = MemoryBoundaryStore::new();
    if let Command::Boundary {
        boundaries: path, ..
    } = &cli.command
    {
        let count = load_boundaries(path, &mut boundaries)?;
        log::info!("loaded {} boundary polygon(s) from {}", count, path.display());
    }

    let engine = TileEngine::new(
        EngineConfig::default(),
        LodTable::default(),
        Arc::new(provider),
        Arc::new(boundaries),
        Arc::new(MemoryCache::new()),
    );

    let layers = layer_queries(&cli.layers, &cli.categories)?;
    let bytes = match &cli.command {
        Command::Tile { z, x, y } => {
            engine.render_tile(TileCoord::new(*x, *y, *z), layers).await?
        }
        Command::Radius {
            lat,
            lon,
            radius_km,
        } => engine.render_radius(*lat, *lon, *radius_km, layers).await?,
        Command::Boundary { id, .. } => engine.render_boundary(id, layers).await?,
    };

    let out = if cli.gzip {
        tilekit_core::compression::gzip_encode(&bytes)?
    } else {
        bytes
    };
    fs::write(&cli.output, &out)
        .with_context(|| format!("writing {}", cli.output.display()))?;
    log::info!("wrote {} bytes to {}", out.len(), cli.output.display());
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn layer_queries(layers: &[String], categories: &[String]) -> Result<Vec<LayerQuery>> {
    let categories: Vec<Category> = categories
        .iter()
        .map(|s| Category::parse(s))
        .collect::<tilekit_core::Result<_>>()?;

    let kinds: Vec<FeatureKind> = if layers.is_empty() {
        vec![
            FeatureKind::AdminBoundary,
            FeatureKind::Poi,
            FeatureKind::TransportStation,
            FeatureKind::TransportLine,
            FeatureKind::WaterBody,
        ]
    } else {
        layers.iter().map(|s| parse_kind(s)).collect::<Result<_>>()?
    };

    Ok(kinds
        .into_iter()
        .map(|kind| {
            let mut layer = LayerQuery::new(kind);
            if kind == FeatureKind::Poi {
                layer = layer.with_categories(categories.clone());
            }
            layer
        })
        .collect())
}

fn parse_kind(s: &str) -> Result<FeatureKind> {
    Ok(match s {
        "admin_boundary" => FeatureKind::AdminBoundary,
        "poi" => FeatureKind::Poi,
        "transport_station" => FeatureKind::TransportStation,
        "transport_line" => FeatureKind::TransportLine,
        "water_body" => FeatureKind::WaterBody,
        other => bail!("unknown layer {other:?}"),
    })
}

fn read_collection(path: &PathBuf) -> Result<FeatureCollection> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let geojson: GeoJson = raw
        .parse()
        .with_context(|| format!("parsing {}", path.display()))?;
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => bail!("{} is not a FeatureCollection", path.display()),
    }
}

fn load_features(path: &PathBuf, provider: &mut MemoryProvider) -> Result<usize> {
    let collection = read_collection(path)?;
    let mut count = 0usize;
    for (index, feature) in collection.features.into_iter().enumerate() {
        let Some(geom) = feature.geometry else {
            log::warn!("feature {} has no geometry, skipping", index);
            continue;
        };
        let geometry = Geometry::<f64>::try_from(geom.value)
            .with_context(|| format!("feature {} geometry", index))?;

        let mut kind = FeatureKind::Poi;
        let mut properties = Vec::new();
        if let Some(object) = feature.properties {
            for (key, value) in object {
                if key == "kind" {
                    if let JsonValue::String(s) = &value {
                        kind = parse_kind(s)?;
                    }
                    continue;
                }
                if let Some(prop) = to_property(&value) {
                    properties.push((key, prop));
                }
            }
        }

        let id = feature
            .id
            .and_then(|id| match id {
                geojson::feature::Id::Number(n) => n.as_u64(),
                geojson::feature::Id::String(s) => s.parse().ok(),
            })
            .unwrap_or(index as u64);

        provider.insert(kind, Feature::new(id, geometry, properties));
        count += 1;
    }
    Ok(count)
}

fn load_boundaries(path: &PathBuf, store: &mut MemoryBoundaryStore) -> Result<usize> {
    let collection = read_collection(path)?;
    let mut count = 0usize;
    for (index, feature) in collection.features.into_iter().enumerate() {
        let Some(id) = feature
            .properties
            .as_ref()
            .and_then(|p| p.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
        else {
            log::warn!("boundary {} has no \"id\" property, skipping", index);
            continue;
        };
        let Some(geom) = feature.geometry else {
            log::warn!("boundary {:?} has no geometry, skipping", id);
            continue;
        };
        match Geometry::<f64>::try_from(geom.value) {
            Ok(Geometry::Polygon(polygon)) => {
                store.insert(&id, polygon);
                count += 1;
            }
            Ok(_) => log::warn!("boundary {:?} is not a polygon, skipping", id),
            Err(err) => log::warn!("boundary {:?}: {}", id, err),
        }
    }
    Ok(count)
}

fn to_property(value: &JsonValue) -> Option<PropertyValue> {
    match value {
        JsonValue::String(s) => Some(PropertyValue::String(s.clone())),
        JsonValue::Bool(b) => Some(PropertyValue::Bool(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(PropertyValue::Int(i))
            } else {
                n.as_f64().map(PropertyValue::Double)
            }
        }
        _ => None,
    }
}
