//! MVT (Mapbox Vector Tile) encoding.
//!
//! Turns quantized tile-space geometries into the MVT wire format:
//!
//! - **Zigzag encoding**: signed deltas packed as small unsigned varints
//! - **Command encoding**: MoveTo/LineTo/ClosePath opcodes with repeat counts
//! - **Layer encoding**: features grouped with deduplicated key/value
//!   dictionaries
//!
//! Input geometry arrives already simplified, clipped and quantized (see
//! [`crate::geometry`]), so the encoder only delta-encodes; it never fails
//! on valid input.
//!
//! Reference: <https://github.com/mapbox/vector-tile-spec>

use std::collections::HashMap;

use prost::Message;

use crate::geometry::TileGeometry;
use crate::vector_tile::{self, GeomType};

/// Canonical tile extent per the MVT spec.
pub const DEFAULT_EXTENT: u32 = 4096;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

/// Zigzag-encode a signed delta: 0, -1, 1, -2, 2 → 0, 1, 2, 3, 4.
#[inline]
pub fn zigzag_encode(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Pack a command id with a repeat count: `(id & 0x7) | (count << 3)`.
#[inline]
pub fn command_encode(command_id: u32, count: u32) -> u32 {
    (command_id & 0x7) | (count << 3)
}

/// Unpack a command into `(id, count)`.
#[inline]
pub fn command_decode(command: u32) -> (u32, u32) {
    (command & 0x7, command >> 3)
}

/// A property value encodable in an MVT value dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl PropertyValue {
    pub fn to_mvt_value(&self) -> vector_tile::Value {
        match self {
            PropertyValue::String(s) => vector_tile::Value {
                string_value: Some(s.clone()),
                ..Default::default()
            },
            PropertyValue::Float(f) => vector_tile::Value {
                float_value: Some(*f),
                ..Default::default()
            },
            PropertyValue::Double(d) => vector_tile::Value {
                double_value: Some(*d),
                ..Default::default()
            },
            PropertyValue::Int(i) => vector_tile::Value {
                int_value: Some(*i),
                ..Default::default()
            },
            PropertyValue::UInt(u) => vector_tile::Value {
                uint_value: Some(*u),
                ..Default::default()
            },
            PropertyValue::Bool(b) => vector_tile::Value {
                bool_value: Some(*b),
                ..Default::default()
            },
        }
    }

    /// Text rendering used by attribute filter comparison.
    pub fn as_text(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Double(d) => d.to_string(),
            PropertyValue::Int(i) => i.to_string(),
            PropertyValue::UInt(u) => u.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }
}

/// Delta-encoding cursor shared across a feature's command stream.
struct Cursor {
    x: i32,
    y: i32,
}

impl Cursor {
    fn new() -> Self {
        Self { x: 0, y: 0 }
    }

    fn delta(&mut self, x: i32, y: i32) -> (u32, u32) {
        let dx = x - self.x;
        let dy = y - self.y;
        self.x = x;
        self.y = y;
        (zigzag_encode(dx), zigzag_encode(dy))
    }
}

/// Encode a quantized geometry into an MVT command stream.
pub fn encode_geometry(geometry: &TileGeometry) -> (Vec<u32>, GeomType) {
    match geometry {
        TileGeometry::Points(points) => {
            let mut commands = Vec::with_capacity(1 + points.len() * 2);
            commands.push(command_encode(CMD_MOVE_TO, points.len() as u32));
            let mut cursor = Cursor::new();
            for &(x, y) in points {
                let (dx, dy) = cursor.delta(x, y);
                commands.push(dx);
                commands.push(dy);
            }
            (commands, GeomType::Point)
        }
        TileGeometry::Lines(lines) => {
            let mut commands = Vec::new();
            let mut cursor = Cursor::new();
            for line in lines {
                if line.len() < 2 {
                    continue;
                }
                let (dx, dy) = cursor.delta(line[0].0, line[0].1);
                commands.push(command_encode(CMD_MOVE_TO, 1));
                commands.push(dx);
                commands.push(dy);
                commands.push(command_encode(CMD_LINE_TO, (line.len() - 1) as u32));
                for &(x, y) in &line[1..] {
                    let (dx, dy) = cursor.delta(x, y);
                    commands.push(dx);
                    commands.push(dy);
                }
            }
            (commands, GeomType::Linestring)
        }
        TileGeometry::Polygons(polygons) => {
            let mut commands = Vec::new();
            let mut cursor = Cursor::new();
            for poly in polygons {
                encode_ring(&poly.exterior, &mut commands, &mut cursor);
                for interior in &poly.interiors {
                    encode_ring(interior, &mut commands, &mut cursor);
                }
            }
            (commands, GeomType::Polygon)
        }
    }
}

/// Encode one closed ring; the closing vertex is implied by ClosePath.
fn encode_ring(ring: &[(i32, i32)], commands: &mut Vec<u32>, cursor: &mut Cursor) {
    // 3 distinct vertices + closing point.
    if ring.len() < 4 {
        return;
    }
    let (dx, dy) = cursor.delta(ring[0].0, ring[0].1);
    commands.push(command_encode(CMD_MOVE_TO, 1));
    commands.push(dx);
    commands.push(dy);

    let line_to = &ring[1..ring.len() - 1];
    commands.push(command_encode(CMD_LINE_TO, line_to.len() as u32));
    for &(x, y) in line_to {
        let (dx, dy) = cursor.delta(x, y);
        commands.push(dx);
        commands.push(dy);
    }
    commands.push(command_encode(CMD_CLOSE_PATH, 1));
}

/// Builds one MVT layer, deduplicating keys and values across features.
///
/// Values are deduplicated by value equality, not identity: two features
/// sharing `"category" = "food"` reference the same dictionary entry.
pub struct LayerBuilder {
    name: String,
    extent: u32,
    features: Vec<vector_tile::Feature>,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<vector_tile::Value>,
    value_index: HashMap<String, u32>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extent: DEFAULT_EXTENT,
            features: Vec::new(),
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
        }
    }

    pub fn with_extent(mut self, extent: u32) -> Self {
        self.extent = extent;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    fn get_or_insert_key(&mut self, key: &str) -> u32 {
        if let Some(&idx) = self.key_index.get(key) {
            idx
        } else {
            let idx = self.keys.len() as u32;
            self.keys.push(key.to_string());
            self.key_index.insert(key.to_string(), idx);
            idx
        }
    }

    fn get_or_insert_value(&mut self, value: &PropertyValue) -> u32 {
        // Debug form as the dedup lookup key; value equality, not identity.
        let value_key = format!("{:?}", value);
        if let Some(&idx) = self.value_index.get(&value_key) {
            idx
        } else {
            let idx = self.values.len() as u32;
            self.values.push(value.to_mvt_value());
            self.value_index.insert(value_key, idx);
            idx
        }
    }

    /// Add one processed feature to the layer.
    pub fn add_feature(
        &mut self,
        id: Option<u64>,
        geometry: &TileGeometry,
        properties: &[(String, PropertyValue)],
    ) {
        let (commands, geom_type) = encode_geometry(geometry);
        if commands.is_empty() {
            return;
        }

        let mut tags = Vec::with_capacity(properties.len() * 2);
        for (key, value) in properties {
            let key_idx = self.get_or_insert_key(key);
            let value_idx = self.get_or_insert_value(value);
            tags.push(key_idx);
            tags.push(value_idx);
        }

        self.features.push(vector_tile::Feature {
            id,
            tags,
            r#type: Some(geom_type as i32),
            geometry: commands,
        });
    }

    pub fn build(self) -> vector_tile::Layer {
        vector_tile::Layer {
            version: 2,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values,
            extent: self.extent,
        }
    }

    /// Encode this single layer as a complete tile message.
    ///
    /// Returns an empty buffer for an empty layer: empty layers are omitted
    /// from tiles rather than encoded as zero-length layer messages.
    pub fn encode(self) -> Vec<u8> {
        if self.is_empty() {
            return Vec::new();
        }
        let tile = vector_tile::Tile {
            layers: vec![self.build()],
        };
        tile.encode_to_vec()
    }
}

/// Assembles layers into one tile; layer insertion order is rendering order.
#[derive(Default)]
pub struct TileBuilder {
    layers: Vec<vector_tile::Layer>,
}

impl TileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer; empty layers are skipped.
    pub fn add_layer(&mut self, layer: vector_tile::Layer) {
        if !layer.features.is_empty() {
            self.layers.push(layer);
        }
    }

    pub fn build(self) -> vector_tile::Tile {
        vector_tile::Tile {
            layers: self.layers,
        }
    }

    pub fn encode(self) -> Vec<u8> {
        let tile = self.build();
        if tile.layers.is_empty() {
            return Vec::new();
        }
        tile.encode_to_vec()
    }
}
