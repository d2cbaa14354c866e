//! Tile composition.
//!
//! An MVT tile message is a sequence of repeated `layers` fields, so two
//! independently encoded single-layer tiles concatenate into one valid
//! multi-layer tile without re-encoding. This lets per-layer sub-results
//! be cached and composed byte-wise.

/// Concatenate independently encoded layer tiles into one tile.
///
/// Empty buffers (hidden or featureless layers) are skipped. An all-empty
/// input yields an empty buffer, which is the valid empty tile.
pub fn compose(layer_tiles: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = layer_tiles.iter().map(|t| t.len()).sum();
    let mut out = Vec::with_capacity(total);
    for tile in layer_tiles {
        out.extend_from_slice(tile);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TileGeometry;
    use crate::mvt::LayerBuilder;
    use crate::vector_tile::Tile;
    use prost::Message;

    fn layer_bytes(name: &str, id: u64) -> Vec<u8> {
        let mut builder = LayerBuilder::new(name);
        builder.add_feature(Some(id), &TileGeometry::Points(vec![(10, 10)]), &[]);
        builder.encode()
    }

    #[test]
    fn concatenation_merges_layers() {
        let composite = compose(&[layer_bytes("poi", 1), layer_bytes("stations", 2)]);
        let tile = Tile::decode(composite.as_slice()).unwrap();
        assert_eq!(tile.layers.len(), 2);
        assert_eq!(tile.layers[0].name, "poi");
        assert_eq!(tile.layers[1].name, "stations");
    }

    #[test]
    fn empty_buffers_are_skipped() {
        let composite = compose(&[Vec::new(), layer_bytes("water", 7), Vec::new()]);
        let tile = Tile::decode(composite.as_slice()).unwrap();
        assert_eq!(tile.layers.len(), 1);
        assert_eq!(tile.layers[0].name, "water");
    }

    #[test]
    fn all_empty_yields_empty_tile() {
        let composite = compose(&[Vec::new(), Vec::new()]);
        assert!(composite.is_empty());
        let tile = Tile::decode(composite.as_slice()).unwrap();
        assert!(tile.layers.is_empty());
    }
}
