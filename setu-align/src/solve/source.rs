//! Collaborator interfaces: where correspondences and tile geometry come from.

use serde::{Deserialize, Serialize};

use crate::core::{Affine2D, PointMatch};
use crate::error::Result;

/// Footprint, layer and current transform of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGeometry {
    /// Width in pixels
    pub width: f64,
    /// Height in pixels
    pub height: f64,
    /// Layer index
    pub z: i64,
    /// Current (approximate) local-to-world transform
    #[serde(default)]
    pub seed_transform: Affine2D,
}

/// Matches between two tiles.
///
/// `p1` points are local to `tile_a`, `p2` points local to `tile_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// First tile id
    pub tile_a: String,
    /// Second tile id
    pub tile_b: String,
    /// Point matches
    pub matches: Vec<PointMatch>,
}

/// A group of correspondences keyed by the layer of their first tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerGroup {
    /// Group id understood by [`CorrespondenceSource::correspondences`]
    pub id: String,
    /// Layer of the group's first tiles
    pub z: i64,
}

/// Supplier of point correspondences.
pub trait CorrespondenceSource: Send + Sync {
    /// All layer groups, in any order.
    fn layer_groups(&self) -> Vec<LayerGroup>;

    /// Correspondences whose first tile belongs to the given group.
    fn correspondences(&self, layer_group_id: &str) -> Result<Vec<Correspondence>>;
}

/// Supplier of tile geometry.
pub trait TileGeometrySource: Send + Sync {
    /// Geometry of a tile, `None` if the tile is unknown.
    fn tile_geometry(&self, tile_id: &str) -> Option<TileGeometry>;
}
