//! YAML montage: tiles plus match sets.
//!
//! ```yaml
//! tiles:
//!   r0c0: { width: 2048, height: 2048, z: 0 }
//!   r0c1:
//!     width: 2048
//!     height: 2048
//!     z: 0
//!     seed_transform: { m00: 1, m10: 0, m01: 0, m11: 1, m02: 1900, m12: 0 }
//! match_sets:
//!   - tile_a: r0c0
//!     tile_b: r0c1
//!     matches:
//!       - { p1: { x: 1950, y: 10 }, p2: { x: 50, y: 10 } }
//!       - { p1: { x: 1990, y: 900 }, p2: { x: 90, y: 900 }, weight: 0.5 }
//! ```
//!
//! Match sets are grouped by the layer of their first tile (the second tile
//! when the first is unknown); each layer is one layer group with id `"<z>"`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::PointMatch;
use crate::error::{Result, SolveError};
use crate::solve::{
    Correspondence, CorrespondenceSource, LayerGroup, TileGeometry, TileGeometrySource,
};

/// Montage load error
#[derive(Debug, thiserror::Error)]
pub enum MontageError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// YAML is malformed
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Tiles and match sets of a montage.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Montage {
    /// Geometry per tile id
    #[serde(default)]
    pub tiles: BTreeMap<String, TileGeometry>,

    /// Match sets between tile pairs
    #[serde(default)]
    pub match_sets: Vec<Correspondence>,
}

impl Montage {
    /// Empty montage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a montage from a YAML file
    pub fn load(path: &Path) -> std::result::Result<Self, MontageError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse from YAML string
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, MontageError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Write as YAML
    pub fn save(&self, path: &Path) -> std::result::Result<(), MontageError> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Add or replace a tile.
    pub fn add_tile(&mut self, tile_id: impl Into<String>, geometry: TileGeometry) -> &mut Self {
        self.tiles.insert(tile_id.into(), geometry);
        self
    }

    /// Add a match set; `p1` local to `tile_a`, `p2` local to `tile_b`.
    pub fn add_matches(
        &mut self,
        tile_a: impl Into<String>,
        tile_b: impl Into<String>,
        matches: Vec<PointMatch>,
    ) -> &mut Self {
        self.match_sets.push(Correspondence {
            tile_a: tile_a.into(),
            tile_b: tile_b.into(),
            matches,
        });
        self
    }

    /// Layers that have tiles.
    pub fn layers(&self) -> BTreeSet<i64> {
        self.tiles.values().map(|g| g.z).collect()
    }

    /// Total number of point matches.
    pub fn match_count(&self) -> usize {
        self.match_sets.iter().map(|s| s.matches.len()).sum()
    }

    fn group_z(&self, set: &Correspondence) -> Option<i64> {
        self.tiles
            .get(&set.tile_a)
            .or_else(|| self.tiles.get(&set.tile_b))
            .map(|g| g.z)
    }
}

impl CorrespondenceSource for Montage {
    fn layer_groups(&self) -> Vec<LayerGroup> {
        self.layers()
            .into_iter()
            .map(|z| LayerGroup {
                id: z.to_string(),
                z,
            })
            .collect()
    }

    fn correspondences(&self, layer_group_id: &str) -> Result<Vec<Correspondence>> {
        let z: i64 = layer_group_id
            .parse()
            .map_err(|_| SolveError::Source(format!("unknown layer group '{layer_group_id}'")))?;
        Ok(self
            .match_sets
            .iter()
            .filter(|set| self.group_z(set) == Some(z))
            .cloned()
            .collect())
    }
}

impl TileGeometrySource for Montage {
    fn tile_geometry(&self, tile_id: &str) -> Option<TileGeometry> {
        self.tiles.get(tile_id).copied()
    }
}
