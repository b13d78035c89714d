//! Tile graph and connectivity analysis.
//!
//! ```text
//! ┌──────────────┐   connect(a, b, matches)   ┌──────────────┐
//! │  TileNode a  │ ─────────────────────────▶ │  TileNode b  │
//! │ model, links │ ◀───── flipped matches ─── │ model, links │
//! └──────────────┘                            └──────────────┘
//!          │
//!          ▼
//!   identify_connected_components → Vec<component>
//!   is_cyclic(component)           → optimize or pre-align only
//! ```

mod connectivity;
mod tile_graph;

pub use connectivity::{identify_connected_components, is_cyclic};
pub use tile_graph::{TileGraph, TileLink, TileNode};
