//! In-memory collaborators.
//!
//! [`Montage`] holds tile geometry and match sets, loads them from YAML and
//! implements both [`CorrespondenceSource`](crate::solve::CorrespondenceSource)
//! and [`TileGeometrySource`](crate::solve::TileGeometrySource).
//!
//! ```rust,ignore
//! use setu_align::io::Montage;
//! use std::path::Path;
//!
//! let montage = Montage::load(Path::new("montage.yaml"))?;
//! ```

mod montage;

pub use montage::{Montage, MontageError};
