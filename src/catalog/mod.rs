//! Catalog of named transforms and their categories.

mod registry;

pub use registry::{CatalogBuilder, TransformCatalog, TransformInfo};
