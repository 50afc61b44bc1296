//! SQLite datasource holding spatial tables and the views defined over them.

mod datasource;
mod feature;
mod table_layer;
mod view_layer;

pub use datasource::{DbOptions, LayerInfo, LayerKind, SpatialDb, ViewSource};
pub use feature::Feature;
pub use table_layer::TableLayer;
pub use view_layer::{SpatialIndexState, ViewDefinition, ViewFeatures, ViewLayer};

pub(crate) use feature::{geometry_blob_to_wkb, wkb_to_gpkg_geometry};
