//! Read-only spatial view layers over SQLite, built on top of rusqlite.
//!
//! ## Overview
//!
//! - `SpatialDb` is a SQLite database with a small spatial catalog
//!   (`geometry_columns` and `views_geometry_columns`).
//! - `TableLayer` is a physical table with one geometry column, optionally
//!   indexed by an R*Tree named `idx_<table>_<geometry_column>`.
//! - `ViewLayer` reads a SQL view whose geometry is taken unchanged from a
//!   geometry column of such a table.
//! - `Feature` is a single row: id, geometry blob and property `Value`s.
//!
//! A view layer resolves its schema lazily from the view and the underlying
//! table. Attribute filters are plain SQL expressions placed in the `WHERE`
//! clause. Spatial filters use the underlying table's spatial index when the
//! view exposes the table's rowid, fall back to the `ST_EnvIntersects` SQL
//! function otherwise, and are always checked again on the rows read.
//!
//! ## Short usage
//!
//! ```no_run
//! use geo_types::Point;
//! use rusqlite_spatial_view::{
//!     ColumnSpec, ColumnType, Dimension, GeometryFieldDefn, GeometryFormat, GeometryType,
//!     SpatialDb, Value,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = SpatialDb::open("data.sqlite")?;
//!
//!     let geometry = GeometryFieldDefn {
//!         name: "geom".to_string(),
//!         geometry_type: Some(GeometryType::Point),
//!         dimension: Dimension::Xy,
//!         srid: 4326,
//!         format: GeometryFormat::GeoPackage,
//!     };
//!     let columns = vec![ColumnSpec {
//!         name: "name".to_string(),
//!         column_type: ColumnType::Varchar,
//!     }];
//!     let table = db.create_table_layer("places", &geometry, &columns)?;
//!     table.insert(Some(Point::new(1.0, 2.0)), [Value::from("alpha".to_string())])?;
//!     table.create_spatial_index()?;
//!
//!     db.create_spatial_view(
//!         "named_places",
//!         "SELECT fid, geom, upper(name) AS label FROM places WHERE name IS NOT NULL",
//!         "geom",
//!         Some("fid"),
//!         "places",
//!         "geom",
//!     )?;
//!
//!     let mut layer = db.open_view("named_places")?;
//!     layer.set_spatial_filter_rect(0, 0.0, 0.0, 10.0, 10.0);
//!     layer.set_attribute_filter(Some("label LIKE 'A%'"));
//!     assert!(layer.test_capability("FastSpatialFilter"));
//!
//!     while let Some(feature) = layer.next_feature()? {
//!         println!("{} {:?}", feature.id(), feature.property("label"));
//!     }
//!     println!("{} features", layer.feature_count(true));
//!     Ok(())
//! }
//! ```
//!
//! Diagnostics (the SQL run by view layers, swallowed catalog failures) are
//! emitted through `tracing`; install a subscriber to see them.
mod conversions;
mod error;
mod sql;
mod sql_functions;
mod sqlite;
mod types;

pub use error::{Result, ViewError};
pub use sql::{escape_identifier, escape_literal, spatial_index_name};
pub use sql_functions::register_spatial_functions;
pub use sqlite::{
    DbOptions, Feature, LayerInfo, LayerKind, SpatialDb, SpatialIndexState, TableLayer,
    ViewDefinition, ViewFeatures, ViewLayer, ViewSource,
};
pub use types::{
    Capability, ColumnSpec, ColumnType, Envelope, FeatureSchema, GeometryFieldDefn,
    GeometryFormat,
};

// Re-export types used in public fields to keep the public API stable.
pub use rusqlite::types::Value;
pub use wkb::reader::{Dimension, GeometryType};
