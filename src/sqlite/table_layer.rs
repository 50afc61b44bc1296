use crate::error::Result;
use crate::sql::{
    SQL_ENABLE_SPATIAL_INDEX, escape_identifier, execute_rtree_sqls, sql_insert_feature,
};
use crate::types::{ColumnSpec, GeometryFieldDefn};
use geo_traits::GeometryTrait;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

use super::SpatialDb;
use super::feature::encode_geometry;

/// A physical table layer: the kind of table spatial views are defined over.
#[derive(Debug)]
pub struct TableLayer<'a> {
    pub(super) db: &'a SpatialDb,
    pub table_name: String,
    pub geometry: GeometryFieldDefn,
    pub property_columns: Vec<ColumnSpec>,
    insert_sql: String,
}

impl<'a> TableLayer<'a> {
    pub(super) fn new(
        db: &'a SpatialDb,
        table_name: &str,
        geometry: GeometryFieldDefn,
        property_columns: Vec<ColumnSpec>,
    ) -> Self {
        let insert_sql = Self::build_insert_sql(table_name, &geometry.name, &property_columns);
        Self {
            db,
            table_name: table_name.to_string(),
            geometry,
            property_columns,
            insert_sql,
        }
    }

    /// Insert a feature with an optional geometry and ordered property values.
    /// Returns the new feature id.
    ///
    /// Example:
    /// ```no_run
    /// use geo_types::Point;
    /// use rusqlite_spatial_view::{ColumnSpec, ColumnType, Dimension, GeometryFieldDefn,
    ///     GeometryFormat, GeometryType, SpatialDb, Value};
    ///
    /// let db = SpatialDb::new_in_memory()?;
    /// let geometry = GeometryFieldDefn {
    ///     name: "geom".to_string(),
    ///     geometry_type: Some(GeometryType::Point),
    ///     dimension: Dimension::Xy,
    ///     srid: 4326,
    ///     format: GeometryFormat::GeoPackage,
    /// };
    /// let columns = vec![ColumnSpec {
    ///     name: "name".to_string(),
    ///     column_type: ColumnType::Varchar,
    /// }];
    /// let layer = db.create_table_layer("points", &geometry, &columns)?;
    /// layer.insert(Some(Point::new(1.0, 2.0)), [Value::from("alpha".to_string())])?;
    /// # Ok::<(), rusqlite_spatial_view::ViewError>(())
    /// ```
    pub fn insert<G, P>(&self, geometry: Option<G>, properties: P) -> Result<i64>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        self.db.ensure_writable()?;

        let geom = match geometry {
            Some(geometry) => Value::Blob(encode_geometry(
                &geometry,
                self.geometry.format,
                self.geometry.srid,
            )?),
            None => Value::Null,
        };
        let params = std::iter::once(geom).chain(properties);

        let conn = self.db.connection();
        let mut stmt = conn.prepare_cached(&self.insert_sql)?;
        stmt.execute(params_from_iter(params))?;
        Ok(conn.last_insert_rowid())
    }

    /// Build the `idx_<table>_<geometry>` R*Tree index, fill it from the
    /// existing rows, and keep it in sync with triggers.
    pub fn create_spatial_index(&self) -> Result<()> {
        self.db.ensure_writable()?;

        let conn = self.db.connection();
        execute_rtree_sqls(conn, &self.table_name, &self.geometry.name)?;
        conn.execute(
            SQL_ENABLE_SPATIAL_INDEX,
            rusqlite::params![self.table_name, self.geometry.name],
        )?;
        Ok(())
    }

    fn build_insert_sql(
        table_name: &str,
        geometry_column: &str,
        property_columns: &[ColumnSpec],
    ) -> String {
        let mut columns = Vec::with_capacity(property_columns.len() + 1);
        columns.push(format!(r#""{}""#, escape_identifier(geometry_column)));
        columns.extend(
            property_columns
                .iter()
                .map(|spec| format!(r#""{}""#, escape_identifier(&spec.name))),
        );

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<String>>()
            .join(",");

        sql_insert_feature(table_name, &columns.join(","), &placeholders)
    }
}
