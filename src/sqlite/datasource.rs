use crate::conversions::{
    column_type_from_decl, column_type_to_str, dimension_from_zm, dimension_to_zm,
    geometry_format_from_str, geometry_format_to_str, geometry_type_from_str,
    geometry_type_to_str,
};
use crate::error::{Result, ViewError};
use crate::sql::{
    SQL_INSERT_GEOMETRY_COLUMNS, SQL_INSERT_VIEWS_GEOMETRY_COLUMNS, SQL_LIST_TABLE_LAYERS,
    SQL_LIST_VIEW_LAYERS, SQL_SELECT_GEOMETRY_COLUMN_META, SQL_SELECT_OBJECT_TYPE,
    SQL_SELECT_VIEW_DEFINITION, escape_identifier, initialize_catalog, sql_create_table,
    sql_create_view, sql_table_columns,
};
use crate::sql_functions::register_spatial_functions;
use crate::types::{ColumnSpec, FeatureSchema, GeometryFieldDefn};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;

use super::table_layer::TableLayer;
use super::view_layer::{ViewDefinition, ViewLayer};

/// Options applied when a [`SpatialDb`] is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbOptions {
    /// Open without write access. The catalog is not created in this mode.
    pub read_only: bool,
    /// Register the `ST_*` SQL functions on the connection. Without them view
    /// layers cannot push a bounding-box filter down and spatial indexes
    /// cannot be built.
    pub spatial_functions: bool,
    /// Number of rows a view cursor fetches per round trip.
    pub cursor_page_size: u32,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            spatial_functions: true,
            cursor_page_size: 256,
        }
    }
}

/// Whether a registered layer is a stored table or a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Table,
    View,
}

/// Snapshot of a layer found in the datasource's registry.
///
/// View layers keep this around instead of a reference to the layer itself;
/// the layer belongs to the datasource.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    name: String,
    table_name: String,
    kind: LayerKind,
    schema: FeatureSchema,
    spatial_index: bool,
}

impl LayerInfo {
    pub fn new(
        name: &str,
        table_name: &str,
        kind: LayerKind,
        schema: FeatureSchema,
        spatial_index: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            table_name: table_name.to_string(),
            kind,
            schema,
            spatial_index,
        }
    }

    /// Layer name, `table` or `table(geometry_column)`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn is_physical_table(&self) -> bool {
        self.kind == LayerKind::Table
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Whether the catalog advertises a spatial index for the geometry field.
    pub fn has_spatial_index(&self, geom_field_index: usize) -> bool {
        self.spatial_index && self.schema.geometry_field(geom_field_index).is_some()
    }
}

/// What a view layer needs from the datasource that owns it.
pub trait ViewSource {
    fn connection(&self) -> &Connection;

    /// Find a layer by name. `table(geometry_column)` selects one geometry
    /// column of a table that has several.
    fn find_layer(&self, name: &str) -> Result<Option<LayerInfo>>;

    /// Whether `ST_EnvIntersects` and friends can be used in queries.
    fn spatial_functions_available(&self) -> bool;
}

/// SQLite connection wrapper holding spatial tables and the views defined over them.
#[derive(Debug)]
pub struct SpatialDb {
    conn: Connection,
    options: DbOptions,
}

impl SpatialDb {
    /// Open a database in read-only mode.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(
            path,
            DbOptions {
                read_only: true,
                ..Default::default()
            },
        )
    }

    /// Open an existing database in read-write mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, DbOptions::default())
    }

    /// Open an existing database with explicit options.
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: DbOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ViewError::Message(format!(
                "database file does not exist: {}",
                path.display()
            )));
        }

        let flags = if options.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::default()
        };
        let conn = Connection::open_with_flags(path, flags)?;
        Self::from_connection(conn, options)
    }

    /// Create a new database in memory.
    pub fn new_in_memory() -> Result<Self> {
        Self::new_in_memory_with_options(DbOptions::default())
    }

    pub fn new_in_memory_with_options(options: DbOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(
            conn,
            DbOptions {
                read_only: false,
                ..options
            },
        )
    }

    fn from_connection(conn: Connection, options: DbOptions) -> Result<Self> {
        if !options.read_only {
            initialize_catalog(&conn)?;
        }
        if options.spatial_functions {
            register_spatial_functions(&conn)?;
        }
        Ok(Self { conn, options })
    }

    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    /// List the names of the table layers, then of the spatial views.
    ///
    /// A table with several geometry columns is listed once per column as
    /// `table(geometry_column)`.
    pub fn list_layers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(SQL_LIST_TABLE_LAYERS)?;
        let tables = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

        let mut layers = Vec::with_capacity(tables.len());
        for (table, geometry_column) in &tables {
            let shared = tables.iter().filter(|(t, _)| t == table).count() > 1;
            if shared {
                layers.push(format!("{table}({geometry_column})"));
            } else {
                layers.push(table.clone());
            }
        }

        let mut stmt = self.conn.prepare(SQL_LIST_VIEW_LAYERS)?;
        let views = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        layers.extend(views);

        Ok(layers)
    }

    /// Create a table with an `fid` primary key, the geometry column and the
    /// given property columns, and register it in `geometry_columns`.
    pub fn create_table_layer<'a>(
        &'a self,
        layer_name: &str,
        geometry: &GeometryFieldDefn,
        property_columns: &[ColumnSpec],
    ) -> Result<TableLayer<'a>> {
        self.ensure_writable()?;
        if self.object_type(layer_name)?.is_some() {
            return Err(ViewError::LayerAlreadyExists {
                layer_name: layer_name.to_string(),
            });
        }

        let mut column_defs = Vec::with_capacity(property_columns.len() + 2);
        column_defs.push("fid INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        column_defs.push(format!(
            r#""{}" {}"#,
            escape_identifier(&geometry.name),
            geometry_type_to_str(geometry.geometry_type)
        ));
        for spec in property_columns {
            let col_type = column_type_to_str(spec.column_type);
            column_defs.push(format!(r#""{}" {col_type}"#, escape_identifier(&spec.name)));
        }

        let create_sql = sql_create_table(layer_name, &column_defs.join(", "));
        self.conn.execute_batch(&create_sql)?;

        let (z, m) = dimension_to_zm(geometry.dimension);
        self.conn.execute(
            SQL_INSERT_GEOMETRY_COLUMNS,
            rusqlite::params![
                layer_name,
                geometry.name,
                geometry_type_to_str(geometry.geometry_type),
                z,
                m,
                geometry.srid,
                geometry_format_to_str(geometry.format),
            ],
        )?;

        Ok(TableLayer::new(
            self,
            layer_name,
            geometry.clone(),
            property_columns.to_vec(),
        ))
    }

    /// Create a view and register it as a spatial view whose geometry column
    /// `view_geometry` comes from `underlying_table.underlying_geometry`.
    ///
    /// `view_rowid` names the view column carrying the underlying table's
    /// rowid. Without it, features are numbered by their position and the
    /// spatial index of the underlying table cannot be used.
    pub fn create_spatial_view(
        &self,
        view_name: &str,
        select_sql: &str,
        view_geometry: &str,
        view_rowid: Option<&str>,
        underlying_table: &str,
        underlying_geometry: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        if self.object_type(view_name)?.is_some() {
            return Err(ViewError::LayerAlreadyExists {
                layer_name: view_name.to_string(),
            });
        }

        self.conn
            .execute_batch(&sql_create_view(view_name, select_sql))?;
        self.conn.execute(
            SQL_INSERT_VIEWS_GEOMETRY_COLUMNS,
            rusqlite::params![
                view_name,
                view_geometry,
                view_rowid,
                underlying_table,
                underlying_geometry
            ],
        )?;
        Ok(())
    }

    /// Open a registered spatial view as a layer.
    ///
    /// The view's schema is resolved lazily, on first use.
    pub fn open_view<'a>(&'a self, view_name: &str) -> Result<ViewLayer<'a>> {
        let definition = self
            .conn
            .query_row(SQL_SELECT_VIEW_DEFINITION, [view_name], |row| {
                Ok(ViewDefinition {
                    view_name: view_name.to_string(),
                    geometry_column: row.get(0)?,
                    rowid_column: row.get(1)?,
                    underlying_table: row.get(2)?,
                    underlying_geometry_column: row.get(3)?,
                })
            })
            .optional()?
            .ok_or_else(|| ViewError::ViewNotFound {
                view_name: view_name.to_string(),
            })?;

        Ok(ViewLayer::new(self, definition).with_page_size(self.options.cursor_page_size))
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.options.read_only {
            return Err(ViewError::ReadOnly);
        }
        Ok(())
    }

    /// `table` or `view` as recorded in `sqlite_master`.
    fn object_type(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(SQL_SELECT_OBJECT_TYPE, [name], |row| row.get(0))
            .optional()?)
    }

    /// Resolve the geometry columns registered for a table.
    fn geometry_columns(&self, table_name: &str) -> Result<Vec<(GeometryFieldDefn, bool)>> {
        let mut stmt = self.conn.prepare(SQL_SELECT_GEOMETRY_COLUMN_META)?;
        let rows = stmt
            .query_map([table_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i8>(2)?,
                    row.get::<_, i8>(3)?,
                    row.get::<_, i32>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, geometry_type, z, m, srid, format, spatial_index)| {
                let defn = GeometryFieldDefn {
                    name,
                    geometry_type: geometry_type_from_str(&geometry_type)?,
                    dimension: dimension_from_zm(z, m)?,
                    srid,
                    format: geometry_format_from_str(&format)?,
                };
                Ok((defn, spatial_index != 0))
            })
            .collect()
    }

    /// Build the field layout of a table or view. `geometry` is taken out of
    /// the attribute fields; an integer primary key is the feature id.
    fn layer_schema(
        &self,
        layer_name: &str,
        table_name: &str,
        geometry: Option<GeometryFieldDefn>,
    ) -> Result<FeatureSchema> {
        let mut stmt = self.conn.prepare(&sql_table_columns(table_name))?;
        let columns = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i32>(2)? != 0,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let fields = columns
            .into_iter()
            .filter(|(name, declared_type, primary_key)| {
                let is_geometry = geometry.as_ref().is_some_and(|g| &g.name == name);
                let is_fid = *primary_key
                    && declared_type
                        .as_deref()
                        .is_some_and(|t| t.eq_ignore_ascii_case("INTEGER"));
                !is_geometry && !is_fid
            })
            .map(|(name, declared_type, _)| ColumnSpec {
                name,
                column_type: column_type_from_decl(declared_type.as_deref()),
            })
            .collect();

        Ok(FeatureSchema {
            name: layer_name.to_string(),
            fields,
            geometry,
        })
    }
}

/// Split `table(geometry_column)` into its parts.
fn split_qualified_name(name: &str) -> (&str, Option<&str>) {
    if let Some(stripped) = name.strip_suffix(')') {
        if let Some((table, geometry_column)) = stripped.split_once('(') {
            return (table, Some(geometry_column));
        }
    }
    (name, None)
}

impl ViewSource for SpatialDb {
    fn connection(&self) -> &Connection {
        &self.conn
    }

    fn find_layer(&self, name: &str) -> Result<Option<LayerInfo>> {
        let (table_name, qualifier) = split_qualified_name(name);
        let object_type = match self.object_type(table_name)? {
            Some(object_type) => object_type,
            None => return Ok(None),
        };

        if object_type == "view" {
            let schema = self.layer_schema(name, table_name, None)?;
            return Ok(Some(LayerInfo::new(
                name,
                table_name,
                LayerKind::View,
                schema,
                false,
            )));
        }

        let mut geometry_columns = self.geometry_columns(table_name)?;
        let selected = match qualifier {
            Some(qualifier) => {
                match geometry_columns.iter().position(|(g, _)| g.name == qualifier) {
                    Some(idx) => Some(geometry_columns.swap_remove(idx)),
                    None => return Ok(None),
                }
            }
            // The plain name is ambiguous when the table has several geometry columns.
            None if geometry_columns.len() > 1 => return Ok(None),
            None => geometry_columns.pop(),
        };

        let (geometry, spatial_index) = match selected {
            Some((geometry, spatial_index)) => (Some(geometry), spatial_index),
            None => (None, false),
        };
        let schema = self.layer_schema(name, table_name, geometry)?;

        Ok(Some(LayerInfo::new(
            name,
            table_name,
            LayerKind::Table,
            schema,
            spatial_index,
        )))
    }

    fn spatial_functions_available(&self) -> bool {
        self.options.spatial_functions
    }
}
