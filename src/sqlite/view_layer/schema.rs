//! Resolution of a view's field layout from the view itself and the table it
//! is defined over.

use crate::conversions::column_type_from_decl;
use crate::error::{Result, ViewError};
use crate::sql::sql_select_view_schema_probe;
use crate::sqlite::feature::FeatureReader;
use crate::sqlite::{LayerInfo, ViewSource};
use crate::types::{ColumnSpec, FeatureSchema, GeometryFieldDefn};

use super::ViewDefinition;

/// The table a view takes its geometry from, as far as the view layer needs it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnderlyingTable {
    pub(crate) table_name: String,
    pub(crate) geometry_column: String,
    /// Whether the catalog advertises a spatial index on `geometry_column`.
    pub(crate) advertises_spatial_index: bool,
}

#[derive(Debug)]
pub(crate) struct ResolvedView {
    pub(crate) schema: FeatureSchema,
    pub(crate) reader: FeatureReader,
    pub(crate) underlying: UnderlyingTable,
}

static UNRESOLVED: FeatureSchema = FeatureSchema {
    name: String::new(),
    fields: Vec::new(),
    geometry: None,
};

/// Lazily established schema of a view layer. `Failed` is terminal.
#[derive(Debug)]
pub(crate) enum SchemaState {
    Unresolved,
    Resolved(Box<ResolvedView>),
    Failed {
        reason: ViewError,
        placeholder: FeatureSchema,
    },
}

impl SchemaState {
    pub(crate) fn schema(&self) -> &FeatureSchema {
        match self {
            Self::Unresolved => &UNRESOLVED,
            Self::Resolved(view) => &view.schema,
            Self::Failed { placeholder, .. } => placeholder,
        }
    }

    pub(crate) fn resolved(&self) -> Option<&ResolvedView> {
        match self {
            Self::Resolved(view) => Some(view),
            _ => None,
        }
    }

    pub(crate) fn error(&self) -> Option<&ViewError> {
        match self {
            Self::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Look the underlying table up, preferring the `table(geometry_column)`
/// form so that a table with several geometry columns resolves to the right one.
pub(crate) fn find_underlying_layer(
    source: &dyn ViewSource,
    definition: &ViewDefinition,
) -> Result<Option<LayerInfo>> {
    if !definition.underlying_table.contains('(') {
        let qualified = format!(
            "{}({})",
            definition.underlying_table, definition.underlying_geometry_column
        );
        if let Some(layer) = source.find_layer(&qualified)? {
            return Ok(Some(layer));
        }
    }
    source.find_layer(&definition.underlying_table)
}

pub(crate) fn resolve(
    source: &dyn ViewSource,
    definition: &ViewDefinition,
) -> Result<ResolvedView> {
    let underlying = find_underlying_layer(source, definition)?.ok_or_else(|| {
        ViewError::UnderlyingLayerNotFound {
            view_name: definition.view_name.clone(),
            table_name: definition.underlying_table.clone(),
        }
    })?;
    if !underlying.is_physical_table() {
        return Err(ViewError::UnderlyingNotATable {
            view_name: definition.view_name.clone(),
            table_name: definition.underlying_table.clone(),
        });
    }

    let underlying_schema = underlying.schema();
    let geom_field_index = underlying_schema
        .geometry_field_index(&definition.underlying_geometry_column)
        .ok_or_else(|| ViewError::GeometryFieldMismatch {
            view_name: definition.view_name.clone(),
            table_name: definition.underlying_table.clone(),
            geometry_column: definition.underlying_geometry_column.clone(),
        })?;
    let source_geometry = underlying_schema
        .geometry_field(geom_field_index)
        .ok_or_else(|| ViewError::GeometryFieldMismatch {
            view_name: definition.view_name.clone(),
            table_name: definition.underlying_table.clone(),
            geometry_column: definition.underlying_geometry_column.clone(),
        })?;

    let columns = probe_view_columns(source, definition)?;
    let rowid_column = definition.rowid_column.as_deref();
    let first_column = usize::from(rowid_column.is_some());

    let mut fields = Vec::new();
    let mut properties = Vec::new();
    let mut geometry_column = None;
    for (idx, (name, declared_type)) in columns.into_iter().enumerate().skip(first_column) {
        if rowid_column == Some(name.as_str()) {
            continue;
        }
        if geometry_column.is_none() && name == definition.geometry_column {
            geometry_column = Some(idx);
            continue;
        }
        fields.push(ColumnSpec {
            name: name.clone(),
            column_type: column_type_from_decl(declared_type.as_deref()),
        });
        properties.push((idx, name));
    }

    // The view cannot know these on its own; they come from the table.
    let geometry = geometry_column.map(|_| GeometryFieldDefn {
        name: definition.geometry_column.clone(),
        geometry_type: source_geometry.geometry_type,
        dimension: source_geometry.dimension,
        srid: source_geometry.srid,
        format: source_geometry.format,
    });

    let reader = FeatureReader::new(
        rowid_column.map(|_| 0),
        geometry_column,
        properties,
        source_geometry.format,
    );

    Ok(ResolvedView {
        schema: FeatureSchema {
            name: definition.view_name.clone(),
            fields,
            geometry,
        },
        reader,
        underlying: UnderlyingTable {
            table_name: definition.underlying_table.clone(),
            geometry_column: definition.underlying_geometry_column.clone(),
            advertises_spatial_index: underlying.has_spatial_index(geom_field_index),
        },
    })
}

/// Names and declared types of the columns the view's cursor query returns.
fn probe_view_columns(
    source: &dyn ViewSource,
    definition: &ViewDefinition,
) -> Result<Vec<(String, Option<String>)>> {
    let sql =
        sql_select_view_schema_probe(&definition.view_name, definition.rowid_column.as_deref());
    tracing::debug!(sql = %sql, "probing view columns");

    let mut stmt = source
        .connection()
        .prepare(&sql)
        .map_err(|err| ViewError::prepare(&sql, err))?;
    {
        let mut rows = stmt.query([]).map_err(|err| ViewError::prepare(&sql, err))?;
        rows.next().map_err(|err| ViewError::prepare(&sql, err))?;
    }

    Ok(stmt
        .columns()
        .iter()
        .map(|column| {
            (
                column.name().to_string(),
                column.decl_type().map(str::to_string),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{SchemaState, resolve};
    use crate::error::ViewError;
    use crate::sqlite::SpatialDb;
    use crate::sqlite::view_layer::ViewDefinition;
    use crate::types::{ColumnSpec, ColumnType, GeometryFieldDefn, GeometryFormat};
    use wkb::reader::{Dimension, GeometryType};

    fn definition(underlying_table: &str) -> ViewDefinition {
        ViewDefinition {
            view_name: "v1".to_string(),
            rowid_column: Some("fid".to_string()),
            geometry_column: "geom".to_string(),
            underlying_table: underlying_table.to_string(),
            underlying_geometry_column: "geom".to_string(),
        }
    }

    fn setup() -> crate::Result<SpatialDb> {
        let db = SpatialDb::new_in_memory()?;
        let geometry = GeometryFieldDefn {
            name: "geom".to_string(),
            geometry_type: Some(GeometryType::Polygon),
            dimension: Dimension::Xyz,
            srid: 3857,
            format: GeometryFormat::Wkb,
        };
        let columns = vec![
            ColumnSpec {
                name: "name".to_string(),
                column_type: ColumnType::Varchar,
            },
            ColumnSpec {
                name: "pop".to_string(),
                column_type: ColumnType::Integer,
            },
        ];
        db.create_table_layer("t1", &geometry, &columns)?;
        Ok(db)
    }

    #[test]
    fn copies_geometry_metadata_from_table() -> crate::Result<()> {
        let db = setup()?;
        db.connection().execute_batch(
            "CREATE VIEW v1 AS SELECT fid, geom, name, pop * 2 AS double_pop FROM t1",
        )?;

        let view = resolve(&db, &definition("t1"))?;
        let geometry = view.schema.geometry.expect("geometry field");
        assert_eq!(geometry.name, "geom");
        assert_eq!(geometry.geometry_type, Some(GeometryType::Polygon));
        assert_eq!(geometry.dimension, Dimension::Xyz);
        assert_eq!(geometry.srid, 3857);
        assert_eq!(geometry.format, GeometryFormat::Wkb);

        let names: Vec<&str> = view.schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "double_pop"]);
        assert_eq!(view.schema.fields[0].column_type, ColumnType::Varchar);
        assert_eq!(view.underlying.table_name, "t1");
        assert!(!view.underlying.advertises_spatial_index);
        Ok(())
    }

    #[test]
    fn reports_missing_underlying_table() -> crate::Result<()> {
        let db = setup()?;
        db.connection()
            .execute_batch("CREATE VIEW v1 AS SELECT fid, geom FROM t1")?;

        let err = resolve(&db, &definition("nope")).expect_err("missing table");
        assert!(matches!(err, ViewError::UnderlyingLayerNotFound { .. }));
        Ok(())
    }

    #[test]
    fn rejects_view_over_view() -> crate::Result<()> {
        let db = setup()?;
        db.connection().execute_batch(
            "CREATE VIEW v0 AS SELECT fid, geom FROM t1; CREATE VIEW v1 AS SELECT fid, geom FROM v0",
        )?;

        let err = resolve(&db, &definition("v0")).expect_err("view over view");
        assert!(matches!(err, ViewError::UnderlyingNotATable { .. }));
        Ok(())
    }

    #[test]
    fn rejects_unknown_underlying_geometry_column() -> crate::Result<()> {
        let db = setup()?;
        db.connection()
            .execute_batch("CREATE VIEW v1 AS SELECT fid, geom FROM t1")?;

        let mut definition = definition("t1");
        definition.underlying_geometry_column = "shape".to_string();
        let err = resolve(&db, &definition).expect_err("wrong geometry column");
        assert!(matches!(err, ViewError::GeometryFieldMismatch { .. }));
        Ok(())
    }

    #[test]
    fn reports_broken_view_sql() -> crate::Result<()> {
        let db = setup()?;
        let err = resolve(&db, &definition("t1")).expect_err("view does not exist");
        assert!(matches!(err, ViewError::StatementPrepare { .. }));
        Ok(())
    }

    #[test]
    fn failed_state_exposes_placeholder() {
        let state = SchemaState::Failed {
            reason: ViewError::Message("boom".to_string()),
            placeholder: crate::types::FeatureSchema::empty("v1"),
        };
        assert!(state.schema().is_empty());
        assert_eq!(state.schema().name, "v1");
        assert!(state.error().is_some());
        assert!(state.resolved().is_none());
    }
}
