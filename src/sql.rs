use crate::types::Envelope;

// Spatial catalog. The layout follows SpatiaLite's `geometry_columns` and
// `views_geometry_columns`, with geometry types stored by name the way
// GeoPackage does.

// geometry_columns: one row per geometry column of a physical table.
pub(crate) const SQL_GEOMETRY_COLUMNS: &str = "
CREATE TABLE IF NOT EXISTS geometry_columns (
  f_table_name TEXT NOT NULL,
  f_geometry_column TEXT NOT NULL,
  geometry_type TEXT NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  srid INTEGER NOT NULL,
  geometry_format TEXT NOT NULL DEFAULT 'GPKG',
  spatial_index_enabled INTEGER NOT NULL DEFAULT 0,
  CONSTRAINT pk_geom_cols PRIMARY KEY (f_table_name, f_geometry_column)
);
";

// views_geometry_columns: one row per spatial view, pointing at the table
// geometry column the view's geometry is taken from.
pub(crate) const SQL_VIEWS_GEOMETRY_COLUMNS: &str = "
CREATE TABLE IF NOT EXISTS views_geometry_columns (
  view_name TEXT NOT NULL,
  view_geometry TEXT NOT NULL,
  view_rowid TEXT,
  f_table_name TEXT NOT NULL,
  f_geometry_column TEXT NOT NULL,
  CONSTRAINT pk_geom_cols_views PRIMARY KEY (view_name, view_geometry)
);
";

pub(crate) const SQL_LIST_TABLE_LAYERS: &str = "
SELECT f_table_name, f_geometry_column
FROM geometry_columns
ORDER BY f_table_name, f_geometry_column
";

pub(crate) const SQL_LIST_VIEW_LAYERS: &str =
    "SELECT view_name FROM views_geometry_columns ORDER BY view_name";

pub(crate) const SQL_SELECT_GEOMETRY_COLUMN_META: &str = "
SELECT f_geometry_column, geometry_type, z, m, srid, geometry_format, spatial_index_enabled
FROM geometry_columns
WHERE f_table_name = ?1
ORDER BY f_geometry_column
";

pub(crate) const SQL_SELECT_VIEW_DEFINITION: &str = "
SELECT view_geometry, view_rowid, f_table_name, f_geometry_column
FROM views_geometry_columns
WHERE view_name = ?1
";

pub(crate) const SQL_SELECT_OBJECT_TYPE: &str =
    "SELECT type FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')";

pub(crate) const SQL_INSERT_GEOMETRY_COLUMNS: &str = "
INSERT INTO geometry_columns
  (f_table_name, f_geometry_column, geometry_type, z, m, srid, geometry_format)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7)
";

pub(crate) const SQL_INSERT_VIEWS_GEOMETRY_COLUMNS: &str = "
INSERT INTO views_geometry_columns
  (view_name, view_geometry, view_rowid, f_table_name, f_geometry_column)
VALUES
  (?1, ?2, ?3, ?4, ?5)
";

pub(crate) const SQL_ENABLE_SPATIAL_INDEX: &str = "
UPDATE geometry_columns SET spatial_index_enabled = 1
WHERE f_table_name = ?1 AND f_geometry_column = ?2
";

pub(crate) fn initialize_catalog(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SQL_GEOMETRY_COLUMNS)?;
    conn.execute_batch(SQL_VIEWS_GEOMETRY_COLUMNS)?;
    Ok(())
}

/// Escape a value for use inside a single-quoted SQL literal.
pub fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Escape a name for use inside a double-quoted SQL identifier.
pub fn escape_identifier(s: &str) -> String {
    s.replace('"', "\"\"")
}

/// Name of the R*Tree table indexing `table.geom_column`.
pub fn spatial_index_name(table: &str, geom_column: &str) -> String {
    format!("idx_{table}_{geom_column}")
}

pub(crate) fn sql_create_table(layer_name: &str, column_defs: &str) -> String {
    format!(
        r#"CREATE TABLE "{}" ({})"#,
        escape_identifier(layer_name),
        column_defs
    )
}

pub(crate) fn sql_create_view(view_name: &str, select_sql: &str) -> String {
    format!(
        r#"CREATE VIEW "{}" AS {}"#,
        escape_identifier(view_name),
        select_sql
    )
}

pub(crate) fn sql_table_columns(layer_name: &str) -> String {
    format!(
        "SELECT name, type, pk FROM pragma_table_info('{}')",
        escape_literal(layer_name)
    )
}

pub(crate) fn sql_insert_feature(layer_name: &str, columns: &str, values: &str) -> String {
    format!(
        r#"INSERT INTO "{}" ({}) VALUES ({})"#,
        escape_identifier(layer_name),
        columns,
        values
    )
}

// cf. https://www.gaia-gis.it/gaia-sins/spatialite-cookbook/html/rtree.html
pub(crate) fn rtree_create_sql(table: &str, geom_column: &str) -> String {
    format!(
        r#"CREATE VIRTUAL TABLE "{}" USING rtree(pkid, xmin, xmax, ymin, ymax);"#,
        escape_identifier(&spatial_index_name(table, geom_column)),
    )
}

pub(crate) fn rtree_load_sql(table: &str, geom_column: &str) -> String {
    format!(
        r#"INSERT OR REPLACE INTO "{x}"
  SELECT rowid, ST_MinX("{c}"), ST_MaxX("{c}"), ST_MinY("{c}"), ST_MaxY("{c}")
  FROM "{t}" WHERE "{c}" NOT NULL AND NOT ST_IsEmpty("{c}");"#,
        x = escape_identifier(&spatial_index_name(table, geom_column)),
        t = escape_identifier(table),
        c = escape_identifier(geom_column),
    )
}

pub(crate) fn rtree_triggers_sql(table: &str, geom_column: &str) -> String {
    let index = spatial_index_name(table, geom_column);
    format!(
        r#"CREATE TRIGGER "{x}_insert" AFTER INSERT ON "{t}"
  WHEN (NEW."{c}" NOT NULL AND NOT ST_IsEmpty(NEW."{c}"))
BEGIN
  INSERT OR REPLACE INTO "{x}" VALUES (
    NEW.rowid,
    ST_MinX(NEW."{c}"), ST_MaxX(NEW."{c}"),
    ST_MinY(NEW."{c}"), ST_MaxY(NEW."{c}")
  );
END;

CREATE TRIGGER "{x}_update" AFTER UPDATE ON "{t}"
BEGIN
  DELETE FROM "{x}" WHERE pkid = OLD.rowid;
  INSERT OR REPLACE INTO "{x}"
    SELECT NEW.rowid,
      ST_MinX(NEW."{c}"), ST_MaxX(NEW."{c}"),
      ST_MinY(NEW."{c}"), ST_MaxY(NEW."{c}")
    WHERE NEW."{c}" NOT NULL AND NOT ST_IsEmpty(NEW."{c}");
END;

CREATE TRIGGER "{x}_delete" AFTER DELETE ON "{t}"
BEGIN
  DELETE FROM "{x}" WHERE pkid = OLD.rowid;
END;"#,
        x = escape_identifier(&index),
        t = escape_identifier(table),
        c = escape_identifier(geom_column),
    )
}

pub(crate) fn execute_rtree_sqls(
    conn: &rusqlite::Connection,
    table: &str,
    geom_column: &str,
) -> rusqlite::Result<()> {
    conn.execute_batch(&rtree_create_sql(table, geom_column))?;
    conn.execute_batch(&rtree_load_sql(table, geom_column))?;
    conn.execute_batch(&rtree_triggers_sql(table, geom_column))?;
    Ok(())
}

pub(crate) fn sql_spatial_index_probe(table: &str, geom_column: &str) -> String {
    format!(
        "SELECT name FROM sqlite_master WHERE name='idx_{}_{}'",
        escape_literal(table),
        escape_literal(geom_column)
    )
}

fn projection(rowid_column: Option<&str>) -> String {
    match rowid_column {
        Some(rowid) => format!(r#""{}", *"#, escape_identifier(rowid)),
        None => "*".to_string(),
    }
}

/// `SELECT "<rowid>", * FROM '<view>' <WHERE>`
pub(crate) fn sql_select_view(
    view_name: &str,
    rowid_column: Option<&str>,
    where_clause: &str,
) -> String {
    let sql = format!(
        "SELECT {} FROM '{}'",
        projection(rowid_column),
        escape_literal(view_name)
    );
    if where_clause.is_empty() {
        sql
    } else {
        format!("{sql} {where_clause}")
    }
}

pub(crate) fn sql_select_view_schema_probe(view_name: &str, rowid_column: Option<&str>) -> String {
    format!("{} LIMIT 1", sql_select_view(view_name, rowid_column, ""))
}

pub(crate) fn sql_select_view_by_id(view_name: &str, rowid_column: &str, id: i64) -> String {
    format!(
        r#"SELECT "{r}", * FROM '{v}' WHERE "{r}" = {id}"#,
        r = escape_identifier(rowid_column),
        v = escape_literal(view_name),
    )
}

pub(crate) fn sql_count_view(view_name: &str, where_clause: &str) -> String {
    let sql = format!("SELECT count(*) FROM '{}'", escape_literal(view_name));
    if where_clause.is_empty() {
        sql
    } else {
        format!("{sql} {where_clause}")
    }
}

/// Page through a cursor query: `?1` is the page size, `?2` the offset.
pub(crate) fn sql_paged(sql: &str) -> String {
    format!("{sql} LIMIT ?1 OFFSET ?2")
}

pub(crate) fn sql_rtree_filter(
    rowid_column: &str,
    table: &str,
    geom_column: &str,
    envelope: &Envelope,
) -> String {
    format!(
        r#""{}" IN ( SELECT pkid FROM 'idx_{}_{}' WHERE xmax >= {} AND xmin <= {} AND ymax >= {} AND ymin <= {})"#,
        escape_identifier(rowid_column),
        escape_literal(table),
        escape_literal(geom_column),
        envelope.min_x,
        envelope.max_x,
        envelope.min_y,
        envelope.max_y,
    )
}

pub(crate) fn sql_envelope_filter(geom_column: &str, envelope: &Envelope) -> String {
    format!(
        r#"ST_EnvIntersects("{}", {}, {}, {}, {})"#,
        escape_identifier(geom_column),
        envelope.min_x,
        envelope.min_y,
        envelope.max_x,
        envelope.max_y,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes() {
        assert_eq!(escape_literal("it's"), "it''s");
        assert_eq!(escape_identifier(r#"a"b"#), r#"a""b"#);
    }

    #[test]
    fn select_view_shapes() {
        assert_eq!(
            sql_select_view("v1", Some("fid"), ""),
            r#"SELECT "fid", * FROM 'v1'"#
        );
        assert_eq!(
            sql_select_view("v1", None, "WHERE id < 5"),
            "SELECT * FROM 'v1' WHERE id < 5"
        );
        assert_eq!(
            sql_select_view_by_id("v'1", "fid", 42),
            r#"SELECT "fid", * FROM 'v''1' WHERE "fid" = 42"#
        );
        assert_eq!(
            sql_count_view("v1", "WHERE pop > 10"),
            "SELECT count(*) FROM 'v1' WHERE pop > 10"
        );
    }

    #[test]
    fn spatial_index_probe_shape() {
        assert_eq!(
            sql_spatial_index_probe("t1", "geom"),
            "SELECT name FROM sqlite_master WHERE name='idx_t1_geom'"
        );
    }

    #[test]
    fn spatial_filter_shapes() {
        let envelope = Envelope::new(-1.5, 0.0, 2.0, 3.25);
        assert_eq!(
            sql_rtree_filter("fid", "t1", "geom", &envelope),
            r#""fid" IN ( SELECT pkid FROM 'idx_t1_geom' WHERE xmax >= -1.5 AND xmin <= 2 AND ymax >= 0 AND ymin <= 3.25)"#
        );
        assert_eq!(
            sql_envelope_filter("geom", &envelope),
            r#"ST_EnvIntersects("geom", -1.5, 0, 2, 3.25)"#
        );
    }
}
