use crate::error::ViewError;
use crate::sql::{spatial_index_name, sql_spatial_index_probe};
use rusqlite::Connection;

use super::schema::UnderlyingTable;

/// Whether the underlying table's R*Tree can be used by a view layer.
///
/// Once `Present` or `Absent` the answer is kept for the lifetime of the
/// layer, even if the index is created or dropped afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatialIndexState {
    #[default]
    Unchecked,
    Present,
    Absent,
}

#[derive(Debug, Default)]
pub(crate) struct SpatialIndexProbe {
    state: SpatialIndexState,
}

impl SpatialIndexProbe {
    pub(crate) fn state(&self) -> SpatialIndexState {
        self.state
    }

    /// Run the probe on first call and return whether the index is usable.
    pub(crate) fn resolve(
        &mut self,
        conn: &Connection,
        underlying: &UnderlyingTable,
        rowid_column: Option<&str>,
    ) -> bool {
        if self.state == SpatialIndexState::Unchecked {
            self.state = probe(conn, underlying, rowid_column);
        }
        self.state == SpatialIndexState::Present
    }
}

fn probe(
    conn: &Connection,
    underlying: &UnderlyingTable,
    rowid_column: Option<&str>,
) -> SpatialIndexState {
    let index_name = spatial_index_name(&underlying.table_name, &underlying.geometry_column);
    if !underlying.advertises_spatial_index {
        tracing::debug!(index = %index_name, "no spatial index advertised");
        return SpatialIndexState::Absent;
    }
    // The index is keyed on the table's rowid; without the view column that
    // carries it there is nothing to join on.
    if rowid_column.is_none() {
        tracing::debug!(index = %index_name, "view has no rowid column, not using spatial index");
        return SpatialIndexState::Absent;
    }

    let sql = sql_spatial_index_probe(&underlying.table_name, &underlying.geometry_column);
    tracing::debug!(sql = %sql, "probing spatial index");
    match count_rows(conn, &sql) {
        Ok(1) => SpatialIndexState::Present,
        Ok(_) => {
            tracing::debug!(index = %index_name, "spatial index table missing, disabling it");
            SpatialIndexState::Absent
        }
        Err(err) => {
            let err = ViewError::CatalogProbe(err.to_string());
            tracing::warn!(index = %index_name, error = %err, "spatial index probe failed");
            SpatialIndexState::Absent
        }
    }
}

fn count_rows(conn: &Connection, sql: &str) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while rows.next()?.is_some() {
        count += 1;
    }
    Ok(count)
}
