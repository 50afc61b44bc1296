//! Forward-only cursor over a view query.
//!
//! The cursor runs `<query> LIMIT ?1 OFFSET ?2` one page at a time, keeping a
//! single prepared statement. Its position is the number of raw rows already
//! handed out, which lets it be finalized and later resumed at the same place.

use crate::error::{Result, ViewError};
use crate::sql::sql_paged;
use crate::sqlite::Feature;
use crate::sqlite::feature::FeatureReader;
use rusqlite::{Connection, Statement};
use std::collections::VecDeque;

#[derive(Debug)]
pub(crate) struct PagedStatement<'conn> {
    stmt: Statement<'conn>,
    next_offset: i64,
    buffer: VecDeque<Feature>,
    last_page: bool,
}

impl PagedStatement<'_> {
    fn position(&self) -> i64 {
        self.next_offset - self.buffer.len() as i64
    }

    fn fetch_page(&mut self, reader: &FeatureReader, page_size: u32) -> Result<()> {
        let offset = self.next_offset;
        let mut rows = self.stmt.query(rusqlite::params![page_size, offset])?;
        let mut fetched: i64 = 0;
        while let Some(row) = rows.next()? {
            self.buffer.push_back(reader.read(row, offset + fetched)?);
            fetched += 1;
        }

        tracing::trace!(offset, fetched, "fetched cursor page");
        self.next_offset += fetched;
        self.last_page = fetched < i64::from(page_size);
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) enum CursorState<'conn> {
    /// No live statement; reading resumes at `position`.
    Idle { position: i64 },
    Prepared(PagedStatement<'conn>),
    Exhausted { position: i64 },
    /// Preparing the statement failed; nothing is read until the query changes
    /// or the cursor is reset.
    Invalid,
}

/// Where a suspended cursor picks up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    At(i64),
    Exhausted(i64),
    Invalid,
}

#[derive(Debug)]
pub(crate) struct CursorManager<'conn> {
    conn: &'conn Connection,
    sql: String,
    page_size: u32,
    state: CursorState<'conn>,
}

impl<'conn> CursorManager<'conn> {
    pub(crate) fn new(conn: &'conn Connection, sql: String, page_size: u32) -> Self {
        Self {
            conn,
            sql,
            page_size: page_size.max(1),
            state: CursorState::Idle { position: 0 },
        }
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &CursorState<'conn> {
        &self.state
    }

    pub(crate) fn set_page_size(&mut self, page_size: u32) {
        self.page_size = page_size.max(1);
    }

    /// Swap the query. Any live statement is finalized and reading restarts
    /// from the first row.
    pub(crate) fn set_sql(&mut self, sql: String) {
        self.state = CursorState::Idle { position: 0 };
        self.sql = sql;
    }

    /// Rewind without preparing; the statement is created on the next read.
    pub(crate) fn rewind(&mut self) {
        self.state = CursorState::Idle { position: 0 };
    }

    /// Rewind and prepare the statement right away.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.rewind();
        self.prepare(0)
    }

    /// Finalize the live statement, remembering where reading stopped.
    pub(crate) fn suspend(&mut self) -> Resume {
        let resume = match &self.state {
            CursorState::Idle { position } => Resume::At(*position),
            CursorState::Prepared(paged) => Resume::At(paged.position()),
            CursorState::Exhausted { position } => Resume::Exhausted(*position),
            CursorState::Invalid => Resume::Invalid,
        };
        let position = match resume {
            Resume::At(position) | Resume::Exhausted(position) => position,
            Resume::Invalid => 0,
        };
        self.state = CursorState::Idle { position };
        resume
    }

    /// Put the cursor back where [`CursorManager::suspend`] left it. The
    /// statement itself is re-prepared lazily.
    pub(crate) fn restore(&mut self, resume: Resume) {
        self.state = match resume {
            Resume::At(position) => CursorState::Idle { position },
            Resume::Exhausted(position) => CursorState::Exhausted { position },
            Resume::Invalid => CursorState::Invalid,
        };
    }

    /// Next row of the query, `None` once exhausted or if the statement could
    /// not be prepared.
    pub(crate) fn next(&mut self, reader: &FeatureReader) -> Result<Option<Feature>> {
        loop {
            match &mut self.state {
                CursorState::Invalid | CursorState::Exhausted { .. } => return Ok(None),
                CursorState::Idle { position } => {
                    let position = *position;
                    self.prepare(position)?;
                }
                CursorState::Prepared(paged) => {
                    if let Some(feature) = paged.buffer.pop_front() {
                        return Ok(Some(feature));
                    }
                    if paged.last_page {
                        let position = paged.next_offset;
                        self.state = CursorState::Exhausted { position };
                        return Ok(None);
                    }
                    if let Err(err) = paged.fetch_page(reader, self.page_size) {
                        let position = paged.position();
                        self.state = CursorState::Exhausted { position };
                        return Err(err);
                    }
                }
            }
        }
    }

    fn prepare(&mut self, position: i64) -> Result<()> {
        // Finalize whatever is live before preparing the replacement.
        self.state = CursorState::Idle { position };

        let sql = sql_paged(&self.sql);
        tracing::debug!(sql = %self.sql, position, "preparing view cursor");
        match self.conn.prepare(&sql) {
            Ok(stmt) => {
                self.state = CursorState::Prepared(PagedStatement {
                    stmt,
                    next_offset: position,
                    buffer: VecDeque::new(),
                    last_page: false,
                });
                Ok(())
            }
            Err(err) => {
                let err = ViewError::prepare(&self.sql, err);
                tracing::warn!(error = %err, "cannot prepare view cursor");
                self.state = CursorState::Invalid;
                Err(err)
            }
        }
    }
}

/// Run a query expected to return at most one feature.
pub(crate) fn fetch_one(
    conn: &Connection,
    sql: &str,
    reader: &FeatureReader,
    fallback_id: i64,
) -> Result<Option<Feature>> {
    tracing::debug!(sql = %sql, "fetching single feature");
    let mut stmt = conn
        .prepare(sql)
        .map_err(|err| ViewError::prepare(sql, err))?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(reader.read(row, fallback_id)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::{CursorManager, CursorState, Resume};
    use crate::error::ViewError;
    use crate::sqlite::feature::FeatureReader;
    use crate::types::GeometryFormat;
    use rusqlite::Connection;

    const ORDERED: &str = "SELECT id, name FROM t ORDER BY id";

    fn setup(rows: i64) -> crate::Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")?;
        for i in 1..=rows {
            conn.execute(
                "INSERT INTO t (id, name) VALUES (?1, ?2)",
                rusqlite::params![i, format!("n{i}")],
            )?;
        }
        Ok(conn)
    }

    fn reader() -> FeatureReader {
        FeatureReader::new(Some(0), None, vec![(1, "name".to_string())], GeometryFormat::Wkb)
    }

    fn drain(cursor: &mut CursorManager<'_>, reader: &FeatureReader) -> crate::Result<Vec<i64>> {
        let mut ids = Vec::new();
        while let Some(feature) = cursor.next(reader)? {
            ids.push(feature.id());
        }
        Ok(ids)
    }

    #[test]
    fn reads_across_pages() -> crate::Result<()> {
        let conn = setup(7)?;
        let reader = reader();
        let mut cursor = CursorManager::new(&conn, ORDERED.to_string(), 3);

        assert_eq!(drain(&mut cursor, &reader)?, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(matches!(cursor.state(), CursorState::Exhausted { position: 7 }));
        assert!(cursor.next(&reader)?.is_none());

        cursor.reset()?;
        assert!(matches!(cursor.state(), CursorState::Prepared(_)));
        assert_eq!(drain(&mut cursor, &reader)?.len(), 7);
        Ok(())
    }

    #[test]
    fn suspend_and_restore_keep_position() -> crate::Result<()> {
        let conn = setup(5)?;
        let reader = reader();
        let mut cursor = CursorManager::new(&conn, ORDERED.to_string(), 2);

        assert_eq!(cursor.next(&reader)?.map(|f| f.id()), Some(1));
        assert_eq!(cursor.next(&reader)?.map(|f| f.id()), Some(2));
        assert_eq!(cursor.next(&reader)?.map(|f| f.id()), Some(3));

        let resume = cursor.suspend();
        assert_eq!(resume, Resume::At(3));
        assert!(matches!(cursor.state(), CursorState::Idle { position: 3 }));

        // Another statement may run on the connection meanwhile.
        conn.execute("UPDATE t SET name = 'x' WHERE id = 1", [])?;

        cursor.restore(resume);
        assert_eq!(drain(&mut cursor, &reader)?, vec![4, 5]);

        let resume = cursor.suspend();
        assert_eq!(resume, Resume::Exhausted(5));
        cursor.restore(resume);
        assert!(cursor.next(&reader)?.is_none());
        Ok(())
    }

    #[test]
    fn ids_fall_back_to_row_position() -> crate::Result<()> {
        let conn = setup(4)?;
        let reader =
            FeatureReader::new(None, None, vec![(0, "name".to_string())], GeometryFormat::Wkb);
        let mut cursor = CursorManager::new(&conn, "SELECT name FROM t ORDER BY id".to_string(), 3);
        assert_eq!(drain(&mut cursor, &reader)?, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn prepare_failure_invalidates_until_sql_changes() -> crate::Result<()> {
        let conn = setup(2)?;
        let reader = reader();
        let mut cursor = CursorManager::new(&conn, "SELECT id, name FROM missing".to_string(), 10);

        let err = cursor.next(&reader).expect_err("prepare should fail");
        assert!(matches!(err, ViewError::StatementPrepare { .. }));
        assert!(matches!(cursor.state(), CursorState::Invalid));
        assert!(cursor.next(&reader)?.is_none());
        assert_eq!(cursor.suspend(), Resume::Invalid);

        cursor.set_sql("SELECT id, name FROM t".to_string());
        assert_eq!(drain(&mut cursor, &reader)?, vec![1, 2]);
        Ok(())
    }

    #[test]
    fn page_size_is_at_least_one() -> crate::Result<()> {
        let conn = setup(3)?;
        let reader = reader();
        let mut cursor = CursorManager::new(&conn, ORDERED.to_string(), 0);
        assert_eq!(drain(&mut cursor, &reader)?, vec![1, 2, 3]);
        cursor.set_page_size(0);
        cursor.rewind();
        assert_eq!(drain(&mut cursor, &reader)?, vec![1, 2, 3]);
        Ok(())
    }
}
