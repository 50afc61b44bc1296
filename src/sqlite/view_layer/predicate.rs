//! Translation of the layer's filters into the `WHERE` clause of its cursor.

use crate::sql::{sql_envelope_filter, sql_rtree_filter};
use crate::types::Envelope;

use super::spatial_index::SpatialIndexState;

/// Filters installed on a view layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FilterState {
    /// Caller-supplied SQL boolean expression, empty when unset.
    pub(crate) attribute: String,
    /// Bounding rectangle of the spatial filter geometry.
    pub(crate) spatial: Option<Envelope>,
    pub(crate) geom_field_index: usize,
}

/// What the translator needs to know about the view and its table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpatialContext<'s> {
    pub(crate) index: SpatialIndexState,
    pub(crate) spatial_functions: bool,
    pub(crate) rowid_column: Option<&'s str>,
    /// The view's geometry column, `None` if the view exposes no geometry.
    pub(crate) geometry_column: Option<&'s str>,
    pub(crate) underlying_table: &'s str,
    pub(crate) underlying_geometry_column: &'s str,
}

/// Pick a SQL predicate for the spatial filter, from the R*Tree when the
/// index is usable, else `ST_EnvIntersects` when the SQL functions are
/// registered. `None` leaves the filter to the in-memory pass.
pub(crate) fn spatial_predicate(filter: &FilterState, ctx: &SpatialContext<'_>) -> Option<String> {
    let envelope = filter.spatial?;
    let geometry_column = ctx.geometry_column?;
    if filter.geom_field_index != 0 || !envelope.is_finite() {
        return None;
    }

    if ctx.index == SpatialIndexState::Present {
        if let Some(rowid_column) = ctx.rowid_column {
            return Some(sql_rtree_filter(
                rowid_column,
                ctx.underlying_table,
                ctx.underlying_geometry_column,
                &envelope,
            ));
        }
    }
    if ctx.spatial_functions {
        return Some(sql_envelope_filter(geometry_column, &envelope));
    }
    None
}

/// Combine the spatial predicate and the attribute filter.
pub(crate) fn build_where(spatial: Option<&str>, attribute: &str) -> String {
    let attribute = attribute.trim();
    match (spatial, attribute.is_empty()) {
        (Some(spatial), true) => format!("WHERE {spatial}"),
        (Some(spatial), false) => format!("WHERE {spatial} AND ({attribute})"),
        (None, false) => format!("WHERE {attribute}"),
        (None, true) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{FilterState, SpatialContext, build_where, spatial_predicate};
    use crate::sqlite::view_layer::SpatialIndexState;
    use crate::types::Envelope;

    fn context(index: SpatialIndexState, spatial_functions: bool) -> SpatialContext<'static> {
        SpatialContext {
            index,
            spatial_functions,
            rowid_column: Some("fid"),
            geometry_column: Some("geom"),
            underlying_table: "t1",
            underlying_geometry_column: "geom",
        }
    }

    fn filter(envelope: Envelope) -> FilterState {
        FilterState {
            attribute: String::new(),
            spatial: Some(envelope),
            geom_field_index: 0,
        }
    }

    #[test]
    fn where_clause_shapes() {
        assert_eq!(build_where(None, ""), "");
        assert_eq!(build_where(None, "  "), "");
        assert_eq!(build_where(None, "pop > 10"), "WHERE pop > 10");
        assert_eq!(build_where(Some("S"), ""), "WHERE S");
        assert_eq!(
            build_where(Some("S"), "name = 'x' OR pop > 10"),
            "WHERE S AND (name = 'x' OR pop > 10)"
        );
    }

    #[test]
    fn rtree_is_preferred_when_index_present() {
        let predicate = spatial_predicate(
            &filter(Envelope::new(0.0, 0.0, 10.0, 10.0)),
            &context(SpatialIndexState::Present, true),
        );
        assert_eq!(
            predicate.as_deref(),
            Some(
                r#""fid" IN ( SELECT pkid FROM 'idx_t1_geom' WHERE xmax >= 0 AND xmin <= 10 AND ymax >= 0 AND ymin <= 10)"#
            )
        );
    }

    #[test]
    fn falls_back_to_envelope_function() {
        let predicate = spatial_predicate(
            &filter(Envelope::new(1.0, 2.0, 3.0, 4.0)),
            &context(SpatialIndexState::Absent, true),
        );
        assert_eq!(
            predicate.as_deref(),
            Some(r#"ST_EnvIntersects("geom", 1, 2, 3, 4)"#)
        );

        let mut ctx = context(SpatialIndexState::Present, true);
        ctx.rowid_column = None;
        assert!(
            spatial_predicate(&filter(Envelope::new(1.0, 2.0, 3.0, 4.0)), &ctx)
                .is_some_and(|p| p.starts_with("ST_EnvIntersects"))
        );
    }

    #[test]
    fn no_predicate_without_index_or_functions() {
        let envelope = Envelope::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(
            spatial_predicate(&filter(envelope), &context(SpatialIndexState::Absent, false)),
            None
        );

        let mut other_field = filter(envelope);
        other_field.geom_field_index = 1;
        assert_eq!(
            spatial_predicate(&other_field, &context(SpatialIndexState::Present, true)),
            None
        );

        let mut ctx = context(SpatialIndexState::Present, true);
        ctx.geometry_column = None;
        assert_eq!(spatial_predicate(&filter(envelope), &ctx), None);

        assert_eq!(
            spatial_predicate(
                &FilterState::default(),
                &context(SpatialIndexState::Present, true)
            ),
            None
        );
    }

    #[test]
    fn non_finite_envelope_is_not_pushed_down() {
        let envelope = Envelope::new(f64::NEG_INFINITY, 0.0, 1.0, f64::NAN);
        assert_eq!(
            spatial_predicate(&filter(envelope), &context(SpatialIndexState::Present, true)),
            None
        );
    }
}
