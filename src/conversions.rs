use crate::error::ViewError;
use crate::types::{ColumnType, GeometryFormat};

#[inline]
pub(crate) fn geometry_type_to_str(
    geometry_type: Option<wkb::reader::GeometryType>,
) -> &'static str {
    match geometry_type {
        None => "GEOMETRY",
        Some(wkb::reader::GeometryType::GeometryCollection) => "GEOMETRYCOLLECTION",
        Some(wkb::reader::GeometryType::Point) => "POINT",
        Some(wkb::reader::GeometryType::LineString) => "LINESTRING",
        Some(wkb::reader::GeometryType::Polygon) => "POLYGON",
        Some(wkb::reader::GeometryType::MultiPoint) => "MULTIPOINT",
        Some(wkb::reader::GeometryType::MultiLineString) => "MULTILINESTRING",
        Some(wkb::reader::GeometryType::MultiPolygon) => "MULTIPOLYGON",
        Some(_) => "GEOMETRY",
    }
}

#[inline]
pub(crate) fn geometry_type_from_str(
    geometry_type_str: &str,
) -> Result<Option<wkb::reader::GeometryType>, ViewError> {
    let s = geometry_type_str;
    if s.eq_ignore_ascii_case("GEOMETRY") {
        Ok(None)
    } else if s.eq_ignore_ascii_case("GEOMETRYCOLLECTION") {
        Ok(Some(wkb::reader::GeometryType::GeometryCollection))
    } else if s.eq_ignore_ascii_case("POINT") {
        Ok(Some(wkb::reader::GeometryType::Point))
    } else if s.eq_ignore_ascii_case("LINESTRING") {
        Ok(Some(wkb::reader::GeometryType::LineString))
    } else if s.eq_ignore_ascii_case("POLYGON") {
        Ok(Some(wkb::reader::GeometryType::Polygon))
    } else if s.eq_ignore_ascii_case("MULTIPOINT") {
        Ok(Some(wkb::reader::GeometryType::MultiPoint))
    } else if s.eq_ignore_ascii_case("MULTILINESTRING") {
        Ok(Some(wkb::reader::GeometryType::MultiLineString))
    } else if s.eq_ignore_ascii_case("MULTIPOLYGON") {
        Ok(Some(wkb::reader::GeometryType::MultiPolygon))
    } else {
        Err(ViewError::UnsupportedGeometryType(
            geometry_type_str.to_string(),
        ))
    }
}

#[inline]
pub(crate) fn dimension_to_zm(dimension: wkb::reader::Dimension) -> (i8, i8) {
    match dimension {
        wkb::reader::Dimension::Xy => (0, 0),
        wkb::reader::Dimension::Xyz => (1, 0),
        wkb::reader::Dimension::Xym => (0, 1),
        wkb::reader::Dimension::Xyzm => (1, 1),
    }
}

#[inline]
pub(crate) fn dimension_from_zm(z: i8, m: i8) -> Result<wkb::reader::Dimension, ViewError> {
    match (z, m) {
        (0, 0) => Ok(wkb::reader::Dimension::Xy),
        (1, 0) => Ok(wkb::reader::Dimension::Xyz),
        (0, 1) => Ok(wkb::reader::Dimension::Xym),
        (1, 1) => Ok(wkb::reader::Dimension::Xyzm),
        _ => Err(ViewError::InvalidDimension { z, m }),
    }
}

#[inline]
pub(crate) fn geometry_format_to_str(format: GeometryFormat) -> &'static str {
    match format {
        GeometryFormat::GeoPackage => "GPKG",
        GeometryFormat::Wkb => "WKB",
    }
}

#[inline]
pub(crate) fn geometry_format_from_str(format_str: &str) -> Result<GeometryFormat, ViewError> {
    if format_str.eq_ignore_ascii_case("GPKG") {
        Ok(GeometryFormat::GeoPackage)
    } else if format_str.eq_ignore_ascii_case("WKB") {
        Ok(GeometryFormat::Wkb)
    } else {
        Err(ViewError::InvalidGeometryFormat(format_str.to_string()))
    }
}

#[inline]
pub(crate) fn column_type_to_str(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Double => "DOUBLE",
        ColumnType::Varchar => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Binary => "BLOB",
        ColumnType::Geometry => "GEOMETRY",
    }
}

/// Map a declared column type to a field type.
///
/// Columns of a view that are computed expressions have no declared type;
/// they are exposed as text, which is what SQLite hands back for them most of
/// the time. Unknown declarations follow SQLite's affinity rules.
// cf. https://www.sqlite.org/datatype3.html#determination_of_column_affinity
#[inline]
pub(crate) fn column_type_from_decl(declared_type: Option<&str>) -> ColumnType {
    let Some(s) = declared_type else {
        return ColumnType::Varchar;
    };
    if s.eq_ignore_ascii_case("BOOLEAN") {
        return ColumnType::Boolean;
    }
    if geometry_type_from_str(s).is_ok() {
        return ColumnType::Geometry;
    }

    let upper = s.to_ascii_uppercase();
    if upper.contains("INT") {
        ColumnType::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        ColumnType::Varchar
    } else if upper.contains("BLOB") || upper.is_empty() {
        ColumnType::Binary
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        ColumnType::Double
    } else {
        ColumnType::Varchar
    }
}

#[cfg(test)]
mod tests {
    use super::{column_type_from_decl, geometry_type_from_str, geometry_type_to_str};
    use crate::types::ColumnType;

    #[test]
    fn maps_declared_types_by_affinity() {
        assert_eq!(column_type_from_decl(Some("INTEGER")), ColumnType::Integer);
        assert_eq!(column_type_from_decl(Some("bigint")), ColumnType::Integer);
        assert_eq!(column_type_from_decl(Some("VARCHAR(20)")), ColumnType::Varchar);
        assert_eq!(column_type_from_decl(Some("DOUBLE")), ColumnType::Double);
        assert_eq!(column_type_from_decl(Some("BLOB")), ColumnType::Binary);
        assert_eq!(column_type_from_decl(Some("POINT")), ColumnType::Geometry);
        assert_eq!(column_type_from_decl(Some("BOOLEAN")), ColumnType::Boolean);
        assert_eq!(column_type_from_decl(None), ColumnType::Varchar);
    }

    #[test]
    fn generic_geometry_has_no_concrete_type() {
        assert_eq!(geometry_type_from_str("geometry").ok(), Some(None));
        assert_eq!(geometry_type_to_str(None), "GEOMETRY");
        assert!(geometry_type_from_str("CIRCULARSTRING").is_err());
    }
}
