use crate::error::{Result, ViewError};
use crate::sql_functions::bounds_from_geometry;
use crate::types::{Envelope, GeometryFormat};
use rusqlite::Row;
use rusqlite::types::{FromSql, FromSqlError, Value, ValueRef};
use std::collections::HashMap;
use std::sync::Arc;
use wkb::reader::Wkb;

/// A single feature with geometry bytes and owned properties.
#[derive(Debug, Clone)]
pub struct Feature {
    pub(super) id: i64,
    pub(super) geometry: Option<Vec<u8>>,
    pub(super) geometry_format: GeometryFormat,
    pub(super) properties: Vec<Value>,
    pub(super) property_index_by_name: Arc<HashMap<String, usize>>,
}

impl Feature {
    /// Return the feature id (the view's rowid column, or the row position
    /// when the view has none).
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    /// Storage format the geometry blob was declared with.
    pub fn geometry_format(&self) -> GeometryFormat {
        self.geometry_format
    }

    /// Decode the geometry column into WKB.
    pub fn geometry(&self) -> Result<Wkb<'_>> {
        let bytes = self
            .geometry
            .as_ref()
            .ok_or(ViewError::NullGeometryValue)?;
        geometry_blob_to_wkb(bytes)
    }

    /// Bounding rectangle of the geometry; `None` for null or empty geometries.
    pub fn envelope(&self) -> Result<Option<Envelope>> {
        if self.geometry.is_none() {
            return Ok(None);
        }
        Ok(bounds_from_geometry(&self.geometry()?))
    }

    /// Look up a property by field name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        let idx = self.property_index_by_name.get(name)?;
        self.properties.get(*idx)
    }

    pub fn properties(&self) -> &[Value] {
        &self.properties
    }

    /// Read a property by index using rusqlite's `FromSql` conversion.
    pub fn property_as<T: FromSql>(&self, idx: usize) -> Result<T> {
        let value = self
            .properties
            .get(idx)
            .ok_or(ViewError::Sql(rusqlite::Error::InvalidColumnIndex(idx)))?;
        let value_ref = ValueRef::from(value);
        FromSql::column_result(value_ref).map_err(|err| match err {
            FromSqlError::InvalidType => ViewError::Sql(rusqlite::Error::InvalidColumnType(
                idx,
                format!("column {idx}"),
                value_ref.data_type(),
            )),
            FromSqlError::OutOfRange(i) => {
                ViewError::Sql(rusqlite::Error::IntegralValueOutOfRange(idx, i))
            }
            FromSqlError::Other(err) => ViewError::Sql(rusqlite::Error::FromSqlConversionFailure(
                idx,
                value_ref.data_type(),
                err,
            )),
            _ => ViewError::Message("unsupported sqlite type conversion".to_string()),
        })
    }
}

/// Turns result rows of a layer query into [`Feature`]s.
///
/// Holds the result-column positions of the id, the geometry and every
/// property so they are not looked up again per row.
#[derive(Debug, Clone)]
pub(crate) struct FeatureReader {
    id_column: Option<usize>,
    geometry_column: Option<usize>,
    property_columns: Vec<usize>,
    geometry_format: GeometryFormat,
    property_index_by_name: Arc<HashMap<String, usize>>,
}

impl FeatureReader {
    /// `properties` lists `(result column index, field name)` in field order.
    pub(crate) fn new(
        id_column: Option<usize>,
        geometry_column: Option<usize>,
        properties: Vec<(usize, String)>,
        geometry_format: GeometryFormat,
    ) -> Self {
        let mut property_index_by_name = HashMap::with_capacity(properties.len());
        let mut property_columns = Vec::with_capacity(properties.len());
        for (idx, (column, name)) in properties.into_iter().enumerate() {
            property_columns.push(column);
            property_index_by_name.insert(name, idx);
        }

        Self {
            id_column,
            geometry_column,
            property_columns,
            geometry_format,
            property_index_by_name: Arc::new(property_index_by_name),
        }
    }

    /// Materialize one row. `fallback_id` is used when there is no id column
    /// or its value is `NULL`.
    pub(crate) fn read(&self, row: &Row<'_>, fallback_id: i64) -> rusqlite::Result<Feature> {
        let id = match self.id_column {
            Some(idx) => match row.get_ref(idx)? {
                ValueRef::Integer(id) => id,
                ValueRef::Null => fallback_id,
                other => {
                    return Err(rusqlite::Error::InvalidColumnType(
                        idx,
                        "id".to_string(),
                        other.data_type(),
                    ));
                }
            },
            None => fallback_id,
        };

        let geometry = match self.geometry_column {
            Some(idx) => match row.get_ref(idx)? {
                ValueRef::Blob(bytes) => Some(bytes.to_vec()),
                ValueRef::Null => None,
                other => {
                    return Err(rusqlite::Error::InvalidColumnType(
                        idx,
                        "geometry".to_string(),
                        other.data_type(),
                    ));
                }
            },
            None => None,
        };

        let properties = self
            .property_columns
            .iter()
            .map(|idx| row.get::<_, Value>(*idx))
            .collect::<rusqlite::Result<Vec<Value>>>()?;

        Ok(Feature {
            id,
            geometry,
            geometry_format: self.geometry_format,
            properties,
            property_index_by_name: Arc::clone(&self.property_index_by_name),
        })
    }
}

/// Decode a stored geometry blob, GeoPackage binary or plain WKB.
///
/// The two are told apart by the `GP` magic; a WKB blob always starts with a
/// byte-order byte of `0` or `1`.
pub(crate) fn geometry_blob_to_wkb(b: &[u8]) -> Result<Wkb<'_>> {
    if b.starts_with(b"GP") {
        gpkg_geometry_to_wkb(b)
    } else {
        Ok(Wkb::try_new(b)?)
    }
}

/// Strip GeoPackage header and envelope bytes to access raw WKB.
// cf. https://www.geopackage.org/spec140/index.html#gpb_format
pub(crate) fn gpkg_geometry_to_wkb(b: &[u8]) -> Result<Wkb<'_>> {
    if b.len() < 8 {
        return Err(ViewError::InvalidGpkgGeometryLength {
            len: b.len(),
            required: 8,
        });
    }
    let flags = b[3];
    let envelope_size: usize = match flags & 0b00001110 {
        0b00000000 => 0,  // no envelope
        0b00000010 => 32, // envelope is [minx, maxx, miny, maxy], 32 bytes
        0b00000100 => 48, // envelope is [minx, maxx, miny, maxy, minz, maxz], 48 bytes
        0b00000110 => 48, // envelope is [minx, maxx, miny, maxy, minm, maxm], 48 bytes
        0b00001000 => 64, // envelope is [minx, maxx, miny, maxy, minz, maxz, minm, maxm], 64 bytes
        _ => {
            return Err(ViewError::InvalidGpkgGeometryFlags(flags));
        }
    };
    let offset = 8 + envelope_size;
    if b.len() < offset {
        return Err(ViewError::InvalidGpkgGeometryLength {
            len: b.len(),
            required: offset,
        });
    }

    Ok(Wkb::try_new(&b[offset..])?)
}

// cf. https://www.geopackage.org/spec140/index.html#gpb_format
pub(crate) fn wkb_to_gpkg_geometry(wkb: Wkb<'_>, srs_id: i32) -> Result<Vec<u8>> {
    let mut geom = Vec::with_capacity(wkb.buf().len() + 8);
    geom.extend_from_slice(&[
        0x47u8, // magic
        0x50u8, // magic
        0x00u8, // version
        0x01u8, // flags (little endian SRS ID, no envelope)
    ]);
    geom.extend_from_slice(&srs_id.to_le_bytes());
    geom.extend_from_slice(wkb.buf());

    Ok(geom)
}

/// Encode a geometry for storage in the given format.
pub(crate) fn encode_geometry<G>(
    geometry: &G,
    format: GeometryFormat,
    srs_id: i32,
) -> Result<Vec<u8>>
where
    G: geo_traits::GeometryTrait<T = f64>,
{
    let mut buf = Vec::new();
    wkb::writer::write_geometry(&mut buf, geometry, &Default::default())?;
    match format {
        GeometryFormat::Wkb => Ok(buf),
        GeometryFormat::GeoPackage => wkb_to_gpkg_geometry(Wkb::try_new(&buf)?, srs_id),
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureReader, geometry_blob_to_wkb, gpkg_geometry_to_wkb, wkb_to_gpkg_geometry};
    use crate::Result;
    use crate::types::GeometryFormat;
    use geo_types::Point;
    use rusqlite::Connection;
    use rusqlite::types::Value;
    use wkb::reader::Wkb;

    #[test]
    fn gpkg_geometry_roundtrip() -> Result<()> {
        let point = Point::new(3.0, -1.0);
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, &point, &Default::default())?;
        let wkb = Wkb::try_new(&wkb)?;
        let expected = wkb.buf().to_vec();
        let gpkg_blob = wkb_to_gpkg_geometry(wkb, 4326)?;

        let recovered = gpkg_geometry_to_wkb(&gpkg_blob)?;
        assert_eq!(recovered.buf(), expected.as_slice());

        let sniffed = geometry_blob_to_wkb(&expected)?;
        assert_eq!(sniffed.buf(), expected.as_slice());
        Ok(())
    }

    #[test]
    fn gpkg_geometry_rejects_invalid_flags() {
        let mut blob = vec![0x47, 0x50, 0x00, 0x0A, 0, 0, 0, 0];
        blob.extend_from_slice(&[0; 16]);
        let result = gpkg_geometry_to_wkb(&blob);
        assert!(matches!(
            result,
            Err(crate::error::ViewError::InvalidGpkgGeometryFlags(_))
        ));
    }

    #[test]
    fn gpkg_geometry_rejects_truncated_envelope() {
        let blob = vec![0x47, 0x50, 0x00, 0x03, 0, 0, 0, 0, 1, 2, 3];
        let result = gpkg_geometry_to_wkb(&blob);
        assert!(matches!(
            result,
            Err(crate::error::ViewError::InvalidGpkgGeometryLength { required: 40, .. })
        ));
    }

    #[test]
    fn reader_maps_columns_and_falls_back_on_null_id() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        let reader = FeatureReader::new(
            Some(0),
            Some(2),
            vec![(1, "name".to_string()), (3, "pop".to_string())],
            GeometryFormat::Wkb,
        );

        let feature = conn.query_row("SELECT NULL, 'alpha', NULL, 12", [], |row| {
            reader.read(row, 7)
        })?;

        assert_eq!(feature.id(), 7);
        assert!(!feature.has_geometry());
        assert_eq!(feature.property("name"), Some(&Value::Text("alpha".to_string())));
        assert_eq!(feature.property_as::<i64>(1)?, 12);
        assert!(feature.property("missing").is_none());
        assert!(matches!(
            feature.geometry(),
            Err(crate::error::ViewError::NullGeometryValue)
        ));
        Ok(())
    }
}
