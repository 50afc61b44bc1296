//! SQL functions over geometry blobs.
//!
//! The `ST_Min*`/`ST_Max*` accessors and `ST_IsEmpty` feed the R*Tree
//! triggers of table layers; `ST_EnvIntersects` is the filter view layers
//! fall back to when a table has no usable spatial index. Every function
//! accepts GeoPackage blobs as well as plain WKB and maps NULL to NULL.

use crate::error::Result;
use crate::sqlite::geometry_blob_to_wkb;
use crate::types::Envelope;
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, LineTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait, RectTrait,
    TriangleTrait,
};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};
use wkb::reader::Wkb;

/// What a function does with a blob that is not a readable geometry.
#[derive(Clone, Copy)]
enum InvalidBlob {
    /// Raise an error, failing the statement.
    Fail,
    /// Evaluate to NULL.
    Null,
}

/// Register `ST_MinX`, `ST_MinY`, `ST_MaxX`, `ST_MaxY`, `ST_IsEmpty` and
/// `ST_EnvIntersects(geom, minx, miny, maxx, maxy)` on the connection.
///
/// `ST_EnvIntersects` returns 1 when the geometry's bounding box touches the
/// rectangle, 0 when it does not, and NULL for NULL or unreadable blobs. The
/// other functions reject unreadable blobs, so a broken geometry never makes
/// it into a spatial index.
///
/// Example:
/// ```no_run
/// use rusqlite::Connection;
/// use rusqlite_spatial_view::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// let hit: Option<i64> =
///     conn.query_row("SELECT ST_EnvIntersects(NULL, 0, 0, 1, 1)", [], |row| row.get(0))?;
/// assert_eq!(hit, None);
/// # Ok::<(), rusqlite_spatial_view::ViewError>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    let accessors: [(&str, fn(Envelope) -> f64); 4] = [
        ("ST_MinX", |b| b.min_x),
        ("ST_MinY", |b| b.min_y),
        ("ST_MaxX", |b| b.max_x),
        ("ST_MaxY", |b| b.max_y),
    ];
    for (name, component) in accessors {
        register_bounds_component(conn, name, component)?;
    }
    register_st_isempty(conn)?;
    register_st_envintersects(conn)?;
    Ok(())
}

fn register_bounds_component(
    conn: &Connection,
    name: &str,
    component: fn(Envelope) -> f64,
) -> Result<()> {
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let Some(wkb) = wkb_from_ctx(ctx, InvalidBlob::Fail)? else {
            return Ok(None);
        };
        Ok(bounds_from_geometry(&wkb).map(component))
    })?;
    Ok(())
}

fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(wkb) = wkb_from_ctx(ctx, InvalidBlob::Fail)? else {
                return Ok(None);
            };
            Ok(Some(i64::from(bounds_from_geometry(&wkb).is_none())))
        },
    )?;
    Ok(())
}

fn register_st_envintersects(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_EnvIntersects",
        5,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(wkb) = wkb_from_ctx(ctx, InvalidBlob::Null)? else {
                return Ok(None);
            };
            let filter = Envelope::new(
                ctx.get::<f64>(1)?,
                ctx.get::<f64>(2)?,
                ctx.get::<f64>(3)?,
                ctx.get::<f64>(4)?,
            );
            let hit = bounds_from_geometry(&wkb).is_some_and(|b| b.intersects(&filter));
            Ok(Some(i64::from(hit)))
        },
    )?;
    Ok(())
}

/// Decode the first argument. `None` for SQL NULL, and for unreadable blobs
/// under [`InvalidBlob::Null`].
fn wkb_from_ctx<'a>(
    ctx: &'a Context<'a>,
    invalid: InvalidBlob,
) -> std::result::Result<Option<Wkb<'a>>, Error> {
    match ctx.get_raw(0) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => match (geometry_blob_to_wkb(blob), invalid) {
            (Ok(wkb), _) => Ok(Some(wkb)),
            (Err(err), InvalidBlob::Fail) => Err(Error::UserFunctionError(Box::new(err))),
            (Err(err), InvalidBlob::Null) => {
                tracing::debug!(error = %err, "unreadable geometry blob, returning NULL");
                Ok(None)
            }
        },
        _ => Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
    }
}

/// Bounding rectangle of a geometry, or `None` when it has no coordinates.
pub(crate) fn bounds_from_geometry<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Envelope> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Envelope> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::LineString(line) => {
            add_line_string(&mut bounds, line);
        }
        GeoType::Polygon(poly) => {
            if let Some(ring) = poly.exterior() {
                add_line_string(&mut bounds, &ring);
            }
            for ring in poly.interiors() {
                add_line_string(&mut bounds, &ring);
            }
        }
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    add_coord(&mut bounds, &coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                if let Some(ring) = poly.exterior() {
                    add_line_string(&mut bounds, &ring);
                }
                for ring in poly.interiors() {
                    add_line_string(&mut bounds, &ring);
                }
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                if let Some(sub_bounds) = bounds_from_geometry(&sub_geom) {
                    merge_bounds(&mut bounds, sub_bounds);
                }
            }
        }
        // Never stored in a table, but callers may pass them as filter geometries.
        GeoType::Rect(rect) => {
            add_coord(&mut bounds, &rect.min());
            add_coord(&mut bounds, &rect.max());
        }
        GeoType::Triangle(triangle) => {
            add_coord(&mut bounds, &triangle.first());
            add_coord(&mut bounds, &triangle.second());
            add_coord(&mut bounds, &triangle.third());
        }
        GeoType::Line(line) => {
            add_coord(&mut bounds, &line.start());
            add_coord(&mut bounds, &line.end());
        }
    }

    bounds
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Envelope>, line: &L) {
    for coord in line.coords() {
        add_coord(bounds, &coord);
    }
}

fn add_coord<C: CoordTrait<T = f64>>(bounds: &mut Option<Envelope>, coord: &C) {
    let (x, y) = coord.x_y();
    match bounds {
        Some(existing) => existing.expand(x, y),
        None => *bounds = Some(Envelope::new(x, y, x, y)),
    }
}

fn merge_bounds(bounds: &mut Option<Envelope>, other: Envelope) {
    match bounds {
        Some(existing) => existing.merge(&other),
        None => *bounds = Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::{bounds_from_geometry, register_spatial_functions};
    use crate::sqlite::wkb_to_gpkg_geometry;
    use crate::types::Envelope;
    use geo_types::{Geometry, GeometryCollection, MultiPoint, Rect, coord};
    use geo_types::{LineString, Point};
    use rusqlite::{Connection, params};
    use wkb::reader::Wkb;

    fn gpkg_blob_from_geometry<G: geo_traits::GeometryTrait<T = f64>>(
        geometry: G,
    ) -> crate::Result<Vec<u8>> {
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, &geometry, &Default::default())?;
        let wkb = Wkb::try_new(&wkb)?;
        wkb_to_gpkg_geometry(wkb, 4326)
    }

    #[test]
    fn st_bounds_for_point() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let point = Point::new(1.5, -2.0);
        let blob = gpkg_blob_from_geometry(point)?;

        let (minx, maxx, miny, maxy, empty): (f64, f64, f64, f64, i64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1), ST_IsEmpty(?1)",
            params![blob],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        assert_eq!(minx, 1.5);
        assert_eq!(maxx, 1.5);
        assert_eq!(miny, -2.0);
        assert_eq!(maxy, -2.0);
        assert_eq!(empty, 0);
        Ok(())
    }

    #[test]
    fn st_is_empty_for_empty_linestring() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let line: LineString<f64> = LineString::new(Vec::new());
        let blob = gpkg_blob_from_geometry(line)?;

        let (minx, empty): (Option<f64>, i64) =
            conn.query_row("SELECT ST_MinX(?1), ST_IsEmpty(?1)", params![blob], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        assert!(minx.is_none());
        assert_eq!(empty, 1);
        Ok(())
    }

    #[test]
    fn st_bounds_accept_plain_wkb() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let mp = MultiPoint::from(vec![Point::new(1.0, 5.0), Point::new(-2.0, 3.0)]);
        let mut blob = Vec::new();
        wkb::writer::write_geometry(&mut blob, &mp, &Default::default())?;

        let (minx, maxy): (f64, f64) =
            conn.query_row("SELECT ST_MinX(?1), ST_MaxY(?1)", params![blob], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        assert_eq!(minx, -2.0);
        assert_eq!(maxy, 5.0);
        Ok(())
    }

    #[test]
    fn st_env_intersects() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let line = LineString::from(vec![(0.0, 0.0), (2.0, 1.0)]);
        let blob = gpkg_blob_from_geometry(line)?;

        let (hit, miss, null): (i64, i64, Option<i64>) = conn.query_row(
            "SELECT ST_EnvIntersects(?1, 1, 0.5, 3, 3), ST_EnvIntersects(?1, 5, 5, 6, 6), ST_EnvIntersects(NULL, 0, 0, 1, 1)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        assert_eq!(hit, 1);
        assert_eq!(miss, 0);
        assert_eq!(null, None);
        Ok(())
    }

    #[test]
    fn st_env_intersects_is_null_for_undecodable_blob() -> crate::Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let hit: Option<i64> =
            conn.query_row("SELECT ST_EnvIntersects(x'0102', 0, 0, 1, 1)", [], |row| {
                row.get(0)
            })?;
        assert_eq!(hit, None);

        // The bounds accessors still refuse such blobs.
        assert!(
            conn.query_row("SELECT ST_MinX(x'0102')", [], |row| row.get::<_, Option<f64>>(0))
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn bounds_for_filter_only_shapes() {
        let rect = Rect::new(coord! { x: 3.0, y: -1.0 }, coord! { x: -2.0, y: 4.0 });
        assert_eq!(
            bounds_from_geometry(&rect),
            Some(Envelope::new(-2.0, -1.0, 3.0, 4.0))
        );

        let collection = GeometryCollection::from(vec![
            Geometry::Point(Point::new(5.0, -1.0)),
            Geometry::LineString(LineString::from(vec![(-2.0, 2.0), (1.0, 3.0)])),
        ]);
        assert_eq!(
            bounds_from_geometry(&collection),
            Some(Envelope::new(-2.0, -1.0, 5.0, 3.0))
        );
    }
}
