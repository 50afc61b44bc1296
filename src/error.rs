use std::error::Error;
use std::fmt;

/// Crate error type for spatial view operations.
#[derive(Debug)]
pub enum ViewError {
    /// Wraps errors returned by `rusqlite`.
    Sql(rusqlite::Error),
    /// Wraps errors returned by the `wkb` crate.
    Wkb(wkb::error::WkbError),
    /// The table a view is defined over is not registered in the datasource.
    UnderlyingLayerNotFound { view_name: String, table_name: String },
    /// The layer a view is defined over is not a physical table (e.g. another view).
    UnderlyingNotATable { view_name: String, table_name: String },
    /// The underlying table has no geometry column with the expected name.
    GeometryFieldMismatch {
        view_name: String,
        table_name: String,
        geometry_column: String,
    },
    /// Preparing or stepping a statement failed. `message` is SQLite's diagnostic text.
    StatementPrepare { sql: String, message: String },
    /// Looking up the spatial index in the catalog failed.
    CatalogProbe(String),
    /// The single value returned by a count query could not be read.
    CountParse(String),
    /// No spatial view with this name is registered in `views_geometry_columns`.
    ViewNotFound { view_name: String },
    /// A layer with the same name already exists.
    LayerAlreadyExists { layer_name: String },
    /// A geometry type in metadata could not be mapped to a supported WKB geometry type.
    UnsupportedGeometryType(String),
    /// Invalid or mixed `z` / `m` dimension flags in catalog metadata.
    InvalidDimension { z: i8, m: i8 },
    /// A geometry storage format in catalog metadata is not known.
    InvalidGeometryFormat(String),
    /// Invalid GeoPackage geometry flags byte.
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob is too short for its header and envelope.
    InvalidGpkgGeometryLength { len: usize, required: usize },
    /// A feature row has a `NULL` geometry value.
    NullGeometryValue,
    ReadOnly,
    Message(String),
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(err) => write!(f, "{err}"),
            Self::Wkb(err) => write!(f, "{err}"),
            Self::UnderlyingLayerNotFound {
                view_name,
                table_name,
            } => write!(
                f,
                "cannot find underlying layer {table_name} for view {view_name}"
            ),
            Self::UnderlyingNotATable {
                view_name,
                table_name,
            } => write!(
                f,
                "underlying layer {table_name} for view {view_name} is not a regular table"
            ),
            Self::GeometryFieldMismatch {
                view_name,
                table_name,
                geometry_column,
            } => write!(
                f,
                "underlying layer {table_name} for view {view_name} has not expected geometry column name {geometry_column}"
            ),
            Self::StatementPrepare { sql, message } => {
                write!(f, "failed to prepare statement ({sql}): {message}")
            }
            Self::CatalogProbe(message) => write!(f, "spatial index lookup failed: {message}"),
            Self::CountParse(message) => write!(f, "cannot read feature count: {message}"),
            Self::ViewNotFound { view_name } => write!(f, "no such spatial view: {view_name}"),
            Self::LayerAlreadyExists { layer_name } => {
                write!(f, "layer already exists: {layer_name}")
            }
            Self::UnsupportedGeometryType(ty) => write!(f, "unsupported geometry type: {ty}"),
            Self::InvalidDimension { z, m } => {
                write!(f, "invalid or mixed geometry dimension (z={z}, m={m})")
            }
            Self::InvalidGeometryFormat(format) => {
                write!(f, "unknown geometry storage format: {format}")
            }
            Self::InvalidGpkgGeometryFlags(flags) => {
                write!(f, "invalid gpkg geometry flags: {flags:#04x}")
            }
            Self::InvalidGpkgGeometryLength { len, required } => write!(
                f,
                "invalid gpkg geometry length: got {len} bytes, required {required}"
            ),
            Self::NullGeometryValue => write!(f, "feature has null geometry value"),
            Self::ReadOnly => write!(f, "operation not allowed on read-only connection"),
            Self::Message(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ViewError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sql(err) => Some(err),
            Self::Wkb(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for ViewError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

impl From<wkb::error::WkbError> for ViewError {
    fn from(err: wkb::error::WkbError) -> Self {
        Self::Wkb(err)
    }
}

impl ViewError {
    /// Build a `StatementPrepare` error from the engine's diagnostic.
    pub(crate) fn prepare(sql: &str, err: rusqlite::Error) -> Self {
        Self::StatementPrepare {
            sql: sql.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ViewError>;
