use std::fmt;
use std::str::FromStr;

use crate::error::ViewError;

#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(C)]
pub enum ColumnType {
    Boolean,
    Varchar,
    Double,
    Integer,
    Binary,
    Geometry,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

/// How geometry values are encoded in their BLOB column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GeometryFormat {
    /// GeoPackage binary: `GP` header, SRS id, optional envelope, then WKB.
    #[default]
    GeoPackage,
    /// Plain ISO WKB.
    Wkb,
}

/// Descriptor of the (single) geometry field of a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryFieldDefn {
    pub name: String,
    /// `None` stands for the generic `GEOMETRY` type.
    pub geometry_type: Option<wkb::reader::GeometryType>,
    pub dimension: wkb::reader::Dimension,
    pub srid: i32,
    pub format: GeometryFormat,
}

/// Field layout of a layer: ordered attribute fields plus zero or one geometry field.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSchema {
    pub name: String,
    pub fields: Vec<ColumnSpec>,
    pub geometry: Option<GeometryFieldDefn>,
}

impl FeatureSchema {
    /// A schema with no fields at all.
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            geometry: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.geometry.is_none()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn geometry_field_count(&self) -> usize {
        usize::from(self.geometry.is_some())
    }

    pub fn geometry_field_index(&self, name: &str) -> Option<usize> {
        match &self.geometry {
            Some(geometry) if geometry.name == name => Some(0),
            _ => None,
        }
    }

    pub fn geometry_field(&self, idx: usize) -> Option<&GeometryFieldDefn> {
        if idx == 0 { self.geometry.as_ref() } else { None }
    }
}

/// Axis-aligned bounding rectangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }

    /// The same rectangle with infinite bounds replaced by the largest finite
    /// values, or `None` if any bound is NaN.
    pub(crate) fn to_finite(self) -> Option<Envelope> {
        let bounds = [self.min_x, self.min_y, self.max_x, self.max_y];
        if bounds.iter().any(|v| v.is_nan()) {
            return None;
        }
        let clamp = |v: f64| v.clamp(f64::MIN, f64::MAX);
        Some(Envelope::new(
            clamp(self.min_x),
            clamp(self.min_y),
            clamp(self.max_x),
            clamp(self.max_y),
        ))
    }

    pub(crate) fn expand(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
    }

    pub(crate) fn merge(&mut self, other: &Envelope) {
        self.expand(other.min_x, other.min_y);
        self.expand(other.max_x, other.max_y);
    }
}

/// Layer capabilities, named after their OGR counterparts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    FastFeatureCount,
    FastSpatialFilter,
    RandomRead,
    StringsAsUtf8,
    SequentialWrite,
    RandomWrite,
    CreateField,
    DeleteFeature,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastFeatureCount => "FastFeatureCount",
            Self::FastSpatialFilter => "FastSpatialFilter",
            Self::RandomRead => "RandomRead",
            Self::StringsAsUtf8 => "StringsAsUTF8",
            Self::SequentialWrite => "SequentialWrite",
            Self::RandomWrite => "RandomWrite",
            Self::CreateField => "CreateField",
            Self::DeleteFeature => "DeleteFeature",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [Capability; 8] = [
            Capability::FastFeatureCount,
            Capability::FastSpatialFilter,
            Capability::RandomRead,
            Capability::StringsAsUtf8,
            Capability::SequentialWrite,
            Capability::RandomWrite,
            Capability::CreateField,
            Capability::DeleteFeature,
        ];
        ALL.into_iter()
            .find(|cap| cap.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ViewError::Message(format!("unknown capability: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::{Capability, Envelope};

    #[test]
    fn capability_names_are_case_insensitive() {
        assert_eq!(
            "fastfeaturecount".parse::<Capability>().ok(),
            Some(Capability::FastFeatureCount)
        );
        assert_eq!(
            "StringsAsUTF8".parse::<Capability>().ok(),
            Some(Capability::StringsAsUtf8)
        );
        assert!("Transactions".parse::<Capability>().is_err());
    }

    #[test]
    fn envelope_intersection_includes_touching_edges() {
        let a = Envelope::new(0.0, 0.0, 1.0, 1.0);
        assert!(a.intersects(&Envelope::new(1.0, 1.0, 2.0, 2.0)));
        assert!(!a.intersects(&Envelope::new(1.5, 0.0, 2.0, 1.0)));
        assert!(!Envelope::new(f64::NEG_INFINITY, 0.0, 1.0, 1.0).is_finite());
    }

    #[test]
    fn infinite_bounds_become_finite() {
        let clamped = Envelope::new(f64::NEG_INFINITY, -1.0, 2.5, f64::INFINITY).to_finite();
        assert_eq!(clamped, Some(Envelope::new(f64::MIN, -1.0, 2.5, f64::MAX)));
        assert!(clamped.is_some_and(|e| e.is_finite()));
        assert_eq!(Envelope::new(0.0, f64::NAN, 1.0, 1.0).to_finite(), None);
    }
}
