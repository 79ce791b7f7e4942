//! Types de données manipulés par le pipeline de traduction

use std::fmt;
use std::str::FromStr;

use geo::Geometry;

use crate::PipelineError;

/// Type d'un champ attributaire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Integer64,
    Real,
    String,
    Date,
    Time,
    DateTime,
    Binary,
    IntegerList,
    RealList,
    StringList,
}

impl FieldType {
    /// Tous les types, dans l'ordre de déclaration
    pub const ALL: [FieldType; 11] = [
        FieldType::Integer,
        FieldType::Integer64,
        FieldType::Real,
        FieldType::String,
        FieldType::Date,
        FieldType::Time,
        FieldType::DateTime,
        FieldType::Binary,
        FieldType::IntegerList,
        FieldType::RealList,
        FieldType::StringList,
    ];

    /// Nom canonique du type
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Integer => "Integer",
            FieldType::Integer64 => "Integer64",
            FieldType::Real => "Real",
            FieldType::String => "String",
            FieldType::Date => "Date",
            FieldType::Time => "Time",
            FieldType::DateTime => "DateTime",
            FieldType::Binary => "Binary",
            FieldType::IntegerList => "IntegerList",
            FieldType::RealList => "RealList",
            FieldType::StringList => "StringList",
        }
    }

    pub fn is_list(self) -> bool {
        matches!(
            self,
            FieldType::IntegerList | FieldType::RealList | FieldType::StringList
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PipelineError::invalid_option(format!("unknown field type: {s}")))
    }
}

/// Définition d'un champ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    /// Largeur (0 = non contrainte)
    pub width: u32,
    /// Précision (0 = non contrainte)
    pub precision: u32,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            width: 0,
            precision: 0,
        }
    }

    pub fn with_width(mut self, width: u32, precision: u32) -> Self {
        self.width = width;
        self.precision = precision;
        self
    }
}

/// Valeur d'un champ
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    String(String),
    /// Date ISO `YYYY-MM-DD`
    Date(String),
    /// Heure ISO `HH:MM:SS`
    Time(String),
    /// Date-heure ISO `YYYY-MM-DDTHH:MM:SS`
    DateTime(String),
    Binary(Vec<u8>),
    IntegerList(Vec<i64>),
    RealList(Vec<f64>),
    StringList(Vec<String>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Valeur numérique, si la valeur s'y prête
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Real(r) => Some(*r),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Représentation texte (None pour Null)
    ///
    /// Les listes sont rendues sous la forme `(n:a,b,c)`, le binaire en hexadécimal.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            FieldValue::Null => return None,
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Real(r) => format_real(*r),
            FieldValue::String(s)
            | FieldValue::Date(s)
            | FieldValue::Time(s)
            | FieldValue::DateTime(s) => s.clone(),
            FieldValue::Binary(bytes) => bytes.iter().map(|b| format!("{:02X}", b)).collect(),
            FieldValue::IntegerList(values) => format_list(values.iter().map(|v| v.to_string())),
            FieldValue::RealList(values) => format_list(values.iter().map(|v| format_real(*v))),
            FieldValue::StringList(values) => format_list(values.iter().cloned()),
        };
        Some(text)
    }

    /// Convertit la valeur vers le type d'un champ destination
    pub fn convert(&self, target: FieldType) -> Result<FieldValue, String> {
        if self.is_null() {
            return Ok(FieldValue::Null);
        }

        let converted = match (target, self) {
            (FieldType::String, value) => FieldValue::String(value.to_text().unwrap_or_default()),

            (FieldType::Integer | FieldType::Integer64, FieldValue::Integer(i)) => {
                FieldValue::Integer(*i)
            }
            (FieldType::Integer | FieldType::Integer64, FieldValue::Real(r)) => {
                FieldValue::Integer(r.trunc() as i64)
            }
            (FieldType::Integer | FieldType::Integer64, FieldValue::String(s)) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => FieldValue::Integer(i),
                    Err(_) => s
                        .parse::<f64>()
                        .map(|r| FieldValue::Integer(r.trunc() as i64))
                        .map_err(|_| format!("'{s}' is not an integer"))?,
                }
            }

            (FieldType::Real, FieldValue::Integer(i)) => FieldValue::Real(*i as f64),
            (FieldType::Real, FieldValue::Real(r)) => FieldValue::Real(*r),
            (FieldType::Real, FieldValue::String(s)) => s
                .trim()
                .parse()
                .map(FieldValue::Real)
                .map_err(|_| format!("'{s}' is not a real number"))?,

            (
                FieldType::Date,
                FieldValue::String(s) | FieldValue::Date(s) | FieldValue::DateTime(s),
            ) => FieldValue::Date(s.chars().take(10).collect()),
            (FieldType::Time, FieldValue::String(s) | FieldValue::Time(s)) => {
                FieldValue::Time(s.clone())
            }
            (FieldType::DateTime, FieldValue::String(s) | FieldValue::DateTime(s)) => {
                FieldValue::DateTime(s.clone())
            }
            (FieldType::DateTime, FieldValue::Date(s)) => FieldValue::DateTime(format!("{s}T00:00:00")),

            (FieldType::Binary, FieldValue::Binary(bytes)) => FieldValue::Binary(bytes.clone()),
            (FieldType::Binary, FieldValue::String(s)) => FieldValue::Binary(s.as_bytes().to_vec()),

            (FieldType::IntegerList, FieldValue::IntegerList(values)) => {
                FieldValue::IntegerList(values.clone())
            }
            (FieldType::IntegerList, FieldValue::Integer(i)) => FieldValue::IntegerList(vec![*i]),
            (FieldType::RealList, FieldValue::RealList(values)) => {
                FieldValue::RealList(values.clone())
            }
            (FieldType::RealList, FieldValue::IntegerList(values)) => {
                FieldValue::RealList(values.iter().map(|v| *v as f64).collect())
            }
            (FieldType::RealList, value @ (FieldValue::Integer(_) | FieldValue::Real(_))) => {
                FieldValue::RealList(value.as_f64().into_iter().collect())
            }
            (FieldType::StringList, FieldValue::StringList(values)) => {
                FieldValue::StringList(values.clone())
            }
            (FieldType::StringList, FieldValue::IntegerList(values)) => {
                FieldValue::StringList(values.iter().map(|v| v.to_string()).collect())
            }
            (FieldType::StringList, FieldValue::RealList(values)) => {
                FieldValue::StringList(values.iter().map(|v| format_real(*v)).collect())
            }
            (FieldType::StringList, FieldValue::String(s)) => FieldValue::StringList(vec![s.clone()]),

            (target, value) => {
                return Err(format!("cannot convert {:?} to {}", value, target));
            }
        };

        Ok(converted)
    }
}

fn format_real(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

fn format_list(items: impl ExactSizeIterator<Item = String>) -> String {
    let len = items.len();
    let joined: Vec<String> = items.collect();
    format!("({}:{})", len, joined.join(","))
}

/// Géométrie d'une entité
///
/// Les coordonnées sont 2D; l'élévation, quand elle existe, est portée
/// uniformément par tous les sommets de la géométrie.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureGeometry {
    pub shape: Geometry<f64>,
    pub z: Option<f64>,
    pub srs: Option<SpatialRef>,
}

impl FeatureGeometry {
    pub fn new(shape: Geometry<f64>) -> Self {
        Self {
            shape,
            z: None,
            srs: None,
        }
    }

    pub fn with_srs(mut self, srs: Option<SpatialRef>) -> Self {
        self.srs = srs;
        self
    }

    pub fn is_3d(&self) -> bool {
        self.z.is_some()
    }

    /// Type de la géométrie, dimension Z comprise
    pub fn kind(&self) -> GeometryKind {
        let kind = GeometryKind::of(&self.shape);
        if self.is_3d() {
            kind.with_z()
        } else {
            kind
        }
    }

    /// Nouvelle géométrie qui hérite de l'élévation et du SRS de celle-ci
    pub fn derive(&self, shape: Geometry<f64>) -> Self {
        Self {
            shape,
            z: self.z,
            srs: self.srs.clone(),
        }
    }
}

impl From<Geometry<f64>> for FeatureGeometry {
    fn from(shape: Geometry<f64>) -> Self {
        Self::new(shape)
    }
}

/// Une entité: identifiant, attributs positionnels, géométrie optionnelle
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    pub fid: Option<i64>,
    pub fields: Vec<FieldValue>,
    pub geometry: Option<FeatureGeometry>,
}

impl Feature {
    /// Entité vide avec `field_count` champs nuls
    pub fn new(field_count: usize) -> Self {
        Self {
            fid: None,
            fields: vec![FieldValue::Null; field_count],
            geometry: None,
        }
    }

    pub fn with_fields(fields: Vec<FieldValue>) -> Self {
        Self {
            fid: None,
            fields,
            geometry: None,
        }
    }

    pub fn with_geometry(mut self, shape: impl Into<Geometry<f64>>) -> Self {
        self.geometry = Some(FeatureGeometry::new(shape.into()));
        self
    }

    pub fn with_fid(mut self, fid: i64) -> Self {
        self.fid = Some(fid);
        self
    }

    pub fn field(&self, index: usize) -> Option<&FieldValue> {
        self.fields.get(index)
    }

    /// Valeur numérique d'un champ (0 si nul ou non numérique)
    pub fn field_as_f64(&self, index: usize) -> f64 {
        self.field(index).and_then(FieldValue::as_f64).unwrap_or(0.0)
    }
}

/// Type géométrique à plat (sans dimension)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeometryType {
    /// Type quelconque
    #[default]
    Unknown,
    /// Pas de géométrie
    None,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    fn keyword(self) -> &'static str {
        match self {
            GeometryType::Unknown => "GEOMETRY",
            GeometryType::None => "NONE",
            GeometryType::Point => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
            GeometryType::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }
}

/// Type géométrique avec indicateur Z
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GeometryKind {
    pub flat: GeometryType,
    pub has_z: bool,
}

impl GeometryKind {
    pub const UNKNOWN: GeometryKind = GeometryKind::new(GeometryType::Unknown);

    pub const fn new(flat: GeometryType) -> Self {
        Self { flat, has_z: false }
    }

    pub const fn with_z(self) -> Self {
        Self {
            flat: self.flat,
            has_z: true,
        }
    }

    /// Type d'une géométrie `geo` (Line → LineString, Rect/Triangle → Polygon)
    pub fn of(shape: &Geometry<f64>) -> Self {
        let flat = match shape {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::Line(_) | Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
                GeometryType::Polygon
            }
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryType::GeometryCollection,
        };
        Self::new(flat)
    }

    /// Type d'une couche dont les collections sont éclatées
    pub fn exploded(self) -> Self {
        let flat = match self.flat {
            GeometryType::MultiPoint => GeometryType::Point,
            GeometryType::MultiLineString => GeometryType::LineString,
            GeometryType::MultiPolygon => GeometryType::Polygon,
            GeometryType::GeometryCollection => GeometryType::Unknown,
            other => other,
        };
        Self {
            flat,
            has_z: self.has_z,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flat.keyword())?;
        if self.has_z {
            f.write_str("25D")?;
        }
        Ok(())
    }
}

impl FromStr for GeometryKind {
    type Err = PipelineError;

    /// Accepte `POINT`, `MULTIPOLYGON25D`, `GEOMETRY`, `NONE`... (insensible à la casse)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let (name, has_z) = match upper.strip_suffix("25D") {
            Some(base) => (base, true),
            None => (upper.as_str(), false),
        };

        let flat = [
            GeometryType::Unknown,
            GeometryType::None,
            GeometryType::Point,
            GeometryType::LineString,
            GeometryType::Polygon,
            GeometryType::MultiPoint,
            GeometryType::MultiLineString,
            GeometryType::MultiPolygon,
            GeometryType::GeometryCollection,
        ]
        .into_iter()
        .find(|t| t.keyword() == name)
        .ok_or_else(|| PipelineError::invalid_option(format!("unknown geometry type: {s}")))?;

        Ok(Self { flat, has_z })
    }
}

/// Référence spatiale (définition textuelle: `EPSG:2154`, WKT, proj string...)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpatialRef(String);

impl SpatialRef {
    /// Parse une définition; un code numérique seul est lu comme un code EPSG
    pub fn new(definition: &str) -> Result<Self, PipelineError> {
        let definition = definition.trim();
        if definition.is_empty() {
            return Err(PipelineError::invalid_option("empty spatial reference"));
        }

        if definition.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self(format!("EPSG:{definition}")));
        }

        match definition.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => {
                let code: u32 = code.trim().parse().map_err(|_| {
                    PipelineError::invalid_option(format!("invalid EPSG code: {definition}"))
                })?;
                Ok(Self::from_epsg(code))
            }
            _ => Ok(Self(definition.to_string())),
        }
    }

    pub fn from_epsg(code: u32) -> Self {
        Self(format!("EPSG:{code}"))
    }

    pub fn definition(&self) -> &str {
        &self.0
    }

    /// Code EPSG, si la définition en est un
    pub fn epsg(&self) -> Option<u32> {
        self.0.strip_prefix("EPSG:")?.parse().ok()
    }
}

impl fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point};

    #[test]
    fn test_field_type_from_str() {
        assert_eq!("integer".parse::<FieldType>().unwrap(), FieldType::Integer);
        assert_eq!("DateTime".parse::<FieldType>().unwrap(), FieldType::DateTime);
        assert!("Blob".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_convert_to_string() {
        assert_eq!(
            FieldValue::Integer(42).convert(FieldType::String).unwrap(),
            FieldValue::String("42".into())
        );
        assert_eq!(
            FieldValue::IntegerList(vec![1, 2, 3])
                .convert(FieldType::String)
                .unwrap(),
            FieldValue::String("(3:1,2,3)".into())
        );
        assert_eq!(
            FieldValue::Null.convert(FieldType::String).unwrap(),
            FieldValue::Null
        );
    }

    #[test]
    fn test_convert_numeric() {
        assert_eq!(
            FieldValue::String(" 12 ".into())
                .convert(FieldType::Integer)
                .unwrap(),
            FieldValue::Integer(12)
        );
        assert_eq!(
            FieldValue::Real(3.9).convert(FieldType::Integer64).unwrap(),
            FieldValue::Integer(3)
        );
        assert!(FieldValue::String("abc".into())
            .convert(FieldType::Real)
            .is_err());
        assert!(FieldValue::Binary(vec![1]).convert(FieldType::Integer).is_err());
    }

    #[test]
    fn test_field_as_f64() {
        let feature = Feature::with_fields(vec![
            FieldValue::Real(12.5),
            FieldValue::Null,
            FieldValue::String("x".into()),
        ]);
        assert_eq!(feature.field_as_f64(0), 12.5);
        assert_eq!(feature.field_as_f64(1), 0.0);
        assert_eq!(feature.field_as_f64(2), 0.0);
        assert_eq!(feature.field_as_f64(9), 0.0);
    }

    #[test]
    fn test_geometry_kind_parse_and_display() {
        let kind: GeometryKind = "multipolygon25d".parse().unwrap();
        assert_eq!(kind.flat, GeometryType::MultiPolygon);
        assert!(kind.has_z);
        assert_eq!(kind.to_string(), "MULTIPOLYGON25D");
        assert!("TRIANGLE".parse::<GeometryKind>().is_err());
    }

    #[test]
    fn test_geometry_kind_exploded() {
        let kind = GeometryKind::new(GeometryType::MultiLineString).with_z();
        assert_eq!(
            kind.exploded(),
            GeometryKind::new(GeometryType::LineString).with_z()
        );
        assert_eq!(
            GeometryKind::new(GeometryType::GeometryCollection).exploded(),
            GeometryKind::UNKNOWN
        );
    }

    #[test]
    fn test_feature_geometry_kind() {
        let mut geom = FeatureGeometry::new(Geometry::LineString(
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)],
        ));
        assert_eq!(geom.kind().to_string(), "LINESTRING");
        geom.z = Some(10.0);
        assert_eq!(geom.kind().to_string(), "LINESTRING25D");

        let point = FeatureGeometry::new(Geometry::Point(point!(x: 1.0, y: 2.0)));
        assert_eq!(point.kind().flat, GeometryType::Point);
    }

    #[test]
    fn test_spatial_ref_normalisation() {
        assert_eq!(SpatialRef::new("2154").unwrap().definition(), "EPSG:2154");
        assert_eq!(SpatialRef::new("epsg: 4326").unwrap().epsg(), Some(4326));
        assert_eq!(SpatialRef::new("+proj=longlat").unwrap().epsg(), None);
        assert!(SpatialRef::new("  ").is_err());
        assert!(SpatialRef::new("EPSG:abc").is_err());
    }
}
