//! Driver GeoJSON
//!
//! Une datasource est un fichier (une seule couche) ou un répertoire
//! (une couche par fichier `.geojson`/`.json`, nommée d'après le fichier).
//! Les couches sont chargées en mémoire à l'ouverture; les couches créées ou
//! modifiées sont réécrites à la fermeture, en streaming avec geozero.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use geo::Geometry;
use geojson::feature::Id;
use geojson::{GeoJson, JsonObject, JsonValue};
use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;
use layer_pipeline::{
    DataSource, Feature, FeatureGeometry, FieldSpec, FieldType, FieldValue, GeometryKind,
    GeometryType, Layer, LayerError, MemoryDataSource, MemoryLayer, SpatialRef,
};
use regex::Regex;
use tracing::{debug, info};

/// SRS implicite d'un fichier GeoJSON sans membre `crs`
const DEFAULT_EPSG: u32 = 4326;

pub struct GeoJsonDriver;

fn has_geojson_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("geojson") || e.eq_ignore_ascii_case("json"))
}

impl super::Driver for GeoJsonDriver {
    fn name(&self) -> &'static str {
        "GeoJSON"
    }

    fn can_open(&self, path: &str) -> bool {
        let path = Path::new(path);
        (path.is_file() && has_geojson_extension(path)) || path.is_dir()
    }

    fn open(&self, path: &str, update: bool) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(GeoJsonDataSource::open(Path::new(path), update)?))
    }

    fn create(&self, path: &str, options: &[String]) -> Result<Box<dyn DataSource>> {
        if !options.is_empty() {
            debug!(?options, "GeoJSON driver ignores datasource creation options");
        }
        Ok(Box::new(GeoJsonDataSource::create(Path::new(path))?))
    }
}

/// Emplacement physique de la datasource
#[derive(Debug, Clone)]
enum Target {
    /// Un seul fichier, une seule couche
    File(PathBuf),
    /// Un fichier par couche
    Directory(PathBuf),
}

/// Datasource GeoJSON
pub struct GeoJsonDataSource {
    target: Target,
    layers: MemoryDataSource,
    writable: bool,
    /// Nombre d'entités et de champs de chaque couche au dernier enregistrement
    saved: HashMap<String, (usize, usize)>,
    /// Fichiers des couches supprimées
    removed: Vec<PathBuf>,
}

impl GeoJsonDataSource {
    /// Ouvre un fichier ou un répertoire existant
    pub fn open(path: &Path, update: bool) -> Result<Self> {
        let (target, files) = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .context(format!("Failed to read directory: {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_geojson_extension(p))
                .collect();
            files.sort();
            (Target::Directory(path.to_path_buf()), files)
        } else if path.is_file() {
            (Target::File(path.to_path_buf()), vec![path.to_path_buf()])
        } else {
            bail!("Unable to open datasource `{}'", path.display());
        };

        let mut layers = MemoryDataSource::new(path.display().to_string());
        let mut saved = HashMap::new();
        for file in &files {
            let layer = read_layer(file)?;
            saved.insert(layer.name().to_string(), (layer.len(), layer.schema().len()));
            info!(
                file = %file.display(),
                layer = layer.name(),
                features = layer.len(),
                "GeoJSON layer loaded"
            );
            layers.push_layer(layer);
        }

        Ok(Self {
            target,
            layers,
            writable: update,
            saved,
            removed: Vec::new(),
        })
    }

    /// Nouvelle datasource: un fichier si le chemin a une extension GeoJSON,
    /// sinon un répertoire
    pub fn create(path: &Path) -> Result<Self> {
        let target = if has_geojson_extension(path) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
            Target::File(path.to_path_buf())
        } else {
            std::fs::create_dir_all(path)
                .context(format!("Failed to create directory: {}", path.display()))?;
            Target::Directory(path.to_path_buf())
        };

        Ok(Self {
            target,
            layers: MemoryDataSource::new(path.display().to_string()),
            writable: true,
            saved: HashMap::new(),
            removed: Vec::new(),
        })
    }

    fn layer_path(&self, name: &str) -> PathBuf {
        match &self.target {
            Target::File(path) => path.clone(),
            Target::Directory(dir) => dir.join(format!("{}.geojson", name)),
        }
    }

    /// Réécrit les couches créées ou modifiées
    fn flush(&mut self) -> Result<(), LayerError> {
        for path in self.removed.drain(..) {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }

        for layer in self.layers.layers() {
            let state = (layer.len(), layer.schema().len());
            if self.saved.get(layer.name()) == Some(&state) {
                continue;
            }
            let path = self.layer_path(layer.name());
            write_layer(layer, &path)?;
            info!(
                layer = layer.name(),
                file = %path.display(),
                features = layer.len(),
                "GeoJSON layer written"
            );
            self.saved.insert(layer.name().to_string(), state);
        }
        Ok(())
    }
}

impl DataSource for GeoJsonDataSource {
    fn name(&self) -> &str {
        self.layers.name()
    }

    fn layer_count(&self) -> usize {
        self.layers.layer_count()
    }

    fn layer(&mut self, index: usize) -> Option<&mut dyn Layer> {
        self.layers.layer(index)
    }

    fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.layer_index(name)
    }

    fn execute_sql(
        &mut self,
        statement: &str,
        spatial_filter: Option<&geo::Polygon<f64>>,
    ) -> Result<Box<dyn Layer>, LayerError> {
        self.layers.execute_sql(statement, spatial_filter)
    }

    fn can_create_layer(&self) -> bool {
        match self.target {
            Target::File(_) => self.writable && self.layers.layer_count() == 0,
            Target::Directory(_) => self.writable,
        }
    }

    fn create_layer(
        &mut self,
        name: &str,
        srs: Option<&SpatialRef>,
        kind: GeometryKind,
        options: &[String],
    ) -> Result<usize, LayerError> {
        if !self.writable {
            return Err(LayerError::unsupported(name, "create layer on a read-only datasource"));
        }
        if matches!(self.target, Target::File(_)) && self.layers.layer_count() > 0 {
            return Err(LayerError::unsupported(
                name,
                "a GeoJSON file holds a single layer",
            ));
        }
        self.layers.create_layer(name, srs, kind, options)
    }

    fn delete_layer(&mut self, index: usize) -> Result<(), LayerError> {
        if !self.writable {
            return Err(LayerError::unsupported(
                self.layers.name(),
                "delete layer on a read-only datasource",
            ));
        }
        let name = self
            .layers
            .layers()
            .get(index)
            .map(|l| l.name().to_string())
            .ok_or_else(|| LayerError::NotFound(format!("layer #{index}")))?;
        self.layers.delete_layer(index)?;
        self.saved.remove(&name);
        if matches!(self.target, Target::Directory(_)) {
            self.removed.push(self.layer_path(&name));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), LayerError> {
        if self.writable {
            self.flush()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lecture
// ---------------------------------------------------------------------------

/// Date, heure ou date-heure ISO
fn temporal_type(s: &str) -> Option<FieldType> {
    static PATTERNS: OnceLock<Vec<(Regex, FieldType)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            (r"^\d{4}-\d{2}-\d{2}$", FieldType::Date),
            (r"^\d{2}:\d{2}:\d{2}(\.\d+)?$", FieldType::Time),
            (
                r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?$",
                FieldType::DateTime,
            ),
        ]
        .into_iter()
        .filter_map(|(re, kind)| Regex::new(re).ok().map(|re| (re, kind)))
        .collect()
    });
    patterns
        .iter()
        .find(|(re, _)| re.is_match(s))
        .map(|(_, kind)| *kind)
}

/// Type observé pour une valeur JSON (`None` pour null)
fn classify(value: &JsonValue) -> Option<FieldType> {
    let kind = match value {
        JsonValue::Null => return None,
        JsonValue::Bool(_) => FieldType::Integer,
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => FieldType::Integer,
            Some(_) => FieldType::Integer64,
            None => FieldType::Real,
        },
        JsonValue::String(s) => temporal_type(s).unwrap_or(FieldType::String),
        JsonValue::Object(_) => FieldType::String,
        JsonValue::Array(items) => {
            if items.iter().all(|v| v.as_i64().is_some()) {
                FieldType::IntegerList
            } else if items.iter().all(JsonValue::is_number) {
                FieldType::RealList
            } else {
                FieldType::StringList
            }
        }
    };
    Some(kind)
}

/// Type commun à deux observations
fn merge(current: FieldType, seen: FieldType) -> FieldType {
    use FieldType::*;
    match (current, seen) {
        (a, b) if a == b => a,
        (Integer | Integer64, Integer | Integer64) => Integer64,
        (Integer | Integer64 | Real, Integer | Integer64 | Real) => Real,
        (Date | DateTime, Date | DateTime) => DateTime,
        (IntegerList | RealList, IntegerList | RealList) => RealList,
        (IntegerList | RealList | StringList, IntegerList | RealList | StringList) => StringList,
        _ => String,
    }
}

/// Schéma déduit des propriétés (ordre de première apparition)
fn infer_schema<'a>(properties: impl Iterator<Item = &'a JsonObject>) -> Vec<FieldSpec> {
    let mut order: Vec<String> = Vec::new();
    let mut types: HashMap<String, Option<FieldType>> = HashMap::new();

    for object in properties {
        for (key, value) in object {
            let entry = types.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                None
            });
            if let Some(seen) = classify(value) {
                *entry = Some(match *entry {
                    Some(current) => merge(current, seen),
                    None => seen,
                });
            }
        }
    }

    order
        .into_iter()
        .map(|name| {
            let field_type = types.get(&name).copied().flatten().unwrap_or(FieldType::String);
            FieldSpec::new(name, field_type)
        })
        .collect()
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Valeur JSON vers le type du champ
fn field_value(value: &JsonValue, field_type: FieldType) -> FieldValue {
    match (value, field_type) {
        (JsonValue::Null, _) => FieldValue::Null,
        (JsonValue::Bool(b), FieldType::Integer | FieldType::Integer64) => {
            FieldValue::Integer(i64::from(*b))
        }
        (JsonValue::Number(n), FieldType::Integer | FieldType::Integer64) => n
            .as_i64()
            .map(FieldValue::Integer)
            .unwrap_or(FieldValue::Null),
        (JsonValue::Number(n), FieldType::Real) => {
            n.as_f64().map(FieldValue::Real).unwrap_or(FieldValue::Null)
        }
        (JsonValue::String(s), FieldType::Date) => FieldValue::Date(s.clone()),
        (JsonValue::String(s), FieldType::Time) => FieldValue::Time(s.clone()),
        (JsonValue::String(s), FieldType::DateTime) => FieldValue::DateTime(s.clone()),
        (JsonValue::Array(items), FieldType::IntegerList) => {
            FieldValue::IntegerList(items.iter().filter_map(JsonValue::as_i64).collect())
        }
        (JsonValue::Array(items), FieldType::RealList) => {
            FieldValue::RealList(items.iter().filter_map(JsonValue::as_f64).collect())
        }
        (JsonValue::Array(items), FieldType::StringList) => {
            FieldValue::StringList(items.iter().map(json_text).collect())
        }
        (other, _) => FieldValue::String(json_text(other)),
    }
}

/// SRS déclaré par le membre `crs` (EPSG:4326 à défaut)
fn parse_crs(foreign_members: Option<&JsonObject>) -> SpatialRef {
    static EPSG: OnceLock<Option<Regex>> = OnceLock::new();
    let name = foreign_members
        .and_then(|m| m.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|p| p.get("name"))
        .and_then(JsonValue::as_str);

    let Some(name) = name else {
        return SpatialRef::from_epsg(DEFAULT_EPSG);
    };
    if name.contains("CRS84") {
        return SpatialRef::from_epsg(DEFAULT_EPSG);
    }
    let code = EPSG
        .get_or_init(|| Regex::new(r"(?i)EPSG:+(\d+)$").ok())
        .as_ref()
        .and_then(|re| re.captures(name))
        .and_then(|caps| caps[1].parse::<u32>().ok());
    match code {
        Some(code) => SpatialRef::from_epsg(code),
        None => SpatialRef::new(name).unwrap_or_else(|_| SpatialRef::from_epsg(DEFAULT_EPSG)),
    }
}

/// Charge un fichier GeoJSON dans une couche mémoire
pub fn read_layer(path: &Path) -> Result<MemoryLayer> {
    let file =
        File::open(path).context(format!("Failed to open file: {}", path.display()))?;
    let geojson = GeoJson::from_reader(BufReader::new(file))
        .context(format!("Failed to parse GeoJSON: {}", path.display()))?;

    let (features, foreign_members) = match geojson {
        GeoJson::FeatureCollection(collection) => {
            (collection.features, collection.foreign_members)
        }
        GeoJson::Feature(feature) => (vec![feature], None),
        GeoJson::Geometry(geometry) => (vec![geojson::Feature::from(geometry)], None),
    };

    let srs = parse_crs(foreign_members.as_ref());
    let empty = JsonObject::new();
    let schema = infer_schema(
        features
            .iter()
            .map(|f| f.properties.as_ref().unwrap_or(&empty)),
    );

    let mut kinds: HashSet<GeometryKind> = HashSet::new();
    let mut rows = Vec::with_capacity(features.len());
    let mut fids = HashSet::new();
    for feature in features {
        let geometry = match feature.geometry {
            Some(geometry) => {
                let shape = Geometry::<f64>::try_from(geometry).context(format!(
                    "Failed to convert GeoJSON geometry in {}",
                    path.display()
                ))?;
                kinds.insert(GeometryKind::of(&shape));
                Some(FeatureGeometry::new(shape).with_srs(Some(srs.clone())))
            }
            None => {
                kinds.insert(GeometryKind::new(GeometryType::None));
                None
            }
        };

        let properties = feature.properties.as_ref().unwrap_or(&empty);
        let fields = schema
            .iter()
            .map(|spec| {
                properties
                    .get(&spec.name)
                    .map(|v| field_value(v, spec.field_type))
                    .unwrap_or_default()
            })
            .collect();

        // Identifiants numériques uniques seulement
        let fid = match &feature.id {
            Some(Id::Number(n)) => n.as_i64().filter(|fid| fids.insert(*fid)),
            _ => None,
        };

        rows.push(Feature {
            fid,
            fields,
            geometry,
        });
    }

    let kind = match kinds.len() {
        1 => kinds.into_iter().next().unwrap_or(GeometryKind::UNKNOWN),
        _ => GeometryKind::UNKNOWN,
    };
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("layer")
        .to_string();

    let mut layer = MemoryLayer::new(name, kind, Some(srs)).with_fields(schema);
    for row in rows {
        layer
            .create_feature(row)
            .context(format!("Invalid feature in {}", path.display()))?;
    }
    Ok(layer)
}

// ---------------------------------------------------------------------------
// Écriture
// ---------------------------------------------------------------------------

/// Écrit une couche en FeatureCollection (streaming avec geozero)
pub fn write_layer(layer: &MemoryLayer, output_path: &Path) -> Result<(), LayerError> {
    let file = File::create(output_path)?;
    let mut writer = BufWriter::new(file);

    // Header FeatureCollection avec nom et CRS
    write!(
        writer,
        r#"{{"type":"FeatureCollection","name":{},"#,
        json_string(layer.name())?
    )?;
    if let Some(srs) = layer.spatial_ref() {
        let name = match srs.epsg() {
            Some(code) => format!("urn:ogc:def:crs:EPSG::{}", code),
            None => srs.definition().to_string(),
        };
        write!(
            writer,
            r#""crs":{{"type":"name","properties":{{"name":{}}}}},"#,
            json_string(&name)?
        )?;
    }
    write!(writer, r#""features":["#)?;

    for (i, feature) in layer.features().iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_feature(&mut writer, layer.schema(), feature)?;
    }

    write!(writer, "]}}")?;
    writer.flush()?;
    Ok(())
}

/// Écrit une entité GeoJSON
fn write_feature<W: Write>(
    writer: &mut W,
    schema: &[FieldSpec],
    feature: &Feature,
) -> Result<(), LayerError> {
    write!(writer, r#"{{"type":"Feature","#)?;
    if let Some(fid) = feature.fid {
        write!(writer, r#""id":{},"#, fid)?;
    }

    write!(writer, r#""geometry":"#)?;
    match &feature.geometry {
        Some(geometry) => write_geometry(writer, geometry)?,
        None => write!(writer, "null")?,
    }

    write!(writer, r#","properties":{{"#)?;
    for (i, (spec, value)) in schema.iter().zip(&feature.fields).enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write!(writer, "{}:", json_string(&spec.name)?)?;
        serde_json::to_writer(&mut *writer, &json_value(value))
            .map_err(|e| LayerError::Backend(e.to_string()))?;
    }
    write!(writer, "}}}}")?;
    Ok(())
}

/// Géométrie 2D via geozero, ou via geojson quand une élévation est portée
fn write_geometry<W: Write>(writer: &mut W, geometry: &FeatureGeometry) -> Result<(), LayerError> {
    let shape = super::simple_shape(&geometry.shape);
    match geometry.z {
        None => {
            let mut geom_buf = Vec::new();
            let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
            shape
                .process_geom(&mut geom_writer)
                .map_err(|e| LayerError::Backend(e.to_string()))?;
            writer.write_all(&geom_buf)?;
        }
        Some(z) => {
            let mut value = geojson::Value::from(&shape);
            lift(&mut value, z);
            serde_json::to_writer(&mut *writer, &geojson::Geometry::new(value))
                .map_err(|e| LayerError::Backend(e.to_string()))?;
        }
    }
    Ok(())
}

/// Ajoute l'élévation à toutes les positions
fn lift(value: &mut geojson::Value, z: f64) {
    fn position(p: &mut Vec<f64>, z: f64) {
        p.truncate(2);
        p.push(z);
    }

    match value {
        geojson::Value::Point(p) => position(p, z),
        geojson::Value::MultiPoint(points) | geojson::Value::LineString(points) => {
            points.iter_mut().for_each(|p| position(p, z))
        }
        geojson::Value::MultiLineString(lines) | geojson::Value::Polygon(lines) => lines
            .iter_mut()
            .flatten()
            .for_each(|p| position(p, z)),
        geojson::Value::MultiPolygon(polygons) => polygons
            .iter_mut()
            .flatten()
            .flatten()
            .for_each(|p| position(p, z)),
        geojson::Value::GeometryCollection(members) => {
            for member in members {
                lift(&mut member.value, z);
            }
        }
    }
}

fn json_number(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn json_value(value: &FieldValue) -> JsonValue {
    match value {
        FieldValue::Null => JsonValue::Null,
        FieldValue::Integer(i) => JsonValue::from(*i),
        FieldValue::Real(r) => json_number(*r),
        FieldValue::String(s)
        | FieldValue::Date(s)
        | FieldValue::Time(s)
        | FieldValue::DateTime(s) => JsonValue::String(s.clone()),
        FieldValue::Binary(_) => value.to_text().map(JsonValue::String).unwrap_or_default(),
        FieldValue::IntegerList(values) => JsonValue::from(values.clone()),
        FieldValue::RealList(values) => {
            JsonValue::Array(values.iter().map(|v| json_number(*v)).collect())
        }
        FieldValue::StringList(values) => JsonValue::from(values.clone()),
    }
}

/// Chaîne JSON entre guillemets
fn json_string(value: &str) -> Result<String, LayerError> {
    serde_json::to_string(value).map_err(|e| LayerError::Backend(e.to_string()))
}
