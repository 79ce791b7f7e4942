//! Registre des drivers
//!
//! Un driver sait ouvrir une datasource existante et en créer une nouvelle.
//! La recherche par nom est insensible à la casse (`geojson`, `PG`...).

pub mod geojson;
pub mod memory;
pub mod pool;
pub mod postgres;

use anyhow::{bail, Result};
use geo::{Geometry, LineString};
use layer_pipeline::DataSource;

/// Driver de format
pub trait Driver {
    /// Nom court (`GeoJSON`, `PostgreSQL`...)
    fn name(&self) -> &'static str;

    /// Autres noms acceptés par `--format`
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Le driver reconnaît-il ce chemin ?
    fn can_open(&self, path: &str) -> bool;

    fn open(&self, path: &str, update: bool) -> Result<Box<dyn DataSource>>;

    fn create(&self, path: &str, options: &[String]) -> Result<Box<dyn DataSource>>;
}

/// Ensemble des drivers disponibles
pub struct DriverRegistry {
    drivers: Vec<Box<dyn Driver>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self {
            drivers: vec![
                Box::new(postgres::PostgresDriver),
                Box::new(geojson::GeoJsonDriver),
                Box::new(memory::MemoryDriver),
            ],
        }
    }
}

impl DriverRegistry {
    pub fn names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Driver par nom (insensible à la casse)
    pub fn find(&self, name: &str) -> Option<&dyn Driver> {
        self.drivers
            .iter()
            .find(|d| {
                d.name().eq_ignore_ascii_case(name)
                    || d.aliases().iter().any(|a| a.eq_ignore_ascii_case(name))
            })
            .map(|d| d.as_ref())
    }

    /// Ouvre une datasource avec le premier driver qui la reconnaît
    pub fn open(&self, path: &str, update: bool) -> Result<Box<dyn DataSource>> {
        match self.drivers.iter().find(|d| d.can_open(path)) {
            Some(driver) => driver.open(path, update),
            None => bail!(
                "Unable to open datasource `{}' with the following drivers: {}",
                path,
                self.names().join(", ")
            ),
        }
    }

    /// Crée une datasource avec le driver nommé
    pub fn create(
        &self,
        format: &str,
        path: &str,
        options: &[String],
    ) -> Result<Box<dyn DataSource>> {
        match self.find(format) {
            Some(driver) => driver.create(path, options),
            None => bail!(
                "Unable to find driver `{}'. The following drivers are available: {}",
                format,
                self.names().join(", ")
            ),
        }
    }
}

/// Découpe une option `NAME=VALUE` (nom insensible à la casse)
pub fn option_value<'a>(options: &'a [String], name: &str) -> Option<&'a str> {
    options.iter().find_map(|option| {
        let (key, value) = option.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then_some(value.trim())
    })
}

/// Line, Rect et Triangle deviennent LineString et Polygon (types encodables)
pub(crate) fn simple_shape(shape: &Geometry<f64>) -> Geometry<f64> {
    match shape {
        Geometry::Line(line) => Geometry::LineString(LineString::new(vec![line.start, line.end])),
        Geometry::Rect(rect) => Geometry::Polygon(rect.to_polygon()),
        Geometry::Triangle(triangle) => Geometry::Polygon(triangle.to_polygon()),
        Geometry::GeometryCollection(collection) => {
            Geometry::GeometryCollection(collection.iter().map(simple_shape).collect())
        }
        other => other.clone(),
    }
}
