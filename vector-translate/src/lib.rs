//! # vector-translate
//!
//! Traduction de couches vectorielles entre datasources (GeoJSON, PostGIS,
//! mémoire), dans l'esprit d'ogr2ogr.
//!
//! ## Features
//!
//! - Sélection de couches, de champs, filtres attributaire et spatial
//! - Reprojection (feature `reproject`, via PROJ)
//! - Découpage, simplification, densification, éclatement des collections
//! - Écriture transactionnelle par groupes, skip-failures
//! - Rapport d'exécution JSON
//!
//! ## Usage CLI
//!
//! ```bash
//! # GeoJSON vers PostGIS, reprojeté en Lambert 93
//! vector-translate -f PostgreSQL "PG:dbname=gis" communes.geojson --t-srs EPSG:2154
//!
//! # Extraction d'une emprise vers un répertoire GeoJSON
//! vector-translate ./out ./in --spat 2.2 48.8 2.5 48.9 --clipsrc spat_extent
//! ```

pub mod cli;
pub mod clip;
pub mod config;
pub mod drivers;
pub mod progress;
pub mod reproject;
pub mod report;
pub mod run;

pub use config::RunConfig;
pub use drivers::pool::{create_pool, DatabaseConfig};
pub use drivers::DriverRegistry;
pub use report::{RunReport, RunStatus};
pub use run::run;
