//! # layer-pipeline
//!
//! Moteur de traduction de couches vectorielles: d'une datasource source vers
//! une datasource destination, entité par entité.
//!
//! ## Features
//!
//! - Réconciliation des schémas (sélection, conversion en chaîne, ajout)
//! - Pipeline géométrique: élévation, densification ou simplification,
//!   découpage source et destination, reprojection, conversion de type
//! - Éclatement des collections en entités unitaires
//! - Écriture transactionnelle par groupes, avec skip-failures
//! - Progression proportionnelle au nombre d'entités
//! - Driver mémoire (transactions, filtres, sous-ensemble SQL)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use layer_pipeline::{LayerTranslator, ProgressReporter, TranslationSettings};
//!
//! let settings = TranslationSettings {
//!     group_transactions: 200,
//!     ..Default::default()
//! };
//! let translator = LayerTranslator::new(&settings);
//! let layer = source.layer(0).unwrap();
//! let outcome = translator.translate(layer, &mut destination, &mut ProgressReporter::disabled())?;
//! println!("{}: {} features written", outcome.destination, outcome.written);
//! ```

pub mod error;
pub mod explode;
pub mod filter;
pub mod geometry;
pub mod memory;
pub mod progress;
pub mod schema;
pub mod source;
pub mod translate;
pub mod types;
pub mod writer;

pub use error::{LayerError, PipelineError, Severity, TransformFailure};
pub use geometry::{ClipGeometry, ForcedType, GeomOperation, GeometryOpConfig};
pub use memory::{MemoryDataSource, MemoryLayer};
pub use progress::{ProgressPlan, ProgressRange, ProgressReporter, ProgressSink};
pub use schema::{FieldMap, StringConversion};
pub use source::{CoordTransform, DataSource, Layer, TransformProvider};
pub use translate::{LayerOutcome, LayerTranslator, TranslationSettings};
pub use types::{
    Feature, FeatureGeometry, FieldSpec, FieldType, FieldValue, GeometryKind, GeometryType,
    SpatialRef,
};
