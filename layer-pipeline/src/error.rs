//! Types d'erreurs pour le crate layer-pipeline
//!
//! Deux niveaux: `LayerError` pour les erreurs remontées par un driver
//! (couche ou datasource), `PipelineError` pour les erreurs de traduction,
//! classées par portée via [`Severity`].

use thiserror::Error;

/// Erreurs remontées par une couche ou une datasource
#[derive(Debug, Error)]
pub enum LayerError {
    /// Erreur d'I/O du driver
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Couche introuvable
    #[error("No such layer: {0}")]
    NotFound(String),

    /// Opération non supportée par le driver
    #[error("Unsupported operation on layer {layer}: {operation}")]
    Unsupported {
        layer: String,
        operation: &'static str,
    },

    /// Filtre attributaire invalide
    #[error("Invalid attribute filter `{expression}`: {reason}")]
    InvalidFilter { expression: String, reason: String },

    /// Requête SQL invalide
    #[error("Invalid SQL statement `{statement}`: {reason}")]
    InvalidSql { statement: String, reason: String },

    /// Entité refusée par la couche
    #[error("Feature rejected by layer {layer}: {reason}")]
    Rejected { layer: String, reason: String },

    /// Erreur de transaction
    #[error("Transaction error on layer {layer}: {reason}")]
    Transaction { layer: String, reason: String },

    /// Erreur du backend (base de données, format de fichier...)
    #[error("Backend error: {0}")]
    Backend(String),
}

impl LayerError {
    /// Crée une erreur d'opération non supportée
    pub fn unsupported(layer: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            layer: layer.into(),
            operation,
        }
    }

    /// Crée une erreur d'entité refusée
    pub fn rejected(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur de transaction
    pub fn transaction(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transaction {
            layer: layer.into(),
            reason: reason.into(),
        }
    }
}

/// Échec d'une transformation de coordonnées
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransformFailure(pub String);

/// Portée d'une erreur de traduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Arrête toute l'exécution
    RunFatal,
    /// Arrête la couche courante
    LayerFatal,
    /// N'affecte que l'entité courante (fatale à la couche sans skip-failures)
    FeatureFatal,
}

/// Erreurs de traduction d'une couche
#[derive(Debug, Error)]
pub enum PipelineError {
    /// La couche destination existe et ni append ni overwrite ne sont demandés
    #[error("Layer {layer} already exists, and append not requested (use append or overwrite)")]
    LayerExists { layer: String },

    /// La datasource destination ne sait pas créer de couche
    #[error("Layer {layer} not found, and the destination cannot create layers")]
    CannotCreateLayer { layer: String },

    /// Reprojection demandée sans SRS source connu
    #[error("Cannot transform layer {layer}: source layer has no spatial reference (set a source SRS)")]
    MissingSourceSrs { layer: String },

    /// Impossible de construire la transformation de coordonnées
    #[error("Failed to create coordinate transformation from {from} to {to}: {reason}")]
    TransformSetup {
        from: String,
        to: String,
        reason: String,
    },

    /// Option invalide
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Géométrie de découpage invalide
    #[error("Invalid clip geometry: {0}")]
    InvalidClip(String),

    /// Champ sélectionné absent de la couche source
    #[error("Field '{field}' not found in source layer {layer}")]
    MissingField { layer: String, field: String },

    /// La couche destination n'a pas ajouté le champ demandé
    #[error("Destination layer {layer} failed to add field '{field}'")]
    FieldCreation { layer: String, field: String },

    /// Impossible de transposer les attributs d'une entité
    #[error("Unable to translate feature {fid:?} from layer {layer}: {reason}")]
    FeatureMapping {
        layer: String,
        fid: Option<i64>,
        reason: String,
    },

    /// Erreur de couche pendant la traduction
    #[error("Layer {layer}: {source}")]
    Layer {
        layer: String,
        #[source]
        source: LayerError,
    },

    /// Entité refusée par la couche destination
    #[error("Unable to write feature {fid:?} into layer {layer}: {source}")]
    FeatureRejected {
        layer: String,
        fid: Option<i64>,
        #[source]
        source: LayerError,
    },

    /// Échec de reprojection d'une entité
    #[error("Failed to reproject feature {fid:?} (geometry probably out of source or destination SRS): {source}")]
    Reprojection {
        fid: Option<i64>,
        #[source]
        source: TransformFailure,
    },
}

impl PipelineError {
    /// Portée de l'erreur
    pub fn severity(&self) -> Severity {
        match self {
            Self::LayerExists { .. }
            | Self::CannotCreateLayer { .. }
            | Self::MissingSourceSrs { .. }
            | Self::TransformSetup { .. }
            | Self::InvalidOption(_)
            | Self::InvalidClip(_) => Severity::RunFatal,
            Self::MissingField { .. }
            | Self::FieldCreation { .. }
            | Self::FeatureMapping { .. }
            | Self::Layer { .. } => Severity::LayerFatal,
            Self::FeatureRejected { .. } | Self::Reprojection { .. } => Severity::FeatureFatal,
        }
    }

    /// Enveloppe une erreur de driver avec le nom de la couche
    pub fn layer(layer: impl Into<String>, source: LayerError) -> Self {
        Self::Layer {
            layer: layer.into(),
            source,
        }
    }

    /// Crée une erreur d'option invalide
    pub fn invalid_option(message: impl Into<String>) -> Self {
        Self::InvalidOption(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classes() {
        let run = PipelineError::LayerExists {
            layer: "roads".into(),
        };
        assert_eq!(run.severity(), Severity::RunFatal);

        let layer = PipelineError::MissingField {
            layer: "roads".into(),
            field: "name".into(),
        };
        assert_eq!(layer.severity(), Severity::LayerFatal);

        let feature = PipelineError::Reprojection {
            fid: Some(3),
            source: TransformFailure("out of bounds".into()),
        };
        assert_eq!(feature.severity(), Severity::FeatureFatal);
    }

    #[test]
    fn test_layer_error_message() {
        let err = PipelineError::layer("roads", LayerError::unsupported("roads", "delete"));
        let message = err.to_string();
        assert!(message.contains("roads"));
        assert!(message.contains("delete"));
    }
}
