//! Abstractions des drivers: datasources, couches, transformations de coordonnées
//!
//! Le pipeline ne connaît les formats qu'à travers ces traits. Les drivers
//! concrets (mémoire, GeoJSON, PostGIS) les implémentent.

use geo::{Geometry, Polygon};

use crate::error::{LayerError, PipelineError, TransformFailure};
use crate::types::{Feature, FieldSpec, GeometryKind, SpatialRef};

/// Couche vectorielle: schéma, lecture filtrée, écriture transactionnelle
pub trait Layer {
    fn name(&self) -> &str;

    fn schema(&self) -> &[FieldSpec];

    /// Index d'un champ (nom exact)
    fn field_index(&self, name: &str) -> Option<usize> {
        self.schema().iter().position(|f| f.name == name)
    }

    fn geometry_kind(&self) -> GeometryKind;

    fn spatial_ref(&self) -> Option<&SpatialRef>;

    /// Installe (ou retire avec `None`) un filtre attributaire
    fn set_attribute_filter(&mut self, expression: Option<&str>) -> Result<(), LayerError>;

    /// Installe (ou retire avec `None`) un filtre spatial
    fn set_spatial_filter(&mut self, filter: Option<&Polygon<f64>>);

    /// Nombre d'entités si le driver le connaît sans tout parcourir
    fn fast_feature_count(&self) -> Option<u64>;

    fn reset_reading(&mut self);

    /// Entité suivante respectant les filtres, `None` en fin de couche
    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError>;

    /// Lecture directe par identifiant (ignore les filtres)
    fn feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError>;

    fn create_field(&mut self, field: &FieldSpec) -> Result<(), LayerError>;

    /// Écrit une entité et retourne son identifiant
    fn create_feature(&mut self, feature: Feature) -> Result<i64, LayerError>;

    fn start_transaction(&mut self) -> Result<(), LayerError>;

    fn commit_transaction(&mut self) -> Result<(), LayerError>;

    fn rollback_transaction(&mut self) -> Result<(), LayerError>;

    /// Le driver sait-il ne pas lire certains champs ?
    fn supports_ignored_fields(&self) -> bool {
        false
    }

    fn set_ignored_fields(&mut self, _names: &[String]) -> Result<(), LayerError> {
        Ok(())
    }
}

/// Datasource: collection de couches
pub trait DataSource {
    fn name(&self) -> &str;

    fn layer_count(&self) -> usize;

    fn layer(&mut self, index: usize) -> Option<&mut dyn Layer>;

    fn layer_index(&self, name: &str) -> Option<usize>;

    fn layer_by_name(&mut self, name: &str) -> Option<&mut dyn Layer> {
        let index = self.layer_index(name)?;
        self.layer(index)
    }

    /// Exécute une requête et retourne la couche résultat
    fn execute_sql(
        &mut self,
        statement: &str,
        spatial_filter: Option<&Polygon<f64>>,
    ) -> Result<Box<dyn Layer>, LayerError>;

    fn can_create_layer(&self) -> bool;

    /// Crée une couche et retourne son index
    fn create_layer(
        &mut self,
        name: &str,
        srs: Option<&SpatialRef>,
        kind: GeometryKind,
        options: &[String],
    ) -> Result<usize, LayerError>;

    fn delete_layer(&mut self, index: usize) -> Result<(), LayerError>;

    /// Vide les écritures en attente
    fn close(&mut self) -> Result<(), LayerError> {
        Ok(())
    }
}

/// Transformation de coordonnées vers un SRS cible
pub trait CoordTransform {
    fn target(&self) -> &SpatialRef;

    fn transform(&self, shape: &Geometry<f64>) -> Result<Geometry<f64>, TransformFailure>;
}

/// Fabrique de transformations (fournie par l'application)
pub trait TransformProvider {
    fn create(
        &self,
        source: &SpatialRef,
        target: &SpatialRef,
    ) -> Result<Box<dyn CoordTransform>, PipelineError>;
}
