//! Pipeline d'opérations géométriques appliqué à chaque entité
//!
//! Ordre fixe: élévation, densification/simplification, découpage source,
//! reprojection, découpage destination, conversion de type.

pub mod clip;
pub mod coerce;
pub mod ops;

use std::sync::Arc;

pub use clip::{bbox_polygon, ClipGeometry};
pub use coerce::ForcedType;

use crate::error::PipelineError;
use crate::source::CoordTransform;
use crate::types::{Feature, SpatialRef};

/// Opération géométrique optionnelle (au plus une)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GeomOperation {
    #[default]
    None,
    /// Distance maximale entre deux sommets
    Segmentize(f64),
    /// Tolérance de simplification
    SimplifyPreserveTopology(f64),
}

/// Configuration géométrique, figée pour toute l'exécution
#[derive(Debug, Clone, Default)]
pub struct GeometryOpConfig {
    pub operation: GeomOperation,
    pub explode_collections: bool,
    /// Champ source fournissant l'élévation
    pub z_field: Option<String>,
    pub force_type: Option<ForcedType>,
    /// Découpage dans le SRS source
    pub clip_source: Option<Arc<ClipGeometry>>,
    /// Découpage dans le SRS destination
    pub clip_destination: Option<Arc<ClipGeometry>>,
}

/// Issue du pipeline pour une entité
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryOutcome {
    /// L'entité est à écrire
    Keep,
    /// Intersection vide avec un découpage: l'entité n'est pas écrite
    Dropped,
}

/// Applique la configuration géométrique à une entité
pub struct GeometryPipeline<'a> {
    config: &'a GeometryOpConfig,
    transform: Option<&'a dyn CoordTransform>,
    output_srs: Option<&'a SpatialRef>,
}

impl<'a> GeometryPipeline<'a> {
    pub fn new(config: &'a GeometryOpConfig) -> Self {
        Self {
            config,
            transform: None,
            output_srs: None,
        }
    }

    pub fn with_transform(mut self, transform: Option<&'a dyn CoordTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// SRS assigné aux géométries quand il n'y a pas de reprojection
    pub fn with_output_srs(mut self, srs: Option<&'a SpatialRef>) -> Self {
        self.output_srs = srs;
        self
    }

    /// Transforme la géométrie de l'entité sur place
    ///
    /// Une entité sans géométrie n'est jamais découpée et reste à écrire.
    pub fn run(
        &self,
        feature: &mut Feature,
        z: Option<f64>,
    ) -> Result<GeometryOutcome, PipelineError> {
        let Some(mut geometry) = feature.geometry.take() else {
            return Ok(GeometryOutcome::Keep);
        };

        if let Some(z) = z {
            geometry.z = Some(z);
        }

        let changed = match self.config.operation {
            GeomOperation::None => None,
            GeomOperation::Segmentize(distance) => ops::segmentize(&geometry.shape, distance),
            GeomOperation::SimplifyPreserveTopology(tolerance) => {
                ops::simplify_preserve_topology(&geometry.shape, tolerance)
            }
        };
        if let Some(shape) = changed {
            geometry.shape = shape;
        }

        if let Some(clip) = &self.config.clip_source {
            match ops::intersection(&geometry.shape, clip.mask()) {
                Some(shape) => geometry.shape = shape,
                None => return Ok(GeometryOutcome::Dropped),
            }
        }

        if let Some(transform) = self.transform {
            geometry.shape = transform
                .transform(&geometry.shape)
                .map_err(|source| PipelineError::Reprojection {
                    fid: feature.fid,
                    source,
                })?;
            geometry.srs = Some(transform.target().clone());
        } else if let Some(srs) = self.output_srs {
            geometry.srs = Some(srs.clone());
        }

        if let Some(clip) = &self.config.clip_destination {
            match ops::intersection(&geometry.shape, clip.mask()) {
                Some(shape) => geometry.shape = shape,
                None => return Ok(GeometryOutcome::Dropped),
            }
        }

        if let Some(forced) = self.config.force_type {
            geometry.shape = forced.apply(geometry.shape);
        }

        feature.geometry = Some(geometry);
        Ok(GeometryOutcome::Keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformFailure;
    use geo::{line_string, point, polygon, Geometry, Translate};

    struct Shift {
        target: SpatialRef,
        dx: f64,
    }

    impl CoordTransform for Shift {
        fn target(&self) -> &SpatialRef {
            &self.target
        }

        fn transform(&self, shape: &Geometry<f64>) -> Result<Geometry<f64>, TransformFailure> {
            if self.dx.is_nan() {
                return Err(TransformFailure("point outside projection domain".into()));
            }
            Ok(shape.translate(self.dx, 0.0))
        }
    }

    fn shift(dx: f64) -> Shift {
        Shift {
            target: SpatialRef::from_epsg(3857),
            dx,
        }
    }

    fn square_feature() -> Feature {
        Feature::new(0).with_geometry(polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ])
    }

    #[test]
    fn test_no_geometry_is_kept() {
        let config = GeometryOpConfig {
            clip_source: Some(Arc::new(ClipGeometry::from_bbox(50.0, 50.0, 60.0, 60.0))),
            ..Default::default()
        };
        let mut feature = Feature::new(1);
        let outcome = GeometryPipeline::new(&config).run(&mut feature, None).unwrap();
        assert_eq!(outcome, GeometryOutcome::Keep);
        assert!(feature.geometry.is_none());
    }

    #[test]
    fn test_zero_operation_parameter_leaves_geometry() {
        let line = Geometry::LineString(geo::line_string![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0)]);
        let config = GeometryOpConfig {
            operation: GeomOperation::Segmentize(0.0),
            ..Default::default()
        };
        let mut feature = Feature::new(0).with_geometry(line.clone());
        let outcome = GeometryPipeline::new(&config).run(&mut feature, None).unwrap();
        assert_eq!(outcome, GeometryOutcome::Keep);
        assert_eq!(feature.geometry.unwrap().shape, line);

        let rect = Geometry::Rect(geo::Rect::new((0.0, 0.0), (1.0, 1.0)));
        let config = GeometryOpConfig {
            operation: GeomOperation::SimplifyPreserveTopology(0.0),
            ..Default::default()
        };
        let mut feature = Feature::new(0).with_geometry(rect.clone());
        GeometryPipeline::new(&config).run(&mut feature, None).unwrap();
        assert_eq!(feature.geometry.unwrap().shape, rect);
    }

    #[test]
    fn test_elevation_injected() {
        let config = GeometryOpConfig::default();
        let mut feature = square_feature();
        GeometryPipeline::new(&config)
            .run(&mut feature, Some(312.5))
            .unwrap();
        let geometry = feature.geometry.unwrap();
        assert_eq!(geometry.z, Some(312.5));
        assert_eq!(geometry.kind().to_string(), "POLYGON25D");
    }

    #[test]
    fn test_clip_source_drops_disjoint() {
        let config = GeometryOpConfig {
            clip_source: Some(Arc::new(ClipGeometry::from_bbox(10.0, 10.0, 20.0, 20.0))),
            ..Default::default()
        };
        let mut feature = square_feature();
        let outcome = GeometryPipeline::new(&config).run(&mut feature, None).unwrap();
        assert_eq!(outcome, GeometryOutcome::Dropped);
    }

    #[test]
    fn test_clips_are_applied_in_their_own_srs() {
        // Le découpage source voit x ∈ [0, 2], le découpage destination x ∈ [100, 102]
        let config = GeometryOpConfig {
            clip_source: Some(Arc::new(ClipGeometry::from_bbox(-1.0, -1.0, 3.0, 3.0))),
            clip_destination: Some(Arc::new(ClipGeometry::from_bbox(99.0, -1.0, 101.0, 3.0))),
            ..Default::default()
        };
        let transform = shift(100.0);
        let pipeline = GeometryPipeline::new(&config).with_transform(Some(&transform));

        let mut feature = square_feature();
        assert_eq!(pipeline.run(&mut feature, None).unwrap(), GeometryOutcome::Keep);
        let geometry = feature.geometry.unwrap();
        assert_eq!(geometry.srs, Some(SpatialRef::from_epsg(3857)));
        let Geometry::Polygon(poly) = geometry.shape else {
            panic!("expected a polygon");
        };
        assert!(poly.exterior().coords().all(|c| c.x >= 100.0 - 1e-9 && c.x <= 101.0 + 1e-9));
    }

    #[test]
    fn test_reprojection_failure() {
        let config = GeometryOpConfig::default();
        let transform = shift(f64::NAN);
        let pipeline = GeometryPipeline::new(&config).with_transform(Some(&transform));
        let mut feature = square_feature().with_fid(7);
        let err = pipeline.run(&mut feature, None).unwrap_err();
        assert!(matches!(err, PipelineError::Reprojection { fid: Some(7), .. }));
    }

    #[test]
    fn test_force_type_runs_last() {
        let config = GeometryOpConfig {
            force_type: Some(ForcedType::MultiPolygon),
            clip_destination: Some(Arc::new(ClipGeometry::from_bbox(0.0, 0.0, 1.0, 1.0))),
            ..Default::default()
        };
        let mut feature = square_feature();
        GeometryPipeline::new(&config).run(&mut feature, None).unwrap();
        assert!(matches!(
            feature.geometry.unwrap().shape,
            Geometry::MultiPolygon(_)
        ));
    }

    #[test]
    fn test_output_srs_assigned_without_transform() {
        let config = GeometryOpConfig::default();
        let srs = SpatialRef::from_epsg(2154);
        let mut feature = Feature::new(0).with_geometry(point!(x: 1.0, y: 1.0));
        GeometryPipeline::new(&config)
            .with_output_srs(Some(&srs))
            .run(&mut feature, None)
            .unwrap();
        assert_eq!(feature.geometry.unwrap().srs, Some(srs));
    }
}
