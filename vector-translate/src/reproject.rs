//! Reprojection de géométries avec PROJ
//!
//! Sans le feature `reproject`, seules les transformations identité sont
//! acceptées.

use layer_pipeline::{CoordTransform, PipelineError, SpatialRef, TransformFailure, TransformProvider};

#[cfg(feature = "reproject")]
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
#[cfg(feature = "reproject")]
use proj::Proj;

/// Vérifie si la reprojection est disponible
pub fn is_available() -> bool {
    cfg!(feature = "reproject")
}

/// Fabrique de transformations pour le pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjTransformProvider;

impl TransformProvider for ProjTransformProvider {
    fn create(
        &self,
        source: &SpatialRef,
        target: &SpatialRef,
    ) -> Result<Box<dyn CoordTransform>, PipelineError> {
        Reprojector::new(source, target)
            .map(|r| Box::new(r) as Box<dyn CoordTransform>)
            .map_err(|e| PipelineError::TransformSetup {
                from: source.to_string(),
                to: target.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Reprojection de géométries entre deux systèmes de coordonnées
#[cfg(feature = "reproject")]
pub struct Reprojector {
    /// `None` pour une transformation identité
    proj: Option<Proj>,
    target: SpatialRef,
}

#[cfg(feature = "reproject")]
impl Reprojector {
    /// Crée un reprojector entre deux définitions (EPSG, proj string, WKT)
    pub fn new(source: &SpatialRef, target: &SpatialRef) -> Result<Self, TransformFailure> {
        let proj = if source == target {
            None
        } else {
            let proj = Proj::new_known_crs(source.definition(), target.definition(), None)
                .map_err(|e| {
                    TransformFailure(format!(
                        "Failed to create projection from {} to {}: {}",
                        source, target, e
                    ))
                })?;
            Some(proj)
        };

        Ok(Self {
            proj,
            target: target.clone(),
        })
    }

    /// Transforme une géométrie
    pub fn transform_geometry(&self, geom: &Geometry) -> Result<Geometry, TransformFailure> {
        let Some(proj) = &self.proj else {
            return Ok(geom.clone());
        };

        let transformed = match geom {
            Geometry::Point(p) => Geometry::Point(self.transform_point(proj, p)?),
            Geometry::Line(line) => Geometry::LineString(
                self.transform_linestring(proj, &LineString::new(vec![line.start, line.end]))?,
            ),
            Geometry::LineString(ls) => Geometry::LineString(self.transform_linestring(proj, ls)?),
            Geometry::Polygon(p) => Geometry::Polygon(self.transform_polygon(proj, p)?),
            Geometry::Rect(rect) => {
                Geometry::Polygon(self.transform_polygon(proj, &rect.to_polygon())?)
            }
            Geometry::Triangle(triangle) => {
                Geometry::Polygon(self.transform_polygon(proj, &triangle.to_polygon())?)
            }
            Geometry::MultiPoint(mp) => {
                let points: Result<Vec<Point>, _> =
                    mp.0.iter().map(|p| self.transform_point(proj, p)).collect();
                Geometry::MultiPoint(MultiPoint::new(points?))
            }
            Geometry::MultiLineString(mls) => {
                let lines: Result<Vec<LineString>, _> = mls
                    .0
                    .iter()
                    .map(|ls| self.transform_linestring(proj, ls))
                    .collect();
                Geometry::MultiLineString(MultiLineString::new(lines?))
            }
            Geometry::MultiPolygon(mp) => {
                let polys: Result<Vec<Polygon>, _> =
                    mp.0.iter().map(|p| self.transform_polygon(proj, p)).collect();
                Geometry::MultiPolygon(MultiPolygon::new(polys?))
            }
            Geometry::GeometryCollection(collection) => {
                let members: Result<Vec<Geometry>, _> = collection
                    .iter()
                    .map(|g| self.transform_geometry(g))
                    .collect();
                Geometry::GeometryCollection(members?.into_iter().collect())
            }
        };
        Ok(transformed)
    }

    fn transform_point(&self, proj: &Proj, p: &Point) -> Result<Point, TransformFailure> {
        let (x, y) = proj
            .convert((p.x(), p.y()))
            .map_err(|e| TransformFailure(format!("Coordinate transformation failed: {}", e)))?;
        Ok(Point::new(x, y))
    }

    /// Transforme une LineString (conversion batch)
    fn transform_linestring(&self, proj: &Proj, ls: &LineString) -> Result<LineString, TransformFailure> {
        let mut coords: Vec<(f64, f64)> = ls.0.iter().map(|c| (c.x, c.y)).collect();

        proj.convert_array(&mut coords).map_err(|e| {
            TransformFailure(format!("Batch coordinate transformation failed: {}", e))
        })?;

        if coords.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(TransformFailure("Coordinate outside projection domain".into()));
        }

        let result: Vec<Coord> = coords.into_iter().map(|(x, y)| Coord { x, y }).collect();
        Ok(LineString::new(result))
    }

    fn transform_polygon(&self, proj: &Proj, p: &Polygon) -> Result<Polygon, TransformFailure> {
        let exterior = self.transform_linestring(proj, p.exterior())?;
        let interiors: Result<Vec<LineString>, _> = p
            .interiors()
            .iter()
            .map(|ls| self.transform_linestring(proj, ls))
            .collect();
        Ok(Polygon::new(exterior, interiors?))
    }
}

#[cfg(feature = "reproject")]
impl CoordTransform for Reprojector {
    fn target(&self) -> &SpatialRef {
        &self.target
    }

    fn transform(&self, shape: &Geometry<f64>) -> Result<Geometry<f64>, TransformFailure> {
        self.transform_geometry(shape)
    }
}

/// Reprojector factice - pas de reprojection disponible
#[cfg(not(feature = "reproject"))]
pub struct Reprojector {
    target: SpatialRef,
}

#[cfg(not(feature = "reproject"))]
impl Reprojector {
    /// Échoue sauf pour une transformation identité
    pub fn new(source: &SpatialRef, target: &SpatialRef) -> Result<Self, TransformFailure> {
        if source == target {
            Ok(Self {
                target: target.clone(),
            })
        } else {
            Err(TransformFailure(format!(
                "Reprojection from {} to {} requires the 'reproject' feature. \
                 Build with: cargo build --features reproject",
                source, target
            )))
        }
    }
}

#[cfg(not(feature = "reproject"))]
impl CoordTransform for Reprojector {
    fn target(&self) -> &SpatialRef {
        &self.target
    }

    fn transform(&self, shape: &geo::Geometry<f64>) -> Result<geo::Geometry<f64>, TransformFailure> {
        Ok(shape.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    #[test]
    fn test_identity_transform() {
        let wgs84 = SpatialRef::from_epsg(4326);
        let reprojector = Reprojector::new(&wgs84, &wgs84).unwrap();

        let point = geo::Geometry::Point(Point::new(2.35, 48.85));
        let result = reprojector.transform(&point).unwrap();
        assert_eq!(result, point);
        assert_eq!(reprojector.target(), &wgs84);
    }

    #[cfg(feature = "reproject")]
    #[test]
    fn test_lambert93_to_wgs84() {
        // Paris (environ) - Lambert-93: X=652381, Y=6862047
        let reprojector =
            Reprojector::new(&SpatialRef::from_epsg(2154), &SpatialRef::from_epsg(4326)).unwrap();

        let paris_l93 = Geometry::Point(Point::new(652381.0, 6862047.0));
        let paris_wgs84 = reprojector.transform_geometry(&paris_l93).unwrap();

        if let Geometry::Point(p) = paris_wgs84 {
            assert!(
                p.x() > 2.0 && p.x() < 3.0,
                "Longitude should be around 2.35, got {}",
                p.x()
            );
            assert!(
                p.y() > 48.0 && p.y() < 49.0,
                "Latitude should be around 48.85, got {}",
                p.y()
            );
        } else {
            panic!("Expected Point geometry");
        }
    }

    #[cfg(feature = "reproject")]
    #[test]
    fn test_collection_transform() {
        let reprojector =
            Reprojector::new(&SpatialRef::from_epsg(2154), &SpatialRef::from_epsg(4326)).unwrap();

        let square = Polygon::new(
            LineString::from(vec![
                (652381.0, 6862047.0),
                (652481.0, 6862047.0),
                (652481.0, 6862147.0),
                (652381.0, 6862147.0),
                (652381.0, 6862047.0),
            ]),
            vec![],
        );
        let collection = Geometry::GeometryCollection(
            vec![
                Geometry::Polygon(square),
                Geometry::Point(Point::new(652381.0, 6862047.0)),
            ]
            .into_iter()
            .collect(),
        );

        let Geometry::GeometryCollection(result) =
            reprojector.transform_geometry(&collection).unwrap()
        else {
            panic!("Expected GeometryCollection");
        };
        assert_eq!(result.0.len(), 2);
        if let Geometry::Polygon(p) = &result.0[0] {
            assert_eq!(p.exterior().0.len(), 5);
            let first = &p.exterior().0[0];
            assert!(first.x > 2.0 && first.x < 3.0);
            assert!(first.y > 48.0 && first.y < 49.0);
        } else {
            panic!("Expected Polygon geometry");
        }
    }

    #[test]
    fn test_provider_reports_setup_failure() {
        let err = ProjTransformProvider
            .create(&SpatialRef::from_epsg(99999), &SpatialRef::from_epsg(4326))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::TransformSetup { .. }));
    }
}
