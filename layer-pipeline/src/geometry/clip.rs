//! Géométries de découpage

use geo::{BooleanOps, Geometry, LineString, MultiPolygon, Polygon};
use geozero::wkt::Wkt;
use geozero::ToGeo;

use crate::error::PipelineError;
use crate::types::GeometryKind;

/// Polygone rectangulaire `(xmin, ymin) → (xmax, ymax)`
pub fn bbox_polygon(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (xmin, ymin),
            (xmin, ymax),
            (xmax, ymax),
            (xmax, ymin),
            (xmin, ymin),
        ]),
        vec![],
    )
}

/// Masque de découpage (union des polygones fournis)
///
/// Chargé une fois par exécution et partagé en lecture seule.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipGeometry(MultiPolygon<f64>);

impl Default for ClipGeometry {
    fn default() -> Self {
        Self(MultiPolygon::new(vec![]))
    }
}

impl ClipGeometry {
    pub fn from_bbox(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self(MultiPolygon::new(vec![bbox_polygon(xmin, ymin, xmax, ymax)]))
    }

    /// Parse un POLYGON ou MULTIPOLYGON WKT
    pub fn from_wkt(wkt: &str) -> Result<Self, PipelineError> {
        let shape = Wkt(wkt)
            .to_geo()
            .map_err(|e| PipelineError::InvalidClip(format!("invalid WKT: {e}")))?;
        let mut clip = Self::default();
        clip.push(&shape)?;
        Ok(clip)
    }

    /// Ajoute (par union) une géométrie surfacique au masque
    pub fn push(&mut self, shape: &Geometry<f64>) -> Result<(), PipelineError> {
        let added = match shape {
            Geometry::Polygon(poly) => MultiPolygon::new(vec![poly.clone()]),
            Geometry::MultiPolygon(mp) => mp.clone(),
            Geometry::Rect(rect) => MultiPolygon::new(vec![rect.to_polygon()]),
            other => {
                return Err(PipelineError::InvalidClip(format!(
                    "geometry not of polygon type: {}",
                    GeometryKind::of(other)
                )));
            }
        };
        self.0 = if self.is_empty() {
            added
        } else {
            self.0.union(&added)
        };
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.0 .0.is_empty()
    }

    pub fn mask(&self) -> &MultiPolygon<f64> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, Area};

    #[test]
    fn test_from_bbox() {
        let clip = ClipGeometry::from_bbox(0.0, 0.0, 10.0, 5.0);
        assert_eq!(clip.mask().0.len(), 1);
        assert!((clip.mask().unsigned_area() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_wkt() {
        let clip = ClipGeometry::from_wkt("POLYGON((0 0,4 0,4 4,0 4,0 0))").unwrap();
        assert!((clip.mask().unsigned_area() - 16.0).abs() < 1e-9);

        let multi = ClipGeometry::from_wkt(
            "MULTIPOLYGON(((0 0,1 0,1 1,0 1,0 0)),((5 5,6 5,6 6,5 6,5 5)))",
        )
        .unwrap();
        assert_eq!(multi.mask().0.len(), 2);
    }

    #[test]
    fn test_push_unions_overlaps() {
        let mut clip = ClipGeometry::from_bbox(0.0, 0.0, 2.0, 2.0);
        clip.push(&Geometry::Polygon(bbox_polygon(1.0, 1.0, 3.0, 3.0)))
            .unwrap();
        assert_eq!(clip.mask().0.len(), 1);
        assert!((clip.mask().unsigned_area() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_polygons() {
        assert!(ClipGeometry::from_wkt("POINT(1 2)").is_err());
        assert!(ClipGeometry::from_wkt("not wkt").is_err());

        let mut clip = ClipGeometry::default();
        assert!(clip.push(&Geometry::Point(point!(x: 0.0, y: 0.0))).is_err());
        assert!(clip.is_empty());
    }
}
