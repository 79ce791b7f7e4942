//! Conversion forcée vers un type géométrique
//!
//! Les géométries qui ne peuvent pas être converties sont rendues telles quelles.

use geo::{Geometry, LineString, MultiLineString, MultiPolygon, Polygon};

use crate::types::{GeometryKind, GeometryType};

/// Types cibles supportés par la conversion forcée
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedType {
    Polygon,
    MultiPolygon,
    MultiLineString,
}

impl ForcedType {
    /// Conversion associée à un type de couche demandé
    pub fn from_kind(kind: GeometryKind) -> Option<Self> {
        match kind.flat {
            GeometryType::Polygon => Some(ForcedType::Polygon),
            GeometryType::MultiPolygon => Some(ForcedType::MultiPolygon),
            GeometryType::MultiLineString => Some(ForcedType::MultiLineString),
            _ => None,
        }
    }

    pub fn apply(self, shape: Geometry<f64>) -> Geometry<f64> {
        match self {
            ForcedType::Polygon => force_polygon(shape),
            ForcedType::MultiPolygon => force_multi_polygon(shape),
            ForcedType::MultiLineString => force_multi_line_string(shape),
        }
    }
}

/// Polygones d'une géométrie surfacique (None si un membre ne l'est pas)
fn polygon_parts(shape: &Geometry<f64>) -> Option<Vec<Polygon<f64>>> {
    match shape {
        Geometry::Polygon(poly) => Some(vec![poly.clone()]),
        Geometry::Rect(rect) => Some(vec![rect.to_polygon()]),
        Geometry::Triangle(tri) => Some(vec![tri.to_polygon()]),
        Geometry::MultiPolygon(mp) => Some(mp.0.clone()),
        Geometry::GeometryCollection(gc) => {
            let mut parts = Vec::new();
            for member in gc.iter() {
                parts.extend(polygon_parts(member)?);
            }
            Some(parts)
        }
        _ => None,
    }
}

/// Lignes d'une géométrie linéaire ou surfacique (contours des polygones)
fn line_parts(shape: &Geometry<f64>) -> Option<Vec<LineString<f64>>> {
    match shape {
        Geometry::Line(line) => Some(vec![LineString::from(vec![line.start, line.end])]),
        Geometry::LineString(ls) => Some(vec![ls.clone()]),
        Geometry::MultiLineString(mls) => Some(mls.0.clone()),
        Geometry::Polygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_)
        | Geometry::MultiPolygon(_) => polygon_parts(shape).map(|polys| {
            polys
                .into_iter()
                .flat_map(|p| {
                    let (exterior, interiors) = p.into_inner();
                    std::iter::once(exterior).chain(interiors)
                })
                .collect()
        }),
        Geometry::GeometryCollection(gc) => {
            let mut parts = Vec::new();
            for member in gc.iter() {
                parts.extend(line_parts(member)?);
            }
            Some(parts)
        }
        _ => None,
    }
}

/// Regroupe tous les anneaux dans un seul polygone
///
/// L'extérieur du premier polygone devient l'extérieur, tous les autres
/// anneaux deviennent des trous.
pub fn force_polygon(shape: Geometry<f64>) -> Geometry<f64> {
    if matches!(shape, Geometry::Polygon(_)) {
        return shape;
    }
    let Some(polygons) = polygon_parts(&shape) else {
        return shape;
    };

    let mut rings = polygons.into_iter().flat_map(|p| {
        let (exterior, interiors) = p.into_inner();
        std::iter::once(exterior).chain(interiors)
    });
    let exterior = rings.next().unwrap_or_else(|| LineString::new(vec![]));
    Geometry::Polygon(Polygon::new(exterior, rings.collect()))
}

pub fn force_multi_polygon(shape: Geometry<f64>) -> Geometry<f64> {
    if matches!(shape, Geometry::MultiPolygon(_)) {
        return shape;
    }
    match polygon_parts(&shape) {
        Some(polygons) => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
        None => shape,
    }
}

pub fn force_multi_line_string(shape: Geometry<f64>) -> Geometry<f64> {
    if matches!(shape, Geometry::MultiLineString(_)) {
        return shape;
    }
    match line_parts(&shape) {
        Some(lines) => Geometry::MultiLineString(MultiLineString::new(lines)),
        None => shape,
    }
}
