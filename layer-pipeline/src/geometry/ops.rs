//! Opérations géométriques élémentaires: densification, simplification,
//! intersection avec un masque polygonal

use geo::{
    BooleanOps, Densify, Geometry, GeometryCollection, Intersects, LineString, MultiLineString,
    MultiPoint, MultiPolygon, Point, Polygon, SimplifyVwPreserve,
};

/// Densifie les segments plus longs que `max_distance`
///
/// Retourne `None` pour les géométries sans segment (points) et quand
/// `max_distance` n'est pas strictement positive.
pub fn segmentize(shape: &Geometry<f64>, max_distance: f64) -> Option<Geometry<f64>> {
    // Densify panique sur une distance nulle
    if !(max_distance > 0.0) {
        return None;
    }
    let densified = match shape {
        Geometry::Line(line) => Geometry::LineString(line.densify(max_distance)),
        Geometry::LineString(ls) => Geometry::LineString(ls.densify(max_distance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.densify(max_distance)),
        Geometry::Polygon(poly) => Geometry::Polygon(poly.densify(max_distance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.densify(max_distance)),
        Geometry::Rect(rect) => Geometry::Polygon(rect.densify(max_distance)),
        Geometry::Triangle(tri) => Geometry::Polygon(tri.densify(max_distance)),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection::new_from(
            gc.iter()
                .map(|member| segmentize(member, max_distance).unwrap_or_else(|| member.clone()))
                .collect(),
        )),
        Geometry::Point(_) | Geometry::MultiPoint(_) => return None,
    };
    Some(densified)
}

/// Simplifie en préservant la topologie (Visvalingam-Whyatt)
///
/// `tolerance` est une distance: le seuil d'aire effectif est `tolerance²`.
/// Retourne `None` pour les géométries non simplifiables (points) et quand
/// `tolerance` n'est pas strictement positive.
pub fn simplify_preserve_topology(shape: &Geometry<f64>, tolerance: f64) -> Option<Geometry<f64>> {
    if !(tolerance > 0.0) {
        return None;
    }
    let epsilon = tolerance * tolerance;
    let simplified = match shape {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify_vw_preserve(&epsilon)),
        Geometry::Line(line) => {
            Geometry::LineString(LineString::from(vec![line.start, line.end]))
        }
        Geometry::MultiLineString(mls) => {
            Geometry::MultiLineString(mls.simplify_vw_preserve(&epsilon))
        }
        Geometry::Polygon(poly) => Geometry::Polygon(poly.simplify_vw_preserve(&epsilon)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify_vw_preserve(&epsilon)),
        Geometry::Rect(rect) => Geometry::Polygon(rect.to_polygon()),
        Geometry::Triangle(tri) => Geometry::Polygon(tri.to_polygon()),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection::new_from(
            gc.iter()
                .map(|member| {
                    simplify_preserve_topology(member, tolerance).unwrap_or_else(|| member.clone())
                })
                .collect(),
        )),
        Geometry::Point(_) | Geometry::MultiPoint(_) => return None,
    };
    Some(simplified)
}

/// Intersection d'une géométrie avec un masque polygonal
///
/// Retourne `None` si l'intersection est vide. Les collections sont
/// traitées membre par membre.
pub fn intersection(shape: &Geometry<f64>, mask: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    match shape {
        Geometry::Point(point) => mask.intersects(point).then(|| Geometry::Point(*point)),
        Geometry::MultiPoint(mp) => {
            let inside: Vec<Point<f64>> =
                mp.iter().filter(|p| mask.intersects(*p)).copied().collect();
            match inside.len() {
                0 => None,
                1 => Some(Geometry::Point(inside[0])),
                _ => Some(Geometry::MultiPoint(MultiPoint::new(inside))),
            }
        }
        Geometry::Line(line) => clip_lines(
            MultiLineString::new(vec![LineString::from(vec![line.start, line.end])]),
            mask,
        ),
        Geometry::LineString(ls) => clip_lines(MultiLineString::new(vec![ls.clone()]), mask),
        Geometry::MultiLineString(mls) => clip_lines(mls.clone(), mask),
        Geometry::Polygon(poly) => clip_polygons(MultiPolygon::new(vec![poly.clone()]), mask),
        Geometry::Rect(rect) => clip_polygons(MultiPolygon::new(vec![rect.to_polygon()]), mask),
        Geometry::Triangle(tri) => clip_polygons(MultiPolygon::new(vec![tri.to_polygon()]), mask),
        Geometry::MultiPolygon(mp) => clip_polygons(mp.clone(), mask),
        Geometry::GeometryCollection(gc) => {
            let members: Vec<Geometry<f64>> =
                gc.iter().filter_map(|member| intersection(member, mask)).collect();
            if members.is_empty() {
                None
            } else {
                Some(Geometry::GeometryCollection(GeometryCollection::new_from(
                    members,
                )))
            }
        }
    }
}

fn clip_lines(lines: MultiLineString<f64>, mask: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let clipped = mask.clip(&lines, false);
    let mut parts: Vec<LineString<f64>> = clipped
        .0
        .into_iter()
        .filter(|ls| ls.0.len() >= 2)
        .collect();
    match parts.len() {
        0 => None,
        1 => parts.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(parts))),
    }
}

fn clip_polygons(polygons: MultiPolygon<f64>, mask: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let clipped = polygons.intersection(mask);
    let mut parts: Vec<Polygon<f64>> = clipped
        .0
        .into_iter()
        .filter(|p| p.exterior().0.len() >= 4)
        .collect();
    match parts.len() {
        0 => None,
        1 => parts.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(parts))),
    }
}

/// Géométrie sans aucun sommet ?
pub fn is_empty(shape: &Geometry<f64>) -> bool {
    match shape {
        Geometry::Point(_) | Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => false,
        Geometry::LineString(ls) => ls.0.is_empty(),
        Geometry::Polygon(poly) => poly.exterior().0.is_empty(),
        Geometry::MultiPoint(mp) => mp.0.is_empty(),
        Geometry::MultiLineString(mls) => mls.iter().all(|ls| ls.0.is_empty()),
        Geometry::MultiPolygon(mp) => mp.iter().all(|p| p.exterior().0.is_empty()),
        Geometry::GeometryCollection(gc) => gc.iter().all(is_empty),
    }
}
