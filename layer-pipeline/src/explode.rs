//! Éclatement des collections géométriques en entités unitaires

use geo::Geometry;

use crate::types::FeatureGeometry;

/// Nombre de membres d'une collection (None pour une géométrie simple)
pub fn member_count(shape: &Geometry<f64>) -> Option<usize> {
    match shape {
        Geometry::MultiPoint(mp) => Some(mp.0.len()),
        Geometry::MultiLineString(mls) => Some(mls.0.len()),
        Geometry::MultiPolygon(mp) => Some(mp.0.len()),
        Geometry::GeometryCollection(gc) => Some(gc.0.len()),
        _ => None,
    }
}

/// Membre `index` d'une collection
pub fn member(shape: &Geometry<f64>, index: usize) -> Option<Geometry<f64>> {
    match shape {
        Geometry::MultiPoint(mp) => mp.0.get(index).copied().map(Geometry::Point),
        Geometry::MultiLineString(mls) => mls.0.get(index).cloned().map(Geometry::LineString),
        Geometry::MultiPolygon(mp) => mp.0.get(index).cloned().map(Geometry::Polygon),
        Geometry::GeometryCollection(gc) => gc.0.get(index).cloned(),
        _ => None,
    }
}

/// Itérateur sur les parties d'une entité
///
/// Produit une partie par membre quand l'éclatement est actif et que la
/// géométrie est une collection non vide, sinon une seule partie: la
/// géométrie d'origine (éventuellement absente).
#[derive(Debug, Clone)]
pub struct ExplodedParts {
    geometry: Option<FeatureGeometry>,
    members: Option<usize>,
    next: usize,
}

impl ExplodedParts {
    /// Nombre total de parties (toujours ≥ 1)
    pub fn part_count(&self) -> usize {
        self.members.unwrap_or(1)
    }
}

impl Iterator for ExplodedParts {
    type Item = Option<FeatureGeometry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.members {
            None => {
                if self.next > 0 {
                    return None;
                }
                self.next = 1;
                Some(self.geometry.take())
            }
            Some(count) => {
                if self.next >= count {
                    return None;
                }
                let index = self.next;
                self.next += 1;
                let geometry = self.geometry.as_ref()?;
                let shape = member(&geometry.shape, index)?;
                Some(Some(geometry.derive(shape)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.part_count().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

/// Découpe la géométrie d'une entité en parties
pub fn explode(geometry: Option<FeatureGeometry>, enabled: bool) -> ExplodedParts {
    let members = if enabled {
        geometry
            .as_ref()
            .and_then(|g| member_count(&g.shape))
            .filter(|&count| count > 0)
    } else {
        None
    };

    ExplodedParts {
        geometry,
        members,
        next: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpatialRef;
    use geo::{point, polygon, MultiPoint, MultiPolygon};

    fn multi_point(n: usize) -> FeatureGeometry {
        let points = (0..n).map(|i| point!(x: i as f64, y: 0.0)).collect();
        FeatureGeometry::new(Geometry::MultiPoint(MultiPoint::new(points)))
    }

    #[test]
    fn test_explode_members() {
        let mut source = multi_point(3);
        source.z = Some(4.0);
        source.srs = Some(SpatialRef::from_epsg(4326));

        let parts: Vec<_> = explode(Some(source), true).collect();
        assert_eq!(parts.len(), 3);
        for (i, part) in parts.iter().enumerate() {
            let part = part.as_ref().unwrap();
            assert_eq!(part.shape, Geometry::Point(point!(x: i as f64, y: 0.0)));
            assert_eq!(part.z, Some(4.0));
            assert_eq!(part.srs, Some(SpatialRef::from_epsg(4326)));
        }
    }

    #[test]
    fn test_disabled_yields_original() {
        let source = multi_point(2);
        let parts: Vec<_> = explode(Some(source.clone()), false).collect();
        assert_eq!(parts, vec![Some(source)]);
    }

    #[test]
    fn test_non_collection_and_empty() {
        let poly = FeatureGeometry::new(Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
        ]));
        assert_eq!(explode(Some(poly), true).count(), 1);

        let empty = FeatureGeometry::new(Geometry::MultiPolygon(MultiPolygon::new(vec![])));
        let parts: Vec<_> = explode(Some(empty.clone()), true).collect();
        assert_eq!(parts, vec![Some(empty)]);

        let parts: Vec<_> = explode(None, true).collect();
        assert_eq!(parts, vec![None]);
    }

    #[test]
    fn test_size_hint() {
        let parts = explode(Some(multi_point(4)), true);
        assert_eq!(parts.part_count(), 4);
        assert_eq!(parts.size_hint(), (4, Some(4)));
    }
}
