//! Chargement des géométries de découpage (`--clipsrc`, `--clipdst`)
//!
//! Une géométrie de découpage est chargée une seule fois par exécution, puis
//! partagée entre toutes les couches.

use anyhow::{bail, Context, Result};
use layer_pipeline::{ClipGeometry, DataSource, Layer};
use tracing::{debug, info};

use crate::config::{ClipSpec, Extent};
use crate::drivers::DriverRegistry;

/// Construit le masque de découpage décrit par `spec`
///
/// `spat` est l'emprise du filtre spatial, utilisée par `spat_extent`.
pub fn load_clip(
    spec: &ClipSpec,
    spat: Option<Extent>,
    registry: &DriverRegistry,
) -> Result<ClipGeometry> {
    match spec {
        ClipSpec::Bbox(extent) => Ok(extent.to_clip()),
        ClipSpec::Wkt { wkt } => ClipGeometry::from_wkt(wkt)
            .with_context(|| format!("Failed to parse clip geometry: {}", wkt)),
        ClipSpec::SpatialExtent => match spat {
            Some(extent) => Ok(extent.to_clip()),
            None => bail!("spat_extent requires a spatial filter (--spat)"),
        },
        ClipSpec::Datasource {
            path,
            sql,
            layer,
            where_clause,
        } => load_from_datasource(
            registry,
            path,
            sql.as_deref(),
            layer.as_deref(),
            where_clause.as_deref(),
        ),
    }
}

/// Union des polygones d'une couche (ou du résultat d'une requête SQL)
fn load_from_datasource(
    registry: &DriverRegistry,
    path: &str,
    sql: Option<&str>,
    layer_name: Option<&str>,
    where_clause: Option<&str>,
) -> Result<ClipGeometry> {
    let mut datasource = registry
        .open(path, false)
        .with_context(|| format!("Cannot open clip datasource {}", path))?;

    let clip = match sql {
        Some(statement) => {
            let mut result = datasource
                .execute_sql(statement, None)
                .with_context(|| format!("Failed to execute clip SQL on {}", path))?;
            collect_polygons(result.as_mut(), where_clause)?
        }
        None => {
            let layer = match layer_name {
                Some(name) => datasource.layer_by_name(name),
                None => datasource.layer(0),
            };
            let Some(layer) = layer else {
                bail!(
                    "Failed to identify clip layer {} in {}",
                    layer_name.unwrap_or("#0"),
                    path
                );
            };
            collect_polygons(layer, where_clause)?
        }
    };
    datasource.close()?;

    if clip.is_empty() {
        bail!("Cannot load clip geometry from {}", path);
    }
    info!(datasource = path, polygons = clip.mask().0.len(), "Clip geometry loaded");
    Ok(clip)
}

fn collect_polygons(layer: &mut dyn Layer, where_clause: Option<&str>) -> Result<ClipGeometry> {
    if let Some(expression) = where_clause {
        layer
            .set_attribute_filter(Some(expression))
            .with_context(|| format!("Invalid clip filter: {}", expression))?;
    }
    layer.reset_reading();

    let mut clip = ClipGeometry::default();
    while let Some(feature) = layer.next_feature()? {
        if let Some(geometry) = &feature.geometry {
            clip.push(&geometry.shape)?;
        } else {
            debug!(fid = ?feature.fid, "Clip feature without geometry ignored");
        }
    }
    Ok(clip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use std::path::PathBuf;

    fn write_clip_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vector_translate_clip_{}_{}.geojson",
            std::process::id(),
            name
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    const ZONES: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","properties":{"kind":"a"},"geometry":{"type":"Polygon","coordinates":[[[0,0],[2,0],[2,2],[0,2],[0,0]]]}},
        {"type":"Feature","properties":{"kind":"b"},"geometry":{"type":"Polygon","coordinates":[[[1,1],[3,1],[3,3],[1,3],[1,1]]]}},
        {"type":"Feature","properties":{"kind":"c"},"geometry":{"type":"Polygon","coordinates":[[[10,10],[11,10],[11,11],[10,11],[10,10]]]}}
    ]}"#;

    #[test]
    fn test_bbox_and_spat_extent() {
        let registry = DriverRegistry::default();
        let extent = Extent {
            xmin: 0.0,
            ymin: 0.0,
            xmax: 2.0,
            ymax: 3.0,
        };
        let clip = load_clip(&ClipSpec::Bbox(extent), None, &registry).unwrap();
        assert!((clip.mask().unsigned_area() - 6.0).abs() < 1e-9);

        let clip = load_clip(&ClipSpec::SpatialExtent, Some(extent), &registry).unwrap();
        assert!((clip.mask().unsigned_area() - 6.0).abs() < 1e-9);
        assert!(load_clip(&ClipSpec::SpatialExtent, None, &registry).is_err());
    }

    #[test]
    fn test_datasource_union_with_filter() {
        let path = write_clip_file("zones", ZONES);
        let registry = DriverRegistry::default();

        let spec = ClipSpec::Datasource {
            path: path.display().to_string(),
            sql: None,
            layer: None,
            where_clause: Some("kind IN ('a', 'b')".into()),
        };
        let clip = load_clip(&spec, None, &registry).unwrap();
        // Deux carrés de 4 qui se recouvrent sur 1
        assert!((clip.mask().unsigned_area() - 7.0).abs() < 1e-9);

        let spec = ClipSpec::Datasource {
            path: path.display().to_string(),
            sql: None,
            layer: None,
            where_clause: Some("kind = 'z'".into()),
        };
        assert!(load_clip(&spec, None, &registry).is_err());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_datasource_rejects_points() {
        let path = write_clip_file(
            "points",
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[1,2]}}
            ]}"#,
        );
        let spec = ClipSpec::Datasource {
            path: path.display().to_string(),
            sql: None,
            layer: None,
            where_clause: None,
        };
        let err = load_clip(&spec, None, &DriverRegistry::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("polygon"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_layer() {
        let path = write_clip_file("single", ZONES);
        let spec = ClipSpec::Datasource {
            path: path.display().to_string(),
            sql: None,
            layer: Some("nope".into()),
            where_clause: None,
        };
        assert!(load_clip(&spec, None, &DriverRegistry::default()).is_err());
        std::fs::remove_file(path).ok();
    }
}
