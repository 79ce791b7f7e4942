//! Configuration d'une exécution
//!
//! Un `RunConfig` se charge depuis un fichier JSON d'options puis reçoit les
//! surcharges de la ligne de commande. Il est validé une fois, avant toute
//! ouverture de datasource, puis converti en `TranslationSettings`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use layer_pipeline::{
    ClipGeometry, ForcedType, GeomOperation, GeometryKind, GeometryOpConfig, SpatialRef,
    StringConversion, TranslationSettings,
};
use serde::{Deserialize, Serialize};

/// Taille des groupes de transaction par défaut
pub const DEFAULT_GROUP_TRANSACTIONS: usize = 200;

fn default_format() -> String {
    "GeoJSON".to_string()
}

fn default_group_transactions() -> usize {
    DEFAULT_GROUP_TRANSACTIONS
}

/// Emprise `xmin ymin xmax ymax`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [xmin, ymin, xmax, ymax] => Ok(Self {
                xmin: *xmin,
                ymin: *ymin,
                xmax: *xmax,
                ymax: *ymax,
            }),
            _ => bail!("an extent needs 4 values (xmin ymin xmax ymax), got {}", values.len()),
        }
    }

    pub fn to_clip(self) -> ClipGeometry {
        ClipGeometry::from_bbox(self.xmin, self.ymin, self.xmax, self.ymax)
    }
}

/// Origine d'une géométrie de découpage
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClipSpec {
    /// Rectangle
    Bbox(Extent),
    /// POLYGON ou MULTIPOLYGON en WKT
    Wkt { wkt: String },
    /// Reprend l'emprise du filtre spatial
    SpatialExtent,
    /// Union des polygones d'une datasource auxiliaire
    Datasource {
        path: String,
        #[serde(default)]
        sql: Option<String>,
        #[serde(default)]
        layer: Option<String>,
        #[serde(default, rename = "where")]
        where_clause: Option<String>,
    },
}

impl ClipSpec {
    /// Interprète les valeurs d'une option `--clipsrc`/`--clipdst`
    pub fn from_args(values: &[String]) -> Result<Self> {
        match values {
            [single] => {
                let upper = single.trim_start().to_ascii_uppercase();
                if upper.starts_with("POLYGON") || upper.starts_with("MULTIPOLYGON") {
                    Ok(ClipSpec::Wkt {
                        wkt: single.clone(),
                    })
                } else if single.eq_ignore_ascii_case("spat_extent") {
                    Ok(ClipSpec::SpatialExtent)
                } else {
                    Ok(ClipSpec::Datasource {
                        path: single.clone(),
                        sql: None,
                        layer: None,
                        where_clause: None,
                    })
                }
            }
            [_, _, _, _] => {
                let numbers = values
                    .iter()
                    .map(|v| {
                        v.parse::<f64>()
                            .with_context(|| format!("Invalid clip bounding box value: {}", v))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ClipSpec::Bbox(Extent::from_slice(&numbers)?))
            }
            _ => bail!(
                "clip expects a bounding box (4 values), a WKT polygon, a datasource or spat_extent"
            ),
        }
    }

    /// Précise la lecture d'une datasource de découpage
    pub fn with_datasource_options(
        self,
        sql: Option<String>,
        layer: Option<String>,
        where_clause: Option<String>,
    ) -> Self {
        match self {
            ClipSpec::Datasource {
                path,
                sql: s,
                layer: l,
                where_clause: w,
            } => ClipSpec::Datasource {
                path,
                sql: sql.or(s),
                layer: layer.or(l),
                where_clause: where_clause.or(w),
            },
            other => other,
        }
    }
}

/// Opération géométrique (au plus une)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GeometryOpSpec {
    Segmentize { distance: f64 },
    Simplify { tolerance: f64 },
}

impl GeometryOpSpec {
    pub fn to_operation(self) -> GeomOperation {
        match self {
            GeometryOpSpec::Segmentize { distance } => GeomOperation::Segmentize(distance),
            GeometryOpSpec::Simplify { tolerance } => {
                GeomOperation::SimplifyPreserveTopology(tolerance)
            }
        }
    }
}

/// Configuration complète d'une exécution
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    /// Driver de sortie (GeoJSON, PostgreSQL, Memory)
    #[serde(default = "default_format")]
    pub format: String,
    pub destination: String,
    pub source: String,
    /// Couches source à traduire (toutes par défaut)
    pub layers: Vec<String>,

    pub update: bool,
    pub append: bool,
    pub overwrite: bool,
    pub skip_failures: bool,
    #[serde(default = "default_group_transactions")]
    pub group_transactions: usize,
    pub preserve_fid: bool,
    pub fid: Option<i64>,

    pub select: Option<Vec<String>>,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub sql: Option<String>,
    pub spat: Option<Extent>,

    pub new_layer_name: Option<String>,
    pub geometry_type: Option<String>,
    pub assign_srs: Option<String>,
    pub target_srs: Option<String>,
    pub source_srs: Option<String>,
    pub field_types_to_string: Option<String>,

    pub geometry_op: Option<GeometryOpSpec>,
    pub explode_collections: bool,
    pub z_field: Option<String>,
    pub clip_src: Option<ClipSpec>,
    pub clip_dst: Option<ClipSpec>,

    pub progress: bool,
    pub layer_creation_options: Vec<String>,
    pub datasource_creation_options: Vec<String>,
    /// Rapport JSON de l'exécution
    pub report: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            destination: String::new(),
            source: String::new(),
            layers: Vec::new(),
            update: false,
            append: false,
            overwrite: false,
            skip_failures: false,
            group_transactions: DEFAULT_GROUP_TRANSACTIONS,
            preserve_fid: false,
            fid: None,
            select: None,
            where_clause: None,
            sql: None,
            spat: None,
            new_layer_name: None,
            geometry_type: None,
            assign_srs: None,
            target_srs: None,
            source_srs: None,
            field_types_to_string: None,
            geometry_op: None,
            explode_collections: false,
            z_field: None,
            clip_src: None,
            clip_dst: None,
            progress: false,
            layer_creation_options: Vec::new(),
            datasource_creation_options: Vec::new(),
            report: None,
        }
    }
}

impl RunConfig {
    /// Charge un fichier d'options JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read options file: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse options JSON")
    }

    /// Ouverture de la destination en mise à jour (implicite avec append/overwrite)
    pub fn opens_for_update(&self) -> bool {
        self.update || self.append || self.overwrite
    }

    /// Vérifie les combinaisons d'options
    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            bail!("No source datasource given");
        }
        if self.destination.is_empty() {
            bail!("No destination datasource given");
        }
        if self.preserve_fid && self.explode_collections {
            bail!("preserve-fid cannot be used together with explodecollections");
        }
        if self.append && self.overwrite {
            bail!("append and overwrite are mutually exclusive");
        }
        let spat_extent = |clip: &Option<ClipSpec>| matches!(clip, Some(ClipSpec::SpatialExtent));
        if (spat_extent(&self.clip_src) || spat_extent(&self.clip_dst)) && self.spat.is_none() {
            bail!("clip spat_extent must be used together with a spatial filter (spat)");
        }
        match self.geometry_op {
            Some(GeometryOpSpec::Segmentize { distance }) if distance <= 0.0 => {
                bail!("segmentize distance must be positive, got {}", distance)
            }
            Some(GeometryOpSpec::Simplify { tolerance }) if tolerance < 0.0 => {
                bail!("simplify tolerance must not be negative, got {}", tolerance)
            }
            _ => {}
        }
        if let Some(spat) = self.spat {
            if spat.xmin > spat.xmax || spat.ymin > spat.ymax {
                bail!("Invalid spatial filter: min values exceed max values");
            }
        }
        Ok(())
    }

    pub fn requested_kind(&self) -> Result<Option<GeometryKind>> {
        self.geometry_type
            .as_deref()
            .map(|name| {
                GeometryKind::from_str(name)
                    .with_context(|| format!("-nlt {}: type not recognised", name))
            })
            .transpose()
    }

    /// SRS de sortie et indicateur de reprojection
    pub fn output_srs(&self) -> Result<(Option<SpatialRef>, bool)> {
        match (&self.target_srs, &self.assign_srs) {
            (Some(target), assigned) => {
                if assigned.is_some() {
                    tracing::warn!("Assigned SRS ignored, reprojecting to the target SRS");
                }
                let srs = SpatialRef::new(target)
                    .with_context(|| format!("Failed to process SRS definition: {}", target))?;
                Ok((Some(srs), true))
            }
            (None, Some(assigned)) => {
                let srs = SpatialRef::new(assigned)
                    .with_context(|| format!("Failed to process SRS definition: {}", assigned))?;
                Ok((Some(srs), false))
            }
            (None, None) => Ok((None, false)),
        }
    }

    /// Paramètres de traduction, une fois les découpages chargés
    pub fn to_settings(
        &self,
        clip_source: Option<Arc<ClipGeometry>>,
        clip_destination: Option<Arc<ClipGeometry>>,
    ) -> Result<TranslationSettings> {
        let requested_kind = self.requested_kind()?;
        let (output_srs, reproject) = self.output_srs()?;
        let source_srs = self
            .source_srs
            .as_deref()
            .map(|def| {
                SpatialRef::new(def)
                    .with_context(|| format!("Failed to process SRS definition: {}", def))
            })
            .transpose()?;
        let to_string = match self.field_types_to_string.as_deref() {
            Some(list) => StringConversion::from_str(list)
                .with_context(|| format!("Unhandled field type list: {}", list))?,
            None => StringConversion::Disabled,
        };

        let geometry = GeometryOpConfig {
            operation: self
                .geometry_op
                .map(GeometryOpSpec::to_operation)
                .unwrap_or_default(),
            explode_collections: self.explode_collections,
            z_field: self.z_field.clone(),
            force_type: requested_kind.and_then(ForcedType::from_kind),
            clip_source,
            clip_destination,
        };

        Ok(TranslationSettings {
            new_layer_name: self.new_layer_name.clone(),
            requested_kind,
            selected_fields: self.select.clone(),
            to_string,
            append: self.append,
            overwrite: self.overwrite,
            skip_failures: self.skip_failures,
            group_transactions: self.group_transactions,
            preserve_fid: self.preserve_fid,
            fid: self.fid,
            attribute_filter: self.where_clause.clone(),
            layer_creation_options: self.layer_creation_options.clone(),
            output_srs,
            source_srs,
            reproject,
            geometry,
        })
    }
}
