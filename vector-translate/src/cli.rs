//! Arguments de la ligne de commande
//!
//! Les options reprennent celles d'ogr2ogr. Elles peuvent compléter un
//! fichier d'options JSON (`--options`): les valeurs passées en ligne de
//! commande l'emportent.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use crate::config::{ClipSpec, Extent, GeometryOpSpec, RunConfig};

#[derive(Args, Debug, Default)]
pub struct TranslateArgs {
    /// Destination datasource (GeoJSON file or directory, PG:connection string)
    pub dst: Option<String>,

    /// Source datasource
    pub src: Option<String>,

    /// Source layers to translate (all layers by default)
    pub layers: Vec<String>,

    /// Output format: GeoJSON, PostgreSQL, Memory
    #[arg(short = 'f', long = "format")]
    pub format: Option<String>,

    /// Append to existing layers instead of creating new ones
    #[arg(long)]
    pub append: bool,

    /// Delete and recreate existing destination layers
    #[arg(long)]
    pub overwrite: bool,

    /// Open the existing destination datasource in update mode
    #[arg(long)]
    pub update: bool,

    /// Skip features, layers and options that fail (forces --gt 1)
    #[arg(long = "skipfailures", alias = "skip-failures")]
    pub skip_failures: bool,

    /// Features per transaction (default 200, 0 disables transactions)
    #[arg(long = "gt")]
    pub group_transactions: Option<usize>,

    /// Fields to copy, separated by commas or spaces
    #[arg(long)]
    pub select: Option<String>,

    /// Attribute filter applied to source layers
    #[arg(long = "where")]
    pub where_clause: Option<String>,

    /// SQL statement executed on the source instead of reading layers
    #[arg(long)]
    pub sql: Option<String>,

    /// Spatial filter rectangle
    #[arg(long, num_args = 4, value_names = ["XMIN", "YMIN", "XMAX", "YMAX"], allow_negative_numbers = true)]
    pub spat: Option<Vec<f64>>,

    /// Keep source feature ids
    #[arg(long = "preserve-fid", alias = "preserve_fid")]
    pub preserve_fid: bool,

    /// Translate only the feature with this id
    #[arg(long)]
    pub fid: Option<i64>,

    /// Assign an output SRS without reprojecting
    #[arg(long = "a-srs", alias = "a_srs")]
    pub assign_srs: Option<String>,

    /// Reproject to this SRS
    #[arg(long = "t-srs", alias = "t_srs")]
    pub target_srs: Option<String>,

    /// Override the source SRS
    #[arg(long = "s-srs", alias = "s_srs")]
    pub source_srs: Option<String>,

    /// New name for the destination layer
    #[arg(long)]
    pub nln: Option<String>,

    /// Geometry type of created layers (POINT, MULTIPOLYGON25D, GEOMETRY, NONE...)
    #[arg(long)]
    pub nlt: Option<String>,

    /// Simplify geometries, preserving topology
    #[arg(long, value_name = "TOLERANCE", conflicts_with = "segmentize")]
    pub simplify: Option<f64>,

    /// Densify geometries so that no segment exceeds this length
    #[arg(long, value_name = "MAX_DIST")]
    pub segmentize: Option<f64>,

    /// Field types converted to String (Integer,Real,... or All)
    #[arg(long = "field-type-to-string", alias = "fieldTypeToString")]
    pub field_type_to_string: Option<String>,

    /// Split multi-part geometries into one feature per part
    #[arg(long = "explodecollections")]
    pub explode_collections: bool,

    /// Field holding the elevation to apply to geometries
    #[arg(long = "zfield")]
    pub z_field: Option<String>,

    /// Clip source geometries: XMIN YMIN XMAX YMAX, WKT, datasource or spat_extent
    #[arg(long = "clipsrc", num_args = 1..=4, allow_negative_numbers = true)]
    pub clip_src: Option<Vec<String>>,

    /// SQL statement selecting the source clip geometries
    #[arg(long = "clipsrcsql")]
    pub clip_src_sql: Option<String>,

    /// Layer holding the source clip geometries
    #[arg(long = "clipsrclayer")]
    pub clip_src_layer: Option<String>,

    /// Attribute filter on the source clip layer
    #[arg(long = "clipsrcwhere")]
    pub clip_src_where: Option<String>,

    /// Clip destination geometries: XMIN YMIN XMAX YMAX, WKT, datasource or spat_extent
    #[arg(long = "clipdst", num_args = 1..=4, allow_negative_numbers = true)]
    pub clip_dst: Option<Vec<String>>,

    /// SQL statement selecting the destination clip geometries
    #[arg(long = "clipdstsql")]
    pub clip_dst_sql: Option<String>,

    /// Layer holding the destination clip geometries
    #[arg(long = "clipdstlayer")]
    pub clip_dst_layer: Option<String>,

    /// Attribute filter on the destination clip layer
    #[arg(long = "clipdstwhere")]
    pub clip_dst_where: Option<String>,

    /// Display progress on the terminal
    #[arg(long)]
    pub progress: bool,

    /// Layer creation option NAME=VALUE (repeatable)
    #[arg(long = "lco", value_name = "NAME=VALUE")]
    pub lco: Vec<String>,

    /// Datasource creation option NAME=VALUE (repeatable)
    #[arg(long = "dsco", value_name = "NAME=VALUE")]
    pub dsco: Vec<String>,

    /// JSON options file (command line values take precedence)
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Write a JSON report of the run to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Découpe une liste séparée par virgules ou espaces
fn split_list(list: &str) -> Vec<String> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn clip_spec(
    values: Option<Vec<String>>,
    sql: Option<String>,
    layer: Option<String>,
    where_clause: Option<String>,
    existing: Option<ClipSpec>,
    option: &str,
) -> Result<Option<ClipSpec>> {
    let spec = match values {
        Some(values) => Some(
            ClipSpec::from_args(&values).with_context(|| format!("Invalid --{} value", option))?,
        ),
        None => existing,
    };
    match spec {
        Some(spec) => Ok(Some(spec.with_datasource_options(sql, layer, where_clause))),
        None => {
            if sql.is_some() || layer.is_some() || where_clause.is_some() {
                warn!("--{}sql/layer/where ignored without --{}", option, option);
            }
            Ok(None)
        }
    }
}

impl TranslateArgs {
    /// Construit la configuration d'exécution
    pub fn into_config(self) -> Result<RunConfig> {
        let mut config = match &self.options {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };

        if let Some(dst) = self.dst {
            config.destination = dst;
        }
        if let Some(src) = self.src {
            config.source = src;
        }
        if !self.layers.is_empty() {
            config.layers = self.layers;
        }
        if let Some(format) = self.format {
            config.format = format;
        }

        config.append |= self.append;
        config.overwrite |= self.overwrite;
        config.update |= self.update;
        config.skip_failures |= self.skip_failures;
        config.preserve_fid |= self.preserve_fid;
        config.explode_collections |= self.explode_collections;
        config.progress |= self.progress;

        if let Some(gt) = self.group_transactions {
            config.group_transactions = gt;
        }
        if let Some(select) = self.select {
            config.select = Some(split_list(&select));
        }
        if self.where_clause.is_some() {
            config.where_clause = self.where_clause;
        }
        if self.sql.is_some() {
            config.sql = self.sql;
        }
        if let Some(spat) = self.spat {
            config.spat = Some(Extent::from_slice(&spat)?);
        }
        if self.fid.is_some() {
            config.fid = self.fid;
        }
        if self.assign_srs.is_some() {
            config.assign_srs = self.assign_srs;
        }
        if self.target_srs.is_some() {
            config.target_srs = self.target_srs;
        }
        if self.source_srs.is_some() {
            config.source_srs = self.source_srs;
        }
        if self.nln.is_some() {
            config.new_layer_name = self.nln;
        }
        if self.nlt.is_some() {
            config.geometry_type = self.nlt;
        }
        if self.field_type_to_string.is_some() {
            config.field_types_to_string = self.field_type_to_string;
        }
        if self.z_field.is_some() {
            config.z_field = self.z_field;
        }

        match (self.simplify, self.segmentize) {
            (Some(tolerance), _) => config.geometry_op = Some(GeometryOpSpec::Simplify { tolerance }),
            (None, Some(distance)) => {
                config.geometry_op = Some(GeometryOpSpec::Segmentize { distance })
            }
            (None, None) => {}
        }

        config.clip_src = clip_spec(
            self.clip_src,
            self.clip_src_sql,
            self.clip_src_layer,
            self.clip_src_where,
            config.clip_src.take(),
            "clipsrc",
        )?;
        config.clip_dst = clip_spec(
            self.clip_dst,
            self.clip_dst_sql,
            self.clip_dst_layer,
            self.clip_dst_where,
            config.clip_dst.take(),
            "clipdst",
        )?;

        config.layer_creation_options.extend(self.lco);
        config.datasource_creation_options.extend(self.dsco);
        if self.report.is_some() {
            config.report = self.report;
        }

        Ok(config)
    }
}
