//! Driver mémoire
//!
//! Couches entièrement en mémoire avec transactions (point de sauvegarde),
//! filtres attributaire et spatial, champs ignorés et un sous-ensemble SQL
//! `SELECT <*|champs> FROM <couche> [WHERE <expression>]`.
//! Sert de backend au driver GeoJSON et aux tests.

use std::collections::HashSet;

use geo::{Intersects, Polygon};
use regex::Regex;
use tracing::debug;

use crate::error::LayerError;
use crate::filter::AttributeFilter;
use crate::source::{DataSource, Layer};
use crate::types::{Feature, FieldSpec, FieldValue, GeometryKind, SpatialRef};

/// Historique des transactions d'une couche
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionLog {
    /// Nombre d'entités de chaque transaction validée
    pub committed: Vec<usize>,
    /// Nombre de transactions annulées
    pub rolled_back: usize,
}

#[derive(Debug, Clone, Copy)]
struct Savepoint {
    len: usize,
    next_fid: i64,
}

/// Couche en mémoire
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    name: String,
    schema: Vec<FieldSpec>,
    kind: GeometryKind,
    srs: Option<SpatialRef>,
    features: Vec<Feature>,
    fids: HashSet<i64>,
    next_fid: i64,
    cursor: usize,
    attribute_filter: Option<AttributeFilter>,
    spatial_filter: Option<Polygon<f64>>,
    ignored: Vec<bool>,
    savepoint: Option<Savepoint>,
    log: TransactionLog,
}

impl MemoryLayer {
    pub fn new(name: impl Into<String>, kind: GeometryKind, srs: Option<SpatialRef>) -> Self {
        Self {
            name: name.into(),
            schema: Vec::new(),
            kind,
            srs,
            features: Vec::new(),
            fids: HashSet::new(),
            next_fid: 0,
            cursor: 0,
            attribute_filter: None,
            spatial_filter: None,
            ignored: Vec::new(),
            savepoint: None,
            log: TransactionLog::default(),
        }
    }

    /// Ajoute des champs au schéma (couche vide uniquement)
    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.ignored = vec![false; fields.len()];
        self.schema = fields;
        self
    }

    /// Toutes les entités stockées, sans filtre
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn transaction_log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn in_transaction(&self) -> bool {
        self.savepoint.is_some()
    }

    /// Noms des champs actuellement ignorés à la lecture
    pub fn ignored_fields(&self) -> Vec<String> {
        self.schema
            .iter()
            .zip(&self.ignored)
            .filter(|(_, ignored)| **ignored)
            .map(|(field, _)| field.name.clone())
            .collect()
    }

    fn matches(&self, feature: &Feature) -> bool {
        if let Some(filter) = &self.attribute_filter {
            if !filter.matches(feature) {
                return false;
            }
        }
        if let Some(area) = &self.spatial_filter {
            match &feature.geometry {
                Some(geometry) => geometry.shape.intersects(area),
                None => false,
            }
        } else {
            true
        }
    }

    /// Copie d'une entité avec les champs ignorés mis à nul
    fn read_copy(&self, feature: &Feature) -> Feature {
        let mut copy = feature.clone();
        for (value, ignored) in copy.fields.iter_mut().zip(&self.ignored) {
            if *ignored {
                *value = FieldValue::Null;
            }
        }
        copy
    }
}

impl Layer for MemoryLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &[FieldSpec] {
        &self.schema
    }

    fn geometry_kind(&self) -> GeometryKind {
        self.kind
    }

    fn spatial_ref(&self) -> Option<&SpatialRef> {
        self.srs.as_ref()
    }

    fn set_attribute_filter(&mut self, expression: Option<&str>) -> Result<(), LayerError> {
        self.attribute_filter = match expression {
            Some(expression) => Some(AttributeFilter::parse(expression, &self.schema)?),
            None => None,
        };
        self.cursor = 0;
        Ok(())
    }

    fn set_spatial_filter(&mut self, filter: Option<&Polygon<f64>>) {
        self.spatial_filter = filter.cloned();
        self.cursor = 0;
    }

    fn fast_feature_count(&self) -> Option<u64> {
        if self.attribute_filter.is_none() && self.spatial_filter.is_none() {
            return Some(self.features.len() as u64);
        }
        Some(self.features.iter().filter(|f| self.matches(f)).count() as u64)
    }

    fn reset_reading(&mut self) {
        self.cursor = 0;
    }

    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError> {
        while self.cursor < self.features.len() {
            let index = self.cursor;
            self.cursor += 1;
            if self.matches(&self.features[index]) {
                return Ok(Some(self.read_copy(&self.features[index])));
            }
        }
        Ok(None)
    }

    fn feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError> {
        Ok(self
            .features
            .iter()
            .find(|f| f.fid == Some(fid))
            .map(|f| self.read_copy(f)))
    }

    fn create_field(&mut self, field: &FieldSpec) -> Result<(), LayerError> {
        if self
            .schema
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(&field.name))
        {
            return Err(LayerError::rejected(
                &self.name,
                format!("field '{}' already exists", field.name),
            ));
        }

        self.schema.push(field.clone());
        self.ignored.push(false);
        for feature in &mut self.features {
            feature.fields.push(FieldValue::Null);
        }
        Ok(())
    }

    fn create_feature(&mut self, mut feature: Feature) -> Result<i64, LayerError> {
        if feature.fields.len() != self.schema.len() {
            return Err(LayerError::rejected(
                &self.name,
                format!(
                    "expected {} fields, got {}",
                    self.schema.len(),
                    feature.fields.len()
                ),
            ));
        }

        let fid = match feature.fid {
            Some(fid) if fid >= 0 => {
                if self.fids.contains(&fid) {
                    return Err(LayerError::rejected(
                        &self.name,
                        format!("duplicate feature id {fid}"),
                    ));
                }
                fid
            }
            _ => self.next_fid,
        };

        self.next_fid = self.next_fid.max(fid + 1);
        self.fids.insert(fid);
        feature.fid = Some(fid);
        self.features.push(feature);
        Ok(fid)
    }

    fn start_transaction(&mut self) -> Result<(), LayerError> {
        if self.savepoint.is_some() {
            return Err(LayerError::transaction(
                &self.name,
                "a transaction is already active",
            ));
        }
        self.savepoint = Some(Savepoint {
            len: self.features.len(),
            next_fid: self.next_fid,
        });
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), LayerError> {
        let savepoint = self
            .savepoint
            .take()
            .ok_or_else(|| LayerError::transaction(&self.name, "no active transaction"))?;
        self.log.committed.push(self.features.len() - savepoint.len);
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), LayerError> {
        let savepoint = self
            .savepoint
            .take()
            .ok_or_else(|| LayerError::transaction(&self.name, "no active transaction"))?;
        for feature in self.features.drain(savepoint.len..) {
            if let Some(fid) = feature.fid {
                self.fids.remove(&fid);
            }
        }
        self.next_fid = savepoint.next_fid;
        self.log.rolled_back += 1;
        Ok(())
    }

    fn supports_ignored_fields(&self) -> bool {
        true
    }

    fn set_ignored_fields(&mut self, names: &[String]) -> Result<(), LayerError> {
        let mut ignored = vec![false; self.schema.len()];
        for name in names {
            let index = self
                .schema
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    LayerError::Backend(format!("cannot ignore unknown field '{name}'"))
                })?;
            ignored[index] = true;
        }
        self.ignored = ignored;
        Ok(())
    }
}

/// Datasource en mémoire
#[derive(Debug, Clone, Default)]
pub struct MemoryDataSource {
    name: String,
    layers: Vec<MemoryLayer>,
    read_only: bool,
}

impl MemoryDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_layer(mut self, layer: MemoryLayer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Interdit la création de couches
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn push_layer(&mut self, layer: MemoryLayer) -> usize {
        self.layers.push(layer);
        self.layers.len() - 1
    }

    pub fn layers(&self) -> &[MemoryLayer] {
        &self.layers
    }

    pub fn memory_layer(&self, name: &str) -> Option<&MemoryLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn into_layers(self) -> Vec<MemoryLayer> {
        self.layers
    }

    fn run_select(
        &mut self,
        statement: &str,
        spatial_filter: Option<&Polygon<f64>>,
    ) -> Result<MemoryLayer, LayerError> {
        let invalid = |reason: String| LayerError::InvalidSql {
            statement: statement.to_string(),
            reason,
        };

        let re = Regex::new(
            r#"(?is)^\s*SELECT\s+(?P<fields>.+?)\s+FROM\s+(?P<layer>"[^"]+"|[\w.]+)(?:\s+WHERE\s+(?P<filter>.+?))?\s*;?\s*$"#,
        )
        .map_err(|e| invalid(e.to_string()))?;
        let caps = re
            .captures(statement)
            .ok_or_else(|| invalid("expected SELECT <fields> FROM <layer> [WHERE <expr>]".into()))?;

        let layer_name = caps["layer"].trim_matches('"');
        let source = self
            .layers
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(layer_name))
            .ok_or_else(|| invalid(format!("no such layer '{layer_name}'")))?;

        let fields = caps["fields"].trim();
        let projection: Vec<usize> = if fields == "*" {
            (0..source.schema.len()).collect()
        } else {
            fields
                .split(',')
                .map(|name| {
                    let name = name.trim().trim_matches('"');
                    source
                        .schema
                        .iter()
                        .position(|f| f.name.eq_ignore_ascii_case(name))
                        .ok_or_else(|| invalid(format!("unknown field '{name}'")))
                })
                .collect::<Result<_, _>>()?
        };

        let filter = match caps.name("filter") {
            Some(m) => Some(AttributeFilter::parse(m.as_str(), &source.schema)?),
            None => None,
        };

        let schema = projection.iter().map(|&i| source.schema[i].clone()).collect();
        let mut result = MemoryLayer::new(source.name.clone(), source.kind, source.srs.clone())
            .with_fields(schema);

        for feature in &source.features {
            if let Some(filter) = &filter {
                if !filter.matches(feature) {
                    continue;
                }
            }
            if let Some(area) = spatial_filter {
                let hit = feature
                    .geometry
                    .as_ref()
                    .is_some_and(|g| g.shape.intersects(area));
                if !hit {
                    continue;
                }
            }

            let projected = Feature {
                fid: feature.fid,
                fields: projection.iter().map(|&i| feature.fields[i].clone()).collect(),
                geometry: feature.geometry.clone(),
            };
            result.create_feature(projected)?;
        }

        debug!(
            statement = statement,
            rows = result.len(),
            "SQL statement executed"
        );
        Ok(result)
    }
}

impl DataSource for MemoryDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn layer(&mut self, index: usize) -> Option<&mut dyn Layer> {
        self.layers.get_mut(index).map(|l| l as &mut dyn Layer)
    }

    fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    fn execute_sql(
        &mut self,
        statement: &str,
        spatial_filter: Option<&Polygon<f64>>,
    ) -> Result<Box<dyn Layer>, LayerError> {
        Ok(Box::new(self.run_select(statement, spatial_filter)?))
    }

    fn can_create_layer(&self) -> bool {
        !self.read_only
    }

    fn create_layer(
        &mut self,
        name: &str,
        srs: Option<&SpatialRef>,
        kind: GeometryKind,
        options: &[String],
    ) -> Result<usize, LayerError> {
        if self.read_only {
            return Err(LayerError::unsupported(name, "create layer"));
        }
        if self.layer_index(name).is_some() {
            return Err(LayerError::Backend(format!("layer {name} already exists")));
        }
        if !options.is_empty() {
            debug!(layer = name, ?options, "Memory driver ignores layer creation options");
        }

        Ok(self.push_layer(MemoryLayer::new(name, kind, srs.cloned())))
    }

    fn delete_layer(&mut self, index: usize) -> Result<(), LayerError> {
        if index >= self.layers.len() {
            return Err(LayerError::NotFound(format!("layer #{index}")));
        }
        self.layers.remove(index);
        Ok(())
    }
}
