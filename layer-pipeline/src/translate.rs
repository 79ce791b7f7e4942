//! Traduction d'une couche source vers une datasource destination
//!
//! Enchaîne: résolution de la couche destination (création, écrasement,
//! ajout), réconciliation des schémas, puis pour chaque entité source
//! transposition des attributs, éclatement, pipeline géométrique et
//! écriture transactionnelle.

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Severity};
use crate::explode::explode;
use crate::geometry::{GeometryOpConfig, GeometryOutcome, GeometryPipeline};
use crate::progress::ProgressReporter;
use crate::schema::{reconcile, FieldMap, SchemaRequest, StringConversion};
use crate::source::{CoordTransform, DataSource, Layer, TransformProvider};
use crate::types::{Feature, FieldSpec, GeometryKind, SpatialRef};
use crate::writer::{TransactionalFeatureWriter, WriteOutcome};

/// Paramètres partagés par toutes les couches d'une exécution
#[derive(Debug, Clone, Default)]
pub struct TranslationSettings {
    /// Nom de la couche destination (nom de la couche source par défaut)
    pub new_layer_name: Option<String>,
    /// Type géométrique de la couche créée
    pub requested_kind: Option<GeometryKind>,
    pub selected_fields: Option<Vec<String>>,
    pub to_string: StringConversion,
    pub append: bool,
    pub overwrite: bool,
    pub skip_failures: bool,
    /// Taille des groupes de transaction (0 = pas de transaction)
    pub group_transactions: usize,
    pub preserve_fid: bool,
    /// Ne traduire que cette entité
    pub fid: Option<i64>,
    /// Un filtre attributaire est posé sur les couches source
    pub attribute_filter: Option<String>,
    pub layer_creation_options: Vec<String>,
    /// SRS assigné à la sortie (`-a_srs`, ou cible de reprojection)
    pub output_srs: Option<SpatialRef>,
    /// SRS source imposé pour la reprojection
    pub source_srs: Option<SpatialRef>,
    pub reproject: bool,
    pub geometry: GeometryOpConfig,
}

/// Contexte figé pour la traduction d'une couche
pub struct TranslationContext<'a> {
    pub field_map: FieldMap,
    pub geometry: &'a GeometryOpConfig,
    pub transform: Option<&'a dyn CoordTransform>,
    pub output_srs: Option<&'a SpatialRef>,
    pub group_size: usize,
    pub skip_failures: bool,
    pub preserve_fid: bool,
    /// Index source du champ d'élévation
    pub z_field: Option<usize>,
}

/// Bilan de la traduction d'une couche
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerOutcome {
    pub source: String,
    pub destination: String,
    /// Entités source lues
    pub read: u64,
    /// Entités écrites
    pub written: u64,
    /// Parties écartées par un découpage
    pub dropped: u64,
    /// Entités ignorées sur erreur (skip-failures)
    pub skipped: u64,
    pub transactions: u64,
    /// Champs sélectionnés absents de la source
    pub missing_fields: Vec<String>,
    /// La couche destination a été créée
    pub created: bool,
}

/// Type géométrique de la couche à créer
pub fn resolve_layer_kind(
    requested: Option<GeometryKind>,
    source: GeometryKind,
    explode_collections: bool,
    z_field: bool,
) -> GeometryKind {
    if let Some(kind) = requested {
        return kind;
    }
    let mut kind = if explode_collections {
        source.exploded()
    } else {
        source
    };
    if z_field {
        kind = kind.with_z();
    }
    kind
}

/// Transpose les attributs d'une entité source selon la table des champs
pub fn map_attributes(
    feature: &Feature,
    field_map: &FieldMap,
    destination_schema: &[FieldSpec],
    preserve_fid: bool,
) -> Result<Feature, String> {
    let mut mapped = Feature::new(destination_schema.len());
    if preserve_fid {
        mapped.fid = feature.fid;
    }

    for (src, dst) in field_map.mapped() {
        let spec = destination_schema
            .get(dst)
            .ok_or_else(|| format!("destination field #{dst} does not exist"))?;
        let Some(value) = feature.field(src) else {
            continue;
        };
        mapped.fields[dst] = value
            .convert(spec.field_type)
            .map_err(|reason| format!("field '{}': {}", spec.name, reason))?;
    }

    Ok(mapped)
}

/// Traduit une couche source vers une datasource destination
pub struct LayerTranslator<'a> {
    settings: &'a TranslationSettings,
    transforms: Option<&'a dyn TransformProvider>,
}

impl<'a> LayerTranslator<'a> {
    pub fn new(settings: &'a TranslationSettings) -> Self {
        Self {
            settings,
            transforms: None,
        }
    }

    pub fn with_transforms(mut self, transforms: &'a dyn TransformProvider) -> Self {
        self.transforms = Some(transforms);
        self
    }

    fn build_transform(
        &self,
        source: &dyn Layer,
    ) -> Result<Option<Box<dyn CoordTransform>>, PipelineError> {
        if !self.settings.reproject {
            return Ok(None);
        }

        let source_srs = self
            .settings
            .source_srs
            .as_ref()
            .or(source.spatial_ref())
            .ok_or_else(|| PipelineError::MissingSourceSrs {
                layer: source.name().to_string(),
            })?;
        let target = self.settings.output_srs.as_ref().ok_or_else(|| {
            PipelineError::invalid_option("reprojection requested without a target SRS")
        })?;
        let provider = self
            .transforms
            .ok_or_else(|| PipelineError::TransformSetup {
                from: source_srs.to_string(),
                to: target.to_string(),
                reason: "no coordinate transformation available".to_string(),
            })?;

        provider.create(source_srs, target).map(Some)
    }

    /// Résout (crée, écrase, réutilise) la couche destination
    fn resolve_destination(
        &self,
        source: &dyn Layer,
        destination: &mut dyn DataSource,
        name: &str,
        output_srs: Option<&SpatialRef>,
    ) -> Result<(usize, bool), PipelineError> {
        let settings = self.settings;
        let mut existing = destination.layer_index(name);

        if let (Some(index), true) = (existing, settings.overwrite) {
            info!(layer = name, "Deleting existing destination layer");
            destination
                .delete_layer(index)
                .map_err(|e| PipelineError::layer(name, e))?;
            existing = None;
        }

        match existing {
            Some(index) if settings.append => {
                if !settings.layer_creation_options.is_empty() {
                    warn!(layer = name, "Layer creation options ignored when appending");
                }
                Ok((index, false))
            }
            Some(_) => Err(PipelineError::LayerExists {
                layer: name.to_string(),
            }),
            None => {
                if !destination.can_create_layer() {
                    return Err(PipelineError::CannotCreateLayer {
                        layer: name.to_string(),
                    });
                }
                let kind = resolve_layer_kind(
                    settings.requested_kind,
                    source.geometry_kind(),
                    settings.geometry.explode_collections,
                    settings.geometry.z_field.is_some(),
                );
                let index = destination
                    .create_layer(name, output_srs, kind, &settings.layer_creation_options)
                    .map_err(|e| PipelineError::layer(name, e))?;
                info!(layer = name, kind = %kind, "Destination layer created");
                Ok((index, true))
            }
        }
    }

    /// Traduit toutes les entités (ou l'entité `fid`) de la couche source
    pub fn translate(
        &self,
        source: &mut dyn Layer,
        destination: &mut dyn DataSource,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<LayerOutcome, PipelineError> {
        let settings = self.settings;
        let source_name = source.name().to_string();
        let destination_name = settings
            .new_layer_name
            .clone()
            .unwrap_or_else(|| source_name.clone());

        let transform = self.build_transform(source)?;
        let output_srs = settings
            .output_srs
            .clone()
            .or_else(|| source.spatial_ref().cloned());

        let (index, created) =
            self.resolve_destination(source, destination, &destination_name, output_srs.as_ref())?;
        let layer = destination
            .layer(index)
            .ok_or_else(|| PipelineError::CannotCreateLayer {
                layer: destination_name.clone(),
            })?;

        let request = SchemaRequest {
            selected: settings.selected_fields.as_deref(),
            to_string: Some(&settings.to_string),
            append: !created,
            skip_failures: settings.skip_failures,
            attribute_filter_active: settings.attribute_filter.is_some(),
            z_field: settings.geometry.z_field.as_deref(),
        };
        let reconciliation = reconcile(source, layer, &request)?;

        let z_field = match settings.geometry.z_field.as_deref() {
            Some(name) => {
                let found = source
                    .schema()
                    .iter()
                    .position(|f| f.name.eq_ignore_ascii_case(name));
                if found.is_none() {
                    warn!(layer = %source_name, field = name, "Elevation field not found, ignored");
                }
                found
            }
            None => None,
        };

        let context = TranslationContext {
            field_map: reconciliation.field_map,
            geometry: &settings.geometry,
            transform: transform.as_deref(),
            output_srs: output_srs.as_ref(),
            group_size: settings.group_transactions,
            skip_failures: settings.skip_failures,
            preserve_fid: settings.preserve_fid,
            z_field,
        };

        let mut outcome = LayerOutcome {
            source: source_name.clone(),
            destination: destination_name.clone(),
            missing_fields: reconciliation.missing,
            created,
            ..Default::default()
        };

        info!(
            source = %source_name,
            destination = %destination_name,
            "Translating layer"
        );

        self.copy_features(source, layer, &context, &mut outcome, progress)?;

        info!(
            layer = %destination_name,
            read = outcome.read,
            written = outcome.written,
            dropped = outcome.dropped,
            skipped = outcome.skipped,
            "Layer translated"
        );
        Ok(outcome)
    }

    fn copy_features(
        &self,
        source: &mut dyn Layer,
        destination: &mut dyn Layer,
        context: &TranslationContext<'_>,
        outcome: &mut LayerOutcome,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), PipelineError> {
        let mut writer = TransactionalFeatureWriter::new(
            destination.name(),
            context.group_size,
            context.skip_failures,
        );
        let pipeline = GeometryPipeline::new(context.geometry)
            .with_transform(context.transform)
            .with_output_srs(context.output_srs);
        let destination_schema = destination.schema().to_vec();
        let layer_name = destination.name().to_string();

        source.reset_reading();
        let mut fetched = false;

        loop {
            let next = match self.settings.fid {
                Some(_) if fetched => Ok(None),
                Some(fid) => {
                    fetched = true;
                    source.feature(fid)
                }
                None => source.next_feature(),
            };
            let mut feature = match next {
                Ok(Some(feature)) => feature,
                Ok(None) => break,
                Err(e) => {
                    writer.abort(destination);
                    return Err(PipelineError::layer(source.name(), e));
                }
            };
            outcome.read += 1;

            let z = context.z_field.map(|index| feature.field_as_f64(index));
            let template = match map_attributes(
                &feature,
                &context.field_map,
                &destination_schema,
                context.preserve_fid,
            ) {
                Ok(template) => template,
                Err(reason) => {
                    writer.abort(destination);
                    return Err(PipelineError::FeatureMapping {
                        layer: source.name().to_string(),
                        fid: feature.fid,
                        reason,
                    });
                }
            };

            let parts = explode(
                feature.geometry.take(),
                context.geometry.explode_collections,
            );
            for part in parts {
                let mut output = template.clone();
                output.geometry = part;

                match pipeline.run(&mut output, z) {
                    Ok(GeometryOutcome::Keep) => match writer.write(destination, output)? {
                        WriteOutcome::Written(_) => outcome.written += 1,
                        WriteOutcome::Discarded => outcome.skipped += 1,
                    },
                    Ok(GeometryOutcome::Dropped) => {
                        debug!(layer = %layer_name, fid = ?feature.fid, "Feature clipped out");
                        outcome.dropped += 1;
                    }
                    Err(e) if e.severity() == Severity::FeatureFatal && context.skip_failures => {
                        warn!(layer = %layer_name, error = %e, "Feature skipped");
                        outcome.skipped += 1;
                    }
                    Err(e) => {
                        writer.abort(destination);
                        return Err(e);
                    }
                }
            }

            progress.advance();
        }

        let stats = writer.finish(destination)?;
        outcome.transactions = stats.committed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldType, FieldValue, GeometryType};

    #[test]
    fn test_resolve_layer_kind() {
        let multi = GeometryKind::new(GeometryType::MultiPolygon);
        assert_eq!(resolve_layer_kind(None, multi, false, false), multi);
        assert_eq!(
            resolve_layer_kind(None, multi, true, false),
            GeometryKind::new(GeometryType::Polygon)
        );
        assert_eq!(
            resolve_layer_kind(None, multi, true, true).to_string(),
            "POLYGON25D"
        );
        let requested = GeometryKind::new(GeometryType::Point);
        assert_eq!(
            resolve_layer_kind(Some(requested), multi, true, true),
            requested
        );
    }

    #[test]
    fn test_map_attributes() {
        let schema = vec![
            FieldSpec::new("b", FieldType::String),
            FieldSpec::new("a", FieldType::Integer),
        ];
        let mut map = FieldMap::unmapped(3);
        map.set(0, 1);
        map.set(2, 0);

        let feature = Feature::with_fields(vec![
            FieldValue::Integer(5),
            FieldValue::String("skip".into()),
            FieldValue::Real(1.5),
        ])
        .with_fid(42);

        let mapped = map_attributes(&feature, &map, &schema, true).unwrap();
        assert_eq!(mapped.fid, Some(42));
        assert_eq!(
            mapped.fields,
            vec![FieldValue::String("1.5".into()), FieldValue::Integer(5)]
        );

        let mapped = map_attributes(&feature, &map, &schema, false).unwrap();
        assert_eq!(mapped.fid, None);
    }

    #[test]
    fn test_map_attributes_conversion_failure() {
        let schema = vec![FieldSpec::new("n", FieldType::Integer)];
        let mut map = FieldMap::unmapped(1);
        map.set(0, 0);
        let feature = Feature::with_fields(vec![FieldValue::String("abc".into())]);
        assert!(map_attributes(&feature, &map, &schema, false).is_err());

        let mut bad = FieldMap::unmapped(1);
        bad.set(0, 5);
        assert!(map_attributes(&feature, &bad, &schema, false).is_err());
    }
}
