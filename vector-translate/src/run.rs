//! Orchestration d'une exécution
//!
//! Ouvre la source et la destination, charge les géométries de découpage,
//! puis traduit la requête SQL ou chaque couche sélectionnée. Les erreurs de
//! couche arrêtent l'exécution, sauf avec skip-failures où la couche est
//! ignorée; les erreurs d'exécution (couche existante, SRS invalide...)
//! l'arrêtent toujours.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use geo::Polygon;
use layer_pipeline::geometry::bbox_polygon;
use layer_pipeline::{
    DataSource, Layer, LayerTranslator, PipelineError, ProgressPlan, ProgressRange,
    ProgressReporter, Severity, TranslationSettings,
};
use tracing::{debug, error, info, warn};

use crate::clip::load_clip;
use crate::config::RunConfig;
use crate::drivers::DriverRegistry;
use crate::progress::TermProgress;
use crate::report::{ErrorLevel, RunReport};
use crate::reproject::ProjTransformProvider;

/// Exécute une traduction complète
///
/// Les erreurs de mise en place (ouverture, options) sont retournées; les
/// erreurs de traduction sont consignées dans le rapport (statut `Failed`).
pub fn run(config: &RunConfig, registry: &DriverRegistry) -> Result<RunReport> {
    config.validate()?;
    let started = Instant::now();

    let clip_source = config
        .clip_src
        .as_ref()
        .map(|spec| load_clip(spec, config.spat, registry).map(Arc::new))
        .transpose()
        .context("Failed to load source clip geometry")?;
    let clip_destination = config
        .clip_dst
        .as_ref()
        .map(|spec| load_clip(spec, config.spat, registry).map(Arc::new))
        .transpose()
        .context("Failed to load destination clip geometry")?;
    let settings = config.to_settings(clip_source, clip_destination)?;

    let mut source = registry
        .open(&config.source, false)
        .with_context(|| format!("Unable to open datasource `{}'", config.source))?;

    let mut report = RunReport::new(source.name(), &config.destination);
    let mut destination = open_destination(config, registry, &mut report)?;

    info!(
        source = %config.source,
        destination = %config.destination,
        format = %config.format,
        "Starting translation"
    );

    let result = translate_datasource(
        config,
        &settings,
        source.as_mut(),
        destination.as_mut(),
        &mut report,
    );
    if let Err(e) = &result {
        if !report.errors.iter().any(|err| err.level == ErrorLevel::Fatal) {
            report.record_fatal(format!("{:#}", e));
        }
    }

    if let Err(e) = destination.close() {
        error!(error = %e, "Failed to close destination datasource");
        report.record_fatal(format!("Failed to close destination datasource: {}", e));
    }

    report.set_duration(started.elapsed());
    report.finalize();
    info!("{}", report.summary());
    Ok(report)
}

/// Ouvre la destination existante (mise à jour) ou la crée
fn open_destination(
    config: &RunConfig,
    registry: &DriverRegistry,
    report: &mut RunReport,
) -> Result<Box<dyn DataSource>> {
    if !config.opens_for_update() {
        return registry
            .create(
                &config.format,
                &config.destination,
                &config.datasource_creation_options,
            )
            .with_context(|| format!("Failed to create datasource `{}'", config.destination));
    }

    match registry.open(&config.destination, true) {
        Ok(datasource) => {
            if !config.datasource_creation_options.is_empty() {
                warn!("Datasource creation options ignored since an existing datasource is being updated");
                report.record_warning(
                    None,
                    "datasource creation options ignored when updating".into(),
                );
            }
            Ok(datasource)
        }
        Err(e) if config.append || config.overwrite => {
            debug!(error = %e, "Destination not found, creating it");
            registry
                .create(
                    &config.format,
                    &config.destination,
                    &config.datasource_creation_options,
                )
                .with_context(|| format!("Failed to create datasource `{}'", config.destination))
        }
        Err(e) => Err(e.context(format!(
            "Unable to open existing output datasource `{}'",
            config.destination
        ))),
    }
}

/// Traduit la requête SQL ou les couches sélectionnées de `source`
pub fn translate_datasource(
    config: &RunConfig,
    settings: &TranslationSettings,
    source: &mut dyn DataSource,
    destination: &mut dyn DataSource,
    report: &mut RunReport,
) -> Result<()> {
    let transforms = ProjTransformProvider;
    let spatial_filter: Option<Polygon<f64>> = config
        .spat
        .map(|e| bbox_polygon(e.xmin, e.ymin, e.xmax, e.ymax));
    let mut terminal = TermProgress::stdout();
    let mut sink = |fraction: f64| terminal.update(fraction);

    if let Some(statement) = &config.sql {
        if config.where_clause.is_some() {
            warn!("-where clause ignored in combination with -sql");
            report.record_warning(None, "-where clause ignored in combination with -sql".into());
        }
        if !config.layers.is_empty() {
            warn!("layer names ignored in combination with -sql");
            report.record_warning(None, "layer names ignored in combination with -sql".into());
        }

        let mut result = source
            .execute_sql(statement, spatial_filter.as_ref())
            .with_context(|| format!("Failed to execute SQL statement: {}", statement))?;

        let sql_settings = TranslationSettings {
            attribute_filter: None,
            ..settings.clone()
        };
        let translator = LayerTranslator::new(&sql_settings).with_transforms(&transforms);

        let total = if config.progress {
            let count = result.fast_feature_count();
            if count.is_none() {
                warn!("Progress turned off as fast feature count is not available");
            }
            count
        } else {
            None
        };
        let mut progress = match total {
            Some(total) => ProgressReporter::new(&mut sink, ProgressRange::FULL, total),
            None => ProgressReporter::disabled(),
        };

        let name = result.name().to_string();
        return match translator.translate(result.as_mut(), destination, &mut progress) {
            Ok(outcome) => {
                report.record_layer(&outcome);
                Ok(())
            }
            Err(e) => handle_layer_failure(e, &name, config.skip_failures, report),
        };
    }

    // Sélection des couches
    let mut selected = Vec::new();
    if config.layers.is_empty() {
        selected.extend(0..source.layer_count());
    } else {
        for name in &config.layers {
            match source.layer_index(name) {
                Some(index) => selected.push(index),
                None if config.skip_failures => {
                    error!("FAILURE: Couldn't fetch requested layer '{}'!", name);
                    report.record_layer_failure(
                        name,
                        ErrorLevel::Error,
                        format!("Couldn't fetch requested layer '{}'", name),
                    );
                }
                None => bail!("Couldn't fetch requested layer '{}'!", name),
            }
        }
    }

    // Première passe: filtres et comptage
    let mut prepared = Vec::with_capacity(selected.len());
    let mut counts = Vec::with_capacity(selected.len());
    for index in selected {
        let Some(layer) = source.layer(index) else {
            bail!("Couldn't fetch advertised layer {}!", index);
        };
        let name = layer.name().to_string();

        if let Some(expression) = &config.where_clause {
            if let Err(e) = layer.set_attribute_filter(Some(expression)) {
                let message = format!("SetAttributeFilter({}) on layer '{}' failed: {}", expression, name, e);
                if !config.skip_failures {
                    bail!(message);
                }
                error!("FAILURE: {}", message);
                report.record_layer_failure(&name, ErrorLevel::Error, message);
                continue;
            }
        }
        layer.set_spatial_filter(spatial_filter.as_ref());

        counts.push(if config.progress {
            layer.fast_feature_count()
        } else {
            None
        });
        prepared.push(index);
    }

    let plan = if config.progress {
        let plan = ProgressPlan::from_counts(&counts);
        if plan.is_none() {
            warn!("Progress turned off as fast feature count is not available");
        }
        plan
    } else {
        None
    };

    // Seconde passe: traduction
    let translator = LayerTranslator::new(settings).with_transforms(&transforms);
    for (slot, index) in prepared.into_iter().enumerate() {
        let Some(layer) = source.layer(index) else {
            bail!("Couldn't fetch advertised layer {}!", index);
        };
        let name = layer.name().to_string();

        let mut progress = match &plan {
            Some(plan) => ProgressReporter::new(&mut sink, plan.range(slot), plan.count(slot)),
            None => ProgressReporter::disabled(),
        };

        match translator.translate(layer, destination, &mut progress) {
            Ok(outcome) => report.record_layer(&outcome),
            Err(e) => handle_layer_failure(e, &name, config.skip_failures, report)?,
        }
    }

    Ok(())
}

/// Poursuit ou arrête l'exécution selon la portée de l'erreur
fn handle_layer_failure(
    error: PipelineError,
    layer: &str,
    skip_failures: bool,
    report: &mut RunReport,
) -> Result<()> {
    let message = error.to_string();
    match error.severity() {
        Severity::RunFatal => {
            report.record_layer_failure(layer, ErrorLevel::Fatal, message);
            Err(anyhow!(error))
        }
        _ if skip_failures => {
            warn!(layer, error = %message, "Layer skipped");
            report.record_layer_failure(layer, ErrorLevel::Error, message);
            Ok(())
        }
        _ => {
            error!(
                "Terminating translation prematurely after failed translation of layer {} (use -skipfailures to skip errors)",
                layer
            );
            report.record_layer_failure(layer, ErrorLevel::Fatal, message);
            Err(anyhow!(error).context(format!(
                "Terminating translation prematurely after failed translation of layer {}",
                layer
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RunStatus;
    use geo::point;
    use layer_pipeline::{
        Feature, FieldSpec, FieldType, FieldValue, GeometryKind, GeometryType, MemoryDataSource,
        MemoryLayer, SpatialRef,
    };

    fn towns() -> MemoryLayer {
        let mut layer = MemoryLayer::new(
            "towns",
            GeometryKind::new(GeometryType::Point),
            Some(SpatialRef::from_epsg(2154)),
        )
        .with_fields(vec![
            FieldSpec::new("name", FieldType::String),
            FieldSpec::new("pop", FieldType::Integer),
        ]);
        for (i, (name, pop)) in [("a", 10), ("b", 200), ("c", 3000)].iter().enumerate() {
            layer
                .create_feature(
                    Feature::with_fields(vec![
                        FieldValue::String(name.to_string()),
                        FieldValue::Integer(*pop),
                    ])
                    .with_geometry(point!(x: i as f64, y: i as f64)),
                )
                .unwrap();
        }
        layer
    }

    fn rivers() -> MemoryLayer {
        MemoryLayer::new("rivers", GeometryKind::new(GeometryType::LineString), None)
            .with_fields(vec![FieldSpec::new("name", FieldType::String)])
    }

    fn config() -> RunConfig {
        RunConfig {
            source: "mem".into(),
            destination: "out".into(),
            format: "Memory".into(),
            ..Default::default()
        }
    }

    fn translate(
        config: &RunConfig,
        source: &mut MemoryDataSource,
        destination: &mut MemoryDataSource,
    ) -> (Result<()>, RunReport) {
        let settings = config.to_settings(None, None).unwrap();
        let mut report = RunReport::new("mem", "out");
        let result = translate_datasource(config, &settings, source, destination, &mut report);
        report.finalize();
        (result, report)
    }

    #[test]
    fn test_translates_all_layers() {
        let mut source = MemoryDataSource::new("mem").with_layer(towns()).with_layer(rivers());
        let mut destination = MemoryDataSource::new("out");

        let (result, report) = translate(&config(), &mut source, &mut destination);
        result.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.layers.len(), 2);
        assert_eq!(destination.memory_layer("towns").unwrap().len(), 3);
        assert!(destination.memory_layer("rivers").unwrap().is_empty());
    }

    #[test]
    fn test_where_and_spatial_filter() {
        let mut source = MemoryDataSource::new("mem").with_layer(towns());
        let mut destination = MemoryDataSource::new("out");
        let config = RunConfig {
            where_clause: Some("pop > 50".into()),
            spat: Some(crate::config::Extent {
                xmin: -0.5,
                ymin: -0.5,
                xmax: 1.5,
                ymax: 1.5,
            }),
            ..config()
        };

        let (result, _) = translate(&config, &mut source, &mut destination);
        result.unwrap();
        let out = destination.memory_layer("towns").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.features()[0].fields[0], FieldValue::String("b".into()));
    }

    #[test]
    fn test_missing_layer_is_fatal_without_skip() {
        let mut source = MemoryDataSource::new("mem").with_layer(towns());
        let mut destination = MemoryDataSource::new("out");
        let config = RunConfig {
            layers: vec!["nope".into()],
            ..config()
        };
        let (result, _) = translate(&config, &mut source, &mut destination);
        assert!(result.is_err());

        let config = RunConfig {
            layers: vec!["nope".into(), "towns".into()],
            skip_failures: true,
            ..config
        };
        let (result, report) = translate(&config, &mut source, &mut destination);
        result.unwrap();
        assert_eq!(report.status, RunStatus::PartialSuccess);
        assert_eq!(report.layers_failed, 1);
        assert_eq!(destination.memory_layer("towns").unwrap().len(), 3);
    }

    #[test]
    fn test_existing_layer_aborts_run() {
        let mut source = MemoryDataSource::new("mem").with_layer(towns());
        let mut destination = MemoryDataSource::new("out").with_layer(MemoryLayer::new(
            "towns",
            GeometryKind::new(GeometryType::Point),
            None,
        ));

        let config = RunConfig {
            skip_failures: true,
            ..config()
        };
        let (result, report) = translate(&config, &mut source, &mut destination);
        assert!(result.is_err());
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[test]
    fn test_layer_failure_skipped() {
        let mut source = MemoryDataSource::new("mem").with_layer(towns()).with_layer(rivers());
        let mut destination = MemoryDataSource::new("out");
        let config = RunConfig {
            select: Some(vec!["pop".into()]),
            ..config()
        };

        // rivers n'a pas de champ pop
        let (result, _) = translate(&config, &mut source, &mut destination);
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("Terminating translation prematurely"));

        let mut destination = MemoryDataSource::new("out");
        let config = RunConfig {
            skip_failures: true,
            ..config
        };
        let (result, report) = translate(&config, &mut source, &mut destination);
        result.unwrap();
        assert_eq!(report.layers.len(), 2);
        assert_eq!(destination.memory_layer("towns").unwrap().schema().len(), 1);
    }

    #[test]
    fn test_sql_mode() {
        let mut source = MemoryDataSource::new("mem").with_layer(towns());
        let mut destination = MemoryDataSource::new("out");
        let config = RunConfig {
            sql: Some("SELECT name FROM towns WHERE pop >= 200".into()),
            where_clause: Some("pop < 0".into()),
            new_layer_name: Some("big".into()),
            ..config()
        };

        let (result, report) = translate(&config, &mut source, &mut destination);
        result.unwrap();
        let out = destination.memory_layer("big").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.schema().len(), 1);
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("-where clause ignored")));
    }
}
