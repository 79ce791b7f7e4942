//! Rapport d'exécution
//!
//! Collecte les résultats par couche (entités lues, écrites, écartées,
//! ignorées) et les erreurs, puis les affiche ou les sauvegarde en JSON.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use layer_pipeline::{LayerOutcome, Severity};
use serde::Serialize;

/// Statut global de l'exécution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Toutes les couches traduites sans erreur
    Success,
    /// Des couches ou des entités ont été ignorées
    PartialSuccess,
    /// Exécution interrompue
    Failed,
}

/// Niveau de sévérité des erreurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorLevel {
    /// Erreur fatale: exécution abandonnée
    Fatal,
    /// Erreur: couche ignorée (skip-failures)
    Error,
    /// Warning: option ignorée, entités ignorées...
    Warning,
}

impl From<Severity> for ErrorLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::RunFatal => ErrorLevel::Fatal,
            Severity::LayerFatal => ErrorLevel::Error,
            Severity::FeatureFatal => ErrorLevel::Warning,
        }
    }
}

/// Erreur rencontrée pendant l'exécution
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub level: ErrorLevel,
    /// Couche source concernée (optionnel)
    pub layer: Option<String>,
    pub message: String,
}

/// Statistiques d'une couche traduite
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerStats {
    pub source: String,
    pub destination: String,
    pub read: u64,
    pub written: u64,
    /// Parties écartées par un découpage
    pub dropped: u64,
    /// Entités ignorées sur erreur
    pub skipped: u64,
    pub transactions: u64,
    pub created: bool,
}

impl From<&LayerOutcome> for LayerStats {
    fn from(outcome: &LayerOutcome) -> Self {
        Self {
            source: outcome.source.clone(),
            destination: outcome.destination.clone(),
            read: outcome.read,
            written: outcome.written,
            dropped: outcome.dropped,
            skipped: outcome.skipped,
            transactions: outcome.transactions,
            created: outcome.created,
        }
    }
}

/// Rapport complet d'exécution
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: String,
    pub destination: String,
    pub duration_secs: f64,
    pub status: RunStatus,

    /// Couches traduites, dans l'ordre
    pub layers: Vec<LayerStats>,
    /// Couches ignorées après une erreur
    pub layers_failed: usize,

    pub errors: Vec<RunError>,
}

impl RunReport {
    pub fn new(source: &str, destination: &str) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            duration_secs: 0.0,
            status: RunStatus::Success,
            layers: Vec::new(),
            layers_failed: 0,
            errors: Vec::new(),
        }
    }

    /// Enregistre une couche traduite
    pub fn record_layer(&mut self, outcome: &LayerOutcome) {
        if outcome.skipped > 0 {
            self.record_warning(
                Some(&outcome.source),
                format!("{} feature(s) skipped after write errors", outcome.skipped),
            );
        }
        if !outcome.missing_fields.is_empty() {
            self.record_warning(
                Some(&outcome.source),
                format!(
                    "selected field(s) not found: {}",
                    outcome.missing_fields.join(", ")
                ),
            );
        }
        self.layers.push(LayerStats::from(outcome));
    }

    /// Enregistre une couche en échec
    pub fn record_layer_failure(&mut self, layer: &str, level: ErrorLevel, message: String) {
        self.layers_failed += 1;
        self.errors.push(RunError {
            level,
            layer: Some(layer.to_string()),
            message,
        });
    }

    /// Enregistre une erreur fatale hors couche
    pub fn record_fatal(&mut self, message: String) {
        self.errors.push(RunError {
            level: ErrorLevel::Fatal,
            layer: None,
            message,
        });
    }

    pub fn record_warning(&mut self, layer: Option<&str>, message: String) {
        self.errors.push(RunError {
            level: ErrorLevel::Warning,
            layer: layer.map(str::to_string),
            message,
        });
    }

    /// Définit la durée de l'exécution
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final basé sur les erreurs
    pub fn finalize(&mut self) {
        let has_fatal = self.errors.iter().any(|e| e.level == ErrorLevel::Fatal);
        let has_errors = self.errors.iter().any(|e| e.level == ErrorLevel::Error)
            || self.layers.iter().any(|l| l.skipped > 0);
        let has_success = !self.layers.is_empty();

        self.status = if has_fatal {
            RunStatus::Failed
        } else if has_errors && has_success {
            RunStatus::PartialSuccess
        } else if has_errors {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
    }

    pub fn features_written(&self) -> u64 {
        self.layers.iter().map(|l| l.written).sum()
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("TRANSLATION REPORT - {} -> {}", self.source, self.destination);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SUMMARY ---");
        println!(
            "Layers: {} translated, {} failed",
            self.layers.len(),
            self.layers_failed
        );
        println!(
            "Features: {} read, {} written, {} dropped, {} skipped",
            self.layers.iter().map(|l| l.read).sum::<u64>(),
            self.features_written(),
            self.layers.iter().map(|l| l.dropped).sum::<u64>(),
            self.layers.iter().map(|l| l.skipped).sum::<u64>()
        );

        if !self.layers.is_empty() {
            println!("\n--- BY LAYER ---");
            for l in &self.layers {
                println!(
                    "  {} -> {}{}: {} read, {} written, {} dropped, {} skipped, {} transactions",
                    l.source,
                    l.destination,
                    if l.created { " (created)" } else { "" },
                    l.read,
                    l.written,
                    l.dropped,
                    l.skipped,
                    l.transactions
                );
            }
        }

        if !self.errors.is_empty() {
            println!("\n--- ERRORS ({}) ---", self.errors.len());
            for e in self.errors.iter().take(20) {
                let location = e
                    .layer
                    .as_ref()
                    .map(|l| format!("[{}]", l))
                    .unwrap_or_default();
                println!("  {:?} {} {}", e.level, location, e.message);
            }
            if self.errors.len() > 20 {
                println!("  ... and {} more", self.errors.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        format!(
            "{} -> {}: {} layer(s), {} feature(s) written, {} error(s)",
            self.source,
            self.destination,
            self.layers.len(),
            self.features_written(),
            self.errors
                .iter()
                .filter(|e| e.level != ErrorLevel::Warning)
                .count()
        )
    }
}
