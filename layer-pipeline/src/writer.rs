//! Écriture transactionnelle des entités
//!
//! Les écritures sont regroupées par transactions de `group_size` entités.
//! La transaction suivante n'est ouverte qu'à l'écriture suivante: aucune
//! transaction vide n'est jamais validée. Avec skip-failures, chaque entité
//! a sa propre transaction, annulée si l'écriture échoue.

use tracing::{debug, error, warn};

use crate::error::{LayerError, PipelineError};
use crate::source::Layer;
use crate::types::Feature;

/// État transactionnel du writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Aucune transaction ouverte
    Idle,
    /// Transaction ouverte contenant `pending` écritures
    Open { pending: usize },
}

/// Compteurs du writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    /// Entités refusées puis ignorées (skip-failures)
    pub discarded: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

/// Issue d'une écriture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(i64),
    Discarded,
}

/// Taille de groupe effective (skip-failures impose 1)
pub fn effective_group_size(group_size: usize, skip_failures: bool) -> usize {
    if skip_failures {
        1
    } else {
        group_size
    }
}

/// Writer transactionnel pour une couche destination
#[derive(Debug)]
pub struct TransactionalFeatureWriter {
    layer: String,
    group_size: usize,
    skip_failures: bool,
    state: TxState,
    stats: WriterStats,
}

impl TransactionalFeatureWriter {
    /// `group_size` = 0 désactive les transactions
    pub fn new(layer: impl Into<String>, group_size: usize, skip_failures: bool) -> Self {
        Self {
            layer: layer.into(),
            group_size: effective_group_size(group_size, skip_failures),
            skip_failures,
            state: TxState::Idle,
            stats: WriterStats::default(),
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    fn ensure_transaction(&mut self, layer: &mut dyn Layer) -> Result<(), PipelineError> {
        if self.group_size > 0 && self.state == TxState::Idle {
            layer
                .start_transaction()
                .map_err(|e| PipelineError::layer(&self.layer, e))?;
            self.state = TxState::Open { pending: 0 };
            debug!(layer = %self.layer, "Transaction started");
        }
        Ok(())
    }

    fn commit(&mut self, layer: &mut dyn Layer) -> Result<(), PipelineError> {
        let TxState::Open { pending } = self.state else {
            return Ok(());
        };
        self.state = TxState::Idle;

        if let Err(e) = layer.commit_transaction() {
            error!(layer = %self.layer, error = %e, "Commit failed, rolling back");
            self.rollback_quietly(layer);
            return Err(PipelineError::layer(&self.layer, e));
        }

        self.stats.committed += 1;
        debug!(layer = %self.layer, features = pending, "Transaction committed");
        Ok(())
    }

    fn rollback_quietly(&mut self, layer: &mut dyn Layer) {
        match layer.rollback_transaction() {
            Ok(()) => self.stats.rolled_back += 1,
            Err(e) => warn!(layer = %self.layer, error = %e, "Rollback failed"),
        }
    }

    /// Écrit une entité dans la transaction courante
    pub fn write(
        &mut self,
        layer: &mut dyn Layer,
        feature: Feature,
    ) -> Result<WriteOutcome, PipelineError> {
        self.ensure_transaction(layer)?;

        let source_fid = feature.fid;
        match layer.create_feature(feature) {
            Ok(fid) => {
                self.stats.written += 1;
                if let TxState::Open { pending } = self.state {
                    let pending = pending + 1;
                    self.state = TxState::Open { pending };
                    if pending >= self.group_size {
                        self.commit(layer)?;
                    }
                }
                Ok(WriteOutcome::Written(fid))
            }
            Err(e) => self.on_write_failure(layer, source_fid, e),
        }
    }

    fn on_write_failure(
        &mut self,
        layer: &mut dyn Layer,
        fid: Option<i64>,
        source: LayerError,
    ) -> Result<WriteOutcome, PipelineError> {
        if matches!(self.state, TxState::Open { .. }) {
            self.state = TxState::Idle;
            self.rollback_quietly(layer);
        }

        if self.skip_failures {
            warn!(
                layer = %self.layer,
                fid = ?fid,
                error = %source,
                "Unable to write feature, skipping"
            );
            self.stats.discarded += 1;
            return Ok(WriteOutcome::Discarded);
        }

        error!(layer = %self.layer, fid = ?fid, error = %source, "Unable to write feature");
        Err(PipelineError::FeatureRejected {
            layer: self.layer.clone(),
            fid,
            source,
        })
    }

    /// Annule la transaction ouverte après une erreur hors écriture
    pub fn abort(&mut self, layer: &mut dyn Layer) {
        if matches!(self.state, TxState::Open { .. }) {
            self.state = TxState::Idle;
            warn!(layer = %self.layer, "Rolling back open transaction");
            self.rollback_quietly(layer);
        }
    }

    /// Valide la transaction partielle et retourne les compteurs
    pub fn finish(mut self, layer: &mut dyn Layer) -> Result<WriterStats, PipelineError> {
        self.commit(layer)?;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLayer;
    use crate::types::GeometryKind;

    fn layer() -> MemoryLayer {
        MemoryLayer::new("out", GeometryKind::UNKNOWN, None)
    }

    #[test]
    fn test_exact_multiple_commits_no_empty_tail() {
        let mut dst = layer();
        let mut writer = TransactionalFeatureWriter::new("out", 2, false);
        for _ in 0..4 {
            writer.write(&mut dst, Feature::new(0)).unwrap();
        }
        assert_eq!(writer.state(), TxState::Idle);
        let stats = writer.finish(&mut dst).unwrap();

        assert_eq!(stats.committed, 2);
        assert_eq!(dst.transaction_log().committed, vec![2, 2]);
    }

    #[test]
    fn test_partial_tail_committed() {
        let mut dst = layer();
        let mut writer = TransactionalFeatureWriter::new("out", 3, false);
        for _ in 0..5 {
            writer.write(&mut dst, Feature::new(0)).unwrap();
        }
        writer.finish(&mut dst).unwrap();
        assert_eq!(dst.transaction_log().committed, vec![3, 2]);
    }

    #[test]
    fn test_no_transactions_when_group_zero() {
        let mut dst = layer();
        let mut writer = TransactionalFeatureWriter::new("out", 0, false);
        writer.write(&mut dst, Feature::new(0)).unwrap();
        let stats = writer.finish(&mut dst).unwrap();
        assert_eq!(stats.committed, 0);
        assert_eq!(dst.len(), 1);
        assert!(dst.transaction_log().committed.is_empty());
    }

    #[test]
    fn test_failure_rolls_back_group() {
        let mut dst = layer();
        let mut writer = TransactionalFeatureWriter::new("out", 10, false);
        writer.write(&mut dst, Feature::new(0).with_fid(1)).unwrap();
        let err = writer
            .write(&mut dst, Feature::new(0).with_fid(1))
            .unwrap_err();

        assert!(matches!(err, PipelineError::FeatureRejected { fid: Some(1), .. }));
        assert_eq!(dst.len(), 0);
        assert_eq!(dst.transaction_log().rolled_back, 1);
        assert_eq!(writer.state(), TxState::Idle);
    }

    #[test]
    fn test_skip_failures_isolates_each_feature() {
        let mut dst = layer();
        let mut writer = TransactionalFeatureWriter::new("out", 100, true);
        assert_eq!(writer.group_size(), 1);

        writer.write(&mut dst, Feature::new(0).with_fid(1)).unwrap();
        let outcome = writer.write(&mut dst, Feature::new(0).with_fid(1)).unwrap();
        assert_eq!(outcome, WriteOutcome::Discarded);
        writer.write(&mut dst, Feature::new(0).with_fid(2)).unwrap();

        let stats = writer.finish(&mut dst).unwrap();
        assert_eq!(stats.written, 2);
        assert_eq!(stats.discarded, 1);
        assert_eq!(dst.len(), 2);
        assert_eq!(dst.transaction_log().committed, vec![1, 1]);
        assert_eq!(dst.transaction_log().rolled_back, 1);
    }

    #[test]
    fn test_abort_rolls_back_pending() {
        let mut dst = layer();
        let mut writer = TransactionalFeatureWriter::new("out", 5, false);
        writer.write(&mut dst, Feature::new(0)).unwrap();
        writer.abort(&mut dst);
        assert_eq!(dst.len(), 0);
        assert_eq!(writer.stats().rolled_back, 1);
    }
}
