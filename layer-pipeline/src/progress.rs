//! Suivi de progression
//!
//! Chaque couche reçoit une tranche `[start, end]` de la progression globale,
//! proportionnelle à son nombre d'entités. Les valeurs rapportées sont
//! bornées à la tranche et ne décroissent jamais.

/// Destinataire des valeurs de progression (fraction dans `[0, 1]`)
pub trait ProgressSink {
    fn report(&mut self, fraction: f64);
}

impl<F: FnMut(f64)> ProgressSink for F {
    fn report(&mut self, fraction: f64) {
        self(fraction)
    }
}

/// Tranche de la progression globale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

impl ProgressRange {
    pub const FULL: ProgressRange = ProgressRange {
        start: 0.0,
        end: 1.0,
    };

    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Projette une fraction locale dans la tranche
    pub fn scale(&self, local: f64) -> f64 {
        self.start + (self.end - self.start) * local.clamp(0.0, 1.0)
    }
}

/// Progression d'une couche
pub struct ProgressReporter<'a> {
    sink: Option<&'a mut dyn ProgressSink>,
    range: ProgressRange,
    total: u64,
    processed: u64,
    last: f64,
}

impl<'a> ProgressReporter<'a> {
    /// Reporter inactif
    pub fn disabled() -> Self {
        Self {
            sink: None,
            range: ProgressRange::FULL,
            total: 0,
            processed: 0,
            last: 0.0,
        }
    }

    pub fn new(sink: &'a mut dyn ProgressSink, range: ProgressRange, total: u64) -> Self {
        Self {
            sink: Some(sink),
            range,
            total,
            processed: 0,
            last: range.start,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Fraction locale (1 si le total est nul)
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.processed as f64 / self.total as f64).min(1.0)
        }
    }

    /// Une entité source de plus a été traitée
    pub fn advance(&mut self) {
        self.processed += 1;
        let value = self.range.scale(self.fraction()).max(self.last);
        self.last = value;
        if let Some(sink) = self.sink.as_mut() {
            sink.report(value);
        }
    }
}

/// Répartition de la progression entre les couches
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressPlan {
    counts: Vec<u64>,
    ranges: Vec<ProgressRange>,
}

impl ProgressPlan {
    /// Construit le plan; `None` si une couche n'a pas de comptage rapide
    pub fn from_counts(counts: &[Option<u64>]) -> Option<Self> {
        let counts: Vec<u64> = counts.iter().copied().collect::<Option<_>>()?;
        let total: u64 = counts.iter().sum();

        let mut ranges = Vec::with_capacity(counts.len());
        let mut accumulated = 0u64;
        for &count in &counts {
            let range = if total == 0 {
                ProgressRange::FULL
            } else {
                ProgressRange::new(
                    accumulated as f64 / total as f64,
                    (accumulated + count) as f64 / total as f64,
                )
            };
            accumulated += count;
            ranges.push(range);
        }

        Some(Self { counts, ranges })
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn range(&self, layer: usize) -> ProgressRange {
        self.ranges.get(layer).copied().unwrap_or(ProgressRange::FULL)
    }

    pub fn count(&self, layer: usize) -> u64 {
        self.counts.get(layer).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_progress() {
        let mut seen = Vec::new();
        let mut sink = |f: f64| seen.push(f);
        {
            let mut progress = ProgressReporter::new(&mut sink, ProgressRange::new(0.5, 1.0), 4);
            for _ in 0..4 {
                progress.advance();
            }
        }
        assert_eq!(seen, vec![0.625, 0.75, 0.875, 1.0]);
    }

    #[test]
    fn test_clamped_when_total_underestimated() {
        let mut seen = Vec::new();
        let mut sink = |f: f64| seen.push(f);
        {
            let mut progress = ProgressReporter::new(&mut sink, ProgressRange::new(0.0, 0.5), 2);
            for _ in 0..5 {
                progress.advance();
            }
        }
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|&f| f <= 0.5));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_zero_total_reports_upper_bound() {
        let mut seen = Vec::new();
        let mut sink = |f: f64| seen.push(f);
        {
            let mut progress = ProgressReporter::new(&mut sink, ProgressRange::new(0.2, 0.4), 0);
            progress.advance();
        }
        assert_eq!(seen, vec![0.4]);
    }

    #[test]
    fn test_disabled_reporter_counts() {
        let mut progress = ProgressReporter::disabled();
        progress.advance();
        assert!(!progress.is_enabled());
        assert_eq!(progress.processed(), 1);
    }

    #[test]
    fn test_plan_ranges() {
        let plan = ProgressPlan::from_counts(&[Some(10), Some(30), Some(0)]).unwrap();
        assert_eq!(plan.total(), 40);
        assert_eq!(plan.range(0), ProgressRange::new(0.0, 0.25));
        assert_eq!(plan.range(1), ProgressRange::new(0.25, 1.0));
        assert_eq!(plan.range(2), ProgressRange::new(1.0, 1.0));
    }

    #[test]
    fn test_plan_disabled_without_fast_count() {
        assert!(ProgressPlan::from_counts(&[Some(10), None]).is_none());
    }
}
