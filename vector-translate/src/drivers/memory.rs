//! Driver mémoire: datasource volatile, utile pour les essais et le SQL

use anyhow::{bail, Result};
use layer_pipeline::{DataSource, MemoryDataSource};
use tracing::debug;

pub struct MemoryDriver;

impl super::Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "Memory"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["MEM"]
    }

    fn can_open(&self, _path: &str) -> bool {
        false
    }

    fn open(&self, path: &str, _update: bool) -> Result<Box<dyn DataSource>> {
        bail!("Memory datasource `{}' cannot be reopened", path)
    }

    fn create(&self, path: &str, options: &[String]) -> Result<Box<dyn DataSource>> {
        if !options.is_empty() {
            debug!(?options, "Memory driver ignores datasource creation options");
        }
        Ok(Box::new(MemoryDataSource::new(path)))
    }
}
