use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use super::format::RecordFormat;
use super::metrics::{default_metrics, StoreMetrics};
use crate::primitives::pager::PagerOptions;
use crate::types::{Result, StrandError};

/// Configuration supplied when opening a node or relationship store.
#[derive(Clone)]
pub struct StoreOptions {
    /// Options for the paged file backing the store.
    pub pager: PagerOptions,
    /// Record layout, fixed for the life of the store.
    pub record_format: RecordFormat,
    /// Whether freed record ids are handed out again.
    pub reuse_ids: bool,
    /// Metrics sink shared by the store, its paged file and its cursors.
    pub metrics: Arc<dyn StoreMetrics>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            pager: PagerOptions::default(),
            record_format: RecordFormat::default(),
            reuse_ids: true,
            metrics: default_metrics(),
        }
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("pager", &self.pager)
            .field("record_format", &self.record_format)
            .field("reuse_ids", &self.reuse_ids)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    store: RawStore,
    pager: PagerOptions,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawStore {
    record_format: RecordFormat,
    reuse_ids: bool,
}

impl Default for RawStore {
    fn default() -> Self {
        Self {
            record_format: RecordFormat::default(),
            reuse_ids: true,
        }
    }
}

impl StoreOptions {
    /// Sets the paged file options.
    pub fn pager(mut self, pager: PagerOptions) -> Self {
        self.pager = pager;
        self
    }

    /// Sets the page size of the paged file.
    pub fn page_size(mut self, bytes: u32) -> Self {
        self.pager.page_size = bytes;
        self
    }

    /// Sets the record layout.
    pub fn record_format(mut self, format: RecordFormat) -> Self {
        self.record_format = format;
        self
    }

    /// Enables or disables reuse of freed record ids.
    pub fn reuse_ids(mut self, enabled: bool) -> Self {
        self.reuse_ids = enabled;
        self
    }

    /// Installs a metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn StoreMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Parses options from a TOML document with optional `[store]` and
    /// `[pager]` tables. Missing keys keep their defaults.
    ///
    /// ```toml
    /// [store]
    /// record_format = "high_limit"
    /// reuse_ids = false
    ///
    /// [pager]
    /// page_size = 4096
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|err| StrandError::Config(err.to_string()))?;
        let options = Self {
            pager: raw.pager,
            record_format: raw.store.record_format,
            reuse_ids: raw.store.reuse_ids,
            metrics: default_metrics(),
        };
        options.validate()?;
        Ok(options)
    }

    /// Checks that the pager is valid and a page holds at least one record.
    pub fn validate(&self) -> Result<()> {
        self.pager.validate()?;
        let record = self
            .record_format
            .relationship_size()
            .max(self.record_format.node_size());
        if (self.pager.page_size as usize) < record {
            return Err(StrandError::Config(format!(
                "page size {} is smaller than a {record}-byte record",
                self.pager.page_size
            )));
        }
        Ok(())
    }
}
