use crate::constants::encoder::{DEFAULT_BYTE_BUDGET, SAMPLE_IDS_PER_MODEL};
use crate::constants::pipeline::{
    DEFAULT_CLUSTER_NAME, DEFAULT_FALLBACK_ENCODING, DEFAULT_LOOKUP_WORKERS,
    DEFAULT_PRIMARY_ENCODING,
};
use crate::errors::IngestError;

/// Top-level ingestion pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Encoding label tried first when decoding input text (WHATWG label).
    pub primary_encoding: String,
    /// Encoding label tried once when the primary encoding fails to decode.
    pub fallback_encoding: String,
    /// Number of worker threads dispatching lookup calls.
    pub lookup_workers: usize,
    /// Byte budget handed to the payload encoder.
    pub byte_budget: usize,
    /// Sample ids kept per model bucket in encoded payloads.
    pub sample_ids_per_model: usize,
    /// Cluster name treated as "not provided"; replaced by a file-derived name.
    pub default_cluster_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            primary_encoding: DEFAULT_PRIMARY_ENCODING.to_string(),
            fallback_encoding: DEFAULT_FALLBACK_ENCODING.to_string(),
            lookup_workers: DEFAULT_LOOKUP_WORKERS,
            byte_budget: DEFAULT_BYTE_BUDGET,
            sample_ids_per_model: SAMPLE_IDS_PER_MODEL,
            default_cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Override the primary and fallback encoding labels.
    pub fn with_encodings(
        mut self,
        primary: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        self.primary_encoding = primary.into();
        self.fallback_encoding = fallback.into();
        self
    }

    /// Override the lookup worker pool size (clamped to at least one).
    pub fn with_lookup_workers(mut self, workers: usize) -> Self {
        self.lookup_workers = workers.max(1);
        self
    }

    /// Override the payload byte budget.
    pub fn with_byte_budget(mut self, budget: usize) -> Self {
        self.byte_budget = budget;
        self
    }

    /// Reject settings no pipeline run can work with.
    pub fn validated(self) -> Result<Self, IngestError> {
        if self.lookup_workers == 0 {
            return Err(IngestError::Configuration(
                "lookup_workers must be at least 1".into(),
            ));
        }
        if self.byte_budget == 0 {
            return Err(IngestError::Configuration(
                "byte_budget must be positive".into(),
            ));
        }
        if self.primary_encoding.trim().is_empty() || self.fallback_encoding.trim().is_empty() {
            return Err(IngestError::Configuration(
                "encoding labels must not be empty".into(),
            ));
        }
        Ok(self)
    }
}
