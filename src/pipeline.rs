//! End-to-end ingestion: open, decode, group, reconcile, and materialize.

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::constants::fields::{FIELD_ID, FIELD_MODEL};
use crate::constants::pipeline::FILE_CLUSTER_NAME_PREFIX;
use crate::data::Cluster;
use crate::encoder::{BudgetedEncoder, ClusterSummary, EncodedPayload};
use crate::errors::{IngestError, InsertError};
use crate::grouping::{GroupedInput, RowIssue, group_records};
use crate::lookup::Lookup;
use crate::reconcile::{ReconcileSummary, reconcile_all};
use crate::store::{ClusterStore, CollectionHandle};
use crate::transport::{DecodingReader, InputFile, resolve_encoding};
use crate::types::FieldName;
use crate::utils::non_blank;

/// What to do with a grouped input.
#[derive(Clone, Debug, Default)]
pub struct IngestRequest {
    /// Reconcile the groups and materialize them as a new cluster.
    pub create_cluster: bool,
    /// Cluster name; blank or the configured default derives one from the file name.
    pub cluster_name: Option<String>,
    /// Optional cluster description.
    pub description: Option<String>,
}

impl IngestRequest {
    /// Request that only groups and counts the input.
    pub fn count_only() -> Self {
        Self::default()
    }

    /// Request that materializes a cluster.
    pub fn with_cluster(name: Option<&str>, description: Option<&str>) -> Self {
        Self {
            create_cluster: true,
            cluster_name: name.map(str::to_string),
            description: description.map(str::to_string),
        }
    }
}

/// Outcome of one ingestion pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestionReport {
    /// Input name as given.
    pub source_name: String,
    /// Encoding that decoded the input.
    pub encoding: String,
    /// Distinct non-blank ids.
    pub unique_ids: usize,
    /// Rows retained under some id.
    pub total_rows: usize,
    /// Column keys in header order.
    pub headers: Vec<FieldName>,
    /// Lines that needed repair.
    pub row_issues: Vec<RowIssue>,
    /// Present when a cluster was requested.
    pub reconciliation: Option<ReconcileSummary>,
    /// Cluster created by this pass.
    pub cluster: Option<Cluster>,
    /// Records stored in the cluster collection.
    pub inserted: usize,
    /// Records the store rejected.
    pub insert_failures: Vec<InsertError>,
}

/// Ingestion pipeline bound to a lookup collaborator and a cluster store.
pub struct IngestionPipeline<'a> {
    config: PipelineConfig,
    lookup: &'a dyn Lookup,
    store: &'a ClusterStore,
}

impl<'a> IngestionPipeline<'a> {
    /// Build a pipeline; the configuration is validated up front.
    pub fn new(
        config: PipelineConfig,
        lookup: &'a dyn Lookup,
        store: &'a ClusterStore,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            config: config.validated()?,
            lookup,
            store,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one pass over `input`.
    ///
    /// Structural errors abort before anything is written. Lookup and
    /// per-record insert failures are collected in the report.
    pub fn ingest(
        &self,
        input: &InputFile,
        request: &IngestRequest,
    ) -> Result<IngestionReport, IngestError> {
        info!(input = input.name(), create_cluster = request.create_cluster, "ingesting input");
        let (grouped, encoding) = self.group_input(input)?;
        let mut report = IngestionReport {
            source_name: input.name().to_string(),
            encoding: encoding.name().to_string(),
            unique_ids: grouped.unique_ids(),
            total_rows: grouped.total_rows,
            headers: grouped.headers.clone(),
            row_issues: grouped.issues.clone(),
            reconciliation: None,
            cluster: None,
            inserted: 0,
            insert_failures: Vec::new(),
        };
        if !request.create_cluster {
            info!(
                input = input.name(),
                unique_ids = report.unique_ids,
                total_rows = report.total_rows,
                "grouped input without cluster creation"
            );
            return Ok(report);
        }

        let batch = reconcile_all(&grouped.groups, self.lookup, self.config.lookup_workers);
        let name = self.cluster_name(input, request.cluster_name.as_deref());
        let cluster = self
            .store
            .create_cluster(&name, request.description.as_deref())?;
        let handle = CollectionHandle::for_cluster(&cluster.id);
        let inserted = self.store.insert_all(&handle, &batch.records)?;
        for failure in &inserted.failures {
            warn!(
                cluster_id = %cluster.id,
                id = failure.id(),
                error = %failure,
                "record not stored"
            );
        }
        let cluster = self.store.recount_records(&cluster.id)?;
        info!(
            cluster_id = %cluster.id,
            unique_ids = report.unique_ids,
            inserted = inserted.inserted,
            insert_failures = inserted.failures.len(),
            lookup_failures = batch.summary.lookup_failures.len(),
            "ingestion complete"
        );

        report.reconciliation = Some(batch.summary);
        report.cluster = Some(cluster);
        report.inserted = inserted.inserted;
        report.insert_failures = inserted.failures;
        Ok(report)
    }

    /// Budgeted payload for a stored cluster; `None` when the cluster is unknown.
    pub fn payload(&self, cluster_id: &str) -> Result<Option<EncodedPayload>, IngestError> {
        cluster_payload(self.store, cluster_id, &self.config)
    }

    fn group_input(
        &self,
        input: &InputFile,
    ) -> Result<(GroupedInput, &'static Encoding), IngestError> {
        let primary = resolve_encoding(&self.config.primary_encoding)?;
        let fallback = resolve_encoding(&self.config.fallback_encoding)?;
        match group_with(input, primary) {
            Err(IngestError::Decode { line, reason }) => {
                warn!(
                    input = input.name(),
                    line,
                    reason = %reason,
                    primary = primary.name(),
                    fallback = fallback.name(),
                    "retrying input with fallback encoding"
                );
                match group_with(input, fallback) {
                    Err(IngestError::Decode { .. }) => Err(IngestError::EncodingFallbackExhausted {
                        primary: self.config.primary_encoding.clone(),
                        fallback: self.config.fallback_encoding.clone(),
                    }),
                    other => other.map(|grouped| (grouped, fallback)),
                }
            }
            other => other.map(|grouped| (grouped, primary)),
        }
    }

    fn cluster_name(&self, input: &InputFile, requested: Option<&str>) -> String {
        match requested.and_then(non_blank) {
            Some(name) if name != self.config.default_cluster_name => name.to_string(),
            _ => format!("{FILE_CLUSTER_NAME_PREFIX}{}", input.name()),
        }
    }
}

fn group_with(input: &InputFile, encoding: &'static Encoding) -> Result<GroupedInput, IngestError> {
    debug!(input = input.name(), encoding = encoding.name(), "grouping input");
    input.with_reader(|raw| group_records(DecodingReader::new(raw, encoding)))
}

/// Summarize a stored cluster by model and encode it within the configured budget.
pub fn cluster_payload(
    store: &ClusterStore,
    cluster_id: &str,
    config: &PipelineConfig,
) -> Result<Option<EncodedPayload>, IngestError> {
    let Some(cluster) = store.get_cluster(cluster_id)? else {
        return Ok(None);
    };
    let handle = CollectionHandle::for_cluster(&cluster.id);
    let rows = store.query_fields(&handle, &[FIELD_ID, FIELD_MODEL], false)?.rows;
    let summary = ClusterSummary::with_sample_limit(&cluster, &rows, config.sample_ids_per_model);
    Ok(Some(BudgetedEncoder::new(config.byte_budget).encode(&summary)))
}
