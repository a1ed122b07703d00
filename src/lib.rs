#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Command line front end.
pub mod cli;
/// Header alias table and column layout.
pub mod columns;
/// Pipeline configuration types.
pub mod config;
/// Centralized constants used across grouping, reconciliation, storage, and encoding.
pub mod constants;
/// Source rows, canonical records, clusters, and projections.
pub mod data;
/// Byte-budgeted cluster summary payloads.
pub mod encoder;
/// Streaming CSV grouping by device id.
pub mod grouping;
/// External lookup collaborator contract and built-in lookups.
pub mod lookup;
/// Per-model aggregation helpers.
pub mod metrics;
/// Ingestion orchestration.
pub mod pipeline;
/// Local/external record reconciliation.
pub mod reconcile;
/// Cluster store and per-cluster collections.
pub mod store;
/// Input transports: files, archives, and character decoding.
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Text normalization helpers.
pub mod utils;

mod errors;

pub use columns::{ColumnLayout, ColumnSlot, map_column, normalize_header};
pub use config::PipelineConfig;
pub use data::{CanonicalRecord, Cluster, ClusterDetails, RecordProjection, SourceRow};
pub use encoder::{
    BudgetedEncoder, ClusterSummary, CountsOnly, DetailTier, EncodedPayload, ErrorCorrection,
    FullDetail, encode,
};
pub use errors::{EncodeError, IngestError, InsertError, LookupError};
pub use grouping::{GroupedInput, RowIssue, group_records};
pub use lookup::{FixtureLookup, Lookup, LookupRecord, OfflineLookup};
pub use metrics::{ModelBucket, tally_models};
pub use pipeline::{IngestRequest, IngestionPipeline, IngestionReport, cluster_payload};
pub use reconcile::{
    ReconcileBatch, ReconcileOutcome, ReconcileSummary, Reconciled, reconcile, reconcile_all,
};
pub use store::{ClusterStore, CollectionHandle, CollectionInfo, InsertReport, QueryResult};
pub use transport::{InputFile, InputKind};
pub use types::{
    AuditMap, ClusterId, CollectionName, DeviceId, FieldMap, FieldName, LogMessage, ModelLabel,
};
