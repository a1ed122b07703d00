//! Byte-budgeted cluster summary payloads.
//!
//! A summary is rendered by each [`DetailTier`] in turn until one fits the
//! budget. The default ladder is full detail (per-model counts plus sample
//! ids), then counts only with a truncation notice. Encoding never fails:
//! a tier error yields a minimal fallback payload instead.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::constants::encoder::{
    DEFAULT_BYTE_BUDGET, FALLBACK_MESSAGE_MAX_CHARS, NAME_MAX_CHARS, SAMPLE_IDS_PER_MODEL,
    TRUNCATION_NOTICE,
};
use crate::data::{Cluster, RecordProjection};
use crate::errors::EncodeError;
use crate::metrics::{ModelBucket, tally_models};
use crate::types::{ClusterId, DeviceId, ModelLabel};
use crate::utils::truncate_chars;

/// Input of the payload encoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Summarized cluster.
    pub id: ClusterId,
    /// Cluster name, at most 50 characters.
    pub name: String,
    /// Cluster creation time.
    pub created_at: DateTime<Utc>,
    /// Number of records summarized.
    pub total: u64,
    /// Per-model buckets in first-seen order.
    pub models: IndexMap<ModelLabel, ModelBucket>,
}

impl ClusterSummary {
    /// Summarize `rows` of `cluster`, keeping up to five sample ids per model.
    pub fn new(cluster: &Cluster, rows: &[RecordProjection]) -> Self {
        Self::with_sample_limit(cluster, rows, SAMPLE_IDS_PER_MODEL)
    }

    /// Summarize with a custom per-model sample limit.
    pub fn with_sample_limit(
        cluster: &Cluster,
        rows: &[RecordProjection],
        sample_limit: usize,
    ) -> Self {
        Self {
            id: cluster.id.clone(),
            name: truncate_chars(&cluster.name, NAME_MAX_CHARS).to_string(),
            created_at: cluster.created_at,
            total: rows.len() as u64,
            models: tally_models(rows, sample_limit),
        }
    }
}

/// Error-correction level recommended for the rendered symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCorrection {
    /// Highest recovery level, used for regular payloads.
    High,
    /// Lowest level, used for the error fallback.
    Low,
}

/// Bytes produced by the encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPayload {
    /// UTF-8 JSON payload.
    pub bytes: Vec<u8>,
    /// Name of the tier that produced the bytes (`fallback` for the error payload).
    pub tier: String,
    /// Recommended error-correction level.
    pub error_correction: ErrorCorrection,
    /// `false` when even the last tier exceeded the budget.
    pub within_budget: bool,
}

impl EncodedPayload {
    /// Payload as text (always UTF-8 JSON).
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or_default()
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` when no bytes were produced.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One step of the degrade-on-overflow ladder.
pub trait DetailTier: Send + Sync {
    /// Stable tier name reported in [`EncodedPayload::tier`].
    fn name(&self) -> &str;
    /// Serialize `summary` at this tier's level of detail.
    fn render(&self, summary: &ClusterSummary) -> Result<Vec<u8>, EncodeError>;
}

#[derive(Serialize)]
struct BucketBody<'a> {
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_ids: Option<&'a [DeviceId]>,
}

#[derive(Serialize)]
struct PayloadBody<'a> {
    id: &'a str,
    name: &'a str,
    total: u64,
    created_at: String,
    models: IndexMap<&'a str, BucketBody<'a>>,
    total_models: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<&'a str>,
}

fn render_body(
    summary: &ClusterSummary,
    with_samples: bool,
    notice: Option<&str>,
) -> Result<Vec<u8>, EncodeError> {
    let models = summary
        .models
        .iter()
        .map(|(model, bucket)| {
            let body = BucketBody {
                count: bucket.count,
                sample_ids: with_samples.then_some(bucket.sample_ids.as_slice()),
            };
            (model.as_str(), body)
        })
        .collect();
    let body = PayloadBody {
        id: &summary.id,
        name: &summary.name,
        total: summary.total,
        created_at: summary.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        models,
        total_models: summary.models.len(),
        notice,
    };
    Ok(serde_json::to_vec(&body)?)
}

/// Per-model counts with sample ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct FullDetail;

impl DetailTier for FullDetail {
    fn name(&self) -> &str {
        "full_detail"
    }

    fn render(&self, summary: &ClusterSummary) -> Result<Vec<u8>, EncodeError> {
        render_body(summary, true, None)
    }
}

/// Per-model counts only, with a truncation notice.
#[derive(Clone, Copy, Debug, Default)]
pub struct CountsOnly;

impl DetailTier for CountsOnly {
    fn name(&self) -> &str {
        "counts_only"
    }

    fn render(&self, summary: &ClusterSummary) -> Result<Vec<u8>, EncodeError> {
        render_body(summary, false, Some(TRUNCATION_NOTICE))
    }
}

/// Encoder walking a ladder of detail tiers against a byte budget.
pub struct BudgetedEncoder {
    budget: usize,
    tiers: Vec<Box<dyn DetailTier>>,
}

impl Default for BudgetedEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_BYTE_BUDGET)
    }
}

impl BudgetedEncoder {
    /// Encoder with the default `[FullDetail, CountsOnly]` ladder.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            tiers: vec![Box::new(FullDetail), Box::new(CountsOnly)],
        }
    }

    /// Append a tier tried after the existing ones.
    pub fn with_tier<T: DetailTier + 'static>(mut self, tier: T) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    /// Byte budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Encode `summary`, degrading detail until the output fits.
    ///
    /// When no tier fits, the last tier's output is returned marked as over
    /// budget. A tier error returns the fallback payload.
    pub fn encode(&self, summary: &ClusterSummary) -> EncodedPayload {
        let mut last: Option<(&str, Vec<u8>)> = None;
        for tier in &self.tiers {
            let bytes = match tier.render(summary) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        cluster_id = %summary.id,
                        tier = tier.name(),
                        error = %err,
                        "payload tier failed"
                    );
                    return self.fallback(&err.to_string());
                }
            };
            if bytes.len() <= self.budget {
                debug!(
                    cluster_id = %summary.id,
                    tier = tier.name(),
                    bytes = bytes.len(),
                    budget = self.budget,
                    "payload fits budget"
                );
                return EncodedPayload {
                    bytes,
                    tier: tier.name().to_string(),
                    error_correction: ErrorCorrection::High,
                    within_budget: true,
                };
            }
            debug!(
                cluster_id = %summary.id,
                tier = tier.name(),
                bytes = bytes.len(),
                budget = self.budget,
                "payload over budget; degrading detail"
            );
            last = Some((tier.name(), bytes));
        }
        match last {
            Some((tier, bytes)) => {
                warn!(
                    cluster_id = %summary.id,
                    bytes = bytes.len(),
                    budget = self.budget,
                    "payload exceeds budget at every tier"
                );
                EncodedPayload {
                    bytes,
                    tier: tier.to_string(),
                    error_correction: ErrorCorrection::High,
                    within_budget: false,
                }
            }
            None => self.fallback("no detail tiers configured"),
        }
    }

    fn fallback(&self, message: &str) -> EncodedPayload {
        let body = json!({
            "error": truncate_chars(message, FALLBACK_MESSAGE_MAX_CHARS),
            "budget": self.budget,
        });
        let bytes = body.to_string().into_bytes();
        EncodedPayload {
            within_budget: bytes.len() <= self.budget,
            bytes,
            tier: "fallback".to_string(),
            error_correction: ErrorCorrection::Low,
        }
    }
}

/// Encode `summary` with the default tier ladder.
pub fn encode(summary: &ClusterSummary, byte_budget: usize) -> EncodedPayload {
    BudgetedEncoder::new(byte_budget).encode(summary)
}
