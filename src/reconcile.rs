//! Per-id merge of local rows with the external lookup record.
//!
//! Precedence: a non-empty local value wins, otherwise the external value is
//! used. A status supplied by the row always wins; a status that the grouper
//! only defaulted does not block the external one. Lookup failures, error
//! markers, and collaborator panics all degrade to a local-only record with
//! an audit annotation; nothing here returns an error.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::constants::audit::{
    AUDIT_DUPLICATE_ROWS, AUDIT_ERROR_LOOKUP, AUDIT_ERROR_PROCESSING, AUDIT_EXTERNAL,
    AUDIT_EXTERNAL_FIELDS, AUDIT_EXTERNAL_RESPONSE, AUDIT_LOCAL,
};
use crate::constants::fields::{DESCRIPTIVE_FIELDS, FIELD_STATUS, UNKNOWN_STATUS};
use crate::data::{CanonicalRecord, SourceRow};
use crate::lookup::{Lookup, LookupRecord};
use crate::types::{DeviceId, LogMessage};

/// How a record's external side was resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// Lookup succeeded and was merged.
    Merged,
    /// Lookup failed or answered with an error marker.
    LookupFailed(LogMessage),
    /// The collaborator faulted while being contacted.
    ProcessingFailed(LogMessage),
}

/// One reconciled id.
#[derive(Clone, Debug)]
pub struct Reconciled {
    /// Merged record.
    pub record: CanonicalRecord,
    /// How the lookup went.
    pub outcome: ReconcileOutcome,
    /// Rows after the first that shared the id.
    pub duplicate_rows: usize,
}

/// Merge `rows` (the group for `id`) with `lookup(id)`.
///
/// Only the first row supplies local values; later rows are counted.
pub fn reconcile(id: &str, rows: &[SourceRow], lookup: &dyn Lookup) -> Reconciled {
    let first = rows.first();
    let duplicate_rows = rows.len().saturating_sub(1);
    if duplicate_rows > 0 {
        debug!(id, duplicate_rows, "ignoring values from duplicate rows");
    }

    let attempt = panic::catch_unwind(AssertUnwindSafe(|| lookup.lookup(id)));
    let (external, outcome) = match attempt {
        Ok(Ok(found)) => match found.error.clone() {
            None => (Some(found), ReconcileOutcome::Merged),
            Some(marker) => {
                warn!(id, reason = %marker, "lookup returned an error marker");
                (Some(found), ReconcileOutcome::LookupFailed(marker))
            }
        },
        Ok(Err(err)) => {
            warn!(id, error = %err, "lookup failed; keeping local fields only");
            (None, ReconcileOutcome::LookupFailed(err.to_string()))
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            warn!(id, reason = %reason, "lookup faulted; keeping local fields only");
            (None, ReconcileOutcome::ProcessingFailed(reason))
        }
    };
    let merged = match (&outcome, external.as_ref()) {
        (ReconcileOutcome::Merged, Some(found)) => Some(found),
        _ => None,
    };

    let mut record = CanonicalRecord::new(id);
    for field in DESCRIPTIVE_FIELDS {
        let local = first.and_then(|row| row.value(field));
        let remote = merged.and_then(|found| found.field(field));
        if let Some(slot) = record.descriptive_slot_mut(field) {
            *slot = local.or(remote).map(str::to_string);
        }
    }
    record.status = first
        .and_then(SourceRow::supplied_status)
        .or_else(|| merged.and_then(|found| found.field(FIELD_STATUS)))
        .unwrap_or(UNKNOWN_STATUS)
        .to_string();
    record.raw_fields = audit_fields(first, external.as_ref(), duplicate_rows, &outcome);

    Reconciled {
        record,
        outcome,
        duplicate_rows,
    }
}

fn audit_fields(
    first: Option<&SourceRow>,
    external: Option<&LookupRecord>,
    duplicate_rows: usize,
    outcome: &ReconcileOutcome,
) -> IndexMap<String, Value> {
    let mut audit = IndexMap::new();
    let local: Map<String, Value> = first
        .map(|row| {
            row.fields
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect()
        })
        .unwrap_or_default();
    audit.insert(AUDIT_LOCAL.to_string(), Value::Object(local));
    audit.insert(
        AUDIT_EXTERNAL.to_string(),
        external
            .map(|found| found.payload.clone())
            .unwrap_or(Value::Null),
    );
    if let Some(found) = external {
        let extracted: Map<String, Value> = found
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        audit.insert(AUDIT_EXTERNAL_FIELDS.to_string(), Value::Object(extracted));
        if let Some(response) = &found.response {
            audit.insert(AUDIT_EXTERNAL_RESPONSE.to_string(), response.clone());
        }
    }
    if duplicate_rows > 0 {
        audit.insert(
            AUDIT_DUPLICATE_ROWS.to_string(),
            Value::from(duplicate_rows as u64),
        );
    }
    match outcome {
        ReconcileOutcome::Merged => {}
        ReconcileOutcome::LookupFailed(reason) => {
            audit.insert(AUDIT_ERROR_LOOKUP.to_string(), Value::String(reason.clone()));
        }
        ReconcileOutcome::ProcessingFailed(reason) => {
            audit.insert(
                AUDIT_ERROR_PROCESSING.to_string(),
                Value::String(reason.clone()),
            );
        }
    }
    audit
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> LogMessage {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "lookup collaborator panicked".to_string()
}

/// A reconciliation problem for one id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileIssue {
    /// Affected id.
    pub id: DeviceId,
    /// Error text.
    pub reason: LogMessage,
}

/// Totals for one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    /// Records produced (one per id).
    pub reconciled: usize,
    /// Records merged with a successful lookup.
    pub merged: usize,
    /// Ids whose lookup failed; their records kept local values.
    pub lookup_failures: Vec<ReconcileIssue>,
    /// Ids whose merge panicked; their records were degraded.
    pub processing_failures: Vec<ReconcileIssue>,
    /// Rows ignored because an earlier row had the same id.
    pub duplicate_rows: usize,
}

/// Records of one pass, sorted by id, with their summary.
#[derive(Clone, Debug, Default)]
pub struct ReconcileBatch {
    /// One record per id, sorted by id.
    pub records: Vec<CanonicalRecord>,
    /// Totals for the pass.
    pub summary: ReconcileSummary,
}

/// Reconcile every group on a bounded pool of scoped worker threads.
///
/// Output is sorted by id, so it does not depend on worker count or timing.
pub fn reconcile_all(
    groups: &IndexMap<DeviceId, Vec<SourceRow>>,
    lookup: &dyn Lookup,
    workers: usize,
) -> ReconcileBatch {
    let entries: Vec<(&DeviceId, &Vec<SourceRow>)> = groups.iter().collect();
    let workers = workers.max(1).min(entries.len().max(1));
    info!(ids = entries.len(), workers, "reconciling groups");

    let next = AtomicUsize::new(0);
    let mut results: Vec<Reconciled> = Vec::with_capacity(entries.len());
    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    loop {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some((id, rows)) = entries.get(idx) else {
                            break;
                        };
                        local.push(reconcile(id, rows, lookup));
                    }
                    local
                })
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(batch) => results.extend(batch),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
    });
    results.sort_by(|a, b| a.record.id.cmp(&b.record.id));

    let mut summary = ReconcileSummary::default();
    let mut records = Vec::with_capacity(results.len());
    for item in results {
        summary.reconciled += 1;
        summary.duplicate_rows += item.duplicate_rows;
        match item.outcome {
            ReconcileOutcome::Merged => summary.merged += 1,
            ReconcileOutcome::LookupFailed(reason) => summary.lookup_failures.push(ReconcileIssue {
                id: item.record.id.clone(),
                reason,
            }),
            ReconcileOutcome::ProcessingFailed(reason) => {
                summary.processing_failures.push(ReconcileIssue {
                    id: item.record.id.clone(),
                    reason,
                })
            }
        }
        records.push(item.record);
    }
    info!(
        reconciled = summary.reconciled,
        merged = summary.merged,
        lookup_failures = summary.lookup_failures.len(),
        processing_failures = summary.processing_failures.len(),
        duplicate_rows = summary.duplicate_rows,
        "reconciliation complete"
    );
    ReconcileBatch { records, summary }
}
