//! Per-model aggregates over projected cluster rows.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constants::encoder::UNKNOWN_MODEL;
use crate::constants::fields::FIELD_MODEL;
use crate::data::RecordProjection;
use crate::types::{DeviceId, ModelLabel};

/// Per-model count with a bounded list of example ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBucket {
    /// Rows carrying this model.
    pub count: u64,
    /// First `sample_limit` ids seen for the model, in row order.
    pub sample_ids: Vec<DeviceId>,
}

/// Group projected rows by model.
///
/// Buckets keep first-seen order. Rows without a model count under `Unknown`;
/// rows without an id are counted but contribute no sample.
pub fn tally_models(
    rows: &[RecordProjection],
    sample_limit: usize,
) -> IndexMap<ModelLabel, ModelBucket> {
    let mut buckets: IndexMap<ModelLabel, ModelBucket> = IndexMap::new();
    for row in rows {
        let label = row.text(FIELD_MODEL).unwrap_or(UNKNOWN_MODEL);
        let bucket = buckets.entry(label.to_string()).or_default();
        bucket.count += 1;
        if bucket.sample_ids.len() < sample_limit
            && let Some(id) = row.id()
        {
            bucket.sample_ids.push(id.to_string());
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn projection(id: &str, model: Value) -> RecordProjection {
        let mut values = IndexMap::new();
        values.insert("id".to_string(), json!(id));
        values.insert("model".to_string(), model);
        RecordProjection { values }
    }

    #[test]
    fn tally_keeps_first_seen_order_and_limits_samples() {
        let rows = vec![
            projection("1", json!("B")),
            projection("2", json!("A")),
            projection("3", json!("B")),
            projection("4", json!("B")),
        ];
        let buckets = tally_models(&rows, 2);
        let models: Vec<&str> = buckets.keys().map(String::as_str).collect();
        assert_eq!(models, vec!["B", "A"]);
        assert_eq!(buckets["B"].count, 3);
        assert_eq!(buckets["B"].sample_ids, vec!["1", "3"]);
        assert_eq!(buckets["A"].sample_ids, vec!["2"]);
    }

    #[test]
    fn rows_without_model_count_as_unknown() {
        let rows = vec![
            projection("1", Value::Null),
            projection("2", json!("  ")),
            projection("3", json!("X")),
        ];
        let buckets = tally_models(&rows, 5);
        assert_eq!(buckets["Unknown"].count, 2);
        assert_eq!(buckets["X"].count, 1);
    }
}
