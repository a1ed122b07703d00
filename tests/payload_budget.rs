use serde_json::Value;
use tempfile::tempdir;

use imei_clusters::{
    BudgetedEncoder, ClusterStore, ClusterSummary, CountsOnly, DetailTier, EncodeError,
    ErrorCorrection, IngestRequest, IngestionPipeline, InputFile, OfflineLookup, PipelineConfig,
    cluster_payload, encode,
};

const BUDGET: usize = 2953;

fn inventory_csv(models: usize, per_model: usize) -> Vec<u8> {
    let mut csv = String::from("IMEI,MODELO,STATUS\n");
    for model in 0..models {
        for idx in 0..per_model {
            csv.push_str(&format!("3569380356{model:02}{idx:03},Handset {model:02},ACTIVE\n"));
        }
    }
    csv.into_bytes()
}

#[test]
fn large_clusters_drop_sample_ids_but_keep_every_count() {
    let dir = tempdir().unwrap();
    let store = ClusterStore::open(dir.path()).unwrap();
    let pipeline =
        IngestionPipeline::new(PipelineConfig::default(), &OfflineLookup, &store).unwrap();
    let report = pipeline
        .ingest(
            &InputFile::from_bytes("frota.csv", inventory_csv(50, 10)).unwrap(),
            &IngestRequest::with_cluster(Some("Frota"), None),
        )
        .unwrap();
    assert_eq!(report.unique_ids, 500);
    let cluster = report.cluster.unwrap();

    let payload = pipeline.payload(&cluster.id).unwrap().unwrap();
    assert!(payload.len() <= BUDGET);
    assert!(payload.within_budget);
    assert_eq!(payload.tier, "counts_only");
    assert_eq!(payload.error_correction, ErrorCorrection::High);

    let value: Value = serde_json::from_slice(&payload.bytes).unwrap();
    assert_eq!(value["total"], 500);
    assert_eq!(value["total_models"], 50);
    assert!(value["notice"].is_string());
    let models = value["models"].as_object().unwrap();
    assert_eq!(models.len(), 50);
    for bucket in models.values() {
        assert_eq!(bucket["count"], 10);
        assert!(bucket.get("sample_ids").is_none());
    }
}

#[test]
fn small_clusters_keep_up_to_five_sample_ids_per_model() {
    let dir = tempdir().unwrap();
    let store = ClusterStore::open(dir.path()).unwrap();
    let pipeline =
        IngestionPipeline::new(PipelineConfig::default(), &OfflineLookup, &store).unwrap();
    let mut csv = inventory_csv(2, 7);
    csv.extend_from_slice(b"999000111222333,,\n");
    let report = pipeline
        .ingest(
            &InputFile::from_bytes("frota.csv", csv).unwrap(),
            &IngestRequest::with_cluster(Some("Pequena"), None),
        )
        .unwrap();
    let cluster = report.cluster.unwrap();

    let payload = cluster_payload(&store, &cluster.id, pipeline.config())
        .unwrap()
        .unwrap();
    assert_eq!(payload.tier, "full_detail");
    let value: Value = serde_json::from_slice(&payload.bytes).unwrap();
    assert_eq!(value["name"], "Pequena");
    assert_eq!(value["total"], 15);
    assert_eq!(value["models"]["Handset 00"]["count"], 7);
    assert_eq!(
        value["models"]["Handset 00"]["sample_ids"]
            .as_array()
            .unwrap()
            .len(),
        5
    );
    assert_eq!(value["models"]["Unknown"]["count"], 1);
    assert_eq!(
        value["models"]["Unknown"]["sample_ids"][0],
        "999000111222333"
    );
}

#[test]
fn custom_tiers_extend_the_ladder() {
    struct IdOnly;

    impl DetailTier for IdOnly {
        fn name(&self) -> &str {
            "id_only"
        }

        fn render(&self, summary: &ClusterSummary) -> Result<Vec<u8>, EncodeError> {
            Ok(serde_json::to_vec(&serde_json::json!({ "id": summary.id }))?)
        }
    }

    let dir = tempdir().unwrap();
    let store = ClusterStore::open(dir.path()).unwrap();
    let pipeline =
        IngestionPipeline::new(PipelineConfig::default(), &OfflineLookup, &store).unwrap();
    let report = pipeline
        .ingest(
            &InputFile::from_bytes("frota.csv", inventory_csv(50, 2)).unwrap(),
            &IngestRequest::with_cluster(Some("Tiers"), None),
        )
        .unwrap();
    let cluster = report.cluster.unwrap();
    let details = store.cluster_details(&cluster.id, false).unwrap().unwrap();
    let rows: Vec<_> = details.rows.into_values().collect();
    let summary = ClusterSummary::new(&details.cluster, &rows);

    let counts_only = CountsOnly.render(&summary).unwrap();
    let budget = counts_only.len() - 1;
    assert!(!encode(&summary, budget).within_budget);

    let payload = BudgetedEncoder::new(budget)
        .with_tier(IdOnly)
        .encode(&summary);
    assert!(payload.within_budget);
    assert_eq!(payload.tier, "id_only");
    let value: Value = serde_json::from_slice(&payload.bytes).unwrap();
    assert_eq!(value["id"], cluster.id.as_str());
}
