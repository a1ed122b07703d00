use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;

use imei_clusters::{CanonicalRecord, ClusterStore, CollectionHandle, InsertError, IngestError};

fn record(id: &str, model: &str) -> CanonicalRecord {
    let mut record = CanonicalRecord::new(id);
    record.model = Some(model.to_string());
    record
        .raw_fields
        .insert("local".into(), json!({ "id": id, "model": model }));
    record
}

#[test]
fn clusters_and_rows_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("clusters.bin");
    let cluster_id = {
        let store = ClusterStore::open(&path).unwrap();
        let cluster = store.create_cluster("Persisted", Some("kept")).unwrap();
        let handle = CollectionHandle::for_cluster(&cluster.id);
        let report = store
            .insert_all(&handle, &[record("10", "Alpha"), record("11", "Beta")])
            .unwrap();
        assert_eq!(report.inserted, 2);
        store.recount_records(&cluster.id).unwrap();
        cluster.id
    };

    let reopened = ClusterStore::open(&path).unwrap();
    let clusters = reopened.list_clusters().unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].id, cluster_id);
    assert_eq!(clusters[0].record_count, 2);
    assert_eq!(clusters[0].description.as_deref(), Some("kept"));

    let details = reopened.cluster_details(&cluster_id, true).unwrap().unwrap();
    assert_eq!(details.rows.len(), 2);
    assert_eq!(details.rows["11"].text("model"), Some("Beta"));
    assert_eq!(details.rows["10"].values["raw_fields"]["local"]["model"], "Alpha");

    // Uniqueness is enforced against rows written before the reopen.
    let handle = CollectionHandle::for_cluster(&cluster_id);
    let report = reopened.insert_all(&handle, &[record("10", "Gamma")]).unwrap();
    assert_eq!(report.inserted, 0);
    assert!(matches!(
        &report.failures[0],
        InsertError::DuplicateKey { id, .. } if id == "10"
    ));
    let details = reopened.cluster_details(&cluster_id, false).unwrap().unwrap();
    assert_eq!(details.rows["10"].text("model"), Some("Alpha"));
}

#[test]
fn queries_return_newest_rows_first() {
    let dir = tempdir().unwrap();
    let store = ClusterStore::open(dir.path()).unwrap();
    let cluster = store.create_cluster("Ordered", None).unwrap();
    let handle = CollectionHandle::for_cluster(&cluster.id);
    for id in ["b", "c", "a"] {
        store.insert_all(&handle, &[record(id, "M")]).unwrap();
        thread::sleep(Duration::from_millis(2));
    }

    let result = store.query_fields(&handle, &["id"], false).unwrap();
    assert_eq!(result.total, 3);
    let ids: Vec<&str> = result.rows.iter().filter_map(|row| row.id()).collect();
    assert_eq!(ids, vec!["a", "c", "b"]);
}

#[test]
fn concurrent_population_of_distinct_clusters_is_isolated() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ClusterStore::open(dir.path().join("s.bin")).unwrap());
    let clusters: Vec<_> = (0..4)
        .map(|idx| store.create_cluster(&format!("C{idx}"), None).unwrap())
        .collect();

    thread::scope(|scope| {
        for cluster in &clusters {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                let handle = CollectionHandle::for_cluster(&cluster.id);
                let records: Vec<CanonicalRecord> = (0..25)
                    .map(|idx| record(&format!("{idx:03}"), &cluster.name))
                    .collect();
                let report = store.insert_all(&handle, &records).unwrap();
                assert_eq!(report.inserted, 25);
            });
        }
    });

    for cluster in &clusters {
        let updated = store.recount_records(&cluster.id).unwrap();
        assert_eq!(updated.record_count, 25);
        let details = store.cluster_details(&cluster.id, false).unwrap().unwrap();
        assert!(
            details
                .rows
                .values()
                .all(|row| row.text("model") == Some(cluster.name.as_str()))
        );
    }
}

#[test]
fn unknown_clusters_are_absent_not_errors() {
    let dir = tempdir().unwrap();
    let store = ClusterStore::open(dir.path()).unwrap();
    assert!(store.get_cluster("nope").unwrap().is_none());
    assert!(store.cluster_details("nope", true).unwrap().is_none());
    assert!(matches!(
        store.recount_records("nope"),
        Err(IngestError::Store(_))
    ));
}
