use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use imei_clusters::{
    LookupError, LookupRecord, OfflineLookup, group_records, map_column, normalize_header,
    reconcile, reconcile_all,
};

const HEADER: &str = "IMEI,MODELO,STATUS,OBS\n";

fn rows() -> Vec<&'static str> {
    vec![
        "111,Alpha,ACTIVE,first",
        " 111 ,Alpha,,second",
        "222,,,",
        ",Orphan,,",
        "333,Gamma,IN USE,\"quoted, note\"",
        "222,Beta,,late",
        "  444  ,Delta,,",
    ]
}

fn csv_with(rows: &[&str], blank_every: usize) -> String {
    let mut csv = String::from(HEADER);
    for (idx, row) in rows.iter().enumerate() {
        if blank_every > 0 && idx % blank_every == 0 {
            csv.push_str(",,,\n\n");
        }
        csv.push_str(row);
        csv.push('\n');
    }
    csv
}

#[test]
fn group_count_never_exceeds_distinct_trimmed_ids() {
    let rows = rows();
    let grouped = group_records(csv_with(&rows, 0).as_bytes()).unwrap();
    let distinct: HashSet<&str> = rows
        .iter()
        .map(|row| row.split(',').next().unwrap_or("").trim())
        .filter(|id| !id.is_empty())
        .collect();
    assert!(grouped.unique_ids() <= distinct.len());
    let keys: Vec<&str> = grouped.groups.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["111", "222", "333", "444"]);
    assert_eq!(grouped.total_rows, 6);
}

#[test]
fn blank_rows_do_not_change_groups() {
    let rows = rows();
    let plain = group_records(csv_with(&rows, 0).as_bytes()).unwrap();
    for blank_every in 1..=3 {
        let padded = group_records(csv_with(&rows, blank_every).as_bytes()).unwrap();
        assert_eq!(plain.groups.len(), padded.groups.len());
        for ((id_a, rows_a), (id_b, rows_b)) in plain.groups.iter().zip(padded.groups.iter()) {
            assert_eq!(id_a, id_b);
            let fields_a: Vec<_> = rows_a.iter().map(|row| &row.fields).collect();
            let fields_b: Vec<_> = rows_b.iter().map(|row| &row.fields).collect();
            assert_eq!(fields_a, fields_b);
        }
    }
}

#[test]
fn column_mapping_is_total_and_stable() {
    let headers = [
        "IMEI",
        " imei ",
        "\u{feff}Imei",
        "Observação",
        "OBSERVACAO",
        "Tipo Ativo",
        "Numero Chamado",
        "chamado",
        "Localização",
        "local",
        "Empresa",
        "Fabricante",
        "Coluna Extra",
        "",
    ];
    let expected = [
        "id",
        "id",
        "id",
        "note",
        "note",
        "asset_type",
        "ticket_number",
        "ticket_number",
        "location",
        "location",
        "owner_org",
        "manufacturer",
        "coluna extra",
        "",
    ];
    for (header, want) in headers.iter().zip(expected) {
        assert_eq!(map_column(header), want, "header {header:?}");
        assert_eq!(map_column(header), map_column(&normalize_header(header)));
    }
}

#[test]
fn local_values_win_and_external_fills_gaps() {
    let grouped = group_records(csv_with(&rows(), 0).as_bytes()).unwrap();
    let lookup = |id: &str| {
        Ok::<_, LookupError>(LookupRecord::from_payload(
            id,
            json!({ "modelo": "Upstream", "status": "BLOCKED", "Fabrica": "ACME" }),
        ))
    };

    let alpha = reconcile("111", &grouped.groups["111"], &lookup).record;
    assert_eq!(alpha.model.as_deref(), Some("Alpha"));
    assert_eq!(alpha.status, "ACTIVE");
    assert_eq!(alpha.note.as_deref(), Some("first"));
    assert_eq!(alpha.manufacturer.as_deref(), Some("ACME"));

    let gap = reconcile("222", &grouped.groups["222"], &lookup).record;
    assert_eq!(gap.model.as_deref(), Some("Upstream"));
    assert_eq!(gap.status, "BLOCKED");

    let offline = reconcile("222", &grouped.groups["222"], &OfflineLookup).record;
    assert_eq!(offline.status, "UNKNOWN");
    assert_eq!(offline.model, None);
    assert_eq!(offline.note, None);
}

#[test]
fn every_group_is_looked_up_exactly_once() {
    let grouped = group_records(csv_with(&rows(), 0).as_bytes()).unwrap();
    let calls = AtomicUsize::new(0);
    let lookup = |id: &str| {
        calls.fetch_add(1, Ordering::SeqCst);
        if id == "333" {
            panic!("upstream exploded");
        }
        Err::<LookupRecord, _>(LookupError::NotFound { id: id.to_string() })
    };
    let batch = reconcile_all(&grouped.groups, &lookup, 8);
    assert_eq!(calls.load(Ordering::SeqCst), grouped.unique_ids());
    assert_eq!(batch.records.len(), grouped.unique_ids());
    assert_eq!(batch.summary.processing_failures.len(), 1);
    assert_eq!(batch.summary.processing_failures[0].id, "333");
    assert_eq!(batch.summary.lookup_failures.len(), 3);
    assert_eq!(batch.summary.duplicate_rows, 2);
}
