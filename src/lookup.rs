//! External lookup collaborator contract and payload field resolution.
//!
//! The upstream inventory service is modeled only by [`Lookup`]. Its payloads
//! use several spellings for the same concept, so extraction walks an ordered
//! list of `(source name, extractor)` pairs per canonical field and takes the
//! first non-empty hit, falling back to a nested raw object when the top
//! level has none.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::fields::{
    FIELD_ASSET_TYPE, FIELD_LOCATION, FIELD_MANUFACTURER, FIELD_MODEL, FIELD_OWNER_ORG,
    FIELD_SECONDARY_ID, FIELD_SERIAL, FIELD_STARTED_AT, FIELD_STATUS, FIELD_TICKET_NUMBER,
};
use crate::constants::lookup::{NESTED_PAYLOAD_KEYS, NO_DATA_MESSAGE, RESPONSE_DATA_KEY};
use crate::errors::{IngestError, LookupError};
use crate::types::{DeviceId, FieldName, LogMessage};

/// Blocking lookup of one device id against the external inventory.
///
/// Timeouts and retries belong to the implementation; callers only degrade
/// on failure.
pub trait Lookup: Send + Sync {
    /// Fetch the upstream record for `id`.
    fn lookup(&self, id: &str) -> Result<LookupRecord, LookupError>;
}

impl<F> Lookup for F
where
    F: Fn(&str) -> Result<LookupRecord, LookupError> + Send + Sync,
{
    fn lookup(&self, id: &str) -> Result<LookupRecord, LookupError> {
        self(id)
    }
}

/// Externally fetched record for one id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupRecord {
    /// Id the lookup was asked for.
    pub id: DeviceId,
    /// Best-effort extracted fields, canonical name to text.
    pub fields: IndexMap<FieldName, String>,
    /// Upstream item, verbatim.
    pub payload: Value,
    /// Full upstream response envelope, when the collaborator supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Explicit error marker returned in place of data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LogMessage>,
}

impl LookupRecord {
    /// Build a record from an upstream item, extracting known fields.
    pub fn from_payload(id: impl Into<DeviceId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            fields: extract_fields(&payload),
            payload,
            response: None,
            error: None,
        }
    }

    /// Build a record from a `{ "data": [item, ...] }` envelope.
    ///
    /// The first item is used; an empty or missing list becomes an explicit
    /// "no data" error marker.
    pub fn from_response(id: impl Into<DeviceId>, response: Value) -> Self {
        let id = id.into();
        let first = response
            .get(RESPONSE_DATA_KEY)
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned();
        let mut record = match first {
            Some(item) => Self::from_payload(id, item),
            None => Self::failed(id, NO_DATA_MESSAGE),
        };
        record.response = Some(response);
        record
    }

    /// Record carrying only an error marker.
    pub fn failed(id: impl Into<DeviceId>, message: impl Into<LogMessage>) -> Self {
        Self {
            id: id.into(),
            fields: IndexMap::new(),
            payload: Value::Null,
            response: None,
            error: Some(message.into()),
        }
    }

    /// Extracted value for a canonical field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns `true` when the collaborator answered with an error marker.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

type Extractor = fn(&Value) -> Option<String>;

const MODEL_SOURCES: &[(&str, Extractor)] = &[
    ("Modelo", text),
    ("modelo", text),
    ("Model", text),
    ("model", text),
];
const STATUS_SOURCES: &[(&str, Extractor)] =
    &[("Status", text), ("status", text), ("STATUS", text)];
const MANUFACTURER_SOURCES: &[(&str, Extractor)] =
    &[("Fabrica", text), ("fabrica", text), ("marca", text)];
const ASSET_TYPE_SOURCES: &[(&str, Extractor)] = &[("TipoAtivo", text), ("tipoativo", text)];
const OWNER_ORG_SOURCES: &[(&str, Extractor)] = &[("Empresa", text), ("empresa", text)];
const TICKET_SOURCES: &[(&str, Extractor)] =
    &[("NumeroChamado", text), ("numero_chamado", text)];
const LOCATION_SOURCES: &[(&str, Extractor)] = &[
    ("Organograma", text),
    ("organograma", text),
    ("vinculadoha", text),
];
const SECONDARY_ID_SOURCES: &[(&str, Extractor)] = &[
    ("IMEI2", text),
    ("Imei2", text),
    ("imei2", text),
    ("Imei 2", text),
    ("IMEI 2", text),
];
const SERIAL_SOURCES: &[(&str, Extractor)] = &[
    ("Serial", text),
    ("NumeroSerie", text),
    ("NumeroSerial", text),
    ("numero_serie", text),
    ("serial", text),
    ("NroSerie", text),
    ("NroSerial", text),
];
const STARTED_AT_SOURCES: &[(&str, Extractor)] = &[("DataInicio", date), ("data_inicio", date)];

/// Canonical field to its ordered upstream sources.
const FIELD_RULES: &[(&str, &[(&str, Extractor)])] = &[
    (FIELD_MODEL, MODEL_SOURCES),
    (FIELD_STATUS, STATUS_SOURCES),
    (FIELD_MANUFACTURER, MANUFACTURER_SOURCES),
    (FIELD_ASSET_TYPE, ASSET_TYPE_SOURCES),
    (FIELD_OWNER_ORG, OWNER_ORG_SOURCES),
    (FIELD_TICKET_NUMBER, TICKET_SOURCES),
    (FIELD_LOCATION, LOCATION_SOURCES),
    (FIELD_SECONDARY_ID, SECONDARY_ID_SOURCES),
    (FIELD_SERIAL, SERIAL_SOURCES),
    (FIELD_STARTED_AT, STARTED_AT_SOURCES),
];

/// Resolve every known field from an upstream payload.
pub fn extract_fields(payload: &Value) -> IndexMap<FieldName, String> {
    let mut fields = IndexMap::new();
    let Some(top) = payload.as_object() else {
        return fields;
    };
    let nested: Vec<&Map<String, Value>> = NESTED_PAYLOAD_KEYS
        .iter()
        .filter_map(|key| top.get(*key).and_then(Value::as_object))
        .collect();
    for (field, sources) in FIELD_RULES {
        let found = first_match(top, sources)
            .or_else(|| nested.iter().find_map(|object| first_match(object, sources)));
        if let Some(value) = found {
            fields.insert((*field).to_string(), value);
        }
    }
    fields
}

fn first_match(object: &Map<String, Value>, sources: &[(&str, Extractor)]) -> Option<String> {
    sources
        .iter()
        .find_map(|(name, extract)| object.get(*name).and_then(extract))
}

/// Strings (trimmed), numbers, and booleans as text; blanks are absent.
fn text(value: &Value) -> Option<String> {
    let rendered = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!rendered.is_empty()).then_some(rendered)
}

/// Date-like text reduced to `YYYY-MM-DD` when it parses; kept as-is otherwise.
fn date(value: &Value) -> Option<String> {
    let raw = text(value)?;
    let day = raw.split(['T', ' ']).next().unwrap_or(&raw);
    let parsed = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(day, "%d/%m/%Y"));
    Some(match parsed {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => raw,
    })
}

/// Lookup used when no upstream service is configured; every call fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineLookup;

impl Lookup for OfflineLookup {
    fn lookup(&self, _id: &str) -> Result<LookupRecord, LookupError> {
        Err(LookupError::Unavailable(
            "lookup service not configured".into(),
        ))
    }
}

/// Lookup answered from a JSON document mapping id to upstream response.
///
/// Each value may be a `{ "data": [...] }` envelope, an `{ "error": "..." }`
/// marker, or a bare upstream item.
#[derive(Clone, Debug, Default)]
pub struct FixtureLookup {
    entries: IndexMap<DeviceId, Value>,
}

impl FixtureLookup {
    /// Load fixtures from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw).map_err(|err| {
            IngestError::Configuration(format!(
                "invalid lookup fixture '{}': {err}",
                path.display()
            ))
        })?;
        Self::from_value(value)
    }

    /// Build fixtures from a parsed JSON object.
    pub fn from_value(value: Value) -> Result<Self, IngestError> {
        let Value::Object(object) = value else {
            return Err(IngestError::Configuration(
                "lookup fixture must be a JSON object keyed by id".into(),
            ));
        };
        let entries = object
            .into_iter()
            .map(|(id, value)| (id.trim().to_string(), value))
            .collect();
        Ok(Self { entries })
    }

    /// Add or replace one fixture entry.
    pub fn with_entry(mut self, id: impl Into<DeviceId>, value: Value) -> Self {
        self.entries.insert(id.into(), value);
        self
    }

    /// Number of ids with fixtures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no fixtures are loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Lookup for FixtureLookup {
    fn lookup(&self, id: &str) -> Result<LookupRecord, LookupError> {
        let Some(value) = self.entries.get(id) else {
            debug!(id, "no fixture for id");
            return Err(LookupError::NotFound { id: id.to_string() });
        };
        if value.get(RESPONSE_DATA_KEY).is_some() {
            return Ok(LookupRecord::from_response(id, value.clone()));
        }
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Ok(LookupRecord::failed(id, message));
        }
        Ok(LookupRecord::from_payload(id, value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn first_variant_with_a_value_wins() {
        let fields = extract_fields(&json!({
            "modelo": "lower",
            "Modelo": "  Upper  ",
            "Status": "",
            "status": "ATIVO",
            "marca": "Acme",
        }));
        assert_eq!(fields.get("model").map(String::as_str), Some("Upper"));
        assert_eq!(fields.get("status").map(String::as_str), Some("ATIVO"));
        assert_eq!(fields.get("manufacturer").map(String::as_str), Some("Acme"));
        assert!(!fields.contains_key("serial"));
    }

    #[test]
    fn numbers_and_booleans_render_as_text() {
        let fields = extract_fields(&json!({
            "NumeroChamado": 4512,
            "IMEI2": 35693803564380_u64,
            "Serial": true,
        }));
        assert_eq!(fields.get("ticket_number").map(String::as_str), Some("4512"));
        assert_eq!(
            fields.get("secondary_id").map(String::as_str),
            Some("35693803564380")
        );
        assert_eq!(fields.get("serial").map(String::as_str), Some("true"));
    }

    #[test]
    fn nested_raw_payload_is_searched_when_top_level_lacks_a_field() {
        let fields = extract_fields(&json!({
            "Modelo": "Top",
            "dados_brutos": { "Modelo": "Nested", "STATUS": "EM USO" },
        }));
        assert_eq!(fields.get("model").map(String::as_str), Some("Top"));
        assert_eq!(fields.get("status").map(String::as_str), Some("EM USO"));
    }

    #[test]
    fn start_dates_drop_the_time_part() {
        let fields = extract_fields(&json!({ "DataInicio": "2023-04-05T10:11:12" }));
        assert_eq!(fields.get("started_at").map(String::as_str), Some("2023-04-05"));
        let fields = extract_fields(&json!({ "data_inicio": "05/04/2023" }));
        assert_eq!(fields.get("started_at").map(String::as_str), Some("2023-04-05"));
        let fields = extract_fields(&json!({ "data_inicio": "soon" }));
        assert_eq!(fields.get("started_at").map(String::as_str), Some("soon"));
    }

    #[test]
    fn response_envelope_uses_first_item_and_marks_empty_lists() {
        let record = LookupRecord::from_response(
            "1",
            json!({ "data": [{ "Modelo": "A" }, { "Modelo": "B" }], "totalCount": 2 }),
        );
        assert_eq!(record.field("model"), Some("A"));
        assert!(record.response.is_some());
        assert!(!record.is_error());

        let record = LookupRecord::from_response("1", json!({ "data": [] }));
        assert_eq!(record.error.as_deref(), Some(NO_DATA_MESSAGE));
        assert!(record.response.is_some());
    }

    #[test]
    fn closures_implement_lookup() {
        let lookup = |id: &str| {
            Ok::<_, LookupError>(LookupRecord::from_payload(id, json!({ "modelo": "X" })))
        };
        let record = lookup.lookup("9").unwrap();
        assert_eq!(record.id, "9");
        assert_eq!(record.field("model"), Some("X"));
        assert!(OfflineLookup.lookup("9").is_err());
    }

    #[test]
    fn fixture_lookup_loads_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixtures.json");
        fs::write(
            &path,
            r#"{
                "1": { "data": [{ "Modelo": "Alpha", "Status": "ATIVO" }] },
                "2": { "error": "HTTP 500" },
                "3": { "modelo": "Bare" }
            }"#,
        )
        .unwrap();
        let lookup = FixtureLookup::from_json_file(&path).unwrap();
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup.lookup("1").unwrap().field("status"), Some("ATIVO"));
        assert!(lookup.lookup("2").unwrap().is_error());
        assert_eq!(lookup.lookup("3").unwrap().field("model"), Some("Bare"));
        assert_eq!(
            lookup.lookup("4").unwrap_err(),
            LookupError::NotFound { id: "4".into() }
        );
    }

    #[test]
    fn fixture_root_must_be_an_object() {
        assert!(matches!(
            FixtureLookup::from_value(json!([1, 2])),
            Err(IngestError::Configuration(_))
        ));
    }
}
