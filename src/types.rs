use indexmap::IndexMap;

/// Device identifier used as the grouping key (a trimmed IMEI).
/// Example: `356938035643809`
pub type DeviceId = String;
/// Generated cluster identifier (hyphenated UUID v4).
/// Example: `0b6f3c52-9a43-4d0e-8f55-2f0f4c1e7a10`
pub type ClusterId = String;
/// Canonical field name produced by the column mapper.
/// Examples: `id`, `model`, `ticket_number`, `serial number`
pub type FieldName = String;
/// Physical collection name derived from a cluster id.
/// Example: `cluster_0b6f3c52_9a43_4d0e_8f55_2f0f4c1e7a10`
pub type CollectionName = String;
/// Human-readable model label used to bucket payload counts.
/// Examples: `Galaxy A14`, `Unknown`
pub type ModelLabel = String;
/// Warning/issue message text.
/// Examples: `lookup service not configured`, `surplus column 4 is not blank`
pub type LogMessage = String;
/// Ordered column map of one parsed row (mapped column name -> trimmed value).
pub type FieldMap = IndexMap<FieldName, String>;
/// Ordered audit map stored alongside a reconciled record.
pub type AuditMap = IndexMap<String, serde_json::Value>;
