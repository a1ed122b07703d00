use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::fields::{
    FIELD_ASSET_TYPE, FIELD_ID, FIELD_LOCATION, FIELD_MANUFACTURER, FIELD_MODEL, FIELD_NOTE,
    FIELD_OWNER_ORG, FIELD_STATUS, FIELD_TICKET_NUMBER, UNKNOWN_STATUS,
};
use crate::utils::non_blank;

pub use crate::types::{AuditMap, ClusterId, DeviceId, FieldMap, FieldName};

/// One parsed input line, keyed by canonical column names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRow {
    /// 1-based physical line where the record started.
    pub line: u64,
    /// Trimmed grouping key.
    pub id: DeviceId,
    /// Every column of the line (unique column key to trimmed value), in header order.
    pub fields: FieldMap,
    /// Resolved status (`UNKNOWN` when the status column was blank or absent).
    pub status: String,
    /// `true` when `status` was filled with the default rather than read from the row.
    pub status_defaulted: bool,
}

impl SourceRow {
    /// Build a row, deriving `status` from the mapped status column.
    pub fn new(line: u64, id: DeviceId, fields: FieldMap) -> Self {
        let supplied = fields
            .get(FIELD_STATUS)
            .and_then(|value| non_blank(value))
            .map(str::to_string);
        let status_defaulted = supplied.is_none();
        Self {
            line,
            id,
            fields,
            status: supplied.unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
            status_defaulted,
        }
    }

    /// Non-blank value of a canonical field, if the row supplied one.
    pub fn value(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|value| non_blank(value))
    }

    /// Status as supplied by the row, ignoring the default fill.
    pub fn supplied_status(&self) -> Option<&str> {
        (!self.status_defaulted).then_some(self.status.as_str())
    }
}

/// One reconciled device entry, as persisted in a cluster collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Unique device identifier within a collection.
    pub id: DeviceId,
    /// Device model.
    pub model: Option<String>,
    /// Never empty once stored.
    pub status: String,
    /// Free-text observation.
    pub note: Option<String>,
    /// Device maker.
    pub manufacturer: Option<String>,
    /// Asset category.
    pub asset_type: Option<String>,
    /// Owning organization.
    pub owner_org: Option<String>,
    /// Related support ticket.
    pub ticket_number: Option<String>,
    /// Physical location.
    pub location: Option<String>,
    /// Audit map: what was supplied locally and what the lookup returned.
    pub raw_fields: AuditMap,
    /// Set on insertion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Set on insertion and on every update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CanonicalRecord {
    /// Empty record for `id` with the default status.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            model: None,
            status: UNKNOWN_STATUS.to_string(),
            note: None,
            manufacturer: None,
            asset_type: None,
            owner_org: None,
            ticket_number: None,
            location: None,
            raw_fields: AuditMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Descriptive column by canonical name (`id` and `status` included).
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            FIELD_ID => Some(self.id.as_str()),
            FIELD_STATUS => Some(self.status.as_str()),
            FIELD_MODEL => self.model.as_deref(),
            FIELD_NOTE => self.note.as_deref(),
            FIELD_MANUFACTURER => self.manufacturer.as_deref(),
            FIELD_ASSET_TYPE => self.asset_type.as_deref(),
            FIELD_OWNER_ORG => self.owner_org.as_deref(),
            FIELD_TICKET_NUMBER => self.ticket_number.as_deref(),
            FIELD_LOCATION => self.location.as_deref(),
            _ => None,
        }
    }

    /// Mutable slot for an optional descriptive column.
    pub fn descriptive_slot_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            FIELD_MODEL => Some(&mut self.model),
            FIELD_NOTE => Some(&mut self.note),
            FIELD_MANUFACTURER => Some(&mut self.manufacturer),
            FIELD_ASSET_TYPE => Some(&mut self.asset_type),
            FIELD_OWNER_ORG => Some(&mut self.owner_org),
            FIELD_TICKET_NUMBER => Some(&mut self.ticket_number),
            FIELD_LOCATION => Some(&mut self.location),
            _ => None,
        }
    }
}

/// Named container owning exactly one collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// UUID v4 assigned at creation.
    pub id: ClusterId,
    /// Display name.
    pub name: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Creation time, the list order key.
    pub created_at: DateTime<Utc>,
    /// Denormalized row count, recomputed after population.
    pub record_count: u64,
}

/// Field-limited view of one stored row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordProjection {
    /// Projected columns in request order.
    pub values: IndexMap<FieldName, Value>,
}

impl RecordProjection {
    /// Projected value as text, when it is a non-empty string.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)
            .and_then(Value::as_str)
            .and_then(non_blank)
    }

    /// Projected `id` column.
    pub fn id(&self) -> Option<&str> {
        self.text(FIELD_ID)
    }
}

/// A cluster together with its ordered ids and per-id projections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterDetails {
    /// The cluster itself.
    pub cluster: Cluster,
    /// Ids in query order.
    pub ids: Vec<DeviceId>,
    /// Projection per id.
    pub rows: IndexMap<DeviceId, RecordProjection>,
}
