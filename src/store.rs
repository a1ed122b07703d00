//! Schema-on-write cluster collections over a single key/value file.
//!
//! Every cluster owns one logical collection. Collections are entries in a
//! schema registry (`collection:<name>`); rows, the unique id index and the
//! cluster metadata live under their own key prefixes, so creating a
//! collection never needs DDL.
//!
//! Key layout:
//! - `cluster:<id>` cluster metadata
//! - `clusters:count` / `clusters:idx:<u64 le>` creation-ordered cluster index
//! - `collection:<name>` collection descriptor
//! - `row:<name>:<u64 be>` stored row, by insertion sequence
//! - `rowkey:<name>:<id>` sequence of the row holding `id`

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use simd_r_drive::storage_engine::DataStore;
use simd_r_drive::storage_engine::traits::{DataStoreReader, DataStoreWriter};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::fields::{
    DEFAULT_QUERY_FIELDS, DETAILED_QUERY_FIELDS, FIELD_ASSET_TYPE, FIELD_CREATED_AT, FIELD_ID,
    FIELD_LOCATION, FIELD_MANUFACTURER, FIELD_MODEL, FIELD_NOTE, FIELD_OWNER_ORG,
    FIELD_RAW_FIELDS, FIELD_STATUS, FIELD_TICKET_NUMBER, FIELD_UPDATED_AT, UNKNOWN_STATUS,
};
use crate::constants::store::{
    BITCODE_PREFIX, CLUSTER_COUNT_KEY, CLUSTER_INDEX_PREFIX, CLUSTER_PREFIX,
    CLUSTER_RECORD_VERSION, COLLECTION_NAME_PREFIX, COLLECTION_PREFIX, COLLECTION_RECORD_VERSION,
    DEFAULT_STORE_DIR, DEFAULT_STORE_FILENAME, KEY_SEPARATOR, META_KEY, QUERY_READ_BATCH,
    ROW_KEY_PREFIX, ROW_PREFIX, ROW_RECORD_VERSION, STORE_VERSION,
};
use crate::data::{CanonicalRecord, Cluster, ClusterDetails, RecordProjection};
use crate::errors::{IngestError, InsertError};
use crate::types::{AuditMap, ClusterId, CollectionName, FieldName};
use crate::utils::non_blank;

/// Derive the collection name for a cluster (`cluster_<uuid with underscores>`).
///
/// Cluster ids are UUIDs, which never contain `_`, so the mapping is injective
/// for them. Arbitrary ids such as `abc-1` and `abc_1` share a name; the store
/// refuses to hand one id another id's collection.
pub fn collection_name(cluster_id: &str) -> CollectionName {
    format!(
        "{COLLECTION_NAME_PREFIX}{}",
        cluster_id.trim().replace('-', "_")
    )
}

/// Reference to one cluster's collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHandle {
    /// Derived collection name.
    pub name: CollectionName,
    /// Cluster that owns the collection.
    pub cluster_id: ClusterId,
}

impl CollectionHandle {
    /// Handle for the collection owned by `cluster_id`.
    pub fn for_cluster(cluster_id: &str) -> Self {
        Self {
            name: collection_name(cluster_id),
            cluster_id: cluster_id.trim().to_string(),
        }
    }
}

/// Result of a best-effort bulk insert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertReport {
    /// Records written.
    pub inserted: usize,
    /// Per-record failures; siblings were still attempted.
    pub failures: Vec<InsertError>,
}

/// Schema registry view of one collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name derived from the cluster id.
    pub name: CollectionName,
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Registration time; absent when the stored timestamp is out of range.
    pub created_at: Option<DateTime<Utc>>,
    /// Registered columns, in storage order.
    pub columns: Vec<FieldName>,
    /// Rows currently stored.
    pub row_count: u64,
}

/// Projected rows of one collection query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Rows ordered by insertion time descending, then id ascending.
    pub rows: Vec<RecordProjection>,
    /// Number of rows returned.
    pub total: usize,
}

#[derive(Clone, Copy, Debug, bitcode::Encode, bitcode::Decode)]
/// Versioned metadata header stored at the start of every store file.
struct StoreMeta {
    version: u8,
}

#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
struct StoredCluster {
    id: String,
    name: String,
    description: Option<String>,
    created_at_micros: i64,
    record_count: u64,
}

#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
/// Schema registry entry for one collection.
struct CollectionDescriptor {
    name: String,
    cluster_id: String,
    created_at_micros: i64,
    /// Columns rows of this collection carry.
    columns: Vec<String>,
    next_seq: u64,
    row_count: u64,
}

#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
struct StoredRow {
    /// Internal row id, distinct from the domain id; never projected.
    #[allow(dead_code)]
    row_id: String,
    id: String,
    model: Option<String>,
    status: String,
    note: Option<String>,
    manufacturer: Option<String>,
    asset_type: Option<String>,
    owner_org: Option<String>,
    ticket_number: Option<String>,
    location: Option<String>,
    /// Audit map as JSON text (bitcode has no dynamic value type).
    raw_fields_json: String,
    created_at_micros: i64,
    updated_at_micros: i64,
}

/// Columns registered for every cluster collection.
const RECORD_COLUMNS: [&str; 12] = [
    FIELD_ID,
    FIELD_MODEL,
    FIELD_STATUS,
    FIELD_NOTE,
    FIELD_MANUFACTURER,
    FIELD_ASSET_TYPE,
    FIELD_OWNER_ORG,
    FIELD_TICKET_NUMBER,
    FIELD_LOCATION,
    FIELD_RAW_FIELDS,
    FIELD_CREATED_AT,
    FIELD_UPDATED_AT,
];

/// File-backed cluster store.
///
/// Reads go straight to the engine; writers are serialized through an
/// internal lock so concurrent population passes stay consistent.
pub struct ClusterStore {
    store: DataStore,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl fmt::Debug for ClusterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterStore")
            .field("path", &self.path)
            .finish()
    }
}

impl ClusterStore {
    /// Open (or create) a cluster store at `path`.
    ///
    /// A directory path resolves to the default file name inside it. Opening
    /// a file written with a different layout version fails.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, IngestError> {
        let path = coerce_store_path(path.into());
        ensure_parent_dir(&path)?;
        let store = DataStore::open(path.as_path()).map_err(map_store_err)?;
        let store = Self {
            store,
            path,
            write_lock: Mutex::new(()),
        };
        store.verify_metadata()?;
        debug!(path = %store.path.display(), "opened cluster store");
        Ok(store)
    }

    /// Default store file path under the crate's default store directory.
    pub fn default_path() -> PathBuf {
        Self::default_path_in_dir(DEFAULT_STORE_DIR)
    }

    /// Default store file path inside a custom directory.
    pub fn default_path_in_dir<P: AsRef<Path>>(dir: P) -> PathBuf {
        dir.as_ref().join(DEFAULT_STORE_FILENAME)
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn verify_metadata(&self) -> Result<(), IngestError> {
        match read_bytes(&self.store, META_KEY)? {
            Some(bytes) => {
                let meta: StoreMeta = bitcode::decode(decode_bitcode_payload(&bytes)?)
                    .map_err(|err| {
                        IngestError::Store(format!("failed to decode store metadata: {err}"))
                    })?;
                if meta.version != STORE_VERSION {
                    return Err(IngestError::Store(format!(
                        "cluster store version mismatch (expected {}, found {})",
                        STORE_VERSION, meta.version
                    )));
                }
            }
            None => {
                let meta = StoreMeta {
                    version: STORE_VERSION,
                };
                let payload = encode_bitcode_payload(&bitcode::encode(&meta));
                self.store
                    .write(META_KEY, &payload)
                    .map_err(map_store_err)?;
            }
        }
        Ok(())
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>, IngestError> {
        self.write_lock
            .lock()
            .map_err(|_| IngestError::Store("cluster store write lock poisoned".into()))
    }

    /// Create the collection for `cluster_id` if it does not exist yet.
    pub fn create_collection(&self, cluster_id: &str) -> Result<CollectionHandle, IngestError> {
        let handle = CollectionHandle::for_cluster(cluster_id);
        let _guard = self.lock_writes()?;
        if self.read_descriptor(&handle)?.is_some() {
            debug!(collection = %handle.name, "collection already exists");
            return Ok(handle);
        }
        let descriptor = new_descriptor(&handle, Utc::now());
        self.store
            .write(
                &collection_key(&handle.name),
                &encode_entry(COLLECTION_RECORD_VERSION, &descriptor),
            )
            .map_err(map_store_err)?;
        info!(collection = %handle.name, "created collection");
        Ok(handle)
    }

    /// Returns `true` when the collection for `cluster_id` is registered.
    ///
    /// Unreadable descriptors count as absent.
    pub fn collection_exists(&self, cluster_id: &str) -> bool {
        let handle = CollectionHandle::for_cluster(cluster_id);
        match self.read_descriptor(&handle) {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!(collection = %handle.name, error = %err, "collection descriptor unreadable");
                false
            }
        }
    }

    /// Registry entry for the collection of `cluster_id`, if any.
    pub fn collection_info(
        &self,
        cluster_id: &str,
    ) -> Result<Option<CollectionInfo>, IngestError> {
        Ok(self
            .read_descriptor(&CollectionHandle::for_cluster(cluster_id))?
            .map(|descriptor| CollectionInfo {
                name: descriptor.name,
                cluster_id: descriptor.cluster_id,
                created_at: DateTime::<Utc>::from_timestamp_micros(descriptor.created_at_micros),
                columns: descriptor.columns,
                row_count: descriptor.row_count,
            }))
    }

    /// Descriptor registered under `handle.name`, which must belong to `handle.cluster_id`.
    fn read_descriptor(
        &self,
        handle: &CollectionHandle,
    ) -> Result<Option<CollectionDescriptor>, IngestError> {
        let Some(bytes) = read_bytes(&self.store, &collection_key(&handle.name))? else {
            return Ok(None);
        };
        let descriptor: CollectionDescriptor =
            decode_entry(COLLECTION_RECORD_VERSION, &bytes, "collection descriptor")?;
        if descriptor.cluster_id != handle.cluster_id {
            return Err(IngestError::Store(format!(
                "collection '{}' belongs to cluster '{}', not '{}'",
                handle.name, descriptor.cluster_id, handle.cluster_id
            )));
        }
        Ok(Some(descriptor))
    }

    /// Insert records one by one into `handle`'s collection.
    ///
    /// Each record gets a fresh internal row id. Its row, id index entry, and
    /// updated descriptor are written in one batch. Duplicate ids and write
    /// failures are collected per record. A missing collection or a poisoned
    /// lock fails the whole call.
    pub fn insert_all(
        &self,
        handle: &CollectionHandle,
        records: &[CanonicalRecord],
    ) -> Result<InsertReport, IngestError> {
        let _guard = self.lock_writes()?;
        let Some(mut descriptor) = self.read_descriptor(handle)? else {
            return Err(IngestError::Store(format!(
                "collection '{}' does not exist",
                handle.name
            )));
        };
        let mut report = InsertReport::default();
        for record in records {
            match self.insert_one(handle, &mut descriptor, record) {
                Ok(()) => report.inserted += 1,
                Err(err) => {
                    warn!(collection = %handle.name, id = %err.id(), error = %err, "insert failed");
                    report.failures.push(err);
                }
            }
        }
        info!(
            collection = %handle.name,
            inserted = report.inserted,
            failed = report.failures.len(),
            "populated collection"
        );
        Ok(report)
    }

    fn insert_one(
        &self,
        handle: &CollectionHandle,
        descriptor: &mut CollectionDescriptor,
        record: &CanonicalRecord,
    ) -> Result<(), InsertError> {
        let id = record.id.trim().to_string();
        let store_err = |reason: String| InsertError::Store {
            id: id.clone(),
            reason,
        };
        if id.is_empty() {
            return Err(store_err("record id is empty".into()));
        }
        let id_key = row_id_key(&handle.name, &id);
        let existing = self
            .store
            .read(&id_key)
            .map_err(|err| store_err(err.to_string()))?;
        if existing.is_some() {
            return Err(InsertError::DuplicateKey {
                id: id.clone(),
                collection: handle.name.clone(),
            });
        }

        let now = Utc::now().timestamp_micros();
        let raw_fields = decode_stringified_json(&record.raw_fields);
        let raw_fields_json =
            serde_json::to_string(&raw_fields).map_err(|err| store_err(err.to_string()))?;
        let row = StoredRow {
            row_id: Uuid::new_v4().to_string(),
            id: id.clone(),
            model: record.model.clone(),
            status: non_blank(&record.status)
                .unwrap_or(UNKNOWN_STATUS)
                .to_string(),
            note: record.note.clone(),
            manufacturer: record.manufacturer.clone(),
            asset_type: record.asset_type.clone(),
            owner_org: record.owner_org.clone(),
            ticket_number: record.ticket_number.clone(),
            location: record.location.clone(),
            raw_fields_json,
            created_at_micros: now,
            updated_at_micros: now,
        };

        let seq = descriptor.next_seq;
        let mut updated = descriptor.clone();
        updated.next_seq += 1;
        updated.row_count += 1;
        let entries = [
            (
                row_key(&handle.name, seq),
                encode_entry(ROW_RECORD_VERSION, &row),
            ),
            (id_key, seq.to_le_bytes().to_vec()),
            (
                collection_key(&handle.name),
                encode_entry(COLLECTION_RECORD_VERSION, &updated),
            ),
        ];
        let entry_refs: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
            .collect();
        self.store
            .batch_write(&entry_refs)
            .map_err(|err| store_err(err.to_string()))?;
        *descriptor = updated;
        debug!(collection = %handle.name, id = %id, seq, "inserted row");
        Ok(())
    }

    /// Query a collection, projecting `fields`.
    ///
    /// The allowed set is `id, model, status, manufacturer`, extended with the
    /// remaining columns when `detailed` is set. Requested fields outside the
    /// allowed set are dropped; an empty request means the whole allowed set.
    /// A missing collection yields an empty result.
    pub fn query_fields(
        &self,
        handle: &CollectionHandle,
        fields: &[&str],
        detailed: bool,
    ) -> Result<QueryResult, IngestError> {
        let Some(descriptor) = self.read_descriptor(handle)? else {
            debug!(collection = %handle.name, "query on missing collection");
            return Ok(QueryResult::default());
        };
        let projection = resolve_projection(fields, detailed, &descriptor.columns);

        let mut rows: Vec<StoredRow> = Vec::with_capacity(descriptor.row_count as usize);
        let seqs: Vec<u64> = (0..descriptor.next_seq).collect();
        for chunk in seqs.chunks(QUERY_READ_BATCH) {
            let keys: Vec<Vec<u8>> = chunk
                .iter()
                .map(|seq| row_key(&handle.name, *seq))
                .collect();
            let key_refs: Vec<&[u8]> = keys.iter().map(|key| key.as_slice()).collect();
            let entries = self.store.batch_read(&key_refs).map_err(map_store_err)?;
            for (seq, entry) in chunk.iter().zip(entries) {
                let Some(entry) = entry else {
                    warn!(collection = %handle.name, seq, "row entry missing");
                    continue;
                };
                rows.push(decode_entry(ROW_RECORD_VERSION, entry.as_ref(), "row")?);
            }
        }
        rows.sort_by(|a, b| {
            b.created_at_micros
                .cmp(&a.created_at_micros)
                .then_with(|| a.id.cmp(&b.id))
        });

        let rows: Vec<RecordProjection> =
            rows.iter().map(|row| project(row, &projection)).collect();
        debug!(
            collection = %handle.name,
            rows = rows.len(),
            columns = projection.len(),
            detailed,
            "queried collection"
        );
        Ok(QueryResult {
            total: rows.len(),
            rows,
        })
    }

    /// Create a cluster (fresh UUID v4) together with its collection.
    pub fn create_cluster(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Cluster, IngestError> {
        let created_at = Utc::now();
        let cluster = Cluster {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            description: description.and_then(non_blank).map(str::to_string),
            created_at,
            record_count: 0,
        };
        let handle = CollectionHandle::for_cluster(&cluster.id);
        let _guard = self.lock_writes()?;
        let position = self.cluster_count()?;
        let entries = [
            (
                cluster_key(&cluster.id),
                encode_entry(CLUSTER_RECORD_VERSION, &to_stored_cluster(&cluster)),
            ),
            (cluster_index_key(position), cluster.id.as_bytes().to_vec()),
            (CLUSTER_COUNT_KEY.to_vec(), (position + 1).to_le_bytes().to_vec()),
            (
                collection_key(&handle.name),
                encode_entry(
                    COLLECTION_RECORD_VERSION,
                    &new_descriptor(&handle, created_at),
                ),
            ),
        ];
        let entry_refs: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
            .collect();
        self.store.batch_write(&entry_refs).map_err(map_store_err)?;
        info!(
            cluster_id = %cluster.id,
            name = %cluster.name,
            collection = %handle.name,
            "created cluster"
        );
        Ok(cluster)
    }

    /// Look up a cluster by id.
    pub fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>, IngestError> {
        read_bytes(&self.store, &cluster_key(cluster_id.trim()))?
            .map(|bytes| decode_cluster(&bytes))
            .transpose()
    }

    /// Every cluster in creation order.
    pub fn list_clusters(&self) -> Result<Vec<Cluster>, IngestError> {
        let count = self.cluster_count()?;
        let index_keys: Vec<Vec<u8>> = (0..count).map(cluster_index_key).collect();
        let index_refs: Vec<&[u8]> = index_keys.iter().map(|key| key.as_slice()).collect();
        let ids = self.store.batch_read(&index_refs).map_err(map_store_err)?;
        let cluster_keys: Vec<Vec<u8>> = ids
            .iter()
            .flatten()
            .map(|entry| {
                let mut key = CLUSTER_PREFIX.to_vec();
                key.extend_from_slice(entry.as_ref());
                key
            })
            .collect();
        let cluster_refs: Vec<&[u8]> = cluster_keys.iter().map(|key| key.as_slice()).collect();
        let entries = self.store.batch_read(&cluster_refs).map_err(map_store_err)?;
        entries
            .into_iter()
            .flatten()
            .map(|entry| decode_cluster(entry.as_ref()))
            .collect()
    }

    /// Overwrite the denormalized record count of a cluster.
    pub fn set_record_count(&self, cluster_id: &str, count: u64) -> Result<Cluster, IngestError> {
        let _guard = self.lock_writes()?;
        let mut cluster = self
            .get_cluster(cluster_id)?
            .ok_or_else(|| IngestError::Store(format!("unknown cluster '{cluster_id}'")))?;
        cluster.record_count = count;
        self.store
            .write(
                &cluster_key(&cluster.id),
                &encode_entry(CLUSTER_RECORD_VERSION, &to_stored_cluster(&cluster)),
            )
            .map_err(map_store_err)?;
        debug!(cluster_id = %cluster.id, record_count = count, "updated record count");
        Ok(cluster)
    }

    /// Recompute a cluster's record count from its collection.
    pub fn recount_records(&self, cluster_id: &str) -> Result<Cluster, IngestError> {
        let handle = CollectionHandle::for_cluster(cluster_id);
        let count = self
            .read_descriptor(&handle)?
            .map(|descriptor| descriptor.row_count)
            .unwrap_or(0);
        self.set_record_count(cluster_id, count)
    }

    /// A cluster with its ordered ids and per-id projections.
    ///
    /// `None` when the cluster is unknown; a missing collection yields no rows.
    pub fn cluster_details(
        &self,
        cluster_id: &str,
        detailed: bool,
    ) -> Result<Option<ClusterDetails>, IngestError> {
        let Some(cluster) = self.get_cluster(cluster_id)? else {
            return Ok(None);
        };
        let handle = CollectionHandle::for_cluster(&cluster.id);
        let result = self.query_fields(&handle, &[], detailed)?;
        let mut rows: IndexMap<_, RecordProjection> = IndexMap::with_capacity(result.rows.len());
        for projection in result.rows {
            if let Some(id) = projection.id().map(str::to_string) {
                rows.insert(id, projection);
            }
        }
        Ok(Some(ClusterDetails {
            cluster,
            ids: rows.keys().cloned().collect(),
            rows,
        }))
    }

    fn cluster_count(&self) -> Result<u64, IngestError> {
        let Some(bytes) = read_bytes(&self.store, CLUSTER_COUNT_KEY)? else {
            return Ok(0);
        };
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IngestError::Store("corrupt cluster count entry".into()))?;
        Ok(u64::from_le_bytes(raw))
    }
}

fn new_descriptor(handle: &CollectionHandle, created_at: DateTime<Utc>) -> CollectionDescriptor {
    CollectionDescriptor {
        name: handle.name.clone(),
        cluster_id: handle.cluster_id.clone(),
        created_at_micros: created_at.timestamp_micros(),
        columns: RECORD_COLUMNS.iter().map(|column| column.to_string()).collect(),
        next_seq: 0,
        row_count: 0,
    }
}

fn resolve_projection(fields: &[&str], detailed: bool, columns: &[String]) -> Vec<FieldName> {
    let mut allowed: Vec<&str> = DEFAULT_QUERY_FIELDS.to_vec();
    if detailed {
        allowed.extend(DETAILED_QUERY_FIELDS);
    }
    allowed.retain(|field| columns.iter().any(|column| column == field));
    if fields.is_empty() {
        return allowed.into_iter().map(str::to_string).collect();
    }
    let mut projection: Vec<FieldName> = Vec::new();
    for field in fields {
        let field = field.trim();
        if allowed.contains(&field) && !projection.iter().any(|seen| seen == field) {
            projection.push(field.to_string());
        }
    }
    projection
}

fn project(row: &StoredRow, projection: &[FieldName]) -> RecordProjection {
    let text = |value: &Option<String>| {
        value
            .as_ref()
            .map(|value| Value::String(value.clone()))
            .unwrap_or(Value::Null)
    };
    let timestamp = |micros: i64| {
        DateTime::<Utc>::from_timestamp_micros(micros)
            .map(|at| Value::String(at.to_rfc3339()))
            .unwrap_or(Value::Null)
    };
    let mut values = IndexMap::with_capacity(projection.len());
    for field in projection {
        let value = match field.as_str() {
            FIELD_ID => Value::String(row.id.clone()),
            FIELD_STATUS => Value::String(row.status.clone()),
            FIELD_MODEL => text(&row.model),
            FIELD_NOTE => text(&row.note),
            FIELD_MANUFACTURER => text(&row.manufacturer),
            FIELD_ASSET_TYPE => text(&row.asset_type),
            FIELD_OWNER_ORG => text(&row.owner_org),
            FIELD_TICKET_NUMBER => text(&row.ticket_number),
            FIELD_LOCATION => text(&row.location),
            FIELD_RAW_FIELDS => {
                serde_json::from_str(&row.raw_fields_json).unwrap_or(Value::Null)
            }
            FIELD_CREATED_AT => timestamp(row.created_at_micros),
            FIELD_UPDATED_AT => timestamp(row.updated_at_micros),
            _ => Value::Null,
        };
        values.insert(field.clone(), value);
    }
    RecordProjection { values }
}

/// Decode audit values that arrive as serialized JSON objects or arrays.
///
/// Anything that does not decode is kept as the original string.
fn decode_stringified_json(raw_fields: &AuditMap) -> AuditMap {
    raw_fields
        .iter()
        .map(|(key, value)| {
            let decoded = match value {
                Value::String(text) if looks_like_json_container(text) => {
                    match serde_json::from_str::<Value>(text) {
                        Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed,
                        _ => value.clone(),
                    }
                }
                _ => value.clone(),
            };
            (key.clone(), decoded)
        })
        .collect()
}

fn looks_like_json_container(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

fn to_stored_cluster(cluster: &Cluster) -> StoredCluster {
    StoredCluster {
        id: cluster.id.clone(),
        name: cluster.name.clone(),
        description: cluster.description.clone(),
        created_at_micros: cluster.created_at.timestamp_micros(),
        record_count: cluster.record_count,
    }
}

fn decode_cluster(bytes: &[u8]) -> Result<Cluster, IngestError> {
    let stored: StoredCluster = decode_entry(CLUSTER_RECORD_VERSION, bytes, "cluster")?;
    let created_at = DateTime::<Utc>::from_timestamp_micros(stored.created_at_micros)
        .ok_or_else(|| {
            IngestError::Store(format!("cluster '{}' has a corrupt timestamp", stored.id))
        })?;
    Ok(Cluster {
        id: stored.id,
        name: stored.name,
        description: stored.description,
        created_at,
        record_count: stored.record_count,
    })
}

fn encode_entry<T: bitcode::Encode>(version: u8, value: &T) -> Vec<u8> {
    let payload = encode_bitcode_payload(&bitcode::encode(value));
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(version);
    buf.extend_from_slice(&payload);
    buf
}

fn decode_entry<T>(version: u8, bytes: &[u8], what: &str) -> Result<T, IngestError>
where
    T: for<'a> bitcode::Decode<'a>,
{
    match bytes.first() {
        Some(found) if *found == version => {}
        _ => {
            return Err(IngestError::Store(format!("{what} record version mismatch")));
        }
    }
    bitcode::decode(decode_bitcode_payload(&bytes[1..])?)
        .map_err(|err| IngestError::Store(format!("corrupt {what} record: {err}")))
}

fn encode_bitcode_payload(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(BITCODE_PREFIX);
    out.extend_from_slice(bytes);
    out
}

fn decode_bitcode_payload(bytes: &[u8]) -> Result<&[u8], IngestError> {
    match bytes.split_first() {
        Some((&BITCODE_PREFIX, rest)) => Ok(rest),
        _ => Err(IngestError::Store(
            "bitcode payload missing expected prefix".into(),
        )),
    }
}

fn keyed(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|part| part.len() + 1).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.extend_from_slice(part);
    }
    key
}

fn cluster_key(cluster_id: &str) -> Vec<u8> {
    keyed(CLUSTER_PREFIX, &[cluster_id.as_bytes()])
}

fn cluster_index_key(position: u64) -> Vec<u8> {
    keyed(CLUSTER_INDEX_PREFIX, &[&position.to_le_bytes()])
}

fn collection_key(name: &str) -> Vec<u8> {
    keyed(COLLECTION_PREFIX, &[name.as_bytes()])
}

fn row_key(collection: &str, seq: u64) -> Vec<u8> {
    keyed(ROW_PREFIX, &[collection.as_bytes(), &seq.to_be_bytes()])
}

fn row_id_key(collection: &str, id: &str) -> Vec<u8> {
    keyed(ROW_KEY_PREFIX, &[collection.as_bytes(), id.as_bytes()])
}

fn read_bytes(store: &DataStore, key: &[u8]) -> Result<Option<Vec<u8>>, IngestError> {
    store
        .read(key)
        .map_err(map_store_err)?
        .map(|entry| Ok(entry.as_ref().to_vec()))
        .transpose()
}

fn coerce_store_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        return path.join(DEFAULT_STORE_FILENAME);
    }
    path
}

fn ensure_parent_dir(path: &Path) -> Result<(), IngestError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn map_store_err(err: io::Error) -> IngestError {
    IngestError::Store(err.to_string())
}
