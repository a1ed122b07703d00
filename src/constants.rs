/// Canonical field names and default values shared by every component.
pub mod fields {
    /// Grouping key column (mapped from `IMEI`).
    pub const FIELD_ID: &str = "id";
    /// Device model.
    pub const FIELD_MODEL: &str = "model";
    /// Device status.
    pub const FIELD_STATUS: &str = "status";
    /// Free-form observation text.
    pub const FIELD_NOTE: &str = "note";
    /// Device manufacturer.
    pub const FIELD_MANUFACTURER: &str = "manufacturer";
    /// Asset type (smartphone, tablet, ...).
    pub const FIELD_ASSET_TYPE: &str = "asset_type";
    /// Owning company or organization.
    pub const FIELD_OWNER_ORG: &str = "owner_org";
    /// Associated support ticket number.
    pub const FIELD_TICKET_NUMBER: &str = "ticket_number";
    /// Physical location / organization unit.
    pub const FIELD_LOCATION: &str = "location";
    /// Audit map column.
    pub const FIELD_RAW_FIELDS: &str = "raw_fields";
    /// Insertion timestamp column.
    pub const FIELD_CREATED_AT: &str = "created_at";
    /// Last update timestamp column.
    pub const FIELD_UPDATED_AT: &str = "updated_at";
    /// Second IMEI slot reported by the lookup service (audit only).
    pub const FIELD_SECONDARY_ID: &str = "secondary_id";
    /// Serial number reported by the lookup service (audit only).
    pub const FIELD_SERIAL: &str = "serial";
    /// Service start date reported by the lookup service (audit only).
    pub const FIELD_STARTED_AT: &str = "started_at";

    /// Key prefix for data cells beyond the header width (`column_<position>`).
    pub const SURPLUS_FIELD_PREFIX: &str = "column_";

    /// Status used when neither the input row nor the lookup supplies one.
    pub const UNKNOWN_STATUS: &str = "UNKNOWN";

    /// Optional descriptive columns of a canonical record, in storage order.
    pub const DESCRIPTIVE_FIELDS: [&str; 7] = [
        FIELD_MODEL,
        FIELD_NOTE,
        FIELD_MANUFACTURER,
        FIELD_ASSET_TYPE,
        FIELD_OWNER_ORG,
        FIELD_TICKET_NUMBER,
        FIELD_LOCATION,
    ];
    /// Projection returned by non-detailed queries.
    pub const DEFAULT_QUERY_FIELDS: [&str; 4] =
        [FIELD_ID, FIELD_MODEL, FIELD_STATUS, FIELD_MANUFACTURER];
    /// Columns added to the projection by detailed queries.
    pub const DETAILED_QUERY_FIELDS: [&str; 8] = [
        FIELD_NOTE,
        FIELD_ASSET_TYPE,
        FIELD_OWNER_ORG,
        FIELD_TICKET_NUMBER,
        FIELD_LOCATION,
        FIELD_RAW_FIELDS,
        FIELD_CREATED_AT,
        FIELD_UPDATED_AT,
    ];
}

/// Keys used inside a canonical record's audit map.
pub mod audit {
    /// First input row for the id, every column verbatim.
    pub const AUDIT_LOCAL: &str = "local";
    /// Upstream item payload, verbatim.
    pub const AUDIT_EXTERNAL: &str = "external";
    /// Fields extracted from the upstream payload.
    pub const AUDIT_EXTERNAL_FIELDS: &str = "external_fields";
    /// Full upstream response envelope, when supplied.
    pub const AUDIT_EXTERNAL_RESPONSE: &str = "external_response";
    /// Number of additional input rows sharing the id.
    pub const AUDIT_DUPLICATE_ROWS: &str = "duplicate_rows";
    /// Lookup failed or returned an explicit error marker.
    pub const AUDIT_ERROR_LOOKUP: &str = "error_lookup";
    /// Lookup collaborator faulted while being contacted.
    pub const AUDIT_ERROR_PROCESSING: &str = "error_processing";
}

/// Constants used by lookup payload field resolution.
pub mod lookup {
    /// Nested objects searched when a field is missing at the payload top level.
    pub const NESTED_PAYLOAD_KEYS: [&str; 2] = ["raw", "dados_brutos"];
    /// Envelope key holding the upstream result list.
    pub const RESPONSE_DATA_KEY: &str = "data";
    /// Error marker used when the upstream result list is empty.
    pub const NO_DATA_MESSAGE: &str = "no data found for this id";
}

/// Constants used by the cluster store key layout and wire encoding.
pub mod store {
    /// Key used for store-wide metadata.
    pub const META_KEY: &[u8] = b"__meta__";
    /// Version tag for store layout compatibility checks.
    pub const STORE_VERSION: u8 = 1;
    /// Version tag for persisted cluster entries.
    pub const CLUSTER_RECORD_VERSION: u8 = 1;
    /// Version tag for persisted collection descriptors.
    pub const COLLECTION_RECORD_VERSION: u8 = 1;
    /// Version tag for persisted rows.
    pub const ROW_RECORD_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';

    /// Key prefix for cluster metadata entries.
    pub const CLUSTER_PREFIX: &[u8] = b"cluster:";
    /// Key holding the number of registered clusters.
    pub const CLUSTER_COUNT_KEY: &[u8] = b"clusters:count";
    /// Key prefix for the creation-ordered cluster index.
    pub const CLUSTER_INDEX_PREFIX: &[u8] = b"clusters:idx:";
    /// Key prefix for collection descriptors (the schema registry).
    pub const COLLECTION_PREFIX: &[u8] = b"collection:";
    /// Key prefix for collection rows, followed by `<collection>:<seq>`.
    pub const ROW_PREFIX: &[u8] = b"row:";
    /// Key prefix for the unique id index, followed by `<collection>:<id>`.
    pub const ROW_KEY_PREFIX: &[u8] = b"rowkey:";
    /// Separator between collection name and row suffix in keys.
    pub const KEY_SEPARATOR: u8 = b':';

    /// Prefix applied to cluster ids when deriving collection names.
    pub const COLLECTION_NAME_PREFIX: &str = "cluster_";
    /// Number of row keys fetched per `batch_read` call during queries.
    pub const QUERY_READ_BATCH: usize = 256;

    /// Default directory for persisted store files.
    pub const DEFAULT_STORE_DIR: &str = ".imei_clusters";
    /// Default filename for persisted store files.
    pub const DEFAULT_STORE_FILENAME: &str = "clusters.bin";
}

/// Constants used by the budgeted payload encoder.
pub mod encoder {
    /// Byte capacity of a version-40 symbol at the high-detail tier.
    pub const DEFAULT_BYTE_BUDGET: usize = 2953;
    /// Maximum number of characters kept from the cluster name.
    pub const NAME_MAX_CHARS: usize = 50;
    /// Maximum sample ids kept per model bucket.
    pub const SAMPLE_IDS_PER_MODEL: usize = 5;
    /// Bucket label for records without a model.
    pub const UNKNOWN_MODEL: &str = "Unknown";
    /// Notice appended when sample ids were stripped.
    pub const TRUNCATION_NOTICE: &str = "id list too large, showing counts only";
    /// Maximum characters of an error message carried by the fallback payload.
    pub const FALLBACK_MESSAGE_MAX_CHARS: usize = 100;
}

/// Constants used by the ingestion pipeline defaults.
pub mod pipeline {
    /// Encoding label tried first when decoding input text.
    pub const DEFAULT_PRIMARY_ENCODING: &str = "utf-8";
    /// Encoding label tried when the primary encoding fails.
    pub const DEFAULT_FALLBACK_ENCODING: &str = "latin1";
    /// Default size of the lookup worker pool.
    pub const DEFAULT_LOOKUP_WORKERS: usize = 4;
    /// Placeholder cluster name replaced by one derived from the input file.
    pub const DEFAULT_CLUSTER_NAME: &str = "Cluster generated from CSV";
    /// Prefix for cluster names derived from the input file name.
    pub const FILE_CLUSTER_NAME_PREFIX: &str = "Cluster from file ";
    /// Raw read size used by the decoding reader.
    pub const DECODE_CHUNK_BYTES: usize = 8 * 1024;
}
