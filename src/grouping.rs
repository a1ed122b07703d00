//! Incremental CSV grouping by device id.
//!
//! The input is consumed one logical record at a time: physical lines are
//! read until every quoted field is closed, then that record alone is handed
//! to the `csv` parser. Memory therefore scales with the grouped output, not
//! with the raw input.

use std::io::{self, BufRead, BufReader, Read};

use csv::{ReaderBuilder, StringRecord, Terminator};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::columns::ColumnLayout;
use crate::constants::fields::{FIELD_ID, SURPLUS_FIELD_PREFIX};
use crate::data::SourceRow;
use crate::errors::IngestError;
use crate::types::{DeviceId, FieldMap, FieldName, LogMessage};
use crate::utils::{all_blank, non_blank};

/// Recoverable problem with a single input line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIssue {
    /// 1-based line where the record started.
    pub line: u64,
    /// What was wrong and how it was repaired.
    pub reason: LogMessage,
}

/// Output of one grouping pass.
#[derive(Clone, Debug, Default)]
pub struct GroupedInput {
    /// Rows per id, ids in first-seen order, rows in arrival order.
    pub groups: IndexMap<DeviceId, Vec<SourceRow>>,
    /// Canonical header names in column order (duplicates kept).
    pub headers: Vec<FieldName>,
    /// Rows retained under some id.
    pub total_rows: usize,
    /// Blank rows and rows without an id.
    pub skipped_rows: usize,
    /// Recovered line-level problems.
    pub issues: Vec<RowIssue>,
}

impl GroupedInput {
    /// Number of distinct ids.
    pub fn unique_ids(&self) -> usize {
        self.groups.len()
    }
}

/// Parse decoded CSV text from `reader` and group rows by trimmed `id`.
///
/// Errors:
/// - [`IngestError::MalformedInput`] for a missing header or an unterminated
///   quoted field (with the starting line).
/// - [`IngestError::MissingRequiredColumn`] when no header normalizes to `IMEI`.
/// - [`IngestError::Decode`] when the underlying text stream is not valid.
/// - [`IngestError::NoValidRecords`] when no row carries an id.
pub fn group_records<R: Read>(reader: R) -> Result<GroupedInput, IngestError> {
    let mut records = LogicalRecords::new(reader);
    let layout = loop {
        let Some((line, text)) = records.next_record()? else {
            return Err(IngestError::MalformedInput {
                line: records.lines_read().max(1),
                reason: "no header".into(),
            });
        };
        if text.trim().is_empty() {
            continue;
        }
        let header = parse_record(&text).map_err(|err| IngestError::MalformedInput {
            line,
            reason: format!("unreadable header: {err}"),
        })?;
        break ColumnLayout::from_headers(header.iter());
    };
    if layout.position(FIELD_ID).is_none() {
        return Err(IngestError::MissingRequiredColumn {
            found: layout.normalized_names(),
        });
    }
    info!(columns = layout.len(), "grouping input records");

    let mut grouped = GroupedInput {
        headers: layout.canonical_names(),
        ..GroupedInput::default()
    };
    while let Some((line, text)) = records.next_record()? {
        let record = match parse_record(&text) {
            Ok(record) => record,
            Err(err) => {
                warn!(line, error = %err, "skipping unparseable row");
                grouped.issues.push(RowIssue {
                    line,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if all_blank(record.iter()) {
            debug!(line, "skipping blank row");
            grouped.skipped_rows += 1;
            continue;
        }
        if let Some(repair) = check_width(&record, layout.len()) {
            warn!(line, reason = %repair, "repaired row width");
            grouped.issues.push(RowIssue {
                line,
                reason: repair,
            });
        }
        let fields = map_fields(&layout, &record);
        let Some(id) = fields.get(FIELD_ID).and_then(|value| non_blank(value)) else {
            debug!(line, "skipping row without id");
            grouped.skipped_rows += 1;
            continue;
        };
        let id = id.to_string();
        grouped.total_rows += 1;
        grouped
            .groups
            .entry(id.clone())
            .or_default()
            .push(SourceRow::new(line, id, fields));
    }

    if grouped.groups.is_empty() {
        return Err(IngestError::NoValidRecords);
    }
    info!(
        unique_ids = grouped.groups.len(),
        total_rows = grouped.total_rows,
        skipped_rows = grouped.skipped_rows,
        issues = grouped.issues.len(),
        "grouped input records"
    );
    Ok(grouped)
}

/// Describe how a row's width differs from the header, if it does.
///
/// Short rows are padded with blanks. Blank surplus cells are dropped and
/// non-blank ones are kept under positional keys.
fn check_width(record: &StringRecord, width: usize) -> Option<LogMessage> {
    let found = record.len();
    if found == width {
        return None;
    }
    if found < width {
        return Some(format!(
            "row has {found} of {width} fields; missing fields left blank"
        ));
    }
    let kept = record
        .iter()
        .skip(width)
        .filter(|value| !value.trim().is_empty())
        .count();
    Some(format!(
        "row has {found} fields but the header has {width}; \
         {kept} surplus fields kept, {} blank dropped",
        found - width - kept
    ))
}

fn map_fields(layout: &ColumnLayout, record: &StringRecord) -> FieldMap {
    let mut fields: FieldMap = layout
        .slots()
        .iter()
        .enumerate()
        .map(|(idx, slot)| {
            let value = record.get(idx).unwrap_or("").trim().to_string();
            (slot.key.clone(), value)
        })
        .collect();
    for (idx, value) in record.iter().enumerate().skip(layout.len()) {
        if let Some(value) = non_blank(value) {
            fields.insert(format!("{SURPLUS_FIELD_PREFIX}{}", idx + 1), value.to_string());
        }
    }
    fields
}

fn parse_record(text: &str) -> Result<StringRecord, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(Terminator::Any(b'\n'))
        .from_reader(text.as_bytes());
    let mut record = StringRecord::new();
    if !reader.read_record(&mut record)? {
        record.clear();
    }
    Ok(record)
}

/// Splits a text stream into logical CSV records.
struct LogicalRecords<R> {
    reader: BufReader<R>,
    lines: u64,
}

impl<R: Read> LogicalRecords<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            lines: 0,
        }
    }

    fn lines_read(&self) -> u64 {
        self.lines
    }

    /// Next logical record with its 1-based starting line, or `None` at EOF.
    fn next_record(&mut self) -> Result<Option<(u64, String)>, IngestError> {
        let start = self.lines + 1;
        let mut record = String::new();
        let mut quotes = QuoteState::default();
        loop {
            let read = self
                .reader
                .read_line(&mut record)
                .map_err(|err| self.map_read_err(err))?;
            if read == 0 {
                if record.is_empty() {
                    return Ok(None);
                }
                if quotes.is_open() {
                    return Err(IngestError::MalformedInput {
                        line: start,
                        reason: "unterminated quoted field".into(),
                    });
                }
                return Ok(Some((start, record)));
            }
            self.lines += 1;
            quotes.scan(&record[record.len() - read..]);
            if !quotes.is_open() {
                return Ok(Some((start, record)));
            }
        }
    }

    fn map_read_err(&self, err: io::Error) -> IngestError {
        if err.kind() == io::ErrorKind::InvalidData {
            IngestError::Decode {
                line: self.lines + 1,
                reason: err.to_string(),
            }
        } else {
            IngestError::Io(err)
        }
    }
}

/// RFC 4180 quote tracking: a quote opens a field only at field start and
/// `""` inside a quoted field is an escaped quote.
#[derive(Debug)]
struct QuoteState {
    in_quotes: bool,
    field_start: bool,
    quote_pending: bool,
}

impl Default for QuoteState {
    fn default() -> Self {
        Self {
            in_quotes: false,
            field_start: true,
            quote_pending: false,
        }
    }
}

impl QuoteState {
    fn is_open(&self) -> bool {
        self.in_quotes && !self.quote_pending
    }

    fn scan(&mut self, text: &str) {
        for ch in text.chars() {
            if self.in_quotes {
                if !self.quote_pending {
                    self.quote_pending = ch == '"';
                    continue;
                }
                self.quote_pending = false;
                if ch == '"' {
                    continue;
                }
                self.in_quotes = false;
            }
            match ch {
                ',' | '\n' | '\r' => self.field_start = true,
                '"' if self.field_start => {
                    self.in_quotes = true;
                    self.field_start = false;
                }
                _ => self.field_start = false,
            }
        }
    }
}
