//! Header normalization onto the canonical field set.
//!
//! Mapping is pure and total: every header yields exactly one field name.
//! Known variants (Portuguese source spellings, accented or not, plus the
//! English equivalents) resolve through a fixed alias table; anything else
//! passes through trimmed and lower-cased so it still reaches the audit map.

use crate::constants::fields::{
    FIELD_ASSET_TYPE, FIELD_ID, FIELD_LOCATION, FIELD_MANUFACTURER, FIELD_MODEL, FIELD_NOTE,
    FIELD_OWNER_ORG, FIELD_STATUS, FIELD_TICKET_NUMBER,
};
use crate::types::FieldName;
use crate::utils::strip_bom;

/// Upper-cased header variants and the canonical field each resolves to.
const ALIASES: &[(&str, &str)] = &[
    ("IMEI", FIELD_ID),
    ("MODELO", FIELD_MODEL),
    ("MODEL", FIELD_MODEL),
    ("STATUS", FIELD_STATUS),
    ("OBS", FIELD_NOTE),
    ("OBSERVAÇÃO", FIELD_NOTE),
    ("OBSERVACAO", FIELD_NOTE),
    ("NOTE", FIELD_NOTE),
    ("FABRICANTE", FIELD_MANUFACTURER),
    ("MANUFACTURER", FIELD_MANUFACTURER),
    ("TIPO ATIVO", FIELD_ASSET_TYPE),
    ("ASSET TYPE", FIELD_ASSET_TYPE),
    ("EMPRESA", FIELD_OWNER_ORG),
    ("COMPANY", FIELD_OWNER_ORG),
    ("NUMERO CHAMADO", FIELD_TICKET_NUMBER),
    ("CHAMADO", FIELD_TICKET_NUMBER),
    ("TICKET NUMBER", FIELD_TICKET_NUMBER),
    ("LOCALIZAÇÃO", FIELD_LOCATION),
    ("LOCAL", FIELD_LOCATION),
    ("LOCATION", FIELD_LOCATION),
];

/// Trim, drop a leading BOM, and upper-case a raw header for alias lookup.
pub fn normalize_header(raw: &str) -> String {
    strip_bom(raw.trim()).trim().to_uppercase()
}

/// Canonical field of a known header variant, or `None` for pass-through headers.
pub fn resolve_alias(raw: &str) -> Option<&'static str> {
    let normalized = normalize_header(raw);
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| *canonical)
}

/// Map a raw header name to its canonical field name.
pub fn map_column(raw: &str) -> FieldName {
    match resolve_alias(raw) {
        Some(canonical) => canonical.to_string(),
        None => normalize_header(raw).to_lowercase(),
    }
}

fn is_canonical_field(name: &str) -> bool {
    ALIASES.iter().any(|(_, canonical)| *canonical == name)
}

/// One header position after mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSlot {
    /// Header text as it appeared in the input (trimmed).
    pub original: String,
    /// Canonical field name from [`map_column`].
    pub canonical: FieldName,
    /// `true` when the header matched the alias table.
    pub aliased: bool,
    /// Unique key used for this position in row field maps.
    ///
    /// Equals `canonical` for the first aliased occurrence of a field and for
    /// pass-through headers that do not shadow a canonical field. Everything
    /// else gets a `_<position>` suffix (1-based column index), so no column
    /// is lost and an unknown `ID` header never takes the `id` key.
    pub key: FieldName,
}

/// Positional view of a mapped header row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnLayout {
    slots: Vec<ColumnSlot>,
}

impl ColumnLayout {
    /// Build a layout from raw header cells.
    pub fn from_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut slots: Vec<ColumnSlot> = headers
            .into_iter()
            .map(|header| {
                let original = strip_bom(header.as_ref().trim()).trim().to_string();
                let alias = resolve_alias(&original);
                ColumnSlot {
                    canonical: alias
                        .map(str::to_string)
                        .unwrap_or_else(|| normalize_header(&original).to_lowercase()),
                    aliased: alias.is_some(),
                    key: FieldName::new(),
                    original,
                }
            })
            .collect();

        // Aliased headers claim their canonical key before pass-through ones.
        let mut taken: Vec<FieldName> = Vec::with_capacity(slots.len());
        for pass in [true, false] {
            for (idx, slot) in slots.iter_mut().enumerate() {
                if slot.aliased != pass {
                    continue;
                }
                let shadows = !slot.aliased && is_canonical_field(&slot.canonical);
                slot.key = if shadows || taken.contains(&slot.canonical) {
                    format!("{}_{}", slot.canonical, idx + 1)
                } else {
                    slot.canonical.clone()
                };
                taken.push(slot.key.clone());
            }
        }
        Self { slots }
    }

    /// Number of header positions.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when the header row had no cells.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All header positions in order.
    pub fn slots(&self) -> &[ColumnSlot] {
        &self.slots
    }

    /// Position of the column keyed as `field`.
    ///
    /// Only aliased headers hold canonical keys, so `position("id")` finds the
    /// `IMEI` column and nothing else.
    pub fn position(&self, field: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.key == field)
    }

    /// Canonical names in header order (duplicates kept).
    pub fn canonical_names(&self) -> Vec<FieldName> {
        self.slots.iter().map(|slot| slot.canonical.clone()).collect()
    }

    /// Upper-cased header names, as reported when the id column is missing.
    pub fn normalized_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| normalize_header(&slot.original))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_aliases_resolve_case_and_whitespace_insensitively() {
        assert_eq!(map_column(" imei "), "id");
        assert_eq!(map_column("Modelo"), "model");
        assert_eq!(map_column("observação"), "note");
        assert_eq!(map_column("OBSERVACAO"), "note");
        assert_eq!(map_column("obs"), "note");
        assert_eq!(map_column("Tipo Ativo"), "asset_type");
        assert_eq!(map_column("empresa"), "owner_org");
        assert_eq!(map_column("Chamado"), "ticket_number");
        assert_eq!(map_column("NUMERO CHAMADO"), "ticket_number");
        assert_eq!(map_column("Localização"), "location");
        assert_eq!(map_column("local"), "location");
    }

    #[test]
    fn unmapped_headers_pass_through_lowercased() {
        assert_eq!(map_column("  Serial Number "), "serial number");
        assert_eq!(map_column(""), "");
        assert_eq!(map_column("\u{feff}Imei"), "id");
    }

    #[test]
    fn mapping_is_stable_across_calls() {
        for header in ["IMEI", "Região", "  x  ", "LOCAL", "ÇÃO"] {
            assert_eq!(map_column(header), map_column(header));
        }
    }

    #[test]
    fn layout_keeps_duplicate_headers_as_distinct_positions() {
        let layout = ColumnLayout::from_headers(["IMEI", "OBS", "Observação", "obs"]);
        let keys: Vec<&str> = layout.slots().iter().map(|slot| slot.key.as_str()).collect();
        assert_eq!(keys, vec!["id", "note", "note_3", "note_4"]);
        assert_eq!(layout.position("note"), Some(1));
        assert_eq!(
            layout.canonical_names(),
            vec!["id", "note", "note", "note"]
        );
    }

    #[test]
    fn pass_through_headers_never_take_canonical_keys() {
        let layout = ColumnLayout::from_headers(["ID", "IMEI", "Status", "status ", "Extra"]);
        let keys: Vec<&str> = layout.slots().iter().map(|slot| slot.key.as_str()).collect();
        assert_eq!(keys, vec!["id_1", "id", "status", "status_4", "extra"]);
        assert_eq!(layout.position("id"), Some(1));
        assert!(!layout.slots()[0].aliased);
        assert!(layout.slots()[1].aliased);

        let without_imei = ColumnLayout::from_headers(["ID", "MODELO"]);
        assert_eq!(without_imei.position("id"), None);
        assert_eq!(resolve_alias("id"), None);
        assert_eq!(resolve_alias(" imei"), Some("id"));
    }

    #[test]
    fn normalized_names_are_upper_case() {
        let layout = ColumnLayout::from_headers(["modelo", " status "]);
        assert_eq!(layout.normalized_names(), vec!["MODELO", "STATUS"]);
    }
}
