//! Text normalization helpers shared by the grouper, mapper, and reconciler.

/// Byte-order mark as it appears after decoding.
const BOM: char = '\u{feff}';

/// Strip a leading byte-order mark, if present.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix(BOM).unwrap_or(text)
}

/// Trim a value and return it only when something remains.
pub fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Returns `true` when every value is empty after trimming.
pub fn all_blank<I, S>(values: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values.into_iter().all(|value| value.as_ref().trim().is_empty())
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_bom_only_removes_leading_mark() {
        assert_eq!(strip_bom("\u{feff}IMEI"), "IMEI");
        assert_eq!(strip_bom("IMEI\u{feff}"), "IMEI\u{feff}");
    }

    #[test]
    fn non_blank_trims_and_filters() {
        assert_eq!(non_blank("  x "), Some("x"));
        assert_eq!(non_blank(" \t"), None);
    }

    #[test]
    fn truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("observação", 9), "observaçã");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
