//! Parsing of rows produced by `copy ... to stdout` in text format.
//!
//! Postgres emits one line per row: columns separated by tabs, the line terminated by a
//! newline, `\N` for NULL and backslash escapes for special characters. See `CopyAttributeOutText`
//! in `src/backend/commands/copyto.c` for the producing side.

use std::str;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::types::TableRow;

/// Parses a single COPY text row into a [`TableRow`].
///
/// Values are unescaped but otherwise kept exactly as rendered by the source, so that the
/// destination parses them back with the same input functions.
pub fn parse_copy_text_row(row: &[u8]) -> MirrorResult<TableRow> {
    let row = str::from_utf8(row)?;
    let Some(row) = row.strip_suffix('\n') else {
        bail!(
            ErrorKind::ConversionError,
            "The row is not terminated",
            format!("row of {} bytes does not end with a newline", row.len())
        );
    };

    let mut values = Vec::new();
    let mut value = String::new();
    // Set only by an unescaped `\N` spanning the whole column.
    let mut is_null = false;
    let mut chars = row.chars();

    loop {
        match chars.next() {
            None => {
                values.push(finish_value(&mut value, &mut is_null));
                break;
            }
            Some('\t') => {
                values.push(finish_value(&mut value, &mut is_null));
            }
            Some(_) if is_null => {
                bail!(
                    ErrorKind::ConversionError,
                    "Unexpected data after NULL marker",
                    format!("column {} continues after `\\N`", values.len() + 1)
                );
            }
            Some('\\') => {
                let Some(escaped) = chars.next() else {
                    bail!(
                        ErrorKind::ConversionError,
                        "The row ends with an incomplete escape sequence"
                    );
                };

                match escaped {
                    'N' if value.is_empty() => is_null = true,
                    'b' => value.push('\u{8}'),
                    'f' => value.push('\u{c}'),
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    'v' => value.push('\u{b}'),
                    other => value.push(other),
                }
            }
            Some(c) => value.push(c),
        }
    }

    Ok(TableRow::new(values))
}

fn finish_value(value: &mut String, is_null: &mut bool) -> Option<String> {
    if std::mem::take(is_null) {
        None
    } else {
        Some(std::mem::take(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(row: &[u8]) -> Vec<Option<String>> {
        parse_copy_text_row(row).unwrap().into_values()
    }

    #[test]
    fn splits_columns_on_tabs() {
        assert_eq!(
            values(b"1\talice\t2024-01-01 10:00:00+00\n"),
            vec![
                Some("1".to_string()),
                Some("alice".to_string()),
                Some("2024-01-01 10:00:00+00".to_string()),
            ]
        );
    }

    #[test]
    fn distinguishes_null_from_escaped_backslash_n() {
        assert_eq!(
            values(b"\\N\t\\\\N\t\n"),
            vec![None, Some("\\N".to_string()), Some(String::new())]
        );
    }

    #[test]
    fn unescapes_control_characters() {
        assert_eq!(
            values(b"a\\tb\\nc\\rd\\\\e\\bf\\fg\\vh\n"),
            vec![Some("a\tb\nc\rd\\e\u{8}f\u{c}g\u{b}h".to_string())]
        );
    }

    #[test]
    fn keeps_utf8_values_untouched() {
        assert_eq!(
            values("zürich\t{\"k\": \"v\"}\n".as_bytes()),
            vec![Some("zürich".to_string()), Some("{\"k\": \"v\"}".to_string())]
        );
    }

    #[test]
    fn rejects_unterminated_row() {
        let err = parse_copy_text_row(b"1\talice").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn rejects_data_after_null_marker() {
        let err = parse_copy_text_row(b"\\Nx\n").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = parse_copy_text_row(&[0xff, b'\n']).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }
}
