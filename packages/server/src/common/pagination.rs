//! Cursor-based pagination for large result sets.
//!
//! Cursors are opaque, URL-safe base64 strings carrying the sort position of
//! the last row returned: always `(id, timestamp)`, plus the name or offset
//! component when the sort key needs it. Pages fetch `limit + 1` rows; the
//! sentinel row determines `has_next_page` and is stripped before return.
//!
//! The cursor comparison is strictly ordered with the row id as the
//! deterministic tiebreaker:
//!
//! ```text
//! (sort_key < s) OR (sort_key = s AND id < i)     -- descending
//! ```
//!
//! mirrored for ascending.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::StoreError;

/// Decoded cursor payload.
///
/// `ts` is always present; `name` and `offset` are carried only when the
/// page was sorted by them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl Cursor {
    /// Cursor positioned by `(timestamp, id)`.
    pub fn by_time(id: Uuid, ts: DateTime<Utc>) -> Self {
        Self {
            id,
            ts,
            name: None,
            offset: None,
        }
    }

    /// Cursor positioned by `(name, id)`.
    pub fn by_name(id: Uuid, ts: DateTime<Utc>, name: impl Into<String>) -> Self {
        Self {
            id,
            ts,
            name: Some(name.into()),
            offset: None,
        }
    }

    /// Cursor positioned by `(offset_index, id)`.
    pub fn by_offset(id: Uuid, ts: DateTime<Utc>, offset: i64) -> Self {
        Self {
            id,
            ts,
            name: None,
            offset: Some(offset),
        }
    }

    /// Encode as a URL-safe base64 string.
    pub fn encode(&self) -> String {
        // Serialization of a plain struct cannot fail.
        let json = serde_json::to_vec(self).expect("cursor serialization");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a cursor string. Malformed input is a validation error, not a
    /// database error: cursors come straight from callers.
    pub fn decode(s: &str) -> Result<Self, StoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| StoreError::validation("cursor", "invalid", "not valid base64"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| StoreError::validation("cursor", "invalid", "not a valid cursor payload"))
    }
}

/// A page of rows plus continuation state.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_next_page: false,
            end_cursor: None,
        }
    }
}

/// Trim a `limit + 1` fetch down to the page and compute continuation.
///
/// `make_cursor` builds the end cursor from the last row kept.
pub fn trim_page<T>(
    mut rows: Vec<T>,
    limit: usize,
    make_cursor: impl Fn(&T) -> Cursor,
) -> Page<T> {
    let has_next_page = rows.len() > limit;
    if has_next_page {
        rows.truncate(limit);
    }
    let end_cursor = rows.last().map(|row| make_cursor(row).encode());
    Page {
        items: rows,
        has_next_page,
        end_cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn cursor_roundtrip_by_time() {
        let cursor = Cursor::by_time(Uuid::new_v4(), sample_ts());
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn cursor_roundtrip_carries_name() {
        let cursor = Cursor::by_name(Uuid::new_v4(), sample_ts(), "example.com");
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.name.as_deref(), Some("example.com"));
        assert!(decoded.offset.is_none());
    }

    #[test]
    fn cursor_roundtrip_carries_offset() {
        let cursor = Cursor::by_offset(Uuid::new_v4(), sample_ts(), 4210);
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.offset, Some(4210));
    }

    #[test]
    fn tampered_cursor_is_a_validation_error() {
        let err = Cursor::decode("not-base64!!").unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));

        // Valid base64 of garbage bytes is still rejected.
        let garbage = URL_SAFE_NO_PAD.encode(b"{\"id\": 12}");
        let err = Cursor::decode(&garbage).unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }

    #[test]
    fn trim_page_strips_the_sentinel_row() {
        let rows: Vec<i64> = (0..11).collect();
        let page = trim_page(rows, 10, |n| {
            Cursor::by_offset(Uuid::nil(), sample_ts(), *n)
        });
        assert_eq!(page.items.len(), 10);
        assert!(page.has_next_page);
        let end = Cursor::decode(page.end_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(end.offset, Some(9));
    }

    #[test]
    fn trim_page_short_page_has_no_next() {
        let rows: Vec<i64> = (0..4).collect();
        let page = trim_page(rows, 10, |n| {
            Cursor::by_offset(Uuid::nil(), sample_ts(), *n)
        });
        assert_eq!(page.items.len(), 4);
        assert!(!page.has_next_page);
    }

    #[test]
    fn empty_page_has_no_cursor() {
        let page: Page<i64> = trim_page(Vec::new(), 10, |_| {
            Cursor::by_time(Uuid::nil(), sample_ts())
        });
        assert!(page.items.is_empty());
        assert!(page.end_cursor.is_none());
        assert!(!page.has_next_page);
    }
}
