//! Shared SQL conventions for the persistence gateway.
//!
//! Every store function takes an executor generic over [`sqlx::PgExecutor`]
//! so it runs identically against the pool or a live transaction. Error
//! translation is centralised here: unique violations become
//! `DuplicateEntry`, missing rows become `NotFound`, everything else
//! propagates as `Database` with the operation name attached.

use super::errors::StoreError;

/// Sort keys accepted by filtered list operations. Anything else falls back
/// to `created_at DESC`.
pub const SORT_KEY_ALLOWLIST: &[&str] = &[
    "created_at",
    "name",
    "phase_status",
    "updated_at",
    "overall_progress",
    "current_phase",
];

/// Sort direction for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Normalise a caller-provided sort key against the allow-list.
///
/// Invalid keys fall back to `created_at` with descending order so a bad
/// query parameter can never inject SQL or change semantics silently.
pub fn sanitize_sort(key: &str, direction: SortDirection) -> (&'static str, SortDirection) {
    for allowed in SORT_KEY_ALLOWLIST {
        if *allowed == key {
            return (allowed, direction);
        }
    }
    ("created_at", SortDirection::Desc)
}

/// Attach an operation name to a translated sqlx error.
///
/// `RowNotFound` and unique violations keep their typed variants; other
/// database errors gain context naming the failed operation.
pub fn translate_err(operation: &str, err: sqlx::Error) -> StoreError {
    match StoreError::from(err) {
        StoreError::Database(msg) => StoreError::Database(format!("{operation}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_sort_keys_pass_through() {
        let (key, dir) = sanitize_sort("name", SortDirection::Asc);
        assert_eq!(key, "name");
        assert_eq!(dir, SortDirection::Asc);

        let (key, _) = sanitize_sort("overall_progress", SortDirection::Desc);
        assert_eq!(key, "overall_progress");
    }

    #[test]
    fn invalid_sort_key_falls_back_to_created_at_desc() {
        let (key, dir) = sanitize_sort("1; DROP TABLE campaigns", SortDirection::Asc);
        assert_eq!(key, "created_at");
        assert_eq!(dir, SortDirection::Desc);
    }

    #[test]
    fn translate_preserves_typed_variants() {
        let err = translate_err("campaigns.get", sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
