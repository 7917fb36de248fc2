// Common types and utilities shared across the application

pub mod errors;
pub mod pagination;
pub mod sql;

pub use errors::StoreError;
pub use pagination::{trim_page, Cursor, Page};
pub use sql::{sanitize_sort, translate_err, SortDirection, SORT_KEY_ALLOWLIST};
