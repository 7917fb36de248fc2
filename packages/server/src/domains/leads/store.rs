//! Bulk operations and listings over generated domains.
//!
//! The DNS/HTTP bulk status update is a single statement joining the
//! incoming tuples (via UNNEST) against the domain table. Its
//! `rejection_reason` CASE implements the preservation rules:
//!
//! - `timeout` promotes to `<phase>_timeout`, `error` to `<phase>_error`;
//! - `ok`/`pending` preserve whatever reason is already there, so the
//!   enrichment classifications (`qualified`, `low_score`, ...) survive a
//!   later successful probe;
//! - an existing `<phase>_error` is never downgraded by a mere timeout.

use std::collections::HashMap;

use sqlx::PgExecutor;
use tracing::warn;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::model::{
    AnalysisUpdate, DomainStatusUpdate, GeneratedDomain, NewGeneratedDomain, RejectionReason,
    ValidationCheck, ValidationState, DOMAIN_COLUMNS,
};
use crate::common::{translate_err, trim_page, Cursor, Page, SortDirection, StoreError};

/// Insert a batch of freshly generated domains.
///
/// Conflicting rows (a retried generation job replaying its batch) are
/// skipped, keeping the operation idempotent. Returns the number inserted.
pub async fn bulk_insert<'e, E: PgExecutor<'e>>(
    campaign_id: Uuid,
    domains: &[NewGeneratedDomain],
    db: E,
) -> Result<u64, StoreError> {
    if domains.is_empty() {
        return Ok(0);
    }
    let names: Vec<String> = domains.iter().map(|d| d.domain_name.clone()).collect();
    let offsets: Vec<i64> = domains.iter().map(|d| d.offset_index).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO generated_domains (id, campaign_id, domain_name, offset_index, created_at, updated_at)
        SELECT gen_random_uuid(), $1, t.domain_name, t.offset_index, NOW(), NOW()
        FROM UNNEST($2::text[], $3::bigint[]) AS t(domain_name, offset_index)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(campaign_id)
    .bind(&names)
    .bind(&offsets)
    .execute(db)
    .await
    .map_err(|e| translate_err("generated_domains.bulk_insert", e))?;

    Ok(result.rows_affected())
}

/// Bulk DNS/HTTP status update over the incoming tuples.
///
/// One statement; the normative `rejection_reason` CASE lives here. Returns
/// the number of domain rows touched.
pub async fn bulk_update_validation_status<'e, E: PgExecutor<'e>>(
    campaign_id: Uuid,
    check: ValidationCheck,
    updates: &[DomainStatusUpdate],
    db: E,
) -> Result<u64, StoreError> {
    if updates.is_empty() {
        return Ok(0);
    }

    let names: Vec<String> = updates.iter().map(|u| u.domain_name.clone()).collect();
    let outcomes: Vec<String> = updates.iter().map(|u| u.outcome.as_str().to_string()).collect();
    let status_codes: Vec<Option<i32>> = updates.iter().map(|u| u.http_status_code).collect();
    let titles: Vec<Option<String>> = updates.iter().map(|u| u.page_title.clone()).collect();
    let checked: Vec<chrono::DateTime<chrono::Utc>> =
        updates.iter().map(|u| u.last_checked_at).collect();

    let sql = format!(
        r#"
        UPDATE generated_domains AS gd
        SET {status_column} = CASE
                WHEN v.outcome IN ('error', 'timeout') THEN 'error'::validation_state
                WHEN v.outcome = 'ok' THEN 'ok'::validation_state
                ELSE 'pending'::validation_state
            END,
            rejection_reason = CASE
                WHEN v.outcome = 'timeout' THEN
                    CASE WHEN gd.rejection_reason IN ('dns_error', 'http_error')
                         THEN gd.rejection_reason
                         ELSE '{timeout_reason}'::rejection_reason
                    END
                WHEN v.outcome = 'error' THEN '{error_reason}'::rejection_reason
                ELSE gd.rejection_reason
            END,
            http_status_code = COALESCE(v.http_status_code, gd.http_status_code),
            http_title = COALESCE(v.page_title, gd.http_title),
            last_checked_at = v.last_checked_at,
            updated_at = NOW()
        FROM (
            SELECT *
            FROM UNNEST($2::text[], $3::text[], $4::int4[], $5::text[], $6::timestamptz[])
                 AS t(domain_name, outcome, http_status_code, page_title, last_checked_at)
        ) AS v
        WHERE gd.campaign_id = $1 AND gd.domain_name = v.domain_name
        "#,
        status_column = check.status_column(),
        timeout_reason = check.timeout_reason(),
        error_reason = check.error_reason(),
    );

    let result = sqlx::query(&sql)
        .bind(campaign_id)
        .bind(&names)
        .bind(&outcomes)
        .bind(&status_codes)
        .bind(&titles)
        .bind(&checked)
        .execute(db)
        .await
        .map_err(|e| translate_err("generated_domains.bulk_update_validation_status", e))?;

    Ok(result.rows_affected())
}

/// Apply the analysis phase's lead classification in bulk.
///
/// Terminal probe errors already recorded on a row are never overwritten by
/// enrichment.
pub async fn apply_analysis_updates<'e, E: PgExecutor<'e>>(
    campaign_id: Uuid,
    updates: &[AnalysisUpdate],
    db: E,
) -> Result<u64, StoreError> {
    if updates.is_empty() {
        return Ok(0);
    }
    let names: Vec<String> = updates.iter().map(|u| u.domain_name.clone()).collect();
    let scores: Vec<f64> = updates.iter().map(|u| u.lead_score).collect();
    let statuses: Vec<String> = updates.iter().map(|u| u.lead_status.clone()).collect();
    let reasons: Vec<String> = updates
        .iter()
        .map(|u| u.rejection_reason.as_str().to_string())
        .collect();

    let result = sqlx::query(
        r#"
        UPDATE generated_domains AS gd
        SET lead_score = v.lead_score,
            lead_status = v.lead_status,
            rejection_reason = CASE
                WHEN gd.rejection_reason IN ('dns_error', 'dns_timeout', 'http_error', 'http_timeout')
                     THEN gd.rejection_reason
                ELSE v.rejection_reason::rejection_reason
            END,
            updated_at = NOW()
        FROM (
            SELECT *
            FROM UNNEST($2::text[], $3::float8[], $4::text[], $5::text[])
                 AS t(domain_name, lead_score, lead_status, rejection_reason)
        ) AS v
        WHERE gd.campaign_id = $1 AND gd.domain_name = v.domain_name
        "#,
    )
    .bind(campaign_id)
    .bind(&names)
    .bind(&scores)
    .bind(&statuses)
    .bind(&reasons)
    .execute(db)
    .await
    .map_err(|e| translate_err("generated_domains.apply_analysis_updates", e))?;

    Ok(result.rows_affected())
}

// ============================================================================
// Cursor-paginated listing
// ============================================================================

/// Sort keys for domain listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainSortKey {
    #[default]
    CreatedAt,
    DomainName,
    OffsetIndex,
}

/// Filter for cursor-paginated domain listings.
///
/// Status filters apply to `generated_domains` columns directly; there is no
/// join against any per-probe result table.
#[derive(Debug, Clone, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct DomainListFilter {
    pub dns_status: Option<ValidationState>,
    pub http_status: Option<ValidationState>,
    pub rejection_reason: Option<RejectionReason>,
    pub sort: DomainSortKey,
    pub direction: SortDirection,
    #[builder(default = 100)]
    pub limit: i64,
}

/// List a page of generated domains after an opaque cursor.
///
/// The comparison is strictly ordered with the row id as tiebreaker:
/// `(sort_key, id) < (s, i)` descending, mirrored ascending. Fetches
/// `limit + 1` rows; the sentinel determines `has_next_page`.
pub async fn list_with_cursor<'e, E: PgExecutor<'e>>(
    campaign_id: Uuid,
    filter: &DomainListFilter,
    cursor: Option<&str>,
    db: E,
) -> Result<Page<GeneratedDomain>, StoreError> {
    let cursor = cursor.map(Cursor::decode).transpose()?;

    // The cursor must carry the component the sort key compares on.
    if let Some(cursor) = &cursor {
        let matches = match filter.sort {
            DomainSortKey::CreatedAt => true,
            DomainSortKey::DomainName => cursor.name.is_some(),
            DomainSortKey::OffsetIndex => cursor.offset.is_some(),
        };
        if !matches {
            return Err(StoreError::validation(
                "cursor",
                "invalid",
                "cursor does not match the requested sort key",
            ));
        }
    }

    let mut conditions = vec!["campaign_id = $1".to_string()];
    let mut arg_index = 2u32;

    if filter.dns_status.is_some() {
        conditions.push(format!("dns_status = ${arg_index}"));
        arg_index += 1;
    }
    if filter.http_status.is_some() {
        conditions.push(format!("http_status = ${arg_index}"));
        arg_index += 1;
    }
    if filter.rejection_reason.is_some() {
        conditions.push(format!("rejection_reason = ${arg_index}"));
        arg_index += 1;
    }

    let sort_column = match filter.sort {
        DomainSortKey::CreatedAt => "created_at",
        DomainSortKey::DomainName => "domain_name",
        DomainSortKey::OffsetIndex => "offset_index",
    };
    let comparator = match filter.direction {
        SortDirection::Desc => "<",
        SortDirection::Asc => ">",
    };

    if cursor.is_some() {
        conditions.push(format!(
            "({sort_column}, id) {comparator} (${key_idx}, ${id_idx})",
            key_idx = arg_index,
            id_idx = arg_index + 1,
        ));
        arg_index += 2;
    }

    let sql = format!(
        "SELECT {DOMAIN_COLUMNS} FROM generated_domains WHERE {conditions} \
         ORDER BY {sort_column} {dir}, id {dir} LIMIT ${limit_idx}",
        conditions = conditions.join(" AND "),
        dir = filter.direction.as_sql(),
        limit_idx = arg_index,
    );

    let mut query = sqlx::query_as::<_, GeneratedDomain>(&sql).bind(campaign_id);
    if let Some(status) = filter.dns_status {
        query = query.bind(status);
    }
    if let Some(status) = filter.http_status {
        query = query.bind(status);
    }
    if let Some(reason) = filter.rejection_reason {
        query = query.bind(reason);
    }
    if let Some(cursor) = &cursor {
        match filter.sort {
            DomainSortKey::CreatedAt => query = query.bind(cursor.ts),
            DomainSortKey::DomainName => query = query.bind(cursor.name.clone()),
            DomainSortKey::OffsetIndex => query = query.bind(cursor.offset),
        }
        query = query.bind(cursor.id);
    }
    query = query.bind(filter.limit + 1);

    let rows = query
        .fetch_all(db)
        .await
        .map_err(|e| translate_err("generated_domains.list_with_cursor", e))?;

    let sort = filter.sort;
    Ok(trim_page(rows, filter.limit as usize, move |row| match sort {
        DomainSortKey::CreatedAt => Cursor::by_time(row.id, row.created_at),
        DomainSortKey::DomainName => Cursor::by_name(row.id, row.created_at, &row.domain_name),
        DomainSortKey::OffsetIndex => Cursor::by_offset(row.id, row.created_at, row.offset_index),
    }))
}

// ============================================================================
// Rejection summary
// ============================================================================

/// Read-only aggregate of rejection reasons for a campaign.
#[derive(Debug, Clone)]
pub struct RejectionSummary {
    /// Count per rejection reason (stored reasons only).
    pub counts: HashMap<RejectionReason, i64>,
    /// Every domain row for the campaign.
    pub analyzed_total: i64,
    pub qualified_total: i64,
    /// Non-null reasons other than `qualified`.
    pub rejected_total: i64,
    /// Rows with no rejection reason recorded.
    pub null_count: i64,
    /// `analyzed_total == qualified_total + rejected_total`.
    pub balanced: bool,
    /// Audit note naming the discrepancy when unbalanced.
    pub note: Option<String>,
}

/// Aggregate rejection reasons for a campaign. Never mutates data.
pub async fn rejection_summary<'e, E: PgExecutor<'e>>(
    campaign_id: Uuid,
    db: E,
) -> Result<RejectionSummary, StoreError> {
    let rows: Vec<(Option<RejectionReason>, i64)> = sqlx::query_as(
        r#"
        SELECT rejection_reason, COUNT(*)
        FROM generated_domains
        WHERE campaign_id = $1
        GROUP BY rejection_reason
        "#,
    )
    .bind(campaign_id)
    .fetch_all(db)
    .await
    .map_err(|e| translate_err("generated_domains.rejection_summary", e))?;

    let mut counts = HashMap::new();
    let mut null_count = 0i64;
    let mut analyzed_total = 0i64;
    for (reason, count) in rows {
        analyzed_total += count;
        match reason {
            Some(reason) => {
                counts.insert(reason, count);
            }
            None => null_count += count,
        }
    }

    let qualified_total = counts.get(&RejectionReason::Qualified).copied().unwrap_or(0);
    let rejected_total = analyzed_total - qualified_total - null_count;
    let balanced = null_count == 0;
    let note = if balanced {
        None
    } else {
        let note = format!(
            "{null_count} of {analyzed_total} domains have no rejection reason recorded"
        );
        warn!(campaign_id = %campaign_id, %note, "rejection summary unbalanced");
        Some(note)
    };

    Ok(RejectionSummary {
        counts,
        analyzed_total,
        qualified_total,
        rejected_total,
        null_count,
        balanced,
        note,
    })
}
