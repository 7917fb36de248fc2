//! Campaign persistence operations.
//!
//! All writes that must serialise within a campaign go through the row lock
//! taken by [`Campaign::find_by_id_for_update`] inside a managed transaction;
//! the plain operations here behave identically under the pool or a live
//! transaction handle.

use sqlx::{PgExecutor, Postgres, Transaction};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::model::{Campaign, CampaignPhase, PhaseStatus, CAMPAIGN_COLUMNS};
use crate::common::{sanitize_sort, translate_err, SortDirection, StoreError};

/// Filter for campaign listings.
#[derive(Debug, Clone, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct CampaignFilter {
    pub user_id: Option<Uuid>,
    pub phase_status: Option<PhaseStatus>,
    pub current_phase: Option<CampaignPhase>,
    pub name_contains: Option<String>,
    #[builder(default = "created_at".to_string())]
    pub sort_key: String,
    pub sort_direction: SortDirection,
    #[builder(default = 50)]
    pub limit: i64,
    #[builder(default = 0)]
    pub offset: i64,
}

/// List campaigns matching a filter.
///
/// SQL is built dynamically with positional placeholders; the sort key is
/// checked against the allow-list, falling back to `created_at DESC`.
/// `overall_progress` sorts on the stored `progress_percentage`.
pub async fn list<'e, E: PgExecutor<'e>>(
    filter: &CampaignFilter,
    db: E,
) -> Result<Vec<Campaign>, StoreError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut arg_index = 1u32;

    if filter.user_id.is_some() {
        conditions.push(format!("user_id = ${arg_index}"));
        arg_index += 1;
    }
    if filter.phase_status.is_some() {
        conditions.push(format!("phase_status = ${arg_index}"));
        arg_index += 1;
    }
    if filter.current_phase.is_some() {
        conditions.push(format!("current_phase = ${arg_index}"));
        arg_index += 1;
    }
    if filter.name_contains.is_some() {
        conditions.push(format!("name ILIKE ${arg_index}"));
        arg_index += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let (sort_key, direction) = sanitize_sort(&filter.sort_key, filter.sort_direction);
    let sort_column = if sort_key == "overall_progress" {
        "progress_percentage"
    } else {
        sort_key
    };

    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns {where_clause} \
         ORDER BY {sort_column} {dir}, id DESC LIMIT ${limit_idx} OFFSET ${offset_idx}",
        dir = direction.as_sql(),
        limit_idx = arg_index,
        offset_idx = arg_index + 1,
    );

    let mut query = sqlx::query_as::<_, Campaign>(&sql);
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    if let Some(status) = filter.phase_status {
        query = query.bind(status);
    }
    if let Some(phase) = filter.current_phase {
        query = query.bind(phase);
    }
    if let Some(name) = &filter.name_contains {
        query = query.bind(format!("%{name}%"));
    }
    query = query.bind(filter.limit).bind(filter.offset);

    query
        .fetch_all(db)
        .await
        .map_err(|e| translate_err("campaigns.list", e))
}

/// Update the campaign name.
pub async fn rename<'e, E: PgExecutor<'e>>(
    id: Uuid,
    name: &str,
    db: E,
) -> Result<Campaign, StoreError> {
    sqlx::query_as::<_, Campaign>(&format!(
        "UPDATE campaigns SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING {CAMPAIGN_COLUMNS}"
    ))
    .bind(id)
    .bind(name)
    .fetch_optional(db)
    .await
    .map_err(|e| translate_err("campaigns.rename", e))?
    .ok_or_else(|| StoreError::not_found("campaign", id))
}

/// Apply a control-plane status transition.
///
/// Bumps the per-campaign command sequence; `mark_started` stamps
/// `started_at` on the first start.
pub async fn apply_control_transition<'e, E: PgExecutor<'e>>(
    id: Uuid,
    new_status: PhaseStatus,
    mark_started: bool,
    db: E,
) -> Result<Campaign, StoreError> {
    sqlx::query_as::<_, Campaign>(&format!(
        r#"
        UPDATE campaigns
        SET phase_status = $2,
            sequence_number = sequence_number + 1,
            started_at = CASE WHEN $3 AND started_at IS NULL THEN NOW() ELSE started_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {CAMPAIGN_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(new_status)
    .bind(mark_started)
    .fetch_optional(db)
    .await
    .map_err(|e| translate_err("campaigns.apply_control_transition", e))?
    .ok_or_else(|| StoreError::not_found("campaign", id))
}

/// Atomic progress write.
///
/// Monotone in `processed_items`, percentage computed server-side and
/// clamped to [0, 100]; lifts `phase_status` to `in_progress` unless it is
/// already terminal. Callers hold the campaign row lock.
pub async fn update_progress<'e, E: PgExecutor<'e>>(
    id: Uuid,
    processed_items: i64,
    total_items: i64,
    db: E,
) -> Result<Campaign, StoreError> {
    sqlx::query_as::<_, Campaign>(&format!(
        r#"
        UPDATE campaigns
        SET processed_items = GREATEST(processed_items, $2),
            total_items = $3,
            progress_percentage = LEAST(100.0, GREATEST(0.0,
                CASE WHEN $3 > 0
                     THEN GREATEST(processed_items, $2)::float8 * 100.0 / $3::float8
                     ELSE 0.0
                END)),
            phase_status = CASE
                WHEN phase_status IN ('completed', 'failed', 'cancelled') THEN phase_status
                ELSE 'in_progress'::phase_status
            END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {CAMPAIGN_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(processed_items)
    .bind(total_items)
    .fetch_optional(db)
    .await
    .map_err(|e| translate_err("campaigns.update_progress", e))?
    .ok_or_else(|| StoreError::not_found("campaign", id))
}

/// Store a phase's aggregate result blob.
///
/// The blob is opaque at this boundary; only phase executors parse it.
pub async fn set_phase_aggregate<'e, E: PgExecutor<'e>>(
    id: Uuid,
    phase: CampaignPhase,
    aggregate: &serde_json::Value,
    db: E,
) -> Result<(), StoreError> {
    let sql = match phase {
        CampaignPhase::DomainGeneration => {
            "UPDATE campaigns SET domains_data = $2, updated_at = NOW() WHERE id = $1"
        }
        CampaignPhase::DnsValidation => {
            "UPDATE campaigns SET dns_results = $2, updated_at = NOW() WHERE id = $1"
        }
        CampaignPhase::HttpValidation => {
            "UPDATE campaigns SET http_results = $2, updated_at = NOW() WHERE id = $1"
        }
        CampaignPhase::Analysis => {
            "UPDATE campaigns SET analysis_results = $2, updated_at = NOW() WHERE id = $1"
        }
    };
    let result = sqlx::query(sql)
        .bind(id)
        .bind(aggregate)
        .execute(db)
        .await
        .map_err(|e| translate_err("campaigns.set_phase_aggregate", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("campaign", id));
    }
    Ok(())
}

/// Advance to the next phase, resetting the progress counters for the new
/// phase run (the explicit reset transition).
pub async fn advance_phase<'e, E: PgExecutor<'e>>(
    id: Uuid,
    next_phase: CampaignPhase,
    db: E,
) -> Result<Campaign, StoreError> {
    sqlx::query_as::<_, Campaign>(&format!(
        r#"
        UPDATE campaigns
        SET current_phase = $2,
            phase_status = 'in_progress',
            processed_items = 0,
            total_items = 0,
            progress_percentage = 0.0,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {CAMPAIGN_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(next_phase)
    .fetch_optional(db)
    .await
    .map_err(|e| translate_err("campaigns.advance_phase", e))?
    .ok_or_else(|| StoreError::not_found("campaign", id))
}

/// Mark the campaign's active phase with a terminal status. Completion of
/// the last phase stamps `completed_at`.
pub async fn finish_phase<'e, E: PgExecutor<'e>>(
    id: Uuid,
    status: PhaseStatus,
    campaign_done: bool,
    db: E,
) -> Result<Campaign, StoreError> {
    sqlx::query_as::<_, Campaign>(&format!(
        r#"
        UPDATE campaigns
        SET phase_status = $2,
            completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {CAMPAIGN_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status)
    .bind(campaign_done)
    .fetch_optional(db)
    .await
    .map_err(|e| translate_err("campaigns.finish_phase", e))?
    .ok_or_else(|| StoreError::not_found("campaign", id))
}

/// Cascading delete in FK order: generated domains and jobs first, then the
/// campaign row. Runs on the caller's transaction.
pub async fn delete_cascade(
    id: Uuid,
    tx: &mut Transaction<'static, Postgres>,
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM generated_domains WHERE campaign_id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| translate_err("campaigns.delete_cascade.domains", e))?;

    sqlx::query("DELETE FROM campaign_jobs WHERE campaign_id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| translate_err("campaigns.delete_cascade.jobs", e))?;

    let result = sqlx::query("DELETE FROM campaigns WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| translate_err("campaigns.delete_cascade.campaign", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("campaign", id));
    }
    Ok(())
}
