//! Keyword-set registry.
//!
//! Keyword sets drive the HTTP/keyword validation phase: each set carries
//! rules matched against fetched page content. Sets are unique on `name`;
//! deleting a set cascades to its rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{translate_err, StoreError};

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct KeywordSet {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub name: String,
    #[builder(default, setter(strip_option))]
    pub description: Option<String>,
    #[builder(default = true)]
    pub is_active: bool,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct KeywordRule {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub keyword_set_id: Uuid,
    pub pattern: String,
    /// "contains" or "regex".
    #[builder(default = "contains".to_string())]
    pub rule_type: String,
    #[builder(default = 1.0)]
    pub weight: f64,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl KeywordSet {
    pub async fn insert<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO keyword_sets (id, name, description, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, description, is_active, created_at, updated_at
            "#,
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.description)
        .bind(self.is_active)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("keyword_sets.insert", e))
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(
            "SELECT id, name, description, is_active, created_at, updated_at \
             FROM keyword_sets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("keyword_sets.find_by_id", e))?
        .ok_or_else(|| StoreError::not_found("keyword set", id))
    }

    pub async fn list_active<'e, E: PgExecutor<'e>>(db: E) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(
            "SELECT id, name, description, is_active, created_at, updated_at \
             FROM keyword_sets WHERE is_active ORDER BY name ASC",
        )
        .fetch_all(db)
        .await
        .map_err(|e| translate_err("keyword_sets.list_active", e))
    }

    pub async fn rules<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Vec<KeywordRule>, StoreError> {
        sqlx::query_as::<_, KeywordRule>(
            "SELECT id, keyword_set_id, pattern, rule_type, weight, created_at \
             FROM keyword_rules WHERE keyword_set_id = $1 ORDER BY weight DESC, pattern ASC",
        )
        .bind(self.id)
        .fetch_all(db)
        .await
        .map_err(|e| translate_err("keyword_rules.list", e))
    }

    /// Delete the set; rules go with it (FK cascade).
    pub async fn delete<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM keyword_sets WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .map_err(|e| translate_err("keyword_sets.delete", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("keyword set", id));
        }
        Ok(())
    }
}

impl KeywordRule {
    pub async fn insert<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO keyword_rules (id, keyword_set_id, pattern, rule_type, weight, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, keyword_set_id, pattern, rule_type, weight, created_at
            "#,
        )
        .bind(self.id)
        .bind(self.keyword_set_id)
        .bind(&self.pattern)
        .bind(&self.rule_type)
        .bind(self.weight)
        .bind(self.created_at)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("keyword_rules.insert", e))
    }

    pub async fn delete<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM keyword_rules WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .map_err(|e| translate_err("keyword_rules.delete", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("keyword rule", id));
        }
        Ok(())
    }
}
