//! Persona registry.
//!
//! Personas describe the browsing identity the validation phases present
//! (user agents, headers, timing). Uniqueness is on `(name, persona_type)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{translate_err, StoreError};

const PERSONA_COLUMNS: &str =
    "id, name, persona_type, description, config, is_active, created_at, updated_at";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Persona {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub name: String,
    /// "dns" or "http".
    pub persona_type: String,
    #[builder(default, setter(strip_option))]
    pub description: Option<String>,
    #[builder(default, setter(strip_option))]
    pub config: Option<serde_json::Value>,
    #[builder(default = true)]
    pub is_active: bool,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Persona {
    pub async fn insert<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO personas (id, name, persona_type, description, config, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PERSONA_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.persona_type)
        .bind(&self.description)
        .bind(&self.config)
        .bind(self.is_active)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("personas.insert", e))
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {PERSONA_COLUMNS} FROM personas WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("personas.find_by_id", e))?
        .ok_or_else(|| StoreError::not_found("persona", id))
    }

    /// Active personas of a type, name order.
    pub async fn list_active<'e, E: PgExecutor<'e>>(
        persona_type: &str,
        db: E,
    ) -> Result<Vec<Self>, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {PERSONA_COLUMNS} FROM personas \
             WHERE persona_type = $1 AND is_active ORDER BY name ASC"
        ))
        .bind(persona_type)
        .fetch_all(db)
        .await
        .map_err(|e| translate_err("personas.list_active", e))
    }

    pub async fn update<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE personas
            SET name = $2, persona_type = $3, description = $4, config = $5,
                is_active = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING {PERSONA_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.persona_type)
        .bind(&self.description)
        .bind(&self.config)
        .bind(self.is_active)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("personas.update", e))?
        .ok_or_else(|| StoreError::not_found("persona", self.id))
    }

    pub async fn delete<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM personas WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .map_err(|e| translate_err("personas.delete", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("persona", id));
        }
        Ok(())
    }
}
