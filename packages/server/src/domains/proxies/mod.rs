//! Proxy and proxy-pool registries.
//!
//! Proxies are unique on `address`. Pool membership is a weighted
//! many-to-many with an `is_active` flag; deleting a pool removes its
//! memberships, while deleting a proxy still referenced by a membership is
//! refused by the foreign key and surfaces as a validation error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::{translate_err, StoreError};

const PROXY_COLUMNS: &str =
    "id, name, address, protocol, username, is_active, created_at, updated_at";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Proxy {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub name: String,
    /// host:port, unique across the registry.
    pub address: String,
    #[builder(default = "http".to_string())]
    pub protocol: String,
    #[builder(default, setter(strip_option))]
    pub username: Option<String>,
    #[builder(default = true)]
    pub is_active: bool,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ProxyPool {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub name: String,
    #[builder(default, setter(strip_option))]
    pub description: Option<String>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

/// A proxy's membership in a pool, with its scheduling weight.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ProxyPoolMembership {
    pub proxy_pool_id: Uuid,
    pub proxy_id: Uuid,
    pub weight: i32,
    pub is_active: bool,
}

impl Proxy {
    pub async fn insert<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO proxies (id, name, address, protocol, username, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PROXY_COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.address)
        .bind(&self.protocol)
        .bind(&self.username)
        .bind(self.is_active)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("proxies.insert", e))
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(&format!("SELECT {PROXY_COLUMNS} FROM proxies WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
            .map_err(|e| translate_err("proxies.find_by_id", e))?
            .ok_or_else(|| StoreError::not_found("proxy", id))
    }

    pub async fn delete<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM proxies WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .map_err(|e| translate_err("proxies.delete", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("proxy", id));
        }
        Ok(())
    }
}

impl ProxyPool {
    pub async fn insert<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO proxy_pools (id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.description)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("proxy_pools.insert", e))
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<Self, StoreError> {
        sqlx::query_as::<_, Self>(
            "SELECT id, name, description, created_at, updated_at FROM proxy_pools WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .map_err(|e| translate_err("proxy_pools.find_by_id", e))?
        .ok_or_else(|| StoreError::not_found("proxy pool", id))
    }

    /// Add (or re-weight) a proxy in this pool.
    pub async fn add_member<'e, E: PgExecutor<'e>>(
        &self,
        proxy_id: Uuid,
        weight: i32,
        db: E,
    ) -> Result<ProxyPoolMembership, StoreError> {
        sqlx::query_as::<_, ProxyPoolMembership>(
            r#"
            INSERT INTO proxy_pool_memberships (proxy_pool_id, proxy_id, weight, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (proxy_pool_id, proxy_id)
                DO UPDATE SET weight = EXCLUDED.weight, is_active = TRUE
            RETURNING proxy_pool_id, proxy_id, weight, is_active
            "#,
        )
        .bind(self.id)
        .bind(proxy_id)
        .bind(weight)
        .fetch_one(db)
        .await
        .map_err(|e| translate_err("proxy_pool_memberships.add", e))
    }

    pub async fn remove_member<'e, E: PgExecutor<'e>>(
        &self,
        proxy_id: Uuid,
        db: E,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM proxy_pool_memberships WHERE proxy_pool_id = $1 AND proxy_id = $2",
        )
        .bind(self.id)
        .bind(proxy_id)
        .execute(db)
        .await
        .map_err(|e| translate_err("proxy_pool_memberships.remove", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// Active proxies of this pool, heaviest first.
    pub async fn active_members<'e, E: PgExecutor<'e>>(
        &self,
        db: E,
    ) -> Result<Vec<Proxy>, StoreError> {
        sqlx::query_as::<_, Proxy>(
            r#"
            SELECT p.id, p.name, p.address, p.protocol, p.username, p.is_active,
                   p.created_at, p.updated_at
            FROM proxies p
            JOIN proxy_pool_memberships m ON m.proxy_id = p.id
            WHERE m.proxy_pool_id = $1 AND m.is_active AND p.is_active
            ORDER BY m.weight DESC, p.name ASC
            "#,
        )
        .bind(self.id)
        .fetch_all(db)
        .await
        .map_err(|e| translate_err("proxy_pools.active_members", e))
    }

    /// Delete the pool; memberships go with it (FK cascade).
    pub async fn delete<'e, E: PgExecutor<'e>>(id: Uuid, db: E) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM proxy_pools WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .map_err(|e| translate_err("proxy_pools.delete", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("proxy pool", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_defaults() {
        let proxy = Proxy::builder()
            .name("dc-1")
            .address("203.0.113.10:8080")
            .build();
        assert_eq!(proxy.protocol, "http");
        assert!(proxy.is_active);
        assert!(proxy.username.is_none());
    }
}
