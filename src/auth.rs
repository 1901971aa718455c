//! Bearer authentication
//!
//! Callers present an opaque key in `Authorization: Bearer <key>`. Only a
//! SHA-256 verifier is stored; on match the owning tenant is bound to the
//! request. Key material never appears in logs or error messages.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Prefix on generated keys, so they are recognizable in configuration
pub const KEY_PREFIX: &str = "ak_";

/// Random part length of generated keys
const KEY_RANDOM_LEN: usize = 48;

/// `last_used_at` writes are throttled to once per this interval
const TOUCH_INTERVAL_SECS: i64 = 60;

/// Tenant identity bound to an authenticated request
#[derive(Debug, Clone)]
pub struct AuthTenant {
    pub tenant_id: String,
    pub key_id: String,
}

#[derive(Clone)]
pub struct ApiKeyStore {
    pool: SqlitePool,
}

impl ApiKeyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn hash_key(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate a fresh opaque key value.
    pub fn generate_key() -> String {
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(KEY_RANDOM_LEN)
            .map(char::from)
            .collect();
        format!("{KEY_PREFIX}{random}")
    }

    /// Provision a key for a tenant. The secret is returned exactly once;
    /// only its hash is stored.
    pub async fn create_key(&self, tenant_id: &str, label: Option<&str>) -> Result<(String, String)> {
        let secret = Self::generate_key();
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, tenant_id, key_hash, label, active, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(Self::hash_key(&secret))
        .bind(label)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok((id, secret))
    }

    /// Deactivate a key. Subsequent validations fail.
    pub async fn revoke_key(&self, key_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE api_keys SET active = 0 WHERE id = ?")
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Validate a presented secret against stored verifiers. Only active
    /// keys match. A successful validation touches `last_used_at`
    /// (best-effort, throttled).
    pub async fn validate(&self, secret: &str) -> Result<Option<AuthTenant>> {
        let hash = Self::hash_key(secret);
        let row = sqlx::query(
            "SELECT id, tenant_id, last_used_at FROM api_keys WHERE key_hash = ? AND active = 1",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let key_id: String = row.try_get("id")?;
        let tenant_id: String = row.try_get("tenant_id")?;
        let last_used_at: Option<chrono::DateTime<Utc>> = row.try_get("last_used_at")?;

        let stale = last_used_at
            .map(|t| Utc::now() - t > Duration::seconds(TOUCH_INTERVAL_SECS))
            .unwrap_or(true);
        if stale {
            let pool = self.pool.clone();
            let id = key_id.clone();
            tokio::spawn(async move {
                if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
                    .bind(Utc::now())
                    .bind(&id)
                    .execute(&pool)
                    .await
                {
                    tracing::debug!(key_id = %id, error = %e, "last_used_at touch failed");
                }
            });
        }

        Ok(Some(AuthTenant { tenant_id, key_id }))
    }
}

/// Axum extractor binding the bearer key's tenant to the request.
///
/// Missing or invalid credentials reject with 401 before the handler runs.
#[async_trait]
impl<S> FromRequestParts<S> for AuthTenant
where
    ApiKeyStore: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Unauthorized("missing Authorization header".into()))?;

        let secret = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| Error::Unauthorized("expected Bearer credentials".into()))?;

        let store = ApiKeyStore::from_ref(state);
        match store.validate(secret).await {
            Ok(Some(tenant)) => Ok(tenant),
            Ok(None) => Err(Error::Unauthorized("invalid or inactive key".into())),
            Err(e) => {
                tracing::error!(error = %e, "key validation query failed");
                Err(Error::Unauthorized("invalid or inactive key".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_prefixed_and_unique() {
        let a = ApiKeyStore::generate_key();
        let b = ApiKeyStore::generate_key();
        assert!(a.starts_with(KEY_PREFIX));
        assert_eq!(a.len(), KEY_PREFIX.len() + KEY_RANDOM_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_and_secret_free() {
        let hash = ApiKeyStore::hash_key("ak_example");
        assert_eq!(hash, ApiKeyStore::hash_key("ak_example"));
        assert_eq!(hash.len(), 64);
        assert!(!hash.contains("example"));
    }
}
