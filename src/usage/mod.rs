//! Rate & usage engine
//!
//! Admission consults the minute and hour request windows without writing;
//! recording appends a usage log row and bumps the windowed counters. A
//! counter-store outage never fails the main request: admission fails open
//! and recording logs and drops.

pub mod counters;

use chrono::{DateTime, Timelike, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::estimate_cost;

pub use counters::{counter_key, CounterStore, MemoryCounterStore, Metric, Window};

/// Request ceilings per window
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub per_minute: u64,
    pub per_hour: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_minute: 100,
            per_hour: 1000,
        }
    }
}

/// Admission decision
#[derive(Debug, Clone)]
pub enum Admission {
    Allow,
    Deny { reason: String, retry_after_secs: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }
}

/// Snapshot of the current minute/hour windows for one tenant
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CurrentUsage {
    pub req_per_min: f64,
    pub tok_per_min: f64,
    pub cost_per_min: f64,
    pub req_per_hour: f64,
    pub tok_per_hour: f64,
    pub cost_per_hour: f64,
}

/// Aggregated usage over a time range
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageStats {
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub by_model: HashMap<String, ModelUsage>,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ModelUsage {
    pub requests: i64,
    pub tokens: i64,
    pub cost: f64,
}

/// Fields of one recorded completion
#[derive(Debug, Clone)]
pub struct CompletionRecord<'a> {
    pub tenant_id: &'a str,
    pub user_id: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub request_id: &'a str,
    pub model: &'a str,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub knowledge_tokens: i64,
}

#[derive(Clone)]
pub struct UsageEngine {
    pool: SqlitePool,
    counters: Arc<dyn CounterStore>,
    limits: RateLimits,
}

impl UsageEngine {
    pub fn new(pool: SqlitePool, counters: Arc<dyn CounterStore>, limits: RateLimits) -> Self {
        Self {
            pool,
            counters,
            limits,
        }
    }

    /// Decide whether a request may proceed. Never increments counters, so
    /// repeated calls without an intervening record are equivalent to one.
    pub async fn admit(&self, tenant_id: &str) -> Admission {
        let now = Utc::now();

        let minute = self
            .read_counter(tenant_id, Metric::Requests, Window::Minute, now)
            .await;
        let hour = self
            .read_counter(tenant_id, Metric::Requests, Window::Hour, now)
            .await;

        let (minute, hour) = match (minute, hour) {
            (Some(m), Some(h)) => (m, h),
            // Counter store down: fail open rather than reject traffic
            _ => {
                tracing::warn!(tenant_id, "counter store unavailable, admitting request");
                return Admission::Allow;
            }
        };

        if minute >= self.limits.per_minute as f64 {
            return Admission::Deny {
                reason: format!(
                    "minute request limit reached ({}/{})",
                    minute as u64, self.limits.per_minute
                ),
                retry_after_secs: 60 - u64::from(now.second()),
            };
        }
        if hour >= self.limits.per_hour as f64 {
            return Admission::Deny {
                reason: format!(
                    "hour request limit reached ({}/{})",
                    hour as u64, self.limits.per_hour
                ),
                retry_after_secs: 3600 - u64::from(now.minute() * 60 + now.second()),
            };
        }

        Admission::Allow
    }

    async fn read_counter(
        &self,
        tenant_id: &str,
        metric: Metric,
        window: Window,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        match self
            .counters
            .get(&counter_key(tenant_id, metric, window, now))
            .await
        {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "counter read failed");
                None
            }
        }
    }

    /// Record one chat completion: append a usage-log row and bump the
    /// request/token/cost counters in the minute and hour windows.
    /// Both writes are best-effort; failures are logged and dropped.
    pub async fn record_chat_completion(&self, record: CompletionRecord<'_>) -> f64 {
        let cost = estimate_cost(record.model, record.prompt_tokens, record.completion_tokens);
        let total_tokens =
            record.prompt_tokens.max(0) + record.completion_tokens.max(0) + record.knowledge_tokens.max(0);

        if let Err(e) = self.append_usage_log(&record, cost).await {
            tracing::warn!(
                tenant_id = record.tenant_id,
                request_id = record.request_id,
                error = %e,
                "usage log write failed, dropping"
            );
        }

        self.bump_counters(record.tenant_id, total_tokens, cost).await;
        cost
    }

    /// Record one embedding call (no output or knowledge tokens).
    pub async fn record_embedding(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
        request_id: &str,
        model: &str,
        tokens: i64,
    ) -> f64 {
        let record = CompletionRecord {
            tenant_id,
            user_id,
            session_id,
            request_id,
            model,
            prompt_tokens: tokens,
            completion_tokens: 0,
            knowledge_tokens: 0,
        };
        self.record_chat_completion(record).await
    }

    async fn append_usage_log(&self, record: &CompletionRecord<'_>, cost: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_logs
                (id, tenant_id, user_id, session_id, request_id, model,
                 input_tokens, output_tokens, knowledge_tokens, cost, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(record.tenant_id)
        .bind(record.user_id)
        .bind(record.session_id)
        .bind(record.request_id)
        .bind(record.model)
        .bind(record.prompt_tokens.max(0))
        .bind(record.completion_tokens.max(0))
        .bind(record.knowledge_tokens.max(0))
        .bind(cost)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bump_counters(&self, tenant_id: &str, total_tokens: i64, cost: f64) {
        let now = Utc::now();
        for window in [Window::Minute, Window::Hour] {
            let ttl = window.length();
            let updates = [
                (Metric::Requests, 1.0),
                (Metric::Tokens, total_tokens as f64),
                (Metric::Cost, cost),
            ];
            for (metric, by) in updates {
                let key = counter_key(tenant_id, metric, window, now);
                if let Err(e) = self.counters.increment(&key, by, ttl).await {
                    tracing::warn!(tenant_id, key = %key, error = %e, "counter increment failed, dropping");
                }
            }
        }
    }

    /// Current minute/hour window snapshot for a tenant.
    pub async fn current_usage(&self, tenant_id: &str) -> CurrentUsage {
        let now = Utc::now();
        let read = |metric, window| self.read_counter(tenant_id, metric, window, now);

        CurrentUsage {
            req_per_min: read(Metric::Requests, Window::Minute).await.unwrap_or(0.0),
            tok_per_min: read(Metric::Tokens, Window::Minute).await.unwrap_or(0.0),
            cost_per_min: read(Metric::Cost, Window::Minute).await.unwrap_or(0.0),
            req_per_hour: read(Metric::Requests, Window::Hour).await.unwrap_or(0.0),
            tok_per_hour: read(Metric::Tokens, Window::Hour).await.unwrap_or(0.0),
            cost_per_hour: read(Metric::Cost, Window::Hour).await.unwrap_or(0.0),
        }
    }

    /// Aggregate usage over `[from, to]` from the append-only log.
    pub async fn stats(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<UsageStats> {
        let rows = sqlx::query(
            r#"
            SELECT model,
                   COUNT(*) AS requests,
                   COALESCE(SUM(input_tokens + output_tokens + knowledge_tokens), 0) AS tokens,
                   COALESCE(SUM(cost), 0.0) AS cost
            FROM usage_logs
            WHERE tenant_id = ? AND created_at BETWEEN ? AND ?
            GROUP BY model
            "#,
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = UsageStats::default();
        for row in rows {
            let model: String = row.try_get("model")?;
            let usage = ModelUsage {
                requests: row.try_get("requests")?,
                tokens: row.try_get("tokens")?,
                cost: row.try_get("cost")?,
            };
            stats.total_requests += usage.requests;
            stats.total_tokens += usage.tokens;
            stats.total_cost += usage.cost;
            stats.by_model.insert(model, usage);
        }
        Ok(stats)
    }
}
