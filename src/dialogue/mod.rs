//! Dialogue state service
//!
//! Maintains the per-session rolling context: turn counters, a bounded
//! history buffer, and periodic LLM-generated summaries. Mutations for one
//! session are serialized through a short-lived in-process lock keyed by
//! `(tenant, session)`.

use chrono::Utc;
use dashmap::DashMap;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::knowledge::{
    ContentVariant, DialogueState, HistoryTurn, KnowledgeObject, KnowledgeStore, ObjectType,
    VariantKind,
};
use crate::llm::{ChatClient, ChatMessage, ChatRequest};

/// Turns kept in the rolling history buffer
const HISTORY_LIMIT: usize = 10;

/// Hard cap on the stored short summary
const SHORT_SUMMARY_LIMIT: usize = 250;

/// Summarization trigger thresholds
#[derive(Debug, Clone, Copy)]
pub struct SummarizeThresholds {
    pub turn_count: i64,
    pub token_threshold: i64,
}

#[derive(Clone)]
pub struct DialogueService {
    pool: SqlitePool,
    store: KnowledgeStore,
    chat: Arc<dyn ChatClient>,
    model: String,
    thresholds: SummarizeThresholds,
    session_locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn state_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DialogueState> {
    let summary_bullets: String = row.try_get("summary_bullets")?;
    let topics: String = row.try_get("topics")?;
    let history: String = row.try_get("history")?;
    Ok(DialogueState {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        summary_short: row.try_get("summary_short")?,
        summary_bullets: serde_json::from_str(&summary_bullets)?,
        topics: serde_json::from_str(&topics)?,
        history: serde_json::from_str(&history)?,
        cumulative_tokens: row.try_get("cumulative_tokens")?,
        turn_count: row.try_get("turn_count")?,
        turns_since_summary: row.try_get("turns_since_summary")?,
        tokens_since_summary: row.try_get("tokens_since_summary")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

impl DialogueService {
    pub fn new(
        pool: SqlitePool,
        store: KnowledgeStore,
        chat: Arc<dyn ChatClient>,
        model: impl Into<String>,
        thresholds: SummarizeThresholds,
    ) -> Self {
        Self {
            pool,
            store,
            chat,
            model: model.into(),
            thresholds,
            session_locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, tenant_id: &str, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.session_locks
            .entry(format!("{tenant_id}:{session_id}"))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Fetch the state row for `(tenant, session)`, creating it if absent.
    pub async fn get_or_create(
        &self,
        tenant_id: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<DialogueState> {
        if let Some(state) = self.get(tenant_id, session_id).await? {
            return Ok(state);
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO dialogue_states
                (id, tenant_id, session_id, user_id, last_updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id, session_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(session_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(tenant_id, session_id)
            .await?
            .ok_or_else(|| Error::Database("dialogue state vanished after insert".into()))
    }

    pub async fn get(&self, tenant_id: &str, session_id: &str) -> Result<Option<DialogueState>> {
        let row = sqlx::query(
            "SELECT * FROM dialogue_states WHERE tenant_id = ? AND session_id = ?",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(state_from_row).transpose()
    }

    /// Fold one exchange into the session state: bump `turn_count` by 2,
    /// accumulate tokens, and append both messages to the bounded history.
    pub async fn record_turn(
        &self,
        tenant_id: &str,
        session_id: &str,
        user_id: Option<&str>,
        user_message: &str,
        assistant_message: &str,
        turn_tokens: i64,
    ) -> Result<DialogueState> {
        let lock = self.lock_for(tenant_id, session_id);
        let _guard = lock.lock().await;

        let mut state = self.get_or_create(tenant_id, session_id, user_id).await?;

        state.turn_count += 2;
        state.turns_since_summary += 2;
        state.cumulative_tokens += turn_tokens.max(0);
        state.tokens_since_summary += turn_tokens.max(0);
        state.history.push(HistoryTurn {
            role: "user".to_string(),
            content: user_message.chars().take(500).collect(),
        });
        state.history.push(HistoryTurn {
            role: "assistant".to_string(),
            content: assistant_message.chars().take(500).collect(),
        });
        let excess = state.history.len().saturating_sub(HISTORY_LIMIT);
        if excess > 0 {
            state.history.drain(0..excess);
        }
        state.last_updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE dialogue_states SET
                turn_count = ?,
                turns_since_summary = ?,
                cumulative_tokens = ?,
                tokens_since_summary = ?,
                history = ?,
                last_updated_at = ?
            WHERE tenant_id = ? AND session_id = ?
            "#,
        )
        .bind(state.turn_count)
        .bind(state.turns_since_summary)
        .bind(state.cumulative_tokens)
        .bind(state.tokens_since_summary)
        .bind(serde_json::to_string(&state.history)?)
        .bind(state.last_updated_at)
        .bind(tenant_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(state)
    }

    /// Whether the session has crossed a summarization threshold.
    pub fn due_for_summary(&self, state: &DialogueState) -> bool {
        state.turns_since_summary >= self.thresholds.turn_count
            || state.tokens_since_summary >= self.thresholds.token_threshold
    }

    /// Summarize one session: asks the upstream LLM for a JSON summary,
    /// persists a SESSION_MEMORY knowledge object, and resets the
    /// per-summary counters. Returns the new object's id.
    pub async fn summarize_session(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Option<String>> {
        let lock = self.lock_for(tenant_id, session_id);
        let _guard = lock.lock().await;

        let Some(state) = self.get(tenant_id, session_id).await? else {
            return Ok(None);
        };

        let turns = self
            .store
            .list_session_turns(tenant_id, session_id, 20)
            .await?;
        if turns.is_empty() {
            return Ok(None);
        }

        let transcript: String = turns
            .iter()
            .map(|(object, content)| {
                let role = object
                    .metadata
                    .get("role")
                    .and_then(|v| v.as_str())
                    .unwrap_or("user");
                format!("{role}: {content}")
            })
            .collect::<Vec<_>>()
            .join("\n");

        let summary = self.generate_summary(&transcript).await;

        let mut object = KnowledgeObject::new(tenant_id, ObjectType::SessionMemory);
        object.session_id = Some(session_id.to_string());
        object.user_id = state.user_id.clone();
        object.metadata = serde_json::json!({
            "topics": summary.topics.clone(),
            "turn_count": state.turn_count,
        });
        let variant = ContentVariant::new(&object.id, VariantKind::Short, &summary.short);
        object.original_tokens = variant.tokens;
        self.store.create_object_with_variant(&object, &variant).await?;
        if !summary.bullets.is_empty() {
            let bullets = ContentVariant::new(
                &object.id,
                VariantKind::BulletFacts,
                summary.bullets.join("\n"),
            );
            self.store.add_variant(&bullets).await?;
        }

        sqlx::query(
            r#"
            UPDATE dialogue_states SET
                summary_short = ?,
                summary_bullets = ?,
                topics = ?,
                turns_since_summary = 0,
                tokens_since_summary = 0,
                last_updated_at = ?
            WHERE tenant_id = ? AND session_id = ?
            "#,
        )
        .bind(&summary.short)
        .bind(serde_json::to_string(&summary.bullets)?)
        .bind(serde_json::to_string(&summary.topics)?)
        .bind(Utc::now())
        .bind(tenant_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(tenant_id, session_id, object_id = %object.id, "session summarized");
        Ok(Some(object.id))
    }

    async fn generate_summary(&self, transcript: &str) -> SessionSummary {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(
                    "Summarize the conversation. Reply with a single JSON object: \
                     {\"short_summary\": string (max 250 chars), \
                      \"bullet_summary\": [string], \"topics\": [string]}",
                ),
                ChatMessage::user(transcript.to_string()),
            ],
            max_tokens: Some(400),
            temperature: Some(0.2),
        };

        match self.chat.complete(request).await {
            Ok(response) => parse_summary(&response.content)
                .unwrap_or_else(|| heuristic_summary(transcript)),
            Err(e) => {
                tracing::warn!(error = %e, "summary LLM call failed, using heuristic");
                heuristic_summary(transcript)
            }
        }
    }

    /// Sessions over a summarization threshold, oldest-updated first.
    pub async fn list_due_for_summary(&self, batch_size: i64) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, session_id FROM dialogue_states
            WHERE turns_since_summary >= ? OR tokens_since_summary >= ?
            ORDER BY last_updated_at ASC
            LIMIT ?
            "#,
        )
        .bind(self.thresholds.turn_count)
        .bind(self.thresholds.token_threshold)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("tenant_id")?, row.try_get("session_id")?)))
            .collect()
    }
}

struct SessionSummary {
    short: String,
    bullets: Vec<String>,
    topics: Vec<String>,
}

fn parse_summary(reply: &str) -> Option<SessionSummary> {
    let block = crate::extraction::extract_json_block(reply)?;
    let value: serde_json::Value = serde_json::from_str(block).ok()?;
    let short = value.get("short_summary")?.as_str()?.to_string();
    let strings = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    Some(SessionSummary {
        short: truncate_chars(&short, SHORT_SUMMARY_LIMIT),
        bullets: strings("bullet_summary"),
        topics: strings("topics"),
    })
}

/// Truncated first-line fallback when the LLM reply is unusable.
fn heuristic_summary(transcript: &str) -> SessionSummary {
    let first_line = transcript.lines().next().unwrap_or_default();
    SessionSummary {
        short: truncate_chars(first_line, SHORT_SUMMARY_LIMIT),
        bullets: Vec::new(),
        topics: Vec::new(),
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_summary_truncates_to_limit() {
        let long = "x".repeat(400);
        let reply = format!("{{\"short_summary\": \"{long}\", \"topics\": [\"a\"]}}");
        let summary = parse_summary(&reply).unwrap();
        assert_eq!(summary.short.chars().count(), SHORT_SUMMARY_LIMIT);
        assert_eq!(summary.topics, vec!["a"]);
    }

    #[test]
    fn heuristic_uses_first_line() {
        let summary = heuristic_summary("user: hello there\nassistant: hi");
        assert_eq!(summary.short, "user: hello there");
        assert!(summary.bullets.is_empty());
    }

    #[test]
    fn unparsable_reply_is_none() {
        assert!(parse_summary("no json here").is_none());
    }
}
