//! Core knowledge data model
//!
//! Knowledge objects are immutable once created; alternative renderings of
//! their payload live in content variants. All rows are tenant-scoped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a stored knowledge object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Turn,
    ExtractedFact,
    SessionMemory,
    FileChunk,
    Summary,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectType::Turn => "TURN",
            ObjectType::ExtractedFact => "EXTRACTED_FACT",
            ObjectType::SessionMemory => "SESSION_MEMORY",
            ObjectType::FileChunk => "FILE_CHUNK",
            ObjectType::Summary => "SUMMARY",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TURN" => Ok(ObjectType::Turn),
            "EXTRACTED_FACT" => Ok(ObjectType::ExtractedFact),
            "SESSION_MEMORY" => Ok(ObjectType::SessionMemory),
            "FILE_CHUNK" => Ok(ObjectType::FileChunk),
            "SUMMARY" => Ok(ObjectType::Summary),
            other => Err(format!("Unknown object type: {other}")),
        }
    }
}

/// Rendering variant of a knowledge object's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantKind {
    Raw,
    Short,
    BulletFacts,
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariantKind::Raw => "RAW",
            VariantKind::Short => "SHORT",
            VariantKind::BulletFacts => "BULLET_FACTS",
        };
        write!(f, "{s}")
    }
}

impl FromStr for VariantKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RAW" => Ok(VariantKind::Raw),
            "SHORT" => Ok(VariantKind::Short),
            "BULLET_FACTS" => Ok(VariantKind::BulletFacts),
            other => Err(format!("Unknown variant kind: {other}")),
        }
    }
}

/// Directed relationship type between two knowledge objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Supports,
    References,
    Contradicts,
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipType::Supports => "SUPPORTS",
            RelationshipType::References => "REFERENCES",
            RelationshipType::Contradicts => "CONTRADICTS",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUPPORTS" => Ok(RelationshipType::Supports),
            "REFERENCES" => Ok(RelationshipType::References),
            "CONTRADICTS" => Ok(RelationshipType::Contradicts),
            other => Err(format!("Unknown relationship type: {other}")),
        }
    }
}

/// An immutable unit of stored knowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeObject {
    pub id: String,
    pub tenant_id: String,
    pub object_type: ObjectType,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub parent_id: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub archived: bool,
    pub original_tokens: i64,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeObject {
    /// Build a new object with a fresh id and the current timestamp.
    pub fn new(tenant_id: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            object_type,
            session_id: None,
            user_id: None,
            parent_id: None,
            tags: Vec::new(),
            metadata: serde_json::json!({}),
            archived: false,
            original_tokens: 0,
            created_at: Utc::now(),
        }
    }
}

/// One textual rendering of a knowledge object's payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVariant {
    pub id: String,
    pub knowledge_object_id: String,
    pub variant: VariantKind,
    pub content: String,
    pub tokens: i64,
    pub created_at: DateTime<Utc>,
}

impl ContentVariant {
    pub fn new(object_id: impl Into<String>, variant: VariantKind, content: impl Into<String>) -> Self {
        let content = content.into();
        let tokens = crate::tokens::estimate_tokens(&content) as i64;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            knowledge_object_id: object_id.into(),
            variant,
            content,
            tokens,
            created_at: Utc::now(),
        }
    }
}

/// Directed edge between two knowledge objects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRelationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub rel_type: RelationshipType,
    pub confidence: f64,
    pub evidence: Option<String>,
    pub detected_by: String,
    pub created_at: DateTime<Utc>,
}

/// Per-session rolling context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueState {
    pub id: String,
    pub tenant_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub summary_short: Option<String>,
    pub summary_bullets: Vec<String>,
    pub topics: Vec<String>,
    /// Bounded buffer of the most recent turns (last 10)
    pub history: Vec<HistoryTurn>,
    pub cumulative_tokens: i64,
    pub turn_count: i64,
    pub turns_since_summary: i64,
    pub tokens_since_summary: i64,
    pub last_updated_at: DateTime<Utc>,
}

/// One entry in the dialogue history buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_round_trips() {
        for t in [
            ObjectType::Turn,
            ObjectType::ExtractedFact,
            ObjectType::SessionMemory,
            ObjectType::FileChunk,
            ObjectType::Summary,
        ] {
            assert_eq!(t.to_string().parse::<ObjectType>().unwrap(), t);
        }
    }

    #[test]
    fn variant_tokens_match_estimator() {
        let v = ContentVariant::new("obj", VariantKind::Raw, "a".repeat(40));
        assert_eq!(v.tokens, crate::tokens::estimate_tokens(&v.content) as i64);
    }
}
