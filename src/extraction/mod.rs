//! Memory extractor
//!
//! Derives structured facts, entities, and tasks from one conversation turn
//! via a low-temperature upstream LLM call. The model is treated as an
//! unreliable oracle: every parse is bounded by a schema check and every
//! failure degrades to a minimal fallback extraction that is itself a valid
//! result. Extraction failures never propagate to the enclosing request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::{ChatClient, ChatMessage, ChatRequest};

const EXTRACTION_TEMPERATURE: f32 = 0.1;
const EXTRACTION_MAX_TOKENS: u32 = 800;
const FALLBACK_CONFIDENCE: f64 = 0.2;

/// A fact distilled from the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A named entity mentioned in the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// A task or action item surfaced in the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub description: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default, alias = "dueDate")]
    pub due_date: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

/// Everything one extraction run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryExtraction {
    #[serde(default)]
    pub facts: Vec<ExtractedFact>,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub tasks: Vec<ExtractedTask>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl MemoryExtraction {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.entities.is_empty() && self.tasks.is_empty()
    }
}

pub struct MemoryExtractor {
    chat: Arc<dyn ChatClient>,
    model: String,
}

impl MemoryExtractor {
    pub fn new(chat: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }

    /// Extract structured memories from one exchange. Infallible: on any
    /// upstream or parse failure the fallback record is returned.
    pub async fn extract(
        &self,
        user_message: &str,
        assistant_message: &str,
        context: Option<&str>,
    ) -> MemoryExtraction {
        let prompt = build_prompt(user_message, assistant_message, context);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(
                    "You extract structured memories from conversations. \
                     Reply with a single JSON object and nothing else.",
                ),
                ChatMessage::user(prompt),
            ],
            max_tokens: Some(EXTRACTION_MAX_TOKENS),
            temperature: Some(EXTRACTION_TEMPERATURE),
        };

        let reply = match self.chat.complete(request).await {
            Ok(r) => r.content,
            Err(e) => {
                tracing::warn!(error = %e, "extraction LLM call failed, using fallback");
                return fallback_extraction(user_message);
            }
        };

        match parse_extraction(&reply) {
            Some(mut extraction) => {
                extraction.facts = validate_and_deduplicate(std::mem::take(&mut extraction.facts));
                extraction.confidence = extraction.confidence.clamp(0.0, 1.0);
                if let serde_json::Value::Object(ref mut map) = extraction.metadata {
                    map.insert(
                        "extraction_method".to_string(),
                        serde_json::Value::String("llm".to_string()),
                    );
                } else {
                    extraction.metadata = serde_json::json!({ "extraction_method": "llm" });
                }
                extraction
            }
            None => {
                tracing::warn!("extraction reply had no parsable JSON object, using fallback");
                fallback_extraction(user_message)
            }
        }
    }
}

fn build_prompt(user_message: &str, assistant_message: &str, context: Option<&str>) -> String {
    let mut prompt = String::from(
        "Extract durable memories from this exchange as JSON matching:\n\
         {\n\
         \"facts\": [{\"content\": string, \"source\": string, \"confidence\": number 0-1, \"tags\": [string]}],\n\
         \"entities\": [{\"name\": string, \"type\": string, \"description\": string, \"confidence\": number 0-1, \"attributes\": object}],\n\
         \"tasks\": [{\"description\": string, \"status\": string, \"priority\": string, \"assignee\": string, \"dueDate\": string}],\n\
         \"confidence\": number 0-1\n\
         }\n\
         Only include information worth remembering beyond this conversation.\n\n",
    );
    if let Some(context) = context {
        prompt.push_str(&format!("Context:\n{context}\n\n"));
    }
    prompt.push_str(&format!(
        "User: {user_message}\n\nAssistant: {assistant_message}"
    ));
    prompt
}

/// Parse the first balanced `{…}` JSON object out of the reply.
fn parse_extraction(reply: &str) -> Option<MemoryExtraction> {
    let block = extract_json_block(reply)?;
    serde_json::from_str(block).ok()
}

/// Find the first balanced top-level JSON object in `text`, honoring string
/// literals and escapes.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Minimal, low-confidence record describing the turn. Always valid.
fn fallback_extraction(user_message: &str) -> MemoryExtraction {
    let summary: String = user_message.chars().take(200).collect();
    MemoryExtraction {
        facts: vec![ExtractedFact {
            content: format!("User discussed: {}", summary.trim()),
            source: Some("conversation".to_string()),
            confidence: FALLBACK_CONFIDENCE,
            tags: vec!["unstructured".to_string()],
        }],
        entities: Vec::new(),
        tasks: Vec::new(),
        confidence: FALLBACK_CONFIDENCE,
        metadata: serde_json::json!({ "extraction_method": "fallback" }),
    }
}

/// Normalize for dedup: lowercase, whitespace collapsed.
fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Drop invalid facts and coalesce duplicates, keeping the higher confidence.
/// Idempotent: running the result through again is a no-op.
pub fn validate_and_deduplicate(facts: Vec<ExtractedFact>) -> Vec<ExtractedFact> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut result: Vec<ExtractedFact> = Vec::with_capacity(facts.len());

    for fact in facts {
        if fact.content.trim().is_empty() {
            continue;
        }
        if !(0.0..=1.0).contains(&fact.confidence) {
            continue;
        }
        let key = normalize(&fact.content);
        match seen.get(&key) {
            Some(&idx) => {
                if fact.confidence > result[idx].confidence {
                    result[idx] = fact;
                }
            }
            None => {
                seen.insert(key, result.len());
                result.push(fact);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(content: &str, confidence: f64) -> ExtractedFact {
        ExtractedFact {
            content: content.to_string(),
            source: None,
            confidence,
            tags: Vec::new(),
        }
    }

    #[test]
    fn extracts_balanced_json_with_prose_around_it() {
        let reply = "Sure, here you go: {\"facts\": [], \"confidence\": 0.9} hope that helps";
        let block = extract_json_block(reply).unwrap();
        assert_eq!(block, "{\"facts\": [], \"confidence\": 0.9}");
    }

    #[test]
    fn handles_braces_inside_strings() {
        let reply = r#"{"facts": [{"content": "uses {braces} freely", "confidence": 0.8}]}"#;
        let block = extract_json_block(reply).unwrap();
        assert_eq!(block, reply);
    }

    #[test]
    fn no_json_returns_none() {
        assert!(extract_json_block("not JSON").is_none());
        assert!(parse_extraction("not JSON").is_none());
    }

    #[test]
    fn unbalanced_json_returns_none() {
        assert!(extract_json_block("{\"facts\": [").is_none());
    }

    #[test]
    fn dedup_keeps_higher_confidence() {
        let facts = vec![
            fact("Paris is the capital of France", 0.6),
            fact("paris is  the capital of france", 0.9),
        ];
        let result = validate_and_deduplicate(facts);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].confidence, 0.9);
    }

    #[test]
    fn dedup_drops_empty_and_out_of_range() {
        let facts = vec![
            fact("", 0.5),
            fact("   ", 0.5),
            fact("valid", 1.5),
            fact("valid", -0.1),
            fact("kept", 0.5),
        ];
        let result = validate_and_deduplicate(facts);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].content, "kept");
    }

    #[test]
    fn dedup_is_idempotent() {
        let facts = vec![fact("a fact", 0.7), fact("another", 0.6)];
        let once = validate_and_deduplicate(facts);
        let twice = validate_and_deduplicate(once.clone());
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn fallback_is_low_confidence_and_tagged() {
        let result = fallback_extraction("tell me about rust");
        assert!(result.confidence <= 0.3);
        assert_eq!(result.metadata["extraction_method"], "fallback");
        assert_eq!(result.facts.len(), 1);
    }
}
