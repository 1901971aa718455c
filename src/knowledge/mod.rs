//! Knowledge objects, content variants, and their persistence

pub mod store;
pub mod types;

pub use store::KnowledgeStore;
pub use types::{
    ContentVariant, DialogueState, HistoryTurn, KnowledgeObject, KnowledgeRelationship, ObjectType,
    RelationshipType, VariantKind,
};
