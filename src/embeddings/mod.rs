//! Embedding provider abstraction
//!
//! The `EmbeddingProvider` trait abstracts over embedding backends so the
//! HTTP provider can be swapped for a local model or a test double.

pub mod client;

use async_trait::async_trait;

use crate::error::Result;

pub use client::HttpEmbeddingClient;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed multiple texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model name, recorded on stored embeddings.
    fn model(&self) -> &str;

    /// Embedding dimension.
    fn dimension(&self) -> usize;
}
