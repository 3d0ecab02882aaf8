use std::sync::Arc;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use tracing::debug;

use crate::error::AppError;

/// The embedding seam. The production implementation calls an external
/// service; tests substitute deterministic vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError>;
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
    fn dimensions(&self) -> u32;
}

/// Embedding component backed by an OpenAI-compatible endpoint.
///
/// The model and dimensions are fixed at construction; vectors are
/// unit-normalized before being handed to the vector index, so cosine
/// similarity and dot product agree. The caller owns the lifetime and
/// injects the provider wherever embeddings are needed (one instance is
/// reused across calls).
#[derive(Clone)]
pub struct EmbeddingProvider {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    dimensions: u32,
}

impl EmbeddingProvider {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        Self {
            client,
            model,
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    /// Embeds a single input string.
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let mut batch = self.embed_batch(&[input.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))
    }

    /// Embeds a batch of inputs in one API call, preserving input order.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input(inputs.to_vec())
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        if response.data.len() != inputs.len() {
            return Err(AppError::LLMParsing(format!(
                "Expected {} embeddings, received {}",
                inputs.len(),
                response.data.len()
            )));
        }

        debug!(
            count = response.data.len(),
            dimensions = self.dimensions,
            "Generated embeddings"
        );

        let mut embeddings: Vec<(u32, Vec<f32>)> = response
            .data
            .into_iter()
            .map(|d| (d.index, normalize(d.embedding)))
            .collect();
        embeddings.sort_by_key(|(index, _)| *index);

        Ok(embeddings.into_iter().map(|(_, e)| e).collect())
    }
}

/// Scales a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(mut embedding: Vec<f32>) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut embedding {
            *v /= norm;
        }
    }
    embedding
}

/// Cosine similarity between two equal-length vectors, clamped to [-1, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
