//! C3 Embedding Service: a local, lazily loaded sentence-transformer style
//! encoder producing unit-norm 384-dim vectors. Stateless apart from the
//! model session itself.

use ndarray::{Array2, Axis};
use ort::session::Session;
use ort::value::Tensor;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

pub const EMBEDDING_DIM: usize = 384;
const DEFAULT_MAX_BATCH_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("onnx runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("unexpected output tensor shape: {0:?}")]
    UnexpectedShape(Vec<usize>),
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("model file not found at {0}")]
    ModelNotFound(String),
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;

pub struct EmbeddingService {
    session: Arc<RwLock<Session>>,
    embedding_dim: usize,
    max_batch_size: usize,
}

impl EmbeddingService {
    pub fn new(model_path: &str, embedding_dim: usize) -> Result<Self> {
        if !std::path::Path::new(model_path).exists() {
            return Err(EmbeddingError::ModelNotFound(model_path.to_string()));
        }
        let start = std::time::Instant::now();
        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;
        let elapsed = start.elapsed();
        if elapsed.as_millis() > 2_000 {
            warn!(ms = elapsed.as_millis() as u64, "slow embedding model load");
        }
        Ok(Self {
            session: Arc::new(RwLock::new(session)),
            embedding_dim,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        })
    }

    pub fn from_env() -> Result<Self> {
        let path = std::env::var("TASTE_EMBEDDING_MODEL_PATH")
            .unwrap_or_else(|_| "models/encoder.onnx".to_string());
        let dim: usize = std::env::var("TASTE_EMBEDDING_DIM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(EMBEDDING_DIM);
        Self::new(&path, dim)
    }

    /// A simplified whitespace/byte tokenizer: production deployments
    /// swap this for the model's real vocabulary, but the I/O contract
    /// (token ids in, embeddings out) does not change.
    fn tokenize(&self, text: &str) -> Vec<i64> {
        text.split_whitespace()
            .map(|w| w.bytes().fold(0i64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as i64)).abs() % 30_000)
            .collect()
    }

    #[instrument(skip(self, text))]
    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenize(text);
        let tokens = if tokens.is_empty() { vec![0] } else { tokens };
        let input_ids = Array2::from_shape_vec((1, tokens.len()), tokens)?;

        let start = std::time::Instant::now();
        let mut session = self.session.write().await;
        let input_tensor = Tensor::from_array(input_ids)?;
        let outputs = session.run(ort::inputs!["input_ids" => input_tensor])?;
        let output_tensor = outputs["embeddings"].try_extract_array::<f32>()?.to_owned();

        let mut embedding: Vec<f32> = if output_tensor.ndim() == 2 {
            output_tensor.index_axis(Axis(0), 0).iter().copied().collect()
        } else if output_tensor.ndim() == 3 {
            let batch = output_tensor.index_axis(Axis(0), 0);
            let mean = batch.mean_axis(Axis(0)).unwrap();
            mean.iter().copied().collect()
        } else {
            return Err(EmbeddingError::UnexpectedShape(output_tensor.shape().to_vec()));
        };

        if embedding.len() != self.embedding_dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.embedding_dim,
                got: embedding.len(),
            });
        }

        taste_core::math::normalize_in_place(&mut embedding);

        let elapsed = start.elapsed();
        if elapsed.as_millis() > 50 {
            warn!(ms = elapsed.as_millis() as u64, "encode latency exceeds 50ms target");
        }
        debug!(ms = elapsed.as_millis() as u64, "encoded text");

        Ok(embedding)
    }

    #[instrument(skip(self, texts))]
    pub async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > self.max_batch_size {
            let mut out = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(self.max_batch_size) {
                out.extend(self.encode_batch_internal(chunk).await?);
            }
            return Ok(out);
        }
        self.encode_batch_internal(texts).await
    }

    async fn encode_batch_internal(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let all_tokens: Vec<Vec<i64>> = texts.iter().map(|t| self.tokenize(t)).collect();
        let max_len = all_tokens.iter().map(|t| t.len()).max().unwrap_or(1).max(1);
        let batch_size = texts.len();

        let mut padded = Vec::with_capacity(batch_size * max_len);
        for tokens in &all_tokens {
            padded.extend(tokens.iter().copied());
            padded.resize(padded.len() + (max_len - tokens.len()), 0);
        }

        let input_ids = Array2::from_shape_vec((batch_size, max_len), padded)?;
        let mut session = self.session.write().await;
        let input_tensor = Tensor::from_array(input_ids)?;
        let outputs = session.run(ort::inputs!["input_ids" => input_tensor])?;
        let output_tensor = outputs["embeddings"].try_extract_array::<f32>()?.to_owned();

        let mut embeddings = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let mut embedding: Vec<f32> = if output_tensor.ndim() == 2 {
                output_tensor.index_axis(Axis(0), i).iter().copied().collect()
            } else if output_tensor.ndim() == 3 {
                let batch = output_tensor.index_axis(Axis(0), i);
                let mean = batch.mean_axis(Axis(0)).unwrap();
                mean.iter().copied().collect()
            } else {
                return Err(EmbeddingError::UnexpectedShape(output_tensor.shape().to_vec()));
            };
            if embedding.len() != self.embedding_dim {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.embedding_dim,
                    got: embedding.len(),
                });
            }
            taste_core::math::normalize_in_place(&mut embedding);
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_service() -> Option<EmbeddingService> {
        match EmbeddingService::from_env() {
            Ok(s) => Some(s),
            Err(_) => {
                eprintln!("Skipping test: embedding model not available");
                None
            }
        }
    }

    #[tokio::test]
    async fn encoding_same_text_twice_is_identical() {
        let Some(service) = build_service() else {
            return;
        };
        let a = service.encode("a cozy romantic comedy").await.unwrap();
        let b = service.encode("a cozy romantic comedy").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn encode_output_is_unit_norm() {
        let Some(service) = build_service() else {
            return;
        };
        let v = service.encode("some text").await.unwrap();
        let norm = taste_core::math::l2_norm(&v);
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn encode_batch_empty_input_returns_empty_output() {
        let Some(service) = build_service() else {
            return;
        };
        let out = service.encode_batch(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
