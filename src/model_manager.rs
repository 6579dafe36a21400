use std::sync::Mutex;

use candle_core::{DType, Device};
use pylate_rs::ColBERT;

use crate::{
    embedding::{Embedder, mean_pool, normalize},
    error::{Error, Result},
};

/// Multilingual late-interaction model; Chinese queries and English papers
/// share one embedding space.
pub const DEFAULT_MODEL_ID: &str = "jinaai/jina-colbert-v2";
pub const MODEL_ENV_VAR: &str = "PAPERBERT_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn embedding_error(e: impl std::fmt::Display) -> Error {
    Error::Embedding(e.to_string())
}

/// Loads the ColBERT model on first use and turns its token embeddings into
/// one normalized vector per text.
pub struct ModelManager {
    model: Mutex<Option<ColBERT>>,
    model_id: String,
}

impl ModelManager {
    /// Resolve the model id: an explicit id, then `PAPERBERT_MODEL`, then
    /// the configured setting, then [`DEFAULT_MODEL_ID`].
    pub fn resolve(explicit: Option<&str>, configured: Option<&str>) -> Self {
        let model_id = explicit
            .map(str::to_string)
            .or_else(|| std::env::var(MODEL_ENV_VAR).ok())
            .or_else(|| configured.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
        Self::with_model_id(model_id)
    }

    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: Mutex::new(None),
            model_id,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().is_ok_and(|m| m.is_some())
    }

    /// One pooled, unit-length vector per text. `is_query` selects the
    /// model's query encoding.
    fn encode_pooled(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = self
            .model
            .lock()
            .map_err(|_| Error::Embedding("model lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let model = guard
            .as_mut()
            .ok_or_else(|| Error::Embedding("model not loaded".to_string()))?;

        // [batch, tokens, dimension]
        let tokens = model
            .encode(texts, is_query)
            .map_err(embedding_error)?
            .to_dtype(DType::F32)
            .map_err(embedding_error)?
            .to_vec3::<f32>()
            .map_err(embedding_error)?;

        tokens
            .iter()
            .map(|rows| {
                let mut pooled = mean_pool(rows).ok_or_else(|| {
                    Error::Embedding("model produced no token embeddings".to_string())
                })?;
                normalize(&mut pooled);
                Ok(pooled)
            })
            .collect()
    }

    fn load(&self) -> Result<ColBERT> {
        tracing::info!(model = %self.model_id, "loading embedding model");
        ColBERT::from(&self.model_id)
            .with_device(default_device())
            .try_into()
            .map_err(embedding_error)
    }
}

impl Embedder for ModelManager {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode_pooled(texts, false)
    }

    fn embed_query(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode_pooled(texts, true)
    }
}
