//! Embedding backends for the [`EmbeddingPort`] trait.
//!
//! - **[`DisabledEmbedder`]** returns errors; used when embeddings are not configured.
//! - **[`LocalEmbedder`]** runs CLIP locally via fastembed: a text encoder and an
//!   image encoder that share one vector space. No network calls after model download.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use trove::config::EmbeddingConfig;
//! # use trove::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use trove_core::embedding::EmbeddingPort;

use crate::config::EmbeddingConfig;

/// A no-op embedder that always returns errors.
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingPort for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embeddings are disabled. Set [embedding] provider = \"local\" in the config.")
    }

    async fn embed_images(&self, _images: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        bail!("Embeddings are disabled. Set [embedding] provider = \"local\" in the config.")
    }
}

// ============ Local Provider (fastembed CLIP) ============

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use super::*;
    use std::sync::Mutex;

    use fastembed::{
        EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
        TextEmbedding,
    };
    use trove_core::embedding::normalize;

    /// CLIP text + image encoders, loaded on first use and kept for the
    /// life of the process.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        text: Arc<Mutex<Option<TextEmbedding>>>,
        image: Arc<Mutex<Option<ImageEmbedding>>>,
    }

    fn poisoned<T>(_: T) -> anyhow::Error {
        anyhow::anyhow!("embedding model lock poisoned")
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "clip-vit-b-32".to_string());
            if model_name != "clip-vit-b-32" {
                bail!(
                    "Unknown local embedding model: '{}'. Supported models: clip-vit-b-32",
                    model_name
                );
            }
            Ok(Self {
                model_name,
                dims: config.dims.unwrap_or(512),
                batch_size: config.batch_size,
                text: Arc::new(Mutex::new(None)),
                image: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn finish(mut vectors: Vec<Vec<f32>>, dims: usize) -> Result<Vec<Vec<f32>>> {
        for v in vectors.iter_mut() {
            if v.len() != dims {
                bail!("model returned {} dims, expected {}", v.len(), dims);
            }
            normalize(v);
        }
        Ok(vectors)
    }

    #[async_trait]
    impl EmbeddingPort for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let slot = self.text.clone();
            let texts = texts.to_vec();
            let batch_size = self.batch_size;

            let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = slot.lock().map_err(poisoned)?;
                if guard.is_none() {
                    let model = TextEmbedding::try_new(
                        InitOptions::new(EmbeddingModel::ClipVitB32).with_show_download_progress(true),
                    )
                    .map_err(|e| anyhow::anyhow!("Failed to initialize CLIP text model: {}", e))?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| anyhow::anyhow!("CLIP text model missing"))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow::anyhow!("Local text embedding failed: {}", e))
            })
            .await??;

            finish(vectors, self.dims)
        }

        async fn embed_images(&self, images: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
            if images.is_empty() {
                return Ok(Vec::new());
            }
            let slot = self.image.clone();
            let images = images.to_vec();
            let batch_size = self.batch_size;

            let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = slot.lock().map_err(poisoned)?;
                if guard.is_none() {
                    let model = ImageEmbedding::try_new(
                        ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32)
                            .with_show_download_progress(true),
                    )
                    .map_err(|e| anyhow::anyhow!("Failed to initialize CLIP image model: {}", e))?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| anyhow::anyhow!("CLIP image model missing"))?;
                model
                    .embed(images, Some(batch_size))
                    .map_err(|e| anyhow::anyhow!("Local image embedding failed: {}", e))
            })
            .await??;

            finish(vectors, self.dims)
        }
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

/// Create the configured embedder.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires the `local-embeddings-fastembed` feature) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingPort>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_embedder_errors() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        assert!(embedder.embed_text("hello").await.is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
