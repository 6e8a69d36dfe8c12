//! Text-to-vector embedding.
//!
//! [`Embedder`] is the narrow seam between the search engine and whatever
//! model produces vectors. The pooling and normalization rules are carried
//! as an explicit [`EmbeddingPolicy`] so a mismatch with the stored
//! embeddings can be detected instead of silently degrading relevance.
//!
//! [`BertEmbedder`] runs a BERT-family sentence encoder on candle, loading
//! weights either from a local directory or from the Hugging Face Hub.

use std::fmt;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::{Deserialize, Serialize};
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

use crate::error::EmbedError;

/// Longest token sequence BERT position embeddings can address.
const MAX_SEQUENCE_TOKENS: usize = 512;

/// How token representations are reduced to one vector.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// Attention-mask weighted mean over all tokens.
    Mean,
    /// Hidden state of the leading `[CLS]` token.
    Cls,
}

impl fmt::Display for Pooling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pooling::Mean => write!(f, "mean"),
            Pooling::Cls => write!(f, "cls"),
        }
    }
}

/// The model and post-processing that define an embedding space.
///
/// Query vectors are only comparable with stored vectors when both were
/// produced under an equal policy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingPolicy {
    pub model_id: String,
    pub pooling: Pooling,
    pub normalize: bool,
}

impl fmt::Display for EmbeddingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model={} pooling={} normalize={}",
            self.model_id, self.pooling, self.normalize
        )
    }
}

/// Maps text to a fixed-length vector.
///
/// Implementations are synchronous and may be slow; async callers should
/// run them on a blocking pool.
pub trait Embedder: Send + Sync {
    /// Policy this embedder applies to every input.
    fn policy(&self) -> &EmbeddingPolicy;

    /// Embeds a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embeds several texts. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// BERT sentence encoder running on candle.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    policy: EmbeddingPolicy,
}

impl BertEmbedder {
    /// Loads `config.json`, `tokenizer.json` and `model.safetensors`.
    ///
    /// Files come from `model_dir` when given, otherwise they are fetched
    /// from the Hub repository named by `policy.model_id`.
    pub fn load(policy: EmbeddingPolicy, model_dir: Option<&Path>) -> Result<Self, EmbedError> {
        let (config_path, tokenizer_path, weights_path) = match model_dir {
            Some(dir) => (
                dir.join("config.json"),
                dir.join("tokenizer.json"),
                dir.join("model.safetensors"),
            ),
            None => fetch_from_hub(&policy.model_id)?,
        };

        let device = Device::cuda_if_available(0)?;

        let config: Config = serde_json::from_str(&std::fs::read_to_string(&config_path)?)
            .map_err(|e| EmbedError::Config(format!("{}: {}", config_path.display(), e)))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams::default()));
        if tokenizer.get_truncation().is_none() {
            tokenizer
                .with_truncation(Some(TruncationParams {
                    max_length: MAX_SEQUENCE_TOKENS,
                    ..Default::default()
                }))
                .map_err(|e| EmbedError::Tokenizer(e.to_string()))?;
        }

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)? };
        let model = BertModel::load(vb, &config)?;

        tracing::info!(%policy, hidden_size = config.hidden_size, "Embedding model loaded");

        Ok(BertEmbedder { model, tokenizer, device, policy })
    }

    fn forward(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbedError::Tokenizer(e.to_string()))?;

        let batch_len = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let ids_flat: Vec<u32> = encodings.iter().flat_map(|e| e.get_ids().iter().copied()).collect();
        let mask_flat: Vec<u32> = encodings
            .iter()
            .flat_map(|e| e.get_attention_mask().iter().copied())
            .collect();

        let ids = Tensor::from_vec(ids_flat, (batch_len, seq_len), &self.device)?;
        let mask = Tensor::from_vec(mask_flat, (batch_len, seq_len), &self.device)?;
        let type_ids = ids.zeros_like()?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;

        let pooled = match self.policy.pooling {
            Pooling::Mean => mean_pooling(&hidden, &mask)?,
            Pooling::Cls => hidden.i((.., 0))?,
        };
        let pooled = if self.policy.normalize { l2_normalize(&pooled)? } else { pooled };

        let mut vectors = Vec::with_capacity(batch_len);
        for i in 0..batch_len {
            let vector: Vec<f32> = pooled.get(i)?.to_vec1()?;
            if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
                return Err(EmbedError::NonFinite { position });
            }
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

impl Embedder for BertEmbedder {
    fn policy(&self) -> &EmbeddingPolicy {
        &self.policy
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.forward(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Tokenizer("tokenizer returned no encoding".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.forward(texts)
    }
}

fn fetch_from_hub(model_id: &str) -> Result<(PathBuf, PathBuf, PathBuf), EmbedError> {
    tracing::info!(model_id, "Fetching embedding model from the Hub");

    let api = Api::new().map_err(|e| EmbedError::Hub(e.to_string()))?;
    let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
    let get = |file: &str| repo.get(file).map_err(|e| EmbedError::Hub(format!("{}: {}", file, e)));

    Ok((get("config.json")?, get("tokenizer.json")?, get("model.safetensors")?))
}

fn mean_pooling(hidden_states: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask_expanded = attention_mask
        .unsqueeze(2)?
        .broadcast_as(hidden_states.shape())?
        .to_dtype(hidden_states.dtype())?;
    let sum_embeddings = (hidden_states * &mask_expanded)?.sum(1)?;
    let sum_mask = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;
    sum_embeddings.broadcast_div(&sum_mask)
}

fn l2_normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    tensor.broadcast_div(&norm.clamp(1e-12, f64::MAX)?)
}

#[cfg(test)]
mod embed_test {
    use super::*;

    struct Constant {
        policy: EmbeddingPolicy,
        vector: Vec<f32>,
    }

    impl Embedder for Constant {
        fn policy(&self) -> &EmbeddingPolicy {
            &self.policy
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(self.vector.clone())
        }
    }

    fn policy() -> EmbeddingPolicy {
        EmbeddingPolicy {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            pooling: Pooling::Mean,
            normalize: false,
        }
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(
            policy().to_string(),
            "model=sentence-transformers/all-MiniLM-L6-v2 pooling=mean normalize=false"
        );
    }

    #[test]
    fn test_policy_serde_shape() {
        let json = serde_json::to_value(policy()).unwrap();
        assert_eq!(json["pooling"], "mean");
        assert_eq!(json["normalize"], false);

        let back: EmbeddingPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy());
    }

    #[test]
    fn test_policy_equality_covers_every_field() {
        let mut other = policy();
        other.normalize = true;
        assert_ne!(other, policy());

        let mut other = policy();
        other.pooling = Pooling::Cls;
        assert_ne!(other, policy());
    }

    #[test]
    fn test_default_embed_batch_calls_embed() {
        let embedder = Constant { policy: policy(), vector: vec![0.5, 0.25] };
        let out = embedder.embed_batch(&["a", "b", "c"]).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v == &vec![0.5, 0.25]));
    }
}
