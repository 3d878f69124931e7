//! ONNX Runtime encoder that pools the `[CLS]` hidden state.

use eyre::WrapErr as _;
use ort::execution_providers::ExecutionProvider as _;
use ort::execution_providers::coreml::{CoreMLComputeUnits, CoreMLExecutionProvider};
use ort::session::{Session, builder::GraphOptimizationLevel};

/// Name of the per-token output of a HuggingFace encoder export.
const HIDDEN_STATE_OUTPUT: &str = "last_hidden_state";

/// Execution provider configuration for the encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionProvider {
    /// CPU only.
    #[default]
    CpuOnly,
    /// CoreML with CPU and ANE. Falls back to CPU when unavailable.
    CoreML,
}

/// A single-vector transformer encoder running under ONNX Runtime.
///
/// Expects a graph with `input_ids`, `attention_mask` and `token_type_ids`
/// inputs (all i64) and a `last_hidden_state` output of shape
/// `[batch, seq_len, hidden_dim]`. Each text is represented by the hidden
/// state of its first token.
pub struct OnnxEncoder {
    session: Session,
    tokenizer: tokenizers::Tokenizer,
    hidden_dim: usize,
}

impl OnnxEncoder {
    /// Load an encoder on the CPU.
    ///
    /// # Arguments
    /// * `model_path` - Path to the .onnx model file
    /// * `tokenizer_path` - Path to the tokenizer.json file
    /// * `hidden_dim` - Width of the model's hidden state
    pub fn load(
        model_path: impl AsRef<std::path::Path>,
        tokenizer_path: impl AsRef<std::path::Path>,
        hidden_dim: usize,
    ) -> eyre::Result<Self> {
        Self::load_with_provider(model_path, tokenizer_path, hidden_dim, ExecutionProvider::default())
    }

    /// Load an encoder with a specific execution provider.
    pub fn load_with_provider(
        model_path: impl AsRef<std::path::Path>,
        tokenizer_path: impl AsRef<std::path::Path>,
        hidden_dim: usize,
        provider: ExecutionProvider,
    ) -> eyre::Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        tracing::info!(?model_path, ?provider, hidden_dim, "loading ONNX encoder");

        let mut builder = Session::builder()
            .wrap_err("failed to create ONNX session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .wrap_err("failed to set optimization level")?;

        match provider {
            ExecutionProvider::CpuOnly => {
                tracing::info!("using CPU-only execution");
            }
            ExecutionProvider::CoreML => {
                let coreml = CoreMLExecutionProvider::default()
                    .with_compute_units(CoreMLComputeUnits::CPUAndNeuralEngine)
                    .with_subgraphs(true);

                if coreml.register(&mut builder).is_ok() {
                    tracing::info!("CoreML execution provider registered");
                } else {
                    tracing::warn!("CoreML not available, falling back to CPU");
                }
            }
        }

        let session = builder
            .commit_from_file(model_path)
            .wrap_err_with(|| format!("failed to load ONNX model from {}", model_path.display()))?;

        tracing::info!(tokenizer_path = %tokenizer_path.display(), "loading tokenizer");

        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path).map_err(|e| {
            eyre::eyre!("failed to load tokenizer from {}: {e}", tokenizer_path.display())
        })?;

        Ok(Self {
            session,
            tokenizer,
            hidden_dim,
        })
    }

    /// Tokenize, pad to `max_length` and run one forward pass.
    ///
    /// Returns the `[CLS]` rows, shape `[texts.len(), hidden_dim]`.
    pub fn encode_batch(
        &mut self,
        texts: &[&str],
        max_length: usize,
    ) -> eyre::Result<dpr_core::Embedding> {
        if texts.is_empty() {
            return Ok(ndarray::Array2::zeros((0, self.hidden_dim)));
        }
        if max_length == 0 {
            eyre::bail!("max_length must be at least 1");
        }

        let encodings = tokenize(&mut self.tokenizer, texts, max_length)?;

        let batch_size = texts.len();

        // Zeros act as padding
        let mut input_ids = vec![0i64; batch_size * max_length];
        let mut attention_mask = vec![0i64; batch_size * max_length];
        let mut token_type_ids = vec![0i64; batch_size * max_length];

        for (row, encoding) in encodings.iter().enumerate() {
            let offset = row * max_length;
            let tokens = encoding.get_ids().iter().zip(encoding.get_type_ids());
            for (i, (&id, &type_id)) in tokens.take(max_length).enumerate() {
                input_ids[offset + i] = i64::from(id);
                attention_mask[offset + i] = 1;
                token_type_ids[offset + i] = i64::from(type_id);
            }
        }

        let shape = vec![batch_size, max_length];
        let input_ids = ort::value::Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .wrap_err("failed to create input_ids tensor")?;
        let attention_mask =
            ort::value::Tensor::from_array((shape.clone(), attention_mask.into_boxed_slice()))
                .wrap_err("failed to create attention_mask tensor")?;
        let token_type_ids = ort::value::Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .wrap_err("failed to create token_type_ids tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
            .wrap_err("ONNX inference failed")?;

        let output = outputs
            .get(HIDDEN_STATE_OUTPUT)
            .ok_or_else(|| eyre::eyre!("model output '{HIDDEN_STATE_OUTPUT}' not found"))?;

        let hidden = output
            .try_extract_array::<f32>()
            .wrap_err("failed to extract output tensor")?
            .into_dimensionality::<ndarray::Ix3>()
            .wrap_err("expected a [batch, seq_len, hidden] output")?;

        if hidden.shape()[2] != self.hidden_dim {
            eyre::bail!(
                "model hidden size is {}, encoder was configured for {}",
                hidden.shape()[2],
                self.hidden_dim
            );
        }

        crate::cls_rows(hidden)
    }
}

/// Tokenize with special tokens, truncating each text to `max_length` tokens.
///
/// Truncation happens inside the tokenizer so the closing `[SEP]` survives
/// on long inputs.
fn tokenize(
    tokenizer: &mut tokenizers::Tokenizer,
    texts: &[&str],
    max_length: usize,
) -> eyre::Result<Vec<tokenizers::Encoding>> {
    tokenizer
        .with_truncation(Some(tokenizers::TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| eyre::eyre!("failed to configure truncation: {e}"))?;

    tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| eyre::eyre!("tokenization failed: {e}"))
}

impl crate::Encoder for OnnxEncoder {
    fn dim(&self) -> usize {
        self.hidden_dim
    }

    fn encode(&mut self, texts: &[&str], max_length: usize) -> eyre::Result<dpr_core::Embedding> {
        self.encode_batch(texts, max_length)
    }
}
