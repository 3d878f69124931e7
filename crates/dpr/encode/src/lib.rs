//! Text encoders for the question and answer towers.
//!
//! The scoring core only sees `[N, D]` matrices. Anything that can turn a
//! batch of texts into one fixed-width vector per text implements
//! [`Encoder`]; [`OnnxEncoder`] does it with a transformer exported to ONNX,
//! pooling the `[CLS]` hidden state.

mod onnx;

pub use onnx::{ExecutionProvider, OnnxEncoder};

/// Separator placed between a question title and its body.
pub const QUESTION_SEPARATOR: &str = "[SEP]";

/// Encoding configuration.
#[derive(Debug, Clone, Copy)]
pub struct EncodeConfig {
    /// Maximum tokens per text; longer inputs are truncated, shorter ones padded.
    pub max_length: usize,
    /// Number of texts sent to the encoder per call.
    pub batch_size: usize,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            max_length: 64,
            batch_size: 32,
        }
    }
}

/// Capability: map texts to fixed-width embeddings.
pub trait Encoder {
    /// Width of every embedding this encoder produces.
    fn dim(&self) -> usize;

    /// Encode a batch of texts into a `[texts.len(), dim]` matrix.
    fn encode(&mut self, texts: &[&str], max_length: usize) -> eyre::Result<dpr_core::Embedding>;
}

/// Pool the first (`[CLS]`) token of every sequence.
///
/// `hidden` has shape `[batch, seq_len, hidden_dim]`; the result is
/// `[batch, hidden_dim]`.
pub fn cls_rows(hidden: ndarray::ArrayView3<'_, f32>) -> eyre::Result<dpr_core::Embedding> {
    if hidden.shape()[1] == 0 {
        eyre::bail!("cannot pool [CLS] from an empty sequence axis");
    }
    Ok(hidden.index_axis(ndarray::Axis(1), 0).to_owned())
}

/// Join a question title and body the way the question tower expects.
#[must_use]
pub fn format_question(title: &str, body: &str) -> String {
    format!("{title} {QUESTION_SEPARATOR} {body}")
}

/// Embed passages in batches of `config.batch_size`, preserving order.
pub fn embed_passages<E: Encoder + ?Sized>(
    encoder: &mut E,
    passages: &[&str],
    config: EncodeConfig,
) -> eyre::Result<dpr_core::Embedding> {
    embed_batched(encoder, passages, config)
}

/// Embed `title [SEP] body` questions in batches, preserving order.
pub fn embed_questions<E: Encoder + ?Sized>(
    encoder: &mut E,
    titles: &[&str],
    bodies: &[&str],
    config: EncodeConfig,
) -> eyre::Result<dpr_core::Embedding> {
    if titles.len() != bodies.len() {
        eyre::bail!(
            "question titles and bodies differ in length: {} vs {}",
            titles.len(),
            bodies.len()
        );
    }

    let questions: Vec<String> = titles
        .iter()
        .zip(bodies)
        .map(|(title, body)| format_question(title, body))
        .collect();
    let questions: Vec<&str> = questions.iter().map(String::as_str).collect();

    embed_batched(encoder, &questions, config)
}

fn embed_batched<E: Encoder + ?Sized>(
    encoder: &mut E,
    texts: &[&str],
    config: EncodeConfig,
) -> eyre::Result<dpr_core::Embedding> {
    use eyre::WrapErr as _;

    let dim = encoder.dim();
    let mut embedding = ndarray::Array2::zeros((texts.len(), dim));
    let batch_size = config.batch_size.max(1);

    for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
        let start = batch_idx * batch_size;
        tracing::debug!(start, len = batch.len(), "encoding batch");

        let encoded = encoder
            .encode(batch, config.max_length)
            .wrap_err_with(|| format!("failed to encode texts {start}..{}", start + batch.len()))?;

        if encoded.dim() != (batch.len(), dim) {
            eyre::bail!(
                "encoder returned shape {:?}, expected ({}, {dim})",
                encoded.dim(),
                batch.len()
            );
        }

        embedding
            .slice_mut(ndarray::s![start..start + batch.len(), ..])
            .assign(&encoded);
    }

    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes each text as `[len, calls, 1.0]` and records batch sizes.
    struct CountingEncoder {
        calls: usize,
        batch_sizes: Vec<usize>,
    }

    impl CountingEncoder {
        fn new() -> Self {
            Self {
                calls: 0,
                batch_sizes: Vec::new(),
            }
        }
    }

    impl Encoder for CountingEncoder {
        fn dim(&self) -> usize {
            3
        }

        fn encode(&mut self, texts: &[&str], _max_length: usize) -> eyre::Result<dpr_core::Embedding> {
            self.batch_sizes.push(texts.len());
            let call = self.calls as f32;
            self.calls += 1;
            Ok(ndarray::Array2::from_shape_fn((texts.len(), 3), |(i, j)| match j {
                0 => texts[i].len() as f32,
                1 => call,
                _ => 1.0,
            }))
        }
    }

    struct WrongShapeEncoder;

    impl Encoder for WrongShapeEncoder {
        fn dim(&self) -> usize {
            4
        }

        fn encode(&mut self, texts: &[&str], _max_length: usize) -> eyre::Result<dpr_core::Embedding> {
            Ok(ndarray::Array2::zeros((texts.len(), 2)))
        }
    }

    #[test]
    fn test_format_question() {
        assert_eq!(format_question("Title", "Body text"), "Title [SEP] Body text");
    }

    #[test]
    fn test_embed_passages_batches_in_order() {
        let mut encoder = CountingEncoder::new();
        let passages = ["a", "bb", "ccc", "dddd", "eeeee"];
        let config = EncodeConfig {
            max_length: 16,
            batch_size: 2,
        };

        let embedding = embed_passages(&mut encoder, &passages, config).unwrap();

        assert_eq!(embedding.dim(), (5, 3));
        assert_eq!(encoder.batch_sizes, vec![2, 2, 1]);
        for (i, row) in embedding.outer_iter().enumerate() {
            assert!((row[0] - (i + 1) as f32).abs() < 1e-6);
            assert!((row[1] - (i / 2) as f32).abs() < 1e-6);
        }
    }

    #[test]
    fn test_embed_questions_formats_pairs() {
        let mut encoder = CountingEncoder::new();
        let embedding = embed_questions(
            &mut encoder,
            &["How?", "Why"],
            &["x", ""],
            EncodeConfig::default(),
        )
        .unwrap();

        assert_eq!(embedding.nrows(), 2);
        assert!((embedding[[0, 0]] - "How? [SEP] x".len() as f32).abs() < 1e-6);
        assert!((embedding[[1, 0]] - "Why [SEP] ".len() as f32).abs() < 1e-6);
    }

    #[test]
    fn test_embed_questions_length_mismatch() {
        let mut encoder = CountingEncoder::new();
        let result = embed_questions(&mut encoder, &["a", "b"], &["x"], EncodeConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_embed_empty() {
        let mut encoder = CountingEncoder::new();
        let embedding = embed_passages(&mut encoder, &[], EncodeConfig::default()).unwrap();
        assert_eq!(embedding.dim(), (0, 3));
        assert!(encoder.batch_sizes.is_empty());
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let result = embed_passages(&mut WrongShapeEncoder, &["a"], EncodeConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_cls_rows() {
        // batch=2, seq=3, hidden=2; token 0 of each sequence carries the marker values
        let hidden = ndarray::Array3::from_shape_fn((2, 3, 2), |(b, t, h)| {
            if t == 0 { (b * 10 + h) as f32 } else { -1.0 }
        });
        let cls = cls_rows(hidden.view()).unwrap();
        assert_eq!(cls, ndarray::array![[0.0_f32, 1.0], [10.0, 11.0]]);
    }

    #[test]
    fn test_cls_rows_empty_sequence() {
        let hidden = ndarray::Array3::<f32>::zeros((2, 0, 4));
        assert!(cls_rows(hidden.view()).is_err());
    }
}
