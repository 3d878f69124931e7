//! Core types and errors for dense passage retrieval.

/// A batch of dense embeddings, one row per item. Shape: [num_items, dim]
pub type Embedding = ndarray::Array2<f32>;

/// A borrowed view of an embedding matrix.
pub type EmbeddingView<'a> = ndarray::ArrayView2<'a, f32>;

/// Pairwise query/passage scores. Shape: [num_queries, num_passages]
pub type SimilarityMatrix = ndarray::Array2<f32>;

/// Errors raised by the scoring and evaluation core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Two paired arrays disagree on a dimension.
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// `k` is outside `[1, max]`; `max` is `None` when only the lower bound applies.
    #[error("invalid k={k}: {}", describe_k_range(.max))]
    InvalidK { k: usize, max: Option<usize> },

    /// An index lookup went past the end of a collection.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// An alignment label does not name a passage column.
    #[error("label {label} out of range for {num_passages} passages")]
    InvalidLabel { label: usize, num_passages: usize },

    /// A reduction was asked to run over zero rows.
    #[error("empty batch: {what}")]
    EmptyBatch { what: &'static str },

    /// A score that must be finite was infinite or NaN.
    #[error("non-finite score in row {row}")]
    NonFiniteScore { row: usize },

    /// The tensor backend failed.
    #[error("tensor backend error: {0}")]
    Backend(String),
}

fn describe_k_range(max: &Option<usize>) -> String {
    match max {
        Some(max) => format!("must be between 1 and {max}"),
        None => "must be at least 1".to_string(),
    }
}

/// Result type for the scoring core.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-k retrieval output: for each query, passage indices and their scores
/// in descending score order.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieved {
    /// Passage indices per query.
    pub indices: Vec<Vec<usize>>,
    /// Scores per query, parallel to `indices`.
    pub scores: Vec<Vec<f32>>,
}

impl Retrieved {
    /// Number of queries.
    #[must_use]
    pub fn num_queries(&self) -> usize {
        self.indices.len()
    }

    /// Iterate over `(indices, scores)` rows.
    pub fn rows(&self) -> impl Iterator<Item = (&[usize], &[f32])> {
        self.indices
            .iter()
            .zip(&self.scores)
            .map(|(i, s)| (i.as_slice(), s.as_slice()))
    }
}

/// Check that two embedding batches share the same dimensionality.
pub fn check_same_dim(queries: EmbeddingView<'_>, passages: EmbeddingView<'_>) -> Result<()> {
    if queries.ncols() != passages.ncols() {
        return Err(Error::ShapeMismatch {
            what: "embedding dim",
            expected: queries.ncols(),
            actual: passages.ncols(),
        });
    }
    Ok(())
}
