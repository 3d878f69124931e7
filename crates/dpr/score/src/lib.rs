//! In-batch similarity, contrastive loss and top-k retrieval.

pub mod device;
pub mod loss;
pub mod topk;

pub use device::ScoreDevice;
pub use loss::contrastive_loss;
pub use topk::{select_by_indices, top_k, top_k_scores};

/// Compute the dense similarity matrix `S = Q · Pᵗ`.
///
/// Entry `(i, j)` is the raw dot product of query `i` and passage `j`. No
/// normalization is applied. When `Q` and `P` are the question and answer
/// embeddings of one batch, every off-diagonal entry of a row scores an
/// in-batch negative.
pub fn similarity(
    queries: dpr_core::EmbeddingView<'_>,
    passages: dpr_core::EmbeddingView<'_>,
) -> dpr_core::Result<dpr_core::SimilarityMatrix> {
    dpr_core::check_same_dim(queries, passages)?;
    Ok(queries.dot(&passages.t()))
}
