//! Ranking metrics over retrieved index lists.
//!
//! Every function takes parallel lists: one retrieved candidate list per
//! query and one ground-truth passage index per query.

/// Per-query recall at `k`.
///
/// A query scores `1 / k` when its true index appears anywhere in its
/// retrieved list, and 0 otherwise. The list is not truncated to `k` first,
/// and scores are returned per query rather than averaged; aggregate with
/// [`mean`] when a single number is needed.
///
/// NOTE: this is a hit indicator scaled by `1 / k`, not the textbook
/// `|relevant ∩ retrieved| / |relevant|`. Downstream evaluation depends on
/// this exact formula.
///
/// # Errors
/// - [`dpr_core::Error::InvalidK`] if `k == 0`.
/// - [`dpr_core::Error::ShapeMismatch`] if the two lists differ in length.
pub fn recall_at_k(
    retrieved: &[Vec<usize>],
    true_indices: &[usize],
    k: usize,
) -> dpr_core::Result<Vec<f32>> {
    if k == 0 {
        return Err(dpr_core::Error::InvalidK { k, max: None });
    }
    check_parallel(retrieved, true_indices)?;

    let hit_score = 1.0 / k as f32;
    Ok(retrieved
        .iter()
        .zip(true_indices)
        .map(|(candidates, truth)| {
            if candidates.contains(truth) {
                hit_score
            } else {
                0.0
            }
        })
        .collect())
}

/// Per-query reciprocal rank: `1 / rank` of the first occurrence of the
/// true index (ranks are 1-based), or 0 when it was not retrieved.
pub fn reciprocal_ranks(
    retrieved: &[Vec<usize>],
    true_indices: &[usize],
) -> dpr_core::Result<Vec<f32>> {
    check_parallel(retrieved, true_indices)?;

    Ok(retrieved
        .iter()
        .zip(true_indices)
        .map(|(candidates, truth)| {
            candidates
                .iter()
                .position(|c| c == truth)
                .map_or(0.0, |pos| 1.0 / (pos as f32 + 1.0))
        })
        .collect())
}

/// Mean reciprocal rank across all queries.
///
/// Returns 0.0 for an empty query set.
pub fn mean_reciprocal_rank(
    retrieved: &[Vec<usize>],
    true_indices: &[usize],
) -> dpr_core::Result<f32> {
    Ok(mean(&reciprocal_ranks(retrieved, true_indices)?))
}

/// Arithmetic mean, 0.0 for an empty slice.
#[must_use]
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn check_parallel(retrieved: &[Vec<usize>], true_indices: &[usize]) -> dpr_core::Result<()> {
    if retrieved.len() != true_indices.len() {
        return Err(dpr_core::Error::ShapeMismatch {
            what: "retrieved lists vs true indices",
            expected: retrieved.len(),
            actual: true_indices.len(),
        });
    }
    Ok(())
}

/// Evaluation summary for one retrieval run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EvaluationReport {
    /// The `k` used for retrieval and recall.
    pub k: usize,
    /// Number of evaluated queries.
    pub num_queries: usize,
    /// Per-query recall@k, as returned by [`recall_at_k`].
    pub recall_at_k: Vec<f32>,
    /// Mean of `recall_at_k`.
    pub mean_recall_at_k: f32,
    /// Per-query reciprocal ranks.
    pub reciprocal_ranks: Vec<f32>,
    /// Mean reciprocal rank.
    pub mrr: f32,
    /// Mean in-batch contrastive loss, when the caller computed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_loss: Option<f32>,
}

impl EvaluationReport {
    /// Score a retrieval run against ground truth.
    pub fn compute(
        retrieved: &[Vec<usize>],
        true_indices: &[usize],
        k: usize,
    ) -> dpr_core::Result<Self> {
        let recall = recall_at_k(retrieved, true_indices, k)?;
        let ranks = reciprocal_ranks(retrieved, true_indices)?;

        Ok(Self {
            k,
            num_queries: true_indices.len(),
            mean_recall_at_k: mean(&recall),
            mrr: mean(&ranks),
            recall_at_k: recall,
            reciprocal_ranks: ranks,
            mean_loss: None,
        })
    }

    /// Attach a mean in-batch loss.
    #[must_use]
    pub fn with_loss(mut self, mean_loss: f32) -> Self {
        self.mean_loss = Some(mean_loss);
        self
    }

    /// Number of queries whose true passage was retrieved.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.recall_at_k.iter().filter(|&&r| r > 0.0).count()
    }
}

impl std::fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "queries:       {}", self.num_queries)?;
        writeln!(f, "hits@{}:        {}", self.k, self.hits())?;
        writeln!(f, "recall@{}:      {:.4}", self.k, self.mean_recall_at_k)?;
        write!(f, "MRR:           {:.4}", self.mrr)?;
        if let Some(loss) = self.mean_loss {
            write!(f, "\nin-batch loss: {loss:.4}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_retrieved() -> Vec<Vec<usize>> {
        vec![vec![1, 2, 12, 4], vec![30, 11, 14, 2], vec![16, 22, 3, 5]]
    }

    #[test]
    fn test_recall_at_k_reference_values() {
        // Every true index occurs somewhere in its row (2 and 3 past the front)
        let recall = recall_at_k(&sample_retrieved(), &[1, 2, 3], 3).unwrap();
        assert_eq!(recall.len(), 3);
        for r in &recall {
            assert!((r - 1.0 / 3.0).abs() < 1e-6);
        }

        let recall = recall_at_k(&sample_retrieved(), &[1, 4, 12], 3).unwrap();
        assert!((recall[0] - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(recall[1], 0.0);
        assert_eq!(recall[2], 0.0);
    }

    #[test]
    fn test_recall_at_k_uses_whole_list() {
        // Hits anywhere in the list count, even past position k
        let recall = recall_at_k(&[vec![7, 8, 9]], &[9], 1).unwrap();
        assert!((recall[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_recall_at_k_misses() {
        let recall = recall_at_k(&[vec![0, 1], vec![2, 3]], &[5, 3], 2).unwrap();
        assert_eq!(recall, vec![0.0, 0.5]);
    }

    #[test]
    fn test_recall_at_k_zero_k() {
        let err = recall_at_k(&[vec![1]], &[1], 0).unwrap_err();
        assert_eq!(err, dpr_core::Error::InvalidK { k: 0, max: None });
        assert_eq!(err.to_string(), "invalid k=0: must be at least 1");
    }

    #[test]
    fn test_recall_length_mismatch() {
        assert!(matches!(
            recall_at_k(&[vec![1], vec![2]], &[1], 1),
            Err(dpr_core::Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_mrr_reference_value() {
        let mrr = mean_reciprocal_rank(&[vec![5, 1, 2], vec![3, 4, 5]], &[1, 5]).unwrap();
        // ranks 2 and 3 -> (1/2 + 1/3) / 2
        assert!((mrr - (0.5 + 1.0 / 3.0) / 2.0).abs() < 1e-6, "mrr was {mrr}");
    }

    #[test]
    fn test_mrr_first_position() {
        let mrr = mean_reciprocal_rank(&[vec![5, 1, 2], vec![5, 4, 3]], &[1, 5]).unwrap();
        assert!((mrr - 0.75).abs() < 1e-6, "mrr was {mrr}");
    }

    #[test]
    fn test_reciprocal_rank_missing_is_zero() {
        let ranks = reciprocal_ranks(&[vec![1, 2], vec![]], &[9, 0]).unwrap();
        assert_eq!(ranks, vec![0.0, 0.0]);
    }

    #[test]
    fn test_reciprocal_rank_first_occurrence() {
        let ranks = reciprocal_ranks(&[vec![4, 7, 7]], &[7]).unwrap();
        assert!((ranks[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mrr_empty() {
        assert_eq!(mean_reciprocal_rank(&[], &[]).unwrap(), 0.0);
    }

    #[test]
    fn test_mrr_length_mismatch() {
        assert!(mean_reciprocal_rank(&[vec![1]], &[1, 2]).is_err());
    }

    #[test]
    fn test_report() {
        let report = EvaluationReport::compute(&[vec![0, 1], vec![1, 0], vec![2, 3]], &[0, 0, 1], 2)
            .unwrap()
            .with_loss(0.25);

        assert_eq!(report.num_queries, 3);
        assert_eq!(report.hits(), 2);
        assert!((report.mean_recall_at_k - 1.0 / 3.0).abs() < 1e-6);
        assert!((report.mrr - 0.5).abs() < 1e-6);
        assert_eq!(report.mean_loss, Some(0.25));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["k"], 2);
        assert!(json.get("mean_loss").is_some());
    }

    #[test]
    fn test_report_skips_missing_loss() {
        let report = EvaluationReport::compute(&[vec![0]], &[0], 1).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("mean_loss").is_none());
        assert!(report.to_string().contains("MRR"));
    }
}
