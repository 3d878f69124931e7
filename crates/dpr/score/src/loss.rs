//! In-batch contrastive loss.

/// Mean cross-entropy of each similarity row against its aligned passage.
///
/// Each row of `scores` is treated as logits for a classification over the
/// passage columns: the row is log-softmaxed and the negative log-likelihood
/// of the labelled column is averaged over all rows.
///
/// `labels` defaults to the identity alignment `0..num_queries`, which is the
/// in-batch setting where query `i` is paired with passage `i`. With omitted
/// labels and fewer queries than passages the value is computed but has no
/// meaning; with more queries than passages the default labels run past the
/// last column and are rejected.
///
/// # Errors
/// - [`dpr_core::Error::EmptyBatch`] if `scores` has no rows.
/// - [`dpr_core::Error::ShapeMismatch`] if `labels.len()` differs from the row count.
/// - [`dpr_core::Error::InvalidLabel`] if any label is not a valid column.
/// - [`dpr_core::Error::NonFiniteScore`] if a row contains an infinite or NaN score.
pub fn contrastive_loss(
    scores: ndarray::ArrayView2<'_, f32>,
    labels: Option<&[usize]>,
) -> dpr_core::Result<f32> {
    let (num_queries, num_passages) = scores.dim();
    if num_queries == 0 {
        return Err(dpr_core::Error::EmptyBatch {
            what: "contrastive loss over zero queries",
        });
    }

    if let Some(labels) = labels {
        if labels.len() != num_queries {
            return Err(dpr_core::Error::ShapeMismatch {
                what: "alignment labels",
                expected: num_queries,
                actual: labels.len(),
            });
        }
    }

    let label_at = |row: usize| labels.map_or(row, |l| l[row]);

    let mut total = 0.0_f64;
    for (row_idx, row) in scores.outer_iter().enumerate() {
        let label = label_at(row_idx);
        if label >= num_passages {
            return Err(dpr_core::Error::InvalidLabel {
                label,
                num_passages,
            });
        }
        if row.iter().any(|x| !x.is_finite()) {
            return Err(dpr_core::Error::NonFiniteScore { row: row_idx });
        }

        total -= f64::from(log_softmax_at(row, label));
    }

    Ok((total / num_queries as f64) as f32)
}

/// `log_softmax(row)[index]`, stable for large logits.
fn log_softmax_at(row: ndarray::ArrayView1<'_, f32>, index: usize) -> f32 {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum_exp: f32 = row.iter().map(|&x| (x - max).exp()).sum();
    row[index] - max - sum_exp.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_diagonal_dominance_loss_near_zero() {
        let s = ndarray::Array2::<f32>::eye(4) * 50.0;
        let loss = contrastive_loss(s.view(), None).unwrap();
        assert!(loss >= 0.0);
        assert!(loss < 1e-6, "loss was {loss}");
    }

    #[test]
    fn test_flat_scores_give_ln_n() {
        let s = ndarray::Array2::<f32>::from_elem((5, 5), 0.3);
        let loss = contrastive_loss(s.view(), None).unwrap();
        assert!((loss - 5.0_f32.ln()).abs() < 1e-5, "loss was {loss}");
    }

    #[test]
    fn test_hand_computed() {
        // Row 0: logits [1, 0] -> -log(e / (e + 1))
        // Row 1: logits [0, 0] -> ln 2
        let s = array![[1.0, 0.0], [0.0, 0.0]];
        let e = std::f32::consts::E;
        let expected = (-(e / (e + 1.0)).ln() + 2.0_f32.ln()) / 2.0;
        let loss = contrastive_loss(s.view(), None).unwrap();
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn test_explicit_labels() {
        // Anti-diagonal is the correct alignment here
        let s = array![[0.0, 40.0], [40.0, 0.0]];
        let aligned = contrastive_loss(s.view(), Some(&[1, 0])).unwrap();
        let identity = contrastive_loss(s.view(), None).unwrap();
        assert!(aligned < 1e-6);
        assert!(identity > 30.0);
    }

    #[test]
    fn test_large_logits_are_stable() {
        let s = array![[1000.0, 999.0], [-1000.0, -999.0]];
        let loss = contrastive_loss(s.view(), None).unwrap();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_non_finite_scores_rejected() {
        let s = array![[1.0, 0.0], [f32::INFINITY, 0.0]];
        assert_eq!(
            contrastive_loss(s.view(), None),
            Err(dpr_core::Error::NonFiniteScore { row: 1 })
        );

        let s = array![[f32::NAN, 0.0]];
        assert_eq!(
            contrastive_loss(s.view(), None),
            Err(dpr_core::Error::NonFiniteScore { row: 0 })
        );
    }

    #[test]
    fn test_label_out_of_range() {
        let s = array![[1.0, 0.0], [0.0, 1.0]];
        assert_eq!(
            contrastive_loss(s.view(), Some(&[0, 2])),
            Err(dpr_core::Error::InvalidLabel {
                label: 2,
                num_passages: 2
            })
        );
    }

    #[test]
    fn test_default_labels_with_more_queries_than_passages() {
        let s = array![[1.0], [0.5]];
        assert!(matches!(
            contrastive_loss(s.view(), None),
            Err(dpr_core::Error::InvalidLabel { label: 1, .. })
        ));
    }

    #[test]
    fn test_default_labels_with_fewer_queries_than_passages() {
        let s = array![[1.0, 0.0, 0.0]];
        assert!(contrastive_loss(s.view(), None).is_ok());
    }

    #[test]
    fn test_label_length_mismatch() {
        let s = array![[1.0, 0.0], [0.0, 1.0]];
        assert!(matches!(
            contrastive_loss(s.view(), Some(&[0])),
            Err(dpr_core::Error::ShapeMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_empty_batch() {
        let s = ndarray::Array2::<f32>::zeros((0, 3));
        assert!(matches!(
            contrastive_loss(s.view(), None),
            Err(dpr_core::Error::EmptyBatch { .. })
        ));
    }
}
