//! Top-k passage retrieval.

use std::cmp::Ordering;

/// Retrieve the `k` best passages for every query.
///
/// Computes `S = Q · Pᵗ` and keeps, per query row, the `k` largest scores in
/// descending order. `k = None` ranks every passage.
///
/// Equal scores are ordered by passage index (lower first). NaN scores are
/// ordered with [`f32::total_cmp`], so a positive NaN sorts ahead of every
/// finite score.
///
/// # Errors
/// - [`dpr_core::Error::ShapeMismatch`] if `Q` and `P` differ in dimension.
/// - [`dpr_core::Error::InvalidK`] if `k` is 0 or exceeds the passage count.
pub fn top_k(
    queries: dpr_core::EmbeddingView<'_>,
    passages: dpr_core::EmbeddingView<'_>,
    k: Option<usize>,
) -> dpr_core::Result<dpr_core::Retrieved> {
    let scores = crate::similarity(queries, passages)?;
    top_k_scores(scores.view(), k)
}

/// Same selection as [`top_k`], over a precomputed similarity matrix.
pub fn top_k_scores(
    scores: ndarray::ArrayView2<'_, f32>,
    k: Option<usize>,
) -> dpr_core::Result<dpr_core::Retrieved> {
    let num_passages = scores.ncols();
    let k = k.unwrap_or(num_passages);
    if k == 0 || k > num_passages {
        return Err(dpr_core::Error::InvalidK {
            k,
            max: Some(num_passages),
        });
    }

    let mut indices = Vec::with_capacity(scores.nrows());
    let mut values = Vec::with_capacity(scores.nrows());

    for row in scores.outer_iter() {
        let by_rank = |&a: &usize, &b: &usize| -> Ordering {
            row[b].total_cmp(&row[a]).then(a.cmp(&b))
        };

        let mut order: Vec<usize> = (0..num_passages).collect();
        if k < num_passages {
            order.select_nth_unstable_by(k - 1, by_rank);
            order.truncate(k);
        }
        order.sort_unstable_by(by_rank);

        values.push(order.iter().map(|&j| row[j]).collect());
        indices.push(order);
    }

    Ok(dpr_core::Retrieved {
        indices,
        scores: values,
    })
}

/// Map retrieved index rows back to the passages they point at.
///
/// Row order and within-row order are preserved.
///
/// # Errors
/// [`dpr_core::Error::IndexOutOfRange`] if any index is not a valid position
/// in `passages`.
pub fn select_by_indices<T: Clone>(
    indices: &[Vec<usize>],
    passages: &[T],
) -> dpr_core::Result<Vec<Vec<T>>> {
    indices
        .iter()
        .map(|row| {
            row.iter()
                .map(|&index| {
                    passages
                        .get(index)
                        .cloned()
                        .ok_or(dpr_core::Error::IndexOutOfRange {
                            index,
                            len: passages.len(),
                        })
                })
                .collect()
        })
        .collect()
}
