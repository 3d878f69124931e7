//! Similarity scoring on a candle device.
//!
//! For large passage pools the whole `Q · Pᵗ` product runs as one matmul on
//! the device (Metal when the `metal` feature is enabled), and only the final
//! score matrix is copied back to the host.

/// Compute device for batched similarity scoring.
pub struct ScoreDevice {
    device: candle_core::Device,
}

impl ScoreDevice {
    /// Create the default device (Metal on macOS with the `metal` feature).
    pub fn new() -> dpr_core::Result<Self> {
        #[cfg(feature = "metal")]
        let device = candle_core::Device::new_metal(0).map_err(backend)?;

        #[cfg(not(feature = "metal"))]
        let device = candle_core::Device::Cpu;

        Ok(Self { device })
    }

    /// Create a CPU-only device.
    #[must_use]
    pub fn cpu() -> Self {
        Self {
            device: candle_core::Device::Cpu,
        }
    }

    /// The underlying candle device.
    #[must_use]
    pub fn device(&self) -> &candle_core::Device {
        &self.device
    }

    /// Compute `S = Q · Pᵗ` in a single device matmul.
    ///
    /// Same contract as [`crate::similarity`]: raw dot products, shape
    /// `[num_queries, num_passages]`.
    pub fn similarity(
        &self,
        queries: dpr_core::EmbeddingView<'_>,
        passages: dpr_core::EmbeddingView<'_>,
    ) -> dpr_core::Result<dpr_core::SimilarityMatrix> {
        dpr_core::check_same_dim(queries, passages)?;

        let (num_queries, dim) = queries.dim();
        let num_passages = passages.nrows();
        if num_queries == 0 || num_passages == 0 || dim == 0 {
            return Ok(ndarray::Array2::zeros((num_queries, num_passages)));
        }

        let query_tensor = self.upload(queries)?;
        let passage_tensor = self.upload(passages)?;

        // [Nq, D] @ [D, Np] = [Nq, Np]
        let passages_t = passage_tensor.t().map_err(backend)?;
        let scores = query_tensor
            .matmul(&passages_t)
            .map_err(backend)?
            .to_device(&candle_core::Device::Cpu)
            .map_err(backend)?
            .flatten_all()
            .map_err(backend)?
            .to_vec1::<f32>()
            .map_err(backend)?;

        ndarray::Array2::from_shape_vec((num_queries, num_passages), scores)
            .map_err(|e| dpr_core::Error::Backend(e.to_string()))
    }

    /// [`crate::top_k`] with the similarity matrix computed on this device.
    pub fn top_k(
        &self,
        queries: dpr_core::EmbeddingView<'_>,
        passages: dpr_core::EmbeddingView<'_>,
        k: Option<usize>,
    ) -> dpr_core::Result<dpr_core::Retrieved> {
        let scores = self.similarity(queries, passages)?;
        crate::top_k_scores(scores.view(), k)
    }

    fn upload(&self, matrix: dpr_core::EmbeddingView<'_>) -> dpr_core::Result<candle_core::Tensor> {
        // Views from slicing may not be contiguous; copy into standard layout first.
        let data: Vec<f32> = matrix.iter().copied().collect();
        candle_core::Tensor::from_vec(data, matrix.dim(), &self.device).map_err(backend)
    }
}

impl Default for ScoreDevice {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::cpu())
    }
}

fn backend(e: candle_core::Error) -> dpr_core::Error {
    dpr_core::Error::Backend(e.to_string())
}
