use candle_core::{DType, Device, Result, Tensor};

/// Per-example constants used for offset arithmetic.
///
/// `range = [0, 1, ..., B-1]` and `ones = [1; B]`, both f32 on the stack's
/// device. A per-example scalar index becomes a flat offset into a
/// batch-strided array via `index * scale + base + range * batch_stride`.
#[derive(Debug, Clone)]
pub struct BatchHelpers {
    range: Tensor,
    ones: Tensor,
}

impl BatchHelpers {
    pub fn new(batch_size: usize, device: &Device) -> Result<Self> {
        let range = Tensor::arange(0u32, batch_size as u32, device)?.to_dtype(DType::F32)?;
        let ones = Tensor::ones((batch_size,), DType::F32, device)?;
        Ok(Self { range, ones })
    }

    pub fn batch_size(&self) -> usize {
        self.ones.dims1().unwrap_or(0)
    }

    pub fn range(&self) -> &Tensor {
        &self.range
    }

    pub fn ones(&self) -> &Tensor {
        &self.ones
    }

    /// `range * batch_stride`: the start offset of each example in a
    /// batch-major array whose examples are `batch_stride` rows apart.
    pub fn batch_offsets(&self, batch_stride: usize) -> Result<Tensor> {
        self.range.affine(batch_stride as f64, 0.0)
    }

    /// `ones * value`, a per-example constant.
    pub fn fill(&self, value: f32) -> Result<Tensor> {
        self.ones.affine(value as f64, 0.0)
    }
}
