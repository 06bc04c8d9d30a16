//! Batch-wide gather/scatter primitives over flat arrays.
//!
//! Every array is stored flat with rows addressed by f32 offsets computed from
//! per-example indices. Offsets are validated on the host before any device
//! read or write: an offset outside its array is a defect in cursor/queue
//! arithmetic and fails the whole step.

use candle_core::Tensor;

use super::helpers::BatchHelpers;
use crate::error::{Result, ThinStackError};

/// `index * scale + base + range * batch_stride` for every example.
pub fn flat_offsets(
    index: &Tensor,
    scale: f32,
    base: f32,
    batch_stride: usize,
    helpers: &BatchHelpers,
) -> candle_core::Result<Tensor> {
    let scaled = index.affine(scale as f64, base as f64)?;
    scaled + helpers.batch_offsets(batch_stride)?
}

/// Converts f32 offsets into u32 row indices, rejecting anything that is not
/// an integral row inside `[0, extent)`.
pub fn checked_indices(what: &'static str, offsets: &Tensor, extent: usize) -> Result<Tensor> {
    let host: Vec<f32> = offsets.to_vec1()?;
    for &offset in &host {
        let valid = offset.is_finite()
            && offset >= 0.0
            && offset.fract() == 0.0
            && (offset as usize) < extent;
        if !valid {
            return Err(ThinStackError::OffsetOutOfRange {
                what,
                offset,
                extent,
            });
        }
    }
    let indices: Vec<u32> = host.iter().map(|&o| o as u32).collect();
    let len = indices.len();
    Ok(Tensor::from_vec(indices, (len,), offsets.device())?)
}

/// Copies row `offsets[i]` of `src` into row `i` of the result.
///
/// `src` is `[rows, D]` (result `[B, D]`) or `[rows]` (result `[B]`).
pub fn gather(what: &'static str, src: &Tensor, offsets: &Tensor) -> Result<Tensor> {
    let extent = src.dim(0)?;
    let indices = checked_indices(what, offsets, extent)?;
    Ok(src.index_select(&indices, 0)?)
}

/// Writes the scalar `value` at `dst[offsets[i]]` for every example, in place.
///
/// `dst` must be a contiguous 1-D array.
pub fn scatter_scalar(
    what: &'static str,
    dst: &Tensor,
    value: f32,
    offsets: &Tensor,
    helpers: &BatchHelpers,
) -> Result<()> {
    let extent = dst.dims1()?;
    let indices = checked_indices(what, offsets, extent)?;
    let source = helpers.fill(value)?;
    dst.scatter_set(&indices, &source, 0)?;
    Ok(())
}

/// Per-example choice between two `[B, D]` candidates.
///
/// Row `i` of the result is exactly `value_if_1[i]` when `mask[i] != 0` and
/// exactly `value_if_0[i]` otherwise; the mask is broadcast across features,
/// never used as an interpolation weight.
pub fn select_by_mask(
    mask: &Tensor,
    value_if_1: &Tensor,
    value_if_0: &Tensor,
) -> candle_core::Result<Tensor> {
    let (batch, dim) = value_if_1.dims2()?;
    let mask = mask
        .ne(0f32)?
        .reshape((batch, 1))?
        .broadcast_as((batch, dim))?
        .contiguous()?;
    mask.where_cond(value_if_1, value_if_0)
}

/// Writes `rows` (`[B, D]`) into `dst` (`[rows, D]`) starting at `row_offset`.
pub fn write_rows(
    what: &'static str,
    dst: &Tensor,
    rows: &Tensor,
    row_offset: usize,
) -> Result<()> {
    let extent = dst.dim(0)?;
    let count = rows.dim(0)?;
    if row_offset + count > extent {
        return Err(ThinStackError::OffsetOutOfRange {
            what,
            offset: (row_offset + count) as f32,
            extent,
        });
    }
    let rows = if rows.dtype() == dst.dtype() {
        rows.contiguous()?
    } else {
        rows.to_dtype(dst.dtype())?.contiguous()?
    };
    dst.slice_set(&rows, 0, row_offset)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn helpers(batch: usize) -> BatchHelpers {
        BatchHelpers::new(batch, &Device::Cpu).expect("helpers")
    }

    #[test]
    fn flat_offsets_combines_index_and_batch_stride() {
        let h = helpers(3);
        let index = Tensor::new(&[2f32, 0.0, 1.0], &Device::Cpu).expect("index");
        let offsets = flat_offsets(&index, 1.0, -1.0, 4, &h).expect("offsets");
        // (index - 1) + range * 4
        assert_eq!(offsets.to_vec1::<f32>().expect("vec"), vec![1.0, 3.0, 8.0]);
        let indices = checked_indices("test", &offsets, 9).expect("indices");
        assert_eq!(indices.to_vec1::<u32>().expect("u32"), vec![1, 3, 8]);
    }

    #[test]
    fn gather_rows_by_offset() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let src = Tensor::from_vec(data, (4, 3), &Device::Cpu).expect("src");
        let offsets = Tensor::new(&[3f32, 0.0], &Device::Cpu).expect("offsets");
        let out = gather("test", &src, &offsets).expect("gather");
        assert_eq!(
            out.to_vec2::<f32>().expect("vec"),
            vec![vec![9.0, 10.0, 11.0], vec![0.0, 1.0, 2.0]]
        );
    }

    #[test]
    fn gather_scalars_by_offset() {
        let src = Tensor::new(&[5f32, 6.0, 7.0], &Device::Cpu).expect("src");
        let offsets = Tensor::new(&[2f32, 2.0, 1.0], &Device::Cpu).expect("offsets");
        let out = gather("test", &src, &offsets).expect("gather");
        assert_eq!(out.to_vec1::<f32>().expect("vec"), vec![7.0, 7.0, 6.0]);
    }

    #[test]
    fn gather_out_of_range_is_fatal() {
        let src = Tensor::zeros((4, 2), DType::F32, &Device::Cpu).expect("src");
        for bad in [4f32, -1.0, 1.5, f32::NAN] {
            let offsets = Tensor::new(&[0f32, bad], &Device::Cpu).expect("offsets");
            let err = gather("stack", &src, &offsets).unwrap_err();
            match err {
                ThinStackError::OffsetOutOfRange { what, extent, .. } => {
                    assert_eq!(what, "stack");
                    assert_eq!(extent, 4);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn scatter_scalar_writes_in_place() {
        let h = helpers(2);
        let dst = Tensor::zeros((6,), DType::F32, &Device::Cpu).expect("dst");
        let offsets = Tensor::new(&[1f32, 4.0], &Device::Cpu).expect("offsets");
        scatter_scalar("queue", &dst, 3.0, &offsets, &h).expect("scatter");
        assert_eq!(
            dst.to_vec1::<f32>().expect("vec"),
            vec![0.0, 3.0, 0.0, 0.0, 3.0, 0.0]
        );
    }

    #[test]
    fn scatter_scalar_out_of_range_leaves_dst_untouched() {
        let h = helpers(2);
        let dst = Tensor::zeros((4,), DType::F32, &Device::Cpu).expect("dst");
        let offsets = Tensor::new(&[1f32, 4.0], &Device::Cpu).expect("offsets");
        assert!(scatter_scalar("queue", &dst, 3.0, &offsets, &h).is_err());
        assert_eq!(dst.to_vec1::<f32>().expect("vec"), vec![0.0; 4]);
    }

    #[test]
    fn select_by_mask_never_blends() {
        let merge = Tensor::new(&[[1f32, 2.0], [3.0, 4.0], [5.0, 6.0]], &Device::Cpu).expect("m");
        let push = Tensor::new(&[[-1f32, -2.0], [-3.0, -4.0], [-5.0, -6.0]], &Device::Cpu)
            .expect("p");
        let mask = Tensor::new(&[1f32, 0.0, 1.0], &Device::Cpu).expect("mask");
        let out = select_by_mask(&mask, &merge, &push).expect("select");
        assert_eq!(
            out.to_vec2::<f32>().expect("vec"),
            vec![vec![1.0, 2.0], vec![-3.0, -4.0], vec![5.0, 6.0]]
        );
    }

    #[test]
    fn write_rows_targets_block() {
        let dst = Tensor::zeros((6, 2), DType::F32, &Device::Cpu).expect("dst");
        let rows = Tensor::new(&[[1f32, 1.0], [2.0, 2.0]], &Device::Cpu).expect("rows");
        write_rows("stack", &dst, &rows, 2).expect("write");
        let out = dst.to_vec2::<f32>().expect("vec");
        assert_eq!(out[2], vec![1.0, 1.0]);
        assert_eq!(out[3], vec![2.0, 2.0]);
        assert_eq!(out[0], vec![0.0, 0.0]);
        assert_eq!(out[4], vec![0.0, 0.0]);
    }

    #[test]
    fn write_rows_past_end_rejected() {
        let dst = Tensor::zeros((4, 2), DType::F32, &Device::Cpu).expect("dst");
        let rows = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).expect("rows");
        assert!(write_rows("stack", &dst, &rows, 3).is_err());
    }
}
