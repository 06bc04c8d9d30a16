use candle_core::{DType, Device, Tensor};
use rand::Rng;

use crate::config::{ComposeActivation, ModelSpec};
use crate::error::Result;
use crate::params::ThinStackParameters;

/// Small shape for fast tests: 4 examples, 8 features, 6 steps.
pub fn tiny_spec() -> ModelSpec {
    ModelSpec::new(4, 8, 6).with_activation(ComposeActivation::Identity)
}

/// `W_l = W_r = I`, `b = 0`: a reduce adds its two children.
pub fn identity_params(spec: &ModelSpec, device: &Device) -> Result<ThinStackParameters> {
    let d = spec.model_dim;
    let eye = Tensor::eye(d, DType::F32, device)?;
    let b = Tensor::zeros(d, DType::F32, device)?;
    ThinStackParameters::from_tensors(spec, eye.clone(), eye, b)
}

/// Random weights in `{-1, 0, 1}` and bias in `{-1, 0, 1}`.
///
/// Integer values keep every product and sum exact in f32, so device results
/// can be compared to a host reference bit for bit. Returns the parameters
/// and their host copies `(W_l, W_r, b)`.
#[allow(clippy::type_complexity)]
pub fn integer_params<R: Rng>(
    spec: &ModelSpec,
    rng: &mut R,
    device: &Device,
) -> Result<(ThinStackParameters, (Vec<Vec<f32>>, Vec<Vec<f32>>, Vec<f32>))> {
    let d = spec.model_dim;
    let mut draw = |n: usize| -> Vec<f32> {
        (0..n).map(|_| rng.gen_range(-1i32..=1) as f32).collect()
    };
    let w_l = draw(d * d);
    let w_r = draw(d * d);
    let b = draw(d);

    let params = ThinStackParameters::from_tensors(
        spec,
        Tensor::from_vec(w_l.clone(), (d, d), device)?,
        Tensor::from_vec(w_r.clone(), (d, d), device)?,
        Tensor::from_vec(b.clone(), d, device)?,
    )?;

    let rows = |flat: Vec<f32>| flat.chunks(d).map(<[f32]>::to_vec).collect::<Vec<_>>();
    Ok((params, (rows(w_l), rows(w_r), b)))
}
