use candle_core::{Result, Tensor};

use crate::config::ComposeActivation;
use crate::params::ComposeParams;

/// Injection point for a tracking unit.
///
/// Called once per step with the same inputs the composition sees. The
/// returned `[B, tracking_dim]` features are multiplied by `compose_W_ext`
/// and added to the merge pre-activation.
pub trait TrackingHook: Send {
    fn features(
        &mut self,
        t: usize,
        stack_1: &Tensor,
        stack_2: &Tensor,
        buffer_top: &Tensor,
    ) -> Result<Tensor>;
}

/// Dense merge of two children into a parent.
///
/// With children as rows (`[B, D]`):
///
/// ```text
///   merged = act(left · W_lᵀ + right · W_rᵀ [+ ext · W_extᵀ] + b)
/// ```
///
/// which is `W_l · L + W_r · R + b` in the column layout the weights are
/// stored for. Transposes are materialized once at construction.
#[derive(Debug, Clone)]
pub struct Composition {
    w_l_t: Tensor,
    w_r_t: Tensor,
    w_ext_t: Option<Tensor>,
    b: Tensor,
    activation: ComposeActivation,
}

impl Composition {
    pub fn new(params: &ComposeParams, activation: ComposeActivation) -> Result<Self> {
        let w_ext_t = match &params.w_ext {
            Some(w) => Some(w.t()?.contiguous()?),
            None => None,
        };
        Ok(Self {
            w_l_t: params.w_l.t()?.contiguous()?,
            w_r_t: params.w_r.t()?.contiguous()?,
            w_ext_t,
            b: params.b.clone(),
            activation,
        })
    }

    pub fn accepts_tracking(&self) -> bool {
        self.w_ext_t.is_some()
    }

    pub fn activation(&self) -> ComposeActivation {
        self.activation
    }

    /// Pre-activation sum of both children, the tracking term and the bias.
    pub fn pre_activation(
        &self,
        left: &Tensor,
        right: &Tensor,
        tracking: Option<&Tensor>,
    ) -> Result<Tensor> {
        let mut acc = left.matmul(&self.w_l_t)?;
        acc = (acc + right.matmul(&self.w_r_t)?)?;
        if let Some(features) = tracking {
            let w_ext_t = self.w_ext_t.as_ref().ok_or_else(|| {
                candle_core::Error::Msg("tracking features given without compose_W_ext".into())
            })?;
            acc = (acc + features.matmul(w_ext_t)?)?;
        }
        acc.broadcast_add(&self.b)
    }

    /// `left` is the second-from-top entry, `right` the top.
    pub fn forward(
        &self,
        left: &Tensor,
        right: &Tensor,
        tracking: Option<&Tensor>,
    ) -> Result<Tensor> {
        let pre = self.pre_activation(left, right, tracking)?;
        match self.activation {
            ComposeActivation::Relu => pre.relu(),
            ComposeActivation::Identity => Ok(pre),
        }
    }
}
