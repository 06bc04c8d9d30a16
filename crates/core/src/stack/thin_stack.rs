//! Batched shift-reduce recurrence over flat stack memory.
//!
//! Each step runs the same fixed sequence of batch-wide ops for every
//! example; per-example shift/reduce choices only enter as a 0/1 mask.
//!
//! ```text
//!   buffer_top = buffer[cursor + range * T]
//!   stack_1    = stack[(t - 1) * B + range]                      (top)
//!   stack_2    = stack[queue[head - 2 + range * T] * B + range]  (second from top)
//!   stack[t]   = mask ? compose(stack_2, stack_1) : buffer_top
//!   cursor    += 1 - mask
//!   head      += 1 - 2 * mask;  queue[head - 1 + range * T] = t
//! ```

use candle_core::{Device, Tensor};

use super::compose::{Composition, TrackingHook};
use super::helpers::BatchHelpers;
use super::kernels::{flat_offsets, gather, scatter_scalar, select_by_mask, write_rows};
use super::memory::StackMemory;
use super::transitions::Transitions;
use crate::config::ModelSpec;
use crate::error::{Result, ThinStackError};
use crate::params::{ComposeParams, ThinStackParameters};

pub struct ThinStack {
    spec: ModelSpec,
    params: ThinStackParameters,
    composition: Composition,
    helpers: BatchHelpers,
    memory: StackMemory,
    transitions: Option<Transitions>,
    buffer_ready: bool,
    tracking: Option<Box<dyn TrackingHook>>,
}

impl std::fmt::Debug for ThinStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThinStack")
            .field("spec", &self.spec)
            .field("buffer_ready", &self.buffer_ready)
            .field("has_transitions", &self.transitions.is_some())
            .field("has_tracking", &self.tracking.is_some())
            .finish()
    }
}

impl ThinStack {
    /// Validates the spec, moves parameters to `device` and allocates every
    /// array. Nothing is stepped until inputs are set.
    pub fn new(spec: ModelSpec, params: ThinStackParameters, device: &Device) -> Result<Self> {
        spec.validate()?;
        let d = spec.model_dim;
        if params.compose.model_dim() != d {
            return Err(ThinStackError::ParamShape {
                name: "compose_b",
                expected: vec![d],
                found: params.compose.b.dims().to_vec(),
            });
        }

        let compose = &params.compose;
        let w_ext = match &compose.w_ext {
            Some(w) => Some(w.to_device(device)?),
            None => None,
        };
        let compose = ComposeParams {
            w_l: compose.w_l.to_device(device)?,
            w_r: compose.w_r.to_device(device)?,
            b: compose.b.to_device(device)?,
            w_ext,
        };
        let composition = Composition::new(&compose, spec.compose_activation)?;
        let params = ThinStackParameters {
            compose,
            projection: params.projection,
        };

        let memory = StackMemory::allocate(&spec, device)?;
        let helpers = BatchHelpers::new(spec.batch_size, device).map_err(|source| {
            ThinStackError::Allocation {
                what: "batch helpers",
                source,
            }
        })?;

        Ok(Self {
            spec,
            params,
            composition,
            helpers,
            memory,
            transitions: None,
            buffer_ready: false,
            tracking: None,
        })
    }

    /// Attaches a tracking unit whose features feed the composition through
    /// `compose_W_ext`.
    pub fn with_tracking(mut self, hook: Box<dyn TrackingHook>) -> Result<Self> {
        if !self.composition.accepts_tracking() {
            return Err(ThinStackError::ParamShape {
                name: "compose_W_ext",
                expected: vec![self.spec.model_dim, self.spec.tracking_dim],
                found: Vec::new(),
            });
        }
        self.tracking = Some(hook);
        Ok(self)
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn parameters(&self) -> &ThinStackParameters {
        &self.params
    }

    pub fn memory(&self) -> &StackMemory {
        &self.memory
    }

    pub fn device(&self) -> &Device {
        self.memory.device()
    }

    /// Token vectors, `[B, T, D]` or `[B * T, D]`.
    pub fn set_buffer(&mut self, tokens: &Tensor) -> Result<()> {
        self.memory.set_buffer(tokens)?;
        self.buffer_ready = true;
        Ok(())
    }

    pub fn set_transitions(&mut self, transitions: Transitions) -> Result<()> {
        let expected = vec![self.spec.batch_size, self.spec.seq_length];
        let found = vec![transitions.batch_size(), transitions.seq_length()];
        if found != expected {
            return Err(ThinStackError::InputShape {
                name: "transitions",
                expected,
                found,
            });
        }
        self.transitions = Some(transitions);
        Ok(())
    }

    /// Validates host labels (`[B][T]`, 0 = shift, 1 = reduce) and sets them.
    pub fn set_transition_labels(&mut self, labels: Vec<Vec<u8>>) -> Result<()> {
        let transitions = Transitions::new(labels, &self.spec, self.memory.device())?;
        self.transitions = Some(transitions);
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.memory.reset()
    }

    /// Advances every example by one transition.
    ///
    /// Step `t` reads rows written by steps `< t`, so steps must run in order
    /// after a `reset`. The device is synchronized before returning.
    pub fn step(&mut self, t: usize) -> Result<()> {
        let (batch, seq) = (self.spec.batch_size, self.spec.seq_length);
        if t >= seq {
            return Err(ThinStackError::OffsetOutOfRange {
                what: "timestep",
                offset: t as f32,
                extent: seq,
            });
        }
        if !self.buffer_ready {
            return Err(ThinStackError::MissingInput("buffer"));
        }
        let transitions = self
            .transitions
            .as_ref()
            .ok_or(ThinStackError::MissingInput("transitions"))?;
        let mask = transitions.row(t)?;
        let helpers = &self.helpers;
        let mem = &self.memory;

        let buffer_ptrs = flat_offsets(mem.cursors(), 1.0, 0.0, seq, helpers)?;
        let buffer_top = gather("buffer", mem.buffer(), &buffer_ptrs)?;

        // Second-from-top lives at queue position head - 2. Examples with a
        // shallower stack read slot 0; their merge candidate is discarded.
        let second = mem.queue_heads().affine(1.0, -2.0)?.maximum(0f32)?;
        let queue_ptrs = flat_offsets(&second, 1.0, 0.0, seq, helpers)?;
        let stack_2_t = gather("queue", mem.queue(), &queue_ptrs)?;
        let stack_2_ptrs = flat_offsets(&stack_2_t, batch as f32, 0.0, 1, helpers)?;

        let prev = t.saturating_sub(1);
        let stack_1_ptrs = flat_offsets(helpers.ones(), 0.0, (prev * batch) as f32, 1, helpers)?;
        let stack_1 = gather("stack", mem.stack(), &stack_1_ptrs)?;
        let stack_2 = gather("stack", mem.stack(), &stack_2_ptrs)?;

        let scratch = mem.scratch();
        write_rows("buffer_top", &scratch.buffer_top, &buffer_top, 0)?;
        write_rows("stack_1", &scratch.stack_1, &stack_1, 0)?;
        write_rows("stack_2", &scratch.stack_2, &stack_2, 0)?;

        let tracking = match self.tracking.as_mut() {
            Some(hook) => Some(hook.features(t, &stack_1, &stack_2, &buffer_top)?),
            None => None,
        };
        let merge = self
            .composition
            .forward(&stack_2, &stack_1, tracking.as_ref())?;
        write_rows("merge_output", &scratch.merge_output, &merge, 0)?;

        let top = select_by_mask(&mask, &scratch.merge_output, &scratch.buffer_top)?;
        write_rows("stack", mem.stack(), &top, t * batch)?;

        // One shift indicator drives both the buffer cursor and the stack depth.
        let shift = (helpers.ones() - &mask)?;
        let cursors = (mem.cursors() + &shift)?;
        let queue_heads = ((mem.queue_heads() + &shift)? - &mask)?;
        let head_ptrs = flat_offsets(&queue_heads, 1.0, -1.0, seq, helpers)?;
        scatter_scalar("queue", mem.queue(), t as f32, &head_ptrs, helpers)?;

        self.memory.set_cursors(cursors);
        self.memory.set_queue_heads(queue_heads);
        self.memory.device().synchronize()?;

        tracing::trace!(t, "Thin stack step complete");
        Ok(())
    }

    /// Resets memory and runs every step in order. Returns the final top of
    /// stack per example, `[B, D]`.
    pub fn forward(&mut self) -> Result<Tensor> {
        if !self.buffer_ready {
            return Err(ThinStackError::MissingInput("buffer"));
        }
        if self.transitions.is_none() {
            return Err(ThinStackError::MissingInput("transitions"));
        }

        let span = tracing::debug_span!(
            "thin_stack_forward",
            batch_size = self.spec.batch_size,
            seq_length = self.spec.seq_length
        );
        let _entered = span.entered();

        self.reset()?;
        for t in 0..self.spec.seq_length {
            self.step(t)?;
        }
        tracing::debug!("Thin stack forward complete");
        self.final_encoding()
    }

    /// Stack row at the last timestep, `[B, D]`.
    pub fn final_encoding(&self) -> Result<Tensor> {
        self.memory.stack_row(self.spec.seq_length - 1)
    }

    /// Stack row at timestep `t`, `[B, D]`.
    pub fn stack_row(&self, t: usize) -> Result<Tensor> {
        self.memory.stack_row(t)
    }

    pub fn cursors(&self) -> Result<Vec<usize>> {
        self.memory.cursors_vec()
    }

    pub fn queue_heads(&self) -> Result<Vec<usize>> {
        self.memory.queue_heads_vec()
    }

    /// Per-example final encodings on the host.
    pub fn final_encoding_vec(&self) -> Result<Vec<Vec<f32>>> {
        Ok(self.final_encoding()?.to_vec2()?)
    }
}
