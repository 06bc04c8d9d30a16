//! Flat per-batch storage for one thin stack.
//!
//! Layouts (B = batch, T = sequence length, D = model dim):
//!
//! - `stack`:  `[T * B, D]`, row `t * B + b` is the top of example `b` after step `t`
//! - `buffer`: `[B * T, D]`, row `b * T + p` is token `p` of example `b`
//! - `queue`:  `[B * T]`,    entry `b * T + k` is the timestep holding the
//!   k-th live element (from the bottom) of example `b`'s stack
//! - `cursors`: `[B]` buffer-read cursor, `queue_heads`: `[B]` live stack depth
//!
//! Index arrays are f32 so offset arithmetic stays on the device with the
//! same affine/add kernels as the feature rows.

use candle_core::{DType, Device, Shape, Tensor};

use crate::config::ModelSpec;
use crate::error::{Result, ThinStackError};

use super::kernels::write_rows;

fn alloc<S: Into<Shape>>(what: &'static str, shape: S, device: &Device) -> Result<Tensor> {
    Tensor::zeros(shape, DType::F32, device)
        .map_err(|source| ThinStackError::Allocation { what, source })
}

/// Per-step temporaries, each `[B, D]`.
#[derive(Debug)]
pub struct StepScratch {
    pub buffer_top: Tensor,
    pub stack_1: Tensor,
    pub stack_2: Tensor,
    pub merge_output: Tensor,
}

impl StepScratch {
    fn allocate(batch_size: usize, model_dim: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            buffer_top: alloc("buffer_top", (batch_size, model_dim), device)?,
            stack_1: alloc("stack_1", (batch_size, model_dim), device)?,
            stack_2: alloc("stack_2", (batch_size, model_dim), device)?,
            merge_output: alloc("merge_output", (batch_size, model_dim), device)?,
        })
    }

    fn zero(&self) -> candle_core::Result<()> {
        self.buffer_top.zero_set()?;
        self.stack_1.zero_set()?;
        self.stack_2.zero_set()?;
        self.merge_output.zero_set()
    }
}

/// All arrays owned by one thin stack, allocated once per configuration.
#[derive(Debug)]
pub struct StackMemory {
    batch_size: usize,
    model_dim: usize,
    seq_length: usize,
    stack: Tensor,
    buffer: Tensor,
    queue: Tensor,
    cursors: Tensor,
    queue_heads: Tensor,
    scratch: StepScratch,
}

impl StackMemory {
    pub fn allocate(spec: &ModelSpec, device: &Device) -> Result<Self> {
        spec.validate()?;
        let (b, d, t) = (spec.batch_size, spec.model_dim, spec.seq_length);

        let memory = Self {
            batch_size: b,
            model_dim: d,
            seq_length: t,
            stack: alloc("stack", (t * b, d), device)?,
            buffer: alloc("buffer", (b * t, d), device)?,
            queue: alloc("queue", (b * t,), device)?,
            cursors: alloc("cursors", (b,), device)?,
            queue_heads: alloc("queue_heads", (b,), device)?,
            scratch: StepScratch::allocate(b, d, device)?,
        };

        tracing::debug!(
            batch_size = b,
            model_dim = d,
            seq_length = t,
            stack_bytes = t * b * d * 4,
            "Allocated thin stack memory"
        );
        Ok(memory)
    }

    /// Zeroes stack, queue, cursors, queue heads and scratch rows. The buffer
    /// is an input and is left as populated.
    pub fn reset(&mut self) -> Result<()> {
        self.stack.zero_set()?;
        self.queue.zero_set()?;
        self.cursors = self.cursors.zeros_like()?;
        self.queue_heads = self.queue_heads.zeros_like()?;
        self.scratch.zero()?;
        Ok(())
    }

    /// Copies token vectors into the buffer.
    ///
    /// Accepts `[B, T, D]` or the flat `[B * T, D]` layout.
    pub fn set_buffer(&mut self, tokens: &Tensor) -> Result<()> {
        let flat_rows = self.batch_size * self.seq_length;
        let expected = vec![self.batch_size, self.seq_length, self.model_dim];
        let flat = match tokens.dims() {
            [b, t, d] if [*b, *t, *d] == expected[..] => tokens.reshape((flat_rows, *d))?,
            [rows, d] if *rows == flat_rows && *d == self.model_dim => tokens.clone(),
            _ => {
                return Err(ThinStackError::InputShape {
                    name: "buffer",
                    expected,
                    found: tokens.dims().to_vec(),
                })
            }
        };
        let flat = flat.to_device(self.buffer.device())?;
        write_rows("buffer", &self.buffer, &flat, 0)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn model_dim(&self) -> usize {
        self.model_dim
    }

    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    pub fn device(&self) -> &Device {
        self.stack.device()
    }

    pub fn stack(&self) -> &Tensor {
        &self.stack
    }

    pub fn buffer(&self) -> &Tensor {
        &self.buffer
    }

    pub fn queue(&self) -> &Tensor {
        &self.queue
    }

    pub fn cursors(&self) -> &Tensor {
        &self.cursors
    }

    pub fn queue_heads(&self) -> &Tensor {
        &self.queue_heads
    }

    pub fn scratch(&self) -> &StepScratch {
        &self.scratch
    }

    pub(crate) fn set_cursors(&mut self, cursors: Tensor) {
        self.cursors = cursors;
    }

    pub(crate) fn set_queue_heads(&mut self, queue_heads: Tensor) {
        self.queue_heads = queue_heads;
    }

    /// Owned copy of stack row block `t`, `[B, D]`.
    pub fn stack_row(&self, t: usize) -> Result<Tensor> {
        if t >= self.seq_length {
            return Err(ThinStackError::OffsetOutOfRange {
                what: "stack row",
                offset: t as f32,
                extent: self.seq_length,
            });
        }
        Ok(self
            .stack
            .narrow(0, t * self.batch_size, self.batch_size)?
            .copy()?)
    }

    /// Host copy of the buffer cursors.
    pub fn cursors_vec(&self) -> Result<Vec<usize>> {
        index_vec(&self.cursors)
    }

    /// Host copy of the live stack depths.
    pub fn queue_heads_vec(&self) -> Result<Vec<usize>> {
        index_vec(&self.queue_heads)
    }

    /// Host copy of the queue, one row per example.
    pub fn queue_rows(&self) -> Result<Vec<Vec<usize>>> {
        let rows = self.queue.reshape((self.batch_size, self.seq_length))?;
        let rows: Vec<Vec<f32>> = rows.to_vec2()?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v as usize).collect())
            .collect())
    }
}

fn index_vec(t: &Tensor) -> Result<Vec<usize>> {
    let host: Vec<f32> = t.to_vec1()?;
    Ok(host.into_iter().map(|v| v as usize).collect())
}
