//! Thin stack: a batch of shift-reduce stacks stored as flat arrays.
//!
//! The stack is a write-once arena indexed by timestep. A per-example queue of
//! timesteps records which arena rows are still live, so the second-from-top
//! entry is found by arithmetic instead of pointer chasing, and every example
//! advances with the same batch-wide ops.

pub mod compose;
pub mod helpers;
pub mod kernels;
pub mod memory;
pub mod thin_stack;
pub mod transitions;

pub use compose::{Composition, TrackingHook};
pub use helpers::BatchHelpers;
pub use memory::{StackMemory, StepScratch};
pub use thin_stack::ThinStack;
pub use transitions::{Transitions, REDUCE, SHIFT};
