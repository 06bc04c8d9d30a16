pub mod config;
pub mod data;
pub mod error;
pub mod layers;
pub mod params;
pub mod stack;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{ComposeActivation, ModelSpec};
pub use data::{Batch, Example};
pub use error::{Result, ThinStackError};
pub use layers::BufferEncoder;
pub use params::{ComposeParams, ProjectionParams, ThinStackParameters};
pub use stack::{ThinStack, TrackingHook, Transitions, REDUCE, SHIFT};
