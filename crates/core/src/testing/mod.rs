//! Shared test utilities for thinstack-core.
//!
//! A host-side reference stack, small model shapes and parameter builders
//! used by unit tests, integration tests and benchmarks.

mod reference;
mod tiny_spec;

pub use reference::{dense_compose, random_transitions, reference_forward, ReferenceRun};
pub use tiny_spec::{identity_params, integer_params, tiny_spec};
