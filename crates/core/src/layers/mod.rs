pub mod buffer_encoder;

pub use buffer_encoder::BufferEncoder;
