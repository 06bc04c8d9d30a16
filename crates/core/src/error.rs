use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThinStackError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to allocate {what}: {source}")]
    Allocation {
        what: &'static str,
        #[source]
        source: candle_core::Error,
    },

    #[error("{what} offset {offset} out of range for extent {extent}")]
    OffsetOutOfRange {
        what: &'static str,
        offset: f32,
        extent: usize,
    },

    #[error("malformed transitions for example {example} at timestep {timestep}: {reason}")]
    MalformedTransitions {
        example: usize,
        timestep: usize,
        reason: &'static str,
    },

    #[error("parameter {name} has shape {found:?}, expected {expected:?}")]
    ParamShape {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("input {name} has shape {found:?}, expected {expected:?}")]
    InputShape {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("{0} must be set before forward")]
    MissingInput(&'static str),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, ThinStackError>;
