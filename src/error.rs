use thiserror::Error;

/// Problems with the input to a single frame. Any of these aborts the
/// current file only; the batch moves on to the next one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("unsupported pixel data dimensionality {shape:?} (expected 2 axes, or 3 with a trailing layer axis)")]
    UnsupportedLayout { shape: Vec<usize> },

    #[error("pixel buffer holds {actual} values but shape {shape:?} needs {expected}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("missing metadata card {0}")]
    MissingCard(String),

    #[error(
        "region {name} x:[{x0},{x1}) y:[{y0},{y1}) lies outside the {width}x{height} frame"
    )]
    RegionOutOfBounds {
        name: String,
        x0: usize,
        x1: usize,
        y0: usize,
        y1: usize,
        width: usize,
        height: usize,
    },

    #[error("invalid region {name}: {reason}")]
    InvalidRegion { name: String, reason: String },

    #[error("duplicate region name {0} in catalog")]
    DuplicateRegion(String),

    #[error("unknown calibration epoch {0}")]
    UnknownEpoch(String),

    #[error("invalid parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}
