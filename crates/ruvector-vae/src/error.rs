//! Error types for the VAE crate.
//!
//! Every failure is fatal at the granularity of a training run: shape
//! violations are raised before any arithmetic, construction problems are
//! raised before any parameter is allocated, and non-finite losses abort the
//! run with the pass, epoch and batch that produced them.

/// Result type alias for VAE operations.
pub type Result<T> = std::result::Result<T, VaeError>;

/// Primary error type for model construction, loss evaluation and training.
#[derive(Debug, thiserror::Error)]
pub enum VaeError {
    /// Two tensors that must agree in shape (or element count) do not.
    #[error("dimension error in {context}: the shape mismatched {left:?} and {right:?}")]
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// Shape of the left-hand operand (usually the produced tensor).
        left: Vec<usize>,
        /// Shape of the right-hand operand (usually the expected tensor).
        right: Vec<usize>,
    },

    /// The encoder/decoder geometry is inconsistent for the requested input length.
    #[error("model construction failed: {0}")]
    Construction(String),

    /// A loss or parameter became NaN or infinite.
    #[error("numerical instability during {stage} (epoch {epoch}, batch {batch}): {detail}")]
    NumericInstability {
        /// Pass that produced the value (`train` or `eval`).
        stage: &'static str,
        /// 1-based epoch index.
        epoch: usize,
        /// 0-based batch index within the pass.
        batch: usize,
        /// Human-readable explanation.
        detail: String,
    },

    /// A hyperparameter is outside its valid range.
    #[error("configuration error: {0}")]
    Config(String),

    /// A dataset that must contain at least one window is empty.
    #[error("empty dataset: {0}")]
    EmptyDataset(String),

    /// The shared parameter store could not be accessed.
    #[error("parameter store unavailable: {0}")]
    ParameterStore(String),

    /// Checkpoint capture, persistence or restore failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Tensor backend error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl VaeError {
    /// Builds a [`VaeError::ShapeMismatch`] from two candle shapes.
    pub fn shape_mismatch(context: impl Into<String>, left: &[usize], right: &[usize]) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}

impl From<serde_json::Error> for VaeError {
    fn from(err: serde_json::Error) -> Self {
        VaeError::Serialization(err.to_string())
    }
}
