/// All errors that can occur while reading UCI data.
///
/// End of data is not an error: readers report it as `Ok(false)`.
/// Every variant here aborts the current read pass; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing, malformed or contradictory configuration.
    #[error("config error: {0}")]
    Config(String),

    /// More distinct categories than the declared label dimension.
    #[error("label overflow: label {label:?} would need id {label_dim}, but labelDim is {label_dim}")]
    LabelOverflow { label: String, label_dim: usize },

    /// A category outside a fixed vocabulary with no out-of-vocabulary bucket.
    #[error("unknown label {label:?}: not in the fixed label vocabulary")]
    UnknownLabel { label: String },

    /// Malformed input record.
    #[error("parse error in {source_name} at line {line}: {msg}")]
    Parse {
        source_name: String,
        line: usize,
        msg: String,
    },

    /// Operation this reader does not implement (e.g. overriding the seed).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Call made in a state that does not allow it.
    #[error("invalid reader state: {0}")]
    InvalidState(String),

    /// Cache file that cannot be decoded or does not belong to this reader.
    #[error("cache format error: {0}")]
    CacheFormat(String),

    /// Element count mismatch when creating a buffer from a vec.
    #[error("element count mismatch: [{rows}x{cols}] requires {expected} elements, got {got}")]
    ElementCountMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        got: usize,
    },

    /// Index outside a buffer.
    #[error("index out of bounds: ({row}, {col}) in a [{rows}x{cols}] matrix")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Create a configuration error.
    pub fn config(s: impl Into<String>) -> Self {
        Error::Config(s.into())
    }

    pub fn parse(source_name: impl Into<String>, line: usize, msg: impl Into<String>) -> Self {
        Error::Parse {
            source_name: source_name.into(),
            line,
            msg: msg.into(),
        }
    }
}

/// Convenience Result type used throughout the reader crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
