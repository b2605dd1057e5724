use thiserror::Error;

/// Errors returned by the configuration surfaces of this crate.
///
/// The estimators themselves never fail; they report "no result yet" with `None`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed field trial string: {0}")]
    MalformedFieldTrials(String),

    #[error("invalid rate window size {requested} ms, must be between 1 and {max} ms")]
    InvalidWindowSize { requested: i64, max: i64 },
}

pub type Result<T> = std::result::Result<T, Error>;
