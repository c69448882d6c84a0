//! Error types for the overwatcher engine.
//!
//! Mirrors the layering used across the rest of the crate: a narrow error
//! per concern (`LinkError`, `DescriptionError`) that converts into the
//! top-level [`EngineError`] via `#[from]`.

use thiserror::Error;

/// Top-level error type for a test run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The initial socket could not be constructed at all. Per spec, a
    /// failed *connect* is retried forever and is never fatal — only a
    /// failure to build the socket itself reaches this variant.
    #[error("fatal link error: {0}")]
    FatalLink(String),

    /// A trigger/action token referenced a name that is neither a known
    /// modifier nor a literal command the description declared reachable.
    #[error("missing modifier implementation: {0}")]
    UnknownModifier(String),

    /// The test description failed to parse or validate.
    #[error("test description error: {0}")]
    Description(#[from] DescriptionError),

    /// A low-level I/O failure outside the link's own retry loop (e.g.
    /// opening the log file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating a test description.
#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("failed to read test description file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse test description YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("test description missing required field: {0}")]
    MissingField(&'static str),

    #[error("options.{field} must be {expected}, got {got}")]
    InvalidOption {
        field: &'static str,
        expected: &'static str,
        got: String,
    },
}

/// Errors raised by the link manager.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("could not construct socket: {0}")]
    Construct(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_from_description_error() {
        let err = DescriptionError::MissingField("markers");
        let engine_err: EngineError = err.into();
        assert_eq!(
            engine_err.to_string(),
            "test description error: test description missing required field: markers"
        );
    }

    #[test]
    fn engine_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let engine_err: EngineError = io_err.into();
        assert_eq!(engine_err.to_string(), "I/O error: gone");
    }

    #[test]
    fn fatal_link_display() {
        let err = EngineError::FatalLink("no route to host".into());
        assert_eq!(err.to_string(), "fatal link error: no route to host");
    }

    #[test]
    fn unknown_modifier_display() {
        let err = EngineError::UnknownModifier("FROBNICATE".into());
        assert_eq!(
            err.to_string(),
            "missing modifier implementation: FROBNICATE"
        );
    }
}
