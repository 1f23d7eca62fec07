//! Error types for basefold stages and engines

use thiserror::Error;

/// Result type for basefold operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a processing run.
///
/// Insufficient input is deliberately *not* represented here: a stage that
/// has fewer samples than one valid transform window buffers them and
/// returns `Ok(None)` from its processing call. Every variant of this enum
/// is fatal to the current run.
#[derive(Error, Debug)]
pub enum Error {
    /// A locked parameter was changed after data flowed through a stage,
    /// or incoming data does not match the committed geometry.
    #[error("{stage}: invalid {parameter}: {reason}")]
    Config {
        /// Stage or engine reporting the error
        stage: &'static str,
        /// Offending parameter
        parameter: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// A compute backend failed while executing its kernel. Never retried
    /// on the reference path; a retry could mask a precision or
    /// configuration mismatch between backends.
    #[error("backend engine failure: {0}")]
    Backend(String),

    /// Bin-plan hit counts do not cover the input block. Unreachable in
    /// correct operation; indicates a plan construction bug.
    #[error("bin plan covers {expected} samples but block holds {actual}")]
    PlanMismatch {
        /// Samples described by the plan
        expected: u64,
        /// Samples actually present in the block
        actual: u64,
    },

    /// Buffering contract violation: `post_transform` without a matching
    /// `pre_transform`, a retreating `next_start`, or a gap the upstream
    /// source was required to fill.
    #[error("buffering contract violation: {0}")]
    Buffering(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(
        stage: &'static str,
        parameter: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Error::Config {
            stage,
            parameter,
            reason: reason.into(),
        }
    }
}
