use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplayError>;

/// Errors raised by the replay engine.
///
/// Per-packet send failures are not represented here: they accumulate in the
/// `failed` counter and never end a replay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// An option or combination of options is invalid.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// An interface, file or other resource could not be opened.
    #[error("cannot open {name}: {reason}")]
    Resource { name: String, reason: String },

    /// A source failed mid-replay after it was opened successfully.
    #[error("read error on {src}: {reason}")]
    Io { src: String, reason: String },

    /// The requested timing strategy is not supported on this platform.
    #[error("timing strategy \"{strategy}\" is not available on this platform")]
    PlatformUnavailable { strategy: &'static str },
}

impl ReplayError {
    pub fn config(reason: impl Into<String>) -> ReplayError {
        ReplayError::Config {
            reason: reason.into(),
        }
    }

    pub fn resource(name: impl Into<String>, reason: impl Into<String>) -> ReplayError {
        ReplayError::Resource {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// How a replay run ended. Aborting is a normal completion path, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Aborted,
}

/// Result of a configuration call that can leave an advisory warning on the
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ConfigOutcome {
    Applied,
    AppliedWithWarning,
}
