//! The error type shared by the localisation core.

use std::{borrow::Cow, fmt};

/// Everything that can go wrong while configuring the locator or running a
/// cycle over a buffer of audio.
#[derive(Debug)]
pub enum DoaError {
    /// Returned when the array, surface, band layout, or policy names are
    /// not something we can build a locator from.
    ConfigurationError(String),

    /// Returned when a buffer is too short for the requested processing.
    InsufficientData {
        /// Samples required
        needed: usize,
        /// Samples available
        got: usize,
    },

    /// Returned when channel counts or map shapes disagree.
    ShapeMismatch(String),

    /// Returned when a decomposition fails to converge.
    NumericDegeneracy(String),

    /// Returned when io fails when reading config or audio files.
    IoError(std::io::Error),

    /// Returned when hound cannot read or write a WAV file.
    WavError(hound::Error),

    /// Returned when a RON config cannot be serialized.
    RonError(ron::Error),

    /// Returned when a RON config cannot be deserialized.
    RonSpannedError(ron::de::SpannedError),
}

impl DoaError {
    /// Shorthand for building a [DoaError::ConfigurationError].
    pub fn config(msg: impl Into<String>) -> Self {
        DoaError::ConfigurationError(msg.into())
    }

    /// Shorthand for building a [DoaError::ShapeMismatch].
    pub fn shape(msg: impl Into<String>) -> Self {
        DoaError::ShapeMismatch(msg.into())
    }
}

impl fmt::Display for DoaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DoaError as DE;
        let msg = match self {
            DE::ConfigurationError(msg) => Cow::from(format!("configuration error: {}", msg)),
            DE::InsufficientData { needed, got } => Cow::from(format!(
                "insufficient data: needed {} samples, got {}",
                needed, got
            )),
            DE::ShapeMismatch(msg) => Cow::from(format!("shape mismatch: {}", msg)),
            DE::NumericDegeneracy(msg) => Cow::from(format!("numeric degeneracy: {}", msg)),
            DE::IoError(error) => Cow::from(format!("io error: {}", error)),
            DE::WavError(error) => Cow::from(format!("wav error: {}", error)),
            DE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            DE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for DoaError {}

impl From<std::io::Error> for DoaError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<hound::Error> for DoaError {
    fn from(value: hound::Error) -> Self {
        Self::WavError(value)
    }
}

impl From<ron::Error> for DoaError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for DoaError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DoaError>;
