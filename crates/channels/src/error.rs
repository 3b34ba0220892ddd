use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared by every adapter crate.
///
/// None of these cross the [`ChannelAdapter`](crate::ChannelAdapter) boundary;
/// `send` folds them into a failed [`SendOutcome`](crate::SendOutcome).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Adapter configuration is missing a required value or is malformed.
    #[error("invalid channel config: {message}")]
    InvalidConfig { message: String },

    /// The vendor API answered with a non-success status.
    #[error("vendor rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_config(message: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
