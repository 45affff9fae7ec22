/// Errors surfaced by the scene library.
///
/// Most of these never reach the render loop: clients log them with the
/// offending topic or resource and keep going with the next message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A required configuration value is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A wire payload could not be decoded.
    #[error("failed to decode {context}: {reason}")]
    Decode { context: String, reason: String },

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CDR payload: {0}")]
    Cdr(#[from] cdr::Error),

    /// The transport rejected or failed a request.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service {0} is not available")]
    ServiceUnavailable(String),
}

impl Error {
    pub fn decode(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
