use thiserror::Error;

use crate::pushover::ApiResponse;

/// The message itself is unusable, retrying cannot help.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("message header block could not be parsed")]
    Header,
    #[error("unsupported attachment transfer encoding: {0}")]
    TransferEncoding(String),
    #[error("attachment is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A single recipient cannot be routed, siblings are unaffected.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("recipient {0} does not carry a user token")]
    Recipient(String),
    #[error("sender {0} does not carry an application token")]
    Sender(String),
    #[error("notification for {0} could not be queued")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("CRAM-MD5 response is not valid hex: {0}")]
    Decode(#[from] hex::FromHexError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Nothing structured came back from the API.
    #[error("notification API unreachable: {0}")]
    Transport(String),
    /// The API answered but did not report success.
    #[error("notification API answered with status {}: {}", .0.status, .0.errors.join(", "))]
    Refused(ApiResponse),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("envelope is missing the application or the user token")]
    MissingToken,
    #[error("recipient token was refused: {0}")]
    InvalidRecipient(#[source] ApiError),
    #[error("recipient token could not be checked: {0}")]
    Validation(#[source] ApiError),
    #[error("notification was not accepted: {0}")]
    Send(#[source] ApiError),
}

impl SubmitError {
    /// Whether resubmitting the same envelope later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MissingToken | Self::InvalidRecipient(_) => false,
            Self::Validation(_) => true,
            Self::Send(ApiError::Transport(_)) => true,
            // status 1 next to an error means the message went through anyway
            Self::Send(ApiError::Refused(resp)) => resp.status != 1,
        }
    }
}
