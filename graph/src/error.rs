//! Error taxonomy (§7). One `thiserror::Error` enum per component, composed
//! into [`GraphMailerError`] — the single error type `GraphMailer` reports.

use mailgw_core::ValidationError;

/// Error returned by [`crate::token::TokenProvider::get_token`] (C1).
///
/// Authentication failures are never retried; they propagate to the caller
/// as-is.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed sending OAuth2 client credentials grant access token request")]
    SendRequest(#[source] reqwest::Error),

    #[error("failed receiving OAuth2 client credentials grant access token response")]
    ReceiveResponse(#[source] reqwest::Error),

    #[error("access token endpoint returned {status}: {body}")]
    ErrorResponse {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse access token response")]
    ParseResponse(#[source] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

/// Error surfaced by the retry executor (C2).
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("request failed after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<HttpError>,
    },

    /// A non-retriable response or error, returned on the first attempt.
    #[error(transparent)]
    Fatal(Box<HttpError>),

    /// Token acquisition failed while preparing an attempt. Never retried at
    /// this layer: it propagates to the caller unchanged (§4.1).
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("operation cancelled")]
    Cancelled,
}

/// A single non-retriable classification of what went wrong calling the backend.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("network error sending request")]
    Network(#[source] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        code: Option<String>,
        message: Option<String>,
        body: String,
    },
}

impl HttpError {
    /// The HTTP status code, if this failure got as far as a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HttpError::Network(_) => None,
            HttpError::Status { status, .. } => Some(status.as_u16()),
        }
    }

    /// A bounded excerpt of the response body, for telemetry.
    pub fn body_excerpt(&self) -> Option<&str> {
        match self {
            HttpError::Network(_) => None,
            HttpError::Status { body, .. } => Some(body.as_str()),
        }
    }
}

/// Error raised by the upload session engine (C3).
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to create upload session for `{file_name}`")]
    CreateSession {
        file_name: String,
        #[source]
        source: RetryError,
    },

    #[error("failed reading `{file_name}` at offset {offset}: file truncated before declared size {declared_size}")]
    Truncated {
        file_name: String,
        offset: u64,
        declared_size: u64,
    },

    #[error("failed reading `{file_name}` at offset {offset}")]
    ReadFile {
        file_name: String,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("chunk upload for `{file_name}` failed at offset {offset}")]
    Chunk {
        file_name: String,
        offset: u64,
        #[source]
        source: RetryError,
    },

    #[error(
        "session for `{file_name}` was lost and could not be re-created after {attempts} attempt(s) on draft `{draft_id}`"
    )]
    SessionLostExhausted {
        file_name: String,
        draft_id: String,
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("upload of `{file_name}` incomplete: committed {committed} of declared {declared_size} bytes")]
    Incomplete {
        file_name: String,
        committed: u64,
        declared_size: u64,
    },
}

/// Top-level error returned by [`crate::GraphMailer::send_mail`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("invalid request")]
    Validation(#[from] ValidationError),

    #[error("failed to retrieve Microsoft Graph access token")]
    Token(#[from] TokenError),

    #[error("failed to create draft message")]
    CreateMessage(#[source] RetryError),

    #[error("failed to attach `{file_name}`")]
    Attachment {
        file_name: String,
        #[source]
        source: AttachmentSource,
    },

    #[error("failed to materialize draft for send")]
    Materialize(#[source] MaterializeError),

    #[error("failed to send message")]
    SendMessage(#[source] RetryError),

    #[error("failed to delete draft `{draft_id}` after a successful send")]
    DeleteDraft {
        draft_id: String,
        #[source]
        source: RetryError,
    },

    #[error("send failed ({send}), and cleanup of the draft also failed ({cleanup})")]
    Aggregate {
        send: Box<SendError>,
        cleanup: Box<RetryError>,
    },

    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum AttachmentSource {
    #[error(transparent)]
    Small(#[from] RetryError),
    #[error(transparent)]
    Large(#[from] UploadError),
    #[error("failed reading attachment file")]
    Io(#[from] std::io::Error),
}

/// Error raised while GETting and whitelisting the draft during Materializing.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("failed to fetch draft")]
    Fetch(#[source] RetryError),

    #[error("failed to parse materialized draft JSON")]
    Parse(#[source] serde_json::Error),
}

/// Top-level error returned by [`crate::GraphMailer::receive_mail`].
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("failed to retrieve Microsoft Graph access token")]
    Token(#[from] TokenError),

    #[error("failed to list unread messages")]
    ListMessages(#[source] RetryError),

    #[error("failed to fetch attachments for a message")]
    FetchAttachments(#[source] RetryError),

    #[error("failed to parse a response body")]
    Parse(#[source] serde_json::Error),
}

/// Unified error type for [`crate::GraphMailer`], implementing both
/// [`mailgw_core::Mailer::Error`] and the source for
/// [`mailgw_core::DynMailerError`].
#[derive(Debug, thiserror::Error)]
pub enum GraphMailerError {
    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Receive(#[from] ReceiveError),
}
