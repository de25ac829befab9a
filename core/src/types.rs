//! Shared mail data model: send-side entities and receive-side DTOs.

use secrecy::SecretString;

/// Immutable application identity used to acquire Microsoft Graph access tokens.
///
/// Created once at library initialization and never mutated; owned by the
/// long-lived sender instance and shared across concurrent sends.
#[derive(Clone)]
pub struct AuthConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Mailbox used as sender when [`MailEnvelope::from`] is not set.
    pub default_sender: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("default_sender", &self.default_sender)
            .finish()
    }
}

/// Per-send options. `Default` matches the values specified in the system design.
#[derive(Clone, Debug)]
pub struct SendOptions {
    /// Per-HTTP-request timeout. `None` uses the `reqwest::Client`'s own default.
    pub request_timeout: Option<std::time::Duration>,
    /// Attachments at or below this size are sent inline (base64, single POST).
    pub large_attachment_threshold_bytes: u64,
    /// Chunk size used by the resumable upload session engine.
    pub chunk_size_bytes: u64,
    /// Maximum aggregate size of all attachments on one envelope.
    pub max_aggregate_attachment_bytes: u64,
    /// Whether the backend should keep a copy of the sent message in Sent Items.
    pub save_to_sent_items: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            large_attachment_threshold_bytes: 3 * 1024 * 1024,
            chunk_size_bytes: 5 * 1024 * 1024,
            max_aggregate_attachment_bytes: 35 * 1024 * 1024,
            save_to_sent_items: false,
        }
    }
}

/// A single attachment to be sent with a [`MailEnvelope`].
#[derive(Clone, Debug)]
pub struct EmailAttachment {
    /// Declared file name; sanitized before transmission.
    pub file_name: String,
    /// Local path of the file to read and attach.
    pub path: std::path::PathBuf,
    /// Whether this attachment is referenced inline from the HTML body (`cid:`).
    pub inline: bool,
    /// Required, non-blank, when `inline` is true.
    pub content_id: Option<String>,
    /// Overrides the content type otherwise guessed from the file name.
    pub content_type: Option<String>,
}

/// A single outbound message and everything needed to send it.
#[derive(Clone, Debug)]
pub struct MailEnvelope {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub body_is_html: bool,
    pub attachments: Vec<EmailAttachment>,
    /// Overrides `AuthConfig::default_sender` when set.
    pub from: Option<String>,
    /// Caller-supplied identifier attached to tracing spans for this send.
    pub correlation_id: Option<String>,
}

impl MailEnvelope {
    /// Build a minimal text envelope with one recipient — convenient in tests
    /// and for simple callers; everything else defaults to empty/false/None.
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
            body_is_html: false,
            attachments: Vec::new(),
            from: None,
            correlation_id: None,
        }
    }
}

/// A message returned by the receive path.
#[derive(Clone, Debug)]
pub struct MessageDto {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub body_is_html: bool,
    pub received_at: Option<String>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub web_link: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub internet_message_headers: Vec<(String, String)>,
    /// `None` when attachment hydration failed for this message (best-effort;
    /// never aborts the batch).
    pub attachments: Option<Vec<AttachmentDto>>,
}

/// An attachment hydrated during the receive path.
#[derive(Clone, Debug)]
pub struct AttachmentDto {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub is_inline: bool,
    pub content_base64: String,
}
