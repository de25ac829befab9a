//! Core crate for `graph-mailer`. Use [`graph-mailer`](https://docs.rs/graph-mailer/latest/graph_mailer/) instead.

pub mod config;
pub mod mailer;
pub mod sanitize;
pub mod types;
pub mod validate;

pub use config::ConfigError;
pub use mailer::{async_trait, ArcMailer, BoxMailer, DynMailer, DynMailerError, Mailer};
pub use types::{AttachmentDto, AuthConfig, EmailAttachment, MailEnvelope, MessageDto, SendOptions};
pub use validate::ValidationError;

pub use secrecy;
pub use tokio_util;

pub mod util {
    use crate::types::MailEnvelope;

    /// Format an envelope's recipient addresses for tracing log output.
    #[cfg(feature = "tracing")]
    pub fn format_recipient_addresses(envelope: &MailEnvelope) -> String {
        envelope.to.join(", ")
    }
}
