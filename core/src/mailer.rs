use std::{fmt::Debug, sync::Arc};

pub use async_trait::async_trait;

use crate::types::{MailEnvelope, MessageDto, SendOptions};

/// Statically typed [`Mailer`], to be used in `impl Mailer` or `<M: Mailer>` bounds.
///
/// The `graph-mailer` crate exports a Microsoft Graph (Outlook) implementation
/// of this trait. Third parties may implement it for other backends.
#[async_trait]
pub trait Mailer: Debug + Send + Sync {
    type Error;

    /// Send `envelope` according to `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if any step of the send pipeline fails.
    /// Concrete errors vary by [`Mailer`] implementation.
    async fn send_mail(
        &self,
        envelope: MailEnvelope,
        options: &SendOptions,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<(), Self::Error>;

    /// List unread messages in `mailbox` (or the sender's default mailbox),
    /// hydrate their attachments and mark them read.
    ///
    /// Attachment-fetch and mark-as-read failures for individual messages are
    /// best-effort: they never abort the batch.
    async fn receive_mail(
        &self,
        mailbox: Option<&str>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Vec<MessageDto>, Self::Error>;
}

// == DynMailer ==

/// Type-erased mailer error, for use of [`DynMailer`] as trait object.
pub type DynMailerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Object-safe [`DynMailer`] trait, usable as `&DynMailer`, [`ArcMailer`] (`Arc<dyn DynMailer>`)
/// or [`BoxMailer`] (`Box<dyn DynMailer>`).
#[async_trait]
pub trait DynMailer: Debug + Send + Sync {
    /// Send `envelope` according to `options`.
    ///
    /// # Errors
    ///
    /// Returns a boxed, type-erased [`DynMailerError`] if any step of the send
    /// pipeline fails.
    async fn send_mail(
        &self,
        envelope: MailEnvelope,
        options: &SendOptions,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<(), DynMailerError>;

    /// List unread messages in `mailbox` (or the sender's default mailbox).
    async fn receive_mail(
        &self,
        mailbox: Option<&str>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Vec<MessageDto>, DynMailerError>;
}

/// Boxed dyn [`DynMailer`]
pub type BoxMailer = Box<dyn DynMailer>;

/// Arc-wrapped dyn [`DynMailer`]
pub type ArcMailer = Arc<dyn DynMailer>;
