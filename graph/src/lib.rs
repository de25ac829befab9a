//! A Microsoft Graph mailer, usable either stand-alone or as either generic
//! `Mailer` or dynamic `dyn DynMailer` using the `mailgw-core` crate.
//!
//! Example:
//! ```no_run
//! # async fn test() -> Result<(), Box<dyn std::error::Error>> {
//! use mailgw_core::{AuthConfig, MailEnvelope, Mailer, SendOptions};
//! use mailgw_graph::GraphMailer;
//! use secrecy::SecretString;
//!
//! let config = AuthConfig {
//!     tenant_id: "<tenant>".into(),
//!     client_id: "<app guid>".into(),
//!     client_secret: SecretString::from("<app secret>".to_string()),
//!     default_sender: "sender@example.com".into(),
//! };
//!
//! let mailer = GraphMailer::new(config);
//! let envelope = MailEnvelope::new("to@example.com", "Subject", "Body");
//!
//! mailer
//!     .send_mail(envelope, &SendOptions::default(), Default::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod receive;
pub mod retry;
pub mod send;
pub mod token;
pub mod upload;

use async_trait::async_trait;
use mailgw_core::{AuthConfig, DynMailer, DynMailerError, MailEnvelope, Mailer, MessageDto, SendOptions};
use tokio_util::sync::CancellationToken;

pub use error::GraphMailerError;
pub use retry::RetryPolicy;
pub use token::TokenProvider;
pub use upload::BufferPool;

/// A Microsoft Graph mailer client, implementing `mailgw_core::Mailer` and
/// `mailgw_core::DynMailer` to be used as generic mailer or runtime-pluggable
/// trait object.
///
/// Sends mail authenticated by OAuth2 client credentials grant via the
/// Microsoft Graph API, supporting arbitrarily large attachments through a
/// resumable chunked upload session engine.
#[derive(Debug)]
pub struct GraphMailer {
    http: reqwest::Client,
    default_sender: String,
    mail_base: String,
    token_provider: TokenProvider,
    retry_policy: RetryPolicy,
    buffer_pool: BufferPool,
}

impl GraphMailer {
    /// Create a new Graph mailer client using a fresh `reqwest::Client`.
    pub fn new(config: AuthConfig) -> Self {
        Self::with_http_client(config, reqwest::Client::new())
    }

    /// Create a new Graph mailer client using an injected, already-configured
    /// `reqwest::Client`. The client is never disposed by the mailer.
    pub fn with_http_client(config: AuthConfig, http: reqwest::Client) -> Self {
        let default_sender = config.default_sender.clone();
        Self {
            token_provider: TokenProvider::new(http.clone(), config),
            http,
            default_sender,
            mail_base: send::GRAPH_BASE.to_string(),
            retry_policy: RetryPolicy::new(),
            buffer_pool: BufferPool::new(),
        }
    }

    /// Create a new Graph mailer client as dynamic `mailgw_core::BoxMailer`.
    pub fn new_box(config: AuthConfig) -> Box<dyn DynMailer> {
        Box::new(Self::new(config))
    }

    /// Create a new Graph mailer client as dynamic `mailgw_core::ArcMailer`.
    pub fn new_arc(config: AuthConfig) -> std::sync::Arc<dyn DynMailer> {
        std::sync::Arc::new(Self::new(config))
    }

    /// Like [`Self::with_http_client`], but pointed at alternate mail and
    /// token base URLs instead of the real Microsoft Graph/identity
    /// platform. Used by integration tests to target a mock server.
    #[doc(hidden)]
    pub fn with_base_urls(
        config: AuthConfig,
        http: reqwest::Client,
        mail_base: impl Into<String>,
        token_base: impl Into<String>,
    ) -> Self {
        let default_sender = config.default_sender.clone();
        Self {
            token_provider: TokenProvider::with_token_base(http.clone(), config, token_base),
            http,
            default_sender,
            mail_base: mail_base.into(),
            retry_policy: RetryPolicy::new(),
            buffer_pool: BufferPool::new(),
        }
    }
}

// == Mailer ==

#[async_trait]
impl Mailer for GraphMailer {
    type Error = GraphMailerError;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, envelope, options, cancel)))]
    async fn send_mail(
        &self,
        envelope: MailEnvelope,
        options: &SendOptions,
        cancel: CancellationToken,
    ) -> Result<(), Self::Error> {
        send::send_mail(
            &self.http,
            &self.token_provider,
            &self.retry_policy,
            &self.buffer_pool,
            &self.mail_base,
            &self.default_sender,
            envelope,
            options,
            cancel,
        )
        .await
        .map_err(Into::into)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, cancel)))]
    async fn receive_mail(
        &self,
        mailbox: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Vec<MessageDto>, Self::Error> {
        receive::receive_mail(
            &self.http,
            &self.token_provider,
            &self.retry_policy,
            &self.mail_base,
            &self.default_sender,
            mailbox,
            cancel,
        )
        .await
        .map_err(Into::into)
    }
}

// == DynMailer ==

#[async_trait]
impl DynMailer for GraphMailer {
    async fn send_mail(
        &self,
        envelope: MailEnvelope,
        options: &SendOptions,
        cancel: CancellationToken,
    ) -> Result<(), DynMailerError> {
        Mailer::send_mail(self, envelope, options, cancel).await.map_err(Into::into)
    }

    async fn receive_mail(&self, mailbox: Option<&str>, cancel: CancellationToken) -> Result<Vec<MessageDto>, DynMailerError> {
        Mailer::receive_mail(self, mailbox, cancel).await.map_err(Into::into)
    }
}
