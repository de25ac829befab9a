//! # graph-mailer
//! An async `Mailer`/`DynMailer` pair of traits with a Microsoft Graph
//! (Outlook) backend, built for sending mail with arbitrarily large
//! attachments via a resumable chunked upload session engine.
//!
//! [![Crates.io](https://img.shields.io/crates/v/graph-mailer)](https://crates.io/crates/graph-mailer)
//! [![Documentation](https://docs.rs/graph-mailer/badge.svg)][docs]
//!
//! ## Installation
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! graph-mailer = "0.1"
//! ```
//!
//! You can control [`tracing`](https://docs.rs/crate/tracing) support via a
//! crate feature toggle.
//!
//! # Examples
//!
//! Use `GraphMailer::new` for a strongly typed mailer instance, or
//! `GraphMailer::new_box` / `GraphMailer::new_arc` for a type-erased dynamic
//! mailer.
//!
//! ## Using the strongly typed `Mailer`:
//!
//! ```no_run
//! # async fn test() -> Result<(), Box<dyn std::error::Error>> {
//! use graph_mailer::{AuthConfig, GraphMailer, MailEnvelope, Mailer, SecretString, SendOptions};
//!
//! let mailer = GraphMailer::new(AuthConfig {
//!     tenant_id: "<Microsoft Identity service tenant>".into(),
//!     client_id: "<OAuth2 app GUID>".into(),
//!     client_secret: SecretString::from("<OAuth2 app secret>".to_string()),
//!     default_sender: "from@example.com".into(),
//! });
//!
//! let envelope = MailEnvelope::new("to@example.com", "Subject", "Mail body");
//!
//! mailer
//!     .send_mail(envelope, &SendOptions::default(), Default::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using the dynamically typed `DynMailer`:
//!
//! ```no_run
//! # async fn test() -> Result<(), graph_mailer::DynMailerError> {
//! use graph_mailer::{AuthConfig, BoxMailer, GraphMailer, MailEnvelope, SecretString, SendOptions};
//!
//! let mailer: BoxMailer = GraphMailer::new_box(AuthConfig {
//!     tenant_id: "<Microsoft Identity service tenant>".into(),
//!     client_id: "<OAuth2 app GUID>".into(),
//!     client_secret: SecretString::from("<OAuth2 app secret>".to_string()),
//!     default_sender: "from@example.com".into(),
//! });
//!
//! let envelope = MailEnvelope::new("to@example.com", "Subject", "Mail body");
//!
//! mailer
//!     .send_mail(envelope, &SendOptions::default(), Default::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! [`AuthConfig`] can be built directly as a struct literal, or loaded from
//! `TENANT_ID`, `CLIENT_ID`, `CLIENT_SECRET` and `MAILBOX_ADDRESS` environment
//! variables via [`AuthConfig::from_env`](mailgw_core::AuthConfig::from_env).
//! The library itself never reads a secret store or persists a secret; that
//! is left to the host.
//!
//! # Feature flags
//!
//! - `tracing`: Enable debug and error logging using the
//!   [`tracing`](https://docs.rs/crate/tracing) crate. All relevant
//!   functions are instrumented.
//!
//! Default: `tracing`.
//!
//! Further mailer backends are possible; implement `Mailer`/`DynMailer` from
//! `mailgw_core` for any other backend.
//!
//! [docs]: https://docs.rs/graph-mailer

pub use secrecy::SecretString;

// == Data model ==
pub use mailgw_core::{AttachmentDto, AuthConfig, ConfigError, EmailAttachment, MailEnvelope, MessageDto, SendOptions};

// == Mailer ==
pub use mailgw_core::Mailer;

// == DynMailer ==
pub use mailgw_core::{ArcMailer, BoxMailer, DynMailer, DynMailerError};

// == Microsoft Graph backend ==
pub use mailgw_graph::{GraphMailer, GraphMailerError};
