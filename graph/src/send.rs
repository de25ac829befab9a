//! Send orchestrator (C4): `Validating → DraftPosted → Attaching →
//! Materializing → Sending → Cleanup → Done`.

use base64::{engine::general_purpose::STANDARD as base64_engine, Engine as _};
use futures_util::TryStreamExt;
use mailgw_core::{sanitize, validate, EmailAttachment, MailEnvelope, SendOptions};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AttachmentSource, MaterializeError, SendError};
use crate::retry::{AttemptError, RetryExecutor, RetryPolicy};
use crate::token::TokenProvider;
use crate::upload::{self, BufferPool};

/// Production Microsoft Graph v1.0 base URL. Every HTTP call below takes the
/// base URL as a parameter rather than hardcoding this, so integration tests
/// can point the same code at a `wiremock` server.
pub const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Fields the materialized send payload is whitelisted to, per §4.4 "Materializing".
const MESSAGE_WHITELIST: &[&str] = &[
    "subject",
    "body",
    "toRecipients",
    "ccRecipients",
    "bccRecipients",
    "replyTo",
    "from",
    "importance",
    "attachments",
];

/// Fields each whitelisted attachment entry is limited to.
const ATTACHMENT_WHITELIST: &[&str] = &[
    "@odata.type",
    "name",
    "contentType",
    "contentBytes",
    "size",
    "isInline",
    "contentId",
];

#[allow(clippy::too_many_arguments)]
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(skip(http, token_provider, retry_policy, buffer_pool, envelope, options, cancel), fields(correlation_id))
)]
pub async fn send_mail(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    buffer_pool: &BufferPool,
    mail_base: &str,
    default_sender: &str,
    envelope: MailEnvelope,
    options: &SendOptions,
    cancel: CancellationToken,
) -> Result<(), SendError> {
    let correlation_id = envelope
        .correlation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("correlation_id", tracing::field::display(&correlation_id));

    let effective_sender = envelope.from.clone().unwrap_or_else(|| default_sender.to_string());

    // Validating
    validate::validate_envelope(&envelope, &effective_sender, options).map_err(SendError::Validation)?;

    if cancel.is_cancelled() {
        return Err(SendError::Cancelled);
    }

    let sender_encoded = utf8_percent_encode(&effective_sender, NON_ALPHANUMERIC).to_string();

    // DraftPosted
    let draft_id = create_draft(
        http,
        token_provider,
        retry_policy,
        mail_base,
        &sender_encoded,
        &envelope,
        &cancel,
    )
    .await
    .map_err(SendError::CreateMessage)?;

    let result = run_remaining_steps(
        http,
        token_provider,
        retry_policy,
        buffer_pool,
        mail_base,
        &sender_encoded,
        &draft_id,
        &envelope,
        options,
        &cancel,
    )
    .await;

    // Cleanup always runs once a draft exists on the server, regardless of
    // the outcome of the remaining steps.
    let cleanup_result = delete_draft(
        http,
        token_provider,
        retry_policy,
        mail_base,
        &sender_encoded,
        &draft_id,
        &cancel,
    )
    .await;

    match (result, cleanup_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(cleanup_err)) => Err(SendError::DeleteDraft {
            draft_id,
            source: cleanup_err,
        }),
        (Err(send_err), Ok(())) => Err(send_err),
        (Err(send_err), Err(cleanup_err)) => Err(SendError::Aggregate {
            send: Box::new(send_err),
            cleanup: Box::new(cleanup_err),
        }),
    }
}

#[allow(clippy::too_many_arguments)]
#[allow(clippy::too_many_arguments)]
async fn run_remaining_steps(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    buffer_pool: &BufferPool,
    mail_base: &str,
    sender_encoded: &str,
    draft_id: &str,
    envelope: &MailEnvelope,
    options: &SendOptions,
    cancel: &CancellationToken,
) -> Result<(), SendError> {
    // Attaching
    for attachment in &envelope.attachments {
        attach_one(
            http,
            token_provider,
            retry_policy,
            buffer_pool,
            mail_base,
            sender_encoded,
            draft_id,
            attachment,
            options,
            cancel,
        )
        .await
        .map_err(|source| SendError::Attachment {
            file_name: attachment.file_name.clone(),
            source,
        })?;
    }

    // Materializing
    let clean_message = materialize(http, token_provider, retry_policy, mail_base, sender_encoded, draft_id, cancel)
        .await
        .map_err(SendError::Materialize)?;

    // Sending
    send_clean_message(
        http,
        token_provider,
        retry_policy,
        mail_base,
        sender_encoded,
        clean_message,
        options.save_to_sent_items,
        cancel,
    )
    .await
    .map_err(SendError::SendMessage)?;

    Ok(())
}

#[derive(Serialize)]
struct BodyDto<'a> {
    #[serde(rename = "contentType")]
    content_type: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct RecipientDto<'a> {
    #[serde(rename = "emailAddress")]
    email_address: EmailAddressDto<'a>,
}

#[derive(Serialize)]
struct EmailAddressDto<'a> {
    address: &'a str,
}

fn recipients(addresses: &[String]) -> Vec<RecipientDto<'_>> {
    addresses
        .iter()
        .map(|address| RecipientDto {
            email_address: EmailAddressDto { address },
        })
        .collect()
}

#[derive(Serialize)]
struct DraftBody<'a> {
    subject: &'a str,
    body: BodyDto<'a>,
    #[serde(rename = "toRecipients")]
    to_recipients: Vec<RecipientDto<'a>>,
    #[serde(rename = "ccRecipients", skip_serializing_if = "Vec::is_empty")]
    cc_recipients: Vec<RecipientDto<'a>>,
    #[serde(rename = "bccRecipients", skip_serializing_if = "Vec::is_empty")]
    bcc_recipients: Vec<RecipientDto<'a>>,
}

#[derive(Deserialize)]
struct DraftResponse {
    id: String,
}

async fn create_draft(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    sender_encoded: &str,
    envelope: &MailEnvelope,
    cancel: &CancellationToken,
) -> Result<String, crate::error::RetryError> {
    let subject = sanitize::sanitize_subject(&envelope.subject);
    let body = sanitize::sanitize_body(&envelope.body);
    let content_type = if envelope.body_is_html { "HTML" } else { "Text" };

    let draft_body = DraftBody {
        subject: &subject,
        body: BodyDto {
            content_type,
            content: &body,
        },
        to_recipients: recipients(&envelope.to),
        cc_recipients: recipients(&envelope.cc),
        bcc_recipients: recipients(&envelope.bcc),
    };

    let url = format!("{mail_base}/users/{sender_encoded}/messages");
    let executor = RetryExecutor::new(retry_policy);
    let response = executor
        .execute(cancel, || async {
            let token = token_provider.get_token(cancel).await.map_err(AttemptError::Token)?;
            http.post(&url)
                .bearer_auth(token)
                .json(&draft_body)
                .send()
                .await
                .map_err(AttemptError::from)
        })
        .await?;

    let parsed: DraftResponse = response
        .json()
        .await
        .map_err(|source| crate::error::RetryError::Fatal(Box::new(crate::error::HttpError::Network(source))))?;

    Ok(parsed.id)
}

#[derive(Serialize)]
struct SmallAttachmentBody<'a> {
    #[serde(rename = "@odata.type")]
    odata_type: &'a str,
    name: &'a str,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(rename = "contentBytes")]
    content_bytes: String,
    #[serde(rename = "isInline")]
    is_inline: bool,
    #[serde(rename = "contentId", skip_serializing_if = "Option::is_none")]
    content_id: Option<&'a str>,
}

#[allow(clippy::too_many_arguments)]
async fn attach_one(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    buffer_pool: &BufferPool,
    mail_base: &str,
    sender_encoded: &str,
    draft_id: &str,
    attachment: &EmailAttachment,
    options: &SendOptions,
    cancel: &CancellationToken,
) -> Result<(), AttachmentSource> {
    let sanitized_name = sanitize::sanitize_filename(&attachment.file_name);
    let file_size = tokio::fs::metadata(&attachment.path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    let content_type = attachment.content_type.as_deref().unwrap_or("application/octet-stream");

    if file_size <= options.large_attachment_threshold_bytes {
        attach_small(
            http,
            token_provider,
            retry_policy,
            mail_base,
            sender_encoded,
            draft_id,
            attachment,
            &sanitized_name,
            content_type,
            cancel,
        )
        .await
    } else {
        upload::upload_large(
            http,
            token_provider,
            retry_policy,
            buffer_pool,
            mail_base,
            sender_encoded,
            draft_id,
            attachment,
            &sanitized_name,
            file_size,
            content_type,
            options.chunk_size_bytes,
            cancel,
        )
        .await
        .map_err(AttachmentSource::Large)
    }
}

#[allow(clippy::too_many_arguments)]
async fn attach_small(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    sender_encoded: &str,
    draft_id: &str,
    attachment: &EmailAttachment,
    sanitized_name: &str,
    content_type: &str,
    cancel: &CancellationToken,
) -> Result<(), AttachmentSource> {
    let mut file = tokio::fs::File::open(&attachment.path).await?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;

    let body = SmallAttachmentBody {
        odata_type: "#microsoft.graph.fileAttachment",
        name: sanitized_name,
        content_type: Some(content_type),
        content_bytes: base64_engine.encode(&bytes),
        is_inline: attachment.inline,
        content_id: attachment.content_id.as_deref(),
    };

    let url = format!("{mail_base}/users/{sender_encoded}/messages/{draft_id}/attachments");
    let executor = RetryExecutor::new(retry_policy);
    executor
        .execute(cancel, || async {
            let token = token_provider.get_token(cancel).await.map_err(AttemptError::Token)?;
            http.post(&url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(AttemptError::from)
        })
        .await
        .map_err(AttachmentSource::Small)?;

    Ok(())
}

async fn materialize(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    sender_encoded: &str,
    draft_id: &str,
    cancel: &CancellationToken,
) -> Result<Value, MaterializeError> {
    let url = format!("{mail_base}/users/{sender_encoded}/messages/{draft_id}?$expand=attachments");
    let executor = RetryExecutor::new(retry_policy);
    let response = executor
        .execute(cancel, || async {
            let token = token_provider.get_token(cancel).await.map_err(AttemptError::Token)?;
            http.get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(AttemptError::from)
        })
        .await
        .map_err(MaterializeError::Fetch)?;

    // Parse straight off the wire instead of buffering the whole body first:
    // a draft's attachments carry base64 `contentBytes`, so the response can
    // be large and doubling it in memory (raw bytes + parsed Value) is what
    // this avoids.
    let byte_stream = response.bytes_stream().map_err(std::io::Error::other);
    let async_reader = tokio_util::io::StreamReader::new(byte_stream);
    let sync_reader = tokio_util::io::SyncIoBridge::new(async_reader);

    let raw: Value = match tokio::task::spawn_blocking(move || serde_json::from_reader(sync_reader)).await {
        Ok(parsed) => parsed.map_err(MaterializeError::Parse)?,
        Err(join_error) => return Err(MaterializeError::Parse(std::io::Error::other(join_error).into())),
    };

    Ok(whitelist_message(raw))
}

/// Keep only [`MESSAGE_WHITELIST`] keys at the top level and
/// [`ATTACHMENT_WHITELIST`] keys on each `attachments` entry — the draft read
/// carries read-only properties the send endpoint rejects.
fn whitelist_message(raw: Value) -> Value {
    let Value::Object(mut object) = raw else {
        return Value::Object(Map::new());
    };

    let mut clean = Map::new();
    for key in MESSAGE_WHITELIST {
        if let Some(value) = object.remove(*key) {
            let value = if *key == "attachments" {
                whitelist_attachments(value)
            } else {
                value
            };
            clean.insert((*key).to_string(), value);
        }
    }
    Value::Object(clean)
}

fn whitelist_attachments(value: Value) -> Value {
    let Value::Array(items) = value else {
        return Value::Array(Vec::new());
    };

    let cleaned = items
        .into_iter()
        .map(|item| {
            let Value::Object(mut object) = item else {
                return Value::Object(Map::new());
            };
            let mut clean = Map::new();
            for key in ATTACHMENT_WHITELIST {
                if let Some(value) = object.remove(*key) {
                    clean.insert((*key).to_string(), value);
                }
            }
            Value::Object(clean)
        })
        .collect();

    Value::Array(cleaned)
}

#[derive(Serialize)]
struct SendMailBody {
    message: Value,
    #[serde(rename = "saveToSentItems")]
    save_to_sent_items: bool,
}

#[allow(clippy::too_many_arguments)]
async fn send_clean_message(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    sender_encoded: &str,
    clean_message: Value,
    save_to_sent_items: bool,
    cancel: &CancellationToken,
) -> Result<(), crate::error::RetryError> {
    let body = SendMailBody {
        message: clean_message,
        save_to_sent_items,
    };

    let url = format!("{mail_base}/users/{sender_encoded}/sendMail");
    let executor = RetryExecutor::new(retry_policy);
    executor
        .execute(cancel, || async {
            let token = token_provider.get_token(cancel).await.map_err(AttemptError::Token)?;
            http.post(&url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(AttemptError::from)
        })
        .await?;

    Ok(())
}

async fn delete_draft(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    sender_encoded: &str,
    draft_id: &str,
    cancel: &CancellationToken,
) -> Result<(), crate::error::RetryError> {
    let url = format!("{mail_base}/users/{sender_encoded}/messages/{draft_id}");
    let executor = RetryExecutor::new(retry_policy);
    executor
        .execute(cancel, || async {
            let token = token_provider.get_token(cancel).await.map_err(AttemptError::Token)?;
            http.delete(&url).bearer_auth(token).send().await.map_err(AttemptError::from)
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_drops_unlisted_top_level_keys() {
        let raw = serde_json::json!({
            "subject": "hi",
            "body": {"contentType": "Text", "content": "hello"},
            "toRecipients": [],
            "id": "AAA",
            "createdDateTime": "2024-01-01T00:00:00Z",
            "attachments": [
                {"@odata.type": "#microsoft.graph.fileAttachment", "name": "a.txt", "id": "att1", "lastModifiedDateTime": "x"}
            ]
        });

        let clean = whitelist_message(raw);
        let object = clean.as_object().unwrap();
        assert!(object.contains_key("subject"));
        assert!(!object.contains_key("id"));
        assert!(!object.contains_key("createdDateTime"));

        let attachment = &object["attachments"].as_array().unwrap()[0];
        let attachment = attachment.as_object().unwrap();
        assert!(attachment.contains_key("name"));
        assert!(!attachment.contains_key("id"));
        assert!(!attachment.contains_key("lastModifiedDateTime"));
    }
}
