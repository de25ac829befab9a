//! Receive path (C6): list unread inbox messages, hydrate attachments, mark read.
//!
//! Best-effort per message: attachment-fetch and mark-as-read failures never
//! abort the batch (§4.6).

use mailgw_core::{AttachmentDto, MessageDto};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ReceiveError, RetryError};
use crate::retry::{AttemptError, RetryExecutor, RetryPolicy};
use crate::token::TokenProvider;

const SELECT_FIELDS: &str = "id,subject,body,receivedDateTime,isRead,hasAttachments,webLink,toRecipients,ccRecipients,bccRecipients,internetMessageHeaders";

#[cfg_attr(feature = "tracing", tracing::instrument(skip(http, token_provider, retry_policy, cancel)))]
#[allow(clippy::too_many_arguments)]
pub async fn receive_mail(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    default_sender: &str,
    mailbox: Option<&str>,
    cancel: CancellationToken,
) -> Result<Vec<MessageDto>, ReceiveError> {
    let mailbox_encoded = utf8_percent_encode(mailbox.unwrap_or(default_sender), NON_ALPHANUMERIC).to_string();

    let raw_messages = list_unread(http, token_provider, retry_policy, mail_base, &mailbox_encoded, &cancel).await?;

    let mut messages = Vec::with_capacity(raw_messages.len());
    for raw in raw_messages {
        messages.push(hydrate_one(http, token_provider, retry_policy, mail_base, &mailbox_encoded, raw, &cancel).await);
    }

    Ok(messages)
}

#[derive(Deserialize)]
struct RawMessage {
    id: String,
    subject: Option<String>,
    body: Option<RawBody>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
    #[serde(rename = "isRead")]
    is_read: bool,
    #[serde(rename = "hasAttachments")]
    has_attachments: bool,
    #[serde(rename = "webLink")]
    web_link: Option<String>,
    #[serde(rename = "toRecipients", default)]
    to_recipients: Vec<RawRecipient>,
    #[serde(rename = "ccRecipients", default)]
    cc_recipients: Vec<RawRecipient>,
    #[serde(rename = "bccRecipients", default)]
    bcc_recipients: Vec<RawRecipient>,
    #[serde(rename = "internetMessageHeaders", default)]
    internet_message_headers: Vec<RawHeader>,
}

#[derive(Deserialize)]
struct RawBody {
    #[serde(rename = "contentType")]
    content_type: String,
    content: String,
}

#[derive(Deserialize)]
struct RawRecipient {
    #[serde(rename = "emailAddress")]
    email_address: RawEmailAddress,
}

#[derive(Deserialize)]
struct RawEmailAddress {
    address: String,
}

#[derive(Deserialize)]
struct RawHeader {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct ListMessagesResponse {
    value: Vec<RawMessage>,
}

async fn list_unread(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    mailbox_encoded: &str,
    cancel: &CancellationToken,
) -> Result<Vec<RawMessage>, ReceiveError> {
    let url = format!(
        "{mail_base}/users/{mailbox_encoded}/mailFolders/inbox/messages?$filter=isRead%20eq%20false&$select={SELECT_FIELDS}&$top=100"
    );

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
        .map_err(token_or_list)?;

    let bytes = response
        .bytes()
        .await
        .map_err(|source| ReceiveError::ListMessages(RetryError::Fatal(Box::new(crate::error::HttpError::Network(source)))))?;

    let parsed: ListMessagesResponse = serde_json::from_slice(&bytes).map_err(ReceiveError::Parse)?;
    Ok(parsed.value)
}

fn token_or_list(error: RetryError) -> ReceiveError {
    match error {
        RetryError::Token(token_error) => ReceiveError::Token(token_error),
        other => ReceiveError::ListMessages(other),
    }
}

fn token_or_fetch_attachments(error: RetryError) -> ReceiveError {
    match error {
        RetryError::Token(token_error) => ReceiveError::Token(token_error),
        other => ReceiveError::FetchAttachments(other),
    }
}

#[allow(clippy::too_many_arguments)]
async fn hydrate_one(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    mailbox_encoded: &str,
    raw: RawMessage,
    cancel: &CancellationToken,
) -> MessageDto {
    let attachments = if raw.has_attachments {
        match fetch_attachments(http, token_provider, retry_policy, mail_base, mailbox_encoded, &raw.id, cancel).await {
            Ok(attachments) => Some(attachments),
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(message_id = %raw.id, %error, "failed to hydrate attachments; returning message without them");
                None
            }
        }
    } else {
        Some(Vec::new())
    };

    let mut is_read = raw.is_read;
    if let Err(error) = mark_as_read(http, token_provider, retry_policy, mail_base, mailbox_encoded, &raw.id, cancel).await {
        #[cfg(feature = "tracing")]
        tracing::warn!(message_id = %raw.id, %error, "failed to mark message as read");
    } else {
        is_read = true;
    }

    MessageDto {
        id: raw.id,
        subject: raw.subject.unwrap_or_default(),
        body: raw.body.as_ref().map(|b| b.content.clone()).unwrap_or_default(),
        body_is_html: raw.body.map(|b| b.content_type.eq_ignore_ascii_case("html")).unwrap_or(false),
        received_at: raw.received_date_time,
        is_read,
        has_attachments: raw.has_attachments,
        web_link: raw.web_link,
        to: raw.to_recipients.into_iter().map(|r| r.email_address.address).collect(),
        cc: raw.cc_recipients.into_iter().map(|r| r.email_address.address).collect(),
        bcc: raw.bcc_recipients.into_iter().map(|r| r.email_address.address).collect(),
        internet_message_headers: raw
            .internet_message_headers
            .into_iter()
            .map(|h| (h.name, h.value))
            .collect(),
        attachments,
    }
}

#[derive(Deserialize)]
struct RawAttachment {
    id: String,
    name: String,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    #[serde(rename = "@odata.mediaContentType")]
    odata_media_content_type: Option<String>,
    size: u64,
    #[serde(rename = "isInline")]
    is_inline: bool,
    #[serde(rename = "contentBytes", default)]
    content_bytes: String,
}

#[derive(Deserialize)]
struct ListAttachmentsResponse {
    value: Vec<RawAttachment>,
}

async fn fetch_attachments(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    mailbox_encoded: &str,
    message_id: &str,
    cancel: &CancellationToken,
) -> Result<Vec<AttachmentDto>, ReceiveError> {
    let url = format!("{mail_base}/users/{mailbox_encoded}/messages/{message_id}/attachments");

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
        .map_err(token_or_fetch_attachments)?;

    let bytes = response.bytes().await.map_err(|source| {
        ReceiveError::FetchAttachments(RetryError::Fatal(Box::new(crate::error::HttpError::Network(source))))
    })?;

    let parsed: ListAttachmentsResponse = serde_json::from_slice(&bytes).map_err(ReceiveError::Parse)?;

    Ok(parsed
        .value
        .into_iter()
        .map(|a| AttachmentDto {
            id: a.id,
            name: a.name,
            content_type: a
                .content_type
                .or(a.odata_media_content_type)
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: a.size,
            is_inline: a.is_inline,
            content_base64: a.content_bytes,
        })
        .collect())
}

#[derive(Serialize)]
struct MarkReadBody {
    #[serde(rename = "isRead")]
    is_read: bool,
}

async fn mark_as_read(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    mailbox_encoded: &str,
    message_id: &str,
    cancel: &CancellationToken,
) -> Result<(), RetryError> {
    let url = format!("{mail_base}/users/{mailbox_encoded}/messages/{message_id}");
    let body = MarkReadBody { is_read: true };

    let executor = RetryExecutor::new(retry_policy);
    executor
        .execute(cancel, || async {
            let token = token_provider.get_token(cancel).await.map_err(AttemptError::Token)?;
            http.patch(&url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(AttemptError::from)
        })
        .await?;

    Ok(())
}
