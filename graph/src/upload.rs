//! Upload session engine (C3): resumable chunked attachment uploads.

use std::sync::{Arc, Mutex};

use mailgw_core::EmailAttachment;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::{HttpError, RetryError, UploadError};
use crate::retry::{AttemptError, RetryExecutor, RetryPolicy};
use crate::token::TokenProvider;

/// Up to this many upload sessions are attempted for one attachment before
/// giving up, per §4.3 "Session re-creation loop".
const MAX_SESSION_ATTEMPTS: u32 = 3;

/// Shared free-list of chunk buffers. Buffers are rented per large-attachment
/// upload and returned on every exit path, including errors.
#[derive(Clone, Debug)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn acquire(&self, capacity: usize) -> PooledBuffer {
        let mut buf = self.free.lock().expect("buffer pool poisoned").pop().unwrap_or_default();
        buf.clear();
        buf.resize(capacity, 0);
        PooledBuffer {
            pool: self.clone(),
            buf: Some(buf),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A chunk buffer rented from a [`BufferPool`]. Returned to the pool when
/// dropped, regardless of why the holder went out of scope.
struct PooledBuffer {
    pool: BufferPool,
    buf: Option<Vec<u8>>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.lock().expect("buffer pool poisoned").push(buf);
        }
    }
}

/// Drive the resumable chunked upload protocol for one large attachment.
///
/// On success the attachment is fully committed on the backend. On failure
/// returns an [`UploadError`] describing the attachment, the offset reached,
/// and the underlying cause.
#[allow(clippy::too_many_arguments)]
#[cfg_attr(feature = "tracing", tracing::instrument(skip(http, token_provider, retry_policy, buffer_pool, attachment, cancel), fields(file_name = %attachment.file_name)))]
pub async fn upload_large(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    buffer_pool: &BufferPool,
    mail_base: &str,
    sender_encoded: &str,
    draft_id: &str,
    attachment: &EmailAttachment,
    sanitized_name: &str,
    file_size: u64,
    content_type: &str,
    chunk_size: u64,
    cancel: &CancellationToken,
) -> Result<(), UploadError> {
    let mut session_attempt: u32 = 0;
    let mut last_error: Option<UploadError> = None;

    loop {
        session_attempt += 1;

        let upload_url = create_upload_session(
            http,
            token_provider,
            retry_policy,
            mail_base,
            sender_encoded,
            draft_id,
            attachment,
            sanitized_name,
            file_size,
            cancel,
        )
        .await
        .map_err(|source| UploadError::CreateSession {
            file_name: attachment.file_name.clone(),
            source,
        })?;

        match run_chunk_loop(
            http,
            retry_policy,
            buffer_pool,
            &upload_url,
            &attachment.path,
            attachment.file_name.clone(),
            file_size,
            content_type,
            chunk_size,
            cancel,
        )
        .await
        {
            Ok(()) => return Ok(()),
            Err(ChunkLoopOutcome::SessionLost(committed)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    session_attempt,
                    committed,
                    "upload session lost, re-creating"
                );
                last_error = Some(UploadError::Incomplete {
                    file_name: attachment.file_name.clone(),
                    committed,
                    declared_size: file_size,
                });

                if session_attempt >= MAX_SESSION_ATTEMPTS {
                    return Err(UploadError::SessionLostExhausted {
                        file_name: attachment.file_name.clone(),
                        draft_id: draft_id.to_string(),
                        attempts: session_attempt,
                        source: Box::new(last_error.expect("set above")),
                    });
                }

                let delay = retry_policy.delay((session_attempt - 1) as usize);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(UploadError::Chunk {
                        file_name: attachment.file_name.clone(),
                        offset: 0,
                        source: RetryError::Cancelled,
                    }),
                }
            }
            Err(ChunkLoopOutcome::Fatal(err)) => return Err(err),
        }
    }
}

enum ChunkLoopOutcome {
    SessionLost(u64),
    Fatal(UploadError),
}

#[derive(Serialize)]
struct CreateUploadSessionBody<'a> {
    #[serde(rename = "AttachmentItem")]
    attachment_item: AttachmentItem<'a>,
}

#[derive(Serialize)]
struct AttachmentItem<'a> {
    #[serde(rename = "attachmentType")]
    attachment_type: &'a str,
    name: &'a str,
    size: u64,
    #[serde(rename = "isInline", skip_serializing_if = "Option::is_none")]
    is_inline: Option<bool>,
    #[serde(rename = "contentId", skip_serializing_if = "Option::is_none")]
    content_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateUploadSessionResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

#[allow(clippy::too_many_arguments)]
async fn create_upload_session(
    http: &reqwest::Client,
    token_provider: &TokenProvider,
    retry_policy: &RetryPolicy,
    mail_base: &str,
    sender_encoded: &str,
    draft_id: &str,
    attachment: &EmailAttachment,
    sanitized_name: &str,
    file_size: u64,
    cancel: &CancellationToken,
) -> Result<String, RetryError> {
    let url = format!(
        "{mail_base}/users/{sender_encoded}/messages/{draft_id}/attachments/createUploadSession"
    );
    let body = CreateUploadSessionBody {
        attachment_item: AttachmentItem {
            attachment_type: "file",
            name: sanitized_name,
            size: file_size,
            is_inline: attachment.inline.then_some(true),
            content_id: attachment.content_id.as_deref(),
        },
    };

    let executor = RetryExecutor::new(retry_policy);
    let response = executor
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

    let parsed: CreateUploadSessionResponse = response
        .json()
        .await
        .map_err(|source| RetryError::Fatal(Box::new(HttpError::Network(source))))?;

    Ok(parsed.upload_url)
}

#[derive(Deserialize, Default)]
struct UploadChunkResponse {
    #[serde(rename = "nextExpectedRanges", default)]
    next_expected_ranges: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
async fn run_chunk_loop(
    http: &reqwest::Client,
    retry_policy: &RetryPolicy,
    buffer_pool: &BufferPool,
    upload_url: &str,
    file_path: &std::path::Path,
    file_name: String,
    file_size: u64,
    content_type: &str,
    chunk_size: u64,
    cancel: &CancellationToken,
) -> Result<(), ChunkLoopOutcome> {
    let mut file = tokio::fs::File::open(file_path).await.map_err(|source| {
        ChunkLoopOutcome::Fatal(UploadError::ReadFile {
            file_name: file_name.clone(),
            offset: 0,
            source,
        })
    })?;

    let mut committed: u64 = 0;

    while committed < file_size {
        if cancel.is_cancelled() {
            return Err(ChunkLoopOutcome::Fatal(UploadError::Chunk {
                file_name: file_name.clone(),
                offset: committed,
                source: RetryError::Cancelled,
            }));
        }

        let want = chunk_size.min(file_size - committed) as usize;
        let mut buffer = buffer_pool.acquire(want);
        let filled = fill_buffer(&mut file, &mut buffer, want).await.map_err(|source| {
            ChunkLoopOutcome::Fatal(UploadError::ReadFile {
                file_name: file_name.clone(),
                offset: committed,
                source,
            })
        })?;

        if filled < want {
            return Err(ChunkLoopOutcome::Fatal(UploadError::Truncated {
                file_name: file_name.clone(),
                offset: committed + filled as u64,
                declared_size: file_size,
            }));
        }

        let end = committed + want as u64 - 1;
        let range_header = format!("bytes {committed}-{end}/{file_size}");
        let chunk = buffer[..want].to_vec();

        let executor = RetryExecutor::new(retry_policy);
        let result = executor
            .execute(cancel, || {
                let chunk = chunk.clone();
                let range_header = range_header.clone();
                async {
                    http.put(upload_url)
                        .header(CONTENT_TYPE, content_type)
                        .header(CONTENT_LENGTH, chunk.len())
                        .header("Content-Range", range_header)
                        .body(chunk)
                        .send()
                        .await
                        .map_err(AttemptError::from)
                }
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(RetryError::Fatal(http_error)) if is_session_lost(&http_error) => {
                return Err(ChunkLoopOutcome::SessionLost(committed));
            }
            Err(source) => {
                return Err(ChunkLoopOutcome::Fatal(UploadError::Chunk {
                    file_name: file_name.clone(),
                    offset: committed,
                    source,
                }))
            }
        };

        let status = response.status();
        let parsed: UploadChunkResponse = response.json().await.unwrap_or_default();

        committed += want as u64;

        if status.as_u16() == 200 || status.as_u16() == 201 || parsed.next_expected_ranges.is_empty() {
            break;
        }
    }

    if committed != file_size {
        return Err(ChunkLoopOutcome::Fatal(UploadError::Incomplete {
            file_name,
            committed,
            declared_size: file_size,
        }));
    }

    Ok(())
}

fn is_session_lost(error: &HttpError) -> bool {
    matches!(error, HttpError::Status { status, .. } if status.as_u16() == 404)
}

async fn fill_buffer(
    file: &mut tokio::fs::File,
    buffer: &mut [u8],
    want: usize,
) -> Result<usize, std::io::Error> {
    let mut filled = 0;
    while filled < want {
        let n = file.read(&mut buffer[filled..want]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
