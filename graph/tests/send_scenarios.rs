//! End-to-end send/receive scenarios against a mocked Graph backend,
//! mirroring the S1-S7 scenarios and boundary behaviors this gateway is
//! specified against.

use std::io::Write as _;
use std::time::Duration;

use mailgw_core::{AuthConfig, EmailAttachment, MailEnvelope, Mailer, SendOptions};
use mailgw_graph::error::SendError;
use mailgw_graph::{GraphMailer, GraphMailerError};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use secrecy::SecretString;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TENANT: &str = "tenant1";
const SENDER: &str = "sender@example.com";

fn config() -> AuthConfig {
    AuthConfig {
        tenant_id: TENANT.into(),
        client_id: "client1".into(),
        client_secret: SecretString::from("secret".to_string()),
        default_sender: SENDER.into(),
    }
}

fn sender_encoded() -> String {
    utf8_percent_encode(SENDER, NON_ALPHANUMERIC).to_string()
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{TENANT}/oauth2/v2.0/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

fn mailer_for(server: &MockServer) -> GraphMailer {
    GraphMailer::with_base_urls(config(), reqwest::Client::new(), server.uri(), server.uri())
}

fn attachment_file(size: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    let chunk = vec![0u8; 64 * 1024];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(chunk.len());
        file.write_all(&chunk[..n]).expect("write temp file");
        remaining -= n;
    }
    file.flush().expect("flush temp file");
    file
}

async fn requests_to(server: &MockServer, path_suffix: &str) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .expect("received_requests")
        .into_iter()
        .filter(|r| r.url.path().ends_with(path_suffix))
        .collect()
}

fn json_body(request: &wiremock::Request) -> Value {
    serde_json::from_slice(&request.body).expect("request body is JSON")
}

// S1: plain text message, no attachments.
#[tokio::test]
async fn s1_plain_text_send_succeeds() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    let sender = sender_encoded();

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "M1"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "M1",
            "createdDateTime": "2024-01-01T00:00:00Z",
            "subject": "Hi",
            "body": {"contentType": "Text", "content": "Hello"},
            "toRecipients": [{"emailAddress": {"address": "a@x.io"}}],
            "attachments": [],
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/sendMail")))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mailer = mailer_for(&server);
    let envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    let result = mailer
        .send_mail(envelope, &SendOptions::default(), CancellationToken::new())
        .await;
    assert!(result.is_ok(), "{result:?}");

    let send_mail_requests = requests_to(&server, "/sendMail").await;
    assert_eq!(send_mail_requests.len(), 1);
    let body = json_body(&send_mail_requests[0]);
    assert_eq!(body["saveToSentItems"], json!(false));
    assert_eq!(body["message"]["subject"], json!("Hi"));
    assert_eq!(body["message"]["body"]["content"], json!("Hello"));
    assert_eq!(
        body["message"]["toRecipients"][0]["emailAddress"]["address"],
        json!("a@x.io")
    );
    // Draft-only fields never survive the whitelist into the send payload.
    assert!(body["message"].get("id").is_none());
    assert!(body["message"].get("createdDateTime").is_none());
}

// S2: one 2 MiB attachment stays under the 3 MiB threshold — inline base64 POST, no upload session.
#[tokio::test]
async fn s2_small_attachment_uses_inline_post() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let sender = sender_encoded();

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "M1"})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/users/{sender}/messages/M1/attachments/createUploadSession"
        )))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages/M1/attachments")))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subject": "Hi",
            "body": {"contentType": "Text", "content": "Hello"},
            "toRecipients": [{"emailAddress": {"address": "a@x.io"}}],
            "attachments": [],
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/sendMail")))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let file = attachment_file(2 * 1024 * 1024);
    let mut envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    envelope.attachments.push(EmailAttachment {
        file_name: "report.pdf".into(),
        path: file.path().to_path_buf(),
        inline: false,
        content_id: None,
        content_type: Some("application/pdf".into()),
    });

    let mailer = mailer_for(&server);
    let result = mailer
        .send_mail(envelope, &SendOptions::default(), CancellationToken::new())
        .await;
    assert!(result.is_ok(), "{result:?}");

    let attach_requests = requests_to(&server, "/attachments").await;
    assert_eq!(attach_requests.len(), 1);
    let body = json_body(&attach_requests[0]);
    assert_eq!(body["@odata.type"], json!("#microsoft.graph.fileAttachment"));
    assert_eq!(body["name"], json!("report.pdf"));
    assert!(body["contentBytes"].as_str().unwrap().len() > 0);
}

struct LargeAttachmentFixture {
    server: MockServer,
    sender: String,
    file: NamedTempFile,
}

/// Mounts the draft/materialize/sendMail/delete mocks shared by every
/// large-attachment scenario, leaving the createUploadSession/chunk PUT
/// mocks to the individual test.
async fn large_attachment_fixture() -> LargeAttachmentFixture {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let sender = sender_encoded();

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "M1"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subject": "Hi",
            "body": {"contentType": "Text", "content": "Hello"},
            "toRecipients": [{"emailAddress": {"address": "a@x.io"}}],
            "attachments": [],
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/sendMail")))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let file = attachment_file(12 * 1024 * 1024);
    LargeAttachmentFixture { server, sender, file }
}

fn large_envelope(fixture: &LargeAttachmentFixture) -> MailEnvelope {
    let mut envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    envelope.attachments.push(EmailAttachment {
        file_name: "video.mp4".into(),
        path: fixture.file.path().to_path_buf(),
        inline: false,
        content_id: None,
        content_type: Some("video/mp4".into()),
    });
    envelope
}

// S3: 12 MiB attachment, 3 MiB threshold, 5 MiB chunks -> 3 chunk PUTs at the exact declared ranges.
#[tokio::test]
async fn s3_large_attachment_chunks_at_declared_ranges() {
    let fixture = large_attachment_fixture().await;
    let server = &fixture.server;
    let sender = &fixture.sender;

    Mock::given(method("POST"))
        .and(path(format!(
            "/users/{sender}/messages/M1/attachments/createUploadSession"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/session1", server.uri()),
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 0-5242879/12582912"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"nextExpectedRanges": ["5242880-12582911"]})))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 5242880-10485759/12582912"))
        .respond_with(
            ResponseTemplate::new(202).set_body_json(json!({"nextExpectedRanges": ["10485760-12582911"]})),
        )
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 10485760-12582911/12582912"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"nextExpectedRanges": []})))
        .expect(1)
        .mount(server)
        .await;

    let mailer = mailer_for(server);
    let result = mailer
        .send_mail(large_envelope(&fixture), &SendOptions::default(), CancellationToken::new())
        .await;
    assert!(result.is_ok(), "{result:?}");
}

// S4: first chunk is rate-limited with Retry-After: 1, then succeeds; exactly one retry, elapsed >= 1s.
#[tokio::test(start_paused = true)]
async fn s4_retry_after_header_delays_next_attempt() {
    let fixture = large_attachment_fixture().await;
    let server = &fixture.server;
    let sender = &fixture.sender;

    Mock::given(method("POST"))
        .and(path(format!(
            "/users/{sender}/messages/M1/attachments/createUploadSession"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/session1", server.uri()),
        })))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 0-5242879/12582912"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 0-5242879/12582912"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"nextExpectedRanges": ["5242880-12582911"]})))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 5242880-10485759/12582912"))
        .respond_with(
            ResponseTemplate::new(202).set_body_json(json!({"nextExpectedRanges": ["10485760-12582911"]})),
        )
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 10485760-12582911/12582912"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"nextExpectedRanges": []})))
        .mount(server)
        .await;

    let mailer = mailer_for(server);
    let start = tokio::time::Instant::now();
    let result = mailer
        .send_mail(large_envelope(&fixture), &SendOptions::default(), CancellationToken::new())
        .await;
    assert!(result.is_ok(), "{result:?}");
    assert!(start.elapsed() >= Duration::from_secs(1));

    let first_chunk_calls = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/upload/session1" && r.headers.get("Content-Range").map(|v| v.as_bytes()) == Some(b"bytes 0-5242879/12582912"))
        .count();
    assert_eq!(first_chunk_calls, 2, "exactly one retry of the first chunk");
}

// S5: 404 on the second chunk triggers session re-creation, restarting from offset 0.
#[tokio::test(start_paused = true)]
async fn s5_session_lost_triggers_recreation() {
    let fixture = large_attachment_fixture().await;
    let server = &fixture.server;
    let sender = &fixture.sender;

    Mock::given(method("POST"))
        .and(path(format!(
            "/users/{sender}/messages/M1/attachments/createUploadSession"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/session1", server.uri()),
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/users/{sender}/messages/M1/attachments/createUploadSession"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/session2", server.uri()),
        })))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 0-5242879/12582912"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"nextExpectedRanges": ["5242880-12582911"]})))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session1"))
        .and(header("Content-Range", "bytes 5242880-10485759/12582912"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "ErrorItemNotFound", "message": "session invalid"}
        })))
        .mount(server)
        .await;

    for (range, next) in [
        ("bytes 0-5242879/12582912", json!(["5242880-12582911"])),
        ("bytes 5242880-10485759/12582912", json!(["10485760-12582911"])),
    ] {
        Mock::given(method("PUT"))
            .and(path("/upload/session2"))
            .and(header("Content-Range", range))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"nextExpectedRanges": next})))
            .mount(server)
            .await;
    }
    Mock::given(method("PUT"))
        .and(path("/upload/session2"))
        .and(header("Content-Range", "bytes 10485760-12582911/12582912"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"nextExpectedRanges": []})))
        .mount(server)
        .await;

    let mailer = mailer_for(server);
    let result = mailer
        .send_mail(large_envelope(&fixture), &SendOptions::default(), CancellationToken::new())
        .await;
    assert!(result.is_ok(), "{result:?}");

    let session_creates = requests_to(server, "/createUploadSession").await;
    assert_eq!(session_creates.len(), 2, "one re-creation after the session was lost");

    let session2_puts = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/upload/session2")
        .count();
    assert_eq!(session2_puts, 3, "second session restarts from offset 0 through completion");
}

// S6: sendMail exhausts retries; cleanup still deletes the draft.
#[tokio::test(start_paused = true)]
async fn s6_send_message_failure_still_cleans_up_draft() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let sender = sender_encoded();

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "M1"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subject": "Hi",
            "body": {"contentType": "Text", "content": "Hello"},
            "toRecipients": [{"emailAddress": {"address": "a@x.io"}}],
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/sendMail")))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mailer = mailer_for(&server);
    let envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    let result = mailer
        .send_mail(envelope, &SendOptions::default(), CancellationToken::new())
        .await;

    let err = result.expect_err("sendMail never succeeds");
    match err {
        GraphMailerError::Send(SendError::SendMessage(_)) => {}
        other => panic!("expected SendMessage error, got {other:?}"),
    }
}

// S7: sendMail and the cleanup delete both exhaust retries -> aggregate error.
#[tokio::test(start_paused = true)]
async fn s7_send_and_cleanup_both_fail_aggregate_error() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let sender = sender_encoded();

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "M1"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subject": "Hi",
            "body": {"contentType": "Text", "content": "Hello"},
            "toRecipients": [{"emailAddress": {"address": "a@x.io"}}],
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/sendMail")))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;

    let mailer = mailer_for(&server);
    let envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    let result = mailer
        .send_mail(envelope, &SendOptions::default(), CancellationToken::new())
        .await;

    let err = result.expect_err("both send and cleanup fail");
    match err {
        GraphMailerError::Send(SendError::Aggregate { send, cleanup: _ }) => {
            assert!(matches!(*send, SendError::SendMessage(_)));
        }
        other => panic!("expected Aggregate error, got {other:?}"),
    }
}

// Boundary: zero recipients is rejected before any backend call.
#[tokio::test]
async fn zero_recipients_rejected_without_network_call() {
    let server = MockServer::start().await;
    // Deliberately do not mount any endpoint; a network call here would fail the test.
    let mailer = mailer_for(&server);

    let mut envelope = MailEnvelope::new("placeholder@x.io", "Hi", "Hello");
    envelope.to.clear();

    let result = mailer
        .send_mail(envelope, &SendOptions::default(), CancellationToken::new())
        .await;
    match result.expect_err("no recipients must fail validation") {
        GraphMailerError::Send(SendError::Validation(_)) => {}
        other => panic!("expected Validation error, got {other:?}"),
    }
}

// Boundary: attachment exactly at the aggregate cap is accepted; one byte over is rejected.
#[tokio::test]
async fn aggregate_cap_boundary() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let sender = sender_encoded();

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "M1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subject": "Hi", "body": {"contentType": "Text", "content": "Hello"},
            "toRecipients": [{"emailAddress": {"address": "a@x.io"}}],
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages/M1/attachments")))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/sendMail")))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut options = SendOptions::default();
    options.max_aggregate_attachment_bytes = 1024;

    let at_cap_file = attachment_file(1024);
    let mut at_cap_envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    at_cap_envelope.attachments.push(EmailAttachment {
        file_name: "a.bin".into(),
        path: at_cap_file.path().to_path_buf(),
        inline: false,
        content_id: None,
        content_type: None,
    });
    let mailer = mailer_for(&server);
    let result = mailer
        .send_mail(at_cap_envelope, &options, CancellationToken::new())
        .await;
    assert!(result.is_ok(), "exactly-at-cap must be accepted: {result:?}");

    let over_cap_file = attachment_file(1025);
    let mut over_cap_envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    over_cap_envelope.attachments.push(EmailAttachment {
        file_name: "a.bin".into(),
        path: over_cap_file.path().to_path_buf(),
        inline: false,
        content_id: None,
        content_type: None,
    });
    let mailer = mailer_for(&server);
    let result = mailer
        .send_mail(over_cap_envelope, &options, CancellationToken::new())
        .await;
    match result.expect_err("one byte over the cap must be rejected") {
        GraphMailerError::Send(SendError::Validation(_)) => {}
        other => panic!("expected Validation error, got {other:?}"),
    }
}

// Boundary: an attachment exactly at the large-attachment threshold takes the
// inline path; one byte over takes the upload-session path.
#[tokio::test]
async fn attachment_threshold_boundary_routes_correctly() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let sender = sender_encoded();

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "M1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subject": "Hi", "body": {"contentType": "Text", "content": "Hello"},
            "toRecipients": [{"emailAddress": {"address": "a@x.io"}}],
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/sendMail")))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/users/{sender}/messages/M1")))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let threshold = SendOptions::default().large_attachment_threshold_bytes;

    Mock::given(method("POST"))
        .and(path(format!("/users/{sender}/messages/M1/attachments")))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let at_threshold_file = attachment_file(threshold as usize);
    let mut at_threshold_envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    at_threshold_envelope.attachments.push(EmailAttachment {
        file_name: "exact.bin".into(),
        path: at_threshold_file.path().to_path_buf(),
        inline: false,
        content_id: None,
        content_type: None,
    });
    let mailer = mailer_for(&server);
    let result = mailer
        .send_mail(at_threshold_envelope, &SendOptions::default(), CancellationToken::new())
        .await;
    assert!(result.is_ok(), "exactly-at-threshold must use the inline path: {result:?}");

    Mock::given(method("POST"))
        .and(path(format!(
            "/users/{sender}/messages/M1/attachments/createUploadSession"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/boundary", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload/boundary"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"nextExpectedRanges": []})))
        .expect(1)
        .mount(&server)
        .await;

    let over_threshold_file = attachment_file(threshold as usize + 1);
    let mut over_threshold_envelope = MailEnvelope::new("a@x.io", "Hi", "Hello");
    over_threshold_envelope.attachments.push(EmailAttachment {
        file_name: "over.bin".into(),
        path: over_threshold_file.path().to_path_buf(),
        inline: false,
        content_id: None,
        content_type: None,
    });
    let mailer = mailer_for(&server);
    let result = mailer
        .send_mail(over_threshold_envelope, &SendOptions::default(), CancellationToken::new())
        .await;
    assert!(result.is_ok(), "one byte over threshold must use the upload-session path: {result:?}");
}

// The receive path is best-effort per message: a failed attachment fetch must not abort the batch.
#[tokio::test(start_paused = true)]
async fn receive_degrades_gracefully_when_attachment_fetch_fails() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let mailbox = sender_encoded();

    Mock::given(method("GET"))
        .and(path(format!("/users/{mailbox}/mailFolders/inbox/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "id": "msg1",
                    "subject": "Hello",
                    "body": {"contentType": "Text", "content": "hi"},
                    "receivedDateTime": "2024-01-01T00:00:00Z",
                    "isRead": false,
                    "hasAttachments": true,
                    "webLink": null,
                    "toRecipients": [],
                    "ccRecipients": [],
                    "bccRecipients": [],
                    "internetMessageHeaders": [],
                }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/users/{mailbox}/messages/msg1/attachments")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(format!("/users/{mailbox}/messages/msg1")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mailer = mailer_for(&server);
    let messages = mailer
        .receive_mail(None, CancellationToken::new())
        .await
        .expect("batch must not abort on a per-message failure");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "msg1");
    assert!(messages[0].attachments.is_none(), "degraded hydration surfaces as None");
    assert!(messages[0].is_read, "mark-as-read succeeded for this message");
}
