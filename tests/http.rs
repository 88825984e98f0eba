//! HTTP contract tests.
//!
//! Each test starts a one-shot responder on a loopback `TcpListener` that
//! answers a fixed list of canned responses, one connection each, and records
//! the raw requests it received. The real reqwest clients are pointed at it,
//! so these cover the wire format end to end without any outside service.
//!
//! Run with:
//!   RUST_LOG=fileshift=debug cargo test --test http -- --nocapture

use fileshift::{
    BlobStore, Category, ClientConfig, ConversionBackend, ConversionRequest, ConversionState,
    ConvertError, Converter, CounterClient, HttpBackend, HttpBlobStore, HttpCounterStore,
    InputFormat, OutputFormat, ProgressReporter, SourceFile, Transport,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Canned {
    status: u16,
    content_type: Option<&'static str>,
    body: Vec<u8>,
}

fn json(status: u16, body: &str) -> Canned {
    Canned {
        status,
        content_type: Some("application/json"),
        body: body.as_bytes().to_vec(),
    }
}

fn raw(status: u16, content_type: Option<&'static str>, body: &[u8]) -> Canned {
    Canned {
        status,
        content_type,
        body: body.to_vec(),
    }
}

struct Received {
    /// Request line and headers, as sent.
    head: String,
    body: Vec<u8>,
}

impl Received {
    fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Serve `replies` in order, one per connection, and hand back what was asked.
async fn serve(replies: Vec<Canned>) -> (String, JoinHandle<Vec<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        for reply in replies {
            let (mut stream, _) = listener.accept().await.unwrap();
            received.push(read_request(&mut stream).await);
            write_response(&mut stream, &reply).await;
        }
        received
    });
    (base, handle)
}

async fn read_request(stream: &mut TcpStream) -> Received {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 16 * 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the request head");
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let lower = head.to_ascii_lowercase();
    let content_length = lower
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok());
    let chunked = lower.contains("transfer-encoding: chunked");

    loop {
        let body = &buf[head_end..];
        let complete = match content_length {
            Some(len) => body.len() >= len,
            None if chunked => body.ends_with(b"0\r\n\r\n"),
            None => true,
        };
        if complete {
            break;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Received {
        head,
        body: buf[head_end..].to_vec(),
    }
}

async fn write_response(stream: &mut TcpStream, reply: &Canned) {
    let reason = if (200..300).contains(&reply.status) { "OK" } else { "Error" };
    let mut head = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
    );
    if let Some(ct) = reply.content_type {
        head.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&reply.body).await.unwrap();
    let _ = stream.shutdown().await;
}

fn config(base: &str) -> ClientConfig {
    ClientConfig::builder()
        .api_url(base)
        .request_timeout_secs(10)
        .build()
        .unwrap()
}

fn request(name: &str, content_type: &str, input: InputFormat, output: OutputFormat) -> ConversionRequest {
    ConversionRequest {
        file: SourceFile::new(name, content_type, vec![0x5Au8; 64]),
        input,
        output,
    }
}

// ── Conversion endpoint ──────────────────────────────────────────────────────

#[tokio::test]
async fn direct_rejection_surfaces_detail() {
    init_tracing();
    let (base, server) = serve(vec![json(500, r#"{"detail":"decode failed"}"#)]).await;
    let converter = Converter::builder(config(&base)).build().unwrap();

    let state = converter
        .select_file(
            SourceFile::new("photo.avif", "image/avif", vec![1u8; 2048]),
            Category::Image,
            None,
        )
        .await
        .unwrap();

    assert_eq!(state.error(), Some("decode failed"));
    assert_eq!(converter.last_transport(), Some(Transport::Direct));

    let received = server.await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(
        received[0]
            .request_line()
            .starts_with("POST /api/convert?output_format=png "),
        "got: {}",
        received[0].request_line()
    );
    let content_type = received[0].header("content-type").unwrap_or_default();
    assert!(content_type.starts_with("multipart/form-data"), "got: {content_type}");
    let body = received[0].body_text();
    assert!(body.contains(r#"name="file""#), "body: {body}");
    assert!(body.contains(r#"filename="photo.avif""#), "body: {body}");
}

#[tokio::test]
async fn direct_success_keeps_response_content_type() {
    init_tracing();
    let (base, server) = serve(vec![raw(200, Some("image/webp"), b"RIFF\0\0\0\0WEBP")]).await;
    let backend = HttpBackend::new(&config(&base)).unwrap();

    let payload = backend
        .convert_upload(
            &request("IMG_1.heic", "image/heic", InputFormat::Heic, OutputFormat::Webp),
            ProgressReporter::new(|_| {}),
        )
        .await
        .unwrap();

    assert_eq!(payload.content_type.as_deref(), Some("image/webp"));
    assert_eq!(&payload.bytes[..], b"RIFF\0\0\0\0WEBP");
    let received = server.await.unwrap();
    assert!(received[0]
        .request_line()
        .starts_with("POST /api/convert?output_format=webp "));
}

#[tokio::test]
async fn missing_content_type_falls_back_to_output_mime() {
    init_tracing();
    let (base, _server) = serve(vec![raw(200, None, b"\xff\xd8\xff\xe0")]).await;
    let converter = Converter::builder(config(&base)).build().unwrap();

    let converted = converter
        .convert(
            SourceFile::new("IMG_2.heic", "", vec![1u8; 512]),
            Category::Image,
            None,
        )
        .await
        .unwrap();

    assert_eq!(converted.content_type, "image/jpeg");
    assert_eq!(converted.filename, "IMG_2.jpg");
}

#[tokio::test]
async fn html_error_page_reports_status() {
    init_tracing();
    let (base, _server) = serve(vec![raw(502, Some("text/html"), b"<html>Bad gateway</html>")]).await;
    let backend = HttpBackend::new(&config(&base)).unwrap();

    let err = backend
        .convert_url("https://blob.test/a.cr2", "a.cr2", OutputFormat::Jpg)
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::ServerStatus { status: 502 }), "got: {err:?}");
    assert_eq!(err.to_string(), "Server error: 502");
}

#[tokio::test]
async fn health_probe_follows_status() {
    init_tracing();
    let (base, server) = serve(vec![raw(200, None, b""), raw(503, None, b"")]).await;
    let backend = HttpBackend::new(&config(&base)).unwrap();

    assert!(backend.health_check().await);
    assert!(!backend.health_check().await);
    let received = server.await.unwrap();
    assert!(received[0].request_line().starts_with("GET /health "));
}

// ── Blob store ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn blob_upload_requests_token_then_puts_bytes() {
    init_tracing();
    let (base, server) = serve(vec![
        json(200, r#"{"clientToken":"tok-1"}"#),
        json(200, r#"{"url":"https://cdn.test/IMG_0001-ab12cd34.CR2"}"#),
    ])
    .await;
    let store = HttpBlobStore::new(&config(&base)).unwrap();

    let url = store
        .upload(&request("IMG_0001.CR2", "", InputFormat::Cr2, OutputFormat::Jpg))
        .await
        .unwrap();
    assert_eq!(url, "https://cdn.test/IMG_0001-ab12cd34.CR2");

    let received = server.await.unwrap();
    assert_eq!(received.len(), 2);

    let token = &received[0];
    assert!(token.request_line().starts_with("POST /api/upload "), "got: {}", token.request_line());
    let asked: serde_json::Value = serde_json::from_slice(&token.body).unwrap();
    assert_eq!(asked["contentType"], "image/x-canon-cr2");
    let pathname = asked["pathname"].as_str().unwrap().to_string();
    assert!(pathname.starts_with("IMG_0001-") && pathname.ends_with(".CR2"), "got: {pathname}");

    let put = &received[1];
    assert_eq!(put.request_line(), format!("PUT /blob/{pathname} HTTP/1.1"));
    assert_eq!(put.header("authorization").as_deref(), Some("Bearer tok-1"));
    assert_eq!(put.header("content-type").as_deref(), Some("image/x-canon-cr2"));
    assert_eq!(put.body, vec![0x5Au8; 64]);
}

#[tokio::test]
async fn unsignable_declared_type_is_sent_as_format_type() {
    init_tracing();
    let (base, server) = serve(vec![
        json(200, r#"{"clientToken":"tok-2"}"#),
        json(200, r#"{"url":"https://cdn.test/clip.avifs"}"#),
    ])
    .await;
    let store = HttpBlobStore::new(&config(&base)).unwrap();

    store
        .upload(&request("clip.avifs", "image/avif-sequence", InputFormat::Avif, OutputFormat::Png))
        .await
        .unwrap();

    let received = server.await.unwrap();
    let asked: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(asked["contentType"], "image/avif");
    assert_eq!(received[1].header("content-type").as_deref(), Some("image/avif"));
}

#[tokio::test]
async fn token_refusal_stops_before_upload() {
    init_tracing();
    let (base, server) = serve(vec![json(403, r#"{"error":"token expired"}"#)]).await;
    let store = HttpBlobStore::new(&config(&base)).unwrap();

    let err = store
        .upload(&request("IMG_0002.CR2", "", InputFormat::Cr2, OutputFormat::Jpg))
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Remote { status: 403, .. }), "got: {err:?}");
    assert_eq!(err.to_string(), "token expired");
    assert_eq!(server.await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_put_is_a_remote_error() {
    init_tracing();
    let (base, _server) = serve(vec![
        json(200, r#"{"clientToken":"tok-3"}"#),
        json(507, r#"{"detail":"storage quota exceeded"}"#),
    ])
    .await;
    let store = HttpBlobStore::new(&config(&base)).unwrap();

    let err = store
        .upload(&request("IMG_0003.CR2", "", InputFormat::Cr2, OutputFormat::Jpg))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "storage quota exceeded");
}

#[tokio::test]
async fn upload_answer_without_url_is_invalid() {
    init_tracing();
    let (base, _server) = serve(vec![
        json(200, r#"{"clientToken":"tok-4"}"#),
        json(200, r#"{"href":"https://cdn.test/x"}"#),
    ])
    .await;
    let store = HttpBlobStore::new(&config(&base)).unwrap();

    let err = store
        .upload(&request("IMG_0004.CR2", "", InputFormat::Cr2, OutputFormat::Jpg))
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::InvalidResponse(_)), "got: {err:?}");
}

#[tokio::test]
async fn staged_flow_converts_by_url() {
    init_tracing();
    let (base, server) = serve(vec![
        json(200, r#"{"clientToken":"tok-5"}"#),
        json(200, r#"{"url":"https://cdn.test/big-1.cr2"}"#),
        raw(200, Some("image/jpeg"), b"\xff\xd8\xff\xe0"),
    ])
    .await;
    let converter = Converter::builder(config(&base)).build().unwrap();

    let converted = converter
        .convert(
            SourceFile::new("big.cr2", "", vec![7u8; 6 * 1024 * 1024]),
            Category::Image,
            None,
        )
        .await
        .unwrap();

    assert_eq!(converter.last_transport(), Some(Transport::Staged));
    assert_eq!(converted.filename, "big.jpg");
    assert!(matches!(converter.state(), ConversionState::Success { .. }));

    let received = server.await.unwrap();
    assert!(received[0].request_line().starts_with("POST /api/upload "));
    assert!(received[1].request_line().starts_with("PUT /blob/big-"));
    assert_eq!(received[1].body.len(), 6 * 1024 * 1024);
    assert!(received[2].request_line().starts_with("POST /api/convert-from-url "));
    let asked: serde_json::Value = serde_json::from_slice(&received[2].body).unwrap();
    assert_eq!(
        asked,
        serde_json::json!({
            "url": "https://cdn.test/big-1.cr2",
            "filename": "big.cr2",
            "output_format": "jpg"
        })
    );
}

// ── Counter ──────────────────────────────────────────────────────────────────

fn counter(base: &str) -> CounterClient {
    CounterClient::new(Arc::new(HttpCounterStore::new(&config(base)).unwrap()))
}

#[tokio::test]
async fn counter_reads_and_increments() {
    init_tracing();
    let (base, server) = serve(vec![
        json(200, r#"{"totalConversions":41}"#),
        json(200, r#"{"totalConversions":"42"}"#),
    ])
    .await;
    let counter = counter(&base);

    assert_eq!(counter.read_count().await, 41);
    assert_eq!(counter.increment_and_fetch().await, 42);

    let received = server.await.unwrap();
    assert!(received[0].request_line().starts_with("GET /api/stats "));
    assert!(received[1].request_line().starts_with("POST /api/stats/increment "));
}

#[tokio::test]
async fn counter_unavailable_reads_zero() {
    init_tracing();
    let (base, _server) = serve(vec![json(503, r#"{"error":"Stats not available"}"#)]).await;
    assert_eq!(counter(&base).read_count().await, 0);
}

#[tokio::test]
async fn counter_malformed_body_reads_zero() {
    init_tracing();
    let (base, _server) = serve(vec![raw(200, Some("text/plain"), b"forty-two")]).await;
    assert_eq!(counter(&base).increment_and_fetch().await, 0);
}
