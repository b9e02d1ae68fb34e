//! End-to-end wire tests: a full connection served over an in-memory
//! duplex stream, with the test playing the client.

use async_trait::async_trait;
use http::StatusCode;
use httpd::connection::HttpConnection;
use httpd::handler::Handler;
use httpd::protocol::{Request, ResponseWriter};
use httpd::router::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

fn spawn_connection<H>(handler: H) -> DuplexStream
where
    H: Handler + 'static,
{
    let (client, server) = tokio::io::duplex(256 * 1024);
    let (read_half, write_half) = tokio::io::split(server);
    let connection = HttpConnection::new(read_half, write_half, "test-peer".to_string());
    tokio::spawn(async move {
        let _ = connection.process(Arc::new(handler)).await;
    });
    client
}

/// Parses one response off the front of `wire`. Returns the status line,
/// headers, body (per Content-Length) and the number of bytes consumed.
fn parse_response(wire: &[u8]) -> (String, HashMap<String, String>, Vec<u8>, usize) {
    let head_end = wire.windows(4).position(|w| w == b"\r\n\r\n").expect("head terminator") + 4;
    let head = std::str::from_utf8(&wire[..head_end]).expect("ascii head");

    let mut lines = head.trim_end().split("\r\n");
    let status_line = lines.next().expect("status line").to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    let body_len = headers.get("Content-Length").map(|v| v.parse::<usize>().expect("length")).unwrap_or(0);
    let body = wire[head_end..head_end + body_len].to_vec();
    (status_line, headers, body, head_end + body_len)
}

fn decode_chunked(mut body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let line_end = body.windows(2).position(|w| w == b"\r\n").expect("chunk size line");
        let size = usize::from_str_radix(std::str::from_utf8(&body[..line_end]).unwrap(), 16).unwrap();
        body = &body[line_end + 2..];
        if size == 0 {
            assert_eq!(&body[..2], b"\r\n");
            return out;
        }
        out.extend_from_slice(&body[..size]);
        assert_eq!(&body[size..size + 2], b"\r\n");
        body = &body[size + 2..];
    }
}

struct PathHandler;

#[async_trait]
impl Handler for PathHandler {
    async fn serve_http(&self, response: &mut ResponseWriter, request: &mut Request<'_>) {
        let payload = match request.uri().path() {
            "/a" => "A",
            "/b" => "B",
            other => panic!("unexpected path {other}"),
        };
        let _ = response.write(payload.as_bytes()).await;
    }
}

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn serve_http(&self, response: &mut ResponseWriter, request: &mut Request<'_>) {
        let body = request.body_mut().bytes().await.expect("read body");
        let _ = response.write(&body).await;
    }
}

#[tokio::test]
async fn keep_alive_serves_two_requests_in_order() {
    let mut client = spawn_connection(PathHandler);

    client
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    let (status, headers, body, consumed) = parse_response(&wire);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(headers.get("Content-Length").map(String::as_str), Some("1"));
    assert_eq!(body, b"A");

    let (status, headers, body, consumed2) = parse_response(&wire[consumed..]);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(headers.get("Content-Length").map(String::as_str), Some("1"));
    assert_eq!(body, b"B");

    // the socket was closed right after the second response
    assert_eq!(consumed + consumed2, wire.len());
}

#[tokio::test]
async fn unread_body_is_drained_between_requests() {
    let mut client = spawn_connection(PathHandler);

    // the handler for /a never touches the POST body; the connection must
    // skip it to find the next request
    client
        .write_all(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nxxxxxGET /b HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    let (_, _, body, consumed) = parse_response(&wire);
    assert_eq!(body, b"A");

    let (_, _, body, _) = parse_response(&wire[consumed..]);
    assert_eq!(body, b"B");
}

#[tokio::test]
async fn chunked_post_is_decoded_and_echoed() {
    let mut client = spawn_connection(EchoHandler);

    client
        .write_all(
            b"POST /e HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        )
        .await
        .unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    let (status, headers, body, _) = parse_response(&wire);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(headers.get("Content-Length").map(String::as_str), Some("5"));
    assert!(!headers.contains_key("Transfer-Encoding"));
    assert_eq!(body, b"hello");
}

#[tokio::test]
async fn oversized_headers_close_the_connection_without_a_response() {
    let client = spawn_connection(PathHandler);

    let mut request = Vec::from(&b"GET /a HTTP/1.1\r\nX-Filler: "[..]);
    request.extend(vec![b'f'; 1024 * 1024 + 64 * 1024]);
    request.extend_from_slice(b"\r\n\r\n");

    let (mut read_half, mut write_half) = tokio::io::split(client);
    let writer = tokio::spawn(async move {
        // the peer may close mid-write; that is the expected outcome
        let _ = write_half.write_all(&request).await;
    });

    let mut wire = Vec::new();
    read_half.read_to_end(&mut wire).await.unwrap();
    assert!(wire.is_empty());

    writer.await.unwrap();
}

#[tokio::test]
async fn continue_preface_waits_for_the_first_body_read() {
    let mut client = spawn_connection(EchoHandler);

    client
        .write_all(b"PUT /u HTTP/1.1\r\nContent-Length: 3\r\nExpect: 100-continue\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    // the handler reads the body right away, so the interim response must
    // arrive even though no body byte has been sent yet
    let mut preface = [0u8; 25];
    client.read_exact(&mut preface).await.unwrap();
    assert_eq!(&preface[..], b"HTTP/1.1 100 Continue\r\n\r\n");

    client.write_all(b"abc").await.unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    let (status, _, body, _) = parse_response(&wire);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"abc");
}

#[tokio::test]
async fn continue_preface_is_skipped_when_the_handler_ignores_the_body() {
    struct NoBodyRead;

    #[async_trait]
    impl Handler for NoBodyRead {
        async fn serve_http(&self, response: &mut ResponseWriter, _request: &mut Request<'_>) {
            let _ = response.write(b"done").await;
        }
    }

    let mut client = spawn_connection(NoBodyRead);

    client
        .write_all(b"PUT /u HTTP/1.1\r\nContent-Length: 3\r\nExpect: 100-continue\r\n\r\n")
        .await
        .unwrap();

    // the body is never sent; the server answers and closes instead of
    // waiting for it
    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    let text = String::from_utf8_lossy(&wire);
    assert!(!text.contains("100 Continue"));

    let (status, _, body, _) = parse_response(&wire);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"done");
}

#[tokio::test]
async fn large_response_streams_chunked() {
    struct BigWriter;

    #[async_trait]
    impl Handler for BigWriter {
        async fn serve_http(&self, response: &mut ResponseWriter, _request: &mut Request<'_>) {
            let payload = vec![b'p'; 10_000];
            response.write(&payload).await.expect("write payload");
        }
    }

    let mut client = spawn_connection(BigWriter);

    client.write_all(b"GET /big HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    let (status, headers, _, head_end) = parse_response(&wire);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(headers.get("Transfer-Encoding").map(String::as_str), Some("chunked"));
    assert!(!headers.contains_key("Content-Length"));
    assert!(wire.ends_with(b"0\r\n\r\n"));

    let decoded = decode_chunked(&wire[head_end..]);
    assert_eq!(decoded, vec![b'p'; 10_000]);
}

#[tokio::test]
async fn http_10_closes_after_one_response() {
    let mut client = spawn_connection(PathHandler);

    client.write_all(b"GET /a HTTP/1.0\r\n\r\n").await.unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    let (status, _, body, consumed) = parse_response(&wire);
    assert_eq!(status, "HTTP/1.0 200 OK");
    assert_eq!(body, b"A");
    assert_eq!(consumed, wire.len());
}

#[tokio::test]
async fn panicking_handler_closes_the_socket() {
    struct Panicker;

    #[async_trait]
    impl Handler for Panicker {
        async fn serve_http(&self, _response: &mut ResponseWriter, _request: &mut Request<'_>) {
            panic!("handler blew up");
        }
    }

    let mut client = spawn_connection(Panicker);

    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();
    assert!(wire.is_empty());
}

#[tokio::test]
async fn router_dispatches_and_404s() {
    struct Hello;

    #[async_trait]
    impl Handler for Hello {
        async fn serve_http(&self, response: &mut ResponseWriter, _request: &mut Request<'_>) {
            let _ = response.write(b"hi").await;
        }
    }

    let mut router = Router::new();
    router.handle("/hello", Hello);
    let mut client = spawn_connection(router);

    client
        .write_all(b"GET /hello/ HTTP/1.1\r\nHost: x\r\n\r\nGET /nope HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    // the trailing slash falls back to the registered pattern
    let (status, _, body, consumed) = parse_response(&wire);
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, b"hi");

    let (status, _, body, _) = parse_response(&wire[consumed..]);
    assert_eq!(status, "HTTP/1.1 404 Not Found");
    assert_eq!(body, b"404 page not found\n");
}

#[tokio::test]
async fn handler_status_is_emitted() {
    struct Teapot;

    #[async_trait]
    impl Handler for Teapot {
        async fn serve_http(&self, response: &mut ResponseWriter, _request: &mut Request<'_>) {
            response.set_status(StatusCode::IM_A_TEAPOT);
            // a second call must not override the first
            response.set_status(StatusCode::OK);
            let _ = response.write(b"short and stout").await;
        }
    }

    let mut client = spawn_connection(Teapot);

    client.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();

    let (status, _, body, _) = parse_response(&wire);
    assert_eq!(status, "HTTP/1.1 418 I'm a teapot");
    assert_eq!(body, b"short and stout");
}
