//! Minimal HTTP/1.1 (with 1.0 keep-alive downgrade) request/response
//! transport, hand-rolled over [`timedkv_net::ClientStream`].
//!
//! The reserved `""` header key carries the raw request line on the way in
//! and the raw status line on the way out — callers that want it can find
//! it there instead of re-deriving it from `method`/`path`/`version`.

use std::collections::BTreeMap;
use timedkv_common::{TimedKvError, MAX_BODY_SIZE};
use timedkv_net::ClientStream;

const MAX_HEADER_LINE: usize = 16 * 1024;
const MAX_CHUNK_SIZE_LINE: usize = 32;

/// Transport-level failure reading a request off the wire. Kept distinct
/// from [`TimedKvError`] because "body exceeds the cap" maps to HTTP 413,
/// a status outside the RPC `ReturnCode` table entirely — the cap is
/// enforced before the RPC layer ever sees the request.
#[derive(Debug)]
pub enum HttpReadError {
    /// `Content-Length` or the running chunked total exceeded [`MAX_BODY_SIZE`].
    TooLarge,
    /// Any other malformed request (bad request line, header, chunk framing, ...).
    Protocol(TimedKvError),
}

impl From<TimedKvError> for HttpReadError {
    fn from(err: TimedKvError) -> Self {
        HttpReadError::Protocol(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Unknown(String),
}

impl Method {
    fn parse(s: &str) -> Method {
        match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            other => Method::Unknown(other.to_string()),
        }
    }
}

pub struct HttpRequest {
    /// The literal request line, stored under the reserved `""` key of a
    /// parameter map whenever one is built from this request.
    pub raw_request_line: String,
    pub method: Method,
    pub path: String,
    pub query: String,
    pub version: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub keep_alive: bool,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Reads and parses one request off `stream`. Returns `Ok(None)` on a clean
/// connection close before any bytes of a new request arrive (the normal
/// end of a keep-alive session).
pub async fn read_request(stream: &mut ClientStream) -> Result<Option<HttpRequest>, HttpReadError> {
    let first_byte = match stream.receive_byte().await {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    stream.push_back_byte(first_byte);

    let request_line = String::from_utf8(stream.receive_line(MAX_HEADER_LINE).await?)
        .map_err(|_| TimedKvError::Invalid("request line is not valid UTF-8".to_string()))?;
    let (method, target, version) = parse_request_line(&request_line)?;

    let mut headers = BTreeMap::new();
    loop {
        let line = stream.receive_line(MAX_HEADER_LINE).await?;
        if line.is_empty() {
            break;
        }
        let line = String::from_utf8(line)
            .map_err(|_| TimedKvError::Invalid("header line is not valid UTF-8".to_string()))?;
        let colon = line
            .find(':')
            .ok_or_else(|| TimedKvError::Invalid(format!("malformed header line {line:?}")))?;
        let name = line[..colon].trim().to_ascii_lowercase();
        let value = line[colon + 1..].trim().to_string();
        headers.insert(name, value);
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.clone(), String::new()),
    };

    let keep_alive = match headers.get("connection").map(|v| v.to_ascii_lowercase()) {
        Some(v) if v == "close" => false,
        Some(v) if v == "keep-alive" => true,
        _ => version == "HTTP/1.1",
    };

    let body = read_body(stream, &headers, &method).await?;

    Ok(Some(HttpRequest {
        raw_request_line: request_line,
        method,
        path,
        query,
        version,
        headers,
        body,
        keep_alive,
    }))
}

fn parse_request_line(line: &str) -> Result<(Method, String, String), TimedKvError> {
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or_else(|| TimedKvError::Invalid("empty request line".to_string()))?;
    let target = parts.next().ok_or_else(|| TimedKvError::Invalid("missing request target".to_string()))?;
    let version = parts.next().unwrap_or("HTTP/1.0");
    Ok((Method::parse(method), target.to_string(), version.to_string()))
}

async fn read_body(
    stream: &mut ClientStream,
    headers: &BTreeMap<String, String>,
    method: &Method,
) -> Result<Vec<u8>, HttpReadError> {
    if headers.get("transfer-encoding").map(|v| v.eq_ignore_ascii_case("chunked")) == Some(true) {
        return read_chunked_body(stream).await;
    }

    let Some(len) = headers.get("content-length") else {
        return Ok(Vec::new());
    };
    let len: u64 = len
        .parse()
        .map_err(|_| TimedKvError::Invalid(format!("bad Content-Length {len:?}")))?;
    if len > MAX_BODY_SIZE {
        return Err(HttpReadError::TooLarge);
    }
    if matches!(method, Method::Get | Method::Head) && len == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len as usize];
    stream.receive_exact(&mut buf).await?;
    Ok(buf)
}

async fn read_chunked_body(stream: &mut ClientStream) -> Result<Vec<u8>, HttpReadError> {
    let mut body = Vec::new();
    loop {
        let size_line = stream.receive_line(MAX_CHUNK_SIZE_LINE).await?;
        let size_line = String::from_utf8(size_line)
            .map_err(|_| TimedKvError::Invalid("chunk size line is not valid UTF-8".to_string()))?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_str, 16)
            .map_err(|_| TimedKvError::Invalid(format!("bad chunk size {size_line:?}")))?;
        if body.len() as u64 + size > MAX_BODY_SIZE {
            return Err(HttpReadError::TooLarge);
        }
        if size == 0 {
            // Trailing headers (if any) then the final CRLF; this core has no
            // use for trailers so they're read and discarded.
            loop {
                let line = stream.receive_line(MAX_HEADER_LINE).await?;
                if line.is_empty() {
                    break;
                }
            }
            break;
        }
        let mut chunk = vec![0u8; size as usize];
        stream.receive_exact(&mut chunk).await?;
        body.extend_from_slice(&chunk);
        let trailer = stream.receive_line(2).await?;
        if !trailer.is_empty() {
            return Err(TimedKvError::Invalid("malformed chunk trailer".to_string()));
        }
    }
    Ok(body)
}

pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub extra_headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self { status, content_type: content_type.into(), body, extra_headers: Vec::new() }
    }
}

/// Writes `response` to `stream` with `Server`, `Date`, `Content-Length`,
/// and `Content-Type` always set, and an explicit `Connection` override.
pub async fn write_response(
    stream: &mut ClientStream,
    response: &HttpResponse,
    keep_alive: bool,
) -> Result<(), TimedKvError> {
    let reason = timedkv_common::reason_phrase(response.status);
    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    let connection = if keep_alive { "keep-alive" } else { "close" };

    let mut head = format!(
        "HTTP/1.1 {} {}\r\nServer: timedkv/{}\r\nDate: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\n",
        response.status,
        reason,
        env!("CARGO_PKG_VERSION"),
        date,
        response.content_type,
        response.body.len(),
        connection,
    );
    for (name, value) in &response.extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    stream.send(head.as_bytes()).await?;
    if !response.body.is_empty() {
        stream.send(&response.body).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (ClientStream, ClientStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        let client_side = connect.await.unwrap();
        (
            ClientStream::from_tcp_stream(client_side, Duration::from_secs(2)),
            ClientStream::from_tcp_stream(server_side, Duration::from_secs(2)),
        )
    }

    #[tokio::test]
    async fn parses_request_line_headers_and_sized_body() {
        let (mut client, mut server) = loopback_pair().await;
        client
            .send(b"POST /rpc/set?DB=0 HTTP/1.1\r\nContent-Type: text/tab-separated-values\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        let req = read_request(&mut server).await.unwrap().unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/rpc/set");
        assert_eq!(req.query, "DB=0");
        assert_eq!(req.body, b"hello");
        assert!(req.keep_alive);
    }

    #[tokio::test]
    async fn connection_close_disables_keep_alive() {
        let (mut client, mut server) = loopback_pair().await;
        client.send(b"GET /rpc/report HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();
        let req = read_request(&mut server).await.unwrap().unwrap();
        assert!(!req.keep_alive);
    }

    #[tokio::test]
    async fn reads_chunked_body_to_zero_length_terminator() {
        let (mut client, mut server) = loopback_pair().await;
        client
            .send(b"POST /rpc/set HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n")
            .await
            .unwrap();
        let req = read_request(&mut server).await.unwrap().unwrap();
        assert_eq!(req.body, b"hello");
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected() {
        let (mut client, mut server) = loopback_pair().await;
        client
            .send(format!("POST /rpc/set HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_BODY_SIZE + 1).as_bytes())
            .await
            .unwrap();
        let result = read_request(&mut server).await;
        assert!(matches!(result, Err(HttpReadError::TooLarge)));
    }

    #[tokio::test]
    async fn writes_status_line_and_headers() {
        let (mut client, mut server) = loopback_pair().await;
        let response = HttpResponse::new(200, "text/plain", b"ok".to_vec());
        write_response(&mut server, &response, true).await.unwrap();
        let status_line = client.receive_line(256).await.unwrap();
        assert_eq!(status_line, b"HTTP/1.1 200 OK");
    }
}
