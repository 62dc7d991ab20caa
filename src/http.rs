//! Minimal HTTP/1.1 plumbing for the relay: request parsing with `httparse`
//! and hand-formatted responses.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RelayError;

const MAX_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Headers for the event-stream response. The body uses chunked transfer
/// encoding so an aborted stream is distinguishable from a finished one.
pub const SSE_HEADERS: &str = "\
HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
Connection: close\r\n\
Transfer-Encoding: chunked\r\n\
X-Accel-Buffering: no\r\n\
Access-Control-Allow-Origin: *\r\n\
\r\n";

/// Last chunk of a chunked body; writing it marks a clean end of stream.
pub const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one request: the head, then a body framed by `Content-Length` or by
/// chunked transfer encoding. `Ok(None)` when the peer closes before sending
/// anything.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<HttpRequest>, RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let (head_len, method, path, headers) = loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(RelayError::MalformedRequest(
                "connection closed inside request head".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut storage);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                let method = req.method.unwrap_or_default().to_string();
                let path = req.path.unwrap_or("/").to_string();
                let headers: Vec<(String, String)> = req
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_ascii_lowercase(),
                            String::from_utf8_lossy(h.value).into_owned(),
                        )
                    })
                    .collect();
                break (len, method, path, headers);
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(RelayError::MalformedRequest("request head too large".to_string()));
                }
            }
            Err(e) => return Err(RelayError::MalformedRequest(e.to_string())),
        }
    };

    let chunked = headers
        .iter()
        .any(|(k, v)| k == "transfer-encoding" && v.to_ascii_lowercase().contains("chunked"));
    let rest = buf.split_off(head_len);
    let body = if chunked {
        read_chunked_body(reader, rest).await?
    } else {
        read_sized_body(reader, rest, &headers).await?
    };

    Ok(Some(HttpRequest {
        method,
        path,
        headers,
        body,
    }))
}

/// Append one read to `buf`; a closed connection here is a truncated body.
async fn fill<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let n = reader.read(&mut chunk).await?;
    if n == 0 {
        return Err(RelayError::MalformedRequest("connection closed inside body".to_string()));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

async fn read_sized_body<R>(
    reader: &mut R,
    mut body: Vec<u8>,
    headers: &[(String, String)],
) -> Result<Vec<u8>, RelayError>
where
    R: AsyncRead + Unpin,
{
    let content_length = match headers.iter().find(|(k, _)| k == "content-length") {
        Some((_, v)) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| RelayError::MalformedRequest(format!("bad content-length: {}", v)))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RelayError::MalformedRequest("request body too large".to_string()));
    }
    while body.len() < content_length {
        fill(reader, &mut body).await?;
    }
    body.truncate(content_length);
    Ok(body)
}

/// Decode a chunked body. `buf` holds whatever followed the head in the
/// last read. Trailer fields are skipped.
async fn read_chunked_body<R>(reader: &mut R, mut buf: Vec<u8>) -> Result<Vec<u8>, RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let (consumed, size) = match httparse::parse_chunk_size(&buf) {
            Ok(httparse::Status::Complete(found)) => found,
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(RelayError::MalformedRequest("chunk header too large".to_string()));
                }
                fill(reader, &mut buf).await?;
                continue;
            }
            Err(_) => return Err(RelayError::MalformedRequest("bad chunk size".to_string())),
        };
        let size = usize::try_from(size)
            .ok()
            .filter(|n| body.len().saturating_add(*n) <= MAX_BODY_BYTES)
            .ok_or_else(|| RelayError::MalformedRequest("request body too large".to_string()))?;

        if size == 0 {
            // Trailer section ends at the first empty line.
            loop {
                let section = &buf[consumed..];
                if section.starts_with(b"\r\n") || section.windows(4).any(|w| w == b"\r\n\r\n") {
                    return Ok(body);
                }
                if section.len() > MAX_HEAD_BYTES {
                    return Err(RelayError::MalformedRequest("trailer section too large".to_string()));
                }
                fill(reader, &mut buf).await?;
            }
        }

        let end = consumed + size;
        while buf.len() < end + 2 {
            fill(reader, &mut buf).await?;
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(RelayError::MalformedRequest("chunk not terminated by CRLF".to_string()));
        }
        body.extend_from_slice(&buf[consumed..end]);
        buf.drain(..end + 2);
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

pub fn json_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n{}",
        status,
        reason_phrase(status),
        body.len(),
        body
    )
}

/// Preflight answer for browsers calling the relay cross-origin.
pub fn preflight_response() -> &'static str {
    "HTTP/1.1 204 No Content\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
}

/// Write one chunk of a chunked body and flush it to the peer.
pub async fn write_chunk<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    writer.write_all(format!("{:x}\r\n", data.len()).as_bytes()).await?;
    writer.write_all(data).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}
