//! Raw HTTP/1.1 framing for tunnel data frames.
//!
//! One WebSocket binary frame carries one complete request (relay → agent) or
//! one complete response (agent → relay), exactly as it would appear on a TCP
//! connection to an origin server. Bodies are always fully buffered.

use axum::body::Bytes;
use axum::http::{header, Method, Request, Response, StatusCode};

use super::TunnelError;

/// Maximum number of headers accepted in a response head.
const MAX_HEADERS: usize = 100;

/// Serialize a buffered request into a single request frame.
///
/// `Host` goes first. `Content-Length` and `Transfer-Encoding` from the
/// original request are replaced by a `Content-Length` matching the buffered
/// body.
pub fn encode_request(request: &Request<Bytes>) -> Vec<u8> {
    let body = request.body();
    let target = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());

    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(request.method().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let host = request
        .headers()
        .get(header::HOST)
        .map(|v| v.as_bytes().to_vec())
        .or_else(|| {
            request
                .uri()
                .authority()
                .map(|a| a.as_str().as_bytes().to_vec())
        });
    if let Some(host) = host {
        write_header(&mut out, "Host", &host);
    }

    for (name, value) in request.headers() {
        if name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::TRANSFER_ENCODING
        {
            continue;
        }
        write_header(&mut out, name.as_str(), value.as_bytes());
    }
    if !body.is_empty() {
        write_header(&mut out, "Content-Length", body.len().to_string().as_bytes());
    }

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

/// Parse a response frame.
///
/// `method` is the method of the request being answered; responses to `HEAD`
/// never carry a body. The returned response keeps every header except
/// `Transfer-Encoding`, whose framing has already been removed.
pub fn decode_response(method: &Method, frame: &Bytes) -> Result<Response<Bytes>, TunnelError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);

    let head_len = match parsed.parse(frame) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            return Err(malformed("incomplete response head"));
        }
        Err(e) => return Err(malformed(e)),
    };

    let code = parsed.code.ok_or_else(|| malformed("missing status code"))?;
    let status = StatusCode::from_u16(code).map_err(malformed)?;

    let mut builder = Response::builder().status(status);
    let mut chunked = false;
    let mut content_length: Option<usize> = None;

    for h in parsed.headers.iter() {
        if h.name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = String::from_utf8_lossy(h.value)
                .to_ascii_lowercase()
                .contains("chunked");
            continue;
        }
        if h.name.eq_ignore_ascii_case("content-length") {
            let len = std::str::from_utf8(h.value)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| malformed("invalid Content-Length"))?;
            content_length = Some(len);
        }
        builder = builder.header(h.name, h.value);
    }

    let rest = frame.slice(head_len..);
    let body = if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        Bytes::new()
    } else if chunked {
        decode_chunked(&rest)?
    } else if let Some(len) = content_length {
        if rest.len() < len {
            return Err(malformed(format!(
                "body truncated: expected {len} bytes, got {}",
                rest.len()
            )));
        }
        rest.slice(..len)
    } else {
        rest
    };

    builder.body(body).map_err(malformed)
}

/// Decode a `Transfer-Encoding: chunked` body. Trailers are ignored.
fn decode_chunked(mut rest: &[u8]) -> Result<Bytes, TunnelError> {
    let mut out = Vec::with_capacity(rest.len());
    loop {
        let line_end = find_crlf(rest).ok_or_else(|| malformed("unterminated chunk size line"))?;
        let line = std::str::from_utf8(&rest[..line_end])
            .map_err(|_| malformed("non-ASCII chunk size line"))?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| malformed(format!("invalid chunk size {size_str:?}")))?;
        rest = &rest[line_end + 2..];

        if size == 0 {
            return Ok(Bytes::from(out));
        }

        let end = size
            .checked_add(2)
            .filter(|&end| end <= rest.len())
            .ok_or_else(|| malformed("chunk truncated"))?;
        if &rest[size..end] != b"\r\n" {
            return Err(malformed("chunk missing trailing CRLF"));
        }
        out.extend_from_slice(&rest[..size]);
        rest = &rest[end..];
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn malformed(e: impl std::fmt::Display) -> TunnelError {
    TunnelError::MalformedResponse(e.to_string())
}
