//! Text-level pieces of the chunk-server protocol.
//!
//! One chunk connection speaks an HTTP/1.1-style exchange: a request head
//! with transfer headers, a chunked-transfer-framed body on writes, a ranged
//! body on reads. This module keeps all of the formatting and parsing in one
//! place so the connection and worker code only moves bytes.

use bytes::{BufMut, Bytes, BytesMut};
use replistore_common::ChunkPosition;

use crate::error::{BlobError, Result};

/// URL-escaped logical object path
pub const HDR_CONTENT_PATH: &str = "content_path";
/// Total object size in bytes
pub const HDR_CONTENT_SIZE: &str = "content_size";
/// Total planned chunk count for the object
pub const HDR_CHUNKS_NB: &str = "content_chunksnb";
/// Position of this chunk within the object
pub const HDR_CHUNK_POS: &str = "chunk_position";
/// Identifier of this chunk on the storage node
pub const HDR_CHUNK_ID: &str = "chunk_id";
/// Hex digest of the full chunk payload, returned by storage nodes on reads
pub const HDR_CHUNK_HASH: &str = "chunk_hash";

/// Terminator of a chunked-transfer body
pub const FINAL_FRAME: &[u8] = b"0\r\n\r\n";

/// A chunk URL split into the pieces a connection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUrl {
    /// `host:port` to connect to
    pub authority: String,
    /// Request path on the storage node, always starting with `/`
    pub path: String,
}

/// Split a chunk URL of the form `http://host:port/path`.
pub fn parse_chunk_url(url: &str) -> Result<ChunkUrl> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| BlobError::Protocol(format!("unsupported chunk URL: {}", url)))?;
    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(BlobError::Protocol(format!("chunk URL has no authority: {}", url)));
    }
    Ok(ChunkUrl {
        authority: authority.to_string(),
        path: path.to_string(),
    })
}

/// Percent-escape an object path for the `content_path` header. Slashes are
/// kept so the path stays readable in storage-node logs.
pub fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                escaped.push(byte as char)
            }
            _ => escaped.push_str(&format!("%{:02X}", byte)),
        }
    }
    escaped
}

/// Render a `Range` header value: `bytes=<start>-` or `bytes=<start>-<end>`
/// (inclusive end) when an explicit bound applies.
pub fn range_value(start: u64, end: Option<u64>) -> String {
    match end {
        Some(end) => format!("bytes={}-{}", start, end),
        None => format!("bytes={}-", start),
    }
}

/// Parse a `Range` header value of the form produced by [`range_value`].
pub fn parse_range_value(value: &str) -> Result<(u64, Option<u64>)> {
    let spec = value
        .strip_prefix("bytes=")
        .ok_or_else(|| BlobError::Protocol(format!("unsupported range: {}", value)))?;
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| BlobError::Protocol(format!("malformed range: {}", value)))?;
    let start = start
        .parse::<u64>()
        .map_err(|_| BlobError::Protocol(format!("malformed range: {}", value)))?;
    let end = if end.is_empty() {
        None
    } else {
        Some(
            end.parse::<u64>()
                .map_err(|_| BlobError::Protocol(format!("malformed range: {}", value)))?,
        )
    };
    Ok((start, end))
}

/// Frame one body fragment as a chunked-transfer piece:
/// `<hex length>\r\n<bytes>\r\n`.
pub fn frame_fragment(data: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(data.len() + 16);
    framed.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    framed.put_slice(data);
    framed.put_slice(b"\r\n");
    framed.freeze()
}

/// Announcement sent ahead of any payload byte on a write connection.
#[derive(Debug, Clone)]
pub struct WriteAnnounce {
    /// Logical object path, unescaped
    pub content_path: String,
    pub content_size: u64,
    pub chunk_count: u32,
    pub position: ChunkPosition,
    pub chunk_id: String,
}

/// Build the request head for writing one chunk replica.
pub fn put_request_head(url: &ChunkUrl, announce: &WriteAnnounce) -> String {
    format!(
        "PUT {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Transfer-Encoding: chunked\r\n\
         {}: {}\r\n\
         {}: {}\r\n\
         {}: {}\r\n\
         {}: {}\r\n\
         {}: {}\r\n\
         \r\n",
        url.path,
        url.authority,
        HDR_CONTENT_PATH,
        escape_path(&announce.content_path),
        HDR_CONTENT_SIZE,
        announce.content_size,
        HDR_CHUNKS_NB,
        announce.chunk_count,
        HDR_CHUNK_POS,
        announce.position,
        HDR_CHUNK_ID,
        announce.chunk_id,
    )
}

/// Build the request head for a ranged chunk read.
pub fn get_request_head(url: &ChunkUrl, range: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Range: {}\r\n\
         Connection: close\r\n\
         \r\n",
        url.path, url.authority, range,
    )
}

/// Build the request head for deleting one chunk replica.
pub fn delete_request_head(url: &ChunkUrl) -> String {
    format!(
        "DELETE {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Connection: close\r\n\
         \r\n",
        url.path, url.authority,
    )
}

/// Parsed response head from a chunk connection.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }
}

/// Parse a response head (status line plus headers, without the trailing
/// blank line).
pub fn parse_response_head(head: &[u8]) -> Result<ResponseHead> {
    let text = std::str::from_utf8(head)
        .map_err(|_| BlobError::Protocol("response head is not valid UTF-8".to_string()))?;
    let mut lines = text.split("\r\n").filter(|line| !line.is_empty());

    let status_line = lines
        .next()
        .ok_or_else(|| BlobError::Protocol("empty response head".to_string()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(BlobError::Protocol(format!("unexpected status line: {}", status_line)));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| BlobError::Protocol(format!("unexpected status line: {}", status_line)))?;

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| BlobError::Protocol(format!("malformed header line: {}", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(ResponseHead { status, headers })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chunk_url() {
        let url = parse_chunk_url("http://10.0.0.1:6010/AB12CD").unwrap();
        assert_eq!(url.authority, "10.0.0.1:6010");
        assert_eq!(url.path, "/AB12CD");

        let bare = parse_chunk_url("http://node:6010").unwrap();
        assert_eq!(bare.path, "/");

        assert!(parse_chunk_url("ftp://node/AB").is_err());
        assert!(parse_chunk_url("http:///AB").is_err());
    }

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path("media/video.bin"), "media/video.bin");
        assert_eq!(escape_path("a b%c"), "a%20b%25c");
    }

    #[test]
    fn test_range_round_trip() {
        assert_eq!(range_value(0, None), "bytes=0-");
        assert_eq!(range_value(4096, Some(8191)), "bytes=4096-8191");
        assert_eq!(parse_range_value("bytes=4096-8191").unwrap(), (4096, Some(8191)));
        assert_eq!(parse_range_value("bytes=7-").unwrap(), (7, None));
        assert!(parse_range_value("items=1-2").is_err());
    }

    #[test]
    fn test_frame_fragment() {
        let framed = frame_fragment(b"hello");
        assert_eq!(&framed[..], b"5\r\nhello\r\n");
        assert_eq!(frame_fragment(&[0u8; 16]).len(), 16 + 4 + 2 + 2);
    }

    #[test]
    fn test_parse_response_head() {
        let head = parse_response_head(
            b"HTTP/1.1 206 Partial Content\r\nContent-Length: 42\r\nchunk_hash: abcd\r\n",
        )
        .unwrap();
        assert_eq!(head.status, 206);
        assert!(head.is_success());
        assert_eq!(head.content_length(), Some(42));
        assert_eq!(head.header(HDR_CHUNK_HASH), Some("abcd"));

        assert!(parse_response_head(b"SPDY/3 200 OK\r\n").is_err());
    }

    #[test]
    fn test_put_request_head_carries_announce() {
        let url = parse_chunk_url("http://node:6010/AB").unwrap();
        let head = put_request_head(
            &url,
            &WriteAnnounce {
                content_path: "bucket/some file".to_string(),
                content_size: 1024,
                chunk_count: 2,
                position: 1,
                chunk_id: "AB".to_string(),
            },
        );
        assert!(head.starts_with("PUT /AB HTTP/1.1\r\n"));
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(head.contains("content_path: bucket/some%20file\r\n"));
        assert!(head.contains("content_chunksnb: 2\r\n"));
        assert!(head.contains("chunk_position: 1\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }
}
