//! Single chunk-server connection.
//!
//! One `ChunkConnection` owns one TCP stream to one storage node. Every
//! blocking operation is bounded by its own timeout class: connect timeout
//! for establishment, write timeout per send, read timeout per receive.
//! Exceeding a budget fails only this connection; redundancy handling lives
//! in the callers.

use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{BlobError, Result};
use crate::wire::{parse_chunk_url, parse_response_head, ChunkUrl, ResponseHead};

const HEAD_READ_CHUNK: usize = 4096;
const MAX_HEAD_SIZE: usize = 16 * 1024;

pub struct ChunkConnection {
    stream: TcpStream,
    url: String,
    target: ChunkUrl,
    /// Bytes received past the response head, handed out by `recv_body`
    pending: BytesMut,
}

impl ChunkConnection {
    /// Open a connection to the node holding `url`, bounded by
    /// `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let target = parse_chunk_url(url)?;
        let stream = match timeout(connect_timeout, TcpStream::connect(&target.authority)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(BlobError::Io(e)),
            Err(_) => {
                return Err(BlobError::ConnectTimeout {
                    url: url.to_string(),
                })
            }
        };
        debug!("Connected to chunk node {}", target.authority);
        Ok(Self {
            stream,
            url: url.to_string(),
            target,
            pending: BytesMut::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn target(&self) -> &ChunkUrl {
        &self.target
    }

    /// Send a buffer, bounded by `write_timeout`.
    pub async fn send(&mut self, data: &[u8], write_timeout: Duration) -> Result<()> {
        match timeout(write_timeout, self.stream.write_all(data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BlobError::Io(e)),
            Err(_) => Err(BlobError::WriteTimeout {
                url: self.url.clone(),
            }),
        }
    }

    /// Read the response head (status line + headers). Body bytes that
    /// arrive in the same segments are kept for `recv_body`.
    pub async fn read_head(&mut self, read_timeout: Duration) -> Result<ResponseHead> {
        loop {
            if let Some(end) = find_head_end(&self.pending) {
                let head = self.pending.split_to(end);
                self.pending.advance(4); // the \r\n\r\n separator
                return parse_response_head(&head);
            }
            if self.pending.len() > MAX_HEAD_SIZE {
                return Err(BlobError::Protocol(format!(
                    "response head from {} exceeds {} bytes",
                    self.url, MAX_HEAD_SIZE
                )));
            }

            let mut buf = [0u8; HEAD_READ_CHUNK];
            let read = match timeout(read_timeout, self.stream.read(&mut buf)).await {
                Ok(Ok(read)) => read,
                Ok(Err(e)) => return Err(BlobError::Io(e)),
                Err(_) => {
                    return Err(BlobError::ReadTimeout {
                        url: self.url.clone(),
                    })
                }
            };
            if read == 0 {
                return Err(BlobError::Protocol(format!(
                    "connection to {} closed before a response head",
                    self.url
                )));
            }
            self.pending.extend_from_slice(&buf[..read]);
        }
    }

    /// Receive up to `max` body bytes, bounded by `read_timeout`. Returns an
    /// empty buffer at end of stream.
    pub async fn recv_body(&mut self, max: usize, read_timeout: Duration) -> Result<Bytes> {
        if !self.pending.is_empty() {
            let take = max.min(self.pending.len());
            return Ok(self.pending.split_to(take).freeze());
        }

        let mut buf = vec![0u8; max];
        let read = match timeout(read_timeout, self.stream.read(&mut buf)).await {
            Ok(Ok(read)) => read,
            Ok(Err(e)) => return Err(BlobError::Io(e)),
            Err(_) => {
                return Err(BlobError::ReadTimeout {
                    url: self.url.clone(),
                })
            }
        };
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"HTTP/1.1 200 OK\r\n\r\nbody"), Some(15));
        assert_eq!(find_head_end(b"HTTP/1.1 200 OK\r\n"), None);
    }

    #[tokio::test]
    async fn test_connect_timeout_is_typed() {
        // Unroutable address per RFC 5737; connect cannot complete
        let result =
            ChunkConnection::connect("http://192.0.2.1:6010/AB", Duration::from_millis(50)).await;
        match result {
            Err(BlobError::ConnectTimeout { url }) => assert!(url.contains("192.0.2.1")),
            Err(BlobError::Io(_)) => {} // some environments reject instead of dropping
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_head_and_body_carry_over() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
        });

        let url = format!("http://{}/AB", addr);
        let mut conn = ChunkConnection::connect(&url, Duration::from_secs(1))
            .await
            .unwrap();
        let head = conn.read_head(Duration::from_secs(1)).await.unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.content_length(), Some(5));

        let body = conn.recv_body(64, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }
}
