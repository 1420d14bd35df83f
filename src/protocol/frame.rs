//! Length-prefixed framing and raw payload transfer
//!
//! Frame format: `[LEN:4 big-endian][JSON:LEN]`. A declared length above the
//! configured maximum is rejected before anything else is read, so a corrupt
//! or hostile header cannot make the reader allocate unbounded memory.
//!
//! Raw block bytes are sent unframed after a handshake that announces their
//! length; [`read_payload`] loops until every byte has arrived, growing its
//! buffer only as bytes come in.
//!
//! Timeouts are idle timeouts: each individual read or write must make
//! progress within the limit, however long the whole transfer takes.

use crate::common::{Error, Result};
use crate::protocol::message::{Request, Response};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const LEN_PREFIX: usize = 4;
const IO_CHUNK: usize = 64 * 1024;

/// Largest frame body the 4-byte length prefix can describe
pub const MAX_FRAME_LEN_LIMIT: usize = u32::MAX as usize;

/// Serialize `msg` into a single length-prefixed frame
pub fn encode_frame<T: Serialize>(msg: &T, max_frame_len: usize) -> Result<Bytes> {
    let body = serde_json::to_vec(msg)?;
    let too_large = || Error::FrameTooLarge {
        len: body.len(),
        max: max_frame_len.min(MAX_FRAME_LEN_LIMIT),
    };
    if body.len() > max_frame_len {
        return Err(too_large());
    }
    let len = u32::try_from(body.len()).map_err(|_| too_large())?;

    let mut frame = BytesMut::with_capacity(LEN_PREFIX + body.len());
    frame.put_u32(len);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

pub async fn write_frame<W, T>(
    writer: &mut W,
    msg: &T,
    max_frame_len: usize,
    idle: Option<Duration>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(msg, max_frame_len)?;
    write_payload(writer, &frame, idle).await
}

pub async fn read_frame<R, T>(reader: &mut R, max_frame_len: usize, idle: Option<Duration>) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; LEN_PREFIX];
    fill(reader, &mut header, idle).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_len {
        return Err(Error::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }

    let body = read_payload(reader, len as u64, idle).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Read exactly `len` raw bytes, however the peer happens to segment them.
///
/// Memory is committed in `IO_CHUNK` steps as data arrives, never up front
/// from the announced length.
pub async fn read_payload<R>(reader: &mut R, len: u64, idle: Option<Duration>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let expected = usize::try_from(len)
        .map_err(|_| Error::InvalidInput(format!("payload of {} bytes too large", len)))?;
    let mut buf = Vec::with_capacity(expected.min(IO_CHUNK));

    while buf.len() < expected {
        let start = buf.len();
        let want = (expected - start).min(IO_CHUNK);
        buf.resize(start + want, 0);

        let n = with_deadline(idle, "read payload", async {
            Ok(reader.read(&mut buf[start..]).await?)
        })
        .await?;
        buf.truncate(start + n);

        if n == 0 {
            return Err(Error::ShortRead {
                expected: len,
                received: start as u64,
            });
        }
    }
    Ok(buf)
}

/// Write `data` in `IO_CHUNK` pieces, each bounded by the idle timeout
pub async fn write_payload<W>(writer: &mut W, data: &[u8], idle: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for piece in data.chunks(IO_CHUNK) {
        with_deadline(idle, "write payload", async {
            Ok(writer.write_all(piece).await?)
        })
        .await?;
    }
    with_deadline(idle, "flush", async { Ok(writer.flush().await?) }).await
}

async fn fill<R>(reader: &mut R, buf: &mut [u8], idle: Option<Duration>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = with_deadline(idle, "read frame", async {
            Ok(reader.read(&mut buf[filled..]).await?)
        })
        .await?;
        if n == 0 {
            return Err(Error::ShortRead {
                expected: buf.len() as u64,
                received: filled as u64,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Bound `fut` by `timeout`, if one is configured
async fn with_deadline<F, T>(timeout: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(format!("{}: idle for {:?}", what, limit)))?,
        None => fut.await,
    }
}

/// One TCP connection carrying a single request/response exchange
pub struct Connection {
    stream: TcpStream,
    peer: String,
    max_frame_len: usize,
    timeout: Option<Duration>,
}

impl Connection {
    pub async fn connect(
        addr: &str,
        max_frame_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let stream = with_deadline(timeout, &format!("connect to {}", addr), async {
            TcpStream::connect(addr)
                .await
                .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))
        })
        .await?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            peer: addr.to_string(),
            max_frame_len,
            timeout,
        })
    }

    pub fn from_stream(stream: TcpStream, max_frame_len: usize, timeout: Option<Duration>) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            stream,
            peer,
            max_frame_len,
            timeout,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        write_frame(&mut self.stream, msg, self.max_frame_len, self.timeout).await
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T> {
        read_frame(&mut self.stream, self.max_frame_len, self.timeout).await
    }

    /// Send a request and wait for its response
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        self.recv().await
    }

    pub async fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        write_payload(&mut self.stream, data, self.timeout).await
    }

    pub async fn recv_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        read_payload(&mut self.stream, len, self.timeout).await
    }

    /// Half-close the write side; errors are ignored since the exchange is over
    pub async fn finish(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::NodeId;
    use tokio::io::duplex;

    const MAX: usize = 1 << 20;

    #[tokio::test]
    async fn test_frame_over_pipe() {
        let (mut a, mut b) = duplex(64);
        let nodes: Vec<NodeId> = (0..50).map(|i| NodeId::new("10.0.0.1", 9000 + i)).collect();
        let sent = Response::put_response(nodes);

        let expected = sent.clone();
        let writer = tokio::spawn(async move { write_frame(&mut a, &sent, MAX, None).await });
        let received: Response = read_frame(&mut b, MAX, None).await.unwrap();
        writer.await.unwrap().unwrap();

        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let frame = encode_frame(&Request::put("pajaro.jpg", 9001), 1024).unwrap();
        let mut reader = tokio_test::io::Builder::new()
            .read(&frame[..2])
            .read(&frame[2..7])
            .read(&frame[7..])
            .build();

        let request: Request = read_frame(&mut reader, 1024, None).await.unwrap();
        assert_eq!(request.file_info(), Some(("pajaro.jpg", 9001)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut header = Vec::new();
        header.extend_from_slice(&(10_000u32).to_be_bytes());
        let mut reader = &header[..];

        let result: Result<Request> = read_frame(&mut reader, 1024, None).await;
        assert!(matches!(
            result,
            Err(Error::FrameTooLarge { len: 10_000, max: 1024 })
        ));

        assert!(encode_frame(&Request::put("x".repeat(2000), 1), 1024).is_err());
    }

    #[tokio::test]
    async fn test_short_payload() {
        let data = vec![7u8; 100];
        let mut reader = &data[..];
        let err = read_payload(&mut reader, 150, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ShortRead {
                expected: 150,
                received: 100
            }
        ));
    }

    #[tokio::test]
    async fn test_huge_announced_payload_is_not_preallocated() {
        // 64 TiB announced, 100 bytes delivered: must fail cleanly, not abort
        let data = vec![7u8; 100];
        let mut reader = &data[..];
        let err = read_payload(&mut reader, 1u64 << 46, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ShortRead {
                expected,
                received: 100
            } if expected == 1u64 << 46
        ));
    }

    #[tokio::test]
    async fn test_payload_segmented() {
        let (mut a, mut b) = duplex(16);
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();

        let writer = tokio::spawn(async move {
            for piece in data.chunks(333) {
                a.write_all(piece).await.unwrap();
            }
        });

        let received = read_payload(&mut b, 5000, None).await.unwrap();
        writer.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_slow_payload_within_idle_timeout() {
        // 10 bytes over ~500ms, never idle for more than 50ms
        let (mut a, mut b) = duplex(16);
        let writer = tokio::spawn(async move {
            for i in 0..10u8 {
                a.write_all(&[i]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let received = read_payload(&mut b, 10, Some(Duration::from_millis(300)))
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(received, (0..10u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stalled_payload_times_out() {
        let (mut a, mut b) = duplex(16);
        a.write_all(&[1, 2, 3]).await.unwrap();

        let err = read_payload(&mut b, 10, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        drop(a);
    }
}
