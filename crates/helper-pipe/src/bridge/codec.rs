//! Length-prefixed framing for helper pipes.
//!
//! Frame layout, identical in both directions:
//!
//! ```text
//! [u32 little-endian body length][serde_json body]
//! ```
//!
//! The client reads strictly: one read for the prefix and one read for the
//! body, with no reassembly. Helpers reassemble through [`delimiter`].

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Encoder, LengthDelimitedCodec};

use crate::bridge::protocol::hex;

/// Width of the fixed length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default receive capacity (prefix + body).
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("encode body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("frame too large {len}>{capacity}")]
    TooLarge { len: usize, capacity: usize },

    #[error("read buf={} n={}: {source}", hex(.raw), .raw.len())]
    Read {
        raw: Vec<u8>,
        #[source]
        source: io::Error,
    },

    /// The prefix arrived but reading the body failed.
    #[error("read body len={expected}: {source}")]
    ReadBody {
        expected: usize,
        #[source]
        source: io::Error,
    },

    /// Fewer than four prefix bytes arrived.
    #[error("read len buf={} n={}/4", hex(.raw), .raw.len())]
    ShortPrefix { raw: Vec<u8> },

    #[error("buf overflow {declared}>{capacity}")]
    Overflow { declared: usize, capacity: usize },

    /// The body did not arrive in a single read.
    #[error("response did not fit in one read() len={expected} got={}", .raw.len())]
    ShortBody { raw: Vec<u8>, expected: usize },

    #[error("decode buf={}: {source}", hex(.raw))]
    Decode {
        raw: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Peer closed its end before sending anything.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::ShortPrefix { raw } if raw.is_empty())
    }
}

/// Length-delimited codec matching the wire layout, capped at `capacity`.
pub fn delimiter(capacity: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_LEN)
        .little_endian()
        .max_frame_length(capacity.saturating_sub(LENGTH_PREFIX_LEN))
        .new_codec()
}

/// Encoder that serializes with serde_json and frames with a length prefix.
///
/// Rejects frames whose prefix + body would exceed the configured capacity so
/// both sides honor the same bound.
pub struct FrameCodec<T> {
    inner: LengthDelimitedCodec,
    capacity: usize,
    _phantom: PhantomData<T>,
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T> FrameCodec<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: delimiter(capacity),
            capacity,
            _phantom: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<'a, T: Serialize> Encoder<&'a T> for FrameCodec<T> {
    type Error = FrameError;

    fn encode(&mut self, item: &'a T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(item).map_err(FrameError::Encode)?;
        let len = LENGTH_PREFIX_LEN + body.len();
        if len > self.capacity {
            return Err(FrameError::TooLarge {
                len,
                capacity: self.capacity,
            });
        }
        tracing::trace!(body_len = body.len(), "Encoding frame");
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

/// Encode one message into a single contiguous frame.
pub fn encode_frame<T: Serialize>(item: &T, capacity: usize) -> Result<BytesMut, FrameError> {
    let mut dst = BytesMut::with_capacity(capacity);
    FrameCodec::<T>::new(capacity).encode(item, &mut dst)?;
    Ok(dst)
}

/// Issue exactly one write for `frame`, then flush.
///
/// A short write is reported rather than retried: frames are bounded well
/// below the pipe's atomic write size.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let n = writer.write(frame).await?;
    if n < frame.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write {}/{}", n, frame.len()),
        ));
    }
    writer.flush().await
}

/// Read one frame with exactly two reads and decode its body.
///
/// `buf.len()` is the receive capacity; a declared body that does not fit
/// behind the prefix is rejected before the second read.
pub async fn read_frame<R, T>(reader: &mut R, buf: &mut [u8]) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let capacity = buf.len();
    let (prefix, rest) = buf.split_at_mut(LENGTH_PREFIX_LEN);

    let n = reader
        .read(prefix)
        .await
        .map_err(|source| FrameError::Read {
            raw: Vec::new(),
            source,
        })?;
    if n < LENGTH_PREFIX_LEN {
        return Err(FrameError::ShortPrefix {
            raw: prefix[..n].to_vec(),
        });
    }

    let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if declared > rest.len() {
        return Err(FrameError::Overflow { declared, capacity });
    }

    let body = &mut rest[..declared];
    let n = if declared == 0 {
        0
    } else {
        reader
            .read(body)
            .await
            .map_err(|source| FrameError::ReadBody {
                expected: declared,
                source,
            })?
    };
    if n < declared {
        return Err(FrameError::ShortBody {
            raw: body[..n].to_vec(),
            expected: declared,
        });
    }
    tracing::trace!(body_len = declared, "Read frame");

    serde_json::from_slice(body).map_err(|source| FrameError::Decode {
        raw: body.to_vec(),
        source,
    })
}
