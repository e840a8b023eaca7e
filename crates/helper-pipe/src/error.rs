//! Client error types.
//!
//! Every call failure carries the request it belongs to (in its compact
//! `Display` form) and, where the failure happened mid-read, the raw bytes
//! observed. Nothing is retried at this layer.

use std::io;
use std::time::Duration;

use crate::bridge::codec::FrameError;
use crate::bridge::protocol::{Request, hex};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of [`Error`] for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Launch,
    Encode,
    Write,
    /// Prefix or body read failed.
    Read,
    BufferOverflow,
    ShortBodyRead,
    Decode,
    Timeout,
    Cancelled,
    Closed,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pipe creation or process start failed.
    #[error("launch {helper}: {source}")]
    Launch {
        helper: String,
        #[source]
        source: io::Error,
    },

    /// The request could not be encoded into a frame.
    #[error("encode req={request}: {source}")]
    Encode {
        request: String,
        #[source]
        source: FrameError,
    },

    #[error("write req={request}: {source}")]
    Write {
        request: String,
        #[source]
        source: io::Error,
    },

    /// The length prefix did not arrive in full, or the pipe read failed.
    #[error("read len buf={} n={}/4 req={request}", hex(.raw), .raw.len())]
    Read {
        request: String,
        raw: Vec<u8>,
        #[source]
        source: Option<io::Error>,
    },

    /// The prefix arrived but the body read failed.
    #[error("read body len={expected} req={request}: {source}")]
    ReadBody {
        request: String,
        expected: usize,
        #[source]
        source: io::Error,
    },

    /// Declared response length does not fit the receive buffer.
    #[error("read buf overflow {declared}>{capacity} req={request}")]
    BufferOverflow {
        request: String,
        declared: usize,
        capacity: usize,
    },

    /// The body did not arrive in a single read.
    #[error("response did not fit in one read() len={expected} got={} req={request}", .raw.len())]
    ShortBodyRead {
        request: String,
        raw: Vec<u8>,
        expected: usize,
    },

    #[error("decode buf={} req={request}: {source}", hex(.raw))]
    Decode {
        request: String,
        raw: Vec<u8>,
        #[source]
        source: serde_json::Error,
    },

    /// The call deadline expired; both pipe ends were abandoned.
    #[error("timed out after {after:?} req={request}")]
    Timeout { request: String, after: Duration },

    /// The call was cancelled; both pipe ends were abandoned.
    #[error("cancelled req={request}")]
    Cancelled { request: String },

    /// The pipes were abandoned by an earlier timeout or cancellation.
    #[error("client closed req={request}")]
    Closed { request: String },

    /// Waiting for or killing the helper failed during close.
    #[error("shutdown: {0}")]
    Shutdown(#[source] io::Error),
}

impl Error {
    pub(crate) fn launch(helper: impl Into<String>, source: io::Error) -> Self {
        Self::Launch {
            helper: helper.into(),
            source,
        }
    }

    /// Attach the request to a framing failure.
    pub(crate) fn from_frame(request: &Request, err: FrameError) -> Self {
        let request = request.to_string();
        match err {
            FrameError::Encode(_) | FrameError::TooLarge { .. } => Self::Encode {
                request,
                source: err,
            },
            FrameError::Read { raw, source } => Self::Read {
                request,
                raw,
                source: Some(source),
            },
            FrameError::ReadBody { expected, source } => Self::ReadBody {
                request,
                expected,
                source,
            },
            FrameError::ShortPrefix { raw } => Self::Read {
                request,
                raw,
                source: None,
            },
            FrameError::Overflow { declared, capacity } => Self::BufferOverflow {
                request,
                declared,
                capacity,
            },
            FrameError::ShortBody { raw, expected } => Self::ShortBodyRead {
                request,
                raw,
                expected,
            },
            FrameError::Decode { raw, source } => Self::Decode {
                request,
                raw,
                source,
            },
            FrameError::Io(source) => Self::Read {
                request,
                raw: Vec::new(),
                source: Some(source),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Launch { .. } => ErrorKind::Launch,
            Self::Encode { .. } => ErrorKind::Encode,
            Self::Write { .. } => ErrorKind::Write,
            Self::Read { .. } | Self::ReadBody { .. } => ErrorKind::Read,
            Self::BufferOverflow { .. } => ErrorKind::BufferOverflow,
            Self::ShortBodyRead { .. } => ErrorKind::ShortBodyRead,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Closed { .. } => ErrorKind::Closed,
            Self::Shutdown(_) => ErrorKind::Shutdown,
        }
    }

    /// The pipes are still usable, so another call may succeed.
    ///
    /// True when the request never left the client or a complete response
    /// prefix was consumed. Pipe failures and abandoned clients are final.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Encode | ErrorKind::BufferOverflow | ErrorKind::Decode
        )
    }

    /// Compact form of the request this error belongs to, if any.
    pub fn request(&self) -> Option<&str> {
        match self {
            Self::Encode { request, .. }
            | Self::Write { request, .. }
            | Self::Read { request, .. }
            | Self::ReadBody { request, .. }
            | Self::BufferOverflow { request, .. }
            | Self::ShortBodyRead { request, .. }
            | Self::Decode { request, .. }
            | Self::Timeout { request, .. }
            | Self::Cancelled { request }
            | Self::Closed { request } => Some(request.as_str()),
            Self::Launch { .. } | Self::Shutdown(_) => None,
        }
    }

    /// Raw bytes read before the failure.
    pub fn raw(&self) -> &[u8] {
        match self {
            Self::Read { raw, .. } | Self::ShortBodyRead { raw, .. } | Self::Decode { raw, .. } => {
                raw
            }
            _ => &[],
        }
    }

    /// The client can no longer exchange frames and should be closed.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Cancelled { .. } | Self::Closed { .. }
        )
    }
}
