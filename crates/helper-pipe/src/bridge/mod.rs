//! Wire layer shared by the client and helpers.
//!
//! - **protocol**: Request/Response envelope and the reserved `stop` command
//! - **codec**: length-prefixed framing over AsyncRead/AsyncWrite (pipes, sockets, in-memory)

pub mod codec;
pub mod protocol;
