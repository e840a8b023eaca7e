//! helper-pipe: client for privileged helper subprocesses.
//!
//! A helper is an external executable that performs restricted work on the
//! caller's behalf. It is started with stdin/stdout bound to two pipes and
//! spoken to with one length-prefixed request frame per response frame.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   stdin: [len][request]   ┌──────────────────────┐
//! │ Client               │ ────────────────────────> │ helper process       │
//! │  launcher + codec    │                           │  helper::serve       │
//! │  one call at a time  │ <──────────────────────── │  + Handler           │
//! └──────────────────────┘   stdout: [len][response] └──────────────────────┘
//!                                                      stderr: inherited
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use helper_pipe::{Client, Request};
//!
//! let client = Client::launch("/usr/libexec/disk-helper").await?;
//! let resp = client.call(&Request::new("echo").with_payload("ping")).await?;
//! client.close().await?;
//! ```

pub mod blocking;
pub mod bridge;
mod client;
mod config;
mod error;
pub mod helper;
pub mod launcher;

#[cfg(test)]
mod test_support;

pub use bridge::codec::{DEFAULT_CAPACITY, FrameError};
pub use bridge::protocol::{Command, HelperError, Request, Response, Status};
pub use client::{Client, ClientState};
pub use config::{CALL_TIMEOUT_ENV, ClientConfig, SHUTDOWN_TIMEOUT_ENV};
pub use error::{Error, ErrorKind, Result};
pub use tokio_util::sync::CancellationToken;
