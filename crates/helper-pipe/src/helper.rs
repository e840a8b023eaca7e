//! Helper-side request loop.
//!
//! Reads request frames, dispatches them to a [`Handler`], and writes exactly
//! one response frame per request. Unlike the client, the helper reassembles
//! frames that arrive across several reads.
//!
//! - `invalid` is rejected with `err_input` without reaching the handler
//! - an undecodable body is answered with `err_input` and the loop continues
//! - `stop` is acknowledged with `ok`, then the loop returns
//! - EOF on input ends the loop

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{self, FrameCodec, FrameError};
use crate::bridge::protocol::{Command, Request, Response, hex};

/// Executes helper-defined commands.
pub trait Handler {
    fn handle(&mut self, request: Request) -> Response;

    /// Called once when `stop` arrives, before the acknowledgement is sent.
    fn stop(&mut self) {}
}

impl<F> Handler for F
where
    F: FnMut(Request) -> Response,
{
    fn handle(&mut self, request: Request) -> Response {
        self(request)
    }
}

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// A `stop` request was acknowledged.
    Stopped,
    /// The client closed its end of the pipe.
    Disconnected,
}

/// Serve requests until `stop` or EOF.
pub async fn serve<R, W, H>(
    reader: R,
    writer: W,
    handler: &mut H,
    capacity: usize,
) -> Result<ServeOutcome, FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let mut frames = FramedRead::new(reader, codec::delimiter(capacity));
    let mut responses = FramedWrite::new(writer, FrameCodec::<Response>::new(capacity));

    while let Some(frame) = frames.next().await {
        let frame = frame?;
        tracing::trace!(len = frame.len(), "Request frame received");

        let (response, stop) = match serde_json::from_slice::<Request>(&frame) {
            Ok(request) => dispatch(handler, request),
            Err(e) => {
                tracing::error!(error = %e, buf = %hex(&frame), "Request decode failed");
                (Response::err_input(e.to_string()), false)
            }
        };
        send(&mut responses, &response).await?;

        if stop {
            tracing::debug!("Stop acknowledged");
            return Ok(ServeOutcome::Stopped);
        }
    }

    tracing::debug!("Request pipe closed");
    Ok(ServeOutcome::Disconnected)
}

/// Serve on the process's own stdin/stdout.
///
/// The descriptors are duplicated into unbuffered files so every response
/// frame leaves in a single write.
#[cfg(unix)]
pub async fn serve_stdio<H>(handler: &mut H, capacity: usize) -> Result<ServeOutcome, FrameError>
where
    H: Handler + ?Sized,
{
    use std::os::fd::AsFd;

    let stdin = std::io::stdin().as_fd().try_clone_to_owned()?;
    let stdout = std::io::stdout().as_fd().try_clone_to_owned()?;
    let reader = tokio::fs::File::from_std(std::fs::File::from(stdin));
    let writer = tokio::fs::File::from_std(std::fs::File::from(stdout));

    serve(reader, writer, handler, capacity).await
}

fn dispatch<H: Handler + ?Sized>(handler: &mut H, request: Request) -> (Response, bool) {
    match request.command {
        Command::Invalid => (Response::err_input("invalid command"), false),
        Command::Stop => {
            handler.stop();
            (Response::ok(), true)
        }
        Command::Other(_) => (handler.handle(request), false),
    }
}

async fn send<W>(
    responses: &mut FramedWrite<W, FrameCodec<Response>>,
    response: &Response,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    match responses.send(response).await {
        Err(FrameError::TooLarge { len, capacity }) => {
            tracing::error!(len, capacity, "Response exceeds frame capacity");
            let replacement = Response::err_helper(format!("response too large {len}>{capacity}"));
            responses.send(&replacement).await
        }
        other => other,
    }
}
