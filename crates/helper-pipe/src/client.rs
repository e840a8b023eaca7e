//! Client for a privileged helper process.
//!
//! Flow:
//! 1. Launch the helper with stdin/stdout wired to pipes
//! 2. `call` any number of times; each call writes one frame and reads one
//! 3. `close` sends `stop`, waits for exit (killing on timeout) and releases
//!    both pipe ends
//!
//! Calls are serialized by an internal mutex, so a `Client` can be shared
//! between tasks without interleaving frames on the pipes.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bridge::codec::{self, FrameError};
use crate::bridge::protocol::{Request, Response};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::launcher::{self, ExecutableSpawner, HelperSpawner, Launched};

/// Lifecycle of a live client.
///
/// Closing and closed are not represented: [`Client::close`] consumes the
/// client, so no handle survives to observe them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Helper launched, no call issued yet.
    Created,
    /// At least one call issued. Failed calls keep the client here.
    Active,
    /// Pipes abandoned after a timeout, cancellation or a call dropped
    /// mid-exchange; only `close` is useful.
    Abandoned,
}

struct Pipes<W, R> {
    writer: W,
    reader: R,
}

/// Everything a call needs exclusive access to.
struct Channel<W, R> {
    pipes: Option<Pipes<W, R>>,
    buf: Box<[u8]>,
    state: ClientState,
    /// Set while a request is written but its response not yet read. Still
    /// set on entry means the previous call's future was dropped mid-exchange.
    in_flight: bool,
}

impl<W, R> Channel<W, R>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    async fn exchange(&mut self, request: &Request) -> Result<Response> {
        if self.in_flight {
            tracing::debug!(command = %request.command, "Previous call dropped mid-exchange, abandoning pipes");
            self.abandon();
        }
        let Some(pipes) = self.pipes.as_mut() else {
            return Err(Error::Closed {
                request: request.to_string(),
            });
        };
        if self.state == ClientState::Created {
            self.state = ClientState::Active;
        }

        let frame = codec::encode_frame(request, self.buf.len())
            .map_err(|e| Error::from_frame(request, e))?;

        self.in_flight = true;
        let result = round_trip(pipes, &mut self.buf, request, &frame).await;
        self.in_flight = false;
        result
    }

    fn state(&self) -> ClientState {
        if self.in_flight {
            ClientState::Abandoned
        } else {
            self.state
        }
    }

    /// Drop both pipe ends; the stream may hold a partial frame.
    fn abandon(&mut self) {
        self.pipes = None;
        self.in_flight = false;
        self.state = ClientState::Abandoned;
    }
}

/// Write one request frame and read one response frame.
async fn round_trip<W, R>(
    pipes: &mut Pipes<W, R>,
    buf: &mut [u8],
    request: &Request,
    frame: &[u8],
) -> Result<Response>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    tracing::trace!(command = %request.command, frame_len = frame.len(), "Writing request");
    codec::write_frame(&mut pipes.writer, frame)
        .await
        .map_err(|source| Error::Write {
            request: request.to_string(),
            source,
        })?;

    let response: Response = codec::read_frame(&mut pipes.reader, buf)
        .await
        .map_err(|e: FrameError| Error::from_frame(request, e))?;
    tracing::trace!(command = %request.command, status = ?response.status, "Response received");
    Ok(response)
}

/// Client owning a helper process and both pipe ends.
///
/// `W` and `R` default to the child's stdin/stdout; any async byte stream pair
/// works through [`Client::from_pipes`].
pub struct Client<W = ChildStdin, R = ChildStdout> {
    channel: Mutex<Channel<W, R>>,
    child: Option<Child>,
    config: ClientConfig,
}

impl Client {
    /// Launch the helper at `path` with the default configuration.
    pub async fn launch(path: impl AsRef<Path>) -> Result<Self> {
        Self::launch_with(&ExecutableSpawner::new(path), ClientConfig::default()).await
    }

    /// Launch through a custom spawner.
    pub async fn launch_with(spawner: &dyn HelperSpawner, config: ClientConfig) -> Result<Self> {
        let Launched {
            child,
            writer,
            reader,
        } = launcher::launch(spawner)?;

        let mut client = Self::from_pipes(writer, reader, config);
        client.child = Some(child);
        Ok(client)
    }

    /// OS process id of the helper, while it is running.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

impl<W, R> Client<W, R>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    /// Wrap an already-connected pipe pair with no process attached.
    pub fn from_pipes(writer: W, reader: R, config: ClientConfig) -> Self {
        Self {
            channel: Mutex::new(Channel {
                pipes: Some(Pipes { writer, reader }),
                buf: vec![0u8; config.capacity].into_boxed_slice(),
                state: ClientState::Created,
                in_flight: false,
            }),
            child: None,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn state(&self) -> ClientState {
        self.channel.lock().await.state()
    }

    /// Send one request and wait for its response.
    ///
    /// Applies the configured call timeout, if any.
    pub async fn call(&self, request: &Request) -> Result<Response> {
        match self.config.call_timeout {
            Some(timeout) => self.call_with_timeout(request, timeout).await,
            None => self.channel.lock().await.exchange(request).await,
        }
    }

    /// Send one request, abandoning the pipes if no response arrives in time.
    ///
    /// The deadline starts once this call holds the channel; time spent queued
    /// behind other calls is not counted.
    pub async fn call_with_timeout(&self, request: &Request, timeout: Duration) -> Result<Response> {
        let mut channel = self.channel.lock().await;
        let outcome = tokio::time::timeout(timeout, channel.exchange(request)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(command = %request.command, ?timeout, "Call timed out, abandoning pipes");
                channel.abandon();
                Err(Error::Timeout {
                    request: request.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Send one request, abandoning the pipes if `cancel` fires first.
    pub async fn call_cancellable(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let mut channel = self.channel.lock().await;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = channel.exchange(request) => Some(result),
        };
        match result {
            Some(result) => result,
            None => {
                tracing::debug!(command = %request.command, "Call cancelled, abandoning pipes");
                channel.abandon();
                Err(Error::Cancelled {
                    request: request.to_string(),
                })
            }
        }
    }

    /// Shut the helper down.
    ///
    /// Sends `stop` (bounded by the shutdown timeout), releases both pipe ends,
    /// then waits for the process to exit and kills it if it does not. The
    /// `stop` exchange's error takes precedence over a reaping error.
    pub async fn close(self) -> Result<()> {
        let Self {
            channel,
            child,
            config,
        } = self;
        let mut channel = channel.into_inner();
        let abandoned = channel.state() == ClientState::Abandoned;

        let stop = Request::stop();
        let stopped = if abandoned {
            Ok(())
        } else {
            match tokio::time::timeout(config.shutdown_timeout, channel.exchange(&stop)).await {
                Ok(result) => result.map(drop),
                Err(_) => Err(Error::Timeout {
                    request: stop.to_string(),
                    after: config.shutdown_timeout,
                }),
            }
        };
        if let Err(e) = &stopped {
            tracing::debug!(error = %e, "Stop exchange failed");
        }

        // Helper sees EOF on stdin from here on.
        drop(channel.pipes.take());

        let reaped = match child {
            Some(child) => reap(child, config.shutdown_timeout).await,
            None => Ok(()),
        };
        stopped.and(reaped)
    }
}

async fn reap(mut child: Child, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(%status, "Helper exited");
            Ok(())
        }
        Ok(Err(e)) => Err(Error::Shutdown(e)),
        Err(_) => {
            tracing::warn!(?timeout, pid = ?child.id(), "Helper did not exit, killing");
            child.kill().await.map_err(Error::Shutdown)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex, split};
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::bridge::codec::DEFAULT_CAPACITY;
    use crate::bridge::protocol::{Command, Status};
    use crate::helper::{self, Handler, ServeOutcome};
    use crate::test_support::{BrokenPipe, ScriptedReader};

    type MemClient = Client<WriteHalf<DuplexStream>, ReadHalf<DuplexStream>>;

    fn config() -> ClientConfig {
        ClientConfig::new()
            .without_call_timeout()
            .with_shutdown_timeout(Duration::from_secs(2))
    }

    fn echo(request: Request) -> Response {
        match request.command.as_str() {
            "echo" => Response::ok_with(request.payload),
            other => Response::err_input(format!("unknown command {other}")),
        }
    }

    /// Echo handler that records every command it is shown.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<Command>,
    }

    impl Handler for Recorder {
        fn handle(&mut self, request: Request) -> Response {
            self.seen.push(request.command.clone());
            echo(request)
        }

        fn stop(&mut self) {
            self.seen.push(Command::Stop);
        }
    }

    /// Client wired to an in-process helper running the echo handler.
    fn echo_pair() -> (MemClient, tokio::task::JoinHandle<(ServeOutcome, Vec<Command>)>) {
        let (client_io, helper_io) = duplex(1024);
        let (client_r, client_w) = split(client_io);
        let peer = tokio::spawn(async move {
            let (mut helper_r, helper_w) = split(helper_io);
            let mut recorder = Recorder::default();
            let outcome = helper::serve(&mut helper_r, helper_w, &mut recorder, DEFAULT_CAPACITY)
                .await
                .unwrap();

            // Nothing follows the stop exchange.
            let mut rest = Vec::new();
            helper_r.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());

            (outcome, recorder.seen)
        });
        (Client::from_pipes(client_w, client_r, config()), peer)
    }

    #[tokio::test]
    async fn ping_round_trips() {
        let (client, _peer) = echo_pair();
        assert_eq!(client.state().await, ClientState::Created);

        let resp = client
            .call(&Request::new("echo").with_payload("ping"))
            .await
            .unwrap();
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.payload, b"ping".to_vec());
        assert_eq!(client.state().await, ClientState::Active);
    }

    #[tokio::test]
    async fn sequential_calls_do_not_cross_talk() {
        let (client, _peer) = echo_pair();
        for i in 0..5 {
            let payload = format!("msg-{i}");
            let resp = client
                .call(&Request::new("echo").with_payload(payload.clone()))
                .await
                .unwrap();
            assert_eq!(resp.payload, payload.into_bytes());
        }
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        let (client, _peer) = echo_pair();
        let client = Arc::new(client);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                let payload = format!("task-{i}");
                let resp = client
                    .call(&Request::new("echo").with_payload(payload.clone()))
                    .await
                    .unwrap();
                assert_eq!(resp.payload, payload.into_bytes());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn close_sends_exactly_one_stop() {
        let (client, peer) = echo_pair();
        client
            .call(&Request::new("echo").with_payload("a"))
            .await
            .unwrap();
        client.close().await.unwrap();

        let (outcome, seen) = peer.await.unwrap();
        assert_eq!(outcome, ServeOutcome::Stopped);
        assert_eq!(seen, vec![Command::new("echo"), Command::Stop]);
    }

    #[tokio::test]
    async fn declared_9000_byte_response_overflows_without_body_read() {
        let reader = ScriptedReader::new([9000u32.to_le_bytes().to_vec(), vec![0u8; 9000]]);
        let reads = reader.read_counter();
        let client = Client::from_pipes(tokio::io::sink(), reader, config());

        let err = client.call(&Request::new("echo")).await.unwrap_err();
        match err {
            Error::BufferOverflow {
                declared,
                capacity,
                request,
            } => {
                assert_eq!(declared, 9000);
                assert_eq!(capacity, 256);
                assert_eq!(request, "command=echo");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_call_keeps_client_usable() {
        let first = Response::ok_with("second");
        let frame = codec::encode_frame(&first, DEFAULT_CAPACITY).unwrap().to_vec();
        let reader = ScriptedReader::new([
            vec![0x02, 0x00, 0x00, 0x00],
            b"{x".to_vec(),
            frame[..4].to_vec(),
            frame[4..].to_vec(),
        ]);
        let client = Client::from_pipes(tokio::io::sink(), reader, config());

        let err = client.call(&Request::new("echo")).await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert_eq!(err.raw(), b"{x");
        assert_eq!(client.state().await, ClientState::Active);

        let resp = client.call(&Request::new("echo")).await.unwrap();
        assert_eq!(resp.payload, b"second".to_vec());
    }

    #[tokio::test]
    async fn oversized_request_is_encode_error() {
        let (client, _peer) = echo_pair();
        let err = client
            .call(&Request::new("echo").with_payload(vec![7u8; 512]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Encode {
                source: FrameError::TooLarge { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn timeout_abandons_pipes() {
        // Helper end stays open but never answers.
        let (client_io, _helper_io) = duplex(1024);
        let (client_r, client_w) = split(client_io);
        let client = Client::from_pipes(client_w, client_r, config());

        let err = client
            .call_with_timeout(&Request::new("echo"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_closed());
        assert_eq!(client.state().await, ClientState::Abandoned);

        let err = client.call(&Request::new("echo")).await.unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn configured_timeout_applies_to_call() {
        let (client_io, _helper_io) = duplex(1024);
        let (client_r, client_w) = split(client_io);
        let client = Client::from_pipes(
            client_w,
            client_r,
            config().with_call_timeout(Duration::from_millis(20)),
        );

        let err = client.call(&Request::new("echo")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_abandons_pipes() {
        let (client_io, _helper_io) = duplex(1024);
        let (client_r, client_w) = split(client_io);
        let client = Client::from_pipes(client_w, client_r, config());

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = client
            .call_cancellable(&Request::new("echo"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(client.state().await, ClientState::Abandoned);
    }

    #[tokio::test]
    async fn close_reports_stop_exchange_error() {
        // Helper hung up: the stop frame gets no reply.
        let client = Client::from_pipes(tokio::io::sink(), tokio::io::empty(), config());
        let err = client.close().await.unwrap_err();
        match err {
            Error::Read { raw, request, .. } => {
                assert!(raw.is_empty());
                assert_eq!(request, "command=stop");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn dropped_call_does_not_leak_its_response() {
        // Echo peer that answers each request after a delay.
        let (client_io, helper_io) = duplex(1024);
        let (client_r, client_w) = split(client_io);
        tokio::spawn(async move {
            let (helper_r, mut helper_w) = split(helper_io);
            let mut frames = FramedRead::new(helper_r, codec::delimiter(DEFAULT_CAPACITY));
            while let Some(Ok(frame)) = frames.next().await {
                let request: Request = serde_json::from_slice(&frame).unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
                let out = codec::encode_frame(&Response::ok_with(request.payload), DEFAULT_CAPACITY)
                    .unwrap();
                if helper_w.write_all(&out).await.is_err() {
                    break;
                }
            }
        });
        let client = Client::from_pipes(client_w, client_r, config());

        let first = tokio::time::timeout(
            Duration::from_millis(20),
            client.call(&Request::new("echo").with_payload("first")),
        )
        .await;
        assert!(first.is_err());
        assert_eq!(client.state().await, ClientState::Abandoned);

        let err = client
            .call(&Request::new("echo").with_payload("second"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));
        assert_eq!(client.state().await, ClientState::Abandoned);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn broken_write_is_write_error() {
        let client = Client::from_pipes(BrokenPipe, tokio::io::empty(), config());

        let err = client
            .call(&Request::new("echo").with_payload("ping"))
            .await
            .unwrap_err();
        match &err {
            Error::Write { request, source } => {
                assert_eq!(request, "command=echo payload=70696e67");
                assert_eq!(source.kind(), std::io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_retriable());
        assert_eq!(client.state().await, ClientState::Active);
    }
}
