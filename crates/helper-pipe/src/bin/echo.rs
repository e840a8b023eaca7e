//! Stub helper: answers `echo` with the request payload.
//!
//! Speaks the helper protocol on stdin/stdout and logs to stderr. Useful as
//! a template for real helpers and as the peer for integration tests.

use helper_pipe::helper::{self, ServeOutcome};
use helper_pipe::{DEFAULT_CAPACITY, Request, Response};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log level, since helpers are started with an empty environment this is
/// mostly for running the binary by hand.
const LOG_ENV: &str = "HELPER_PIPE_LOG";

fn init_tracing() {
    let level = match std::env::var(LOG_ENV).as_deref() {
        Ok("trace") => "trace",
        Ok("debug") => "debug",
        Ok("warn") | Ok("warning") => "warn",
        Ok("error") => "error",
        _ => "info",
    };
    let filter = EnvFilter::new(format!("helper_pipe={level},helper_pipe_echo={level}"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn echo(request: Request) -> Response {
    match request.command.as_str() {
        "echo" => Response::ok_with(request.payload),
        other => Response::err_input(format!("unknown command {other}")),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::debug!(pid = std::process::id(), "Echo helper starting");

    let mut handler = echo;
    match helper::serve_stdio(&mut handler, DEFAULT_CAPACITY).await? {
        ServeOutcome::Stopped => tracing::debug!("Stopped by client"),
        ServeOutcome::Disconnected => tracing::debug!("Client went away"),
    }
    Ok(())
}
