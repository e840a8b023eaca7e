//! Helper process launch.
//!
//! The helper gets a clean slate: no arguments, no environment, stdin and
//! stdout wired to fresh pipes, stderr inherited for diagnostics.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{Error, Result};

/// Extension point for different helper spawn strategies.
///
/// Implementations must pipe stdin and stdout; the launcher takes both ends.
pub trait HelperSpawner: Send + Sync {
    fn spawn(&self) -> io::Result<Child>;

    /// Name used in launch errors and logs.
    fn describe(&self) -> String {
        "helper".to_string()
    }
}

/// Spawns an executable with no arguments and an empty environment.
#[derive(Debug, Clone)]
pub struct ExecutableSpawner {
    path: PathBuf,
}

impl ExecutableSpawner {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HelperSpawner for ExecutableSpawner {
    fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.path)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A started helper with the client-side pipe ends.
#[derive(Debug)]
pub struct Launched {
    pub child: Child,
    /// Write end of the client→helper pipe.
    pub writer: ChildStdin,
    /// Read end of the helper→client pipe.
    pub reader: ChildStdout,
}

/// Start the helper and take both client-side pipe ends.
///
/// Must be called from within a tokio runtime.
pub fn launch(spawner: &dyn HelperSpawner) -> Result<Launched> {
    let helper = spawner.describe();
    tracing::debug!(%helper, "Spawning helper");

    let mut child = spawner
        .spawn()
        .map_err(|e| Error::launch(helper.as_str(), e))?;

    let writer = child
        .stdin
        .take()
        .ok_or_else(|| Error::launch(helper.as_str(), io::Error::other("stdin not captured")))?;
    let reader = child
        .stdout
        .take()
        .ok_or_else(|| Error::launch(helper.as_str(), io::Error::other("stdout not captured")))?;

    tracing::debug!(%helper, pid = ?child.id(), "Helper started");
    Ok(Launched {
        child,
        writer,
        reader,
    })
}
