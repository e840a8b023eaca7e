//! Blocking facade over [`crate::Client`].
//!
//! Owns a private current-thread runtime and drives every call to completion
//! on the calling thread. Must not be used from inside another tokio runtime.

use std::path::Path;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::bridge::protocol::{Request, Response};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::launcher::{ExecutableSpawner, HelperSpawner};

pub struct Client {
    inner: crate::Client,
    runtime: Runtime,
}

impl Client {
    pub fn launch(path: impl AsRef<Path>) -> Result<Self> {
        Self::launch_with(&ExecutableSpawner::new(path), ClientConfig::default())
    }

    pub fn launch_with(spawner: &dyn HelperSpawner, config: ClientConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::launch("runtime", e))?;
        let inner = runtime.block_on(crate::Client::launch_with(spawner, config))?;
        Ok(Self { inner, runtime })
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }

    pub fn call(&self, request: &Request) -> Result<Response> {
        self.runtime.block_on(self.inner.call(request))
    }

    pub fn call_with_timeout(&self, request: &Request, timeout: Duration) -> Result<Response> {
        self.runtime
            .block_on(self.inner.call_with_timeout(request, timeout))
    }

    pub fn close(self) -> Result<()> {
        let Self { inner, runtime } = self;
        runtime.block_on(inner.close())
    }
}
