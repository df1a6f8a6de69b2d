//! Static Remote Connector
//!
//! Serves remote files from an in-process table keyed by host. Stands in for
//! an SSH transport in simulations and tests.

use crate::domain::ports::{RemoteConnector, RemoteSession, RemoteTarget};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct RemoteState {
    /// host -> path -> contents
    files: HashMap<String, HashMap<String, Vec<u8>>>,
    connect_failures: u32,
    fail_close: bool,
    connects: usize,
    closes: usize,
}

/// Remote connector backed by an in-memory file table
#[derive(Debug, Clone, Default)]
pub struct StaticRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl StaticRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`StaticRemote::put_file`]
    pub fn with_file(self, host: &str, path: &str, contents: impl AsRef<[u8]>) -> Self {
        self.put_file(host, path, contents);
        self
    }

    /// Store a file on a host, replacing any previous contents
    pub fn put_file(&self, host: &str, path: &str, contents: impl AsRef<[u8]>) {
        self.state
            .lock()
            .files
            .entry(host.to_string())
            .or_default()
            .insert(path.to_string(), contents.as_ref().to_vec());
    }

    /// Fail the next `count` connection attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Make every session close fail
    pub fn fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Connection attempts so far, failed ones included
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Sessions closed so far
    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

#[async_trait]
impl RemoteConnector for StaticRemote {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        let mut state = self.state.lock();
        state.connects += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(Error::remote(&target.host, "connect", "connection refused"));
        }
        if !state.files.contains_key(&target.host) {
            return Err(Error::remote(&target.host, "connect", "unknown host"));
        }

        debug!(host = %target.host, user = %target.user, port = target.port, "Opened remote session");
        Ok(Box::new(StaticSession {
            host: target.host.clone(),
            state: self.state.clone(),
        }))
    }
}

/// Session opened by [`StaticRemote`]
#[derive(Debug)]
pub struct StaticSession {
    host: String,
    state: Arc<Mutex<RemoteState>>,
}

#[async_trait]
impl RemoteSession for StaticSession {
    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let state = self.state.lock();
        state
            .files
            .get(&self.host)
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| Error::remote(&self.host, "read", format!("{}: no such file", path)))
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.closes += 1;
        if state.fail_close {
            return Err(Error::remote(&self.host, "close", "session close failed"));
        }
        Ok(())
    }
}
