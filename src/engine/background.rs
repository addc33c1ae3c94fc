//! Background flush/compaction worker
//!
//! One thread fed by a channel. Tasks are idempotent, so duplicates are
//! harmless.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::{LogosError, Result};

use super::EngineInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackgroundTask {
    /// Flush every frozen memtable, then compact if needed
    Flush,
    Compact,
    Shutdown,
}

pub(crate) struct BackgroundWorker {
    sender: Sender<BackgroundTask>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn spawn(inner: Arc<EngineInner>) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let handle = thread::Builder::new()
            .name("logos-background".to_string())
            .spawn(move || run(inner, receiver))?;
        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    pub fn schedule(&self, task: BackgroundTask) -> Result<()> {
        self.sender.send(task).map_err(|_| LogosError::Closed)
    }

    /// Stop once the tasks already queued have run
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(BackgroundTask::Shutdown);
            if handle.join().is_err() {
                warn!("background worker panicked");
            }
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(inner: Arc<EngineInner>, receiver: Receiver<BackgroundTask>) {
    debug!("background worker started");
    for task in receiver.iter() {
        match task {
            BackgroundTask::Flush => {
                if let Err(e) = inner.flush_pending() {
                    warn!(error = %e, "background flush failed; will retry");
                    continue;
                }
                inner.maybe_compact();
            }
            BackgroundTask::Compact => inner.maybe_compact(),
            BackgroundTask::Shutdown => break,
        }
    }
    debug!("background worker stopped");
}
