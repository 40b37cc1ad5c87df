//! Mock executor: a test double that returns canned responses and
//! counts lifecycle calls.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::{Event, EventReceiver, Executor, SessionContext, EVENT_CHANNEL_CAPACITY};

/// Handler invoked by [`MockExecutor::send`] in place of the default
/// echo behavior.
pub type SendHandler = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<EventReceiver>> + Send>> + Send + Sync,
>;

/// In-memory executor for tests. The default `send` echoes the message
/// as a `Text` followed by a `Done`.
#[derive(Default)]
pub struct MockExecutor {
    alive: AtomicBool,
    started: AtomicUsize,
    stopped: AtomicUsize,
    handler: Option<SendHandler>,
}

impl MockExecutor {
    /// Create a mock with the default echo behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose `send` delegates to the given handler.
    #[must_use]
    pub fn with_handler(handler: SendHandler) -> Self {
        Self {
            handler: Some(handler),
            ..Self::default()
        }
    }

    /// Number of times `start` has been called.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of times `stop` has been called on a live executor.
    #[must_use]
    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn start(
        &self,
        _cancel: CancellationToken,
        _work_dir: &Path,
        _context: SessionContext,
    ) -> Result<()> {
        self.alive.store(true, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, _cancel: CancellationToken, message: &str) -> Result<EventReceiver> {
        if let Some(handler) = &self.handler {
            return handler(message.to_string()).await;
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let _ = tx.send(Event::Text(format!("echo: {message}"))).await;
        let _ = tx.send(Event::Done(format!("echo: {message}"))).await;
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
