//! Claude Code executor: spawns and manages a persistent `claude` CLI
//! subprocess speaking the stream-json protocol.
//!
//! One reader task owns stdout for the whole process lifetime and
//! dispatches decoded events into the current response slot. `send`
//! installs a fresh slot just before writing the user turn, so the
//! reader multiplexes a single stream into bounded per-turn channels.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::protocol::{self, LineAction};
use super::{Event, EventReceiver, Executor, SessionContext, EVENT_CHANNEL_CAPACITY};

/// Grace period between closing stdin and killing the process.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Maximum accepted stdout line length (the agent emits NDJSON lines up
/// to about a megabyte for large tool results).
const MAX_LINE_BYTES: usize = 1024 * 1024;

type BoxedStdin = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-handle fields, guarded together. Distinct from the response
/// slot lock so the reader can dispatch while `stop` manipulates the
/// process.
#[derive(Default)]
struct ProcHandles {
    child: Option<Child>,
    stdin: Option<BoxedStdin>,
    scope: Option<CancellationToken>,
}

/// State shared between the executor handle and its background tasks.
struct Shared {
    alive: AtomicBool,
    session_id: Mutex<Option<String>>,
    /// The single outstanding per-turn event channel, installed by
    /// `send` and cleared by the reader on end-of-turn or exit.
    slot: Mutex<Option<mpsc::Sender<Event>>>,
    proc: Mutex<ProcHandles>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            alive: AtomicBool::new(false),
            session_id: Mutex::new(None),
            slot: Mutex::new(None),
            proc: Mutex::new(ProcHandles::default()),
        }
    }
}

impl Shared {
    /// Forward an event to the current response channel, if any.
    async fn dispatch(&self, event: Event) {
        let tx = self.slot.lock().await.clone();
        if let Some(tx) = tx {
            if tx.send(event).await.is_err() {
                // Consumer dropped the receiver mid-turn.
                self.close_slot().await;
            }
        }
    }

    /// Drop the current response channel, closing it for the consumer.
    async fn close_slot(&self) {
        self.slot.lock().await.take();
    }
}

/// Executor for the Claude Code CLI.
pub struct ClaudeExecutor {
    model: String,
    binary: Option<PathBuf>,
    shared: Arc<Shared>,
}

impl ClaudeExecutor {
    /// Create a Claude Code executor for the given model.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            binary: None,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Create an executor with an explicit path to the `claude` binary,
    /// bypassing PATH discovery.
    #[must_use]
    pub fn with_binary(model: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            binary: Some(binary.into()),
            shared: Arc::new(Shared::default()),
        }
    }

    /// The agent-assigned session id, if the subprocess has announced one.
    pub async fn session_id(&self) -> Option<String> {
        self.shared.session_id.lock().await.clone()
    }

    /// Locate the Claude Code CLI binary.
    ///
    /// # Errors
    /// Returns [`Error::CliNotFound`] if the binary is not on PATH or in
    /// any of the common install locations.
    pub fn find_cli() -> Result<PathBuf> {
        if let Ok(path) = which::which("claude") {
            return Ok(path);
        }

        let home = env::var("HOME").unwrap_or_else(|_| String::from("/root"));
        let locations = [
            PathBuf::from(&home).join(".npm-global/bin/claude"),
            PathBuf::from("/usr/local/bin/claude"),
            PathBuf::from(&home).join(".local/bin/claude"),
            PathBuf::from(&home).join("node_modules/.bin/claude"),
            PathBuf::from(&home).join(".yarn/bin/claude"),
        ];

        for path in locations {
            if path.is_file() {
                return Ok(path);
            }
        }

        Err(Error::cli_not_found())
    }
}

#[async_trait]
impl Executor for ClaudeExecutor {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    async fn start(
        &self,
        cancel: CancellationToken,
        work_dir: &Path,
        context: SessionContext,
    ) -> Result<()> {
        let mut proc = self.shared.proc.lock().await;

        if self.alive() {
            return Err(Error::AlreadyRunning);
        }

        let binary = match &self.binary {
            Some(path) => path.clone(),
            None => Self::find_cli()?,
        };

        let mut cmd = Command::new(&binary);
        cmd.arg("--print")
            .arg("--input-format")
            .arg("stream-json")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--model")
            .arg(&self.model);

        if !context.is_empty() {
            cmd.arg("--append-system-prompt").arg(context.render());
        }

        cmd.current_dir(work_dir)
            .env("TERM", "dumb")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if !work_dir.exists() {
                return Error::spawn(format!(
                    "working directory does not exist: {}",
                    work_dir.display()
                ));
            }
            Error::spawn(format!("start {}: {e}", binary.display()))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::spawn("failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn("failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::spawn("failed to get stderr handle"))?;

        let scope = cancel.child_token();
        self.shared.alive.store(true, Ordering::SeqCst);

        // Drain stderr so the child never blocks on a full pipe.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("claude stderr: {line}");
            }
        });

        // The reader owns stdout for the lifetime of the process.
        tokio::spawn(read_loop(
            BufReader::new(stdout),
            Arc::clone(&self.shared),
        ));

        // Kill the child when the executor scope is cancelled, so a
        // service-wide shutdown cascades without an explicit stop().
        {
            let shared = Arc::clone(&self.shared);
            let scope = scope.clone();
            tokio::spawn(async move {
                scope.cancelled().await;
                if let Some(child) = shared.proc.lock().await.child.as_mut() {
                    let _ = child.start_kill();
                }
            });
        }

        proc.child = Some(child);
        proc.stdin = Some(Box::new(stdin));
        proc.scope = Some(scope);

        log::info!(
            "claude executor started (model {}, workdir {})",
            self.model,
            work_dir.display()
        );
        Ok(())
    }

    async fn send(&self, cancel: CancellationToken, message: &str) -> Result<EventReceiver> {
        if !self.alive() {
            return Err(Error::NotRunning);
        }

        let line = protocol::encode_user_turn(message)?;

        // Install the response channel before writing to stdin so the
        // reader can dispatch events immediately.
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.shared.slot.lock().await = Some(tx);

        {
            let mut proc = self.shared.proc.lock().await;
            let stdin = proc.stdin.as_mut().ok_or(Error::NotRunning)?;
            let write = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                self.shared.close_slot().await;
                return Err(Error::stdin(e.to_string()));
            }
        }

        // Per-turn forwarder: watches the caller's scope so cancellation
        // ends the turn without touching the subprocess.
        let (out_tx, out_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut turn_rx: EventReceiver = rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = turn_rx.recv() => match event {
                        Some(event) => {
                            if out_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    () = cancel.cancelled() => {
                        let _ = out_tx
                            .send(Event::Error(Error::cancelled("scope cancelled")))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(out_rx)
    }

    async fn stop(&self) -> Result<()> {
        let (child, stdin, scope) = {
            let mut proc = self.shared.proc.lock().await;
            (proc.child.take(), proc.stdin.take(), proc.scope.take())
        };

        if child.is_none() && !self.alive() {
            return Ok(());
        }

        // Dropping stdin closes the pipe and signals EOF to the child.
        drop(stdin);

        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    log::debug!("claude exited with {status}");
                }
                Ok(Err(e)) => {
                    self.shared.alive.store(false, Ordering::SeqCst);
                    return Err(Error::Io(e));
                }
                Err(_) => {
                    log::warn!("claude did not exit within grace period, killing");
                    let _ = child.kill().await;
                }
            }
        }

        self.shared.alive.store(false, Ordering::SeqCst);

        if let Some(scope) = scope {
            scope.cancel();
        }
        Ok(())
    }
}

/// Read NDJSON lines from the subprocess stdout and dispatch events to
/// the current response slot until EOF or a read error.
async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = String::new();
    loop {
        line.clear();
        // Cap the read itself so an oversized line never forces an
        // unbounded allocation; read_line stops at the limit and the
        // missing newline shows up as an overlong buffer.
        let mut capped = (&mut reader).take(MAX_LINE_BYTES as u64 + 1);
        match capped.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                // Line content at the cap with no newline in sight
                // means the capped read was cut off mid-line.
                if line.trim_end().len() > MAX_LINE_BYTES {
                    let err = std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "stdout line exceeded 1MiB",
                    );
                    shared.dispatch(Event::Error(Error::Io(err))).await;
                    break;
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match protocol::parse_line(trimmed) {
                    LineAction::SessionInit(id) => {
                        log::info!("claude session initialized: {id}");
                        *shared.session_id.lock().await = Some(id);
                    }
                    LineAction::Text(text) => shared.dispatch(Event::Text(text)).await,
                    LineAction::Done(text) => {
                        shared.dispatch(Event::Done(text)).await;
                        shared.close_slot().await;
                    }
                    LineAction::Ignore => {}
                }
            }
            Err(e) => {
                shared.dispatch(Event::Error(Error::Io(e))).await;
                break;
            }
        }
    }

    // Process exited: close any pending response channel.
    shared.close_slot().await;
    shared.alive.store(false, Ordering::SeqCst);
    log::info!("claude process exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_events(mut rx: EventReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        let deadline = Duration::from_secs(3);
        loop {
            match tokio::time::timeout(deadline, rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => return events,
                Err(_) => panic!("timed out waiting for events (got {})", events.len()),
            }
        }
    }

    #[tokio::test]
    async fn read_loop_full_conversation() {
        let shared = Arc::new(Shared::default());
        shared.alive.store(true, Ordering::SeqCst);

        let (mut feed, stdout) = tokio::io::duplex(4096);
        tokio::spawn(read_loop(BufReader::new(stdout), Arc::clone(&shared)));

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *shared.slot.lock().await = Some(tx);

        feed.write_all(
            b"{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"test-sess-1\"}\n",
        )
        .await
        .unwrap();
        feed.write_all(
            b"{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"Hello from Claude\"}]}}\n",
        )
        .await
        .unwrap();
        feed.write_all(
            b"{\"type\":\"result\",\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"Hello from Claude\"}]}}\n",
        )
        .await
        .unwrap();

        let events = collect_events(rx).await;
        assert_eq!(events.len(), 2, "events: {events:?}");
        assert!(matches!(&events[0], Event::Text(t) if t == "Hello from Claude"));
        assert!(matches!(&events[1], Event::Done(t) if t == "Hello from Claude"));

        assert_eq!(
            shared.session_id.lock().await.as_deref(),
            Some("test-sess-1")
        );
    }

    #[tokio::test]
    async fn read_loop_multi_turn_slot_swap() {
        let shared = Arc::new(Shared::default());
        shared.alive.store(true, Ordering::SeqCst);

        let (mut feed, stdout) = tokio::io::duplex(4096);
        tokio::spawn(read_loop(BufReader::new(stdout), Arc::clone(&shared)));

        let (tx1, rx1) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *shared.slot.lock().await = Some(tx1);
        feed.write_all(
            b"{\"type\":\"result\",\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"turn 1\"}]}}\n",
        )
        .await
        .unwrap();
        let events = collect_events(rx1).await;
        assert!(matches!(&events[0], Event::Done(t) if t == "turn 1"));

        let (tx2, rx2) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *shared.slot.lock().await = Some(tx2);
        feed.write_all(
            b"{\"type\":\"result\",\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"turn 2\"}]}}\n",
        )
        .await
        .unwrap();
        let events = collect_events(rx2).await;
        assert!(matches!(&events[0], Event::Done(t) if t == "turn 2"));
    }

    #[tokio::test]
    async fn read_loop_process_exit_closes_slot() {
        let shared = Arc::new(Shared::default());
        shared.alive.store(true, Ordering::SeqCst);

        let (feed, stdout) = tokio::io::duplex(4096);
        let reader = tokio::spawn(read_loop(BufReader::new(stdout), Arc::clone(&shared)));

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *shared.slot.lock().await = Some(tx);

        // Closing the pipe simulates process exit.
        drop(feed);
        reader.await.unwrap();

        let events = collect_events(rx).await;
        assert!(events.is_empty(), "expected closed channel, got {events:?}");
        assert!(!shared.alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn read_loop_oversized_line_is_a_reader_error() {
        let shared = Arc::new(Shared::default());
        shared.alive.store(true, Ordering::SeqCst);

        let (mut feed, stdout) = tokio::io::duplex(64 * 1024);
        let reader = tokio::spawn(read_loop(BufReader::new(stdout), Arc::clone(&shared)));

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *shared.slot.lock().await = Some(tx);

        // Feed a single line well past the cap. The reader drops its
        // end once the cap trips, so later writes may fail.
        let writer = tokio::spawn(async move {
            let chunk = vec![b'x'; 64 * 1024];
            for _ in 0..(MAX_LINE_BYTES / chunk.len() + 2) {
                if feed.write_all(&chunk).await.is_err() {
                    return;
                }
            }
            let _ = feed.write_all(b"\n").await;
        });

        let events = collect_events(rx).await;
        assert_eq!(events.len(), 1, "events: {events:?}");
        assert!(matches!(&events[0], Event::Error(Error::Io(_))));

        reader.await.unwrap();
        writer.await.unwrap();
        assert!(!shared.alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn send_writes_stream_json_line() {
        let exec = ClaudeExecutor::new("sonnet");
        exec.shared.alive.store(true, Ordering::SeqCst);

        let (stdin_pipe, stdin_read) = tokio::io::duplex(4096);
        exec.shared.proc.lock().await.stdin = Some(Box::new(stdin_pipe));

        let rx = exec
            .send(CancellationToken::new(), "What is 2+2?")
            .await
            .unwrap();

        let mut lines = BufReader::new(stdin_read).lines();
        let line = tokio::time::timeout(Duration::from_secs(3), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "user");
        assert_eq!(value["message"]["role"], "user");
        assert_eq!(value["message"]["content"], "What is 2+2?");

        // End the turn by clearing the slot; the forwarder closes.
        exec.shared.close_slot().await;
        let events = collect_events(rx).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn send_cancellation_emits_error() {
        let exec = ClaudeExecutor::new("sonnet");
        exec.shared.alive.store(true, Ordering::SeqCst);

        let (stdin_pipe, _stdin_read) = tokio::io::duplex(4096);
        exec.shared.proc.lock().await.stdin = Some(Box::new(stdin_pipe));

        let token = CancellationToken::new();
        let rx = exec.send(token.clone(), "hello").await.unwrap();

        token.cancel();
        let events = collect_events(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Error(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn send_requires_running_executor() {
        let exec = ClaudeExecutor::new("sonnet");
        let err = exec
            .send(CancellationToken::new(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotRunning));
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_never_started() {
        let exec = ClaudeExecutor::new("sonnet");
        exec.stop().await.unwrap();
        exec.stop().await.unwrap();
        assert!(!exec.alive());
    }
}
