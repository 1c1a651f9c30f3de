//! Long-running watch helper channel.
//!
//! The helper prints one `<keyword> <name>` line per file event on stdout and
//! exits when it reads the cancel byte on stdin. Lines are buffered across
//! chunks and dispatched once each.
//!
//! Shutdown is cooperative: `close()` flips the state to `Closing`, waits for
//! any in-flight listener to return, then queues the cancel byte. The stream
//! ends when the helper exits, at which point the state becomes `Closed`.

use crate::engine::{Demuxed, ExecInput, ExecSpec, RuntimeApi, demux};
use futures::StreamExt;
use hostshim_shared::constants::control::CANCEL_BYTE;
use hostshim_shared::errors::{ShimError, ShimResult};
use hostshim_shared::protocol::{FileEvent, FileEventKind};
use parking_lot::ReentrantMutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// Lifecycle of a [`WatchHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WatchState {
    /// Exec created, stream not yet attached.
    Starting = 0,
    /// Events are being dispatched.
    Running = 1,
    /// Cancel byte sent, waiting for the helper to exit. No more dispatch.
    Closing = 2,
    /// The stream ended.
    Closed = 3,
}

impl WatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WatchState::Starting,
            1 => WatchState::Running,
            2 => WatchState::Closing,
            _ => WatchState::Closed,
        }
    }

    fn is_open(self) -> bool {
        matches!(self, WatchState::Starting | WatchState::Running)
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchState::Starting => "starting",
            WatchState::Running => "running",
            WatchState::Closing => "closing",
            WatchState::Closed => "closed",
        };
        f.write_str(s)
    }
}

type NameListener = Box<dyn Fn(&str) + Send + Sync>;
type EventListener = Box<dyn Fn(&FileEvent) + Send + Sync>;

/// Callbacks invoked for watch events.
///
/// Name listeners receive the file name as printed by the helper. Listeners
/// run on a runtime worker thread and should return quickly.
#[derive(Default)]
pub struct WatchListeners {
    on_add: Option<NameListener>,
    on_unlink: Option<NameListener>,
    on_change: Option<NameListener>,
    on_event: Option<EventListener>,
}

impl WatchListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a file appears.
    pub fn on_add(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_add = Some(Box::new(f));
        self
    }

    /// Called when a file is removed.
    pub fn on_unlink(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_unlink = Some(Box::new(f));
        self
    }

    /// Called when a file's contents change.
    pub fn on_change(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Box::new(f));
        self
    }

    /// Called for every event, after the kind-specific listener.
    pub fn on_event(mut self, f: impl Fn(&FileEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Box::new(f));
        self
    }

    fn dispatch(&self, event: &FileEvent) {
        let listener = match event.kind {
            FileEventKind::Added => &self.on_add,
            FileEventKind::Removed => &self.on_unlink,
            FileEventKind::Changed => &self.on_change,
        };
        if let Some(listener) = listener {
            listener(&event.path);
        }
        if let Some(listener) = &self.on_event {
            listener(event);
        }
    }
}

impl fmt::Debug for WatchListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchListeners")
            .field("on_add", &self.on_add.is_some())
            .field("on_unlink", &self.on_unlink.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// State shared between the handle and the driver task.
struct WatchShared {
    exec_id: String,
    state: AtomicU8,
    /// Held while a listener runs. Reentrant so a listener may call `close()`.
    gate: ReentrantMutex<()>,
    stdin_tx: mpsc::UnboundedSender<Vec<u8>>,
    listeners: WatchListeners,
}

impl WatchShared {
    fn state(&self) -> WatchState {
        WatchState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WatchState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move an open watcher to `Closing` and queue the cancel byte.
    ///
    /// Returns `false` if the watcher was already closing or closed.
    fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !WatchState::from_u8(current).is_open() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                WatchState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        tracing::debug!(exec_id = %self.exec_id, "Sending cancel byte to watch helper");
        if self.stdin_tx.send(vec![CANCEL_BYTE]).is_err() {
            tracing::debug!(exec_id = %self.exec_id, "Watch stdin already closed");
        }
        true
    }

    fn dispatch_line(&self, line: &str) {
        let Some(event) = FileEvent::parse_line(line) else {
            if !line.trim().is_empty() {
                tracing::debug!(exec_id = %self.exec_id, line, "Ignoring unrecognized watch output");
            }
            return;
        };

        let _gate = self.gate.lock();
        if !self.state().is_open() {
            tracing::trace!(exec_id = %self.exec_id, %event, "Dropping event after close");
            return;
        }
        tracing::trace!(exec_id = %self.exec_id, %event, "Dispatching watch event");
        self.listeners.dispatch(&event);
    }
}

/// Opens watch execs inside the child.
#[derive(Clone)]
pub struct WatchChannel {
    runtime: Arc<dyn RuntimeApi>,
    container_id: String,
    tty: bool,
}

impl WatchChannel {
    /// `tty` runs the helper under a TTY; stderr then merges into stdout and
    /// only transport failures are reported as errors.
    pub fn new(runtime: Arc<dyn RuntimeApi>, container_id: impl Into<String>, tty: bool) -> Self {
        Self {
            runtime,
            container_id: container_id.into(),
            tty,
        }
    }

    /// Start `sh -c <command>` with stdin attached and dispatch its events to
    /// `listeners` until the returned handle is closed or the helper exits.
    pub async fn open(&self, command: &str, listeners: WatchListeners) -> ShimResult<WatchHandle> {
        let spec = ExecSpec::shell(command).with_stdin().with_tty(self.tty);
        let exec_id = self.runtime.exec_create(&self.container_id, &spec).await?;
        tracing::debug!(
            container_id = %self.container_id,
            exec_id = %exec_id,
            command,
            tty = self.tty,
            "Starting watch helper"
        );

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let shared = Arc::new(WatchShared {
            exec_id: exec_id.clone(),
            state: AtomicU8::new(WatchState::Starting as u8),
            gate: ReentrantMutex::new(()),
            stdin_tx,
            listeners,
        });

        let stream = self
            .runtime
            .exec_start(&exec_id, spec.start_options())
            .await?;
        let input = stream.input.ok_or_else(|| {
            ShimError::Internal(format!("watch exec {exec_id} started without stdin"))
        })?;

        spawn_stdin_pump(exec_id.clone(), input, stdin_rx);

        shared.set_state(WatchState::Running);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(drive(Arc::clone(&shared), demux(stream.output), done_tx));

        Ok(WatchHandle {
            shared,
            done: Some(done_rx),
        })
    }
}

/// A live watcher.
///
/// Dropping an open handle sends the cancel byte, like [`WatchHandle::close`].
pub struct WatchHandle {
    shared: Arc<WatchShared>,
    done: Option<oneshot::Receiver<ShimResult<()>>>,
}

impl WatchHandle {
    /// Ask the helper to exit.
    ///
    /// No listener runs after this returns. Safe to call more than once and
    /// from inside a listener.
    pub fn close(&self) {
        self.shared.cancel();
        // Wait out a listener running on another thread.
        drop(self.shared.gate.lock());
    }

    pub fn state(&self) -> WatchState {
        self.shared.state()
    }

    pub fn exec_id(&self) -> &str {
        &self.shared.exec_id
    }

    /// Wait for the helper to exit.
    ///
    /// Resolves `Ok(())` on a clean exit, [`ShimError::ExecFailed`] when the
    /// helper wrote to stderr, and [`ShimError::Stream`] on transport failure.
    /// Does not close the watcher by itself. Cancel safe: if the future is
    /// dropped early the outcome can still be awaited later, but only once.
    pub async fn wait(&mut self) -> ShimResult<()> {
        let Some(done) = self.done.as_mut() else {
            return Err(ShimError::Internal("watch outcome already taken".into()));
        };
        let outcome = done
            .await
            .unwrap_or_else(|_| Err(ShimError::Internal("watch task ended without a result".into())));
        self.done = None;
        outcome
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if self.shared.cancel() {
            tracing::debug!(exec_id = %self.shared.exec_id, "Watch handle dropped while open");
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("exec_id", &self.shared.exec_id)
            .field("state", &self.state())
            .finish()
    }
}

fn spawn_stdin_pump(exec_id: String, mut input: ExecInput, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = input.write_all(&data).await {
                tracing::debug!(exec_id = %exec_id, error = %e, "Watch stdin write failed");
                return;
            }
            if let Err(e) = input.flush().await {
                tracing::debug!(exec_id = %exec_id, error = %e, "Watch stdin flush failed");
                return;
            }
        }
        let _ = input.shutdown().await;
    });
}

async fn drive(
    shared: Arc<WatchShared>,
    demuxed: Demuxed,
    done_tx: oneshot::Sender<ShimResult<()>>,
) {
    let Demuxed {
        mut stdout,
        mut stderr,
        guard: _guard,
    } = demuxed;

    let mut lines = LineBuffer::default();
    let mut stderr_buf = Vec::new();
    let mut failure: Option<ShimError> = None;
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !(stdout_done && stderr_done) {
        tokio::select! {
            chunk = stdout.next(), if !stdout_done => match chunk {
                Some(Ok(data)) => {
                    for line in lines.push(&data) {
                        shared.dispatch_line(&line);
                    }
                }
                Some(Err(e)) => fail(&shared, &mut failure, e),
                None => {
                    stdout_done = true;
                    if let Some(line) = lines.finish() {
                        shared.dispatch_line(&line);
                    }
                }
            },
            chunk = stderr.next(), if !stderr_done => match chunk {
                Some(Ok(data)) => {
                    if stderr_buf.is_empty() {
                        tracing::error!(
                            exec_id = %shared.exec_id,
                            stderr = %String::from_utf8_lossy(&data).trim_end(),
                            "Watch helper reported an error"
                        );
                        shared.cancel();
                    }
                    stderr_buf.extend_from_slice(&data);
                }
                Some(Err(e)) => fail(&shared, &mut failure, e),
                None => stderr_done = true,
            },
        }
    }

    shared.set_state(WatchState::Closed);
    tracing::debug!(exec_id = %shared.exec_id, "Watch stream ended");

    let outcome = match failure {
        Some(e) => Err(e),
        None if !stderr_buf.is_empty() => Err(ShimError::ExecFailed {
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            exit_code: None,
        }),
        None => Ok(()),
    };
    let _ = done_tx.send(outcome);
}

fn fail(shared: &WatchShared, failure: &mut Option<ShimError>, err: ShimError) {
    tracing::error!(exec_id = %shared.exec_id, error = %err, "Watch stream failed");
    shared.cancel();
    failure.get_or_insert(err);
}

/// Reassembles newline-terminated lines from arbitrary chunks.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `data` and return every line it completed.
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..pos]));
        }
        lines
    }

    /// Take the unterminated tail, if any.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(decode_line(&line))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
