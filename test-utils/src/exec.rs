use bytes::{Bytes, BytesMut};
use hostshim::engine::{ExecFrame, FrameStream, RawStreamCodec, decode_raw};
use hostshim_shared::constants::control::CANCEL_BYTE;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;

use crate::TEST_TIMEOUT;

fn encode(frame: ExecFrame) -> Bytes {
    let mut buf = BytesMut::new();
    RawStreamCodec::new(false)
        .encode(frame, &mut buf)
        .expect("frame encodes");
    buf.freeze()
}

/// A stdout frame in daemon wire format.
pub fn stdout_frame(data: impl AsRef<[u8]>) -> Bytes {
    encode(ExecFrame::Stdout(Bytes::copy_from_slice(data.as_ref())))
}

/// A stderr frame in daemon wire format.
pub fn stderr_frame(data: impl AsRef<[u8]>) -> Bytes {
    encode(ExecFrame::Stderr(Bytes::copy_from_slice(data.as_ref())))
}

#[derive(Clone, Debug)]
enum ScriptChunk {
    Data(Bytes),
    Fail(String),
}

/// Canned output of a short exec, replayed each time a matching command runs.
#[derive(Clone, Debug)]
pub struct ExecScript {
    chunks: Vec<ScriptChunk>,
    exit_code: Option<i64>,
    tty: bool,
}

impl Default for ExecScript {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            exit_code: Some(0),
            tty: false,
        }
    }
}

impl ExecScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script printing `data` on stdout and exiting 0.
    pub fn ok(data: impl AsRef<[u8]>) -> Self {
        Self::new().stdout(data)
    }

    /// Script printing `message` on stderr and exiting 1.
    pub fn failing(message: impl AsRef<[u8]>) -> Self {
        Self::new().stderr(message).exit_code(1)
    }

    pub fn stdout(self, data: impl AsRef<[u8]>) -> Self {
        self.raw(stdout_frame(data))
    }

    pub fn stderr(self, data: impl AsRef<[u8]>) -> Self {
        self.raw(stderr_frame(data))
    }

    /// Append transport bytes exactly as given.
    pub fn raw(mut self, bytes: impl Into<Bytes>) -> Self {
        self.chunks.push(ScriptChunk::Data(bytes.into()));
        self
    }

    /// Append a transport failure.
    pub fn transport_error(mut self, message: impl Into<String>) -> Self {
        self.chunks.push(ScriptChunk::Fail(message.into()));
        self
    }

    pub fn exit_code(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Leave the exit code unknown, as for an exec still being reaped.
    pub fn unknown_exit_code(mut self) -> Self {
        self.exit_code = None;
        self
    }

    /// Treat the transport as an unframed TTY stream.
    pub fn tty(mut self) -> Self {
        self.tty = true;
        self
    }

    pub(crate) fn exit(&self) -> Option<i64> {
        self.exit_code
    }

    pub(crate) fn into_stream(self) -> FrameStream {
        let chunks: Vec<io::Result<Bytes>> = self
            .chunks
            .into_iter()
            .map(|chunk| match chunk {
                ScriptChunk::Data(data) => Ok(data),
                ScriptChunk::Fail(message) => {
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, message))
                }
            })
            .collect();
        decode_raw(futures::stream::iter(chunks), self.tty)
    }
}

/// Test side of a long-running exec.
///
/// Output pushed here reaches the library as daemon transport bytes; bytes the
/// library writes to the exec's stdin can be read back.
pub struct LiveExec {
    tty: bool,
    output_tx: Option<mpsc::UnboundedSender<io::Result<Bytes>>>,
    stdin: DuplexStream,
    exit_code: Arc<Mutex<Option<i64>>>,
}

/// Runtime side of a [`LiveExec`].
pub(crate) struct LiveParts {
    pub tty: bool,
    pub output_rx: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    pub stdin: DuplexStream,
    pub exit_code: Arc<Mutex<Option<i64>>>,
}

impl LiveParts {
    pub fn into_stream(self) -> (FrameStream, DuplexStream, Arc<Mutex<Option<i64>>>) {
        let mut rx = self.output_rx;
        let bytes = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
        (decode_raw(bytes, self.tty), self.stdin, self.exit_code)
    }
}

pub(crate) fn live_pair(tty: bool) -> (LiveExec, LiveParts) {
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let (test_side, runtime_side) = tokio::io::duplex(1024);
    let exit_code = Arc::new(Mutex::new(None));
    (
        LiveExec {
            tty,
            output_tx: Some(output_tx),
            stdin: test_side,
            exit_code: Arc::clone(&exit_code),
        },
        LiveParts {
            tty,
            output_rx,
            stdin: runtime_side,
            exit_code,
        },
    )
}

impl LiveExec {
    fn send(&self, chunk: io::Result<Bytes>) {
        if let Some(tx) = &self.output_tx {
            let _ = tx.send(chunk);
        }
    }

    /// Emit bytes on stdout. Under a TTY the bytes are sent unframed.
    pub fn stdout(&self, data: impl AsRef<[u8]>) {
        let chunk = if self.tty {
            Bytes::copy_from_slice(data.as_ref())
        } else {
            stdout_frame(data)
        };
        self.send(Ok(chunk));
    }

    /// Emit bytes on stderr.
    pub fn stderr(&self, data: impl AsRef<[u8]>) {
        self.send(Ok(stderr_frame(data)));
    }

    /// Emit arbitrary transport bytes.
    pub fn raw(&self, data: impl Into<Bytes>) {
        self.send(Ok(data.into()));
    }

    /// Break the transport.
    pub fn fail(&self, message: &str) {
        self.send(Err(io::Error::new(io::ErrorKind::BrokenPipe, message.to_string())));
    }

    /// End the output stream, as when the helper exits.
    pub fn finish(&mut self, exit_code: i64) {
        *self.exit_code.lock() = Some(exit_code);
        self.output_tx = None;
    }

    /// Read whatever arrives on stdin next. Empty on EOF or timeout.
    pub async fn read_stdin(&mut self) -> Vec<u8> {
        let mut buf = [0u8; 64];
        match tokio::time::timeout(TEST_TIMEOUT, self.stdin.read(&mut buf)).await {
            Ok(Ok(n)) => buf[..n].to_vec(),
            _ => Vec::new(),
        }
    }

    /// Wait until the cancel byte arrives on stdin.
    pub async fn expect_cancel(&mut self) -> bool {
        loop {
            let data = self.read_stdin().await;
            if data.is_empty() {
                return false;
            }
            if data.contains(&CANCEL_BYTE) {
                return true;
            }
        }
    }
}
