//! Exec stream demultiplexing.
//!
//! A non-TTY exec multiplexes stdout and stderr over one connection using the
//! runtime's raw-stream framing:
//!
//! ```text
//! +--------+---------+-----------------------+--------------+
//! | stream | 0, 0, 0 | payload length (BE32) | payload ...  |
//! +--------+---------+-----------------------+--------------+
//!   byte 0   1..=3     4..=7
//! ```
//!
//! Stream id 1 is stdout, 2 is stderr. A TTY exec is unframed: every byte is
//! console output.
//!
//! [`demux`] splits a frame stream into two logical half-streams.
//! [`RawStreamCodec`] turns raw transport bytes into frames.

use super::{ExecFrame, FrameStream};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use hostshim_shared::errors::{ShimError, ShimResult};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tokio_util::io::StreamReader;

const HEADER_LEN: usize = 8;

const STREAM_STDIN: u8 = 0;
const STREAM_STDOUT: u8 = 1;
const STREAM_STDERR: u8 = 2;

// ============================================================================
// Half-streams
// ============================================================================

/// One logical half (stdout or stderr) of a demultiplexed exec.
///
/// Yields chunks in arrival order. A transport failure appears as a single
/// `Err(ShimError::Stream)` item on the stderr half, after which both halves
/// end.
pub struct ExecOutput {
    receiver: mpsc::UnboundedReceiver<ShimResult<Bytes>>,
}

impl ExecOutput {
    fn new(receiver: mpsc::UnboundedReceiver<ShimResult<Bytes>>) -> Self {
        Self { receiver }
    }

    /// Read the half to its end and return all bytes.
    pub async fn collect_bytes(mut self) -> ShimResult<Vec<u8>> {
        let mut collected = Vec::new();
        while let Some(chunk) = self.receiver.recv().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected)
    }
}

impl Stream for ExecOutput {
    type Item = ShimResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Aborts the router task when dropped, releasing the exec transport.
pub struct RouterGuard {
    task: JoinHandle<()>,
}

impl Drop for RouterGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Output of [`demux`].
///
/// Keep `guard` alive for as long as the halves are read; dropping it closes
/// the underlying stream.
pub struct Demuxed {
    pub stdout: ExecOutput,
    pub stderr: ExecOutput,
    pub guard: RouterGuard,
}

/// Split an exec's frame stream into stdout and stderr half-streams.
///
/// Console (TTY) frames are routed to stdout. Must be called from within a
/// Tokio runtime.
pub fn demux(output: FrameStream) -> Demuxed {
    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(route_frames(output, stdout_tx, stderr_tx));

    Demuxed {
        stdout: ExecOutput::new(stdout_rx),
        stderr: ExecOutput::new(stderr_rx),
        guard: RouterGuard { task },
    }
}

async fn route_frames(
    mut output: FrameStream,
    stdout_tx: mpsc::UnboundedSender<ShimResult<Bytes>>,
    stderr_tx: mpsc::UnboundedSender<ShimResult<Bytes>>,
) {
    let mut frame_count = 0u64;
    while let Some(item) = output.next().await {
        match item {
            Ok(frame) => {
                frame_count += 1;
                match frame {
                    ExecFrame::Stdout(data) | ExecFrame::Console(data) => {
                        tracing::trace!(len = data.len(), "Exec stdout");
                        let _ = stdout_tx.send(Ok(data));
                    }
                    ExecFrame::Stderr(data) => {
                        tracing::trace!(len = data.len(), "Exec stderr");
                        let _ = stderr_tx.send(Ok(data));
                    }
                }
                if stdout_tx.is_closed() && stderr_tx.is_closed() {
                    tracing::debug!(frame_count, "Both exec halves dropped, closing stream");
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, frame_count, "Exec stream error, breaking");
                let err = match e {
                    ShimError::Stream(_) => e,
                    other => ShimError::Stream(other.to_string()),
                };
                let _ = stderr_tx.send(Err(err));
                return;
            }
        }
    }
    tracing::debug!(frame_count, "Exec stream ended");
}

// ============================================================================
// Raw transport codec
// ============================================================================

/// Codec for the runtime's raw exec transport.
///
/// In framed mode every item is one 8-byte-header frame. In TTY mode the
/// transport is unframed and each read becomes a console frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawStreamCodec {
    tty: bool,
}

impl RawStreamCodec {
    pub fn new(tty: bool) -> Self {
        Self { tty }
    }
}

impl Decoder for RawStreamCodec {
    type Item = ExecFrame;
    type Error = ShimError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.tty {
            if src.is_empty() {
                return Ok(None);
            }
            return Ok(Some(ExecFrame::Console(src.split().freeze())));
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let stream_id = src[0];
        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        match stream_id {
            STREAM_STDIN | STREAM_STDOUT => Ok(Some(ExecFrame::Stdout(payload))),
            STREAM_STDERR => Ok(Some(ExecFrame::Stderr(payload))),
            other => Err(ShimError::Stream(format!("unknown stream id {other}"))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ShimError::Stream(format!(
                "stream ended inside a frame ({} bytes pending)",
                src.len()
            ))),
        }
    }
}

impl Encoder<ExecFrame> for RawStreamCodec {
    type Error = ShimError;

    fn encode(&mut self, frame: ExecFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.tty {
            dst.extend_from_slice(frame.payload());
            return Ok(());
        }

        let stream_id = match frame {
            ExecFrame::Stdout(_) | ExecFrame::Console(_) => STREAM_STDOUT,
            ExecFrame::Stderr(_) => STREAM_STDERR,
        };
        let payload = frame.payload();
        let len = u32::try_from(payload.len())
            .map_err(|_| ShimError::InvalidArgument("frame payload exceeds 4 GiB".into()))?;
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u8(stream_id);
        dst.put_bytes(0, 3);
        dst.put_u32(len);
        dst.extend_from_slice(payload);
        Ok(())
    }
}

/// Decode a raw exec transport into a frame stream.
pub fn decode_raw<S>(bytes: S, tty: bool) -> FrameStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    FramedRead::new(StreamReader::new(bytes), RawStreamCodec::new(tty)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use proptest::prelude::*;

    fn encode(frames: &[ExecFrame]) -> Vec<u8> {
        let mut codec = RawStreamCodec::new(false);
        let mut buf = BytesMut::new();
        for frame in frames {
            codec.encode(frame.clone(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn decode_all(raw: &[u8]) -> ShimResult<Vec<ExecFrame>> {
        let mut codec = RawStreamCodec::new(false);
        let mut buf = BytesMut::from(raw);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode_eof(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    #[test]
    fn decodes_header_and_routes_by_stream_id() {
        let raw = [
            &[1u8, 0, 0, 0, 0, 0, 0, 5][..],
            b"hello",
            &[2u8, 0, 0, 0, 0, 0, 0, 4][..],
            b"oops",
        ]
        .concat();

        let frames = decode_all(&raw).unwrap();
        assert_eq!(
            frames,
            vec![
                ExecFrame::Stdout(Bytes::from_static(b"hello")),
                ExecFrame::Stderr(Bytes::from_static(b"oops")),
            ]
        );
    }

    #[test]
    fn waits_for_complete_frame() {
        let mut codec = RawStreamCodec::new(false);
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0, 0, 0, 0, 3, b'a'][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"bc");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(ExecFrame::Stdout(Bytes::from_static(b"abc")))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn truncated_frame_at_eof_is_an_error() {
        let err = decode_all(&[2u8, 0, 0, 0, 0, 0, 0, 9, b'x']).unwrap_err();
        assert!(matches!(err, ShimError::Stream(_)));
    }

    #[test]
    fn unknown_stream_id_is_an_error() {
        let err = decode_all(&[7u8, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(err.to_string().contains("unknown stream id 7"));
    }

    #[test]
    fn tty_mode_is_unframed() {
        let mut codec = RawStreamCodec::new(true);
        let mut buf = BytesMut::from(&b"\x01add active\r\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(ExecFrame::Console(Bytes::from_static(b"\x01add active\r\n")))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn demux_splits_halves() {
        let raw = encode(&[
            ExecFrame::Stdout(Bytes::from_static(b"out-1 ")),
            ExecFrame::Stderr(Bytes::from_static(b"err-1 ")),
            ExecFrame::Stdout(Bytes::from_static(b"out-2")),
            ExecFrame::Stderr(Bytes::from_static(b"err-2")),
        ]);
        let frames = decode_raw(stream::iter(vec![Ok(Bytes::from(raw))]), false);

        let Demuxed {
            stdout,
            stderr,
            guard: _guard,
        } = demux(frames);
        let (out, err) = tokio::join!(stdout.collect_bytes(), stderr.collect_bytes());
        assert_eq!(out.unwrap(), b"out-1 out-2");
        assert_eq!(err.unwrap(), b"err-1 err-2");
    }

    #[tokio::test]
    async fn demux_routes_console_to_stdout() {
        let frames = decode_raw(
            stream::iter(vec![Ok(Bytes::from_static(b"change active\r\n"))]),
            true,
        );
        let Demuxed {
            stdout,
            stderr,
            guard: _guard,
        } = demux(frames);
        assert_eq!(stdout.collect_bytes().await.unwrap(), b"change active\r\n");
        assert!(stderr.collect_bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_surfaces_on_stderr_half() {
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from(encode(&[ExecFrame::Stdout(Bytes::from_static(
                b"partial",
            ))]))),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let Demuxed {
            stdout,
            stderr,
            guard: _guard,
        } = demux(decode_raw(stream::iter(chunks), false));

        assert_eq!(stdout.collect_bytes().await.unwrap(), b"partial");
        let err = stderr.collect_bytes().await.unwrap_err();
        assert!(matches!(err, ShimError::Stream(_)));
    }

    proptest! {
        #[test]
        fn decoding_is_independent_of_chunk_boundaries(
            payloads in prop::collection::vec((any::<bool>(), prop::collection::vec(any::<u8>(), 0..64)), 0..8),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let frames: Vec<ExecFrame> = payloads
                .into_iter()
                .map(|(is_err, data)| {
                    if is_err {
                        ExecFrame::Stderr(Bytes::from(data))
                    } else {
                        ExecFrame::Stdout(Bytes::from(data))
                    }
                })
                .collect();
            let raw = encode(&frames);

            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(raw.len() + 1)).collect();
            offsets.sort_unstable();
            offsets.dedup();

            let mut codec = RawStreamCodec::new(false);
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            let mut start = 0;
            for end in offsets.into_iter().chain(std::iter::once(raw.len())) {
                buf.extend_from_slice(&raw[start..end]);
                start = end;
                while let Some(frame) = codec.decode(&mut buf).unwrap() {
                    decoded.push(frame);
                }
            }
            prop_assert!(buf.is_empty());
            prop_assert_eq!(decoded, frames);
        }
    }
}
