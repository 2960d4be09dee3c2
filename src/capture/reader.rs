//! Reader thread: pulls bytes from the session and feeds the decoder

use crate::decode::{DecodeAdapter, Decoder};
use crate::error::{Error, Result};
use crate::types::{FrameFormat, Resolution, StatsCounters};

use super::buffer::FrameBuffer;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Bytes requested per read call
pub const CHUNK_SIZE: usize = 64 * 1024;

const THREAD_NAME: &str = "adbblitz-reader";

/// Collapses `\r\n` into `\n` across chunk boundaries
///
/// A trailing `\r` is held back until the next chunk shows whether it starts
/// with `\n`.
#[derive(Debug, Default)]
pub struct CrlfNormalizer {
    pending_cr: bool,
}

impl CrlfNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the normalized form of `input` to `out`
    pub fn push(&mut self, input: &[u8], out: &mut Vec<u8>) {
        if input.is_empty() {
            return;
        }
        if std::mem::take(&mut self.pending_cr) && input[0] != b'\n' {
            out.push(b'\r');
        }

        let mut bytes = input.iter().copied().peekable();

        while let Some(b) = bytes.next() {
            if b == b'\r' {
                match bytes.peek() {
                    Some(b'\n') => continue,
                    Some(_) => out.push(b),
                    None => self.pending_cr = true,
                }
            } else {
                out.push(b);
            }
        }
    }

    /// Release a held-back `\r` at end of stream
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.push(b'\r');
        }
    }
}

/// One-shot flag telling the reader to stop pushing frames
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bytes collected since the last decode attempt
#[derive(Debug, Default)]
pub struct Accumulator {
    data: Vec<u8>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Raw access for the CRLF normalizer
    fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Reader thread settings
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Output frame size
    pub target: Resolution,
    /// Output pixel layout
    pub format: FrameFormat,
    /// Collapse `\r\n` pairs the Windows adb client introduces
    pub normalize_crlf: bool,
}

impl ReaderOptions {
    pub fn new(target: Resolution, format: FrameFormat) -> Self {
        Self {
            target,
            format,
            normalize_crlf: cfg!(windows),
        }
    }

    pub fn with_crlf_normalization(mut self, enabled: bool) -> Self {
        self.normalize_crlf = enabled;
        self
    }
}

/// Controller side of a running reader thread
#[derive(Debug)]
pub struct ReaderHandle {
    thread: JoinHandle<()>,
    cancel: CancelToken,
    exited: Receiver<()>,
}

impl ReaderHandle {
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Stop the reader from pushing any further frames
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait up to `timeout` for the thread to announce its exit
    pub fn wait_exit(&self, timeout: Duration) -> bool {
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Join if the thread exits within `timeout`, otherwise detach it
    ///
    /// Returns `true` when the thread was joined.
    pub fn join_or_detach(self, timeout: Duration) -> bool {
        if !self.wait_exit(timeout) {
            tracing::warn!("Reader thread still blocked after teardown, detaching it");
            return false;
        }
        if self.thread.join().is_err() {
            tracing::error!("Reader thread panicked");
        }
        true
    }
}

/// Spawner for the reader thread
pub struct StreamReader;

impl StreamReader {
    /// Start reading `stdout` on a dedicated thread
    ///
    /// The decoder is built by `factory` on the reader thread itself.
    pub fn spawn<R, D, F>(
        stdout: R,
        factory: F,
        buffer: Arc<FrameBuffer>,
        stats: Arc<StatsCounters>,
        options: ReaderOptions,
    ) -> Result<ReaderHandle>
    where
        R: Read + Send + 'static,
        D: Decoder + 'static,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let (exit_tx, exited) = crossbeam_channel::bounded(1);

        let token = cancel.clone();
        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                run(stdout, factory, &buffer, stats, options, &token);
                let _ = exit_tx.send(());
            })
            .map_err(|e| Error::Thread(format!("Failed to spawn reader thread: {}", e)))?;

        Ok(ReaderHandle {
            thread,
            cancel,
            exited,
        })
    }
}

fn run<R, D, F>(
    mut stdout: R,
    factory: F,
    buffer: &FrameBuffer,
    stats: Arc<StatsCounters>,
    options: ReaderOptions,
    cancel: &CancelToken,
) where
    R: Read,
    D: Decoder,
    F: FnOnce() -> Result<D>,
{
    let decoder = match factory() {
        Ok(decoder) => decoder,
        Err(e) => {
            tracing::error!("Failed to create decoder: {}", e);
            return;
        }
    };
    let mut adapter = DecodeAdapter::with_stats(decoder, options.target, options.format, Arc::clone(&stats));
    let mut normalizer = options.normalize_crlf.then(CrlfNormalizer::new);
    let mut accumulator = Accumulator::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    tracing::debug!("Reader thread started");

    loop {
        let n = match stdout.read(&mut chunk) {
            Ok(0) => {
                tracing::info!("Recording stream ended");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if !cancel.is_cancelled() {
                    tracing::error!("Failed to read recording stream: {}", e);
                }
                break;
            }
        };
        if cancel.is_cancelled() {
            break;
        }

        StatsCounters::add(&stats.bytes_read, n as u64);
        StatsCounters::add(&stats.chunks_read, 1);

        match normalizer.as_mut() {
            Some(normalizer) => normalizer.push(&chunk[..n], accumulator.buffer_mut()),
            None => accumulator.extend(&chunk[..n]),
        }

        for frame in adapter.feed(accumulator.as_slice()) {
            buffer.push(frame);
        }
        accumulator.clear();
    }

    if !cancel.is_cancelled() {
        if let Some(normalizer) = normalizer.as_mut() {
            normalizer.finish(accumulator.buffer_mut());
            if !accumulator.is_empty() {
                for frame in adapter.feed(accumulator.as_slice()) {
                    buffer.push(frame);
                }
            }
        }
        // The last access unit has no successor to close it
        for frame in adapter.finish() {
            buffer.push(frame);
        }
    }

    tracing::debug!(
        "Reader thread exiting after {} frames",
        stats.snapshot().frames_decoded
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testing::ByteDecoder;
    use std::io::Cursor;

    fn normalize(chunks: &[&[u8]]) -> Vec<u8> {
        let mut normalizer = CrlfNormalizer::new();
        let mut out = Vec::new();
        for chunk in chunks {
            normalizer.push(chunk, &mut out);
        }
        normalizer.finish(&mut out);
        out
    }

    #[test]
    fn test_crlf_collapsed() {
        assert_eq!(normalize(&[b"a\r\nb\r\n"]), b"a\nb\n");
        assert_eq!(normalize(&[b"\r\r\n"]), b"\r\n");
        assert_eq!(normalize(&[b"a\rb"]), b"a\rb");
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        assert_eq!(normalize(&[b"a\r", b"\nb"]), b"a\nb");
        assert_eq!(normalize(&[b"a\r", b"b"]), b"a\rb");
        assert_eq!(normalize(&[b"a\r", b"", b"\n"]), b"a\n");
        assert_eq!(normalize(&[b"a\r"]), b"a\r");
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_accumulator() {
        let mut acc = Accumulator::new();
        assert!(acc.is_empty());
        acc.extend(b"ab");
        acc.extend(b"c");
        assert_eq!(acc.as_slice(), b"abc");
        assert_eq!(acc.len(), 3);
        acc.clear();
        assert!(acc.is_empty());
    }

    fn run_reader(input: Vec<u8>, options: ReaderOptions) -> (Arc<FrameBuffer>, Arc<StatsCounters>) {
        run_reader_with(input, options, ByteDecoder::default)
    }

    fn run_reader_with(
        input: Vec<u8>,
        options: ReaderOptions,
        make: fn() -> ByteDecoder,
    ) -> (Arc<FrameBuffer>, Arc<StatsCounters>) {
        let buffer = Arc::new(FrameBuffer::new(8));
        let stats = Arc::new(StatsCounters::default());
        let handle = StreamReader::spawn(
            Cursor::new(input),
            move || Ok(make()),
            Arc::clone(&buffer),
            Arc::clone(&stats),
            options,
        )
        .unwrap();
        assert!(handle.join_or_detach(Duration::from_secs(5)));
        (buffer, stats)
    }

    #[test]
    fn test_reader_pushes_frames_in_order() {
        let options = ReaderOptions::new(Resolution::new(2, 2), FrameFormat::Bgr24)
            .with_crlf_normalization(false);
        let (buffer, stats) = run_reader(vec![1, 2, 0xEE, 3], options);

        let tags: Vec<u8> = buffer.snapshot().iter().map(|f| f.data[0]).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert_eq!(buffer.frame_count(), 3);

        let stats = stats.snapshot();
        assert_eq!(stats.bytes_read, 4);
        assert_eq!(stats.chunks_read, 1);
        assert_eq!(stats.decode_errors, 1);
    }

    #[test]
    fn test_reader_normalizes_crlf() {
        let options = ReaderOptions::new(Resolution::new(1, 1), FrameFormat::Rgb24)
            .with_crlf_normalization(true);
        let (buffer, _) = run_reader(vec![7, b'\r', b'\n', 8], options);

        let tags: Vec<u8> = buffer.snapshot().iter().map(|f| f.data[0]).collect();
        assert_eq!(tags, vec![7, b'\n', 8]);
    }

    #[test]
    fn test_reader_flushes_trailing_cr() {
        let options = ReaderOptions::new(Resolution::new(1, 1), FrameFormat::Rgb24)
            .with_crlf_normalization(true);
        let (buffer, _) = run_reader(vec![5, b'\r'], options);

        let tags: Vec<u8> = buffer.snapshot().iter().map(|f| f.data[0]).collect();
        assert_eq!(tags, vec![5, b'\r']);
    }

    #[test]
    fn test_reader_flushes_last_unit_at_eof() {
        let options = ReaderOptions::new(Resolution::new(1, 1), FrameFormat::Bgr24)
            .with_crlf_normalization(false);
        let (buffer, stats) = run_reader_with(vec![4, 5, 6], options, ByteDecoder::holding_last);

        let tags: Vec<u8> = buffer.snapshot().iter().map(|f| f.data[0]).collect();
        assert_eq!(tags, vec![4, 5, 6]);
        assert_eq!(stats.snapshot().frames_decoded, 3);
    }

    #[test]
    fn test_factory_failure_ends_thread() {
        let buffer = Arc::new(FrameBuffer::new(2));
        let handle = StreamReader::spawn(
            Cursor::new(vec![1, 2, 3]),
            || -> Result<ByteDecoder> { Err(Error::CodecNotSupported("none".into())) },
            Arc::clone(&buffer),
            Arc::new(StatsCounters::default()),
            ReaderOptions::new(Resolution::new(1, 1), FrameFormat::Bgr24),
        )
        .unwrap();
        assert!(handle.join_or_detach(Duration::from_secs(5)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_cancelled_reader_pushes_nothing() {
        struct Gate(Option<crossbeam_channel::Receiver<()>>, Cursor<Vec<u8>>);
        impl Read for Gate {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if let Some(gate) = self.0.take() {
                    let _ = gate.recv();
                }
                self.1.read(buf)
            }
        }

        let (open, gate) = crossbeam_channel::bounded(1);
        let buffer = Arc::new(FrameBuffer::new(2));
        let handle = StreamReader::spawn(
            Gate(Some(gate), Cursor::new(vec![1, 2, 3])),
            || Ok(ByteDecoder::default()),
            Arc::clone(&buffer),
            Arc::new(StatsCounters::default()),
            ReaderOptions::new(Resolution::new(1, 1), FrameFormat::Bgr24),
        )
        .unwrap();

        handle.cancel();
        assert!(handle.cancel_token().is_cancelled());
        open.send(()).unwrap();
        assert!(handle.join_or_detach(Duration::from_secs(5)));
        assert!(buffer.is_empty());
    }
}
