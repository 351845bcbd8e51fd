//! Bridges between async HTTP bodies and the blocking store

use axum::body::Body;
use bytes::{Buf, Bytes};
use futures_util::stream::{self, Stream, StreamExt};
use std::fs::File;
use std::io::{self, Read};
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Chunks buffered between the request body and the blocking reader
const CHANNEL_DEPTH: usize = 8;

/// Read size for streamed downloads
const CHUNK_SIZE: usize = 64 * 1024;

/// A blocking [`Read`] over a request body.
///
/// Must be read from a blocking thread (`spawn_blocking`). The body is not
/// polled at all until the first read, so a reader that is dropped unread
/// leaves the body untouched.
pub struct BodyReader {
    pending: Option<(Body, Handle)>,
    rx: Option<mpsc::Receiver<io::Result<Bytes>>>,
    current: Bytes,
}

impl BodyReader {
    /// Wrap a body. Must be called from within the runtime.
    pub fn new(body: Body) -> Self {
        BodyReader {
            pending: Some((body, Handle::current())),
            rx: None,
            current: Bytes::new(),
        }
    }

    fn start(&mut self) {
        if let Some((body, handle)) = self.pending.take() {
            let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
            handle.spawn(pump(body, tx));
            self.rx = Some(rx);
        }
    }
}

async fn pump(body: Body, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut chunks = body.into_data_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(io::Error::other);
        let failed = chunk.is_err();
        // receiver gone: the reader gave up
        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.start();
        while self.current.is_empty() {
            let Some(rx) = self.rx.as_mut() else {
                return Ok(0);
            };
            match rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

/// Stream a file as a response body
pub fn file_stream(file: File) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let file = tokio::fs::File::from_std(file);
    stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}
