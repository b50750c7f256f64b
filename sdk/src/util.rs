use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Error, Result};
use bytes::{Buf, Bytes};
use tokio::sync::mpsc;
use tokio::task::block_in_place;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::warn;

const BODY_CHUNK_LEN: usize = 8192;

const MAX_ATTEMPTS: u32 = 5;
const FIRST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Bridges a blocking reader into a stream of chunks for a request body.
///
/// Requires a multi-threaded runtime.
pub(crate) fn stream_body(
    mut source: impl Read + Send + 'static,
) -> impl Stream<Item = io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(5);
    tokio::spawn(async move {
        let mut buf = vec![0u8; BODY_CHUNK_LEN];
        loop {
            match block_in_place(|| source.read(&mut buf)) {
                Ok(0) => break, // end of input
                Ok(len) => {
                    if tx.send(Ok(Bytes::copy_from_slice(&buf[..len]))).await.is_err() {
                        break; // receiver closed
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
    });
    ReceiverStream::new(rx)
}

/// Blocking `Read` over a channel of downloaded chunks.
///
/// Must only be used from a blocking context such as `spawn_blocking`.
pub(crate) struct BodyReader {
    receiver: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl BodyReader {
    pub fn new(receiver: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            receiver,
            current: Bytes::new(),
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.receiver.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(err)) => return Err(err),
                None => return Ok(0),
            }
        }
        let len = buf.len().min(self.current.len());
        buf[..len].copy_from_slice(&self.current[..len]);
        self.current.advance(len);
        Ok(len)
    }
}

/// Cloneable handle over a reader, so an upload body can be rewound and
/// streamed again on retry.
pub(crate) struct SharedReader<F>(Arc<Mutex<F>>);

impl<F> SharedReader<F> {
    pub fn new(inner: F) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, F> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F> Clone for SharedReader<F> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<F: Read> Read for SharedReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock().read(buf)
    }
}

impl<F: Seek> Seek for SharedReader<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.lock().seek(pos)
    }
}

pub(crate) enum RequestError {
    Transport(Error),
    Application(Error),
}

impl RequestError {
    pub fn application(err: impl Into<Error>) -> Self {
        Self::Application(err.into())
    }

    pub fn transport(err: impl Into<Error>) -> Self {
        Self::Transport(err.into())
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Transport(err) | RequestError::Application(err) => err,
        }
    }
}

/// Retries the request if an error arises due to the transport, with the
/// delay doubling after each failed attempt.
pub(crate) async fn ok_or_retry<T, F, Fut>(mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 0u32;
    let mut delay = FIRST_RETRY_DELAY;
    loop {
        attempt += 1;
        let transport_err = match f().await {
            Ok(x) => break Ok(x),
            Err(RequestError::Application(err)) => break Err(err),
            Err(RequestError::Transport(err)) => err,
        };
        if attempt >= MAX_ATTEMPTS {
            break Err(transport_err);
        }
        warn!(error = %transport_err, attempt, "transport failed, will retry");
        sleep(delay).await;
        delay = delay.saturating_mul(2);
    }
}
