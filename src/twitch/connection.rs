use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::{Result as TwitchResult, TwitchError};

/// IRCv3 tag section plus a 512-byte message.
pub const MAX_LINE_BYTES: usize = 8191 + 512;

pub trait ChatStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> ChatStream for T {}

pub type BoxedStream = Box<dyn ChatStream>;

/// Outcome of one bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Line(String),
    Timeout,
    Closed,
}

/// Opens transport streams to the chat service. One call per connect attempt.
pub trait Connector: Send + Sync {
    fn connect(&self) -> impl Future<Output = TwitchResult<IrcConnection>> + Send;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub addr: String,
    pub connect_timeout: Duration,
}

impl Connector for TcpConnector {
    async fn connect(&self) -> TwitchResult<IrcConnection> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TwitchError::ConnectTimeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        Ok(IrcConnection::new(Box::new(stream)))
    }
}

/// A single duplex stream to the chat service. Never reused after it closes.
pub struct IrcConnection {
    id: Uuid,
    reader: IrcReader,
    writer: IrcWriter,
}

impl IrcConnection {
    pub fn new(stream: BoxedStream) -> Self {
        let id = Uuid::new_v4();
        let closed = Arc::new(AtomicBool::new(false));
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            id,
            reader: IrcReader {
                id,
                inner: BufReader::new(read_half),
                pending: Vec::new(),
                closed: Arc::clone(&closed),
            },
            writer: IrcWriter {
                id,
                inner: Arc::new(Mutex::new(write_half)),
                closed,
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn send(&self, line: &str) -> TwitchResult<()> {
        self.writer.send(line).await
    }

    pub async fn receive(&mut self, timeout: Duration) -> TwitchResult<Received> {
        self.reader.receive(timeout).await
    }

    pub async fn close(&self) {
        self.writer.close().await;
    }

    /// Splits into the receive side, owned by one task, and a cloneable send side.
    #[cfg(test)]
    pub fn split(self) -> (IrcReader, IrcWriter) {
        (self.reader, self.writer)
    }

    pub fn parts_mut(&mut self) -> (&mut IrcReader, &IrcWriter) {
        (&mut self.reader, &self.writer)
    }
}

pub struct IrcReader {
    id: Uuid,
    inner: BufReader<ReadHalf<BoxedStream>>,
    pending: Vec<u8>,
    closed: Arc<AtomicBool>,
}

impl IrcReader {
    /// Waits up to `timeout` for one complete line.
    ///
    /// Bytes of an unfinished line stay buffered across timeouts. `Closed` is
    /// terminal: once reported, every later call reports it again. A line longer
    /// than [`MAX_LINE_BYTES`] is a transport fault.
    pub async fn receive(&mut self, timeout: Duration) -> TwitchResult<Received> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(Received::Closed);
        }
        let budget = (MAX_LINE_BYTES - self.pending.len()) as u64;
        let mut limited = (&mut self.inner).take(budget);
        match tokio::time::timeout(timeout, limited.read_until(b'\n', &mut self.pending)).await {
            Err(_) => Ok(Received::Timeout),
            Ok(Ok(0)) => {
                tracing::info!(connection.id = %self.id, "Connection closed by server (EOF)");
                self.closed.store(true, Ordering::Release);
                Ok(Received::Closed)
            }
            Ok(Ok(_)) if self.pending.last() == Some(&b'\n') => {
                let raw = std::mem::take(&mut self.pending);
                let line = String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                Ok(Received::Line(line))
            }
            Ok(Ok(_)) => {
                self.closed.store(true, Ordering::Release);
                if self.pending.len() >= MAX_LINE_BYTES {
                    tracing::warn!(
                        connection.id = %self.id,
                        limit = MAX_LINE_BYTES,
                        "Line from chat exceeds the length limit"
                    );
                    self.pending.clear();
                    return Err(TwitchError::LineTooLong(MAX_LINE_BYTES));
                }
                // EOF in the middle of a line.
                Ok(Received::Closed)
            }
            Ok(Err(e)) => {
                tracing::warn!(connection.id = %self.id, error = %e, "Error reading from chat");
                self.closed.store(true, Ordering::Release);
                Err(TwitchError::Io(e))
            }
        }
    }
}

/// Send side of a connection. Clones share one writer so whole lines never interleave.
#[derive(Clone)]
pub struct IrcWriter {
    id: Uuid,
    inner: Arc<Mutex<WriteHalf<BoxedStream>>>,
    closed: Arc<AtomicBool>,
}

impl IrcWriter {
    /// Writes `line` followed by CRLF.
    pub async fn send(&self, line: &str) -> TwitchResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TwitchError::ConnectionClosed);
        }
        let mut writer = self.inner.lock().await;
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(connection.id = %self.id, error = %e, "Error writing to chat");
            self.closed.store(true, Ordering::Release);
            return Err(TwitchError::Io(e));
        }
        Ok(())
    }

    pub async fn send_privmsg(&self, channel: &str, text: &str) -> TwitchResult<()> {
        self.send(&format!("PRIVMSG #{} :{}", channel, text)).await
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.inner.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(connection.id = %self.id, error = %e, "Error shutting down writer");
        }
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
