use std::io;
use std::mem;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::trace;

use super::http::{HttpMessage, MessageError};
use super::upstream::{self, ConnectError};

const READ_CHUNK: usize = 16 * 1024;

/// Outcome of one [`Transport::receive`] call.
#[derive(Debug)]
pub enum ReadStatus {
    /// A full message was assembled.
    Complete,
    /// No more data is ready; the partial message stays buffered in the transport.
    WouldBlock,
    /// The peer closed its side. Whatever had been accumulated is returned.
    PeerClosed,
    Failed(io::Error),
    Malformed(MessageError),
}

#[derive(Debug)]
pub struct Received {
    pub status: ReadStatus,
    /// Bytes consumed from the socket during this call.
    pub bytes_read: usize,
    /// The assembled message for `Complete` and `PeerClosed`; empty otherwise.
    pub message: HttpMessage,
}

/// One side of a relayed connection: a socket plus the message being accumulated from it.
#[derive(Debug)]
pub struct Transport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    pending: HttpMessage,
    max_message_size: usize,
}

impl Transport {
    pub fn new(stream: TcpStream, peer: SocketAddr, max_message_size: usize) -> Self {
        Self {
            stream: Some(stream),
            peer,
            pending: HttpMessage::default(),
            max_message_size,
        }
    }

    /// Opens a connection to the origin named by a `Host` header value.
    pub async fn connect(
        authority: &str,
        default_port: u16,
        connect_timeout: Duration,
        max_message_size: usize,
    ) -> Result<Self, ConnectError> {
        let (stream, addr) =
            upstream::connect_authority(authority, default_port, connect_timeout).await?;
        Ok(Self::new(stream, addr, max_message_size))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Bytes accumulated towards the next message.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Reads whatever is ready without waiting, until the buffered message completes or the
    /// socket runs dry.
    pub fn receive(&mut self) -> Received {
        let Some(stream) = self.stream.as_ref() else {
            return self.finish(ReadStatus::PeerClosed, 0);
        };

        let mut buf = [0u8; READ_CHUNK];
        let mut bytes_read = 0;
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => return self.finish(ReadStatus::PeerClosed, bytes_read),
                Ok(n) => {
                    bytes_read += n;
                    self.pending.append(&buf[..n]);
                    if self.pending.len() > self.max_message_size {
                        let limit = self.max_message_size;
                        return self.finish(
                            ReadStatus::Malformed(MessageError::TooLarge { limit }),
                            bytes_read,
                        );
                    }
                    match self.pending.completion() {
                        Ok(true) => return self.finish(ReadStatus::Complete, bytes_read),
                        Ok(false) => continue,
                        Err(err) => return self.finish(ReadStatus::Malformed(err), bytes_read),
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Received {
                        status: ReadStatus::WouldBlock,
                        bytes_read,
                        message: HttpMessage::default(),
                    };
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return self.finish(ReadStatus::Failed(err), bytes_read),
            }
        }
    }

    fn finish(&mut self, status: ReadStatus, bytes_read: usize) -> Received {
        trace!(peer = %self.peer, ?status, bytes_read, "receive finished");
        Received {
            status,
            bytes_read,
            message: mem::take(&mut self.pending),
        }
    }

    /// Resolves once the socket has data (or an error) to report.
    pub async fn readable(&self) -> io::Result<()> {
        match self.stream.as_ref() {
            Some(stream) => stream.readable().await,
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Writes every byte, waiting for writability whenever the socket would block.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        stream.write_all(bytes).await?;
        stream.flush().await
    }

    /// Closes the socket. Later calls are no-ops.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            trace!(peer = %self.peer, "closing connection");
            drop(stream);
        }
        self.pending = HttpMessage::default();
    }
}
