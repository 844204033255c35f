use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use cellproxy::proxy::http::HttpMessage;

use super::{read_message, read_to_close};

pub struct ProxyClient {
    stream: TcpStream,
}

impl ProxyClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    pub async fn send(&mut self, request: impl AsRef<[u8]>) -> Result<()> {
        self.stream.write_all(request.as_ref()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads a single framed response, leaving the connection open.
    pub async fn read_response(&mut self) -> Result<HttpMessage> {
        read_message(&mut self.stream).await
    }

    /// Reads everything the proxy sends until it closes the connection.
    pub async fn read_until_close(&mut self) -> Result<Vec<u8>> {
        read_to_close(&mut self.stream).await
    }

    /// Sends `request` and returns every byte received before the proxy hangs up.
    pub async fn exchange(mut self, request: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.send(request).await?;
        self.read_until_close().await
    }

    pub async fn shutdown(mut self) {
        self.stream.shutdown().await.ok();
    }
}
