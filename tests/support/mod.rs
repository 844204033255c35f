#![allow(dead_code)]

pub mod dirs;
pub mod harness;
pub mod net;
pub mod proxy_client;
pub mod upstream;

use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use cellproxy::proxy::http::HttpMessage;

pub use dirs::TestDirs;
pub use harness::{ProxyHarness, ProxyHarnessBuilder};
pub use net::find_free_port;
pub use proxy_client::ProxyClient;
pub use upstream::{Reply, TestUpstream};

pub const IO_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Reads one HTTP message, stopping as soon as it is complete or the peer closes.
pub async fn read_message<S>(stream: &mut S) -> Result<HttpMessage>
where
    S: AsyncRead + Unpin,
{
    let mut message = HttpMessage::default();
    let mut buf = [0u8; 4096];
    loop {
        let n = timeout(IO_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| anyhow!("timed out reading message"))??;
        if n == 0 {
            return Ok(message);
        }
        message.append(&buf[..n]);
        if message.is_complete() {
            return Ok(message);
        }
    }
}

/// Reads until the peer closes the connection.
pub async fn read_to_close<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    timeout(IO_TIMEOUT, stream.read_to_end(&mut buf))
        .await
        .map_err(|_| anyhow!("timed out waiting for close"))??;
    Ok(buf)
}

pub fn get_request(host: &str, path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nAccept: */*\r\n\r\n")
}

pub fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nLast-Modified: Sun, 06 Nov 1994 08:49:37 GMT\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

pub fn not_modified_response() -> Vec<u8> {
    b"HTTP/1.1 304 Not Modified\r\n\r\n".to_vec()
}
