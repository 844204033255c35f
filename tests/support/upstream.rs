use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use cellproxy::proxy::http::HttpMessage;

use super::read_message;

/// How the origin answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Vec<u8>),
    /// Sends the response after holding the connection for the given time.
    Delayed(Vec<u8>, StdDuration),
    /// Keeps the connection open without ever answering.
    Hang,
}

/// Origin server that answers the nth request with the nth scripted reply (the last one
/// repeats) and records every request it sees.
pub struct TestUpstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<HttpMessage>>>,
    handle: JoinHandle<()>,
}

struct Script {
    replies: Vec<Reply>,
    served: AtomicUsize,
    requests: Arc<Mutex<Vec<HttpMessage>>>,
}

impl Script {
    fn next_reply(&self) -> Reply {
        let n = self.served.fetch_add(1, Ordering::SeqCst);
        let idx = n.min(self.replies.len().saturating_sub(1));
        self.replies.get(idx).cloned().unwrap_or(Reply::Hang)
    }
}

impl TestUpstream {
    pub async fn scripted(responses: Vec<Vec<u8>>) -> Result<Self> {
        Self::replying(responses.into_iter().map(Reply::Respond).collect()).await
    }

    pub async fn replying(replies: Vec<Reply>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Script {
            replies,
            served: AtomicUsize::new(0),
            requests: requests.clone(),
        });
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let script = script.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, script).await;
                });
            }
        });
        Ok(Self {
            addr,
            requests,
            handle,
        })
    }

    pub async fn responding(response: impl Into<Vec<u8>>) -> Result<Self> {
        Self::scripted(vec![response.into()]).await
    }

    /// Origin that accepts requests and never answers them.
    pub async fn silent() -> Result<Self> {
        Self::replying(vec![Reply::Hang]).await
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `Host` header value naming this origin.
    pub fn authority(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    pub fn requests(&self) -> Vec<HttpMessage> {
        self.requests.lock().clone()
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, script: Arc<Script>) -> Result<()> {
    let request = read_message(&mut stream).await?;
    if request.is_empty() {
        return Ok(());
    }
    script.requests.lock().push(request);
    let response = match script.next_reply() {
        Reply::Respond(response) => response,
        Reply::Delayed(response, delay) => {
            tokio::time::sleep(delay).await;
            response
        }
        Reply::Hang => {
            std::future::pending::<()>().await;
            return Ok(());
        }
    };
    stream.write_all(&response).await?;
    stream.shutdown().await.ok();
    Ok(())
}
