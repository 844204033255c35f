use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use super::AppContext;
use super::backoff::Backoff;
use super::session::Session;

pub async fn start_listener(app: AppContext) -> Result<()> {
    let bind_addr = app.settings.listen;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;
    serve(listener, app).await
}

/// Accepts connections until the listener fails, spawning one session task per client.
pub async fn serve(listener: TcpListener, app: AppContext) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, relay_mode = ?app.settings.relay_mode, "proxy listener started");

    let mut backoff = Backoff::from_settings(&app.settings);
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => {
                backoff.reset();
                pair
            }
            Err(err) => {
                error!(error = %err, "failed to accept incoming connection");
                crate::metrics::record_accept_error();
                backoff.wait(std::future::pending::<()>()).await;
                continue;
            }
        };
        debug!(peer = %peer_addr, "accepted connection");
        crate::metrics::record_connection();
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %err, "failed to set TCP_NODELAY on client stream");
        }
        let connection_app = app.clone();
        tokio::spawn(async move {
            let _active = crate::metrics::ActiveSessionGuard::new();
            if let Err(err) = handle_connection(stream, peer_addr, connection_app).await {
                debug!(peer = %peer_addr, error = ?err, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, app: AppContext) -> Result<()> {
    Session::new(stream, peer, app).run().await
}
