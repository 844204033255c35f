use std::net::Ipv4Addr;

use anyhow::Result;

/// A loopback port with nothing listening on it.
pub fn find_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
