use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(name = "cellproxy", about = "Forwarding HTTP/1.x proxy with an on-disk cache")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./cellproxy.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen address, overriding the configuration file.
    #[arg(long)]
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// How many request/response cycles a client connection may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// One cycle, then the connection is closed.
    Single,
    /// Keep reading requests from the client until it disconnects.
    Persistent,
}
