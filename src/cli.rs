//! Command line interface for the `wiregate` binary.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `wiregate` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wiregate",
    version,
    about = "MQTT-style gateway bridging clients to a message bus"
)]
pub struct Cli {
    /// Configuration file. Defaults to `./wiregate.toml` when present.
    #[arg(short, long, value_name = "PATH")]
    pub conf: Option<PathBuf>,

    /// Listen address, overriding `server.listen`.
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Log filter directive, overriding `log.level`.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}
