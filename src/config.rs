use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Args, Parser};

pub const DEFAULT_PORT: u16 = 8080;

/// Runtime configuration, read from flags or the matching environment variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "room_broadcast")]
#[command(about = "Room-scoped WebSocket broadcast server with password-authenticated admission")]
#[command(version)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to
    #[arg(short, long, env = "BIND_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// PEM certificate chain; enables WSS together with --tls-key
    #[arg(long, env = "TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    #[command(flatten)]
    pub kdf: KdfParams,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Argon2id cost parameters used to derive each room key.
#[derive(Args, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    #[arg(long = "kdf-memory-kib", env = "KDF_MEMORY_KIB", default_value_t = 64 * 1024)]
    pub memory_kib: u32,

    /// Number of passes
    #[arg(long = "kdf-time-cost", env = "KDF_TIME_COST", default_value_t = 1)]
    pub time_cost: u32,

    /// Degree of parallelism
    #[arg(long = "kdf-lanes", env = "KDF_LANES", default_value_t = 4)]
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfParams {
            memory_kib: 64 * 1024,
            time_cost: 1,
            lanes: 4,
        }
    }
}
