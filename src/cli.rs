//! Command line of the `rdmapair` binary.

use std::path::PathBuf;

use clap::Parser;
use rdmapair::{Config, Error};

/// Bring up an RC queue pair with a peer and exercise send, RDMA read and
/// RDMA write over it.
///
/// Without <HOST>, start a server and wait for a connection. With <HOST>,
/// connect to the server at <HOST>.
#[derive(Parser, Debug)]
#[command(name = "rdmapair", version)]
pub struct Cli {
    /// Server to connect to.
    host: Option<String>,

    /// Listen on/connect to TCP port <PORT> [default: 19875].
    #[arg(short, long)]
    port: Option<u16>,

    /// Use IB device <IB_DEV> [default: first device found].
    #[arg(short = 'd', long)]
    ib_dev: Option<String>,

    /// Use port <IB_PORT> of the IB device [default: 1].
    #[arg(short, long)]
    ib_port: Option<u8>,

    /// GID index to be used in GRH, negative to disable [default: 0].
    #[arg(short, long, allow_negative_numbers = true)]
    gid_idx: Option<i32>,

    /// Read settings from the [rdmapair] table of a TOML file. Command line
    /// options take precedence.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep retrying a refused connection for this many milliseconds.
    #[arg(long)]
    connect_retry_ms: Option<u64>,
}

impl Cli {
    /// Build the run configuration.
    pub fn into_config(self) -> Result<Config, Error> {
        let mut config = match &self.config {
            Some(path) => Config::load_toml(path)?,
            None => Config::default(),
        };

        if let Some(host) = self.host {
            config.server_name = Some(host);
        }
        if let Some(port) = self.port {
            config.tcp_port = port;
        }
        if let Some(dev) = self.ib_dev {
            config.dev_name = Some(dev);
        }
        if let Some(ib_port) = self.ib_port {
            config.ib_port = ib_port;
        }
        if let Some(gid_idx) = self.gid_idx {
            config.gid_idx = gid_idx;
        }
        if let Some(ms) = self.connect_retry_ms {
            config.connect_retry_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_defaults() {
        let cli = Cli::parse_from(["rdmapair", "-d", "mlx5_1", "-g", "-1", "-p", "18515", "node0"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.dev_name.as_deref(), Some("mlx5_1"));
        assert_eq!(config.gid_index(), None);
        assert_eq!(config.tcp_port, 18515);
        assert_eq!(config.server_name.as_deref(), Some("node0"));
        assert_eq!(config.ib_port, 1);
    }

    #[test]
    fn zero_ib_port_is_rejected() {
        let cli = Cli::parse_from(["rdmapair", "-i", "0"]);
        assert!(cli.into_config().is_err());
    }
}
