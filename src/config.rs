//! Run configuration.

use std::path::Path;
use std::time::Duration;
use std::{fmt, fs};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::rdma::type_alias::*;

/// Which end of the connection this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens for the peer. Sends the greeting message.
    Server,
    /// Connects to the server. Posts its receive before RTR.
    Client,
}

/// Configuration of one peer.
///
/// Loaded once and never mutated afterwards. The selected device is reported
/// by [`ResourceSet::device_name`](crate::ResourceSet::device_name) rather
/// than written back here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IB device name. `None` selects the first device found.
    pub dev_name: Option<String>,
    /// Server host to connect to. `None` makes this peer the server.
    pub server_name: Option<String>,
    /// TCP port of the bootstrap channel.
    pub tcp_port: u16,
    /// Physical port of the IB device.
    pub ib_port: PortNum,
    /// GID index used in the GRH. Negative disables global routing.
    pub gid_idx: i32,
    /// How long a client keeps retrying a refused connection, in ms.
    pub connect_retry_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dev_name: None,
            server_name: None,
            tcp_port: Self::DEFAULT_TCP_PORT,
            ib_port: 1,
            gid_idx: 0,
            connect_retry_ms: 0,
        }
    }
}

impl Config {
    /// The default TCP port to use.
    pub const DEFAULT_TCP_PORT: u16 = 19875;

    /// Load a configuration from the `[rdmapair]` table of a TOML file.
    /// Missing keys take their default values.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let toml_str = fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;

        #[derive(Deserialize)]
        struct File {
            rdmapair: Option<Config>,
        }

        let file: File = toml::from_str(&toml_str)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let config = file.rdmapair.ok_or_else(|| {
            Error::InvalidConfig(format!(
                "rdmapair configuration not found in {}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), Error> {
        if self.ib_port == 0 {
            return Err(Error::InvalidConfig("IB port must be at least 1".to_owned()));
        }
        if self.gid_idx > GidIndex::MAX as i32 {
            return Err(Error::InvalidConfig(format!(
                "GID index {} is out of range",
                self.gid_idx
            )));
        }
        Ok(())
    }

    /// Get the role of this peer.
    pub fn role(&self) -> Role {
        match self.server_name {
            Some(_) => Role::Client,
            None => Role::Server,
        }
    }

    /// Get the GID index, or `None` if global routing is disabled.
    pub fn gid_index(&self) -> Option<GidIndex> {
        GidIndex::try_from(self.gid_idx).ok()
    }

    /// Get the connect retry window.
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " ------------------------------------------------")?;
        writeln!(
            f,
            " Device name : \"{}\"",
            self.dev_name.as_deref().unwrap_or("(first found)")
        )?;
        writeln!(f, " IB port : {}", self.ib_port)?;
        if let Some(server) = &self.server_name {
            writeln!(f, " IP : {}", server)?;
        }
        writeln!(f, " TCP port : {}", self.tcp_port)?;
        if let Some(gid_index) = self.gid_index() {
            writeln!(f, " GID index : {}", gid_index)?;
        }
        writeln!(f, " ------------------------------------------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_gid_index_disables_global_routing() {
        let cfg = Config {
            gid_idx: -1,
            ..Default::default()
        };
        assert_eq!(cfg.gid_index(), None);
        assert!(!cfg.to_string().contains("GID index"));
        assert_eq!(Config::default().gid_index(), Some(0));
    }

    #[test]
    fn role_follows_server_name() {
        let mut cfg = Config::default();
        assert_eq!(cfg.role(), Role::Server);
        cfg.server_name = Some("10.0.0.1".to_owned());
        assert_eq!(cfg.role(), Role::Client);
        assert!(cfg.to_string().contains(" IP : 10.0.0.1"));
    }

    #[test]
    fn load_toml_fills_defaults() {
        let path = std::env::temp_dir().join(format!("rdmapair-{}.toml", std::process::id()));
        fs::write(&path, "[rdmapair]\ndev_name = \"mlx5_0\"\ngid_idx = 3\n").unwrap();
        let cfg = Config::load_toml(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(cfg.dev_name.as_deref(), Some("mlx5_0"));
        assert_eq!(cfg.gid_idx, 3);
        assert_eq!(cfg.tcp_port, Config::DEFAULT_TCP_PORT);
        assert_eq!(cfg.ib_port, 1);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cfg = Config {
            ib_port: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        let cfg = Config {
            gid_idx: 256,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }
}
