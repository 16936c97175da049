use std::fmt::{self, Display};

use crate::rdma::type_alias::*;

/// Attributes of one physical port, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAttr {
    /// Logical port state.
    pub state: PortState,

    /// Maximum MTU supported by this port.
    pub max_mtu: PortMtu,

    /// Currently active MTU.
    pub active_mtu: PortMtu,

    /// Base LID of this port. Zero on RoCE.
    pub lid: Lid,

    /// Link layer protocol.
    pub link_layer: PortLinkLayer,

    /// Length of the source GID table.
    pub gid_tbl_len: i32,
}

impl Display for PortAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}, lid {:#06x}, {:?}, mtu {} (max {})",
            self.state, self.lid, self.link_layer, self.active_mtu, self.max_mtu
        )
    }
}

/// Port state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Reserved value, not expected from a working device.
    Nop = 0,

    /// Logical link is down. The physical link of the port isn't up.
    /// All TX packets will be dropped, and RX is impossible.
    Down = 1,

    /// Logical link is Initializing.
    /// The physical link of the port is up, but the SM haven't yet configured the logical link.
    Init = 2,

    /// Logical link is Armed.
    /// The physical link of the port is up, but the SM haven't yet fully configured the logical link.
    Armed = 3,

    /// Logical link is Active.
    /// TX/RX all packets.
    Active = 4,

    /// Logical link is Active Deferred.
    /// The physical link of the port is suffering from a failure.
    ActiveDefer = 5,
}

impl From<u32> for PortState {
    fn from(state: u32) -> Self {
        match state {
            1 => Self::Down,
            2 => Self::Init,
            3 => Self::Armed,
            4 => Self::Active,
            5 => Self::ActiveDefer,
            _ => Self::Nop,
        }
    }
}

/// Port link layer protocol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortLinkLayer {
    /// Infiniband.
    Infiniband,

    /// Ethernet, i.e., RoCE.
    Ethernet,
}

/// Port MTU size.
///
/// Discriminants follow `enum ibv_mtu`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum PortMtu {
    /// 256 bytes.
    #[default]
    Mtu256 = 1,

    /// 512 bytes.
    Mtu512 = 2,

    /// 1024 bytes.
    Mtu1024 = 3,

    /// 2048 bytes.
    Mtu2048 = 4,

    /// 4096 bytes.
    Mtu4096 = 5,
}

impl PortMtu {
    /// Get the MTU size in bytes.
    #[inline]
    pub fn bytes(self) -> usize {
        128 << (self as u32)
    }
}

impl TryFrom<u32> for PortMtu {
    type Error = u32;

    fn try_from(mtu: u32) -> Result<Self, u32> {
        Ok(match mtu {
            1 => Self::Mtu256,
            2 => Self::Mtu512,
            3 => Self::Mtu1024,
            4 => Self::Mtu2048,
            5 => Self::Mtu4096,
            x => return Err(x),
        })
    }
}

impl Display for PortMtu {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_sizes() {
        assert_eq!(PortMtu::Mtu256.bytes(), 256);
        assert_eq!(PortMtu::Mtu4096.bytes(), 4096);
        assert_eq!(PortMtu::Mtu1024.to_string(), "1024B");
        assert_eq!(PortMtu::try_from(4), Ok(PortMtu::Mtu2048));
        assert!(PortMtu::try_from(0).is_err());
    }
}
