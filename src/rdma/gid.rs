//! Device GID.

use std::fmt;
use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

/// An 128-bit identifier used to identify a port on a network adapter, a port
/// on a router, or a multicast group.
///
/// The bytes are kept verbatim in network order, exactly as the device
/// reports them and as they travel in the handshake record.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Gid([u8; 16]);

impl Gid {
    /// The all-zero GID, used when global routing is disabled.
    pub const ZERO: Self = Self([0; 16]);

    /// Return `true` if every byte of this GID is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Get the raw bytes of this GID.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for Gid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gid = Ipv6Addr::from(*self);
        f.debug_tuple("Gid").field(&gid.to_string()).finish()
    }
}

/// Colon-separated hex bytes, e.g. `fe:80:00:...:01`.
impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl From<[u8; 16]> for Gid {
    #[inline]
    fn from(raw: [u8; 16]) -> Self {
        Self(raw)
    }
}

impl From<Gid> for [u8; 16] {
    #[inline]
    fn from(gid: Gid) -> Self {
        gid.0
    }
}

impl From<Ipv6Addr> for Gid {
    #[inline]
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr.octets())
    }
}

impl From<Gid> for Ipv6Addr {
    #[inline]
    fn from(gid: Gid) -> Self {
        Ipv6Addr::from(gid.0)
    }
}

#[cfg(feature = "ibverbs")]
mod ibv {
    use super::Gid;
    use crate::bindings::ibv_gid;

    impl From<ibv_gid> for Gid {
        #[inline]
        fn from(gid: ibv_gid) -> Self {
            // SAFETY: byte-level reinterpretation of POD union.
            Self(unsafe { gid.raw })
        }
    }

    impl From<Gid> for ibv_gid {
        #[inline]
        fn from(gid: Gid) -> Self {
            ibv_gid { raw: gid.0 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_colon_hex() {
        let mut raw = [0u8; 16];
        raw[0] = 0xfe;
        raw[1] = 0x80;
        raw[15] = 0x01;
        assert_eq!(
            Gid::from(raw).to_string(),
            "fe:80:00:00:00:00:00:00:00:00:00:00:00:00:00:01"
        );
    }

    #[test]
    fn ipv6_conversion_keeps_bytes() {
        let addr: Ipv6Addr = "::ffff:192.168.1.7".parse().unwrap();
        let gid = Gid::from(addr);
        assert_eq!(Ipv6Addr::from(gid), addr);
        assert!(!gid.is_zero());
        assert!(Gid::ZERO.is_zero());
    }
}
