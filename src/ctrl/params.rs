use std::fmt;

use crate::rdma::gid::Gid;
use crate::rdma::type_alias::*;

/// Everything a peer needs to connect its QP to ours and access our buffer.
///
/// On the wire this is a packed 34-byte record. Integers are big-endian and
/// the GID is carried verbatim.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnectionParams {
    /// Virtual address of the registered buffer.
    pub addr: u64,
    /// Remote key of the buffer's memory region.
    pub rkey: RKey,
    /// QP number.
    pub qp_num: Qpn,
    /// LID of the port.
    pub lid: Lid,
    /// GID, all zero when global routing is not in use.
    pub gid: Gid,
}

impl ConnectionParams {
    /// Size of the wire record.
    pub const WIRE_SIZE: usize = 34;

    /// Encode into the wire record.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0; Self::WIRE_SIZE];
        buf[0..8].copy_from_slice(&self.addr.to_be_bytes());
        buf[8..12].copy_from_slice(&self.rkey.to_be_bytes());
        buf[12..16].copy_from_slice(&self.qp_num.to_be_bytes());
        buf[16..18].copy_from_slice(&self.lid.to_be_bytes());
        buf[18..34].copy_from_slice(self.gid.as_bytes());
        buf
    }

    /// Decode a wire record.
    pub fn decode(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        let mut addr = [0; 8];
        let mut rkey = [0; 4];
        let mut qp_num = [0; 4];
        let mut lid = [0; 2];
        let mut gid = [0; 16];
        addr.copy_from_slice(&buf[0..8]);
        rkey.copy_from_slice(&buf[8..12]);
        qp_num.copy_from_slice(&buf[12..16]);
        lid.copy_from_slice(&buf[16..18]);
        gid.copy_from_slice(&buf[18..34]);

        Self {
            addr: u64::from_be_bytes(addr),
            rkey: u32::from_be_bytes(rkey),
            qp_num: u32::from_be_bytes(qp_num),
            lid: u16::from_be_bytes(lid),
            gid: Gid::from(gid),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("rkey", &format_args!("{:#x}", self.rkey))
            .field("qp_num", &format_args!("{:#x}", self.qp_num))
            .field("lid", &format_args!("{:#x}", self.lid))
            .field("gid", &format_args!("{}", self.gid))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout_is_packed_big_endian() {
        let params = ConnectionParams {
            addr: 0x0102_0304_0506_0708,
            rkey: 0x1112_1314,
            qp_num: 0x2122_2324,
            lid: 0x3132,
            gid: Gid::from([0xf0; 16]),
        };
        let wire = params.encode();
        assert_eq!(&wire[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&wire[8..12], &[0x11, 0x12, 0x13, 0x14]);
        assert_eq!(&wire[12..16], &[0x21, 0x22, 0x23, 0x24]);
        assert_eq!(&wire[16..18], &[0x31, 0x32]);
        assert_eq!(&wire[18..], &[0xf0; 16]);
        assert_eq!(ConnectionParams::decode(&wire), params);
    }
}
