use std::collections::HashMap;
use std::io;

use crate::error::Resource;
use crate::utils::interop::from_c_err;

/// Provider operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftOp {
    DeviceList,
    OpenDevice,
    CloseDevice,
    QueryPort,
    QueryGid,
    AllocPd,
    DeallocPd,
    CreateCq,
    DestroyCq,
    RegMr,
    DeregMr,
    CreateQp,
    DestroyQp,
    ModifyQp,
    PostSend,
    PostRecv,
    PollCq,
}

/// One entry of a host's resource log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Acquired(Resource),
    Released(Resource),
}

/// Number of live provider handles of one host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Live {
    pub contexts: usize,
    pub pds: usize,
    pub cqs: usize,
    pub mrs: usize,
    pub qps: usize,
}

impl Live {
    /// Return `true` if no handle is alive.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Per-host bookkeeping: the resource log and armed faults.
#[derive(Debug, Default)]
pub(super) struct Ledger {
    events: Vec<Event>,
    faults: HashMap<SoftOp, i32>,
}

impl Ledger {
    pub fn acquired(&mut self, resource: Resource) {
        self.events.push(Event::Acquired(resource));
    }

    pub fn released(&mut self, resource: Resource) {
        self.events.push(Event::Released(resource));
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn arm(&mut self, op: SoftOp, errno: i32) {
        self.faults.insert(op, errno);
    }

    /// Fire the fault armed for `op`, if any. Each fault fires once.
    pub fn check(&mut self, op: SoftOp) -> io::Result<()> {
        match self.faults.remove(&op) {
            Some(errno) => {
                log::debug!("injected fault on {:?}: errno {}", op, errno);
                from_c_err(errno)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_fire_once() {
        let mut ledger = Ledger::default();
        ledger.arm(SoftOp::AllocPd, libc::ENOMEM);
        assert_eq!(
            ledger.check(SoftOp::AllocPd).unwrap_err().raw_os_error(),
            Some(libc::ENOMEM)
        );
        assert!(ledger.check(SoftOp::AllocPd).is_ok());
        assert!(ledger.check(SoftOp::CreateCq).is_ok());
    }
}
