//! Completion queue polling.

mod wc;

use std::time::Duration;

use quanta::Instant;

pub use self::wc::*;
use crate::error::Error;
use crate::verbs::Verbs;

/// How long [`poll_completion`] waits by default before giving up.
pub const MAX_POLL_CQ_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Busy-poll `cq` for a single work completion.
///
/// Returns the completion if its status is success. A polling failure, a
/// completion with any other status, and an empty queue after `timeout` are
/// all errors.
pub fn poll_completion<V: Verbs>(verbs: &V, cq: &V::Cq, timeout: Duration) -> Result<Wc, Error> {
    let start = Instant::now();
    let wc = loop {
        if let Some(wc) = verbs.poll_cq(cq).map_err(Error::PollCq)? {
            break wc;
        }
        if start.elapsed() >= timeout {
            log::error!("completion wasn't found in the CQ after timeout");
            return Err(Error::PollTimeout(timeout));
        }
    };

    if let Err(status) = wc.ok() {
        log::error!(
            "got bad completion with status: {:#x}, vendor syndrome: {:#x}",
            status.code(),
            wc.vendor_err()
        );
        return Err(Error::BadCompletion {
            status,
            vendor_err: wc.vendor_err(),
        });
    }

    log::debug!("completion was found in CQ with status {:#x}", wc.status().code());
    Ok(wc)
}
