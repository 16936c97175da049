use crate::config::Role;
use crate::ctrl::ConnectionParams;
use crate::error::Error;
use crate::rdma::qp::{Qp, Reset, Rts};
use crate::resources::ResourceSet;
use crate::verbs::Verbs;

/// Exchange connection parameters with the peer and bring the QP to RTS.
///
/// The client posts one receive before moving to RTR, so that the server's
/// first send always finds it. Returns the peer's parameters.
pub fn connect_qp<V: Verbs>(res: &mut ResourceSet<V>) -> Result<ConnectionParams, Error> {
    let pre_post = res.role() == Role::Client;
    connect_qp_with(res, pre_post)
}

/// Like [`connect_qp`], but the pre-RTR receive is posted only if
/// `pre_post_receive` is set, whatever the role.
pub fn connect_qp_with<V: Verbs>(
    res: &mut ResourceSet<V>,
    pre_post_receive: bool,
) -> Result<ConnectionParams, Error> {
    let local = res.local_params()?;

    let mut remote = [0; ConnectionParams::WIRE_SIZE];
    res.channel()
        .sync(&local.encode(), &mut remote)
        .inspect_err(|_| log::error!("failed to exchange connection data between sides"))?;
    let remote = ConnectionParams::decode(&remote);
    // Kept for one-sided operations later on.
    res.remote = Some(remote);

    log::info!("Remote address = {:#x}", remote.addr);
    log::info!("Remote rkey = {:#x}", remote.rkey);
    log::info!("Remote QP number = {:#x}", remote.qp_num);
    log::info!("Remote LID = {:#x}", remote.lid);
    if res.gid_index.is_some() {
        log::info!("Remote GID = {}", remote.gid);
    }

    let qp: Qp<'_, V, Reset> = res.qp()?;
    let mut qp = qp.modify_to_init()?;
    if pre_post_receive {
        qp.post_receive()?;
    }
    let qp: Qp<'_, V, Rts> = qp.modify_to_rtr(&remote)?.modify_to_rts()?;
    drop(qp);
    log::info!("QP state was changed to RTS");

    // Both sides are in RTS past this point.
    res.channel()
        .barrier()
        .inspect_err(|_| log::error!("sync error after QPs were moved to RTS"))?;
    Ok(remote)
}
