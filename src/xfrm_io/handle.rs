// SPDX-License-Identifier: MIT

use futures::Stream;

use crate::xfrm_io::{policy::PolicyHandle, state::StateHandle, Error};
use netlink_packet_core::NetlinkMessage;
use netlink_packet_xfrm::XfrmMessage;
use netlink_proto::{sys::SocketAddr, ConnectionHandle};

/// A cloneable handle to an open XFRM netlink connection.
///
/// Mirrors the `rtnetlink`/`genetlink` family of crates: a thin wrapper
/// around `netlink_proto::ConnectionHandle` that turns its raw error type
/// into this crate's own [`Error`], and exposes sub-handles scoped to the
/// `policy` and `state` (SA) XFRM message families.
#[derive(Clone)]
pub struct Handle(ConnectionHandle<XfrmMessage>);

impl Handle {
    pub(crate) fn new(handle: ConnectionHandle<XfrmMessage>) -> Self {
        Handle(handle)
    }

    /// Submit a request and receive a stream of reply messages.
    pub fn request(
        &mut self,
        message: NetlinkMessage<XfrmMessage>,
    ) -> Result<impl Stream<Item = NetlinkMessage<XfrmMessage>>, Error> {
        self.0
            .request(message, SocketAddr::new(0, 0))
            .map_err(|_| Error::RequestFailed)
    }

    /// Entry point for `XFRM_MSG_*POLICY` requests.
    pub fn policy(&self) -> PolicyHandle {
        PolicyHandle::new(self.clone())
    }

    /// Entry point for `XFRM_MSG_*SA` / `XFRM_MSG_ALLOCSPI` requests.
    pub fn state(&self) -> StateHandle {
        StateHandle::new(self.clone())
    }
}
