// SPDX-License-Identifier: MIT

use futures::stream::StreamExt;

use crate::xfrm_io::macros::try_nl;
use crate::xfrm_io::{Error, Handle};
use netlink_packet_core::{NetlinkMessage, NLM_F_ACK, NLM_F_REQUEST};
use netlink_packet_xfrm::{policy::FlushPolicyMessage, XfrmMessage};

/// A request to flush every installed xfrm policy. Equivalent to `ip xfrm policy flush`.
#[non_exhaustive]
pub struct PolicyFlushRequest {
    handle: Handle,
    message: FlushPolicyMessage,
}

impl PolicyFlushRequest {
    pub(crate) fn new(handle: Handle) -> Self {
        PolicyFlushRequest {
            handle,
            message: FlushPolicyMessage::default(),
        }
    }

    /// Execute the request.
    pub async fn execute(self) -> Result<(), Error> {
        let PolicyFlushRequest {
            mut handle,
            message,
        } = self;

        let mut req = NetlinkMessage::from(XfrmMessage::FlushPolicy(message));
        req.header.flags = NLM_F_REQUEST | NLM_F_ACK;

        let mut response = handle.request(req)?;

        while let Some(message) = response.next().await {
            try_nl!(message);
        }
        Ok(())
    }

    pub fn message_mut(&mut self) -> &mut FlushPolicyMessage {
        &mut self.message
    }
}
