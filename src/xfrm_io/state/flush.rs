// SPDX-License-Identifier: MIT

use futures::stream::StreamExt;

use crate::xfrm_io::macros::try_nl;
use crate::xfrm_io::{Error, Handle};
use netlink_packet_core::{NetlinkMessage, NLM_F_ACK, NLM_F_REQUEST};
use netlink_packet_xfrm::{state::FlushSaMessage, XfrmMessage};

/// A request to flush every xfrm state. Equivalent to `ip xfrm state flush`.
#[non_exhaustive]
pub struct StateFlushRequest {
    handle: Handle,
    message: FlushSaMessage,
}

impl StateFlushRequest {
    pub(crate) fn new(handle: Handle) -> Self {
        StateFlushRequest {
            handle,
            message: FlushSaMessage::default(),
        }
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.message.proto = protocol;
        self
    }

    /// Execute the request.
    pub async fn execute(self) -> Result<(), Error> {
        let StateFlushRequest {
            mut handle,
            message,
        } = self;

        let mut req = NetlinkMessage::from(XfrmMessage::FlushSa(message));
        req.header.flags = NLM_F_REQUEST | NLM_F_ACK;

        let mut response = handle.request(req)?;

        while let Some(message) = response.next().await {
            try_nl!(message);
        }
        Ok(())
    }

    pub fn message_mut(&mut self) -> &mut FlushSaMessage {
        &mut self.message
    }
}
