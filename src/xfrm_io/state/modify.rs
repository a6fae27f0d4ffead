// SPDX-License-Identifier: MIT

use futures::stream::StreamExt;
use std::net::IpAddr;

use crate::xfrm_io::macros::try_nl;
use crate::xfrm_io::{Error, Handle};
use netlink_packet_core::{NetlinkMessage, NLM_F_ACK, NLM_F_REQUEST};
use netlink_packet_xfrm::{
    state::{Algo, AlgoAead, AlgoAuth, EncapTmpl, ModifyMessage, ReplayEsn},
    Address, Mark, XfrmAttrs, XfrmMessage,
};

/// A request to add or update xfrm state. Equivalent to `ip xfrm state add|update`.
#[non_exhaustive]
pub struct StateModifyRequest {
    handle: Handle,
    message: ModifyMessage,
    update: bool,
}

impl StateModifyRequest {
    pub(crate) fn new(handle: Handle, update: bool, src_addr: IpAddr, dst_addr: IpAddr) -> Self {
        let mut message = ModifyMessage::default();

        message.info.source(&src_addr);
        message.info.destination(&dst_addr);

        StateModifyRequest {
            handle,
            message,
            update,
        }
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.message.info.id.proto = protocol;
        self
    }
    pub fn spi(mut self, spi: u32) -> Self {
        self.message.info.id.spi = spi;
        self
    }
    pub fn mode(mut self, mode: u8) -> Self {
        self.message.info.mode = mode;
        self
    }
    pub fn reqid(mut self, reqid: u32) -> Self {
        self.message.info.reqid = reqid;
        self
    }
    pub fn replay_window(mut self, window: u8) -> Self {
        self.message.info.replay_window = window;
        self
    }
    pub fn flags(mut self, flags: u8) -> Self {
        self.message.info.flags = flags;
        self
    }
    pub fn ifid(mut self, ifid: u32) -> Self {
        self.message.nlas.push(XfrmAttrs::IfId(ifid));
        self
    }
    pub fn mark(mut self, mark: u32, mask: u32) -> Self {
        self.message
            .nlas
            .push(XfrmAttrs::Mark(Mark { value: mark, mask }));
        self
    }
    pub fn encryption(mut self, name: &str, key: &[u8]) -> Self {
        self.message
            .nlas
            .push(XfrmAttrs::Encryption(Algo::new(name, key)));
        self
    }
    pub fn integrity(mut self, name: &str, key: &[u8], trunc_len: u32) -> Self {
        self.message
            .nlas
            .push(XfrmAttrs::AuthTrunc(AlgoAuth::new(name, key, trunc_len)));
        self
    }
    pub fn aead(mut self, name: &str, key: &[u8], icv_len: u32) -> Self {
        self.message
            .nlas
            .push(XfrmAttrs::Aead(AlgoAead::new(name, key, icv_len)));
        self
    }
    pub fn compression(mut self, name: &str) -> Self {
        self.message
            .nlas
            .push(XfrmAttrs::Compression(Algo::new(name, &[])));
        self
    }
    pub fn encap(mut self, encap_type: u16, sport: u16, dport: u16, oa: IpAddr) -> Self {
        let mut encap = EncapTmpl::default();
        encap.encap_type = encap_type;
        encap.sport = sport;
        encap.dport = dport;
        encap.oa = Address::from_ip(&oa);
        self.message.nlas.push(XfrmAttrs::Encap(encap));
        self
    }
    pub fn esn(mut self, replay_window: u32, bitmap: Vec<u8>) -> Self {
        let mut esn = ReplayEsn::default();
        esn.replay_window = replay_window;
        esn.bitmap_len = (bitmap.len() as u32) * 8;
        self.message.nlas.push(XfrmAttrs::ReplayEsn(esn));
        self
    }
    pub fn extra_flags(mut self, flags: u32) -> Self {
        self.message.nlas.push(XfrmAttrs::ExtraFlags(flags));
        self
    }
    pub fn sa_direction(mut self, direction: u8) -> Self {
        self.message.nlas.push(XfrmAttrs::SaDirection(direction));
        self
    }
    pub fn offload_dev(mut self, ifindex: i32, flags: u8) -> Self {
        self.message
            .nlas
            .push(XfrmAttrs::OffloadDev(ifindex, flags));
        self
    }
    pub fn security_label(mut self, ctx: &[u8]) -> Self {
        let mut sc = netlink_packet_xfrm::SecurityCtx::default();
        sc.context(ctx);
        self.message.nlas.push(XfrmAttrs::SecurityContext(sc));
        self
    }

    /// Execute the request.
    pub async fn execute(self) -> Result<(), Error> {
        let StateModifyRequest {
            mut handle,
            message,
            update,
        } = self;

        let mut req = if update {
            NetlinkMessage::from(XfrmMessage::UpdateSa(message))
        } else {
            NetlinkMessage::from(XfrmMessage::AddSa(message))
        };
        req.header.flags = NLM_F_REQUEST | NLM_F_ACK;

        let mut response = handle.request(req)?;

        while let Some(message) = response.next().await {
            try_nl!(message);
        }
        Ok(())
    }

    /// Execute the request without waiting for an ACK response.
    pub fn execute_noack(self) -> Result<(), Error> {
        let StateModifyRequest {
            mut handle,
            message,
            update,
        } = self;

        let mut req = if update {
            NetlinkMessage::from(XfrmMessage::UpdateSa(message))
        } else {
            NetlinkMessage::from(XfrmMessage::AddSa(message))
        };
        req.header.flags = NLM_F_REQUEST;

        let mut _response = handle.request(req)?;

        Ok(())
    }

    pub fn message_mut(&mut self) -> &mut ModifyMessage {
        &mut self.message
    }
}
