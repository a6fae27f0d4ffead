// SPDX-License-Identifier: MIT

use futures::{
    future::{self, Either},
    stream::{StreamExt, TryStream},
    FutureExt,
};
use std::net::IpAddr;

use crate::xfrm_io::macros::try_xfrmnl;
use crate::xfrm_io::{Error, Handle};
use netlink_packet_core::{NetlinkMessage, NLM_F_DUMP, NLM_F_REQUEST};
use netlink_packet_xfrm::{
    policy::{DelGetMessage, GetDumpMessage, ModifyMessage},
    Mark, XfrmAttrs, XfrmMessage,
};

/// A request to get a single xfrm policy. Equivalent to `ip xfrm policy get`.
#[non_exhaustive]
pub struct PolicyGetRequest {
    handle: Handle,
    message: DelGetMessage,
}

impl PolicyGetRequest {
    pub(crate) fn new(
        handle: Handle,
        src_addr: IpAddr,
        src_prefix_len: u8,
        dst_addr: IpAddr,
        dst_prefix_len: u8,
    ) -> Self {
        let mut message = DelGetMessage::default();

        message
            .user_policy_id
            .selector
            .source_prefix(&src_addr, src_prefix_len);
        message
            .user_policy_id
            .selector
            .destination_prefix(&dst_addr, dst_prefix_len);

        PolicyGetRequest { handle, message }
    }

    pub fn direction(mut self, direction: u8) -> Self {
        self.message.user_policy_id.direction = direction;
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

    /// Execute the request.
    pub async fn execute(self) -> Result<ModifyMessage, Error> {
        let PolicyGetRequest {
            mut handle,
            message,
        } = self;

        let mut req = NetlinkMessage::from(XfrmMessage::GetPolicy(message));
        req.header.flags = NLM_F_REQUEST;

        let mut response = handle.request(req)?;

        if let Some(msg) = response.next().await {
            return Ok(try_xfrmnl!(msg, XfrmMessage::NewPolicy));
        }
        Err(Error::RequestFailed)
    }

    pub fn message_mut(&mut self) -> &mut DelGetMessage {
        &mut self.message
    }
}

/// A request to dump every installed xfrm policy. Equivalent to `ip xfrm policy list`.
#[non_exhaustive]
pub struct PolicyGetDumpRequest {
    handle: Handle,
    message: GetDumpMessage,
}

impl PolicyGetDumpRequest {
    pub(crate) fn new(handle: Handle) -> Self {
        PolicyGetDumpRequest {
            handle,
            message: GetDumpMessage::default(),
        }
    }

    /// Execute the request.
    pub fn execute(self) -> impl TryStream<Ok = ModifyMessage, Error = Error> {
        let PolicyGetDumpRequest {
            mut handle,
            message,
        } = self;

        let mut req = NetlinkMessage::from(XfrmMessage::GetDumpPolicy(message));
        req.header.flags = NLM_F_REQUEST | NLM_F_DUMP;

        match handle.request(req) {
            Ok(response) => Either::Left(
                response.map(move |msg| Ok(try_xfrmnl!(msg, XfrmMessage::NewPolicy))),
            ),
            Err(e) => Either::Right(future::err::<ModifyMessage, Error>(e).into_stream()),
        }
    }

    pub fn message_mut(&mut self) -> &mut GetDumpMessage {
        &mut self.message
    }
}
