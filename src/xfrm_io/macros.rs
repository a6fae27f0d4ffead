// SPDX-License-Identifier: MIT

/// Turn a raw reply `NetlinkMessage` into a `Result<(), Error>`, surfacing
/// `NetlinkError` payloads as [`crate::xfrm_io::Error::NetlinkError`].
macro_rules! try_nl {
    ($msg:expr) => {{
        use netlink_packet_core::NetlinkPayload;

        match $msg.payload {
            NetlinkPayload::Error(err) if err.code.is_none() => (),
            NetlinkPayload::Error(err) => return Err($crate::xfrm_io::Error::NetlinkError(err)),
            NetlinkPayload::Ack(_) | NetlinkPayload::Done(_) => (),
            _ => return Err($crate::xfrm_io::Error::UnexpectedMessage($msg)),
        }
    }};
}

/// Match a reply `NetlinkMessage` against an expected `XfrmMessage` variant,
/// returning the inner payload or an appropriate `Error`.
macro_rules! try_xfrmnl {
    ($msg:expr, $variant:path) => {{
        use netlink_packet_core::NetlinkPayload;

        match $msg.payload {
            NetlinkPayload::InnerMessage($variant(inner)) => inner,
            NetlinkPayload::Error(err) => return Err($crate::xfrm_io::Error::NetlinkError(err)),
            _ => return Err($crate::xfrm_io::Error::UnexpectedMessage($msg)),
        }
    }};
}

pub(crate) use try_nl;
pub(crate) use try_xfrmnl;
