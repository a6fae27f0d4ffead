// SPDX-License-Identifier: MIT

use std::net::IpAddr;

use super::{
    PolicyDeleteRequest, PolicyFlushRequest, PolicyGetDumpRequest, PolicyGetRequest,
    PolicyGetSpdInfoRequest, PolicyModifyRequest, PolicySetSpdInfoRequest,
};
use crate::xfrm_io::Handle;

#[non_exhaustive]
pub struct PolicyHandle(Handle);

impl PolicyHandle {
    pub fn new(handle: Handle) -> Self {
        PolicyHandle(handle)
    }

    /// Add an xfrm policy (equivalent to `ip xfrm policy add`)
    pub fn add(
        &self,
        src_addr: IpAddr,
        src_prefix_len: u8,
        dst_addr: IpAddr,
        dst_prefix_len: u8,
    ) -> PolicyModifyRequest {
        PolicyModifyRequest::new(
            self.0.clone(),
            false,
            src_addr,
            src_prefix_len,
            dst_addr,
            dst_prefix_len,
        )
    }

    /// Update an xfrm policy (equivalent to `ip xfrm policy update`)
    pub fn update(
        &self,
        src_addr: IpAddr,
        src_prefix_len: u8,
        dst_addr: IpAddr,
        dst_prefix_len: u8,
    ) -> PolicyModifyRequest {
        PolicyModifyRequest::new(
            self.0.clone(),
            true,
            src_addr,
            src_prefix_len,
            dst_addr,
            dst_prefix_len,
        )
    }

    /// Delete an xfrm policy (equivalent to `ip xfrm policy delete`)
    pub fn delete(
        &self,
        src_addr: IpAddr,
        src_prefix_len: u8,
        dst_addr: IpAddr,
        dst_prefix_len: u8,
    ) -> PolicyDeleteRequest {
        PolicyDeleteRequest::new(
            self.0.clone(),
            src_addr,
            src_prefix_len,
            dst_addr,
            dst_prefix_len,
        )
    }

    /// Delete an xfrm policy by kernel index.
    pub fn delete_by_index(&self, index: u32) -> PolicyDeleteRequest {
        PolicyDeleteRequest::new_index(self.0.clone(), index)
    }

    /// Get a single xfrm policy (equivalent to `ip xfrm policy get`)
    pub fn get(
        &self,
        src_addr: IpAddr,
        src_prefix_len: u8,
        dst_addr: IpAddr,
        dst_prefix_len: u8,
    ) -> PolicyGetRequest {
        PolicyGetRequest::new(
            self.0.clone(),
            src_addr,
            src_prefix_len,
            dst_addr,
            dst_prefix_len,
        )
    }

    /// Get (dump) every installed xfrm policy (equivalent to `ip xfrm policy list`)
    pub fn get_dump(&self) -> PolicyGetDumpRequest {
        PolicyGetDumpRequest::new(self.0.clone())
    }

    /// Flush every installed xfrm policy (equivalent to `ip xfrm policy flush`)
    pub fn flush(&self) -> PolicyFlushRequest {
        PolicyFlushRequest::new(self.0.clone())
    }

    /// Get xfrm spd statistics (equivalent to `ip xfrm policy count`)
    pub fn get_spdinfo(&self) -> PolicyGetSpdInfoRequest {
        PolicyGetSpdInfoRequest::new(self.0.clone())
    }

    /// Set xfrm spd hash threshold tunables (equivalent to `ip xfrm policy set`)
    pub fn set_spdinfo(&self) -> PolicySetSpdInfoRequest {
        PolicySetSpdInfoRequest::new(self.0.clone())
    }
}
