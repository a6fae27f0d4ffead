// SPDX-License-Identifier: MIT

//! §6: the external collaborator interfaces. Everything outside the
//! kernel IPsec manager — the IKE state machine, authentication,
//! VICI/strings config parsing, the TUN/TAP layer, and the wire crypto
//! library — is reached only through these traits.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::sa::{AhConfig, EspConfig, IpCompConfig, SaMode};
use crate::selector::{Host, TrafficSelector};

/// Events the kernel raises asynchronously; dispatched by the
/// [`crate::reactor::EventReactor`] via this port. None of these calls
/// may observe the policy table mutex held (§4.4 invariant).
pub trait UpperLayer: Send + Sync {
    fn on_acquire(&self, reqid: u32, event: AcquireEvent);
    fn on_expire(&self, protocol: u8, spi: u32, dst: Host, hard: bool);
    fn on_migrate(&self, reqid: u32, event: MigrateEvent);
    fn on_mapping(&self, proto: u8, spi: u32, dst: Host, new_src: Host);

    /// Fallback algorithm-name lookup for identifiers not in the
    /// built-in table (§4.3).
    fn lookup_algorithm(&self, ikev2_id: u16, kind: AlgorithmType) -> Option<String> {
        let _ = (ikev2_id, kind);
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgorithmType {
    Encryption,
    Integrity,
    Compression,
}

#[derive(Clone, Debug)]
pub struct AcquireEvent {
    pub src_ts: TrafficSelector,
    pub dst_ts: TrafficSelector,
    pub label: Option<Vec<u8>>,
    pub seq: u32,
    pub cpu: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    Fwd,
}

#[derive(Clone, Debug)]
pub struct MigrateEvent {
    pub src_ts: TrafficSelector,
    pub dst_ts: TrafficSelector,
    pub dir: Direction,
    pub local: Host,
    pub remote: Host,
}

/// The Routing port (§6): installing/removing IP routes and resolving
/// addresses/nexthops, owned by a collaborator outside this crate's
/// scope (the platform's routing subsystem).
pub trait RoutingPort: Send + Sync {
    fn get_interface(&self, host: &Host) -> Option<String>;
    fn get_nexthop(&self, dst: &Host, prefixlen: i32, src: &Host) -> Option<Host>;
    fn get_address_by_ts(&self, ts: &TrafficSelector) -> Option<Host>;
    fn add_route(&self, route: &RouteSpec) -> Result<RouteStatus>;
    fn del_route(&self, route: &RouteSpec) -> Result<RouteStatus>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteSpec {
    pub dst_net: std::net::IpAddr,
    pub prefixlen: u8,
    pub gateway: Option<Host>,
    pub src_ip: Host,
    pub if_name: String,
    pub pass: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteStatus {
    Success,
    AlreadyDone,
}

/// Identifies an `IpsecSa` at the kernel level: `(dst, spi, proto)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SaId {
    pub dst: Host,
    pub spi: u32,
    pub proto: u8,
}

/// Parameters needed to build ADD/UPDATE SA kernel requests — the
/// union of what's content-identity (mirrored in [`crate::sa::IpsecSa`])
/// and what's purely wire-level (sequence numbers, replay state, TFC,
/// per-CPU dispatch).
#[derive(Clone, Debug)]
pub struct SaParams {
    pub mode: SaMode,
    pub reqid: u32,
    pub esp: Option<EspConfig>,
    pub ah: Option<AhConfig>,
    pub ipcomp: Option<IpCompConfig>,
    pub mark_value: u32,
    pub mark_mask: u32,
    pub if_id: u32,
    pub label: Option<Vec<u8>>,
    pub encap_ports: Option<(u16, u16)>,
    pub pcpu_acquires: bool,
    pub sa_direction: Option<Direction>,
    pub hw_offload: crate::sa::HwOffload,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SaUsage {
    pub bytes: u64,
    pub packets: u64,
    pub last_used: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelAck {
    Success,
    NotFound,
    AlreadyDone,
}

/// Identifies an installed policy: selector identity plus the
/// classifiers that participate in I5's `(selector, mark, if_id,
/// direction, label)` identity tuple.
#[derive(Clone, Debug)]
pub struct PolicyId {
    pub src_ts: TrafficSelector,
    pub dst_ts: TrafficSelector,
    pub dir: Direction,
    pub mark_value: u32,
    pub mark_mask: u32,
    pub if_id: u32,
    pub label: Option<Vec<u8>>,
    pub interface: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyPriority {
    Pass,
    Routed,
    Default,
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyType {
    Ipsec,
    Pass,
    Drop,
}

#[derive(Clone, Debug)]
pub struct PolicyParams {
    pub sa: crate::sa::IpsecSaParams,
    pub priority_hint: PolicyPriority,
    pub priority_override: Option<u32>,
    /// The priority actually in force for this binding: `priority_override`
    /// if set, otherwise the auto-priority computed from the selector and
    /// `priority_hint` (§4.2 step 5/8). `PolicyTable::add_policy` fills this
    /// in before handing `PolicyParams` to the kernel, so `KernelIpsecIo`
    /// implementations always see the value that actually governs ordering
    /// rather than having to recompute it.
    pub effective_priority: u32,
    pub ptype: PolicyType,
    pub pcpu_acquires: bool,
    /// For outbound policies only: the peer traffic selectors, cloned so
    /// route (re)computation never needs to call back into the caller
    /// (§3's `PolicySaOut` variant).
    pub peer_src_ts: Option<TrafficSelector>,
    pub peer_dst_ts: Option<TrafficSelector>,
}

/// The Kernel I/O port (§6): sends/receives the opaque
/// request/reply/event protocol. The default implementation
/// ([`crate::xfrm_io`]) speaks Linux XFRM netlink; alternate
/// implementations (test doubles, other kernels) only need to satisfy
/// this trait.
///
/// Methods return boxed futures (rather than `async fn` in the trait)
/// so the trait stays object-safe and callers can hold `Arc<dyn
/// KernelIpsecIo>` — the same shape the teacher crate's `netlink-proto`
/// dependency uses internally for its connection futures.
pub trait KernelIpsecIo: Send + Sync {
    fn add_sa<'a>(&'a self, id: SaId, params: &'a SaParams) -> BoxFuture<'a, Result<()>>;
    fn update_sa<'a>(&'a self, id: SaId, params: &'a SaParams) -> BoxFuture<'a, Result<()>>;
    fn del_sa(&self, id: SaId) -> BoxFuture<'_, Result<KernelAck>>;
    fn query_sa(&self, id: SaId) -> BoxFuture<'_, Result<SaUsage>>;
    fn flush_sas(&self) -> BoxFuture<'_, Result<()>>;

    fn add_policy<'a>(
        &'a self,
        id: &'a PolicyId,
        head: &'a PolicyParams,
    ) -> BoxFuture<'a, Result<()>>;
    fn update_policy<'a>(
        &'a self,
        id: &'a PolicyId,
        head: &'a PolicyParams,
    ) -> BoxFuture<'a, Result<()>>;
    fn del_policy<'a>(&'a self, id: &'a PolicyId) -> BoxFuture<'a, Result<KernelAck>>;
    fn query_policy<'a>(&'a self, id: &'a PolicyId) -> BoxFuture<'a, Result<Option<u64>>>;
    fn flush_policies(&self) -> BoxFuture<'_, Result<()>>;

    fn get_spi(&self, src: Host, dst: Host, proto: u8) -> BoxFuture<'_, Result<u32>>;
    fn get_cpi(&self, src: Host, dst: Host) -> BoxFuture<'_, Result<u16>>;

    fn bypass_socket(&self, fd: i32, family: i32) -> BoxFuture<'_, Result<bool>>;
    fn enable_udp_decap(&self, fd: i32, family: i32, port: u16) -> BoxFuture<'_, Result<bool>>;

    fn set_hash_threshold(
        &self,
        ipv4: crate::settings::HashThreshold,
        ipv6: crate::settings::HashThreshold,
    ) -> BoxFuture<'_, Result<()>>;
    fn get_hash_threshold(
        &self,
    ) -> BoxFuture<'_, Result<(crate::settings::HashThreshold, crate::settings::HashThreshold)>>;
}
