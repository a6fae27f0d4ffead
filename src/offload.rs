// SPDX-License-Identifier: MIT

//! §4.6: the Offload Coordinator. Tracks which network interfaces
//! support hardware IPsec offload, watches link up/down transitions,
//! and fans out port-based IKE bypass policies to every up,
//! packet-offload-capable interface. Grounded on the `bypass_t`/
//! `offload_iface_t` bookkeeping and `offload_bypass`/`offload_bypasses`/
//! `manage_bypass` in `kernel_netlink_ipsec.c`: a bypass is identified
//! by `{family, proto, port}` alone (not an interface), and is
//! (re)offloaded to every interface the coordinator currently considers
//! eligible, not to one interface picked in advance.
//!
//! Locking order (§5): this module's mutex, `M_off`, may be acquired
//! without holding the Policy Table's `M`, but never the reverse — a
//! task holding `M` must never try to acquire `M_off`. This keeps
//! interface-event handling (which is frequent and cheap) from ever
//! blocking behind a slow policy-table operation.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::ports::{Direction, PolicyId};
use crate::sa::HwOffload;
use crate::selector::TrafficSelector;

/// What an interface supports, as discovered from `ETHTOOL_GET_TS_INFO`
/// / netlink link attributes by the platform's interface layer (outside
/// this crate's scope — only the decision of *how to use* the
/// capability lives here).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffloadCapability {
    None,
    CryptoOnly,
    PacketAndCrypto,
}

impl OffloadCapability {
    /// Whether requesting `wanted` hardware offload on this interface
    /// can succeed without falling back.
    pub fn supports(&self, wanted: HwOffload) -> bool {
        match (self, wanted) {
            (_, HwOffload::None) => true,
            (OffloadCapability::None, _) => false,
            (OffloadCapability::CryptoOnly, HwOffload::Crypto) => true,
            (OffloadCapability::CryptoOnly, HwOffload::Packet) => false,
            (OffloadCapability::CryptoOnly, HwOffload::Auto) => true,
            (OffloadCapability::PacketAndCrypto, _) => true,
        }
    }
}

/// Identifies a port-based IKE bypass policy (§4.6/§6's `bypass_socket`):
/// a socket family/protocol/port triple, not tied to any one interface.
/// Grounded on `bypass_t { family, proto, port }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BypassSpec {
    pub is_ipv4: bool,
    pub proto: u8,
    pub port: u16,
}

#[derive(Clone, Debug)]
struct IfaceState {
    capability: OffloadCapability,
    up: bool,
}

struct Inner {
    ifaces: HashMap<String, IfaceState>,
    bypasses: Vec<BypassSpec>,
    /// `(bypass, interface)` pairs currently offloaded to the kernel, so
    /// re-adding a bypass or re-upping an interface doesn't resubmit
    /// policies the kernel already has.
    offloaded: HashSet<(BypassSpec, String)>,
}

/// Caches interface offload capability by name and the set of bypass
/// policies that need to be (re)installed when an interface transitions
/// from down to up, or when a new bypass is registered.
pub struct OffloadCoordinator {
    inner: Mutex<Inner>,
}

impl Default for OffloadCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl OffloadCoordinator {
    pub fn new() -> Self {
        OffloadCoordinator {
            inner: Mutex::new(Inner {
                ifaces: HashMap::new(),
                bypasses: Vec::new(),
                offloaded: HashSet::new(),
            }),
        }
    }

    /// Record (or refresh) the offload capability of `if_name`, e.g.
    /// after `RTM_NEWLINK`.
    pub fn set_capability(&self, if_name: &str, capability: OffloadCapability) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .ifaces
            .entry(if_name.to_string())
            .or_insert(IfaceState {
                capability,
                up: true,
            })
            .capability = capability;
    }

    pub fn capability(&self, if_name: &str) -> OffloadCapability {
        self.inner
            .lock()
            .unwrap()
            .ifaces
            .get(if_name)
            .map(|s| s.capability)
            .unwrap_or(OffloadCapability::None)
    }

    /// §4.6: whether requesting `wanted` offload on `if_name` will
    /// succeed; `Auto` degrades to crypto-only rather than failing
    /// outright (mirrors [`crate::translator::plan_hw_offload`]'s retry
    /// rule, applied ahead of time when the interface is already
    /// known).
    pub fn resolve(&self, if_name: &str, wanted: HwOffload) -> HwOffload {
        if wanted == HwOffload::None {
            return HwOffload::None;
        }
        let cap = self.capability(if_name);
        if cap.supports(wanted) {
            return wanted;
        }
        if wanted == HwOffload::Auto && cap.supports(HwOffload::Crypto) {
            return HwOffload::Crypto;
        }
        HwOffload::None
    }

    fn eligible_ifaces(inner: &Inner) -> Vec<String> {
        inner
            .ifaces
            .iter()
            .filter(|(_, s)| s.up && s.capability == OffloadCapability::PacketAndCrypto)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// §4.6/S6: register a new port-based bypass and offload it to every
    /// up, packet-offload-capable interface known so far. Returns the
    /// `NEWPOLICY` directions (in + out) to submit per newly-offloaded
    /// interface; grounded on `offload_bypass` looping over all known
    /// interfaces for a single new bypass.
    pub fn add_bypass(&self, spec: BypassSpec) -> Vec<PolicyId> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.bypasses.contains(&spec) {
            inner.bypasses.push(spec);
        }
        let targets = Self::eligible_ifaces(&inner);
        let mut out = Vec::new();
        for if_name in targets {
            if inner.offloaded.insert((spec, if_name.clone())) {
                info!("offloading new bypass {spec:?} to {if_name}");
                out.push(bypass_policy_id(&spec, &if_name, Direction::In));
                out.push(bypass_policy_id(&spec, &if_name, Direction::Out));
            }
        }
        out
    }

    /// §4.6/S6: unregister a bypass and return the `DELPOLICY` directions
    /// (in + out) for every interface it was offloaded to.
    pub fn remove_bypass(&self, spec: &BypassSpec) -> Vec<PolicyId> {
        let mut inner = self.inner.lock().unwrap();
        inner.bypasses.retain(|b| b != spec);
        let ifaces: Vec<String> = inner
            .offloaded
            .iter()
            .filter(|(s, _)| s == spec)
            .map(|(_, name)| name.clone())
            .collect();
        let mut out = Vec::new();
        for if_name in ifaces {
            inner.offloaded.remove(&(*spec, if_name.clone()));
            out.push(bypass_policy_id(spec, &if_name, Direction::Out));
            out.push(bypass_policy_id(spec, &if_name, Direction::In));
        }
        out
    }

    /// §4.6: link-down handling. The interface's capability stays cached
    /// (it doesn't change across a link flap) but it stops being usable
    /// until link-up; the kernel purges whatever offloaded policy state
    /// it had for the interface on its own, so this just forgets the
    /// matching bookkeeping rather than issuing any kernel calls.
    pub fn on_link_down(&self, if_name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.ifaces.get_mut(if_name) {
            state.up = false;
        }
        inner.offloaded.retain(|(_, name)| name != if_name);
        debug!("interface {if_name} went down, offload unavailable until link-up");
    }

    /// §4.6/S6: link-up handling. Offloads every known bypass not yet
    /// offloaded to `if_name`, if the interface is packet-offload
    /// capable, and returns the `NEWPOLICY` directions to submit;
    /// grounded on `offload_bypasses` looping over all known bypasses for
    /// one newly-up interface.
    pub fn on_link_up(&self, if_name: &str) -> Vec<PolicyId> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.ifaces.get_mut(if_name) {
            state.up = true;
        }
        let capable = inner
            .ifaces
            .get(if_name)
            .map(|s| s.capability == OffloadCapability::PacketAndCrypto)
            .unwrap_or(false);
        if !capable {
            return Vec::new();
        }
        info!("interface {if_name} came up, rearming bypass policies");
        let bypasses = inner.bypasses.clone();
        let mut out = Vec::new();
        for spec in bypasses {
            if inner.offloaded.insert((spec, if_name.to_string())) {
                out.push(bypass_policy_id(&spec, if_name, Direction::In));
                out.push(bypass_policy_id(&spec, if_name, Direction::Out));
            }
        }
        out
    }

    pub fn is_up(&self, if_name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .ifaces
            .get(if_name)
            .map(|s| s.up)
            .unwrap_or(true)
    }
}

/// Builds the wildcard traffic-selector pair for a bypass: any address,
/// the bypass's protocol, and the bypass's port pinned to whichever side
/// faces the socket for `dir` (dst port for inbound, src port for
/// outbound/forward) — grounded on `manage_bypass`'s
/// `dir == POLICY_IN ? sel->dport : sel->sport` branch.
fn bypass_traffic_selectors(spec: &BypassSpec, dir: Direction) -> (TrafficSelector, TrafficSelector) {
    let any_addr = if spec.is_ipv4 {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };
    let mut src_ts = TrafficSelector::from_subnet(any_addr, 0);
    let mut dst_ts = TrafficSelector::from_subnet(any_addr, 0);
    src_ts.protocol = spec.proto;
    dst_ts.protocol = spec.proto;
    match dir {
        Direction::In => {
            dst_ts.from_port = spec.port;
            dst_ts.to_port = spec.port;
        }
        Direction::Out | Direction::Fwd => {
            src_ts.from_port = spec.port;
            src_ts.to_port = spec.port;
        }
    }
    (src_ts, dst_ts)
}

fn bypass_policy_id(spec: &BypassSpec, if_name: &str, dir: Direction) -> PolicyId {
    let (src_ts, dst_ts) = bypass_traffic_selectors(spec, dir);
    PolicyId {
        src_ts,
        dst_ts,
        dir,
        mark_value: 0,
        mark_mask: 0,
        if_id: 0,
        label: None,
        interface: Some(if_name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BYPASS: BypassSpec = BypassSpec {
        is_ipv4: true,
        proto: 17,
        port: 500,
    };

    #[test]
    fn crypto_only_interface_rejects_packet_offload() {
        let coord = OffloadCoordinator::new();
        coord.set_capability("eth0", OffloadCapability::CryptoOnly);
        assert_eq!(coord.resolve("eth0", HwOffload::Packet), HwOffload::None);
        assert_eq!(coord.resolve("eth0", HwOffload::Crypto), HwOffload::Crypto);
    }

    #[test]
    fn auto_degrades_to_crypto_on_crypto_only_interface() {
        let coord = OffloadCoordinator::new();
        coord.set_capability("eth0", OffloadCapability::CryptoOnly);
        assert_eq!(coord.resolve("eth0", HwOffload::Auto), HwOffload::Crypto);
    }

    #[test]
    fn unknown_interface_has_no_offload() {
        let coord = OffloadCoordinator::new();
        assert_eq!(coord.resolve("eth9", HwOffload::Crypto), HwOffload::None);
    }

    /// S6: adding a bypass fans it out to every up, packet-capable
    /// interface known so far, not just one.
    #[test]
    fn add_bypass_offloads_to_every_eligible_interface() {
        let coord = OffloadCoordinator::new();
        coord.set_capability("eth0", OffloadCapability::PacketAndCrypto);
        coord.set_capability("eth1", OffloadCapability::PacketAndCrypto);
        coord.set_capability("eth2", OffloadCapability::CryptoOnly);

        let installed = coord.add_bypass(BYPASS);
        let ifaces: HashSet<_> = installed.iter().filter_map(|p| p.interface.clone()).collect();
        assert_eq!(installed.len(), 4); // in+out per eligible interface
        assert!(ifaces.contains("eth0"));
        assert!(ifaces.contains("eth1"));
        assert!(!ifaces.contains("eth2"));
    }

    /// S6: a newly-up, packet-capable interface gets every already-known
    /// bypass offloaded to it.
    #[test]
    fn link_up_rearms_all_known_bypasses_on_that_interface() {
        let coord = OffloadCoordinator::new();
        coord.add_bypass(BYPASS);
        coord.set_capability("eth0", OffloadCapability::PacketAndCrypto);
        coord.on_link_down("eth0");

        let rearmed = coord.on_link_up("eth0");
        assert_eq!(rearmed.len(), 2);
        assert!(rearmed.iter().all(|p| p.interface.as_deref() == Some("eth0")));

        // a link-up with the bypass already offloaded and no flap is a no-op...
        let rearmed_again = coord.on_link_up("eth0");
        assert!(rearmed_again.is_empty());

        // ...but a down/up cycle forgets the offload (the kernel purged it
        // on down) and re-offloads on the next up.
        coord.on_link_down("eth0");
        let rearmed_after_flap = coord.on_link_up("eth0");
        assert_eq!(rearmed_after_flap.len(), 2);
    }

    #[test]
    fn link_up_on_crypto_only_interface_rearms_nothing() {
        let coord = OffloadCoordinator::new();
        coord.add_bypass(BYPASS);
        coord.set_capability("eth2", OffloadCapability::CryptoOnly);
        assert!(coord.on_link_up("eth2").is_empty());
    }

    /// S6: removing a bypass produces a delete for every interface it was
    /// offloaded to.
    #[test]
    fn remove_bypass_deletes_from_every_offloaded_interface() {
        let coord = OffloadCoordinator::new();
        coord.set_capability("eth0", OffloadCapability::PacketAndCrypto);
        coord.set_capability("eth1", OffloadCapability::PacketAndCrypto);
        coord.add_bypass(BYPASS);

        let removed = coord.remove_bypass(&BYPASS);
        assert_eq!(removed.len(), 4);
        let ifaces: HashSet<_> = removed.iter().filter_map(|p| p.interface.clone()).collect();
        assert!(ifaces.contains("eth0"));
        assert!(ifaces.contains("eth1"));

        // re-adding after removal re-offloads from scratch.
        let reinstalled = coord.add_bypass(BYPASS);
        assert_eq!(reinstalled.len(), 4);
    }
}
