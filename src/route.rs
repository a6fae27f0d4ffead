// SPDX-License-Identifier: MIT

//! §4.5: the Route Manager. Computes whether an outbound policy needs a
//! route at all, and if so builds the [`RouteSpec`] to hand to the
//! [`RoutingPort`] collaborator — grounded on `manage_policy`'s routing
//! section and `get_route`/`add_route`/`get_interface` in
//! `kernel_netlink_ipsec.c`. This module never talks to the kernel
//! directly; all actual route (de)installation happens through
//! `RoutingPort`, which belongs to the platform's routing subsystem, not
//! this crate (§6 Non-goals).

use crate::error::{IpsecError, Result};
use crate::ports::{Direction, PolicyType, RouteSpec, RouteStatus, RoutingPort};
use crate::selector::{Host, TrafficSelector};
use crate::settings::Settings;

/// Reasons a route is skipped without attempting installation — kept
/// distinct from errors because skipping is the expected outcome for
/// most policies (§4.5's skip conditions are not failures).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteSkipReason {
    NotOutbound,
    RoutingDisabled,
    ProtocolOrPortPinned,
    TransportModeIpsecPolicy,
    NotRoutable,
    BoundToInterfaceWithoutVirtualRouting,
}

pub enum RouteDecision {
    Skip(RouteSkipReason),
    Install(RouteSpec),
}

/// Resolves whether an `if_id` names a kernel XFRM-i virtual interface, so
/// the Route Manager can route through it directly instead of computing a
/// nexthop (§4.5, grounded on `find_xfrmi`). Supplied by the caller since
/// XFRM-i enumeration is itself a kernel concern external to this crate.
pub trait VirtualInterfaceLookup: Send + Sync {
    fn find(&self, if_id: u32) -> Option<String>;
}

/// Whether `proto`/`port` in the peer traffic selector pin a specific
/// protocol or port, which the original treats as "this policy doesn't
/// describe a routable subnet" and refuses to route (§4.5).
fn is_protocol_or_port_pinned(ts: &TrafficSelector) -> bool {
    ts.protocol != 0 || !ts.any_port()
}

pub struct RouteManager<'a> {
    routing: &'a dyn RoutingPort,
    settings: &'a dyn Settings,
    virtual_if: Option<&'a dyn VirtualInterfaceLookup>,
}

impl<'a> RouteManager<'a> {
    pub fn new(routing: &'a dyn RoutingPort, settings: &'a dyn Settings) -> Self {
        RouteManager {
            routing,
            settings,
            virtual_if: None,
        }
    }

    pub fn with_virtual_interfaces(mut self, lookup: &'a dyn VirtualInterfaceLookup) -> Self {
        self.virtual_if = Some(lookup);
        self
    }

    /// Decide whether `dir`-outbound traffic matching `src_ts -> dst_ts`
    /// via `local`/`remote` endpoints needs a route, and compute it if
    /// so. `ptype` and `if_id` mirror `add_policy_internal`'s route-install
    /// guard: only `Pass` policies and non-transport `Ipsec` policies ever
    /// get a route, and a policy bound to an `if_id` is skipped unless
    /// routing through virtual interfaces is enabled (§4.5).
    #[allow(clippy::too_many_arguments)]
    pub fn decide(
        &self,
        dir: Direction,
        ptype: PolicyType,
        transport_mode: bool,
        if_id: u32,
        local: &Host,
        remote: &Host,
        src_ts: &TrafficSelector,
        dst_ts: &TrafficSelector,
    ) -> RouteDecision {
        if dir != Direction::Out {
            return RouteDecision::Skip(RouteSkipReason::NotOutbound);
        }
        if !self.settings.install_routes() {
            return RouteDecision::Skip(RouteSkipReason::RoutingDisabled);
        }
        if is_protocol_or_port_pinned(dst_ts) || is_protocol_or_port_pinned(src_ts) {
            return RouteDecision::Skip(RouteSkipReason::ProtocolOrPortPinned);
        }
        if if_id != 0 && !self.settings.install_routes_via_virtual_if() {
            return RouteDecision::Skip(RouteSkipReason::BoundToInterfaceWithoutVirtualRouting);
        }
        match ptype {
            PolicyType::Pass => {}
            PolicyType::Ipsec if !transport_mode => {}
            PolicyType::Ipsec => {
                return RouteDecision::Skip(RouteSkipReason::TransportModeIpsecPolicy)
            }
            PolicyType::Drop => return RouteDecision::Skip(RouteSkipReason::NotRoutable),
        }

        let (dst_net, prefixlen) = dst_ts.to_subnet();

        let src_ip = self
            .routing
            .get_address_by_ts(src_ts)
            .unwrap_or(*local);

        let via_virtual_if = if if_id != 0 {
            self.virtual_if.and_then(|v| v.find(if_id))
        } else {
            None
        };

        // Non-shunt policies (the peer is known) route straight to the
        // peer via `get_nexthop(remote, -1, local)`, unless the if_id is
        // served by a virtual interface. Shunt policies (peer is "any")
        // have no peer to route to, so the nexthop is resolved against
        // the policy's own destination subnet instead (§4.5, grounded on
        // `install_route`'s `ipsec->dst->is_anyaddr` branch).
        let (resolved_if_name, gateway) = if !remote.is_any() {
            match via_virtual_if {
                Some(vif) => (Some(vif), None),
                None => (None, self.routing.get_nexthop(remote, -1, local)),
            }
        } else {
            let dst_host = Host::new(dst_net, 0);
            (
                None,
                self.routing
                    .get_nexthop(&dst_host, prefixlen as i32, &src_ip),
            )
        };

        // If the nexthop lookup didn't already pin an interface (it never
        // does in this port; only the virtual-interface path does),
        // resolve the egress interface for the local address, falling
        // back to the resolved source IP for shunt policies with no
        // local address of their own.
        let if_name = match resolved_if_name {
            Some(name) => name,
            None => {
                let iface = if !local.is_any() { local } else { &src_ip };
                self.routing.get_interface(iface).unwrap_or_default()
            }
        };

        RouteDecision::Install(RouteSpec {
            dst_net,
            prefixlen,
            gateway,
            src_ip,
            if_name,
            pass: ptype == PolicyType::Pass,
        })
    }

    /// Install a route, treating "already there" (I7 for the routing
    /// table — kernel returns `EEXIST` when another SA already routes
    /// this subnet) as success.
    pub fn install(&self, route: &RouteSpec) -> Result<RouteStatus> {
        self.routing.add_route(route).map_err(|e| match e {
            IpsecError::AlreadyExists { .. } => e,
            other => other,
        })
    }

    pub fn uninstall(&self, route: &RouteSpec) -> Result<RouteStatus> {
        self.routing.del_route(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::StaticSettings;

    struct StubRouting {
        nexthop: Option<Host>,
        interface: Option<String>,
    }

    impl RoutingPort for StubRouting {
        fn get_interface(&self, _host: &Host) -> Option<String> {
            self.interface.clone()
        }
        fn get_nexthop(&self, _dst: &Host, _prefixlen: i32, _src: &Host) -> Option<Host> {
            self.nexthop
        }
        fn get_address_by_ts(&self, _ts: &TrafficSelector) -> Option<Host> {
            None
        }
        fn add_route(&self, _route: &RouteSpec) -> Result<RouteStatus> {
            Ok(RouteStatus::Success)
        }
        fn del_route(&self, _route: &RouteSpec) -> Result<RouteStatus> {
            Ok(RouteStatus::Success)
        }
    }

    fn subnet_ts(addr: &str, prefixlen: u8) -> TrafficSelector {
        TrafficSelector::from_subnet(addr.parse().unwrap(), prefixlen)
    }

    #[test]
    fn inbound_policies_never_get_a_route() {
        let routing = StubRouting {
            nexthop: None,
            interface: None,
        };
        let settings = StaticSettings::default();
        let mgr = RouteManager::new(&routing, &settings);
        let local = Host::new("1.1.1.1".parse().unwrap(), 0);
        let remote = Host::new("2.2.2.2".parse().unwrap(), 0);
        let decision = mgr.decide(
            Direction::In,
            PolicyType::Ipsec,
            false,
            0,
            &local,
            &remote,
            &subnet_ts("10.0.0.0", 24),
            &subnet_ts("192.168.1.0", 24),
        );
        assert!(matches!(
            decision,
            RouteDecision::Skip(RouteSkipReason::NotOutbound)
        ));
    }

    #[test]
    fn outbound_subnet_policy_produces_a_route() {
        let routing = StubRouting {
            nexthop: Some(Host::new("10.0.0.1".parse().unwrap(), 0)),
            interface: Some("eth0".to_string()),
        };
        let settings = StaticSettings::default();
        let mgr = RouteManager::new(&routing, &settings);
        let local = Host::new("1.1.1.1".parse().unwrap(), 0);
        let remote = Host::new("2.2.2.2".parse().unwrap(), 0);
        let decision = mgr.decide(
            Direction::Out,
            PolicyType::Ipsec,
            false,
            0,
            &local,
            &remote,
            &subnet_ts("10.0.0.0", 24),
            &subnet_ts("192.168.1.0", 24),
        );
        match decision {
            RouteDecision::Install(spec) => {
                assert_eq!(spec.prefixlen, 24);
                assert_eq!(spec.if_name, "eth0");
            }
            RouteDecision::Skip(reason) => panic!("unexpected skip: {reason:?}"),
        }
    }

    #[test]
    fn transport_mode_ipsec_policy_skips_routing() {
        let routing = StubRouting {
            nexthop: Some(Host::new("10.0.0.1".parse().unwrap(), 0)),
            interface: Some("eth0".to_string()),
        };
        let settings = StaticSettings::default();
        let mgr = RouteManager::new(&routing, &settings);
        let local = Host::new("1.1.1.1".parse().unwrap(), 0);
        let remote = Host::new("2.2.2.2".parse().unwrap(), 0);
        let decision = mgr.decide(
            Direction::Out,
            PolicyType::Ipsec,
            true,
            0,
            &local,
            &remote,
            &subnet_ts("10.0.0.0", 24),
            &subnet_ts("192.168.1.0", 24),
        );
        assert!(matches!(
            decision,
            RouteDecision::Skip(RouteSkipReason::TransportModeIpsecPolicy)
        ));
    }

    #[test]
    fn pass_policy_routes_even_in_transport_mode() {
        let routing = StubRouting {
            nexthop: Some(Host::new("10.0.0.1".parse().unwrap(), 0)),
            interface: Some("eth0".to_string()),
        };
        let settings = StaticSettings::default();
        let mgr = RouteManager::new(&routing, &settings);
        let local = Host::new("1.1.1.1".parse().unwrap(), 0);
        let remote = Host::new("2.2.2.2".parse().unwrap(), 0);
        let decision = mgr.decide(
            Direction::Out,
            PolicyType::Pass,
            true,
            0,
            &local,
            &remote,
            &subnet_ts("10.0.0.0", 24),
            &subnet_ts("192.168.1.0", 24),
        );
        assert!(matches!(decision, RouteDecision::Install(_)));
    }

    #[test]
    fn interface_bound_policy_skips_routing_without_virtual_if_setting() {
        let routing = StubRouting {
            nexthop: Some(Host::new("10.0.0.1".parse().unwrap(), 0)),
            interface: Some("eth0".to_string()),
        };
        let settings = StaticSettings::default();
        let mgr = RouteManager::new(&routing, &settings);
        let local = Host::new("1.1.1.1".parse().unwrap(), 0);
        let remote = Host::new("2.2.2.2".parse().unwrap(), 0);
        let decision = mgr.decide(
            Direction::Out,
            PolicyType::Ipsec,
            false,
            7,
            &local,
            &remote,
            &subnet_ts("10.0.0.0", 24),
            &subnet_ts("192.168.1.0", 24),
        );
        assert!(matches!(
            decision,
            RouteDecision::Skip(RouteSkipReason::BoundToInterfaceWithoutVirtualRouting)
        ));
    }

    struct StubVirtualIf;
    impl VirtualInterfaceLookup for StubVirtualIf {
        fn find(&self, if_id: u32) -> Option<String> {
            (if_id == 7).then(|| "xfrm7".to_string())
        }
    }

    #[test]
    fn interface_bound_policy_routes_via_virtual_interface_when_enabled() {
        let routing = StubRouting {
            nexthop: Some(Host::new("10.0.0.1".parse().unwrap(), 0)),
            interface: Some("eth0".to_string()),
        };
        let mut settings = StaticSettings::default();
        settings.install_routes_via_virtual_if = true;
        let virtual_if = StubVirtualIf;
        let mgr = RouteManager::new(&routing, &settings).with_virtual_interfaces(&virtual_if);
        let local = Host::new("1.1.1.1".parse().unwrap(), 0);
        let remote = Host::new("2.2.2.2".parse().unwrap(), 0);
        let decision = mgr.decide(
            Direction::Out,
            PolicyType::Ipsec,
            false,
            7,
            &local,
            &remote,
            &subnet_ts("10.0.0.0", 24),
            &subnet_ts("192.168.1.0", 24),
        );
        match decision {
            RouteDecision::Install(spec) => {
                assert_eq!(spec.if_name, "xfrm7");
                assert!(spec.gateway.is_none());
            }
            RouteDecision::Skip(reason) => panic!("unexpected skip: {reason:?}"),
        }
    }

    #[test]
    fn pinned_port_selector_skips_routing_by_default() {
        let routing = StubRouting {
            nexthop: None,
            interface: None,
        };
        let settings = StaticSettings::default();
        let mgr = RouteManager::new(&routing, &settings);
        let local = Host::new("1.1.1.1".parse().unwrap(), 0);
        let remote = Host::new("2.2.2.2".parse().unwrap(), 0);
        let mut dst_ts = subnet_ts("192.168.1.0", 24);
        dst_ts.from_port = 443;
        dst_ts.to_port = 443;
        let decision = mgr.decide(
            Direction::Out,
            PolicyType::Ipsec,
            false,
            0,
            &local,
            &remote,
            &subnet_ts("10.0.0.0", 24),
            &dst_ts,
        );
        assert!(matches!(
            decision,
            RouteDecision::Skip(RouteSkipReason::ProtocolOrPortPinned)
        ));
    }
}
