// SPDX-License-Identifier: MIT

//! §3 data model: `Host`, `TrafficSelector`, `Mark`, and the fixed-width
//! kernel `Selector`, plus the conversions between them grounded on
//! `ts2selector`/`selector2ts`/`ts2subnet`/`ts2ports`/`port_mask_bits` in
//! `kernel_netlink_ipsec.c`.

use std::net::IpAddr;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_ICMPV6: u8 = 58;

/// An IP endpoint, optionally carrying a port. Two hosts are equal iff
/// their addresses are equal; the port is informational (used by SAs for
/// NAT-T, not for SA/policy identity).
#[derive(Clone, Copy, Debug)]
pub struct Host {
    pub addr: IpAddr,
    pub port: u16,
}

impl Host {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Host { addr, port }
    }

    /// `0.0.0.0` / `::` with port 0 — the kernel's "any" endpoint.
    pub fn is_any(&self) -> bool {
        self.addr.is_unspecified() && self.port == 0
    }

    pub fn ip_equals(&self, other: &Host) -> bool {
        self.addr == other.addr
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.ip_equals(other)
    }
}
impl Eq for Host {}

/// `(value, mask)`; mask 0 means "no mark applied". Equality is field-wise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Mark {
    pub value: u32,
    pub mask: u32,
}

impl Mark {
    pub const NONE: Mark = Mark { value: 0, mask: 0 };

    pub fn is_set(&self) -> bool {
        self.mask != 0
    }
}

/// A higher-level, range-based traffic selector as used by IKE: an
/// address range plus a port range, rather than the kernel's fixed-width
/// prefix+mask form.
#[derive(Clone, Debug)]
pub struct TrafficSelector {
    pub is_ipv4: bool,
    /// 0 means "any protocol".
    pub protocol: u8,
    /// Inclusive address range. For a /N prefix this is the first and
    /// last address of the subnet; arbitrary ranges are also allowed, the
    /// same as the original's `traffic_selector_t`.
    pub from_addr: IpAddr,
    pub to_addr: IpAddr,
    pub from_port: u16,
    pub to_port: u16,
}

impl TrafficSelector {
    pub fn from_subnet(addr: IpAddr, prefixlen: u8) -> Self {
        let (from, to) = subnet_bounds(addr, prefixlen);
        TrafficSelector {
            is_ipv4: addr.is_ipv4(),
            protocol: 0,
            from_addr: from,
            to_addr: to,
            from_port: 0,
            to_port: 65535,
        }
    }

    pub fn is_host(&self) -> bool {
        self.from_addr == self.to_addr
    }

    /// Mirrors `traffic_selector_t::to_subnet`: collapses the address
    /// range to the smallest covering subnet and its prefix length.
    pub fn to_subnet(&self) -> (IpAddr, u8) {
        to_subnet(self.from_addr, self.to_addr)
    }

    pub fn any_port(&self) -> bool {
        self.from_port == 0 && self.to_port == 65535
    }
}

fn subnet_bounds(addr: IpAddr, prefixlen: u8) -> (IpAddr, IpAddr) {
    match addr {
        IpAddr::V4(a) => {
            let bits = u32::from(a);
            let mask = if prefixlen == 0 {
                0
            } else {
                u32::MAX << (32 - prefixlen)
            };
            let network = bits & mask;
            let broadcast = network | !mask;
            (
                IpAddr::V4(network.into()),
                IpAddr::V4(broadcast.into()),
            )
        }
        IpAddr::V6(a) => {
            let bits = u128::from(a);
            let mask = if prefixlen == 0 {
                0
            } else {
                u128::MAX << (128 - prefixlen)
            };
            let network = bits & mask;
            let last = network | !mask;
            (IpAddr::V6(network.into()), IpAddr::V6(last.into()))
        }
    }
}

/// Smallest prefix length whose subnet covers `[from, to]`; this is what
/// `to_subnet()` computes in the original (it assumes a caller already
/// narrowed the range to something prefix-expressible, and widens the
/// prefix only as far as needed to include both bounds).
fn to_subnet(from: IpAddr, to: IpAddr) -> (IpAddr, u8) {
    match (from, to) {
        (IpAddr::V4(f), IpAddr::V4(t)) => {
            let f = u32::from(f);
            let t = u32::from(t);
            let mut prefixlen = 32u8;
            while prefixlen > 0 {
                let mask = u32::MAX << (32 - (prefixlen - 1));
                if (f & mask) != (t & mask) {
                    break;
                }
                prefixlen -= 1;
            }
            let mask = if prefixlen == 0 { 0 } else { u32::MAX << (32 - prefixlen) };
            (IpAddr::V4((f & mask).into()), prefixlen)
        }
        (IpAddr::V6(f), IpAddr::V6(t)) => {
            let f = u128::from(f);
            let t = u128::from(t);
            let mut prefixlen = 128u8;
            while prefixlen > 0 {
                let mask = u128::MAX << (128 - (prefixlen - 1));
                if (f & mask) != (t & mask) {
                    break;
                }
                prefixlen -= 1;
            }
            let mask = if prefixlen == 0 { 0 } else { u128::MAX << (128 - prefixlen) };
            (IpAddr::V6((f & mask).into()), prefixlen)
        }
        _ => panic!("mismatched address families in traffic selector"),
    }
}

/// Fixed-width selector, the kernel's `struct xfrm_selector` in spirit:
/// family, protocol, address ranges expressed as prefix+mask, and
/// port+mask pairs (with the ICMP type/code packing exception).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Selector {
    pub is_ipv4: bool,
    pub proto: u8,
    pub daddr: [u8; 16],
    pub prefixlen_d: u8,
    pub saddr: [u8; 16],
    pub prefixlen_s: u8,
    pub dport: u16,
    pub dport_mask: u16,
    pub sport: u16,
    pub sport_mask: u16,
    pub ifindex: i32,
}

/// Number of leading 1 bits in `ntohs(port_mask)` — property 4 of §8.
pub fn port_mask_bits(port_mask: u16) -> u32 {
    let mask = u16::from_be(port_mask);
    let mut bits = 0u32;
    let mut bit_mask = 0x8000u16;
    while bits < 16 {
        if mask & bit_mask == 0 {
            break;
        }
        bits += 1;
        bit_mask >>= 1;
    }
    bits
}

fn ip_to_bytes(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(a) => {
            let mut out = [0u8; 16];
            out[..4].copy_from_slice(&a.octets());
            out
        }
        IpAddr::V6(a) => a.octets(),
    }
}

fn bytes_to_ip(bytes: &[u8; 16], is_ipv4: bool) -> IpAddr {
    if is_ipv4 {
        IpAddr::from([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        IpAddr::from(*bytes)
    }
}

/// Port-range -> (port, mask). Single ports get an exact mask; ranges get
/// the widest mask expressible as a single (port, mask) pair, matching
/// the MSB-first bit walk in `ts2ports`.
fn ts2ports(from: u16, to: u16) -> (u16, u16) {
    if from == to {
        return (from, 0xffff);
    }
    let mut mask: u16 = 0;
    for bit in (0..16).rev() {
        let bitmask = 1u16 << bit;
        if (bitmask & from) != (bitmask & to) {
            return (from & mask, mask);
        }
        mask |= bitmask;
    }
    (from & mask, mask)
}

/// Inverse of `ts2ports`: recover a port or the widest range the mask
/// permits.
fn ports2ts(port: u16, mask: u16) -> (u16, u16) {
    if mask == 0xffff {
        (port, port)
    } else {
        (port & mask, port | !mask)
    }
}

/// `ts2selector`: build a kernel selector from a traffic-selector pair.
pub fn ts2selector(src: &TrafficSelector, dst: &TrafficSelector, ifindex: i32) -> Selector {
    let (dnet, dprefix) = dst.to_subnet();
    let (snet, sprefix) = src.to_subnet();
    let (mut dport, mut dport_mask) = ts2ports(dst.from_port, dst.to_port);
    let (mut sport, mut sport_mask) = ts2ports(src.from_port, src.to_port);

    let proto = src.protocol.max(dst.protocol);

    if (proto == IPPROTO_ICMP || proto == IPPROTO_ICMPV6) && (dport != 0 || sport != 0) {
        // The kernel expects ICMP type in the source port field and code
        // in the destination port field.
        let packed = dport.max(sport);
        let icmp_type = (packed >> 8) as u8;
        let icmp_code = (packed & 0xff) as u8;
        sport = icmp_type as u16;
        sport_mask = if sport != 0 { 0xffff } else { 0 };
        dport = icmp_code as u16;
        dport_mask = if dport != 0 { 0xffff } else { 0 };
    }

    Selector {
        is_ipv4: src.is_ipv4,
        proto,
        daddr: ip_to_bytes(dnet),
        prefixlen_d: dprefix,
        saddr: ip_to_bytes(snet),
        prefixlen_s: sprefix,
        dport,
        dport_mask,
        sport,
        sport_mask,
        ifindex,
    }
}

/// `selector2ts`: recover a (src, dst) traffic selector pair from a
/// kernel selector. The ICMP packing is reversed symmetrically to how it
/// was applied; exact type/code round-trips, but a selector built from a
/// port *range* does not roundtrip through the ICMP packing (neither does
/// the original, which only ever builds singleton ICMP ports).
pub fn selector2ts(sel: &Selector) -> (TrafficSelector, TrafficSelector) {
    let src_addr = bytes_to_ip(&sel.saddr, sel.is_ipv4);
    let dst_addr = bytes_to_ip(&sel.daddr, sel.is_ipv4);

    let (mut sport, mut sport_to) = if sel.sport_mask != 0 {
        ports2ts(sel.sport, sel.sport_mask)
    } else {
        (0, 65535)
    };
    let (mut dport, mut dport_to) = if sel.dport_mask != 0 {
        ports2ts(sel.dport, sel.dport_mask)
    } else {
        (0, 65535)
    };

    if sel.proto == IPPROTO_ICMP || sel.proto == IPPROTO_ICMPV6 {
        let icmp_type = sel.sport as u8;
        let icmp_code = sel.dport as u8;
        let packed = ((icmp_type as u16) << 8) | icmp_code as u16;
        sport = packed;
        sport_to = packed;
        dport = packed;
        dport_to = packed;
    }

    let src = TrafficSelector {
        is_ipv4: sel.is_ipv4,
        protocol: sel.proto,
        from_addr: src_addr,
        to_addr: {
            let (_, bound) = subnet_bounds(src_addr, sel.prefixlen_s);
            bound
        },
        from_port: sport,
        to_port: sport_to,
    };
    let dst = TrafficSelector {
        is_ipv4: sel.is_ipv4,
        protocol: sel.proto,
        from_addr: dst_addr,
        to_addr: {
            let (_, bound) = subnet_bounds(dst_addr, sel.prefixlen_d);
            bound
        },
        from_port: dport,
        to_port: dport_to,
    };
    (src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mask_bits_matches_leading_ones() {
        assert_eq!(port_mask_bits(0xffff), 16);
        assert_eq!(port_mask_bits(0x0000), 0);
        assert_eq!(port_mask_bits(u16::from_be(0xff00)), 8);
    }

    #[test]
    fn single_port_roundtrips() {
        let (port, mask) = ts2ports(500, 500);
        assert_eq!(mask, 0xffff);
        let (from, to) = ports2ts(port, mask);
        assert_eq!((from, to), (500, 500));
    }

    #[test]
    fn icmp_type_code_pack_and_unpack() {
        let src = TrafficSelector {
            is_ipv4: true,
            protocol: IPPROTO_ICMP,
            from_addr: "10.0.0.5".parse().unwrap(),
            to_addr: "10.0.0.5".parse().unwrap(),
            from_port: 8,
            to_port: 8,
        };
        let dst = TrafficSelector {
            is_ipv4: true,
            protocol: IPPROTO_ICMP,
            from_addr: "192.168.1.5".parse().unwrap(),
            to_addr: "192.168.1.5".parse().unwrap(),
            from_port: 0,
            to_port: 0,
        };
        let sel = ts2selector(&src, &dst, 0);
        assert_eq!(sel.sport as u8, 8);
        let (rsrc, _) = selector2ts(&sel);
        assert_eq!(rsrc.from_port as u8, 8);
    }
}
