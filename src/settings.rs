// SPDX-License-Identifier: MIT

//! The `Settings` port (§6): tunables the owning IKE daemon's own
//! configuration layer (VICI/strings parsing, out of scope here) is
//! expected to back. `StaticSettings` gives the documented defaults for
//! tests and for callers without a dynamic config layer.

/// IPTFS (RFC 9347) tunables, split out because they only apply when an
/// SA's mode is `SaMode::IpTfs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IptfsSettings {
    pub drop_time_us: u32,
    pub reorder_window: u16,
    pub init_delay: u32,
    pub max_queue_size: u32,
    pub packet_size: u32,
    pub dont_fragment: bool,
}

impl Default for IptfsSettings {
    fn default() -> Self {
        IptfsSettings {
            drop_time_us: 1_000_000,
            reorder_window: 3,
            init_delay: 0,
            max_queue_size: 1_048_576,
            packet_size: 0,
            dont_fragment: false,
        }
    }
}

/// Hash-threshold tunables for the kernel's policy lookup table, one pair
/// per address family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashThreshold {
    pub lbits: u8,
    pub rbits: u8,
}

/// Tunables governing the kernel SPI allocation range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpiRange {
    pub min: u32,
    pub max: u32,
}

impl SpiRange {
    /// Normalizes an inverted range (`min > max`) by swapping, per §6.
    pub fn normalized(min: u32, max: u32) -> Self {
        if min > max {
            SpiRange { min: max, max: min }
        } else {
            SpiRange { min, max }
        }
    }
}

/// The full settings surface consumed by the kernel IPsec manager.
pub trait Settings: Send + Sync {
    fn install_routes(&self) -> bool {
        true
    }
    fn install_routes_via_virtual_if(&self) -> bool {
        false
    }
    fn proto_port_on_transport_sa(&self) -> bool {
        false
    }
    fn policy_update_always(&self) -> bool {
        false
    }
    fn port_bypass(&self) -> bool {
        false
    }
    fn iptfs(&self) -> IptfsSettings {
        IptfsSettings::default()
    }
    fn spi_range(&self) -> SpiRange {
        SpiRange { min: 0x100, max: 0x0fff_ffff }
    }
    fn hash_threshold_ipv4(&self) -> HashThreshold {
        HashThreshold { lbits: 32, rbits: 32 }
    }
    fn hash_threshold_ipv6(&self) -> HashThreshold {
        HashThreshold { lbits: 128, rbits: 128 }
    }
}

/// A plain, immutable implementation of [`Settings`] backed by
/// constructor-supplied values, with [`Default`] giving exactly the
/// defaults table in §6.
#[derive(Clone, Debug)]
pub struct StaticSettings {
    pub install_routes: bool,
    pub install_routes_via_virtual_if: bool,
    pub proto_port_on_transport_sa: bool,
    pub policy_update_always: bool,
    pub port_bypass: bool,
    pub iptfs: IptfsSettings,
    pub spi_range: SpiRange,
    pub hash_threshold_ipv4: HashThreshold,
    pub hash_threshold_ipv6: HashThreshold,
}

impl Default for StaticSettings {
    fn default() -> Self {
        StaticSettings {
            install_routes: true,
            install_routes_via_virtual_if: false,
            proto_port_on_transport_sa: false,
            policy_update_always: false,
            port_bypass: false,
            iptfs: IptfsSettings::default(),
            spi_range: SpiRange::normalized(0x100, 0x0fff_ffff),
            hash_threshold_ipv4: HashThreshold { lbits: 32, rbits: 32 },
            hash_threshold_ipv6: HashThreshold { lbits: 128, rbits: 128 },
        }
    }
}

impl Settings for StaticSettings {
    fn install_routes(&self) -> bool {
        self.install_routes
    }
    fn install_routes_via_virtual_if(&self) -> bool {
        self.install_routes_via_virtual_if
    }
    fn proto_port_on_transport_sa(&self) -> bool {
        self.proto_port_on_transport_sa
    }
    fn policy_update_always(&self) -> bool {
        self.policy_update_always
    }
    fn port_bypass(&self) -> bool {
        self.port_bypass
    }
    fn iptfs(&self) -> IptfsSettings {
        self.iptfs
    }
    fn spi_range(&self) -> SpiRange {
        self.spi_range
    }
    fn hash_threshold_ipv4(&self) -> HashThreshold {
        self.hash_threshold_ipv4
    }
    fn hash_threshold_ipv6(&self) -> HashThreshold {
        self.hash_threshold_ipv6
    }
}
