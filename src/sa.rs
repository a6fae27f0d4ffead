// SPDX-License-Identifier: MIT

//! §3/§4.1: the content-interned `IpsecSa` registry.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use foldhash::fast::FixedState;
use std::hash::BuildHasher;

use crate::selector::{Host, Mark};

/// IPsec encapsulation mode, mapped 1:1 onto the kernel's `XFRM_MODE_*`
/// constants by the translator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SaMode {
    Transport,
    Tunnel,
    Beet,
    IpTfs,
}

/// Delegation of IPsec processing to a network device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum HwOffload {
    #[default]
    None,
    Crypto,
    Packet,
    Auto,
}

/// A keyed transform: an IKEv2 algorithm identifier plus its key and,
/// for integrity algorithms, an explicit truncation length (0 meaning
/// "use the algorithm's default").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Transform {
    pub ikev2_id: u16,
    pub key: Vec<u8>,
    pub trunc_len: u16,
}

impl Transform {
    pub fn new(ikev2_id: u16, key: Vec<u8>) -> Self {
        Transform {
            ikev2_id,
            key,
            trunc_len: 0,
        }
    }
}

/// ESP parameters: present iff `Some`. AEAD and classic enc+auth are
/// mutually exclusive, mirroring the original's `data->aead`/
/// `data->enc_alg` branch in `add_sa`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EspConfig {
    pub spi: u32,
    pub aead: Option<Transform>,
    pub encryption: Option<Transform>,
    pub integrity: Option<Transform>,
    pub tfc_pad: u32,
    pub esn: bool,
    pub replay_window: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AhConfig {
    pub spi: u32,
    pub integrity: Transform,
    pub esn: bool,
    pub replay_window: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IpCompConfig {
    pub cpi: u16,
    pub transform: u16,
}

/// Inbound IPTFS tunables (§4.3): drop-time and reorder window. Outbound
/// tunables (init-delay, max-queue, packet-size, don't-fragment) live on
/// [`crate::settings::IptfsSettings`] since they are process-wide, not
/// per-SA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IptfsInbound {
    pub drop_time_us: u32,
    pub reorder_window: u16,
}

/// Everything about an SA that is not part of its interning identity but
/// is needed to build kernel ADD/UPDATE requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SaConfig {
    pub reqid: u32,
    pub mode: Option<SaMode>,
    pub esp: Option<EspConfig>,
    pub ah: Option<AhConfig>,
    pub ipcomp: Option<IpCompConfig>,
    pub iptfs_inbound: Option<IptfsInbound>,
}

impl SaConfig {
    pub fn mode(&self) -> SaMode {
        self.mode.unwrap_or(SaMode::Tunnel)
    }
}

impl Default for SaMode {
    fn default() -> Self {
        SaMode::Tunnel
    }
}

/// Parameters used to intern (or re-reference) an [`IpsecSa`].
#[derive(Clone, Debug)]
pub struct IpsecSaParams {
    pub src: Host,
    pub dst: Host,
    pub mark: Mark,
    pub if_id: u32,
    pub hw_offload: HwOffload,
    pub cfg: SaConfig,
}

/// Content fingerprint identifying an [`IpsecSa`]; stable across calls
/// within the process but not guaranteed stable across versions of this
/// crate (only an in-process cache key, never persisted — §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SaFingerprint(u64);

fn fingerprint(params: &IpsecSaParams) -> SaFingerprint {
    let mut hasher = FixedState::default().build_hasher();
    hash_ip(&mut hasher, &params.src.addr);
    hash_ip(&mut hasher, &params.dst.addr);
    params.mark.hash(&mut hasher);
    params.if_id.hash(&mut hasher);
    params.hw_offload.hash(&mut hasher);
    params.cfg.hash(&mut hasher);
    SaFingerprint(hasher.finish())
}

fn hash_ip<H: Hasher>(hasher: &mut H, addr: &std::net::IpAddr) {
    match addr {
        std::net::IpAddr::V4(a) => a.octets().hash(hasher),
        std::net::IpAddr::V6(a) => a.octets().hash(hasher),
    }
}

/// An interned, reference-counted SA descriptor (§3). `IpsecSa`s are
/// never mutated in place after creation; an "update" always means
/// releasing the old reference and interning a new one.
#[derive(Clone, Debug)]
pub struct IpsecSa {
    pub src: Host,
    pub dst: Host,
    pub mark: Mark,
    pub if_id: u32,
    pub hw_offload: HwOffload,
    pub cfg: SaConfig,
    ref_count: u32,
}

impl IpsecSa {
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// A reference-counted handle into the [`SaTable`]. Dropping it does
/// *not* release the reference — callers must call
/// [`SaTable::release`] explicitly (mirrors `PolicySa` owning exactly
/// one reference per I2, released only when the owning `PolicySa` is
/// itself destroyed under the table mutex).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SaHandle(SaFingerprint);

/// Content-interning registry of [`IpsecSa`] descriptors (§4.1). All
/// operations are expected to run under the caller's table mutex (the
/// `PolicyTable`'s `M`, per §5) — this type performs no locking of its
/// own.
#[derive(Default)]
pub struct SaTable {
    entries: HashMap<SaFingerprint, IpsecSa>,
}

impl SaTable {
    pub fn new() -> Self {
        SaTable {
            entries: HashMap::new(),
        }
    }

    /// Intern `params`, incrementing the reference count of a matching
    /// existing entry or inserting a new one with `ref_count = 1`.
    pub fn intern(&mut self, params: IpsecSaParams) -> SaHandle {
        let fp = fingerprint(&params);
        self.entries
            .entry(fp)
            .and_modify(|sa| sa.ref_count += 1)
            .or_insert_with(|| IpsecSa {
                src: params.src,
                dst: params.dst,
                mark: params.mark,
                if_id: params.if_id,
                hw_offload: params.hw_offload,
                cfg: params.cfg,
                ref_count: 1,
            });
        SaHandle(fp)
    }

    /// Release one reference; removes the entry once it reaches zero (I1).
    pub fn release(&mut self, handle: SaHandle) {
        if let std::collections::hash_map::Entry::Occupied(mut entry) = self.entries.entry(handle.0) {
            let sa = entry.get_mut();
            debug_assert!(sa.ref_count >= 1);
            sa.ref_count = sa.ref_count.saturating_sub(1);
            if sa.ref_count == 0 {
                entry.remove();
            }
        }
    }

    pub fn get(&self, handle: SaHandle) -> Option<&IpsecSa> {
        self.entries.get(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(reqid: u32) -> IpsecSaParams {
        IpsecSaParams {
            src: Host::new("1.1.1.1".parse().unwrap(), 0),
            dst: Host::new("2.2.2.2".parse().unwrap(), 0),
            mark: Mark::NONE,
            if_id: 0,
            hw_offload: HwOffload::None,
            cfg: SaConfig {
                reqid,
                ..Default::default()
            },
        }
    }

    #[test]
    fn interning_law_holds_across_intern_release() {
        let mut table = SaTable::new();
        let h1 = table.intern(params(1));
        let h2 = table.intern(params(1));
        assert_eq!(h1, h2);
        assert_eq!(table.get(h1).unwrap().ref_count(), 2);

        table.release(h1);
        assert_eq!(table.get(h2).unwrap().ref_count(), 1);
        assert!(!table.is_empty());

        table.release(h2);
        assert!(table.get(h2).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn distinct_content_gets_distinct_entries() {
        let mut table = SaTable::new();
        let h1 = table.intern(params(1));
        let h2 = table.intern(params(2));
        assert_ne!(h1, h2);
        assert_eq!(table.len(), 2);
    }
}
