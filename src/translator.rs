// SPDX-License-Identifier: MIT

//! §4.3: the stateless Kernel Translator. This module holds the parts of
//! the translation layer that are pure functions of their inputs — the
//! algorithm-name tables, mode mapping, replay-window and hardware-offload
//! decision rules — grounded verbatim on `encryption_algs`/
//! `integrity_algs`/`compression_algs`/`get_replay_state`/
//! `add_hw_offload` in `kernel_netlink_ipsec.c`. The wire-level request
//! building that consumes these decisions lives in
//! [`crate::xfrm_io::kernel`], since it needs the concrete
//! `netlink-packet-xfrm` message types.

use crate::ports::AlgorithmType;
use crate::sa::{HwOffload, SaMode};

/// `(ikev2_id, kernel_crypto_api_name)`. Identifiers commented out in the
/// original (`***`, unsupported by the Linux crypto API) are simply
/// absent here rather than mapped to a placeholder.
const ENCRYPTION_ALGS: &[(u16, &str)] = &[
    (2, "des"),                                // ENCR_DES
    (3, "des3_ede"),                           // ENCR_3DES
    (6, "cast5"),                              // ENCR_CAST
    (7, "blowfish"),                           // ENCR_BLOWFISH
    (11, "cipher_null"),                       // ENCR_NULL
    (12, "aes"),                               // ENCR_AES_CBC
    (13, "rfc3686(ctr(aes))"),                 // ENCR_AES_CTR
    (14, "rfc4309(ccm(aes))"),                 // ENCR_AES_CCM_ICV8
    (15, "rfc4309(ccm(aes))"),                 // ENCR_AES_CCM_ICV12
    (16, "rfc4309(ccm(aes))"),                 // ENCR_AES_CCM_ICV16
    (18, "rfc4106(gcm(aes))"),                 // ENCR_AES_GCM_ICV8
    (19, "rfc4106(gcm(aes))"),                 // ENCR_AES_GCM_ICV12
    (20, "rfc4106(gcm(aes))"),                 // ENCR_AES_GCM_ICV16
    (21, "rfc4543(gcm(aes))"),                 // ENCR_NULL_AUTH_AES_GMAC
    (23, "cbc(camellia)"),                     // ENCR_CAMELLIA_CBC
    (65002, "serpent"),                        // ENCR_SERPENT_CBC (private use)
    (65003, "twofish"),                        // ENCR_TWOFISH_CBC (private use)
    (28, "rfc7539esp(chacha20,poly1305)"),      // ENCR_CHACHA20_POLY1305
];

const INTEGRITY_ALGS: &[(u16, &str)] = &[
    (1, "md5"),               // AUTH_HMAC_MD5_96
    (9, "hmac(md5)"),         // AUTH_HMAC_MD5_128
    (2, "sha1"),              // AUTH_HMAC_SHA1_96
    (10, "hmac(sha1)"),       // AUTH_HMAC_SHA1_160
    (12, "sha256"),           // AUTH_HMAC_SHA2_256_96
    (13, "hmac(sha256)"),     // AUTH_HMAC_SHA2_256_128
    (14, "hmac(sha256)"),     // AUTH_HMAC_SHA2_256_256 (truncation differs)
    (15, "hmac(sha384)"),     // AUTH_HMAC_SHA2_384_192
    (16, "hmac(sha384)"),     // AUTH_HMAC_SHA2_384_384
    (17, "hmac(sha512)"),     // AUTH_HMAC_SHA2_512_256
    (18, "hmac(sha512)"),     // AUTH_HMAC_SHA2_512_512
    (5, "xcbc(aes)"),         // AUTH_AES_XCBC_96
    (8, "cmac(aes)"),         // AUTH_AES_CMAC_96
];

const COMPRESSION_ALGS: &[(u16, &str)] = &[
    (2, "deflate"), // IPCOMP_DEFLATE
    (3, "lzs"),     // IPCOMP_LZS
    (4, "lzjh"),    // IPCOMP_LZJH
];

fn table_for(kind: AlgorithmType) -> &'static [(u16, &'static str)] {
    match kind {
        AlgorithmType::Encryption => ENCRYPTION_ALGS,
        AlgorithmType::Integrity => INTEGRITY_ALGS,
        AlgorithmType::Compression => COMPRESSION_ALGS,
    }
}

/// Look up an IKEv2 transform identifier in the built-in table. Returns
/// `None` on miss — the caller falls through to
/// [`crate::ports::UpperLayer::lookup_algorithm`] before failing with
/// `TranslationError` (§4.3).
pub fn lookup_builtin_algorithm(kind: AlgorithmType, ikev2_id: u16) -> Option<&'static str> {
    table_for(kind)
        .iter()
        .find(|(id, _)| *id == ikev2_id)
        .map(|(_, name)| *name)
}

/// Linux `XFRM_MODE_*` constants.
pub const XFRM_MODE_TRANSPORT: u8 = 0;
pub const XFRM_MODE_TUNNEL: u8 = 1;
pub const XFRM_MODE_BEET: u8 = 4;
pub const XFRM_MODE_IPTFS: u8 = 5;

pub fn mode2kernel(mode: SaMode) -> u8 {
    match mode {
        SaMode::Transport => XFRM_MODE_TRANSPORT,
        SaMode::Tunnel => XFRM_MODE_TUNNEL,
        SaMode::Beet => XFRM_MODE_BEET,
        SaMode::IpTfs => XFRM_MODE_IPTFS,
    }
}

/// Round a replay window (in bits) up to the nearest multiple of 32 and
/// express it in bytes — the size of the `XFRMA_REPLAY_ESN_VAL` bitmap.
pub fn replay_bitmap_len_bytes(window: u32) -> u32 {
    ((window + 31) / 32) * 4
}

/// §4.3 "Replay window semantics": decide the effective replay window
/// and whether the ESN bitmap attribute is required.
///
/// - Outbound SAs under direction enforcement (`sa_dir` kernel feature,
///   §6) always get window 0 — the kernel tracks replay state on the
///   inbound SA only once direction-aware.
/// - ESN requires window >= 1.
/// - Anything else uses the caller's configured window.
/// - A bitmap attribute (len = `round_up(window, 32)/8` bytes) is needed
///   whenever the window exceeds 32 bits or ESN is enabled.
pub struct ReplayDecision {
    pub window: u32,
    pub needs_bitmap: bool,
    pub bitmap_len_bytes: u32,
}

pub fn decide_replay_window(
    configured_window: u32,
    esn: bool,
    outbound: bool,
    sa_dir_enforced: bool,
) -> ReplayDecision {
    let window = if outbound && sa_dir_enforced {
        0
    } else if esn && configured_window == 0 {
        1
    } else {
        configured_window
    };
    let needs_bitmap = esn || window > 32;
    ReplayDecision {
        window,
        needs_bitmap,
        bitmap_len_bytes: if needs_bitmap {
            replay_bitmap_len_bytes(window.max(1))
        } else {
            0
        },
    }
}

/// §4.3 / `add_hw_offload`: decide which offload attribute (if any) to
/// attach to a request, and whether a fallback retry is available if the
/// kernel rejects it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffloadAttempt {
    /// Don't attach an offload attribute at all.
    None,
    /// Attach with this flag (`XFRM_OFFLOAD_PACKET` or no flag for
    /// crypto-only); `retry_as_crypto` says whether a rejected attempt
    /// should retry without the packet flag.
    Attach { packet: bool, retry_as_crypto: bool },
}

pub fn plan_hw_offload(mode: HwOffload) -> OffloadAttempt {
    match mode {
        HwOffload::None => OffloadAttempt::None,
        HwOffload::Crypto => OffloadAttempt::Attach {
            packet: false,
            retry_as_crypto: false,
        },
        HwOffload::Packet => OffloadAttempt::Attach {
            packet: true,
            retry_as_crypto: false,
        },
        HwOffload::Auto => OffloadAttempt::Attach {
            packet: true,
            retry_as_crypto: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_hits_and_misses() {
        assert_eq!(
            lookup_builtin_algorithm(AlgorithmType::Encryption, 12),
            Some("aes")
        );
        assert_eq!(lookup_builtin_algorithm(AlgorithmType::Encryption, 9999), None);
    }

    #[test]
    fn outbound_dir_enforced_forces_zero_window() {
        let d = decide_replay_window(32, false, true, true);
        assert_eq!(d.window, 0);
        assert!(!d.needs_bitmap);
    }

    #[test]
    fn esn_forces_nonzero_window_and_bitmap() {
        let d = decide_replay_window(0, true, false, false);
        assert_eq!(d.window, 1);
        assert!(d.needs_bitmap);
        assert_eq!(d.bitmap_len_bytes, 4);
    }

    #[test]
    fn large_window_needs_bitmap_even_without_esn() {
        let d = decide_replay_window(64, false, false, false);
        assert!(d.needs_bitmap);
        assert_eq!(d.bitmap_len_bytes, 8);
    }

    #[test]
    fn auto_offload_retries_as_crypto() {
        match plan_hw_offload(HwOffload::Auto) {
            OffloadAttempt::Attach { packet, retry_as_crypto } => {
                assert!(packet);
                assert!(retry_as_crypto);
            }
            _ => panic!("expected Attach"),
        }
    }
}
