// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Crate-wide error taxonomy, following §7 of the design: internal retries
/// (NEW→UPDATE, packet→crypto offload fallback) are resolved before an
/// error ever reaches a caller, so what's left here is either terminal or
/// explicitly recoverable by the caller (e.g. `NotFound` on delete).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IpsecError {
    /// The kernel rejected a request and no internal retry applies.
    #[error("kernel rejected {op} for policy/SA {subject}: {source}")]
    KernelFailure {
        op: &'static str,
        subject: String,
        #[source]
        source: crate::xfrm_io::Error,
    },

    /// Caller asked to delete or query something the kernel has no record of.
    #[error("{op}: not found ({subject})")]
    NotFound { op: &'static str, subject: String },

    /// Caller asked to add something the kernel already has (surfaced only
    /// when the NEW→UPDATE retry itself then fails).
    #[error("{op}: already exists and update retry failed ({subject})")]
    AlreadyExists { op: &'static str, subject: String },

    /// An input could not be marshaled into a kernel request: unknown
    /// algorithm, oversized security label, or similar.
    #[error("cannot translate {what}: {reason}")]
    Translation { what: &'static str, reason: String },

    /// Hardware offload was requested but neither the kernel nor the
    /// device will honor it, and no `Auto` fallback applies.
    #[error("hardware offload unsupported for {subject}")]
    OffloadUnsupported { subject: String },

    /// Route install/uninstall failed. Carried separately from
    /// `KernelFailure` because route errors never fail the owning policy
    /// operation unless the policy is a shunt (§4.5).
    #[error("route operation failed for {dst_net}: {reason}")]
    Route { dst_net: String, reason: String },

    /// A kernel event payload could not be parsed; the event is dropped
    /// and the reactor keeps running.
    #[error("malformed {kind} event: {reason}")]
    EventParse { kind: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IpsecError {
    pub fn kernel_failure(op: &'static str, subject: impl Into<String>, source: crate::xfrm_io::Error) -> Self {
        IpsecError::KernelFailure {
            op,
            subject: subject.into(),
            source,
        }
    }

    pub fn not_found(op: &'static str, subject: impl Into<String>) -> Self {
        IpsecError::NotFound {
            op,
            subject: subject.into(),
        }
    }

    pub fn already_exists(op: &'static str, subject: impl Into<String>) -> Self {
        IpsecError::AlreadyExists {
            op,
            subject: subject.into(),
        }
    }

    pub fn translation(what: &'static str, reason: impl Into<String>) -> Self {
        IpsecError::Translation {
            what,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IpsecError>;
