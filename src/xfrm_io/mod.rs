// SPDX-License-Identifier: MIT

//! Low-level, ergonomic wrapper around the XFRM netlink family, built the
//! same way the `rust-netlink` family of crates wraps other netlink
//! families: request builders that collect attributes with a fluent API
//! and execute over a shared, cloneable [`Handle`].
//!
//! This module is the crate's *default* [`crate::ports::KernelIpsecIo`]
//! backend (see [`crate::ports::xfrm`]); nothing above it depends on these
//! types directly, so an alternate backend (e.g. for tests, or a non-Linux
//! kernel) only has to implement the port trait.

mod connection;
pub use connection::*;

mod errors;
pub use errors::*;

mod handle;
pub use handle::*;

pub(crate) mod macros;

pub mod policy;
pub use policy::{PolicyHandle, PolicyModifyRequest};

pub mod state;
pub use state::{StateHandle, StateModifyRequest};
