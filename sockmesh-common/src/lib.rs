//! Shared records and the connection-classification core of sockmesh.
//!
//! Everything in here runs inside the `sock_ops` eBPF program, so it is
//! `no_std`, allocation free and never panics. The kernel maps and the socket
//! context are only reached through [`SockOps`], [`EndpointIndex`],
//! [`RedirectTable`] and [`ConnectionTable`], so the same code runs on the
//! host against mock tables.
//!
//! ```text
//! sock_ops event -> hook -> flow (codec) -> endpoint (resolve)
//!                                         -> redirect (translation entries)
//!                                         -> registrar (sockhash entry)
//! ```
//!
//! With the `user` feature the records also implement `aya::Pod` and gain
//! `std::net` conversions for userspace consumers.

#![cfg_attr(not(any(test, feature = "user")), no_std)]

pub mod endpoint;
pub mod flow;
pub mod hook;
pub mod redirect;
pub mod registrar;
pub mod table;

#[cfg(feature = "user")]
mod user;

pub use endpoint::{EndpointIndex, EndpointKey, ServiceAddr};
pub use flow::{FlowAddr, SockKey, SockOps, port_key};
pub use hook::{Diagnostic, SockOpsHook, Trace};
pub use table::{ConnectionTable, InsertOutcome, RedirectTable};

/// `AF_INET`
pub const AF_INET: u8 = 2;
/// `AF_INET6`
pub const AF_INET6: u8 = 10;

/// Pinned name of the connection table (`SOCKHASH` keyed by [`SockKey`]).
pub const CONNECTION_TABLE: &str = "sock_ops_map";
/// Pinned name of the translation table (`SockKey -> SockKey`).
pub const REDIRECT_TABLE: &str = "sock_ops_aux_map";
/// Pinned name of the endpoint-to-service map (`EndpointKey -> ServiceAddr`).
pub const ENDPOINT_TABLE: &str = "endpoints_to_service_map";

pub const CONNECTION_TABLE_ENTRIES: u32 = 65535;
pub const REDIRECT_TABLE_ENTRIES: u32 = 65535;
pub const ENDPOINT_TABLE_ENTRIES: u32 = 1024;
