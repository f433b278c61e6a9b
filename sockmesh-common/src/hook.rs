//! Dispatch of `sock_ops` callbacks.
//!
//! Established connections are classified and registered; state changes for
//! registered sockets are traced on teardown; everything else is traced as
//! unsupported. The hook always answers 0, a failing table write never fails
//! the connection itself.

use crate::endpoint::{self, EndpointIndex, ServiceAddr};
use crate::flow::{self, SockKey, SockOps};
use crate::table::{ConnectionTable, RedirectTable};
use crate::{AF_INET, AF_INET6, redirect, registrar};

pub const BPF_SOCK_OPS_ACTIVE_ESTABLISHED_CB: u32 = 4;
pub const BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB: u32 = 5;
pub const BPF_SOCK_OPS_STATE_CB: u32 = 10;

pub const BPF_TCP_CLOSE: u32 = 7;
pub const BPF_TCP_CLOSE_WAIT: u32 = 8;
pub const BPF_TCP_LAST_ACK: u32 = 9;

/// Observability points of the hook. None of them changes control flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Diagnostic {
    /// The local side is a workload endpoint of `service`.
    EndpointResolved { key: SockKey, service: ServiceAddr },
    /// The local side is not a known endpoint.
    EndpointMissing { key: SockKey },
    /// A translation entry was rejected for a reason other than a lost race.
    RedirectInsertFailed { key: SockKey, err: i64 },
    /// The socket is now reachable through the connection table.
    Registered { key: SockKey, op: u32 },
    /// The socket could not be put in the connection table.
    ConnectionInsertFailed { key: SockKey, err: i64 },
    /// State callbacks could not be enabled for a registered socket.
    CbFlagsFailed(i64),
    /// A registered socket entered a closing state.
    Teardown { old_state: u32, new_state: u32 },
    UnsupportedFamily(u32),
    UnsupportedOp(u32),
}

/// Sink for [`Diagnostic`]s.
pub trait Trace {
    fn emit(&self, diagnostic: Diagnostic);
}

/// The classification core, bound to the three shared tables.
pub struct SockOpsHook<'a, E: ?Sized, R: ?Sized, C: ?Sized> {
    endpoints: &'a E,
    redirects: &'a R,
    connections: &'a C,
}

impl<'a, E, R, C> SockOpsHook<'a, E, R, C>
where
    E: EndpointIndex + ?Sized,
    R: RedirectTable + ?Sized,
    C: ?Sized,
{
    pub const fn new(endpoints: &'a E, redirects: &'a R, connections: &'a C) -> Self {
        SockOpsHook {
            endpoints,
            redirects,
            connections,
        }
    }

    /// Entry point for one `sock_ops` invocation.
    #[inline(always)]
    pub fn handle<S, T>(&self, sock: &S, trace: &T) -> u32
    where
        S: SockOps + ?Sized,
        C: ConnectionTable<S>,
        T: Trace + ?Sized,
    {
        match sock.op() {
            BPF_SOCK_OPS_ACTIVE_ESTABLISHED_CB | BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB => {
                self.established(sock, trace)
            }
            BPF_SOCK_OPS_STATE_CB => state_changed(sock, trace),
            op => trace.emit(Diagnostic::UnsupportedOp(op)),
        }
        0
    }

    #[inline(always)]
    fn established<S, T>(&self, sock: &S, trace: &T)
    where
        S: SockOps + ?Sized,
        C: ConnectionTable<S>,
        T: Trace + ?Sized,
    {
        const INET: u32 = AF_INET as u32;
        const INET6: u32 = AF_INET6 as u32;

        match sock.family() {
            INET => self.ipv4(sock, trace),
            // Dual-stack sockets expose a mapped IPv4 peer in remote_ip4.
            INET6 if flow::carries_mapped_v4(sock) => self.ipv4(sock, trace),
            INET6 => self.ipv6(sock, trace),
            family => trace.emit(Diagnostic::UnsupportedFamily(family)),
        }
    }

    #[inline(always)]
    fn ipv4<S, T>(&self, sock: &S, trace: &T)
    where
        S: SockOps + ?Sized,
        C: ConnectionTable<S>,
        T: Trace + ?Sized,
    {
        let key = SockKey::from_v4(sock);

        match endpoint::resolve(self.endpoints, &key) {
            Some(service) => {
                trace.emit(Diagnostic::EndpointResolved { key, service });
                redirect::publish(self.redirects, trace, &key, &service);
            }
            None => trace.emit(Diagnostic::EndpointMissing { key }),
        }

        registrar::register(self.connections, trace, sock, &key);
    }

    // No service translation for native IPv6 yet, the endpoint map is
    // populated with IPv4 endpoints only.
    #[inline(always)]
    fn ipv6<S, T>(&self, sock: &S, trace: &T)
    where
        S: SockOps + ?Sized,
        C: ConnectionTable<S>,
        T: Trace + ?Sized,
    {
        let key = SockKey::from_v6(sock);
        registrar::register(self.connections, trace, sock, &key);
    }
}

#[inline(always)]
fn state_changed<S, T>(sock: &S, trace: &T)
where
    S: SockOps + ?Sized,
    T: Trace + ?Sized,
{
    let new_state = sock.arg(1);
    if matches!(
        new_state,
        BPF_TCP_CLOSE | BPF_TCP_CLOSE_WAIT | BPF_TCP_LAST_ACK
    ) {
        trace.emit(Diagnostic::Teardown {
            old_state: sock.arg(0),
            new_state,
        });
    }
}
