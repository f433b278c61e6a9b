//! Flow identity: the key shared by the connection and translation tables.

use crate::{AF_INET, AF_INET6};

/// `127.0.0.6` as the kernel stores it in `remote_ip4` (network byte order).
///
/// Dual-stack sockets whose embedded IPv4 remote equals this address are
/// classified on their IPv6 identity instead.
pub const MAPPED_LOOPBACK_SENTINEL: u32 = u32::from_ne_bytes([127, 0, 0, 6]);

/// Read access to the `bpf_sock_ops` fields the hook consumes, plus the one
/// socket mutation it performs.
///
/// Field values are passed through exactly as the kernel exposes them:
/// addresses in network byte order, `local_port` in host byte order and
/// `remote_port` in network byte order in the upper 16 bits.
pub trait SockOps {
    fn op(&self) -> u32;
    fn family(&self) -> u32;
    fn local_ip4(&self) -> u32;
    fn remote_ip4(&self) -> u32;
    fn local_ip6(&self) -> [u32; 4];
    fn remote_ip6(&self) -> [u32; 4];
    fn local_port(&self) -> u32;
    fn remote_port(&self) -> u32;
    fn arg(&self, n: usize) -> u32;
    /// `bpf_sock_ops_cb_flags_set`
    fn set_cb_flags(&self, flags: i32) -> Result<(), i64>;
}

/// Normalizes a host-order port into the form stored in [`SockKey::sport`].
///
/// Every producer of a port-bearing key goes through here so keys computed
/// independently for the same connection compare equal.
#[inline(always)]
pub const fn port_key(port: u32) -> u32 {
    port.to_be() >> 16
}

/// An address read out of a [`SockKey`] according to its family tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FlowAddr {
    /// Network byte order.
    V4(u32),
    /// Four network-order words.
    V6([u32; 4]),
}

impl FlowAddr {
    #[inline(always)]
    pub const fn family(self) -> u8 {
        match self {
            FlowAddr::V4(_) => AF_INET,
            FlowAddr::V6(_) => AF_INET6,
        }
    }

    /// Storage words as laid out in the key. IPv4 occupies word 0 only.
    #[inline(always)]
    pub const fn words(self) -> [u32; 4] {
        match self {
            FlowAddr::V4(ip) => [ip, 0, 0, 0],
            FlowAddr::V6(ip) => ip,
        }
    }

    #[inline(always)]
    const fn read(family: u8, words: &[u32; 4]) -> Option<Self> {
        match family {
            AF_INET => Some(FlowAddr::V4(words[0])),
            AF_INET6 => Some(FlowAddr::V6(*words)),
            _ => None,
        }
    }
}

/// One direction of a TCP connection, laid out byte-for-byte like the C
/// `struct sock_key` the fast-path mover looks up.
///
/// `src`/`dst` hold an IPv4 address in word 0 or an IPv6 address in all four
/// words; which one is selected by `family`. The padding fields keep the
/// record 64-bit aligned, the verifier rejects the program without them.
/// Keys are hashed as raw bytes, so build them from [`SockKey::default`] and
/// leave the padding zeroed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct SockKey {
    pub src: [u32; 4],
    pub dst: [u32; 4],
    pub family: u8,
    pub pad1: u8,
    pub pad2: u16,
    pub pad3: u32,
    pub sport: u32,
    pub dport: u32,
}

const _: () = {
    assert!(core::mem::size_of::<SockKey>() == 48);
    assert!(core::mem::offset_of!(SockKey, family) == 32);
    assert!(core::mem::offset_of!(SockKey, sport) == 40);
    assert!(core::mem::offset_of!(SockKey, dport) == 44);
};

impl SockKey {
    pub const fn new(src: FlowAddr, sport: u32, dst: FlowAddr, dport: u32) -> Self {
        SockKey {
            src: src.words(),
            dst: dst.words(),
            family: src.family(),
            pad1: 0,
            pad2: 0,
            pad3: 0,
            sport,
            dport,
        }
    }

    /// Key for an IPv4 connection (or a dual-stack socket carrying a mapped
    /// IPv4 peer), taken from the local side's point of view.
    #[inline(always)]
    pub fn from_v4<S: SockOps + ?Sized>(sock: &S) -> Self {
        SockKey {
            src: FlowAddr::V4(sock.local_ip4()).words(),
            dst: FlowAddr::V4(sock.remote_ip4()).words(),
            family: AF_INET,
            sport: port_key(sock.local_port()),
            dport: sock.remote_port() >> 16,
            ..SockKey::default()
        }
    }

    #[inline(always)]
    pub fn from_v6<S: SockOps + ?Sized>(sock: &S) -> Self {
        SockKey {
            src: sock.local_ip6(),
            dst: sock.remote_ip6(),
            family: AF_INET6,
            sport: port_key(sock.local_port()),
            dport: sock.remote_port() >> 16,
            ..SockKey::default()
        }
    }

    /// `None` unless `family` is one of the two supported tags.
    #[inline(always)]
    pub const fn src_addr(&self) -> Option<FlowAddr> {
        FlowAddr::read(self.family, &self.src)
    }

    #[inline(always)]
    pub const fn dst_addr(&self) -> Option<FlowAddr> {
        FlowAddr::read(self.family, &self.dst)
    }

    /// The same connection seen from the peer socket.
    #[inline(always)]
    pub const fn reversed(&self) -> Self {
        SockKey {
            src: self.dst,
            dst: self.src,
            sport: self.dport,
            dport: self.sport,
            ..*self
        }
    }
}

/// Whether an `AF_INET6` socket should be classified on its embedded IPv4
/// identity.
#[inline(always)]
pub fn carries_mapped_v4<S: SockOps + ?Sized>(sock: &S) -> bool {
    let remote = sock.remote_ip4();
    remote != 0 && remote != MAPPED_LOOPBACK_SENTINEL
}
