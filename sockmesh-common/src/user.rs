use core::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};

use crate::endpoint::{EndpointKey, ServiceAddr};
use crate::flow::{FlowAddr, SockKey, port_key};

// SAFETY: #[repr(C)], Copy, only integer fields and explicit padding.
unsafe impl aya::Pod for SockKey {}
unsafe impl aya::Pod for EndpointKey {}
unsafe impl aya::Pod for ServiceAddr {}

impl From<Ipv4Addr> for FlowAddr {
    fn from(ip: Ipv4Addr) -> Self {
        FlowAddr::V4(u32::from_ne_bytes(ip.octets()))
    }
}

impl From<Ipv6Addr> for FlowAddr {
    fn from(ip: Ipv6Addr) -> Self {
        let o = ip.octets();
        let word = |i: usize| u32::from_ne_bytes([o[i], o[i + 1], o[i + 2], o[i + 3]]);
        FlowAddr::V6([word(0), word(4), word(8), word(12)])
    }
}

impl From<IpAddr> for FlowAddr {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => ip.into(),
            IpAddr::V6(ip) => ip.into(),
        }
    }
}

impl From<FlowAddr> for IpAddr {
    fn from(addr: FlowAddr) -> Self {
        match addr {
            FlowAddr::V4(ip) => IpAddr::V4(Ipv4Addr::from(ip.to_ne_bytes())),
            FlowAddr::V6(words) => {
                let mut octets = [0u8; 16];
                for (chunk, word) in octets.chunks_exact_mut(4).zip(words) {
                    chunk.copy_from_slice(&word.to_ne_bytes());
                }
                IpAddr::V6(Ipv6Addr::from(octets))
            }
        }
    }
}

/// Inverse of [`port_key`] for ports that fit in 16 bits.
fn port_from_key(port: u32) -> u16 {
    u16::from_be(port as u16)
}

impl SockKey {
    /// Builds the key the hook would compute on the socket bound to `src`
    /// and connected to `dst`.
    pub fn from_socket_addrs(src: SocketAddr, dst: SocketAddr) -> Self {
        SockKey::new(
            src.ip().into(),
            port_key(src.port().into()),
            dst.ip().into(),
            port_key(dst.port().into()),
        )
    }

    pub fn source(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.src_addr()?.into();
        Some(SocketAddr::new(ip, port_from_key(self.sport)))
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.dst_addr()?.into();
        Some(SocketAddr::new(ip, port_from_key(self.dport)))
    }
}

impl fmt::Display for SockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.source(), self.destination()) {
            (Some(src), Some(dst)) => write!(f, "{src} -> {dst}"),
            _ => write!(f, "<family {}>", self.family),
        }
    }
}

impl From<SocketAddrV4> for EndpointKey {
    fn from(addr: SocketAddrV4) -> Self {
        EndpointKey {
            ip: FlowAddr::from(*addr.ip()).words(),
            pad: 0,
            port: port_key(addr.port().into()),
        }
    }
}

impl From<SocketAddrV4> for ServiceAddr {
    fn from(addr: SocketAddrV4) -> Self {
        ServiceAddr {
            ip: FlowAddr::from(*addr.ip()).words(),
            pad: 0,
            port: port_key(addr.port().into()),
        }
    }
}

impl ServiceAddr {
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(
            Ipv4Addr::from(self.ip[0].to_ne_bytes()),
            port_from_key(self.port),
        )
    }
}

impl fmt::Display for ServiceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.socket_addr(), f)
    }
}
