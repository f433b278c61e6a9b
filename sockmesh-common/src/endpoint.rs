//! Endpoint-to-service resolution.
//!
//! The control plane keeps a flat map from every workload endpoint
//! (`pod ip`, `pod port`) to the service (`cluster ip`, `service port`) it
//! backs. The hook only ever reads it.

use crate::flow::{FlowAddr, SockKey};

/// Key of the endpoint-to-service map.
///
/// `ip` holds IPv4 in word 0 or IPv6 in all four words. `port` is normalized
/// with [`crate::port_key`], the same way as [`SockKey::sport`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct EndpointKey {
    pub ip: [u32; 4],
    pub pad: u32,
    pub port: u32,
}

/// Service identity, the value of the endpoint-to-service map.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ServiceAddr {
    pub ip: [u32; 4],
    pub pad: u32,
    pub port: u32,
}

const _: () = {
    assert!(core::mem::size_of::<EndpointKey>() == 24);
    assert!(core::mem::size_of::<ServiceAddr>() == 24);
};

impl EndpointKey {
    /// Lookup key for the local (source) side of `key`.
    ///
    /// Only the IPv4 word is carried over, matching how the control plane
    /// writes the map.
    #[inline(always)]
    pub const fn for_source(key: &SockKey) -> Self {
        EndpointKey {
            ip: [key.src[0], 0, 0, 0],
            pad: 0,
            port: key.sport,
        }
    }
}

impl ServiceAddr {
    /// The service address interpreted under `family`.
    #[inline(always)]
    pub const fn addr(&self, family: u8) -> Option<FlowAddr> {
        match family {
            crate::AF_INET => Some(FlowAddr::V4(self.ip[0])),
            crate::AF_INET6 => Some(FlowAddr::V6(self.ip)),
            _ => None,
        }
    }
}

/// Read-only view of the endpoint-to-service map.
pub trait EndpointIndex {
    fn lookup(&self, key: &EndpointKey) -> Option<ServiceAddr>;
}

/// Returns the service fronted by the source of `key`, or `None` when the
/// source is not a registered workload endpoint.
#[inline(always)]
pub fn resolve<I: EndpointIndex + ?Sized>(index: &I, key: &SockKey) -> Option<ServiceAddr> {
    index.lookup(&EndpointKey::for_source(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_key;
    use std::collections::HashMap;

    struct Index(HashMap<EndpointKey, ServiceAddr>);

    impl EndpointIndex for Index {
        fn lookup(&self, key: &EndpointKey) -> Option<ServiceAddr> {
            self.0.get(key).copied()
        }
    }

    fn ip4(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from_ne_bytes([a, b, c, d])
    }

    fn flow(src: (u32, u16), dst: (u32, u16)) -> SockKey {
        SockKey::new(
            FlowAddr::V4(src.0),
            port_key(src.1 as u32),
            FlowAddr::V4(dst.0),
            port_key(dst.1 as u32),
        )
    }

    fn service() -> ServiceAddr {
        ServiceAddr {
            ip: [ip4(10, 0, 0, 1), 0, 0, 0],
            pad: 0,
            port: port_key(80),
        }
    }

    fn index() -> Index {
        let backend = EndpointKey {
            ip: [ip4(10, 0, 0, 9), 0, 0, 0],
            pad: 0,
            port: port_key(8080),
        };
        Index(HashMap::from([(backend, service())]))
    }

    #[test]
    fn resolves_on_the_source_side() {
        let key = flow((ip4(10, 0, 0, 9), 8080), (ip4(10, 0, 0, 5), 41000));
        assert_eq!(resolve(&index(), &key), Some(service()));
    }

    #[test]
    fn destination_that_is_an_endpoint_does_not_resolve() {
        let key = flow((ip4(10, 0, 0, 5), 41000), (ip4(10, 0, 0, 9), 8080));
        assert_eq!(resolve(&index(), &key), None);
    }

    #[test]
    fn port_must_match_too() {
        let key = flow((ip4(10, 0, 0, 9), 9090), (ip4(10, 0, 0, 5), 41000));
        assert_eq!(resolve(&index(), &key), None);
    }

    #[test]
    fn service_addr_follows_family() {
        let svc = service();
        assert_eq!(svc.addr(crate::AF_INET), Some(FlowAddr::V4(ip4(10, 0, 0, 1))));
        assert_eq!(svc.addr(0), None);
    }
}
