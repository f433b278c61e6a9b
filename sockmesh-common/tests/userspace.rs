//! Userspace helpers of the shared records (requires the `user` feature).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};

use sockmesh_common::*;

const CLIENT: &str = "10.0.0.5:41000";
const BACKEND: &str = "10.0.0.9:8080";
const SERVICE: &str = "10.0.0.1:80";

fn sock_addr(addr: &str) -> SocketAddr {
    addr.parse().unwrap()
}

fn key(src: &str, dst: &str) -> SockKey {
    SockKey::from_socket_addrs(sock_addr(src), sock_addr(dst))
}

// ---- conversions ----

#[test]
fn socket_addrs_build_the_key_the_hook_computes() {
    let expected = SockKey::new(
        FlowAddr::V4(u32::from_ne_bytes([10, 0, 0, 9])),
        port_key(8080),
        FlowAddr::V4(u32::from_ne_bytes([10, 0, 0, 5])),
        port_key(41000),
    );
    assert_eq!(key(BACKEND, CLIENT), expected);
    assert_eq!(key(BACKEND, CLIENT).family, AF_INET);
}

#[test]
fn key_addresses_come_back_out() {
    let k = key("[2001:db8::1]:443", "[2001:db8::2]:50000");
    assert_eq!(k.family, AF_INET6);
    assert_eq!(k.source(), Some(sock_addr("[2001:db8::1]:443")));
    assert_eq!(k.destination(), Some(sock_addr("[2001:db8::2]:50000")));
    assert_eq!(k.reversed().source(), k.destination());
}

#[test]
fn unknown_family_has_no_addresses() {
    let k = SockKey {
        family: 1,
        ..key(BACKEND, CLIENT)
    };
    assert_eq!(k.source(), None);
    assert_eq!(k.to_string(), "<family 1>");
}

#[test]
fn flow_addr_round_trips_through_ip_addr() {
    for ip in [
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x42)),
    ] {
        assert_eq!(IpAddr::from(FlowAddr::from(ip)), ip);
    }
}

#[test]
fn endpoint_key_matches_the_hook_lookup() {
    let endpoint: EndpointKey = BACKEND.parse::<SocketAddrV4>().unwrap().into();
    assert_eq!(endpoint, EndpointKey::for_source(&key(BACKEND, CLIENT)));
}

// ---- rendering ----

#[test]
fn keys_render_as_socket_addresses() {
    assert_eq!(
        key(BACKEND, CLIENT).to_string(),
        "10.0.0.9:8080 -> 10.0.0.5:41000"
    );
    assert_eq!(
        key("[2001:db8::1]:443", "[2001:db8::2]:50000").to_string(),
        "[2001:db8::1]:443 -> [2001:db8::2]:50000"
    );
}

#[test]
fn service_renders_as_its_socket_address() {
    let service: ServiceAddr = SERVICE.parse::<SocketAddrV4>().unwrap().into();
    assert_eq!(service.socket_addr(), SERVICE.parse::<SocketAddrV4>().unwrap());
    assert_eq!(service.to_string(), SERVICE);
}
