// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
//! Conversions between the engine's `core::net` addresses and embassy-net endpoints.
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use embassy_net::{IpAddress, IpEndpoint, Ipv4Address, Ipv6Address};

pub fn to_socket_addr(endpoint: IpEndpoint) -> SocketAddr {
    let ip = match endpoint.addr {
        IpAddress::Ipv4(addr) => IpAddr::V4(Ipv4Addr::from(addr.0)),
        IpAddress::Ipv6(addr) => IpAddr::V6(Ipv6Addr::from(addr.0)),
    };
    SocketAddr::new(ip, endpoint.port)
}

pub fn to_endpoint(addr: SocketAddr) -> IpEndpoint {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => IpAddress::Ipv4(Ipv4Address(v4.octets())),
        IpAddr::V6(v6) => IpAddress::Ipv6(to_ipv6_address(v6)),
    };
    IpEndpoint::new(ip, addr.port())
}

pub fn to_ipv6_address(addr: Ipv6Addr) -> Ipv6Address {
    Ipv6Address(addr.octets())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_endpoint() {
        let addr: SocketAddr = "[fd00::1]:15683".parse().unwrap();
        let endpoint = to_endpoint(addr);
        assert_eq!(endpoint.port, 15683);
        assert_eq!(endpoint.addr, IpAddress::Ipv6(Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)));
        assert_eq!(to_socket_addr(endpoint), addr);
    }

    #[test]
    fn ipv4_endpoint() {
        let endpoint = IpEndpoint::new(IpAddress::Ipv4(Ipv4Address::new(192, 168, 101, 1)), 5683);
        assert_eq!(to_socket_addr(endpoint), "192.168.101.1:5683".parse::<SocketAddr>().unwrap());
    }
}
