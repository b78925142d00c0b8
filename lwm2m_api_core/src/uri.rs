// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use core::net::{IpAddr, SocketAddr};

use crate::error::Lwm2mError;

pub const COAP_DEFAULT_PORT: u16 = 5683;
pub const COAPS_DEFAULT_PORT: u16 = 5684;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Coap,
    Coaps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerUri {
    pub scheme: Scheme,
    pub addr: SocketAddr,
}

/// Parses `coap://<ip>[:port][/path]`. IPv6 literals must be bracketed.
///
/// Host names are rejected: the client has no resolver, so server accounts must carry literal
/// addresses.
pub fn parse_server_uri(raw: &str) -> Result<ServerUri, Lwm2mError> {
    let (scheme, rest) = match raw.trim().split_once("://") {
        Some(("coap", rest)) => (Scheme::Coap, rest),
        Some(("coaps", rest)) => (Scheme::Coaps, rest),
        _ => return Err(Lwm2mError::InvalidUri),
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let default_port = match scheme {
        Scheme::Coap => COAP_DEFAULT_PORT,
        Scheme::Coaps => COAPS_DEFAULT_PORT,
    };

    let (host, port) = match authority.strip_prefix('[') {
        Some(bracketed) => {
            let (host, tail) = bracketed.split_once(']').ok_or(Lwm2mError::InvalidUri)?;
            let port = match tail {
                "" => None,
                tail => Some(tail.strip_prefix(':').ok_or(Lwm2mError::InvalidUri)?),
            };
            (host, port)
        }
        None => match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        },
    };

    let ip: IpAddr = host.parse().map_err(|_| Lwm2mError::InvalidUri)?;
    let port = match port {
        Some(port) => port.parse().map_err(|_| Lwm2mError::InvalidUri)?,
        None => default_port,
    };
    Ok(ServerUri {
        scheme,
        addr: SocketAddr::new(ip, port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bootstrap_uri() {
        let uri = parse_server_uri("coap://[fd00::1]:15683/").unwrap();
        assert_eq!(uri.scheme, Scheme::Coap);
        assert_eq!(uri.addr, "[fd00::1]:15683".parse().unwrap());
    }

    #[test]
    fn default_ports_and_ipv4() {
        assert_eq!(parse_server_uri("coap://192.168.1.10").unwrap().addr, "192.168.1.10:5683".parse().unwrap());
        assert_eq!(parse_server_uri("coaps://[::1]").unwrap().addr.port(), COAPS_DEFAULT_PORT);
        assert_eq!(parse_server_uri("coap://10.0.0.1:5690/rd").unwrap().addr.port(), 5690);
    }

    #[test]
    fn rejects_malformed_uris() {
        assert_eq!(parse_server_uri("http://[::1]:80"), Err(Lwm2mError::InvalidUri));
        assert_eq!(parse_server_uri("coap://example.com:5683"), Err(Lwm2mError::InvalidUri));
        assert_eq!(parse_server_uri("coap://[::1:5683"), Err(Lwm2mError::InvalidUri));
        assert_eq!(parse_server_uri("coap://[::1]5683"), Err(Lwm2mError::InvalidUri));
        assert_eq!(parse_server_uri("coap://10.0.0.1:port"), Err(Lwm2mError::InvalidUri));
    }
}
