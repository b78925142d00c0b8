// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use alloc::string::String;

pub const COAP_PORT: u16 = 6000;
pub const END_POINT_NAME: &str = "ButtonDevice";

/// Client configuration fixed at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub endpoint_name: String,
    pub coap_port: u16,
    /// Bootstrap server used to populate the security object. `None` expects a factory
    /// provisioned security object.
    pub bootstrap_uri: Option<String>,
    /// Lifetime requested when the server object does not carry one.
    pub lifetime_s: u32,
    /// Seed for CoAP message ids and tokens, so that a rebooted client does not reuse them.
    pub seed: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            endpoint_name: String::from(END_POINT_NAME),
            coap_port: COAP_PORT,
            bootstrap_uri: None,
            lifetime_s: crate::objects::server::DEFAULT_LIFETIME_S,
            seed: 0,
        }
    }
}
