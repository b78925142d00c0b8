// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use std::net::Ipv6Addr;

use embassy_net::{Ipv6Cidr, StaticConfigV6};
use lwm2m_api_core::options::ClientOptions;
use lwm2m_embedded::agent::ObjectTreeOptions;

fn default_lifetime() -> u32 {
    lwm2m_api_core::objects::server::DEFAULT_LIFETIME_S
}

fn default_digital_inputs() -> u16 {
    2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Lwm2mClientSettings {
    pub endpoint_name: String,
    pub coap_port: u16,
    #[serde(default)]
    pub verbose: bool,
    /// Absent when the security object is provisioned some other way.
    pub bootstrap_uri: Option<String>,
    #[serde(default = "default_lifetime")]
    pub lifetime: u32,
    pub network: NetworkSettings,
    #[serde(default)]
    pub objects: ObjectSettings,
    pub mock_button: Option<MockButtonSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct NetworkSettings {
    pub tap_interface: String,
    pub address: String,
    pub prefix_len: u8,
    pub default_route: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ObjectSettings {
    #[serde(default = "default_digital_inputs")]
    pub digital_inputs: u16,
    #[serde(default = "default_true")]
    pub flow_objects: bool,
}

impl Default for ObjectSettings {
    fn default() -> Self {
        ObjectSettings {
            digital_inputs: default_digital_inputs(),
            flow_objects: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct MockButtonSettings {
    #[serde(default)]
    pub input: u16,
    pub period_ms: u64,
}

impl Lwm2mClientSettings {
    /// Rejects settings the client could only fail on later.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lifetime == 0 {
            anyhow::bail!("registration lifetime must be positive");
        }
        if let Some(uri) = &self.bootstrap_uri {
            if let Err(err) = lwm2m_api_core::uri::parse_server_uri(uri) {
                anyhow::bail!("invalid bootstrap URI {}: {}", uri, err);
            }
        }
        if let Some(button) = &self.mock_button {
            if button.input >= self.objects.digital_inputs {
                anyhow::bail!("mock button input {} has no digital input instance", button.input);
            }
            if button.period_ms == 0 {
                anyhow::bail!("mock button period must be positive");
            }
        }
        self.ipv6_config().map(|_| ())
    }

    pub fn client_options(&self, seed: u32) -> ClientOptions {
        ClientOptions {
            endpoint_name: self.endpoint_name.clone(),
            coap_port: self.coap_port,
            bootstrap_uri: self.bootstrap_uri.clone(),
            lifetime_s: self.lifetime,
            seed,
        }
    }

    pub fn object_tree(&self) -> ObjectTreeOptions {
        ObjectTreeOptions {
            digital_inputs: self.objects.digital_inputs,
            flow_objects: self.objects.flow_objects,
            ..ObjectTreeOptions::default()
        }
    }

    /// Static address of the emulated device, routed through the default route if one is set.
    pub fn ipv6_config(&self) -> anyhow::Result<StaticConfigV6> {
        let address: Ipv6Addr = self.network.address.parse()?;
        if self.network.prefix_len > 128 {
            anyhow::bail!("invalid IPv6 prefix length {}", self.network.prefix_len);
        }
        let gateway = match &self.network.default_route {
            Some(route) => Some(lwm2m_embedded::net::to_ipv6_address(route.parse()?)),
            None => None,
        };
        Ok(StaticConfigV6 {
            address: Ipv6Cidr::new(lwm2m_embedded::net::to_ipv6_address(address), self.network.prefix_len),
            gateway,
            dns_servers: heapless::Vec::new(),
        })
    }
}

pub fn lwm2m_client_default_conf() -> String {
    String::from(
        r##"endpoint_name = "ButtonDevice"
coap_port = 6000
verbose = true
bootstrap_uri = "coap://[fd00::1]:15683/"
lifetime = 86400

[network]
tap_interface = "tap0"
address = "fd00::2"
prefix_len = 64
default_route = "fd00::1"

[objects]
digital_inputs = 2
flow_objects = true

[mock_button]
input = 0
period_ms = 10000
"##,
    )
}

pub fn read_conf_from_file(filename: &str) -> anyhow::Result<Lwm2mClientSettings> {
    Ok(toml::from_str::<Lwm2mClientSettings>(&std::fs::read_to_string(filename)?)?)
}

pub fn create_template(path: &str, content: &str) -> anyhow::Result<()> {
    match std::path::Path::new(&path).exists() {
        true => anyhow::bail!("cannot overwrite configuration file: {}", path),
        false => {
            std::fs::write(path, content)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_net::Ipv6Address;

    fn default_settings() -> Lwm2mClientSettings {
        toml::from_str(&lwm2m_client_default_conf()).unwrap()
    }

    #[test]
    fn default_configuration() {
        let settings = default_settings();
        settings.validate().unwrap();
        let options = settings.client_options(7);
        assert_eq!(options.endpoint_name, "ButtonDevice");
        assert_eq!(options.coap_port, 6000);
        assert_eq!(options.bootstrap_uri.as_deref(), Some("coap://[fd00::1]:15683/"));
        assert_eq!(options.seed, 7);
        assert!(settings.verbose);
        assert_eq!(settings.mock_button, Some(MockButtonSettings { input: 0, period_ms: 10000 }));

        let tree = settings.object_tree();
        assert_eq!(tree.digital_inputs, 2);
        assert!(tree.flow_objects);
    }

    #[test]
    fn static_ipv6_with_default_route() {
        let config = default_settings().ipv6_config().unwrap();
        assert_eq!(config.address, Ipv6Cidr::new(Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 2), 64));
        assert_eq!(config.gateway, Some(Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)));
    }

    #[test]
    fn optional_sections_have_defaults() {
        let settings: Lwm2mClientSettings = toml::from_str(
            r##"endpoint_name = "Other"
coap_port = 5683

[network]
tap_interface = "tap1"
address = "fd00::5"
prefix_len = 64
"##,
        )
        .unwrap();
        settings.validate().unwrap();
        assert!(!settings.verbose);
        assert_eq!(settings.bootstrap_uri, None);
        assert_eq!(settings.lifetime, 86400);
        assert_eq!(settings.objects, ObjectSettings::default());
        assert_eq!(settings.mock_button, None);
        assert_eq!(settings.ipv6_config().unwrap().gateway, None);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut settings = default_settings();
        settings.bootstrap_uri = Some(String::from("coap://bootstrap.example.com/"));
        assert!(settings.validate().is_err());

        let mut settings = default_settings();
        settings.network.address = String::from("192.168.1.1");
        assert!(settings.validate().is_err());

        let mut settings = default_settings();
        settings.lifetime = 0;
        assert!(settings.validate().is_err());

        let mut settings = default_settings();
        settings.network.prefix_len = 129;
        assert!(settings.validate().is_err());

        let mut settings = default_settings();
        settings.mock_button = Some(MockButtonSettings { input: 2, period_ms: 1000 });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn template_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lwm2m_client.toml");
        let path = path.to_str().unwrap();
        create_template(path, &lwm2m_client_default_conf()).unwrap();
        assert_eq!(read_conf_from_file(path).unwrap(), default_settings());
        assert!(create_template(path, "").is_err());
    }
}
