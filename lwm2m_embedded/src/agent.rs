// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use lwm2m_api_core::client::Lwm2mClient;
use lwm2m_api_core::error::Lwm2mError;
use lwm2m_api_core::objects::device::DeviceInformation;
use lwm2m_api_core::objects::{device, digital_input, flow, security, server};
use lwm2m_api_core::options::ClientOptions;

use crate::button::ButtonEvent;

pub const APPLICATION_NAME: &str = "lwm2m-client-button-sensor";

/// Objects the button sensor exposes besides the mandatory ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTreeOptions {
    pub digital_inputs: u16,
    pub flow_objects: bool,
    pub device: DeviceInformation,
}

impl Default for ObjectTreeOptions {
    fn default() -> Self {
        ObjectTreeOptions {
            digital_inputs: 2,
            flow_objects: true,
            device: DeviceInformation::default(),
        }
    }
}

fn check<T>(what: &str, result: Result<T, Lwm2mError>) -> bool {
    match result {
        Ok(_) => {
            log::debug!("----> {}", what);
            true
        }
        Err(err) => {
            log::error!("Failed: {} ({})", what, err);
            false
        }
    }
}

/// Defines the objects and creates their initial instances. Failures are logged and the
/// remaining objects are still set up.
pub fn construct_object_tree(client: &mut Lwm2mClient, tree: &ObjectTreeOptions) {
    let bootstrap_uri = client.options().bootstrap_uri.clone();
    let store = client.store_mut();

    if check("defined security object", security::register_security_object(store)) {
        if let Some(uri) = bootstrap_uri {
            check("populated security object", security::populate_security_object(store, &uri));
        }
    }
    check("defined server object", server::register_server_object(store));
    check("defined device object", device::register_device_object(store, &tree.device));

    if tree.flow_objects {
        if check("defined flow object", flow::register_flow_object(store)) {
            check("created flow object", flow::create_flow_object(store, tree.device.device_type));
        }
        if check("defined flow access object", flow::register_flow_access_object(store)) {
            check("created flow access object", flow::create_flow_access_object(store));
        }
    }

    if check("defined digital input object", digital_input::register_digital_input_object(store)) {
        for input in 0..tree.digital_inputs {
            check("created digital input", digital_input::add_digital_input(store, input));
        }
    }
}

pub fn print_banner(options: &ClientOptions) {
    log::info!("Starting LWM2M Client for {}", APPLICATION_NAME);
    log::info!("Endpoint name: {}", options.endpoint_name);
    log::info!("CoAP port: {}", options.coap_port);
    log::info!("UDP buffer: {} x {}", crate::coap::UDP_PACKET_SLOTS, crate::coap::UDP_BUFFER_SIZE);
    log::info!("CoAP max message size: {}", crate::coap::MAX_COAP_MESSAGE_SIZE);
    match &options.bootstrap_uri {
        Some(uri) => log::info!("Bootstrap server: {}", uri),
        None => log::info!("Bootstrap server: factory provisioned"),
    }
}

/// Creates the client and its object tree.
pub fn start(options: ClientOptions, tree: &ObjectTreeOptions) -> Lwm2mClient {
    print_banner(&options);
    let mut client = Lwm2mClient::new(options);
    construct_object_tree(&mut client, tree);
    client
}

pub fn on_button_event(client: &mut Lwm2mClient, event: ButtonEvent) {
    match event {
        ButtonEvent::Pressed(input) => {
            log::info!("Button press event received");
            if let Err(err) = digital_input::set_state(client, input, true) {
                log::error!("Could not set state of digital input {}: {}", input, err);
            }
            match digital_input::increment_counter(client, input) {
                Ok(count) => log::debug!("Digital input {} counter: {}", input, count),
                Err(err) => log::error!("Could not count press of digital input {}: {}", input, err),
            }
        }
        ButtonEvent::Released(input) => {
            if let Err(err) = digital_input::set_state(client, input, false) {
                log::error!("Could not set state of digital input {}: {}", input, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwm2m_api_core::object::Value;

    fn options() -> ClientOptions {
        ClientOptions {
            bootstrap_uri: Some(String::from("coap://[fd00::1]:15683/")),
            ..ClientOptions::default()
        }
    }

    #[test]
    fn object_tree_of_the_button_sensor() {
        let client = start(options(), &ObjectTreeOptions::default());
        let store = client.store();
        assert_eq!(
            store.value(security::SECURITY_OBJECT_ID, 0, security::SERVER_URI),
            Some(&Value::String(String::from("coap://[fd00::1]:15683/")))
        );
        assert_eq!(store.value(security::SECURITY_OBJECT_ID, 0, security::BOOTSTRAP_SERVER), Some(&Value::Boolean(true)));
        assert!(store.value(device::DEVICE_OBJECT_ID, 0, device::MANUFACTURER).is_some());
        assert!(store.has_instance(flow::FLOW_OBJECT_ID, 0));
        assert!(store.has_instance(flow::FLOW_ACCESS_OBJECT_ID, 0));
        assert_eq!(store.instances(digital_input::DIGITAL_INPUT_OBJECT_ID), vec![0, 1]);
        assert_eq!(digital_input::counter(store, 0), Some(0));
        assert_eq!(digital_input::counter(store, 1), Some(0));
        assert_eq!(digital_input::counter(store, 2), None);
    }

    #[test]
    fn optional_objects_can_be_left_out() {
        let tree = ObjectTreeOptions {
            digital_inputs: 1,
            flow_objects: false,
            ..ObjectTreeOptions::default()
        };
        let client = start(ClientOptions::default(), &tree);
        assert!(client.store().definition(flow::FLOW_OBJECT_ID).is_none());
        assert_eq!(digital_input::counter(client.store(), 0), Some(0));
        assert_eq!(digital_input::counter(client.store(), 1), None);
    }

    #[test]
    fn constructing_twice_keeps_the_first_tree() {
        let mut client = start(options(), &ObjectTreeOptions::default());
        digital_input::increment_counter(&mut client, 0).unwrap();
        construct_object_tree(&mut client, &ObjectTreeOptions::default());
        assert_eq!(digital_input::counter(client.store(), 0), Some(1));
    }

    #[test]
    fn button_presses_are_counted() {
        let mut client = start(options(), &ObjectTreeOptions::default());
        on_button_event(&mut client, ButtonEvent::Pressed(0));
        assert_eq!(client.store().value(digital_input::DIGITAL_INPUT_OBJECT_ID, 0, digital_input::DIGITAL_INPUT_STATE), Some(&Value::Boolean(true)));
        on_button_event(&mut client, ButtonEvent::Released(0));
        on_button_event(&mut client, ButtonEvent::Pressed(0));
        assert_eq!(digital_input::counter(client.store(), 0), Some(2));
        assert_eq!(digital_input::counter(client.store(), 1), Some(0));
        assert_eq!(client.store().value(digital_input::DIGITAL_INPUT_OBJECT_ID, 0, digital_input::DIGITAL_INPUT_STATE), Some(&Value::Boolean(true)));
    }

    #[test]
    fn press_on_missing_input_is_harmless() {
        let mut client = start(options(), &ObjectTreeOptions::default());
        on_button_event(&mut client, ButtonEvent::Pressed(7));
        assert_eq!(digital_input::counter(client.store(), 0), Some(0));
    }
}
