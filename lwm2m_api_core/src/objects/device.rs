// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::error::Lwm2mError;
use crate::object::{InitialValue, ObjectDefinition, ObjectStore, Operations, ResourceDefinition, ResourceKind, ResourceValue, Value};

pub const DEVICE_OBJECT_ID: u16 = 3;

pub const MANUFACTURER: u16 = 0;
pub const MODEL_NUMBER: u16 = 1;
pub const SERIAL_NUMBER: u16 = 2;
pub const FIRMWARE_VERSION: u16 = 3;
pub const REBOOT: u16 = 4;
pub const FACTORY_RESET: u16 = 5;
pub const ERROR_CODE: u16 = 11;
pub const RESET_ERROR_CODE: u16 = 12;
pub const CURRENT_TIME: u16 = 13;
pub const UTC_OFFSET: u16 = 14;
pub const TIMEZONE: u16 = 15;
pub const SUPPORTED_BINDING: u16 = 16;
pub const DEVICE_TYPE: u16 = 17;
pub const HARDWARE_VERSION: u16 = 18;
pub const SOFTWARE_VERSION: u16 = 19;

static RESOURCES: [ResourceDefinition; 15] = [
    ResourceDefinition::single(MANUFACTURER, "Manufacturer", ResourceKind::String, Operations::R, false),
    ResourceDefinition::single(MODEL_NUMBER, "Model Number", ResourceKind::String, Operations::R, false),
    ResourceDefinition::single(SERIAL_NUMBER, "Serial Number", ResourceKind::String, Operations::R, false),
    ResourceDefinition::single(FIRMWARE_VERSION, "Firmware Version", ResourceKind::String, Operations::R, false),
    ResourceDefinition::executable(REBOOT, "Reboot", true),
    ResourceDefinition::executable(FACTORY_RESET, "Factory Reset", false),
    ResourceDefinition::multiple(ERROR_CODE, "Error Code", ResourceKind::Integer, Operations::R, true),
    ResourceDefinition::executable(RESET_ERROR_CODE, "Reset Error Code", false),
    ResourceDefinition::single(CURRENT_TIME, "Current Time", ResourceKind::Time, Operations::RW, false),
    ResourceDefinition::single(UTC_OFFSET, "UTC Offset", ResourceKind::String, Operations::RW, false),
    ResourceDefinition::single(TIMEZONE, "Timezone", ResourceKind::String, Operations::RW, false),
    ResourceDefinition {
        initial: Some(InitialValue::Str("U")),
        ..ResourceDefinition::single(SUPPORTED_BINDING, "Supported Binding and Modes", ResourceKind::String, Operations::R, true)
    },
    ResourceDefinition::single(DEVICE_TYPE, "Device Type", ResourceKind::String, Operations::R, false),
    ResourceDefinition::single(HARDWARE_VERSION, "Hardware Version", ResourceKind::String, Operations::R, false),
    ResourceDefinition::single(SOFTWARE_VERSION, "Software Version", ResourceKind::String, Operations::R, false),
];

pub static DEVICE_OBJECT: ObjectDefinition = ObjectDefinition {
    id: DEVICE_OBJECT_ID,
    name: "Device",
    multiple_instances: false,
    mandatory: true,
    resources: &RESOURCES,
};

/// Static identity reported through the device object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformation {
    pub manufacturer: &'static str,
    pub model_number: &'static str,
    pub serial_number: &'static str,
    pub firmware_version: &'static str,
    pub device_type: &'static str,
    pub hardware_version: &'static str,
    pub software_version: &'static str,
}

impl Default for DeviceInformation {
    fn default() -> Self {
        DeviceInformation {
            manufacturer: "Imagination Technologies",
            model_number: "Button Sensor",
            serial_number: "0000000001",
            firmware_version: env!("CARGO_PKG_VERSION"),
            device_type: "Button",
            hardware_version: "1.0",
            software_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Defines the device object and creates its single instance.
pub fn register_device_object(store: &mut ObjectStore, information: &DeviceInformation) -> Result<(), Lwm2mError> {
    store.define(&DEVICE_OBJECT)?;
    let instance = store.create_instance(DEVICE_OBJECT_ID, Some(0))?;
    let strings = [
        (MANUFACTURER, information.manufacturer),
        (MODEL_NUMBER, information.model_number),
        (SERIAL_NUMBER, information.serial_number),
        (FIRMWARE_VERSION, information.firmware_version),
        (DEVICE_TYPE, information.device_type),
        (HARDWARE_VERSION, information.hardware_version),
        (SOFTWARE_VERSION, information.software_version),
    ];
    for (resource, value) in strings {
        store.set(DEVICE_OBJECT_ID, instance, resource, Value::String(String::from(value)))?;
    }
    Ok(())
}

/// Executes "Reset Error Code": the error list collapses to the single "no error" entry.
pub fn reset_error_codes(store: &mut ObjectStore) -> Result<(), Lwm2mError> {
    let mut codes = BTreeMap::new();
    codes.insert(0, Value::Integer(0));
    store.write(DEVICE_OBJECT_ID, 0, ERROR_CODE, ResourceValue::Multiple(codes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_instance_carries_information() {
        let mut store = ObjectStore::new();
        register_device_object(&mut store, &DeviceInformation::default()).unwrap();
        assert_eq!(store.value(DEVICE_OBJECT_ID, 0, SUPPORTED_BINDING).and_then(Value::as_str), Some("U"));
        assert_eq!(store.value(DEVICE_OBJECT_ID, 0, MODEL_NUMBER).and_then(Value::as_str), Some("Button Sensor"));

        store.write_resource_instance(DEVICE_OBJECT_ID, 0, ERROR_CODE, 1, Value::Integer(5)).unwrap();
        reset_error_codes(&mut store).unwrap();
        match store.read(DEVICE_OBJECT_ID, 0, ERROR_CODE).unwrap() {
            ResourceValue::Multiple(codes) => assert_eq!(codes.len(), 1),
            ResourceValue::Single(_) => panic!("error code is a multiple resource"),
        }
    }
}
