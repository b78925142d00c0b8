// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
//! FlowM2M provisioning objects (Flow, Flow Access).
use alloc::string::String;

use crate::error::Lwm2mError;
use crate::object::{InstanceId, ObjectDefinition, ObjectStore, Operations, ResourceDefinition, ResourceKind, Value};

pub const FLOW_OBJECT_ID: u16 = 20000;
pub const FLOW_ACCESS_OBJECT_ID: u16 = 20001;

pub const DEVICE_ID: u16 = 0;
pub const PARENT_ID: u16 = 1;
pub const DEVICE_TYPE: u16 = 2;
pub const NAME: u16 = 3;
pub const DESCRIPTION: u16 = 4;
pub const FCAP: u16 = 5;
pub const LICENSEE_ID: u16 = 6;
pub const LICENSEE_CHALLENGE: u16 = 7;
pub const HASH_ITERATIONS: u16 = 8;
pub const LICENSEE_HASH: u16 = 9;
pub const STATUS: u16 = 10;

pub const URL: u16 = 0;
pub const CUSTOMER_KEY: u16 = 1;
pub const CUSTOMER_SECRET: u16 = 2;
pub const REMEMBER_ME_TOKEN: u16 = 3;
pub const REMEMBER_ME_TOKEN_EXPIRY: u16 = 4;

static FLOW_RESOURCES: [ResourceDefinition; 11] = [
    ResourceDefinition::single(DEVICE_ID, "DeviceID", ResourceKind::Opaque, Operations::RW, true),
    ResourceDefinition::single(PARENT_ID, "ParentID", ResourceKind::Opaque, Operations::RW, false),
    ResourceDefinition::single(DEVICE_TYPE, "DeviceType", ResourceKind::String, Operations::RW, true),
    ResourceDefinition::single(NAME, "Name", ResourceKind::String, Operations::RW, false),
    ResourceDefinition::single(DESCRIPTION, "Description", ResourceKind::String, Operations::RW, false),
    ResourceDefinition::single(FCAP, "FCAP", ResourceKind::String, Operations::RW, true),
    ResourceDefinition::single(LICENSEE_ID, "LicenseeID", ResourceKind::Integer, Operations::RW, true),
    ResourceDefinition::single(LICENSEE_CHALLENGE, "LicenseeChallenge", ResourceKind::Opaque, Operations::RW, false),
    ResourceDefinition::single(HASH_ITERATIONS, "HashIterations", ResourceKind::Integer, Operations::RW, false),
    ResourceDefinition::single(LICENSEE_HASH, "LicenseeHash", ResourceKind::Opaque, Operations::RW, false),
    ResourceDefinition::single(STATUS, "Status", ResourceKind::Integer, Operations::RW, false),
];

static FLOW_ACCESS_RESOURCES: [ResourceDefinition; 5] = [
    ResourceDefinition::single(URL, "URL", ResourceKind::String, Operations::RW, true),
    ResourceDefinition::single(CUSTOMER_KEY, "CustomerKey", ResourceKind::String, Operations::RW, false),
    ResourceDefinition::single(CUSTOMER_SECRET, "CustomerSecret", ResourceKind::String, Operations::RW, false),
    ResourceDefinition::single(REMEMBER_ME_TOKEN, "RememberMeToken", ResourceKind::String, Operations::RW, false),
    ResourceDefinition::single(REMEMBER_ME_TOKEN_EXPIRY, "RememberMeTokenExpiry", ResourceKind::Time, Operations::RW, false),
];

pub static FLOW_OBJECT: ObjectDefinition = ObjectDefinition {
    id: FLOW_OBJECT_ID,
    name: "FlowObject",
    multiple_instances: false,
    mandatory: false,
    resources: &FLOW_RESOURCES,
};

pub static FLOW_ACCESS_OBJECT: ObjectDefinition = ObjectDefinition {
    id: FLOW_ACCESS_OBJECT_ID,
    name: "FlowAccess",
    multiple_instances: false,
    mandatory: false,
    resources: &FLOW_ACCESS_RESOURCES,
};

pub fn register_flow_object(store: &mut ObjectStore) -> Result<(), Lwm2mError> {
    store.define(&FLOW_OBJECT)
}

pub fn register_flow_access_object(store: &mut ObjectStore) -> Result<(), Lwm2mError> {
    store.define(&FLOW_ACCESS_OBJECT)
}

/// Creates Flow instance 0, advertising `device_type` to the provisioning service.
pub fn create_flow_object(store: &mut ObjectStore, device_type: &str) -> Result<InstanceId, Lwm2mError> {
    let instance = store.create_instance(FLOW_OBJECT_ID, Some(0))?;
    store.set(FLOW_OBJECT_ID, instance, DEVICE_TYPE, Value::String(String::from(device_type)))?;
    Ok(instance)
}

pub fn create_flow_access_object(store: &mut ObjectStore) -> Result<InstanceId, Lwm2mError> {
    store.create_instance(FLOW_ACCESS_OBJECT_ID, Some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_objects_are_single_instance() {
        let mut store = ObjectStore::new();
        register_flow_object(&mut store).unwrap();
        register_flow_access_object(&mut store).unwrap();
        create_flow_object(&mut store, "ButtonDevice").unwrap();
        create_flow_access_object(&mut store).unwrap();
        assert_eq!(create_flow_access_object(&mut store), Err(Lwm2mError::InstanceLimit));
        assert_eq!(store.value(FLOW_OBJECT_ID, 0, DEVICE_TYPE).and_then(Value::as_str), Some("ButtonDevice"));
        assert_eq!(store.value(FLOW_OBJECT_ID, 0, LICENSEE_ID), Some(&Value::Integer(0)));
    }
}
