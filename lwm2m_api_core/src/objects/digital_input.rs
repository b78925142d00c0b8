// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
//! IPSO Digital Input (3200).
use crate::client::Lwm2mClient;
use crate::error::Lwm2mError;
use crate::object::{InitialValue, InstanceId, ObjectDefinition, ObjectStore, Operations, Path, ResourceDefinition, ResourceKind, Value};

pub const DIGITAL_INPUT_OBJECT_ID: u16 = 3200;

pub const DIGITAL_INPUT_STATE: u16 = 5500;
pub const DIGITAL_INPUT_COUNTER: u16 = 5501;
pub const DIGITAL_INPUT_POLARITY: u16 = 5502;
pub const DIGITAL_INPUT_DEBOUNCE_PERIOD: u16 = 5503;
pub const DIGITAL_INPUT_EDGE_SELECTION: u16 = 5504;
pub const DIGITAL_INPUT_COUNTER_RESET: u16 = 5505;
pub const APPLICATION_TYPE: u16 = 5750;
pub const SENSOR_TYPE: u16 = 5751;

static RESOURCES: [ResourceDefinition; 8] = [
    ResourceDefinition::single(DIGITAL_INPUT_STATE, "Digital Input State", ResourceKind::Boolean, Operations::R, true),
    ResourceDefinition {
        initial: Some(InitialValue::Int(0)),
        ..ResourceDefinition::single(DIGITAL_INPUT_COUNTER, "Digital Input Counter", ResourceKind::Integer, Operations::R, false)
    },
    ResourceDefinition::single(DIGITAL_INPUT_POLARITY, "Digital Input Polarity", ResourceKind::Boolean, Operations::RW, false),
    ResourceDefinition::single(DIGITAL_INPUT_DEBOUNCE_PERIOD, "Digital Input Debounce Period", ResourceKind::Integer, Operations::RW, false),
    ResourceDefinition::single(DIGITAL_INPUT_EDGE_SELECTION, "Digital Input Edge Selection", ResourceKind::Integer, Operations::RW, false),
    ResourceDefinition::executable(DIGITAL_INPUT_COUNTER_RESET, "Digital Input Counter Reset", false),
    ResourceDefinition {
        initial: Some(InitialValue::Str("Button")),
        ..ResourceDefinition::single(APPLICATION_TYPE, "Application Type", ResourceKind::String, Operations::RW, false)
    },
    ResourceDefinition {
        initial: Some(InitialValue::Str("Push Button")),
        ..ResourceDefinition::single(SENSOR_TYPE, "Sensor Type", ResourceKind::String, Operations::R, false)
    },
];

pub static DIGITAL_INPUT_OBJECT: ObjectDefinition = ObjectDefinition {
    id: DIGITAL_INPUT_OBJECT_ID,
    name: "IPSO Digital Input",
    multiple_instances: true,
    mandatory: false,
    resources: &RESOURCES,
};

pub fn register_digital_input_object(store: &mut ObjectStore) -> Result<(), Lwm2mError> {
    store.define(&DIGITAL_INPUT_OBJECT)
}

pub fn add_digital_input(store: &mut ObjectStore, instance: InstanceId) -> Result<InstanceId, Lwm2mError> {
    store.create_instance(DIGITAL_INPUT_OBJECT_ID, Some(instance))
}

pub fn counter(store: &ObjectStore, instance: InstanceId) -> Option<i64> {
    store.value(DIGITAL_INPUT_OBJECT_ID, instance, DIGITAL_INPUT_COUNTER).and_then(Value::as_integer)
}

/// Counts one input event and notifies observers of the counter.
pub fn increment_counter(client: &mut Lwm2mClient, instance: InstanceId) -> Result<i64, Lwm2mError> {
    let count = client.store_mut().increment(DIGITAL_INPUT_OBJECT_ID, instance, DIGITAL_INPUT_COUNTER)?;
    client.notify_changed(Path::Resource(DIGITAL_INPUT_OBJECT_ID, instance, DIGITAL_INPUT_COUNTER));
    Ok(count)
}

pub fn set_state(client: &mut Lwm2mClient, instance: InstanceId, state: bool) -> Result<(), Lwm2mError> {
    let path = Path::Resource(DIGITAL_INPUT_OBJECT_ID, instance, DIGITAL_INPUT_STATE);
    if client.store().value(DIGITAL_INPUT_OBJECT_ID, instance, DIGITAL_INPUT_STATE) == Some(&Value::Boolean(state)) {
        return Ok(());
    }
    client.store_mut().set(DIGITAL_INPUT_OBJECT_ID, instance, DIGITAL_INPUT_STATE, Value::Boolean(state))?;
    client.notify_changed(path);
    Ok(())
}

pub fn reset_counter(store: &mut ObjectStore, instance: InstanceId) -> Result<(), Lwm2mError> {
    store.set(DIGITAL_INPUT_OBJECT_ID, instance, DIGITAL_INPUT_COUNTER, Value::Integer(0))
}
