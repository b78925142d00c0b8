// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use alloc::string::String;

use crate::error::Lwm2mError;
use crate::object::{InitialValue, InstanceId, ObjectDefinition, ObjectStore, Operations, ResourceDefinition, ResourceKind, Value};

pub const SERVER_OBJECT_ID: u16 = 1;

pub const SHORT_SERVER_ID: u16 = 0;
pub const LIFETIME: u16 = 1;
pub const DEFAULT_MIN_PERIOD: u16 = 2;
pub const DEFAULT_MAX_PERIOD: u16 = 3;
pub const DISABLE: u16 = 4;
pub const DISABLE_TIMEOUT: u16 = 5;
pub const NOTIFICATION_STORING: u16 = 6;
pub const BINDING: u16 = 7;
pub const REGISTRATION_UPDATE_TRIGGER: u16 = 8;

pub const DEFAULT_LIFETIME_S: u32 = 86400;
pub const DEFAULT_DISABLE_TIMEOUT_S: u32 = 86400;

static RESOURCES: [ResourceDefinition; 9] = [
    ResourceDefinition::single(SHORT_SERVER_ID, "Short Server ID", ResourceKind::Integer, Operations::R, true),
    ResourceDefinition {
        initial: Some(InitialValue::Int(DEFAULT_LIFETIME_S as i64)),
        ..ResourceDefinition::single(LIFETIME, "Lifetime", ResourceKind::Integer, Operations::RW, true)
    },
    ResourceDefinition::single(DEFAULT_MIN_PERIOD, "Default Minimum Period", ResourceKind::Integer, Operations::RW, false),
    ResourceDefinition::single(DEFAULT_MAX_PERIOD, "Default Maximum Period", ResourceKind::Integer, Operations::RW, false),
    ResourceDefinition::executable(DISABLE, "Disable", false),
    ResourceDefinition::single(DISABLE_TIMEOUT, "Disable Timeout", ResourceKind::Integer, Operations::RW, false),
    ResourceDefinition::single(NOTIFICATION_STORING, "Notification Storing When Disabled or Offline", ResourceKind::Boolean, Operations::RW, true),
    ResourceDefinition {
        initial: Some(InitialValue::Str("U")),
        ..ResourceDefinition::single(BINDING, "Binding", ResourceKind::String, Operations::RW, true)
    },
    ResourceDefinition::executable(REGISTRATION_UPDATE_TRIGGER, "Registration Update Trigger", true),
];

pub static SERVER_OBJECT: ObjectDefinition = ObjectDefinition {
    id: SERVER_OBJECT_ID,
    name: "LWM2M Server",
    multiple_instances: true,
    mandatory: true,
    resources: &RESOURCES,
};

pub fn register_server_object(store: &mut ObjectStore) -> Result<(), Lwm2mError> {
    store.define(&SERVER_OBJECT)
}

/// Registration parameters held by one server object instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub instance: InstanceId,
    pub short_server_id: u16,
    pub lifetime_s: u32,
    pub binding: String,
    pub default_pmin: Option<u32>,
    pub default_pmax: Option<u32>,
    pub disable_timeout_s: u32,
}

fn integer(store: &ObjectStore, instance: InstanceId, resource: u16) -> Option<i64> {
    store.value(SERVER_OBJECT_ID, instance, resource).and_then(Value::as_integer)
}

pub fn settings(store: &ObjectStore, instance: InstanceId) -> Option<ServerSettings> {
    let short_server_id = integer(store, instance, SHORT_SERVER_ID).and_then(|id| u16::try_from(id).ok())?;
    Some(ServerSettings {
        instance,
        short_server_id,
        lifetime_s: integer(store, instance, LIFETIME)
            .and_then(|l| u32::try_from(l).ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LIFETIME_S),
        binding: store
            .value(SERVER_OBJECT_ID, instance, BINDING)
            .and_then(Value::as_str)
            .filter(|b| !b.is_empty())
            .map(String::from)
            .unwrap_or_else(|| String::from("U")),
        default_pmin: integer(store, instance, DEFAULT_MIN_PERIOD).and_then(|p| u32::try_from(p).ok()),
        default_pmax: integer(store, instance, DEFAULT_MAX_PERIOD).and_then(|p| u32::try_from(p).ok()),
        disable_timeout_s: integer(store, instance, DISABLE_TIMEOUT)
            .and_then(|t| u32::try_from(t).ok())
            .unwrap_or(DEFAULT_DISABLE_TIMEOUT_S),
    })
}

/// Finds the server instance matching a security account's short server id.
pub fn find_by_short_id(store: &ObjectStore, short_server_id: u16) -> Option<ServerSettings> {
    store
        .instances(SERVER_OBJECT_ID)
        .into_iter()
        .filter_map(|instance| settings(store, instance))
        .find(|s| s.short_server_id == short_server_id)
}
