// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use alloc::string::String;

use crate::error::Lwm2mError;
use crate::object::{InstanceId, ObjectDefinition, ObjectStore, Operations, ResourceDefinition, ResourceKind, Value};

pub const SECURITY_OBJECT_ID: u16 = 0;

pub const SERVER_URI: u16 = 0;
pub const BOOTSTRAP_SERVER: u16 = 1;
pub const SECURITY_MODE: u16 = 2;
pub const PUBLIC_KEY_OR_IDENTITY: u16 = 3;
pub const SERVER_PUBLIC_KEY: u16 = 4;
pub const SECRET_KEY: u16 = 5;
pub const SHORT_SERVER_ID: u16 = 10;
pub const CLIENT_HOLD_OFF_TIME: u16 = 11;

pub const SECURITY_MODE_NO_SEC: i64 = 3;

static RESOURCES: [ResourceDefinition; 8] = [
    ResourceDefinition::single(SERVER_URI, "LWM2M Server URI", ResourceKind::String, Operations::None, true),
    ResourceDefinition::single(BOOTSTRAP_SERVER, "Bootstrap Server", ResourceKind::Boolean, Operations::None, true),
    ResourceDefinition::single(SECURITY_MODE, "Security Mode", ResourceKind::Integer, Operations::None, true),
    ResourceDefinition::single(PUBLIC_KEY_OR_IDENTITY, "Public Key or Identity", ResourceKind::Opaque, Operations::None, true),
    ResourceDefinition::single(SERVER_PUBLIC_KEY, "Server Public Key", ResourceKind::Opaque, Operations::None, true),
    ResourceDefinition::single(SECRET_KEY, "Secret Key", ResourceKind::Opaque, Operations::None, true),
    ResourceDefinition::single(SHORT_SERVER_ID, "Short Server ID", ResourceKind::Integer, Operations::None, false),
    ResourceDefinition::single(CLIENT_HOLD_OFF_TIME, "Client Hold Off Time", ResourceKind::Integer, Operations::None, false),
];

pub static SECURITY_OBJECT: ObjectDefinition = ObjectDefinition {
    id: SECURITY_OBJECT_ID,
    name: "LWM2M Security",
    multiple_instances: true,
    mandatory: true,
    resources: &RESOURCES,
};

pub fn register_security_object(store: &mut ObjectStore) -> Result<(), Lwm2mError> {
    store.define(&SECURITY_OBJECT)
}

/// Creates the bootstrap server account pointing at `bootstrap_uri`.
pub fn populate_security_object(store: &mut ObjectStore, bootstrap_uri: &str) -> Result<InstanceId, Lwm2mError> {
    let instance = store.create_instance(SECURITY_OBJECT_ID, None)?;
    store.set(SECURITY_OBJECT_ID, instance, SERVER_URI, Value::String(String::from(bootstrap_uri)))?;
    store.set(SECURITY_OBJECT_ID, instance, BOOTSTRAP_SERVER, Value::Boolean(true))?;
    store.set(SECURITY_OBJECT_ID, instance, SECURITY_MODE, Value::Integer(SECURITY_MODE_NO_SEC))?;
    store.set(SECURITY_OBJECT_ID, instance, CLIENT_HOLD_OFF_TIME, Value::Integer(0))?;
    Ok(instance)
}

/// Security account as seen by the client state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityAccount {
    pub instance: InstanceId,
    pub uri: String,
    pub bootstrap: bool,
    pub mode: i64,
    pub short_server_id: Option<u16>,
    pub hold_off_s: u32,
}

pub fn accounts(store: &ObjectStore) -> impl Iterator<Item = SecurityAccount> + '_ {
    store.instances(SECURITY_OBJECT_ID).into_iter().filter_map(move |instance| {
        let uri = store.value(SECURITY_OBJECT_ID, instance, SERVER_URI)?.as_str()?;
        Some(SecurityAccount {
            instance,
            uri: String::from(uri),
            bootstrap: store.value(SECURITY_OBJECT_ID, instance, BOOTSTRAP_SERVER).and_then(Value::as_bool).unwrap_or(false),
            mode: store
                .value(SECURITY_OBJECT_ID, instance, SECURITY_MODE)
                .and_then(Value::as_integer)
                .unwrap_or(SECURITY_MODE_NO_SEC),
            short_server_id: store
                .value(SECURITY_OBJECT_ID, instance, SHORT_SERVER_ID)
                .and_then(Value::as_integer)
                .and_then(|id| u16::try_from(id).ok()),
            hold_off_s: store
                .value(SECURITY_OBJECT_ID, instance, CLIENT_HOLD_OFF_TIME)
                .and_then(Value::as_integer)
                .and_then(|t| u32::try_from(t).ok())
                .unwrap_or(0),
        })
    })
}
