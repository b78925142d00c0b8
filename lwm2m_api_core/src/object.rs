// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Lwm2mError;

pub type ObjectId = u16;
pub type InstanceId = u16;
pub type ResourceId = u16;
pub type ResourceInstanceId = u16;

/// Address of a node in the LwM2M object tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Path {
    Root,
    Object(ObjectId),
    Instance(ObjectId, InstanceId),
    Resource(ObjectId, InstanceId, ResourceId),
    ResourceInstance(ObjectId, InstanceId, ResourceId, ResourceInstanceId),
}

impl Path {
    /// Parses Uri-Path segments. Empty segments are skipped so that `/` and `` both map to the root.
    pub fn parse<'a, I: IntoIterator<Item = &'a str>>(segments: I) -> Result<Path, Lwm2mError> {
        let mut ids = [0_u16; 4];
        let mut len = 0;
        for segment in segments.into_iter().filter(|s| !s.is_empty()) {
            if len == ids.len() {
                return Err(Lwm2mError::BadRequest);
            }
            ids[len] = segment.parse().map_err(|_| Lwm2mError::BadRequest)?;
            len += 1;
        }
        Ok(Self::from_ids(&ids[..len]))
    }

    fn from_ids(ids: &[u16]) -> Path {
        match *ids {
            [] => Path::Root,
            [o] => Path::Object(o),
            [o, i] => Path::Instance(o, i),
            [o, i, r] => Path::Resource(o, i, r),
            [o, i, r, ri, ..] => Path::ResourceInstance(o, i, r, ri),
        }
    }

    fn ids(&self) -> ([u16; 4], usize) {
        match *self {
            Path::Root => ([0; 4], 0),
            Path::Object(o) => ([o, 0, 0, 0], 1),
            Path::Instance(o, i) => ([o, i, 0, 0], 2),
            Path::Resource(o, i, r) => ([o, i, r, 0], 3),
            Path::ResourceInstance(o, i, r, ri) => ([o, i, r, ri], 4),
        }
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match *self {
            Path::Root => None,
            Path::Object(o) | Path::Instance(o, _) | Path::Resource(o, _, _) | Path::ResourceInstance(o, _, _, _) => Some(o),
        }
    }

    /// True when `other` is this path or lies below it.
    pub fn contains(&self, other: &Path) -> bool {
        let (own, own_len) = self.ids();
        let (theirs, their_len) = other.ids();
        own_len <= their_len && own[..own_len] == theirs[..own_len]
    }

    pub fn parent(&self) -> Option<Path> {
        let (ids, len) = self.ids();
        match len {
            0 => None,
            _ => Some(Self::from_ids(&ids[..len - 1])),
        }
    }

    pub fn segments(&self) -> Vec<String> {
        let (ids, len) = self.ids();
        ids[..len].iter().map(|id| alloc::format!("{}", id)).collect()
    }
}

impl core::fmt::Display for Path {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (ids, len) = self.ids();
        if len == 0 {
            return write!(f, "/");
        }
        for id in &ids[..len] {
            write!(f, "/{}", id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    String,
    Integer,
    Float,
    Boolean,
    Opaque,
    Time,
    ObjectLink,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operations {
    None,
    R,
    W,
    RW,
    E,
}

impl Operations {
    pub fn readable(self) -> bool {
        matches!(self, Operations::R | Operations::RW)
    }

    pub fn writable(self) -> bool {
        matches!(self, Operations::W | Operations::RW)
    }

    pub fn executable(self) -> bool {
        matches!(self, Operations::E)
    }
}

/// Value given to a resource when its instance is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitialValue {
    Str(&'static str),
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceDefinition {
    pub id: ResourceId,
    pub name: &'static str,
    pub kind: ResourceKind,
    pub operations: Operations,
    pub multiple: bool,
    pub mandatory: bool,
    pub initial: Option<InitialValue>,
}

impl ResourceDefinition {
    pub const fn single(id: ResourceId, name: &'static str, kind: ResourceKind, operations: Operations, mandatory: bool) -> Self {
        ResourceDefinition {
            id,
            name,
            kind,
            operations,
            multiple: false,
            mandatory,
            initial: None,
        }
    }

    pub const fn multiple(id: ResourceId, name: &'static str, kind: ResourceKind, operations: Operations, mandatory: bool) -> Self {
        ResourceDefinition {
            id,
            name,
            kind,
            operations,
            multiple: true,
            mandatory,
            initial: None,
        }
    }

    pub const fn executable(id: ResourceId, name: &'static str, mandatory: bool) -> Self {
        Self::single(id, name, ResourceKind::None, Operations::E, mandatory)
    }

    fn initial_value(&self) -> Option<ResourceValue> {
        if self.operations.executable() {
            return None;
        }
        let value = match self.initial {
            Some(initial) => Value::from_initial(initial, self.kind)?,
            None if self.mandatory => Value::default_for(self.kind),
            None => return None,
        };
        Some(match self.multiple {
            true => {
                let mut values = BTreeMap::new();
                values.insert(0, value);
                ResourceValue::Multiple(values)
            }
            false => ResourceValue::Single(value),
        })
    }
}

#[derive(Debug)]
pub struct ObjectDefinition {
    pub id: ObjectId,
    pub name: &'static str,
    pub multiple_instances: bool,
    pub mandatory: bool,
    pub resources: &'static [ResourceDefinition],
}

impl ObjectDefinition {
    pub fn resource(&self, id: ResourceId) -> Option<&'static ResourceDefinition> {
        self.resources.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Opaque(Vec<u8>),
    Time(i64),
    ObjectLink(ObjectId, InstanceId),
    None,
}

impl Value {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Value::String(_) => ResourceKind::String,
            Value::Integer(_) => ResourceKind::Integer,
            Value::Float(_) => ResourceKind::Float,
            Value::Boolean(_) => ResourceKind::Boolean,
            Value::Opaque(_) => ResourceKind::Opaque,
            Value::Time(_) => ResourceKind::Time,
            Value::ObjectLink(_, _) => ResourceKind::ObjectLink,
            Value::None => ResourceKind::None,
        }
    }

    pub fn default_for(kind: ResourceKind) -> Value {
        match kind {
            ResourceKind::String => Value::String(String::new()),
            ResourceKind::Integer => Value::Integer(0),
            ResourceKind::Float => Value::Float(0.0),
            ResourceKind::Boolean => Value::Boolean(false),
            ResourceKind::Opaque => Value::Opaque(Vec::new()),
            ResourceKind::Time => Value::Time(0),
            ResourceKind::ObjectLink => Value::ObjectLink(0xFFFF, 0xFFFF),
            ResourceKind::None => Value::None,
        }
    }

    fn from_initial(initial: InitialValue, kind: ResourceKind) -> Option<Value> {
        let value = match initial {
            InitialValue::Str(s) => Value::String(String::from(s)),
            InitialValue::Int(i) => Value::Integer(i),
            InitialValue::Float(f) => Value::Float(f),
            InitialValue::Bool(b) => Value::Boolean(b),
        };
        value.into_kind(kind).ok()
    }

    /// Converts between the integer-like kinds; everything else must already match.
    pub fn into_kind(self, kind: ResourceKind) -> Result<Value, Lwm2mError> {
        match (self, kind) {
            (Value::Integer(i), ResourceKind::Time) => Ok(Value::Time(i)),
            (Value::Time(t), ResourceKind::Integer) => Ok(Value::Integer(t)),
            (Value::Integer(i), ResourceKind::Float) => Ok(Value::Float(i as f64)),
            (value, kind) if value.kind() == kind => Ok(value),
            _ => Err(Lwm2mError::TypeMismatch),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) | Value::Time(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Single(Value),
    Multiple(BTreeMap<ResourceInstanceId, Value>),
}

impl ResourceValue {
    pub fn single(&self) -> Option<&Value> {
        match self {
            ResourceValue::Single(value) => Some(value),
            ResourceValue::Multiple(_) => None,
        }
    }
}

pub type ResourceMap = BTreeMap<ResourceId, ResourceValue>;

/// Definitions and instance data of every object known to the client.
#[derive(Default)]
pub struct ObjectStore {
    definitions: BTreeMap<ObjectId, &'static ObjectDefinition>,
    instances: BTreeMap<ObjectId, BTreeMap<InstanceId, ResourceMap>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, definition: &'static ObjectDefinition) -> Result<(), Lwm2mError> {
        if self.definitions.contains_key(&definition.id) {
            return Err(Lwm2mError::AlreadyDefined);
        }
        self.definitions.insert(definition.id, definition);
        self.instances.insert(definition.id, BTreeMap::new());
        Ok(())
    }

    pub fn definition(&self, object: ObjectId) -> Option<&'static ObjectDefinition> {
        self.definitions.get(&object).copied()
    }

    pub fn resource_definition(&self, object: ObjectId, resource: ResourceId) -> Result<&'static ResourceDefinition, Lwm2mError> {
        self.definition(object).ok_or(Lwm2mError::NotFound)?.resource(resource).ok_or(Lwm2mError::NotFound)
    }

    pub fn objects(&self) -> impl Iterator<Item = &'static ObjectDefinition> + '_ {
        self.definitions.values().copied()
    }

    pub fn instances(&self, object: ObjectId) -> Vec<InstanceId> {
        match self.instances.get(&object) {
            Some(instances) => instances.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    pub fn has_instance(&self, object: ObjectId, instance: InstanceId) -> bool {
        self.instances.get(&object).map(|i| i.contains_key(&instance)).unwrap_or(false)
    }

    /// Creates an instance, picking the lowest free id when none is given.
    pub fn create_instance(&mut self, object: ObjectId, instance: Option<InstanceId>) -> Result<InstanceId, Lwm2mError> {
        let definition = self.definition(object).ok_or(Lwm2mError::NotDefined)?;
        let instances = self.instances.entry(object).or_default();

        if !definition.multiple_instances && !instances.is_empty() {
            return Err(Lwm2mError::InstanceLimit);
        }

        let id = match instance {
            Some(id) if instances.contains_key(&id) => return Err(Lwm2mError::AlreadyExists),
            Some(id) => id,
            None => (0..=u16::MAX).find(|id| !instances.contains_key(id)).ok_or(Lwm2mError::InstanceLimit)?,
        };
        if !definition.multiple_instances && id != 0 {
            return Err(Lwm2mError::InstanceLimit);
        }

        let mut resources = ResourceMap::new();
        for resource in definition.resources {
            if let Some(value) = resource.initial_value() {
                resources.insert(resource.id, value);
            }
        }
        instances.insert(id, resources);
        Ok(id)
    }

    pub fn delete_instance(&mut self, object: ObjectId, instance: InstanceId) -> Result<(), Lwm2mError> {
        let instances = self.instances.get_mut(&object).ok_or(Lwm2mError::NotFound)?;
        instances.remove(&instance).map(|_| ()).ok_or(Lwm2mError::NotFound)
    }

    pub fn resources(&self, object: ObjectId, instance: InstanceId) -> Option<&ResourceMap> {
        self.instances.get(&object)?.get(&instance)
    }

    pub fn read(&self, object: ObjectId, instance: InstanceId, resource: ResourceId) -> Result<&ResourceValue, Lwm2mError> {
        self.resources(object, instance).ok_or(Lwm2mError::NotFound)?.get(&resource).ok_or(Lwm2mError::NotFound)
    }

    /// Single-valued read; `None` when absent or when the resource holds multiple instances.
    pub fn value(&self, object: ObjectId, instance: InstanceId, resource: ResourceId) -> Option<&Value> {
        self.read(object, instance, resource).ok()?.single()
    }

    pub fn write(&mut self, object: ObjectId, instance: InstanceId, resource: ResourceId, value: ResourceValue) -> Result<(), Lwm2mError> {
        let definition = self.resource_definition(object, resource)?;
        let value = Self::check(definition, value)?;
        let resources = self.resources_mut(object, instance)?;
        resources.insert(resource, value);
        Ok(())
    }

    pub fn set(&mut self, object: ObjectId, instance: InstanceId, resource: ResourceId, value: Value) -> Result<(), Lwm2mError> {
        self.write(object, instance, resource, ResourceValue::Single(value))
    }

    pub fn write_resource_instance(
        &mut self,
        object: ObjectId,
        instance: InstanceId,
        resource: ResourceId,
        resource_instance: ResourceInstanceId,
        value: Value,
    ) -> Result<(), Lwm2mError> {
        let definition = self.resource_definition(object, resource)?;
        if !definition.multiple {
            return Err(Lwm2mError::BadRequest);
        }
        let value = value.into_kind(definition.kind)?;
        let resources = self.resources_mut(object, instance)?;
        match resources.entry(resource).or_insert_with(|| ResourceValue::Multiple(BTreeMap::new())) {
            ResourceValue::Multiple(values) => {
                values.insert(resource_instance, value);
                Ok(())
            }
            ResourceValue::Single(_) => Err(Lwm2mError::TypeMismatch),
        }
    }

    pub fn remove_resource(&mut self, object: ObjectId, instance: InstanceId, resource: ResourceId) -> Result<(), Lwm2mError> {
        let definition = self.resource_definition(object, resource)?;
        if definition.mandatory {
            return Err(Lwm2mError::BadRequest);
        }
        self.resources_mut(object, instance)?.remove(&resource);
        Ok(())
    }

    /// Adds one to an integer resource and returns the new value.
    pub fn increment(&mut self, object: ObjectId, instance: InstanceId, resource: ResourceId) -> Result<i64, Lwm2mError> {
        let current = match self.read(object, instance, resource) {
            Ok(value) => value.single().and_then(Value::as_integer).ok_or(Lwm2mError::TypeMismatch)?,
            Err(Lwm2mError::NotFound) if self.has_instance(object, instance) => 0,
            Err(err) => return Err(err),
        };
        let next = current.saturating_add(1);
        self.set(object, instance, resource, Value::Integer(next))?;
        Ok(next)
    }

    fn resources_mut(&mut self, object: ObjectId, instance: InstanceId) -> Result<&mut ResourceMap, Lwm2mError> {
        self.instances.get_mut(&object).ok_or(Lwm2mError::NotFound)?.get_mut(&instance).ok_or(Lwm2mError::NotFound)
    }

    fn check(definition: &ResourceDefinition, value: ResourceValue) -> Result<ResourceValue, Lwm2mError> {
        if definition.operations.executable() {
            return Err(Lwm2mError::MethodNotAllowed);
        }
        match (value, definition.multiple) {
            (ResourceValue::Single(value), false) => Ok(ResourceValue::Single(value.into_kind(definition.kind)?)),
            (ResourceValue::Multiple(values), true) => {
                let mut checked = BTreeMap::new();
                for (id, value) in values {
                    checked.insert(id, value.into_kind(definition.kind)?);
                }
                Ok(ResourceValue::Multiple(checked))
            }
            _ => Err(Lwm2mError::TypeMismatch),
        }
    }
}
