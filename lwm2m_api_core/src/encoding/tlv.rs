// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
//! OMA LwM2M TLV (content format 11542).
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Lwm2mError;
use crate::object::{ResourceId, ResourceKind, ResourceValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    ObjectInstance,
    ResourceInstance,
    MultipleResource,
    Resource,
}

impl TlvType {
    fn bits(self) -> u8 {
        match self {
            TlvType::ObjectInstance => 0b00,
            TlvType::ResourceInstance => 0b01,
            TlvType::MultipleResource => 0b10,
            TlvType::Resource => 0b11,
        }
    }

    fn from_bits(bits: u8) -> TlvType {
        match bits & 0b11 {
            0b00 => TlvType::ObjectInstance,
            0b01 => TlvType::ResourceInstance,
            0b10 => TlvType::MultipleResource,
            _ => TlvType::Resource,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub kind: TlvType,
    pub id: u16,
    pub value: &'a [u8],
}

/// Iterates over the TLV entries at one nesting level.
pub struct TlvIter<'a> {
    data: &'a [u8],
}

pub fn iter(data: &[u8]) -> TlvIter<'_> {
    TlvIter { data }
}

impl<'a> TlvIter<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], Lwm2mError> {
        if self.data.len() < n {
            self.data = &[];
            return Err(Lwm2mError::Encoding);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn next_entry(&mut self) -> Result<Tlv<'a>, Lwm2mError> {
        let header = self.take(1)?[0];
        let kind = TlvType::from_bits(header >> 6);
        let id = match header & 0b0010_0000 {
            0 => self.take(1)?[0] as u16,
            _ => {
                let bytes = self.take(2)?;
                u16::from_be_bytes([bytes[0], bytes[1]])
            }
        };
        let len = match (header >> 3) & 0b11 {
            0 => (header & 0b111) as usize,
            n => self.take(n as usize)?.iter().fold(0_usize, |acc, b| (acc << 8) | *b as usize),
        };
        let value = self.take(len)?;
        Ok(Tlv { kind, id, value })
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Result<Tlv<'a>, Lwm2mError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        Some(self.next_entry())
    }
}

pub fn write_header(out: &mut Vec<u8>, kind: TlvType, id: u16, len: usize) {
    let mut header = kind.bits() << 6;
    if id > 0xFF {
        header |= 0b0010_0000;
    }
    let length_bytes: usize = match len {
        0..=7 => {
            header |= len as u8;
            0
        }
        8..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 3,
    };
    header |= (length_bytes as u8) << 3;
    out.push(header);
    if id > 0xFF {
        out.extend_from_slice(&id.to_be_bytes());
    } else {
        out.push(id as u8);
    }
    let len_be = (len as u32).to_be_bytes();
    out.extend_from_slice(&len_be[4 - length_bytes..]);
}

pub fn write_entry(out: &mut Vec<u8>, kind: TlvType, id: u16, value: &[u8]) {
    write_header(out, kind, id, value.len());
    out.extend_from_slice(value);
}

fn encode_integer(i: i64) -> Vec<u8> {
    if let Ok(v) = i8::try_from(i) {
        v.to_be_bytes().to_vec()
    } else if let Ok(v) = i16::try_from(i) {
        v.to_be_bytes().to_vec()
    } else if let Ok(v) = i32::try_from(i) {
        v.to_be_bytes().to_vec()
    } else {
        i.to_be_bytes().to_vec()
    }
}

fn decode_integer(bytes: &[u8]) -> Result<i64, Lwm2mError> {
    match bytes.len() {
        1 => Ok(i8::from_be_bytes([bytes[0]]) as i64),
        2 => Ok(i16::from_be_bytes([bytes[0], bytes[1]]) as i64),
        4 => Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64),
        8 => {
            let mut raw = [0_u8; 8];
            raw.copy_from_slice(bytes);
            Ok(i64::from_be_bytes(raw))
        }
        _ => Err(Lwm2mError::Encoding),
    }
}

pub fn encode_value(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Integer(i) | Value::Time(i) => encode_integer(*i),
        Value::Float(f) => {
            let narrow = *f as f32;
            match narrow as f64 == *f {
                true => narrow.to_be_bytes().to_vec(),
                false => f.to_be_bytes().to_vec(),
            }
        }
        Value::Boolean(b) => alloc::vec![*b as u8],
        Value::Opaque(bytes) => bytes.clone(),
        Value::ObjectLink(o, i) => {
            let mut out = o.to_be_bytes().to_vec();
            out.extend_from_slice(&i.to_be_bytes());
            out
        }
        Value::None => Vec::new(),
    }
}

pub fn decode_value(kind: ResourceKind, bytes: &[u8]) -> Result<Value, Lwm2mError> {
    match kind {
        ResourceKind::String => Ok(Value::String(String::from(core::str::from_utf8(bytes).map_err(|_| Lwm2mError::Encoding)?))),
        ResourceKind::Integer => Ok(Value::Integer(decode_integer(bytes)?)),
        ResourceKind::Time => Ok(Value::Time(decode_integer(bytes)?)),
        ResourceKind::Float => match bytes.len() {
            4 => Ok(Value::Float(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64)),
            8 => {
                let mut raw = [0_u8; 8];
                raw.copy_from_slice(bytes);
                Ok(Value::Float(f64::from_be_bytes(raw)))
            }
            _ => Err(Lwm2mError::Encoding),
        },
        ResourceKind::Boolean => match bytes {
            [0] => Ok(Value::Boolean(false)),
            [1] => Ok(Value::Boolean(true)),
            _ => Err(Lwm2mError::Encoding),
        },
        ResourceKind::Opaque => Ok(Value::Opaque(bytes.to_vec())),
        ResourceKind::ObjectLink => match bytes {
            [a, b, c, d] => Ok(Value::ObjectLink(u16::from_be_bytes([*a, *b]), u16::from_be_bytes([*c, *d]))),
            _ => Err(Lwm2mError::Encoding),
        },
        ResourceKind::None => Err(Lwm2mError::MethodNotAllowed),
    }
}

/// Appends a resource (single or multiple) to `out`.
pub fn encode_resource(out: &mut Vec<u8>, id: ResourceId, value: &ResourceValue) {
    match value {
        ResourceValue::Single(value) => write_entry(out, TlvType::Resource, id, &encode_value(value)),
        ResourceValue::Multiple(values) => {
            let mut inner = Vec::new();
            for (instance, value) in values {
                write_entry(&mut inner, TlvType::ResourceInstance, *instance, &encode_value(value));
            }
            write_entry(out, TlvType::MultipleResource, id, &inner);
        }
    }
}

/// Decodes a Resource or Multiple Resource entry against the resource kind.
pub fn decode_resource(entry: &Tlv<'_>, kind: ResourceKind) -> Result<ResourceValue, Lwm2mError> {
    match entry.kind {
        TlvType::Resource => Ok(ResourceValue::Single(decode_value(kind, entry.value)?)),
        TlvType::MultipleResource => {
            let mut values = BTreeMap::new();
            for inner in iter(entry.value) {
                let inner = inner?;
                if inner.kind != TlvType::ResourceInstance {
                    return Err(Lwm2mError::Encoding);
                }
                values.insert(inner.id, decode_value(kind, inner.value)?);
            }
            Ok(ResourceValue::Multiple(values))
        }
        _ => Err(Lwm2mError::Encoding),
    }
}
