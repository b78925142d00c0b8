// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
//! Plain text (content format 0) representation of single resource values.
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Lwm2mError;
use crate::object::{ResourceKind, Value};

pub fn encode(value: &Value) -> Result<Vec<u8>, Lwm2mError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) | Value::Time(i) => alloc::format!("{}", i),
        Value::Float(f) => alloc::format!("{}", f),
        Value::Boolean(b) => String::from(if *b { "1" } else { "0" }),
        Value::ObjectLink(o, i) => alloc::format!("{}:{}", o, i),
        Value::Opaque(_) | Value::None => return Err(Lwm2mError::NotAcceptable),
    };
    Ok(text.into_bytes())
}

pub fn decode(kind: ResourceKind, payload: &[u8]) -> Result<Value, Lwm2mError> {
    if kind == ResourceKind::Opaque {
        return Ok(Value::Opaque(payload.to_vec()));
    }
    let text = core::str::from_utf8(payload).map_err(|_| Lwm2mError::Encoding)?;
    match kind {
        ResourceKind::String => Ok(Value::String(String::from(text))),
        ResourceKind::Integer => text.trim().parse().map(Value::Integer).map_err(|_| Lwm2mError::Encoding),
        ResourceKind::Time => text.trim().parse().map(Value::Time).map_err(|_| Lwm2mError::Encoding),
        ResourceKind::Float => text.trim().parse().map(Value::Float).map_err(|_| Lwm2mError::Encoding),
        ResourceKind::Boolean => match text.trim() {
            "1" | "true" => Ok(Value::Boolean(true)),
            "0" | "false" => Ok(Value::Boolean(false)),
            _ => Err(Lwm2mError::Encoding),
        },
        ResourceKind::ObjectLink => {
            let (object, instance) = text.trim().split_once(':').ok_or(Lwm2mError::Encoding)?;
            Ok(Value::ObjectLink(
                object.parse().map_err(|_| Lwm2mError::Encoding)?,
                instance.parse().map_err(|_| Lwm2mError::Encoding)?,
            ))
        }
        ResourceKind::Opaque => Ok(Value::Opaque(payload.to_vec())),
        ResourceKind::None => Err(Lwm2mError::MethodNotAllowed),
    }
}
