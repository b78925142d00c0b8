// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
//! CoRE link format (RFC 6690) payloads for Register/Update and Discover.
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::error::Lwm2mError;
use crate::object::{ObjectStore, Path};
use crate::objects::security::SECURITY_OBJECT_ID;
use crate::observe::Attributes;

/// Object tree advertised to the server. The security object is never advertised.
pub fn registration_payload(store: &ObjectStore) -> String {
    let mut links: Vec<String> = Vec::new();
    links.push(alloc::format!("</>;rt=\"oma.lwm2m\";ct={}", super::CONTENT_FORMAT_TLV));
    for definition in store.objects() {
        if definition.id == SECURITY_OBJECT_ID {
            continue;
        }
        let instances = store.instances(definition.id);
        if instances.is_empty() {
            links.push(alloc::format!("<{}>", Path::Object(definition.id)));
        }
        for instance in instances {
            links.push(alloc::format!("<{}>", Path::Instance(definition.id, instance)));
        }
    }
    links.join(",")
}

fn push_link(links: &mut Vec<String>, path: Path, attributes: Attributes) {
    let mut link = alloc::format!("<{}>", path);
    if let Some(pmin) = attributes.pmin {
        let _ = write!(link, ";pmin={}", pmin);
    }
    if let Some(pmax) = attributes.pmax {
        let _ = write!(link, ";pmax={}", pmax);
    }
    links.push(link);
}

/// Discover response for an object, instance or resource path.
///
/// `attributes` returns the attributes attached directly to a path.
pub fn discover<F>(store: &ObjectStore, path: Path, attributes: F) -> Result<String, Lwm2mError>
where
    F: Fn(Path) -> Attributes,
{
    let mut links = Vec::new();
    match path {
        Path::Object(object) => {
            let definition = store.definition(object).ok_or(Lwm2mError::NotFound)?;
            push_link(&mut links, path, attributes(path));
            for instance in store.instances(object) {
                push_link(&mut links, Path::Instance(object, instance), attributes(Path::Instance(object, instance)));
                for resource in definition.resources {
                    let resource_path = Path::Resource(object, instance, resource.id);
                    if resource.operations.executable() || store.read(object, instance, resource.id).is_ok() {
                        push_link(&mut links, resource_path, attributes(resource_path));
                    }
                }
            }
        }
        Path::Instance(object, instance) => {
            let definition = store.definition(object).ok_or(Lwm2mError::NotFound)?;
            if !store.has_instance(object, instance) {
                return Err(Lwm2mError::NotFound);
            }
            push_link(&mut links, path, attributes(path));
            for resource in definition.resources {
                let resource_path = Path::Resource(object, instance, resource.id);
                if resource.operations.executable() || store.read(object, instance, resource.id).is_ok() {
                    push_link(&mut links, resource_path, attributes(resource_path));
                }
            }
        }
        Path::Resource(object, instance, resource) => {
            let definition = store.resource_definition(object, resource)?;
            if !definition.operations.executable() {
                store.read(object, instance, resource)?;
            } else if !store.has_instance(object, instance) {
                return Err(Lwm2mError::NotFound);
            }
            push_link(&mut links, path, attributes(path));
        }
        Path::Root | Path::ResourceInstance(..) => return Err(Lwm2mError::BadRequest),
    }
    Ok(links.join(","))
}
