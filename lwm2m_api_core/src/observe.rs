// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::net::SocketAddr;

use crate::error::Lwm2mError;
use crate::object::Path;

/// Notification attributes in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attributes {
    pub pmin: Option<u32>,
    pub pmax: Option<u32>,
}

impl Attributes {
    /// Fills unset fields from `fallback`.
    pub fn or(self, fallback: Attributes) -> Attributes {
        Attributes {
            pmin: self.pmin.or(fallback.pmin),
            pmax: self.pmax.or(fallback.pmax),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pmin.is_none() && self.pmax.is_none()
    }

    /// Applies Write-Attributes query parameters (`pmin=10`, `pmax=60`, `pmin` to clear).
    pub fn apply_queries<'a, I: IntoIterator<Item = &'a str>>(&mut self, queries: I) -> Result<(), Lwm2mError> {
        let mut updated = *self;
        for query in queries {
            let (name, value) = match query.split_once('=') {
                Some((name, value)) => (name, Some(value.parse::<u32>().map_err(|_| Lwm2mError::BadRequest)?)),
                None => (query, None),
            };
            match name {
                "pmin" => updated.pmin = value,
                "pmax" => updated.pmax = value,
                "gt" | "lt" | "st" => log::warn!("Ignoring unsupported notification attribute {}", name),
                _ => return Err(Lwm2mError::BadRequest),
            }
        }
        if let (Some(pmin), Some(pmax)) = (updated.pmin, updated.pmax) {
            if pmax < pmin {
                return Err(Lwm2mError::BadRequest);
            }
        }
        *self = updated;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub server: SocketAddr,
    pub token: Vec<u8>,
    pub path: Path,
    /// Content format requested by the Observe request.
    pub accept: Option<u16>,
    pub sequence: u32,
    pub last_sent_ms: u64,
    pub changed: bool,
    /// Message id of the last notification, used to match a Reset that cancels the observation.
    pub last_message_id: Option<u16>,
}

#[derive(Default)]
pub struct ObservationRegistry {
    observations: Vec<Observation>,
    attributes: BTreeMap<Path, Attributes>,
}

impl ObservationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observation, replacing any existing one from the same server on the same path.
    pub fn observe(&mut self, server: SocketAddr, token: Vec<u8>, path: Path, accept: Option<u16>, now: u64) -> u32 {
        self.observations.retain(|o| !(o.server == server && o.path == path));
        self.observations.push(Observation {
            server,
            token,
            path,
            accept,
            sequence: 0,
            last_sent_ms: now,
            changed: false,
            last_message_id: None,
        });
        0
    }

    pub fn cancel_token(&mut self, server: SocketAddr, token: &[u8]) -> bool {
        let before = self.observations.len();
        self.observations.retain(|o| !(o.server == server && o.token == token));
        before != self.observations.len()
    }

    pub fn cancel_message(&mut self, server: SocketAddr, message_id: u16) -> bool {
        let before = self.observations.len();
        self.observations.retain(|o| !(o.server == server && o.last_message_id == Some(message_id)));
        before != self.observations.len()
    }

    /// Drops observations on `path` and everything below it.
    pub fn cancel_below(&mut self, path: Path) {
        self.observations.retain(|o| !path.contains(&o.path));
    }

    pub fn cancel_all(&mut self) {
        self.observations.clear();
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// Flags every observation that covers `path` or lies below it.
    pub fn mark_changed(&mut self, path: Path) {
        for observation in self.observations.iter_mut() {
            if observation.path.contains(&path) || path.contains(&observation.path) {
                observation.changed = true;
            }
        }
    }

    pub fn set_attributes(&mut self, path: Path, attributes: Attributes) {
        match attributes.is_empty() {
            true => {
                self.attributes.remove(&path);
            }
            false => {
                self.attributes.insert(path, attributes);
            }
        }
    }

    pub fn attributes(&self, path: Path) -> Attributes {
        self.attributes.get(&path).copied().unwrap_or_default()
    }

    /// Attributes of `path`, inherited from enclosing paths, then from `defaults`.
    pub fn effective(&self, path: Path, defaults: Attributes) -> Attributes {
        let mut attributes = Attributes::default();
        let mut current = Some(path);
        while let Some(p) = current {
            attributes = attributes.or(self.attributes(p));
            current = p.parent();
        }
        attributes.or(defaults)
    }

    fn due_at(&self, observation: &Observation, defaults: Attributes) -> Option<u64> {
        let attributes = self.effective(observation.path, defaults);
        let pmax_at = attributes.pmax.filter(|p| *p > 0).map(|p| observation.last_sent_ms + p as u64 * 1000);
        let change_at = match observation.changed {
            true => Some(observation.last_sent_ms + attributes.pmin.unwrap_or(0) as u64 * 1000),
            false => None,
        };
        match (change_at, pmax_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Indices of the observations that must be notified at `now`.
    pub fn due(&self, now: u64, defaults: Attributes) -> Vec<usize> {
        self.observations
            .iter()
            .enumerate()
            .filter(|(_, o)| self.due_at(o, defaults).map(|at| at <= now).unwrap_or(false))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn next_deadline(&self, defaults: Attributes) -> Option<u64> {
        self.observations.iter().filter_map(|o| self.due_at(o, defaults)).min()
    }

    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index)
    }

    /// Records a sent notification and returns the observe sequence number it carried.
    pub fn sent(&mut self, index: usize, now: u64, message_id: u16) -> Option<u32> {
        let observation = self.observations.get_mut(index)?;
        observation.sequence = (observation.sequence + 1) & 0x00FF_FFFF;
        observation.last_sent_ms = now;
        observation.changed = false;
        observation.last_message_id = Some(message_id);
        Some(observation.sequence)
    }

    pub fn remove(&mut self, index: usize) {
        if index < self.observations.len() {
            self.observations.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> SocketAddr {
        "[fd00::1]:5683".parse().unwrap()
    }

    #[test]
    fn attribute_queries() {
        let mut attributes = Attributes::default();
        attributes.apply_queries(["pmin=5", "pmax=60"]).unwrap();
        assert_eq!(attributes, Attributes { pmin: Some(5), pmax: Some(60) });
        attributes.apply_queries(["pmin"]).unwrap();
        assert_eq!(attributes.pmin, None);
        assert_eq!(attributes.apply_queries(["pmin=70"]), Err(Lwm2mError::BadRequest));
        assert_eq!(attributes.apply_queries(["epmin=1"]), Err(Lwm2mError::BadRequest));
        assert_eq!(attributes.pmax, Some(60));
    }

    #[test]
    fn attributes_are_inherited() {
        let mut registry = ObservationRegistry::new();
        registry.set_attributes(Path::Object(3200), Attributes { pmin: Some(2), pmax: None });
        registry.set_attributes(Path::Resource(3200, 0, 5501), Attributes { pmin: None, pmax: Some(30) });
        let defaults = Attributes { pmin: Some(0), pmax: Some(300) };
        assert_eq!(registry.effective(Path::Resource(3200, 0, 5501), defaults), Attributes { pmin: Some(2), pmax: Some(30) });
        assert_eq!(registry.effective(Path::Resource(3, 0, 0), defaults), defaults);
    }

    #[test]
    fn changes_respect_pmin() {
        let mut registry = ObservationRegistry::new();
        registry.observe(server(), vec![1], Path::Resource(3200, 0, 5501), None, 1_000);
        registry.set_attributes(Path::Resource(3200, 0, 5501), Attributes { pmin: Some(5), pmax: None });
        assert!(registry.due(2_000, Attributes::default()).is_empty());

        registry.mark_changed(Path::Resource(3200, 0, 5501));
        assert!(registry.due(2_000, Attributes::default()).is_empty());
        assert_eq!(registry.next_deadline(Attributes::default()), Some(6_000));
        assert_eq!(registry.due(6_000, Attributes::default()), vec![0]);

        assert_eq!(registry.sent(0, 6_000, 77), Some(1));
        assert!(registry.due(7_000, Attributes::default()).is_empty());
    }

    #[test]
    fn pmax_forces_notification() {
        let mut registry = ObservationRegistry::new();
        registry.observe(server(), vec![1], Path::Instance(3200, 0), None, 0);
        let defaults = Attributes { pmin: None, pmax: Some(10) };
        assert!(registry.due(9_999, defaults).is_empty());
        assert_eq!(registry.due(10_000, defaults), vec![0]);
    }

    #[test]
    fn changes_below_an_observed_instance_count() {
        let mut registry = ObservationRegistry::new();
        registry.observe(server(), vec![1], Path::Instance(3200, 0), None, 0);
        registry.mark_changed(Path::Resource(3200, 1, 5501));
        assert!(registry.due(1, Attributes::default()).is_empty());
        registry.mark_changed(Path::Resource(3200, 0, 5501));
        assert_eq!(registry.due(1, Attributes::default()), vec![0]);
    }

    #[test]
    fn cancellation() {
        let mut registry = ObservationRegistry::new();
        registry.observe(server(), vec![1], Path::Resource(3200, 0, 5501), None, 0);
        registry.observe(server(), vec![2], Path::Resource(3200, 1, 5501), None, 0);
        registry.observe(server(), vec![3], Path::Resource(3200, 1, 5501), None, 0);
        assert_eq!(registry.len(), 2);
        assert!(registry.cancel_token(server(), &[1]));
        registry.sent(0, 10, 9);
        assert!(registry.cancel_message(server(), 9));
        assert!(registry.is_empty());
    }
}
