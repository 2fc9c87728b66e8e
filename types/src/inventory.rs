// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The inventory snapshot consumed by planning
//!
//! A snapshot is internally consistent by construction: the collector
//! refuses to emit one in which an instance references a server or service
//! the snapshot doesn't contain.  Snapshots are short-lived; they are valid
//! for one planning call.

use crate::fleet::{Instance, Server, Service};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A consistent, cross-referenced snapshot of the fleet.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    /// services by name
    pub services: BTreeMap<String, Service>,
    /// every known instance, vm and agent alike
    pub instances: Vec<Instance>,
    /// servers by uuid
    pub servers: BTreeMap<Uuid, Server>,
}

impl Inventory {
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn server(&self, uuid: Uuid) -> Option<&Server> {
        self.servers.get(&uuid)
    }

    /// Look up a server by uuid or by hostname.
    pub fn server_by_id_or_hostname(&self, key: &str) -> Option<&Server> {
        if let Ok(uuid) = key.parse::<Uuid>() {
            return self.servers.get(&uuid);
        }
        self.servers.values().find(|s| s.hostname == key)
    }

    pub fn headnode(&self) -> Option<&Server> {
        self.servers.values().find(|s| s.is_headnode)
    }

    pub fn instances_of<'a>(
        &'a self,
        service_name: &'a str,
    ) -> impl Iterator<Item = &'a Instance> + 'a {
        self.instances.iter().filter(move |i| i.service_name == service_name)
    }

    pub fn instance_by_id(&self, instance_id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.instance_id == instance_id)
    }

    pub fn instance_by_alias(&self, alias: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.alias.as_deref() == Some(alias))
    }
}
