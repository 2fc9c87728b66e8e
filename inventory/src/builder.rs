// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface for assembling an [`Inventory`] snapshot
//!
//! This separates *gathering* (fetching data from upstream sources, the
//! collector's job) from *assembly*: normalizing what was found and
//! enforcing that the result is cross-referenced.  Servers and services
//! must be recorded before the instances that reference them; a dangling
//! reference fails the build rather than producing a partial snapshot.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use thiserror::Error;
use updateadm_types::{Instance, Inventory, Server, Service};
use uuid::Uuid;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("instance {instance} references unknown server {server}")]
    UnknownServer { instance: String, server: Uuid },

    #[error("instance {instance} references unknown service \"{service}\"")]
    UnknownService { instance: String, service: String },

    #[error("instance id {0} reported more than once")]
    DuplicateInstance(String),

    #[error("service \"{0}\" reported more than once")]
    DuplicateService(String),

    #[error("found {0} headnodes (expected exactly one)")]
    BadHeadnodeCount(usize),
}

/// Build an [`Inventory`], enforcing internal consistency.
#[derive(Debug, Default)]
pub struct InventoryBuilder {
    services: BTreeMap<String, Service>,
    servers: BTreeMap<Uuid, Server>,
    instances: Vec<Instance>,
    instance_ids: BTreeSet<String>,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn found_service(
        &mut self,
        service: Service,
    ) -> Result<(), InventoryError> {
        let name = service.name.clone();
        if self.services.insert(name.clone(), service).is_some() {
            return Err(InventoryError::DuplicateService(name));
        }
        Ok(())
    }

    /// Record a service if no service of that name is known yet.  Used for
    /// the hard-coded supplements that upstream sources may or may not
    /// also report.
    pub fn found_service_if_absent(&mut self, service: Service) {
        self.services.entry(service.name.clone()).or_insert(service);
    }

    pub fn found_server(&mut self, server: Server) {
        self.servers.insert(server.uuid, server);
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn server(&self, uuid: Uuid) -> Option<&Server> {
        self.servers.get(&uuid)
    }

    pub fn found_instance(
        &mut self,
        instance: Instance,
    ) -> Result<(), InventoryError> {
        if !self.servers.contains_key(&instance.server_id) {
            return Err(InventoryError::UnknownServer {
                instance: instance.instance_id,
                server: instance.server_id,
            });
        }
        if !self.services.contains_key(&instance.service_name) {
            return Err(InventoryError::UnknownService {
                instance: instance.instance_id,
                service: instance.service_name,
            });
        }
        if !self.instance_ids.insert(instance.instance_id.clone()) {
            return Err(InventoryError::DuplicateInstance(
                instance.instance_id,
            ));
        }
        self.instances.push(instance);
        Ok(())
    }

    pub fn build(self) -> Result<Inventory, InventoryError> {
        let headnodes =
            self.servers.values().filter(|s| s.is_headnode).count();
        if headnodes != 1 {
            return Err(InventoryError::BadHeadnodeCount(headnodes));
        }
        Ok(Inventory {
            services: self.services,
            instances: self.instances,
            servers: self.servers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use updateadm_types::ServiceType;

    fn server(uuid: Uuid, hostname: &str, headnode: bool) -> Server {
        Server {
            uuid,
            hostname: hostname.to_string(),
            is_headnode: headnode,
            current_platform: "20240101T000000Z".to_string(),
            sysinfo: json!({}),
        }
    }

    fn service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            kind: ServiceType::Vm,
            uuid: Some(Uuid::new_v4()),
            params: None,
        }
    }

    fn instance(id: &str, service: &str, server: Uuid) -> Instance {
        Instance {
            service_name: service.to_string(),
            kind: ServiceType::Vm,
            instance_id: id.to_string(),
            image_id: Uuid::new_v4(),
            version: "master-20240101T000000Z-g0000000".to_string(),
            server_id: server,
            hostname: "headnode".to_string(),
            admin_ip: None,
            alias: Some(format!("{}0", service)),
        }
    }

    #[test]
    fn test_cross_referencing() {
        let hn = Uuid::new_v4();
        let mut builder = InventoryBuilder::new();
        builder.found_server(server(hn, "headnode", true));
        builder.found_service(service("cnapi")).unwrap();

        // instance on an unknown server
        let error = builder
            .found_instance(instance("i0", "cnapi", Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(error, InventoryError::UnknownServer { .. }));

        // instance of an unknown service
        let error = builder
            .found_instance(instance("i0", "vmapi", hn))
            .unwrap_err();
        assert!(matches!(error, InventoryError::UnknownService { .. }));

        // a consistent instance, then the same id again
        builder.found_instance(instance("i0", "cnapi", hn)).unwrap();
        let error =
            builder.found_instance(instance("i0", "cnapi", hn)).unwrap_err();
        assert_eq!(error, InventoryError::DuplicateInstance("i0".to_string()));

        let inventory = builder.build().unwrap();
        assert_eq!(inventory.instances.len(), 1);
        assert_eq!(inventory.headnode().unwrap().uuid, hn);
    }

    #[test]
    fn test_headnode_required() {
        let mut builder = InventoryBuilder::new();
        builder.found_server(server(Uuid::new_v4(), "cn0", false));
        assert_eq!(
            builder.build().unwrap_err(),
            InventoryError::BadHeadnodeCount(0)
        );
    }

    #[test]
    fn test_supplements_do_not_clobber() {
        let mut builder = InventoryBuilder::new();
        let mut with_params = service("assets");
        with_params.params = Some(updateadm_types::ServiceParams {
            image_uuid: Some(Uuid::new_v4()),
        });
        builder.found_service(with_params.clone()).unwrap();
        builder.found_service_if_absent(service("assets"));
        assert_eq!(builder.services.get("assets"), Some(&with_params));
    }
}
