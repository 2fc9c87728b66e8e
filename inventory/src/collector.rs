// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collection of the fleet snapshot from upstream sources

use futures::stream::{self, StreamExt};
use serde_json::Value;
use slog::{debug, o, warn, Logger};
use std::collections::BTreeMap;
use thiserror::Error;
use updateadm_clients::{Clients, InstanceFilter, NicFilter, ServiceFilter, VmFilter};
use updateadm_common::error::{InternalError, UpstreamError};
use updateadm_types::{
    Instance, Inventory, Server, Service, ServiceParams, ServiceType,
};
use uuid::Uuid;

use crate::builder::{InventoryBuilder, InventoryError};

/// Agent services the registry does not yet enumerate.  They must appear in
/// the catalog so that agent instances found on servers cross-reference.
pub const KNOWN_AGENT_SERVICES: &[&str] = &[
    "amon-agent",
    "amon-relay",
    "cabase",
    "cainstsvc",
    "cmon-agent",
    "cn-agent",
    "config-agent",
    "firewaller",
    "hagfish-watcher",
    "net-agent",
    "smartlogin",
    "vm-agent",
];

/// VM states considered live for inventory purposes.
const ACTIVE_VM_STATES: &[&str] = &["running", "provisioning", "stopped"];

/// Bound on concurrent per-image/per-vm lookups during collection.
const COLLECT_CONCURRENCY: usize = 5;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("inventory inconsistent")]
    Inconsistent(#[from] InventoryError),
}

impl From<CollectError> for updateadm_common::Error {
    fn from(error: CollectError) -> Self {
        match error {
            CollectError::Upstream(e) => updateadm_common::Error::Upstream(e),
            CollectError::Inconsistent(e) => updateadm_common::Error::Internal(
                InternalError::UnexpectedState(format!(
                    "inventory inconsistent: {}",
                    e
                )),
            ),
        }
    }
}

/// One agent as enumerated by a server's on-host descriptor.
#[derive(Debug, serde::Deserialize)]
struct AgentDescriptor {
    name: String,
    version: String,
    image_uuid: Option<Uuid>,
}

/// Gathers a consistent [`Inventory`] snapshot.
pub struct Collector<'a> {
    log: Logger,
    clients: &'a Clients,
    /// owner of all core-service zones
    admin_account: Uuid,
}

impl<'a> Collector<'a> {
    pub fn new(log: &Logger, clients: &'a Clients, admin_account: Uuid) -> Self {
        Collector {
            log: log.new(o!("component" => "inventory-collector")),
            clients,
            admin_account,
        }
    }

    pub async fn collect(&self) -> Result<Inventory, CollectError> {
        let mut builder = InventoryBuilder::new();
        let agent_services = self.collect_services(&mut builder).await?;
        let servers = self.collect_servers(&mut builder).await?;
        self.collect_agent_instances(&mut builder, &agent_services, &servers)
            .await?;
        self.collect_vm_instances(&mut builder).await?;
        Ok(builder.build()?)
    }

    /// Record every registry service plus the catalog supplements, and
    /// return the agent services indexed by registry uuid (needed to
    /// resolve registry agent instances to service names).
    async fn collect_services(
        &self,
        builder: &mut InventoryBuilder,
    ) -> Result<BTreeMap<Uuid, String>, CollectError> {
        let services = self
            .clients
            .registry
            .list_services(&ServiceFilter::default())
            .await?;

        let mut agent_index = BTreeMap::new();
        for service in services {
            if service.kind == ServiceType::Agent {
                agent_index.insert(service.uuid, service.name.clone());
            }
            builder.found_service(Service {
                name: service.name.clone(),
                kind: service.kind,
                uuid: Some(service.uuid),
                params: Some(ServiceParams {
                    image_uuid: service.image_uuid(),
                }),
            })?;
        }

        // The assets zone has no registry presence but must be updateable.
        builder.found_service_if_absent(Service {
            name: "assets".to_string(),
            kind: ServiceType::Vm,
            uuid: None,
            params: None,
        });

        // Agent services the registry does not yet enumerate.
        for name in KNOWN_AGENT_SERVICES {
            builder.found_service_if_absent(Service {
                name: name.to_string(),
                kind: ServiceType::Agent,
                uuid: None,
                params: None,
            });
        }

        Ok(agent_index)
    }

    async fn collect_servers(
        &self,
        builder: &mut InventoryBuilder,
    ) -> Result<Vec<Server>, CollectError> {
        let servers = self.clients.nodes.list_servers(&["sysinfo"]).await?;
        for server in &servers {
            builder.found_server(server.clone());
        }
        Ok(servers)
    }

    /// Emit one agent instance per (server, enumerated agent), preferring
    /// the registry's instance id when the registry knows the instance.
    async fn collect_agent_instances(
        &self,
        builder: &mut InventoryBuilder,
        agent_services: &BTreeMap<Uuid, String>,
        servers: &[Server],
    ) -> Result<(), CollectError> {
        let registered = self
            .clients
            .registry
            .list_instances(&InstanceFilter {
                kind: Some(ServiceType::Agent),
                service_uuid: None,
            })
            .await?;

        // index registry agent instances by (service name, server uuid)
        let mut by_service_and_server = BTreeMap::new();
        for instance in registered {
            let Some(name) = agent_services.get(&instance.service_uuid)
            else {
                warn!(
                    self.log,
                    "registry agent instance references unknown service";
                    "instance" => &instance.uuid,
                    "service_uuid" => %instance.service_uuid,
                );
                continue;
            };
            let Some(server) = instance
                .params
                .get("server_uuid")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Uuid>().ok())
            else {
                debug!(
                    self.log,
                    "registry agent instance has no server";
                    "instance" => &instance.uuid,
                );
                continue;
            };
            by_service_and_server
                .insert((name.clone(), server), instance.uuid.clone());
        }

        for server in servers {
            let agents: Vec<AgentDescriptor> = match server
                .sysinfo
                .get("SDC Agents")
            {
                Some(value) => serde_json::from_value(value.clone())
                    .unwrap_or_else(|_| {
                        warn!(
                            self.log,
                            "unparseable agents descriptor";
                            "server" => %server.uuid,
                        );
                        Vec::new()
                    }),
                None => Vec::new(),
            };

            for agent in agents {
                if !builder.has_service(&agent.name) {
                    debug!(
                        self.log,
                        "skipping agent with no catalog service";
                        "agent" => &agent.name,
                        "server" => %server.uuid,
                    );
                    continue;
                }
                let Some(image_id) = agent.image_uuid else {
                    // ancient agents predate image-based deployment and
                    // cannot be driven by image updates
                    debug!(
                        self.log,
                        "skipping agent with no image";
                        "agent" => &agent.name,
                        "server" => %server.uuid,
                    );
                    continue;
                };
                let instance_id = by_service_and_server
                    .get(&(agent.name.clone(), server.uuid))
                    .cloned()
                    .unwrap_or_else(|| {
                        Instance::synthetic_agent_id(
                            server.uuid,
                            &agent.name,
                        )
                    });
                builder.found_instance(Instance {
                    service_name: agent.name,
                    kind: ServiceType::Agent,
                    instance_id,
                    image_id,
                    version: agent.version,
                    server_id: server.uuid,
                    hostname: server.hostname.clone(),
                    admin_ip: None,
                    alias: None,
                })?;
            }
        }
        Ok(())
    }

    async fn collect_vm_instances(
        &self,
        builder: &mut InventoryBuilder,
    ) -> Result<(), CollectError> {
        let vms = self
            .clients
            .vms
            .list_vms(&VmFilter {
                owner_uuid: Some(self.admin_account),
                states: ACTIVE_VM_STATES
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            })
            .await?;

        // Only zones carrying a datacenter role are service instances.
        let vms: Vec<_> = vms
            .into_iter()
            .filter_map(|vm| {
                let role = vm.smartdc_role().map(str::to_string);
                match role {
                    Some(role) => Some((role, vm)),
                    None => {
                        debug!(
                            self.log, "ignoring roleless vm";
                            "vm" => %vm.uuid,
                        );
                        None
                    }
                }
            })
            .collect();

        // Resolve the version of each distinct image in use, a bounded
        // number at a time.
        let mut image_uuids: Vec<Uuid> =
            vms.iter().map(|(_, vm)| vm.image_uuid).collect();
        image_uuids.sort_unstable();
        image_uuids.dedup();
        let lookups: Vec<_> = stream::iter(image_uuids)
            .map(|uuid| async move {
                (uuid, self.clients.image_store.get_image(uuid).await)
            })
            .buffer_unordered(COLLECT_CONCURRENCY)
            .collect()
            .await;
        let mut versions = BTreeMap::new();
        for (uuid, result) in lookups {
            match result {
                Ok(image) => {
                    versions.insert(uuid, image.version);
                }
                Err(error) if error.is_not_found() => {
                    // image was garbage-collected locally; the instance is
                    // still real, we just can't name its version
                    warn!(
                        self.log, "image in use but not in local store";
                        "image" => %uuid,
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        for (role, vm) in vms {
            if !builder.has_service(&role) {
                warn!(
                    self.log, "vm role has no catalog service";
                    "vm" => %vm.uuid, "role" => &role,
                );
                continue;
            }
            let hostname = match builder.server(vm.server_uuid) {
                Some(server) => server.hostname.clone(),
                // let the builder report the dangling reference
                None => String::new(),
            };
            let admin_ip = match vm.admin_ip() {
                Some(ip) => ip.parse().ok(),
                None => self.admin_ip_from_nics(vm.uuid).await?,
            };
            builder.found_instance(Instance {
                service_name: role,
                kind: ServiceType::Vm,
                instance_id: vm.uuid.to_string(),
                image_id: vm.image_uuid,
                version: versions
                    .get(&vm.image_uuid)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                server_id: vm.server_uuid,
                hostname,
                admin_ip,
                alias: vm.alias,
            })?;
        }
        Ok(())
    }

    /// Fallback for VM payloads that omit the NIC list.
    async fn admin_ip_from_nics(
        &self,
        vm: Uuid,
    ) -> Result<Option<std::net::IpAddr>, CollectError> {
        let nics = self
            .clients
            .networks
            .list_nics(&NicFilter {
                belongs_to_uuid: Some(vm),
                nic_tag: Some("admin".to_string()),
            })
            .await?;
        Ok(nics.first().and_then(|nic| nic.ip.parse().ok()))
    }
}
