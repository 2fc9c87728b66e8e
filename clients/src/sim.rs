// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory simulated collaborators
//!
//! Backs the test suites: a [`SimCluster`] holds shared mutable state and
//! hands out [`crate::Clients`] whose members read and mutate it.  The
//! simulated remote shell is scripted: tests register responders keyed by
//! a script substring, and every executed script is recorded so tests can
//! assert on the exact remote-operation sequence.

use crate::{
    Clients, DirectoryService, HistoryStore, ImageFilter, ImageRegistry,
    ImageStore, InstanceFilter, Job, NetworkRegistry, Nic, NicFilter,
    NodeInventory, RegistryApplication, RegistryInstance, RegistryMode,
    RegistryService, RemoteResult, RemoteShellFanout, ServiceFilter,
    ServiceRegistry, ServiceUpdate, Vm, VmFilter, VmManager, WorkflowEngine,
};
use async_trait::async_trait;
use camino::Utf8Path;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use updateadm_common::error::UpstreamError;
use updateadm_types::{HistoryRecord, Image, Server};
use uuid::Uuid;

/// Everything the simulated cluster knows.
#[derive(Default)]
pub struct SimState {
    pub applications: Vec<RegistryApplication>,
    pub services: Vec<RegistryService>,
    pub instances: Vec<RegistryInstance>,
    pub vms: Vec<Vm>,
    pub servers: Vec<Server>,
    pub platforms: Vec<String>,
    pub nics: Vec<Nic>,
    pub jobs: Vec<Job>,
    pub local_images: BTreeMap<Uuid, Image>,
    pub remote_images: BTreeMap<Uuid, Image>,
    pub directory_entries: Vec<Value>,
    pub history: Vec<HistoryRecord>,

    /// registry mode transitions, most recent last
    pub modes: Vec<RegistryMode>,
    /// every `update_service` call made
    pub service_updates: Vec<(Uuid, ServiceUpdate)>,
    /// every script executed, with the target server (`None` = broadcast)
    pub shell_log: Vec<(Option<Uuid>, String)>,
    /// scripted responses: first responder whose key is a substring of the
    /// script wins; the queue's last response repeats once drained
    pub responders: Vec<ShellResponder>,
}

pub struct ShellResponder {
    pub key: String,
    pub responses: VecDeque<RemoteResult>,
}

impl SimState {
    fn respond(&mut self, target: Option<Uuid>, script: &str) -> RemoteResult {
        self.shell_log.push((target, script.to_string()));
        for responder in &mut self.responders {
            if script.contains(&responder.key) {
                return match responder.responses.len() {
                    0 => ok_result(""),
                    1 => responder.responses[0].clone(),
                    _ => responder
                        .responses
                        .pop_front()
                        .expect("len checked above"),
                };
            }
        }
        ok_result("")
    }
}

pub fn ok_result(stdout: &str) -> RemoteResult {
    RemoteResult {
        exit_status: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed_result(stderr: &str) -> RemoteResult {
    RemoteResult {
        exit_status: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// A simulated cluster and the client bundle over it.
#[derive(Clone)]
pub struct SimCluster {
    pub state: Arc<Mutex<SimState>>,
}

impl SimCluster {
    pub fn new(state: SimState) -> Self {
        SimCluster { state: Arc::new(Mutex::new(state)) }
    }

    pub fn clients(&self) -> Clients {
        Clients {
            registry: Arc::new(SimHandle(self.state.clone())),
            vms: Arc::new(SimHandle(self.state.clone())),
            image_store: Arc::new(SimHandle(self.state.clone())),
            image_registry: Arc::new(SimHandle(self.state.clone())),
            nodes: Arc::new(SimHandle(self.state.clone())),
            networks: Arc::new(SimHandle(self.state.clone())),
            workflows: Arc::new(SimHandle(self.state.clone())),
            shell: Arc::new(SimHandle(self.state.clone())),
            directory: Arc::new(SimHandle(self.state.clone())),
            history: Arc::new(SimHandle(self.state.clone())),
        }
    }

    /// Register a scripted response sequence for any script containing
    /// `key`.
    pub fn respond_to(
        &self,
        key: &str,
        responses: impl IntoIterator<Item = RemoteResult>,
    ) {
        self.state.lock().unwrap().responders.push(ShellResponder {
            key: key.to_string(),
            responses: responses.into_iter().collect(),
        });
    }

    /// The scripts run so far, in order.
    pub fn shell_log(&self) -> Vec<(Option<Uuid>, String)> {
        self.state.lock().unwrap().shell_log.clone()
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

/// One `Arc` into the shared state, wearing whichever trait hat the caller
/// asked for.
struct SimHandle(Arc<Mutex<SimState>>);

impl SimHandle {
    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }
}

#[async_trait]
impl ServiceRegistry for SimHandle {
    async fn list_applications(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<RegistryApplication>, UpstreamError> {
        Ok(self
            .state()
            .applications
            .iter()
            .filter(|a| name.map_or(true, |n| a.name == n))
            .cloned()
            .collect())
    }

    async fn list_services(
        &self,
        filter: &ServiceFilter,
    ) -> Result<Vec<RegistryService>, UpstreamError> {
        Ok(self
            .state()
            .services
            .iter()
            .filter(|s| {
                filter.kind.map_or(true, |k| s.kind == k)
                    && filter.name.as_ref().map_or(true, |n| &s.name == n)
            })
            .cloned()
            .collect())
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<RegistryInstance>, UpstreamError> {
        let state = self.state();
        let kind_of = |inst: &RegistryInstance| {
            state
                .services
                .iter()
                .find(|s| s.uuid == inst.service_uuid)
                .map(|s| s.kind)
        };
        Ok(state
            .instances
            .iter()
            .filter(|i| {
                filter.kind.map_or(true, |k| kind_of(i) == Some(k))
                    && filter
                        .service_uuid
                        .map_or(true, |u| i.service_uuid == u)
            })
            .cloned()
            .collect())
    }

    async fn create_instance(
        &self,
        service_uuid: Uuid,
        params: &Value,
    ) -> Result<RegistryInstance, UpstreamError> {
        let instance = RegistryInstance {
            uuid: Uuid::new_v4().to_string(),
            service_uuid,
            alias: None,
            params: params.clone(),
            metadata: Value::Null,
        };
        self.state().instances.push(instance.clone());
        Ok(instance)
    }

    async fn update_service(
        &self,
        service_uuid: Uuid,
        update: &ServiceUpdate,
    ) -> Result<(), UpstreamError> {
        let mut state = self.state();
        let Some(service) =
            state.services.iter_mut().find(|s| s.uuid == service_uuid)
        else {
            return Err(UpstreamError::not_found(
                "service-registry",
                format!("UpdateService {}", service_uuid),
            ));
        };
        if let Some(image_uuid) = update.image_uuid {
            service.params["image_uuid"] =
                Value::String(image_uuid.to_string());
        }
        state.service_updates.push((service_uuid, update.clone()));
        Ok(())
    }

    async fn set_mode(
        &self,
        mode: RegistryMode,
    ) -> Result<(), UpstreamError> {
        self.state().modes.push(mode);
        Ok(())
    }
}

#[async_trait]
impl VmManager for SimHandle {
    async fn list_vms(
        &self,
        filter: &VmFilter,
    ) -> Result<Vec<Vm>, UpstreamError> {
        let _ = filter.owner_uuid;
        Ok(self
            .state()
            .vms
            .iter()
            .filter(|vm| {
                filter.states.is_empty()
                    || filter.states.iter().any(|s| *s == vm.state)
            })
            .cloned()
            .collect())
    }

    async fn add_nics(
        &self,
        _vm: Uuid,
        _networks: &[Uuid],
    ) -> Result<(), UpstreamError> {
        Ok(())
    }
}

#[async_trait]
impl ImageStore for SimHandle {
    async fn get_image(&self, uuid: Uuid) -> Result<Image, UpstreamError> {
        self.state().local_images.get(&uuid).cloned().ok_or_else(|| {
            UpstreamError::not_found("imgapi", format!("GetImage {}", uuid))
        })
    }

    async fn list_images(
        &self,
        filter: &ImageFilter,
    ) -> Result<Vec<Image>, UpstreamError> {
        Ok(self
            .state()
            .local_images
            .values()
            .filter(|i| filter.name.as_ref().map_or(true, |n| &i.name == n))
            .cloned()
            .collect())
    }

    async fn get_image_file(
        &self,
        uuid: Uuid,
        path: &Utf8Path,
    ) -> Result<(), UpstreamError> {
        let _ = ImageStore::get_image(self, uuid).await?;
        std::fs::write(path, b"image file").map_err(|e| {
            UpstreamError::call(
                "imgapi",
                format!("GetImageFile {}", uuid),
                anyhow::Error::new(e),
            )
        })
    }

    async fn import_remote_image(
        &self,
        uuid: Uuid,
    ) -> Result<Image, UpstreamError> {
        let mut state = self.state();
        let Some(image) = state.remote_images.get(&uuid).cloned() else {
            return Err(UpstreamError::not_found(
                "imgapi",
                format!("AdminImportRemoteImage {}", uuid),
            ));
        };
        state.local_images.insert(uuid, image.clone());
        Ok(image)
    }
}

#[async_trait]
impl ImageRegistry for SimHandle {
    async fn get_image(&self, uuid: Uuid) -> Result<Image, UpstreamError> {
        self.state().remote_images.get(&uuid).cloned().ok_or_else(|| {
            UpstreamError::not_found("updates", format!("GetImage {}", uuid))
        })
    }

    async fn list_images(
        &self,
        filter: &ImageFilter,
    ) -> Result<Vec<Image>, UpstreamError> {
        Ok(self
            .state()
            .remote_images
            .values()
            .filter(|i| filter.name.as_ref().map_or(true, |n| &i.name == n))
            .cloned()
            .collect())
    }

    async fn get_image_file(
        &self,
        uuid: Uuid,
        path: &Utf8Path,
    ) -> Result<(), UpstreamError> {
        let _ = ImageRegistry::get_image(self, uuid).await?;
        std::fs::write(path, b"image file").map_err(|e| {
            UpstreamError::call(
                "updates",
                format!("GetImageFile {}", uuid),
                anyhow::Error::new(e),
            )
        })
    }
}

#[async_trait]
impl NodeInventory for SimHandle {
    async fn list_servers(
        &self,
        _extras: &[&str],
    ) -> Result<Vec<Server>, UpstreamError> {
        Ok(self.state().servers.clone())
    }

    async fn list_platforms(&self) -> Result<Vec<String>, UpstreamError> {
        Ok(self.state().platforms.clone())
    }

    async fn command_execute(
        &self,
        server: Uuid,
        script: &str,
    ) -> Result<RemoteResult, UpstreamError> {
        Ok(self.state().respond(Some(server), script))
    }

    async fn set_boot_params(
        &self,
        _server: Uuid,
        _params: &Value,
    ) -> Result<(), UpstreamError> {
        Ok(())
    }
}

#[async_trait]
impl NetworkRegistry for SimHandle {
    async fn list_networks(
        &self,
        _filter: &Value,
    ) -> Result<Vec<Value>, UpstreamError> {
        Ok(Vec::new())
    }

    async fn list_nics(
        &self,
        filter: &NicFilter,
    ) -> Result<Vec<Nic>, UpstreamError> {
        Ok(self
            .state()
            .nics
            .iter()
            .filter(|nic| {
                filter
                    .belongs_to_uuid
                    .map_or(true, |u| nic.belongs_to_uuid == u)
                    && filter
                        .nic_tag
                        .as_ref()
                        .map_or(true, |t| &nic.nic_tag == t)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowEngine for SimHandle {
    async fn list_jobs(
        &self,
        execution: &str,
        limit: usize,
    ) -> Result<Vec<Job>, UpstreamError> {
        Ok(self
            .state()
            .jobs
            .iter()
            .filter(|j| j.execution == execution)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RemoteShellFanout for SimHandle {
    async fn exec_on(
        &self,
        server: Uuid,
        script: &str,
    ) -> Result<RemoteResult, UpstreamError> {
        Ok(self.state().respond(Some(server), script))
    }

    async fn exec_many(
        &self,
        servers: &[Uuid],
        script: &str,
    ) -> Result<Vec<(Uuid, RemoteResult)>, UpstreamError> {
        let mut state = self.state();
        Ok(servers
            .iter()
            .map(|&server| (server, state.respond(Some(server), script)))
            .collect())
    }

    async fn broadcast(
        &self,
        script: &str,
    ) -> Result<Vec<(Uuid, RemoteResult)>, UpstreamError> {
        let mut state = self.state();
        let servers: Vec<Uuid> =
            state.servers.iter().map(|s| s.uuid).collect();
        Ok(servers
            .into_iter()
            .map(|server| {
                let result = state.respond(Some(server), script);
                (server, result)
            })
            .collect())
    }
}

#[async_trait]
impl DirectoryService for SimHandle {
    async fn search(
        &self,
        _base: &str,
        _filter: &str,
    ) -> Result<Vec<Value>, UpstreamError> {
        Ok(self.state().directory_entries.clone())
    }
}

#[async_trait]
impl HistoryStore for SimHandle {
    async fn save_history(
        &self,
        record: &HistoryRecord,
    ) -> Result<(), UpstreamError> {
        self.state().history.push(record.clone());
        Ok(())
    }

    async fn update_history(
        &self,
        record: &HistoryRecord,
    ) -> Result<(), UpstreamError> {
        let mut state = self.state();
        match state.history.iter_mut().find(|r| r.uuid == record.uuid) {
            Some(existing) => *existing = record.clone(),
            None => state.history.push(record.clone()),
        }
        Ok(())
    }
}
