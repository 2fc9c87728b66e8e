// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The plan builder
//!
//! Staged, and each stage is pure with respect to the cluster: normalize
//! the requests against the snapshot, detect conflicts, drop no-ops,
//! resolve each change to exactly one image, apply the safety gates, then
//! materialize the target state and hand the changes to the coordinator.

use itertools::Itertools;
use slog::{debug, o, Logger};
use std::collections::BTreeSet;
use updateadm_clients::{Clients, ImageFilter};
use updateadm_common::error::{Error, UpdateError};
use updateadm_common::UpdateadmConfig;
use updateadm_types::{
    build_date_of_version, image_name_for_service, ChangeKind,
    ChangeRequest, Instance, Inventory, NormalizedChange, UpdatePlan,
    PLAN_FORMAT_VERSION,
};
use uuid::Uuid;

use crate::coordinator::coordinate;
use crate::images::ImageResolver;

/// Caller-selected planning behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanOptions {
    /// allow updating the message bus despite the disruption that causes
    pub force_rabbitmq: bool,
    /// keep update-service changes whose instances already run the target
    pub force_same_image: bool,
    /// plan only the image downloads, not the updates themselves
    pub just_images: bool,
}

pub struct PlanBuilder<'a> {
    log: Logger,
    inventory: &'a Inventory,
    clients: &'a Clients,
    config: &'a UpdateadmConfig,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        log: &Logger,
        inventory: &'a Inventory,
        clients: &'a Clients,
        config: &'a UpdateadmConfig,
    ) -> Self {
        PlanBuilder {
            log: log.new(o!("component" => "planner")),
            inventory,
            clients,
            config,
        }
    }

    pub async fn build(
        &self,
        requests: Vec<ChangeRequest>,
        options: &PlanOptions,
    ) -> Result<UpdatePlan, Error> {
        let mut changes = self.normalize(requests).await?;
        self.check_conflicts(&changes)?;
        self.drop_noops(&mut changes, options);
        self.resolve_dependencies(&mut changes)?;
        self.safety_gates(&changes, options)?;

        let targ = self.materialize_target(&changes);
        let mut plan = UpdatePlan {
            v: PLAN_FORMAT_VERSION,
            curr: self.inventory.instances.clone(),
            targ,
            changes,
            just_images: options.just_images,
            procs: Vec::new(),
        };

        let local_images = self.local_image_uuids().await?;
        plan.procs =
            coordinate(&self.log, &plan, self.inventory, &local_images)?;
        Ok(plan)
    }

    /// Resolve every request's names to full objects and attach candidate
    /// images.
    async fn normalize(
        &self,
        requests: Vec<ChangeRequest>,
    ) -> Result<Vec<NormalizedChange>, Error> {
        let resolver =
            ImageResolver::new(&self.log, self.clients, self.config);
        let mut changes = Vec::with_capacity(requests.len());
        for request in requests {
            changes.push(self.normalize_one(&resolver, request).await?);
        }
        Ok(changes)
    }

    async fn normalize_one(
        &self,
        resolver: &ImageResolver<'_>,
        request: ChangeRequest,
    ) -> Result<NormalizedChange, Error> {
        match request {
            ChangeRequest::UpdateService { service, image } => {
                let service = self.lookup_service(&service)?;
                let instances: Vec<&Instance> =
                    self.inventory.instances_of(&service.name).collect();
                let images = self
                    .candidate_images(resolver, &service, &instances, image)
                    .await?;
                Ok(NormalizedChange {
                    kind: ChangeKind::UpdateService,
                    service,
                    instance: None,
                    server: None,
                    images,
                    image: None,
                })
            }
            ChangeRequest::UpdateInstanceByUuid { uuid, image } => {
                let instance = self.lookup_instance_by_id(&uuid)?;
                self.normalize_update_instance(resolver, instance, image)
                    .await
            }
            ChangeRequest::UpdateInstanceByAlias { alias, image } => {
                let instance = self
                    .inventory
                    .instance_by_alias(&alias)
                    .cloned()
                    .ok_or(UpdateError::UnknownInstance(alias))?;
                self.normalize_update_instance(resolver, instance, image)
                    .await
            }
            ChangeRequest::CreateInstance { service, server } => {
                let service = self.lookup_service(&service)?;
                let server = self.lookup_server(&server)?;
                let instances: Vec<&Instance> =
                    self.inventory.instances_of(&service.name).collect();
                let images = self
                    .candidate_images(resolver, &service, &instances, None)
                    .await?;
                Ok(NormalizedChange {
                    kind: ChangeKind::CreateInstance,
                    service,
                    instance: None,
                    server: Some(server),
                    images,
                    image: None,
                })
            }
            ChangeRequest::DeleteAgentInstance { service, server } => {
                let service = self.lookup_service(&service)?;
                let server = self.lookup_server(&server)?;
                let instance = self
                    .inventory
                    .instances_of(&service.name)
                    .find(|i| i.server_id == server)
                    .cloned()
                    .ok_or_else(|| {
                        UpdateError::UnknownInstance(format!(
                            "{}/{}",
                            server, service.name
                        ))
                    })?;
                Ok(NormalizedChange {
                    kind: ChangeKind::DeleteInstance,
                    service,
                    instance: Some(instance),
                    server: Some(server),
                    images: Vec::new(),
                    image: None,
                })
            }
            ChangeRequest::DeleteVmInstance { instance } => {
                let instance = self.lookup_instance_by_id(&instance)?;
                let service = self.lookup_service(&instance.service_name)?;
                let server = instance.server_id;
                Ok(NormalizedChange {
                    kind: ChangeKind::DeleteInstance,
                    service,
                    instance: Some(instance),
                    server: Some(server),
                    images: Vec::new(),
                    image: None,
                })
            }
            ChangeRequest::DeleteService { service } => {
                let service = self.lookup_service(&service)?;
                Ok(NormalizedChange {
                    kind: ChangeKind::DeleteService,
                    service,
                    instance: None,
                    server: None,
                    images: Vec::new(),
                    image: None,
                })
            }
        }
    }

    async fn normalize_update_instance(
        &self,
        resolver: &ImageResolver<'_>,
        instance: Instance,
        image: Option<Uuid>,
    ) -> Result<NormalizedChange, Error> {
        let service = self.lookup_service(&instance.service_name)?;
        let images = self
            .candidate_images(resolver, &service, &[&instance], image)
            .await?;
        let server = instance.server_id;
        Ok(NormalizedChange {
            kind: ChangeKind::UpdateInstance,
            service,
            instance: Some(instance),
            server: Some(server),
            images,
            image: None,
        })
    }

    /// Attach candidates: the explicitly requested image (verified to be
    /// the right artifact for the service), or the resolver's policy.
    async fn candidate_images(
        &self,
        resolver: &ImageResolver<'_>,
        service: &updateadm_types::Service,
        instances: &[&Instance],
        explicit: Option<Uuid>,
    ) -> Result<Vec<updateadm_types::Image>, Error> {
        match explicit {
            Some(uuid) => {
                let image = resolver.resolve_image(uuid).await?;
                let expected = image_name_for_service(&service.name);
                if image.name != expected {
                    return Err(UpdateError::ImageNameMismatch {
                        image: uuid.to_string(),
                        image_name: image.name,
                        expected: expected.to_string(),
                        service: service.name.clone(),
                    }
                    .into());
                }
                Ok(vec![image])
            }
            None => Ok(resolver.candidates(service, instances).await?),
        }
    }

    fn lookup_service(
        &self,
        name: &str,
    ) -> Result<updateadm_types::Service, UpdateError> {
        self.inventory
            .service(name)
            .cloned()
            .ok_or_else(|| UpdateError::UnknownService(name.to_string()))
    }

    fn lookup_instance_by_id(
        &self,
        id: &str,
    ) -> Result<Instance, UpdateError> {
        self.inventory
            .instance_by_id(id)
            .cloned()
            .ok_or_else(|| UpdateError::UnknownInstance(id.to_string()))
    }

    fn lookup_server(&self, key: &str) -> Result<Uuid, UpdateError> {
        self.inventory
            .server_by_id_or_hostname(key)
            .map(|s| s.uuid)
            .ok_or_else(|| UpdateError::UnknownServer(key.to_string()))
    }

    /// Pairwise conflict rules: no two changes may target the same
    /// service, no two the same instance, and no service-level change may
    /// coexist with an instance-level change for the same service.
    fn check_conflicts(
        &self,
        changes: &[NormalizedChange],
    ) -> Result<(), UpdateError> {
        for (a, b) in changes.iter().tuple_combinations() {
            if a.kind.is_service_level()
                && b.kind.is_service_level()
                && a.service.name == b.service.name
            {
                return Err(UpdateError::DuplicateServiceChange {
                    service: a.service.name.clone(),
                });
            }
            if let (Some(ia), Some(ib)) = (&a.instance, &b.instance) {
                if a.kind.is_instance_level()
                    && b.kind.is_instance_level()
                    && ia.instance_id == ib.instance_id
                {
                    return Err(UpdateError::DuplicateInstanceChange {
                        instance: ia.instance_id.clone(),
                    });
                }
            }
            if a.kind.is_service_level() != b.kind.is_service_level()
                && a.service.name == b.service.name
            {
                return Err(UpdateError::ServiceInstanceOverlap {
                    service: a.service.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Drop update changes that would do nothing: no candidates at all,
    /// or (without `force_same_image`) a single candidate that every
    /// affected instance already runs.
    fn drop_noops(
        &self,
        changes: &mut Vec<NormalizedChange>,
        options: &PlanOptions,
    ) {
        changes.retain(|change| {
            let is_update = matches!(
                change.kind,
                ChangeKind::UpdateService | ChangeKind::UpdateInstance
            );
            if !is_update {
                return true;
            }
            if change.images.is_empty() {
                debug!(
                    self.log, "dropping change with no candidate images";
                    "change" => change.describe(),
                );
                return false;
            }
            if options.force_same_image || change.images.len() != 1 {
                return true;
            }
            let candidate = change.images[0].uuid;
            let already_there = match (&change.kind, &change.instance) {
                (ChangeKind::UpdateInstance, Some(instance)) => {
                    instance.image_id == candidate
                }
                _ => self
                    .inventory
                    .instances_of(&change.service.name)
                    .all(|i| i.image_id == candidate),
            };
            if already_there {
                debug!(
                    self.log, "dropping no-op change (already on image)";
                    "change" => change.describe(),
                    "image" => %candidate,
                );
            }
            !already_there
        });
    }

    /// Each change keeps the newest candidate as its one target image.
    /// (This is the hook where inter-image dependency edges would be
    /// resolved if images ever declare them.)
    fn resolve_dependencies(
        &self,
        changes: &mut [NormalizedChange],
    ) -> Result<(), UpdateError> {
        for change in changes.iter_mut() {
            // candidates are already published_at-ascending
            change.image = change.images.last().cloned();
            change.images.clear();
            let needs_image = matches!(
                change.kind,
                ChangeKind::UpdateService
                    | ChangeKind::UpdateInstance
                    | ChangeKind::CreateInstance
            );
            if needs_image && change.image.is_none() {
                return Err(UpdateError::NoImageFound {
                    service: change.service.name.clone(),
                    constraint: self.config.version_channel.clone(),
                });
            }
        }
        Ok(())
    }

    fn safety_gates(
        &self,
        changes: &[NormalizedChange],
        options: &PlanOptions,
    ) -> Result<(), UpdateError> {
        for change in changes {
            if change.service.name == "rabbitmq" && !options.force_rabbitmq
            {
                return Err(UpdateError::RabbitmqNotForced);
            }

            if change.service.kind != updateadm_types::ServiceType::Vm {
                continue;
            }
            let affected: Vec<&Instance> = match &change.instance {
                Some(instance) => vec![instance],
                None => {
                    self.inventory.instances_of(&change.service.name).collect()
                }
            };

            for instance in affected {
                if let Some(min_platform) = &self.config.min_platform {
                    let server = self
                        .inventory
                        .server(instance.server_id)
                        .ok_or_else(|| {
                            UpdateError::UnknownServer(
                                instance.server_id.to_string(),
                            )
                        })?;
                    // platform stamps sort lexicographically in time order
                    if server.current_platform.as_str()
                        < min_platform.as_str()
                    {
                        return Err(UpdateError::PlatformTooOld {
                            server: server.uuid.to_string(),
                            service: change.service.name.clone(),
                            platform: server.current_platform.clone(),
                            minimum: min_platform.clone(),
                        });
                    }
                }

                if let Some(minimum) = self
                    .config
                    .min_image_build_date
                    .get(&change.service.name)
                {
                    let build_date =
                        build_date_of_version(&instance.version);
                    if build_date.map_or(true, |d| d < minimum.as_str()) {
                        return Err(UpdateError::ImageTooOld {
                            instance: instance.instance_id.clone(),
                            service: change.service.name.clone(),
                            build_date: build_date
                                .unwrap_or("at an unknown date")
                                .to_string(),
                            minimum: minimum.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// `targ` is `curr` with each updated instance's image substituted.
    fn materialize_target(
        &self,
        changes: &[NormalizedChange],
    ) -> Vec<Instance> {
        let mut targ = self.inventory.instances.clone();
        for change in changes {
            let Some(image) = &change.image else { continue };
            match (change.kind, &change.instance) {
                (ChangeKind::UpdateInstance, Some(instance)) => {
                    for t in targ.iter_mut() {
                        if t.instance_id == instance.instance_id {
                            t.image_id = image.uuid;
                            t.version = image.version.clone();
                        }
                    }
                }
                (ChangeKind::UpdateService, _) => {
                    for t in targ.iter_mut() {
                        if t.service_name == change.service.name {
                            t.image_id = image.uuid;
                            t.version = image.version.clone();
                        }
                    }
                }
                _ => (),
            }
        }
        targ
    }

    async fn local_image_uuids(&self) -> Result<BTreeSet<Uuid>, Error> {
        let images = self
            .clients
            .image_store
            .list_images(&ImageFilter::default())
            .await
            .map_err(Error::Upstream)?;
        Ok(images.into_iter().map(|i| i.uuid).collect())
    }
}
