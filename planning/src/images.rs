// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Candidate image resolution
//!
//! For a service, the candidate set is: the images its instances currently
//! run, plus every same-named image published after the oldest of those,
//! all filtered by the configured release-channel predicate and returned
//! oldest-first.  Downstream takes the last (newest) as the target.

use slog::{debug, o, warn, Logger};
use std::collections::BTreeMap;
use updateadm_clients::{Clients, ImageFilter};
use updateadm_common::error::UpstreamError;
use updateadm_common::UpdateadmConfig;
use updateadm_types::{image_name_for_service, Image, Instance, Service};
use uuid::Uuid;

pub struct ImageResolver<'a> {
    log: Logger,
    clients: &'a Clients,
    config: &'a UpdateadmConfig,
}

impl<'a> ImageResolver<'a> {
    pub fn new(
        log: &Logger,
        clients: &'a Clients,
        config: &'a UpdateadmConfig,
    ) -> Self {
        ImageResolver {
            log: log.new(o!("component" => "image-resolver")),
            clients,
            config,
        }
    }

    /// Look up one image by uuid: the local store first, then the upstream
    /// registry.  `NotFound` means neither side has it, and is distinct
    /// from a transport failure on either.
    pub async fn resolve_image(
        &self,
        uuid: Uuid,
    ) -> Result<Image, UpstreamError> {
        match self.clients.image_store.get_image(uuid).await {
            Ok(image) => Ok(image),
            Err(error) if error.is_not_found() => {
                self.clients.image_registry.get_image(uuid).await
            }
            Err(error) => Err(error),
        }
    }

    /// Compute the candidate images for updating `service`, given its
    /// current instances.  Ordered by `published_at` ascending; possibly
    /// empty.
    pub async fn candidates(
        &self,
        service: &Service,
        current_instances: &[&Instance],
    ) -> Result<Vec<Image>, UpstreamError> {
        // Images currently in use, seeded from the service's default image
        // when no instances exist.
        let mut in_use_uuids: Vec<Uuid> =
            current_instances.iter().map(|i| i.image_id).collect();
        if in_use_uuids.is_empty() {
            in_use_uuids.extend(service.default_image_uuid());
        }
        in_use_uuids.sort_unstable();
        in_use_uuids.dedup();

        let mut candidates: BTreeMap<Uuid, Image> = BTreeMap::new();
        for uuid in in_use_uuids {
            match self.resolve_image(uuid).await {
                Ok(image) => {
                    candidates.insert(uuid, image);
                }
                Err(error) if error.is_not_found() => {
                    // in use, but garbage-collected locally and gone
                    // upstream: it can't be a target, so just omit it
                    warn!(
                        self.log, "image in use but unresolvable";
                        "service" => &service.name,
                        "image" => %uuid,
                    );
                }
                Err(error) => return Err(error),
            }
        }

        // Everything of the same artifact name published after the oldest
        // image currently in use.
        if let Some(oldest) =
            candidates.values().map(|i| i.published_at).min()
        {
            let name = image_name_for_service(&service.name);
            let published = self
                .clients
                .image_registry
                .list_images(&ImageFilter { name: Some(name.to_string()) })
                .await?;
            for image in published {
                if image.published_at > oldest {
                    candidates.entry(image.uuid).or_insert(image);
                }
            }
        }

        let mut candidates: Vec<Image> = candidates
            .into_values()
            .filter(|image| {
                let keep = self.config.image_version_matches(&image.version);
                if !keep {
                    debug!(
                        self.log, "image filtered by channel constraint";
                        "service" => &service.name,
                        "image" => %image.uuid,
                        "version" => &image.version,
                    );
                }
                keep
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.published_at.cmp(&b.published_at).then(a.uuid.cmp(&b.uuid))
        });
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use updateadm_clients::sim::{SimCluster, SimState};
    use updateadm_common::test_utils::test_logger;
    use updateadm_types::{ServiceParams, ServiceType};

    fn uuid(n: u32) -> Uuid {
        Uuid::from_u128(0xcafe_0000_0000_4000_8000_000000000000u128 + n as u128)
    }

    fn image(n: u32, name: &str, version: &str, day: u32) -> Image {
        Image {
            uuid: uuid(n),
            name: name.to_string(),
            version: version.to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::days(day as i64),
            tags: Default::default(),
        }
    }

    fn service(name: &str, default_image: Option<Uuid>) -> Service {
        Service {
            name: name.to_string(),
            kind: ServiceType::Vm,
            uuid: Some(uuid(0xff)),
            params: Some(ServiceParams { image_uuid: default_image }),
        }
    }

    fn instance(name: &str, image: Uuid) -> Instance {
        Instance {
            service_name: name.to_string(),
            kind: ServiceType::Vm,
            instance_id: uuid(0xee).to_string(),
            image_id: image,
            version: "master-20240101T000000Z-g0000000".to_string(),
            server_id: uuid(0xdd),
            hostname: "headnode".to_string(),
            admin_ip: None,
            alias: None,
        }
    }

    #[tokio::test]
    async fn test_candidates_in_use_plus_newer() {
        let mut state = SimState::default();
        let in_use = image(1, "cnapi", "master-20240101T000000Z-g0000000", 0);
        let newer = image(2, "cnapi", "master-20240201T000000Z-g1111111", 31);
        let older = image(3, "cnapi", "master-20231201T000000Z-g2222222", 0);
        let off_channel =
            image(4, "cnapi", "release-20240301T000000Z-g3333333", 60);
        state.local_images.insert(in_use.uuid, in_use.clone());
        state.remote_images.insert(newer.uuid, newer.clone());
        state.remote_images.insert(off_channel.uuid, off_channel.clone());
        // older image exists upstream but predates the in-use one
        state.remote_images.insert(older.uuid, older.clone());
        // make published_at of "older" actually earlier
        state.remote_images.get_mut(&older.uuid).unwrap().published_at =
            in_use.published_at - Duration::days(10);
        let sim = SimCluster::new(state);
        let clients = sim.clients();

        let log = test_logger("candidates");
        let config = UpdateadmConfig::default();
        let resolver = ImageResolver::new(&log, &clients, &config);
        let svc = service("cnapi", None);
        let inst = instance("cnapi", in_use.uuid);
        let candidates =
            resolver.candidates(&svc, &[&inst]).await.unwrap();

        // ascending by published_at; off-channel and older excluded
        assert_eq!(
            candidates.iter().map(|i| i.uuid).collect::<Vec<_>>(),
            vec![in_use.uuid, newer.uuid]
        );
    }

    #[tokio::test]
    async fn test_candidates_seeded_from_service_params() {
        let mut state = SimState::default();
        let seed = image(1, "papi", "master-20240101T000000Z-g0000000", 0);
        let newer = image(2, "papi", "master-20240201T000000Z-g1111111", 31);
        state.remote_images.insert(seed.uuid, seed.clone());
        state.remote_images.insert(newer.uuid, newer.clone());
        let sim = SimCluster::new(state);
        let clients = sim.clients();

        let log = test_logger("seeded");
        let config = UpdateadmConfig::default();
        let resolver = ImageResolver::new(&log, &clients, &config);
        let svc = service("papi", Some(seed.uuid));
        let candidates = resolver.candidates(&svc, &[]).await.unwrap();
        assert_eq!(
            candidates.iter().map(|i| i.uuid).collect::<Vec<_>>(),
            vec![seed.uuid, newer.uuid]
        );
    }

    #[tokio::test]
    async fn test_candidates_tolerate_vanished_in_use_image() {
        // in-use image is in neither store: it is omitted, not an error
        let state = SimState::default();
        let sim = SimCluster::new(state);
        let clients = sim.clients();

        let log = test_logger("vanished");
        let config = UpdateadmConfig::default();
        let resolver = ImageResolver::new(&log, &clients, &config);
        let svc = service("cnapi", None);
        let inst = instance("cnapi", uuid(42));
        let candidates =
            resolver.candidates(&svc, &[&inst]).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_image_prefers_local_then_upstream() {
        let mut state = SimState::default();
        let local = image(1, "cnapi", "master-20240101T000000Z-g0000000", 0);
        let remote =
            image(2, "cnapi", "master-20240201T000000Z-g1111111", 31);
        state.local_images.insert(local.uuid, local.clone());
        state.remote_images.insert(remote.uuid, remote.clone());
        let sim = SimCluster::new(state);
        let clients = sim.clients();

        let log = test_logger("resolve");
        let config = UpdateadmConfig::default();
        let resolver = ImageResolver::new(&log, &clients, &config);
        assert_eq!(
            resolver.resolve_image(local.uuid).await.unwrap().uuid,
            local.uuid
        );
        assert_eq!(
            resolver.resolve_image(remote.uuid).await.unwrap().uuid,
            remote.uuid
        );
        let missing = resolver.resolve_image(uuid(99)).await.unwrap_err();
        assert!(missing.is_not_found());
    }
}
