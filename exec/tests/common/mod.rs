// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared setup for the exec test suites: project an example fleet into
//! the simulated cluster so the collector and the executors see the same
//! world.

use camino::Utf8PathBuf;
use serde_json::json;
use updateadm_clients::sim::{SimCluster, SimState};
use updateadm_clients::{RegistryService, Vm, VmNic};
use updateadm_inventory::examples::ExampleFleet;
use updateadm_types::ServiceType;
use uuid::Uuid;

/// Build a simulated cluster whose registry, VM manager, node inventory,
/// and image stores all reflect `fleet`.
pub fn sim_from_fleet(fleet: &ExampleFleet) -> SimCluster {
    let mut state = SimState::default();
    let application =
        Uuid::from_u128(0x0a11_0000_0000_4000_8000_000000000000);

    for service in fleet.inventory.services.values() {
        let Some(uuid) = service.uuid else { continue };
        let params = match service.default_image_uuid() {
            Some(image) => json!({ "image_uuid": image.to_string() }),
            None => json!({}),
        };
        let metadata = if service.name == "manatee" {
            json!({ "user-script": "#!/bin/sh\n# previous script\n" })
        } else {
            json!({})
        };
        state.services.push(RegistryService {
            uuid,
            name: service.name.clone(),
            application_uuid: application,
            kind: service.kind,
            params,
            metadata,
        });
    }

    state.servers =
        fleet.inventory.servers.values().cloned().collect();

    for instance in &fleet.inventory.instances {
        if instance.kind != ServiceType::Vm {
            continue;
        }
        let Ok(uuid) = instance.instance_id.parse::<Uuid>() else {
            continue;
        };
        let nics = match instance.admin_ip {
            Some(ip) => vec![VmNic {
                ip: ip.to_string(),
                nic_tag: "admin".to_string(),
                primary: true,
            }],
            None => Vec::new(),
        };
        state.vms.push(Vm {
            uuid,
            alias: instance.alias.clone(),
            state: "running".to_string(),
            image_uuid: instance.image_id,
            server_uuid: instance.server_id,
            tags: json!({ "smartdc_role": instance.service_name }),
            nics,
        });
    }

    for image in fleet.images.values() {
        state.local_images.insert(image.uuid, image.clone());
        state.remote_images.insert(image.uuid, image.clone());
    }

    SimCluster::new(state)
}

/// A scratch directory for a test's lock file and work root.
pub fn scratch_dir(test_name: &str) -> Utf8PathBuf {
    let dir = std::env::temp_dir()
        .join(format!("updateadm-{}-{}", test_name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    Utf8PathBuf::from_path_buf(dir).expect("temp dir is utf-8")
}
