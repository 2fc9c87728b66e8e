// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Example inventory snapshots used for testing
//!
//! Deterministic: every uuid and timestamp is fixed, so tests that compare
//! serialized plans byte-for-byte can rely on stable output.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use updateadm_types::{
    Image, Instance, Inventory, Server, Service, ServiceParams, ServiceType,
};
use uuid::Uuid;

use crate::builder::InventoryBuilder;

/// The vm services deployed in the example fleet, one headnode instance
/// each except `manatee` (three instances, one per server).
const VM_SERVICES: &[&str] = &[
    "adminui", "amon", "amonredis", "assets", "binder", "ca", "cloudapi",
    "cnapi", "dhcpd", "fwapi", "imgapi", "mahi", "manatee", "moray", "napi",
    "papi", "rabbitmq", "redis", "sapi", "sdc", "ufds", "vmapi", "workflow",
];

/// The stamp every deployed image in the example fleet was built at.
pub const BASE_VERSION: &str = "master-20240101T000000Z-g0000000";

/// A small but representative fleet: one headnode, two compute nodes, the
/// standard vm service set, and a three-peer replicated database.
pub struct ExampleFleet {
    pub inventory: Inventory,
    /// the image each service currently runs, by service name
    pub images: BTreeMap<String, Image>,
    pub headnode: Uuid,
    pub cn1: Uuid,
    pub cn2: Uuid,
}

impl ExampleFleet {
    /// The current image of `service`.
    pub fn current_image(&self, service: &str) -> &Image {
        &self.images[service]
    }

    /// A newer image for `service`: same name, later `published_at`.
    pub fn newer_image(&self, service: &str, version: &str) -> Image {
        let current = self.current_image(service);
        Image {
            // derived from the current image's uuid, so distinct per
            // service and stable across runs
            uuid: Uuid::from_u128(current.uuid.as_u128() + 0x1000),
            name: current.name.clone(),
            version: version.to_string(),
            published_at: current.published_at + chrono::Duration::days(30),
            tags: BTreeMap::new(),
        }
    }
}

/// The administrative account owning all core zones in examples.
pub fn admin_account() -> Uuid {
    numbered_uuid(0xadf)
}

pub fn simple_fleet() -> ExampleFleet {
    let headnode = numbered_uuid(0x100);
    let cn1 = numbered_uuid(0x101);
    let cn2 = numbered_uuid(0x102);

    let mut builder = InventoryBuilder::new();
    builder.found_server(server(headnode, "headnode", true));
    builder.found_server(server(cn1, "CN1", false));
    builder.found_server(server(cn2, "CN2", false));

    let mut images = BTreeMap::new();
    for (i, name) in VM_SERVICES.iter().enumerate() {
        let image = Image {
            uuid: numbered_uuid(0x8000 + i as u32),
            name: name.to_string(),
            version: BASE_VERSION.to_string(),
            published_at: base_time(),
            tags: BTreeMap::new(),
        };
        builder
            .found_service(Service {
                name: name.to_string(),
                kind: ServiceType::Vm,
                uuid: Some(numbered_uuid(0x2000 + i as u32)),
                params: Some(ServiceParams { image_uuid: Some(image.uuid) }),
            })
            .expect("example services are unique");
        images.insert(name.to_string(), image);
    }

    let mut next_instance = 0x4000u32;
    for name in VM_SERVICES {
        let image = &images[*name];
        if *name == "manatee" {
            for (peer, server_id) in
                [(0u8, headnode), (1, cn1), (2, cn2)].into_iter()
            {
                builder
                    .found_instance(Instance {
                        service_name: name.to_string(),
                        kind: ServiceType::Vm,
                        instance_id: numbered_uuid(next_instance).to_string(),
                        image_id: image.uuid,
                        version: image.version.clone(),
                        server_id,
                        hostname: hostname_of(server_id, headnode),
                        admin_ip: Some(
                            format!("10.99.99.{}", 30 + peer)
                                .parse()
                                .expect("example ip parses"),
                        ),
                        alias: Some(format!("manatee{}", peer)),
                    })
                    .expect("example instances are consistent");
                next_instance += 1;
            }
        } else {
            builder
                .found_instance(Instance {
                    service_name: name.to_string(),
                    kind: ServiceType::Vm,
                    instance_id: numbered_uuid(next_instance).to_string(),
                    image_id: image.uuid,
                    version: image.version.clone(),
                    server_id: headnode,
                    hostname: "headnode".to_string(),
                    admin_ip: None,
                    alias: Some(format!("{}0", name)),
                })
                .expect("example instances are consistent");
            next_instance += 1;
        }
    }

    let inventory = builder.build().expect("example fleet is consistent");
    ExampleFleet { inventory, images, headnode, cn1, cn2 }
}

/// As [`simple_fleet`], but with a second `sapi` instance on `CN1`.  Used
/// to exercise unsupported-topology handling.
pub fn fleet_with_two_sapis() -> ExampleFleet {
    let fleet = simple_fleet();
    let mut inventory = fleet.inventory.clone();
    let image = fleet.current_image("sapi");
    inventory.instances.push(Instance {
        service_name: "sapi".to_string(),
        kind: ServiceType::Vm,
        instance_id: numbered_uuid(0x4fff).to_string(),
        image_id: image.uuid,
        version: image.version.clone(),
        server_id: fleet.cn1,
        hostname: "CN1".to_string(),
        admin_ip: None,
        alias: Some("sapi1".to_string()),
    });
    ExampleFleet { inventory, ..fleet }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn hostname_of(server: Uuid, headnode: Uuid) -> String {
    if server == headnode {
        "headnode".to_string()
    } else {
        format!("CN{:x}", server.as_u128() & 0xf)
    }
}

fn server(uuid: Uuid, hostname: &str, is_headnode: bool) -> Server {
    Server {
        uuid,
        hostname: hostname.to_string(),
        is_headnode,
        current_platform: "20240101T000000Z".to_string(),
        sysinfo: json!({
            "SDC Agents": [
                {
                    "name": "cn-agent",
                    "version": "2.10.0",
                    "image_uuid": numbered_uuid(0x7001).to_string(),
                },
                {
                    "name": "net-agent",
                    "version": "1.8.0",
                    "image_uuid": numbered_uuid(0x7002).to_string(),
                },
            ],
        }),
    }
}

/// Deterministic uuid for example data.
pub fn numbered_uuid(n: u32) -> Uuid {
    Uuid::from_u128(0x1de0_0000_0000_4000_8000_000000000000u128 + n as u128)
}
