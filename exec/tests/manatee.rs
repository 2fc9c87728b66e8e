// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Replicated-database procedure scenarios
//!
//! The simulated shell records every remote operation, so these tests
//! assert the exact op-by-op protocol: which server was touched, with
//! what, in what order.

mod common;

use chrono::Utc;
use common::{scratch_dir, sim_from_fleet};
use serde_json::json;
use updateadm_clients::sim::{ok_result, SimCluster};
use updateadm_clients::{RegistryMode, RemoteResult};
use updateadm_common::progress::BufferedProgress;
use updateadm_common::test_utils::test_logger;
use updateadm_common::UpdateadmConfig;
use updateadm_exec::{executor_for, ExecContext, ExecError, WorkDir};
use updateadm_inventory::examples::{simple_fleet, ExampleFleet};
use updateadm_types::{
    ChangeKind, Image, Instance, Inventory, NormalizedChange, Procedure,
    ProcedureKind,
};
use uuid::Uuid;

fn manatee_change(fleet: &ExampleFleet, image: &Image) -> NormalizedChange {
    NormalizedChange {
        kind: ChangeKind::UpdateService,
        service: fleet.inventory.services["manatee"].clone(),
        instance: None,
        server: None,
        images: Vec::new(),
        image: Some(image.clone()),
    }
}

/// Render a shard status as the status tool would print it.  Replication
/// states follow from which downstream peers are up.
fn shard_status(
    primary: &Instance,
    sync: Option<&Instance>,
    r#async: Option<&Instance>,
) -> RemoteResult {
    let peer = |instance: &Instance, repl: serde_json::Value| {
        json!({
            "zoneId": instance.instance_id,
            "ip": instance.admin_ip.map(|ip| ip.to_string())
                .unwrap_or_else(|| "10.99.99.1".to_string()),
            "repl": repl,
        })
    };
    let mut shard = serde_json::Map::new();
    let primary_repl = if sync.is_some() {
        json!({ "sync_state": "sync" })
    } else {
        json!({})
    };
    shard.insert("primary".to_string(), peer(primary, primary_repl));
    if let Some(sync) = sync {
        let sync_repl = if r#async.is_some() {
            json!({ "sync_state": "async" })
        } else {
            json!({})
        };
        shard.insert("sync".to_string(), peer(sync, sync_repl));
    }
    if let Some(a) = r#async {
        shard.insert("async".to_string(), peer(a, json!({})));
    }
    ok_result(&json!({ "sdc": serde_json::Value::Object(shard) }).to_string())
}

fn classify(script: &str) -> &'static str {
    if script.contains("manatee-adm status") {
        "status"
    } else if script.contains("cat /usbkey/default/user-script.common") {
        "fetch-user-script"
    } else if script.contains("vmadm update") {
        "push-user-script"
    } else if script.contains("svcadm -z") && script.contains("disable") {
        "disable"
    } else if script.contains("imgadm import") {
        "install-image"
    } else if script.contains("vmadm reprovision") {
        "reprovision"
    } else if script.contains("restart sapi") {
        "restart-sapi"
    } else if script.contains("psql") {
        "postgres-ping"
    } else {
        "other"
    }
}

struct Harness {
    sim: SimCluster,
    inventory: Inventory,
    config: UpdateadmConfig,
    workdir: WorkDir,
    progress: BufferedProgress,
}

impl Harness {
    fn new(test_name: &str, fleet: &ExampleFleet) -> Harness {
        let sim = sim_from_fleet(fleet);
        let root = scratch_dir(test_name);
        let workdir = WorkDir::create(&root, Utc::now()).unwrap();
        Harness {
            sim,
            inventory: fleet.inventory.clone(),
            config: UpdateadmConfig::default(),
            workdir,
            progress: BufferedProgress::new(),
        }
    }

    async fn run(&self, procedure: &Procedure) -> Result<(), ExecError> {
        let log = test_logger("manatee");
        let clients = self.sim.clients();
        let ctx = ExecContext {
            log,
            clients: &clients,
            inventory: &self.inventory,
            config: &self.config,
            workdir: &self.workdir,
            progress: &self.progress,
        };
        executor_for(procedure).execute(&ctx).await
    }

    fn ops(&self) -> Vec<(Uuid, &'static str, String)> {
        self.sim
            .shell_log()
            .into_iter()
            .map(|(server, script)| {
                (server.expect("all sim ops are targeted"),
                 classify(&script), script)
            })
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_ha_update_protocol() {
    let fleet = simple_fleet();
    let image =
        fleet.newer_image("manatee", "master-20240301T000000Z-gfeedfac");
    let m0 = fleet.inventory.instance_by_alias("manatee0").unwrap().clone();
    let m1 = fleet.inventory.instance_by_alias("manatee1").unwrap().clone();
    let m2 = fleet.inventory.instance_by_alias("manatee2").unwrap().clone();

    let harness = Harness::new("manatee-ha", &fleet);
    harness.sim.respond_to(
        "cat /usbkey/default/user-script.common",
        [ok_result("#!/bin/sh\n# fresh user script\n")],
    );
    harness.sim.respond_to(
        "manatee-adm status",
        [
            // discovery: full chain m0 -> m1 -> m2
            shard_status(&m0, Some(&m1), Some(&m2)),
            // async disabled
            shard_status(&m0, Some(&m1), None),
            // async reprovisioned and caught back up
            shard_status(&m0, Some(&m1), Some(&m2)),
            // sync disabled; former async moved up
            shard_status(&m0, Some(&m2), None),
            // sync reprovisioned; chain m0 -> m2 -> m1
            shard_status(&m0, Some(&m2), Some(&m1)),
            // primary disabled; m2 promoted
            shard_status(&m2, Some(&m1), None),
            // old primary rejoined as async
            shard_status(&m2, Some(&m1), Some(&m0)),
        ],
    );

    let procedure = Procedure {
        kind: ProcedureKind::UpdateManatee,
        changes: vec![manatee_change(&fleet, &image)],
    };
    harness.run(&procedure).await.unwrap();

    let ops = harness.ops();
    let sequence: Vec<(Uuid, &str)> =
        ops.iter().map(|(server, kind, _)| (*server, *kind)).collect();
    assert_eq!(
        sequence,
        vec![
            // user-script roll
            (fleet.headnode, "fetch-user-script"),
            (fleet.headnode, "push-user-script"),
            (fleet.cn1, "push-user-script"),
            (fleet.cn2, "push-user-script"),
            // discovery from the first local peer
            (fleet.headnode, "status"),
            // async replica
            (fleet.cn2, "disable"),
            (fleet.headnode, "status"),
            (fleet.cn2, "install-image"),
            (fleet.cn2, "reprovision"),
            (fleet.headnode, "status"),
            // sync replica
            (fleet.cn1, "disable"),
            (fleet.headnode, "status"),
            (fleet.cn1, "install-image"),
            (fleet.cn1, "reprovision"),
            (fleet.headnode, "status"),
            // primary, by promotion; observed from the former async peer
            (fleet.headnode, "disable"),
            (fleet.cn2, "status"),
            (fleet.headnode, "reprovision"),
            (fleet.cn2, "status"),
        ],
    );

    // the reprovisions hit the right zones, in leaf-first order
    let reprovisioned: Vec<&String> = ops
        .iter()
        .filter(|(_, kind, _)| *kind == "reprovision")
        .map(|(_, _, script)| script)
        .collect();
    assert!(reprovisioned[0].contains(&m2.instance_id));
    assert!(reprovisioned[1].contains(&m1.instance_id));
    assert!(reprovisioned[2].contains(&m0.instance_id));
    for script in reprovisioned {
        assert!(script.contains(&image.uuid.to_string()));
    }

    // the previous user-script was stashed for rollback
    let stash = harness.workdir.path().join("manatee-old-user-script.sh");
    let contents = std::fs::read_to_string(&stash).unwrap();
    assert!(contents.contains("previous script"));

    // the service record was pointed at the new image with the new script
    harness.sim.with_state(|state| {
        let (_, update) = state
            .service_updates
            .last()
            .expect("service record was updated")
            .clone();
        assert_eq!(update.image_uuid, Some(image.uuid));
        assert!(update
            .user_script
            .as_deref()
            .unwrap()
            .contains("fresh user script"));
    });
}

#[tokio::test(start_paused = true)]
async fn test_ha_requires_full_replication() {
    let fleet = simple_fleet();
    let image =
        fleet.newer_image("manatee", "master-20240301T000000Z-gfeedfac");
    let m0 = fleet.inventory.instance_by_alias("manatee0").unwrap().clone();
    let m1 = fleet.inventory.instance_by_alias("manatee1").unwrap().clone();

    let harness = Harness::new("manatee-noha-guard", &fleet);
    // shard is degraded: only primary + sync answering
    harness
        .sim
        .respond_to("manatee-adm status", [shard_status(&m0, Some(&m1), None)]);

    let procedure = Procedure {
        kind: ProcedureKind::UpdateManatee,
        changes: vec![manatee_change(&fleet, &image)],
    };
    let error = harness.run(&procedure).await.unwrap_err();
    assert!(error.to_string().contains("HA setup error"));
    // nothing was disabled or reprovisioned
    assert!(harness
        .ops()
        .iter()
        .all(|(_, kind, _)| !matches!(*kind, "disable" | "reprovision")));
}

#[tokio::test(start_paused = true)]
async fn test_single_peer_update_uses_proto_mode() {
    let mut fleet = simple_fleet();
    // single-peer shard: only manatee0 remains
    fleet.inventory.instances.retain(|i| {
        i.service_name != "manatee" || i.alias.as_deref() == Some("manatee0")
    });
    let image =
        fleet.newer_image("manatee", "master-20240301T000000Z-gfeedfac");
    let m0 = fleet.inventory.instance_by_alias("manatee0").unwrap().clone();
    let sapi = fleet.inventory.instance_by_alias("sapi0").unwrap().clone();

    let harness = Harness::new("manatee-single", &fleet);
    harness.sim.respond_to("psql", [ok_result(" now \n2024-03-01")]);

    let procedure = Procedure {
        kind: ProcedureKind::UpdateManatee,
        changes: vec![manatee_change(&fleet, &image)],
    };
    harness.run(&procedure).await.unwrap();

    // proto mode around the reprovision, full mode restored after
    harness.sim.with_state(|state| {
        assert_eq!(
            state.modes,
            vec![RegistryMode::Proto, RegistryMode::Full]
        );
    });

    let ops = harness.ops();
    let kinds: Vec<&str> = ops.iter().map(|(_, kind, _)| *kind).collect();
    let position = |kind: &str| {
        kinds.iter().position(|k| *k == kind).unwrap_or_else(|| {
            panic!("expected a {} op; got {:?}", kind, kinds)
        })
    };
    // install, then sapi restart (proto), then reprovision, then the
    // database liveness poll
    assert!(position("install-image") < position("restart-sapi"));
    assert!(position("restart-sapi") < position("reprovision"));
    assert!(position("reprovision") < position("postgres-ping"));

    let restart = &ops[position("restart-sapi")];
    assert_eq!(restart.0, sapi.server_id);
    assert!(restart.2.contains(&sapi.instance_id));
    let reprovision = &ops[position("reprovision")];
    assert!(reprovision.2.contains(&m0.instance_id));
}

#[tokio::test(start_paused = true)]
async fn test_single_peer_asserts_one_registry_zone() {
    let mut fleet =
        updateadm_inventory::examples::fleet_with_two_sapis();
    fleet.inventory.instances.retain(|i| {
        i.service_name != "manatee" || i.alias.as_deref() == Some("manatee0")
    });
    let image =
        fleet.newer_image("manatee", "master-20240301T000000Z-gfeedfac");

    let harness = Harness::new("manatee-two-sapis", &fleet);
    let procedure = Procedure {
        kind: ProcedureKind::UpdateManatee,
        changes: vec![manatee_change(&fleet, &image)],
    };
    let error = harness.run(&procedure).await.unwrap_err();
    assert!(matches!(error, ExecError::Precondition(_)));
    assert!(error.to_string().contains("sapi"));

    // the registry was never put into proto mode
    harness.sim.with_state(|state| assert!(state.modes.is_empty()));
    // and the sole peer was never reprovisioned
    assert!(harness
        .ops()
        .iter()
        .all(|(_, kind, _)| *kind != "reprovision"));
}
