// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planner scenarios over the example fleet

use std::collections::BTreeSet;
use updateadm_clients::sim::{SimCluster, SimState};
use updateadm_clients::Clients;
use updateadm_common::error::{Error, UpdateError};
use updateadm_common::test_utils::test_logger;
use updateadm_common::UpdateadmConfig;
use updateadm_inventory::examples::{simple_fleet, ExampleFleet};
use updateadm_planning::{coordinate, PlanBuilder, PlanOptions};
use updateadm_types::{ChangeRequest, ProcedureKind};

/// Wire the example fleet's current images into a simulated cluster: all
/// deployed images are in the local store, and the upstream registry knows
/// the same set.
fn sim_for(fleet: &ExampleFleet) -> SimCluster {
    let mut state = SimState::default();
    for image in fleet.images.values() {
        state.local_images.insert(image.uuid, image.clone());
        state.remote_images.insert(image.uuid, image.clone());
    }
    SimCluster::new(state)
}

fn update_service(name: &str) -> ChangeRequest {
    ChangeRequest::UpdateService { service: name.to_string(), image: None }
}

async fn build_plan(
    fleet: &ExampleFleet,
    clients: &Clients,
    requests: Vec<ChangeRequest>,
    options: PlanOptions,
) -> Result<updateadm_types::UpdatePlan, Error> {
    let log = test_logger("planner");
    let config = UpdateadmConfig::default();
    PlanBuilder::new(&log, &fleet.inventory, clients, &config)
        .build(requests, &options)
        .await
}

#[tokio::test]
async fn test_drop_same_image() {
    // the only candidate is the image cnapi already runs: the change drops
    // out and the plan is empty
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let clients = sim.clients();
    let plan = build_plan(
        &fleet,
        &clients,
        vec![update_service("cnapi")],
        PlanOptions::default(),
    )
    .await
    .unwrap();
    assert!(plan.changes.is_empty());
    assert!(plan.procs.is_empty());
}

#[tokio::test]
async fn test_simple_stateless_update() {
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("cnapi", "master-20240201T000000Z-gabcdef1");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
        // already local: no prefetch needed
        state.local_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();
    let plan = build_plan(
        &fleet,
        &clients,
        vec![update_service("cnapi")],
        PlanOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(plan.procs.len(), 1);
    assert_eq!(plan.procs[0].kind, ProcedureKind::UpdateStatelessServices);
    assert_eq!(plan.procs[0].changes.len(), 1);
    assert_eq!(
        plan.procs[0].changes[0].image.as_ref().unwrap().uuid,
        newer.uuid
    );

    // targ = curr with only cnapi's image substituted
    let curr_ids: BTreeSet<_> =
        plan.curr.iter().map(|i| i.instance_id.clone()).collect();
    let targ_ids: BTreeSet<_> =
        plan.targ.iter().map(|i| i.instance_id.clone()).collect();
    assert_eq!(curr_ids, targ_ids);
    let targ_cnapi = plan
        .targ
        .iter()
        .find(|i| i.service_name == "cnapi")
        .expect("cnapi in targ");
    assert_eq!(targ_cnapi.image_id, newer.uuid);
    assert_eq!(targ_cnapi.version, newer.version);
    for (c, t) in plan.curr.iter().zip(plan.targ.iter()) {
        if c.service_name != "cnapi" {
            assert_eq!(c, t);
        }
    }
}

#[tokio::test]
async fn test_prefetch_precedes_update() {
    // the target image is not local: the plan leads with a download
    // procedure bound to the same change
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("cnapi", "master-20240201T000000Z-gabcdef1");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();
    let plan = build_plan(
        &fleet,
        &clients,
        vec![update_service("cnapi")],
        PlanOptions::default(),
    )
    .await
    .unwrap();

    let kinds: Vec<_> = plan.procs.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ProcedureKind::DownloadImages,
            ProcedureKind::UpdateStatelessServices,
        ]
    );
    assert_eq!(plan.procs[0].changes, plan.procs[1].changes);
}

#[tokio::test]
async fn test_service_instance_conflict() {
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("imgapi", "master-20240201T000000Z-g1111111");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
        state.local_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();
    let error = build_plan(
        &fleet,
        &clients,
        vec![
            update_service("imgapi"),
            ChangeRequest::UpdateInstanceByAlias {
                alias: "imgapi0".to_string(),
                image: None,
            },
        ],
        PlanOptions::default(),
    )
    .await
    .unwrap_err();
    match error {
        Error::Update(UpdateError::ServiceInstanceOverlap { service }) => {
            assert_eq!(service, "imgapi");
        }
        other => panic!("expected overlap conflict, got {}", other),
    }
}

#[tokio::test]
async fn test_unsupported_topology() {
    // two sapi instances: no filter takes the change, so it surfaces in
    // the coordinator's unsupported-changes error
    let fleet = updateadm_inventory::examples::fleet_with_two_sapis();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("sapi", "master-20240201T000000Z-g2222222");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
        state.local_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();
    let error = build_plan(
        &fleet,
        &clients,
        vec![update_service("sapi")],
        PlanOptions::default(),
    )
    .await
    .unwrap_err();
    match error {
        Error::Update(UpdateError::UnsupportedChanges(list)) => {
            assert!(list.contains("sapi"), "list was: {}", list);
        }
        other => panic!("expected unsupported changes, got {}", other),
    }
}

#[tokio::test]
async fn test_rabbitmq_guard() {
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("rabbitmq", "master-20240201T000000Z-g3333333");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
        state.local_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();

    let error = build_plan(
        &fleet,
        &clients,
        vec![update_service("rabbitmq")],
        PlanOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        error,
        Error::Update(UpdateError::RabbitmqNotForced)
    ));

    let plan = build_plan(
        &fleet,
        &clients,
        vec![update_service("rabbitmq")],
        PlanOptions { force_rabbitmq: true, ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(plan.procs.len(), 1);
    assert_eq!(plan.procs[0].kind, ProcedureKind::UpdateStatelessServices);
}

#[tokio::test]
async fn test_planning_is_idempotent() {
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("vmapi", "master-20240201T000000Z-g4444444");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
        state.local_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();

    let plan1 = build_plan(
        &fleet,
        &clients,
        vec![update_service("vmapi")],
        PlanOptions::default(),
    )
    .await
    .unwrap();
    let plan2 = build_plan(
        &fleet,
        &clients,
        vec![update_service("vmapi")],
        PlanOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(plan1.to_json().unwrap(), plan2.to_json().unwrap());
}

#[tokio::test]
async fn test_coordinator_replay_matches() {
    // recomputing the procedure list from a built plan's changes yields
    // the same procedures in the same order
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    for (service, tail) in
        [("cnapi", "g5555555"), ("moray", "g6666666"), ("ufds", "g7777777")]
    {
        let newer = fleet.newer_image(
            service,
            &format!("master-20240201T000000Z-{}", tail),
        );
        sim.with_state(|state| {
            state.remote_images.insert(newer.uuid, newer.clone());
            state.local_images.insert(newer.uuid, newer.clone());
        });
    }
    let clients = sim.clients();
    let plan = build_plan(
        &fleet,
        &clients,
        vec![
            update_service("cnapi"),
            update_service("moray"),
            update_service("ufds"),
        ],
        PlanOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(
        plan.procs.iter().map(|p| p.kind).collect::<Vec<_>>(),
        vec![
            ProcedureKind::UpdateStatelessServices,
            ProcedureKind::UpdateUfds,
            ProcedureKind::UpdateMoray,
        ]
    );

    let log = test_logger("replay");
    let local: BTreeSet<_> = sim
        .with_state(|state| state.local_images.keys().cloned().collect());
    let replayed =
        coordinate(&log, &plan, &fleet.inventory, &local).unwrap();
    assert_eq!(plan.procs, replayed);
}

#[tokio::test]
async fn test_platform_safety_gate() {
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("cnapi", "master-20240201T000000Z-g8888888");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
        state.local_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();

    let log = test_logger("platform_gate");
    let config = UpdateadmConfig {
        min_platform: Some("20250101T000000Z".to_string()),
        ..Default::default()
    };
    let error = PlanBuilder::new(&log, &fleet.inventory, &clients, &config)
        .build(vec![update_service("cnapi")], &PlanOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        Error::Update(UpdateError::PlatformTooOld { .. })
    ));
}

#[tokio::test]
async fn test_image_build_date_safety_gate() {
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("cnapi", "master-20240201T000000Z-g9999999");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
        state.local_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();

    let log = test_logger("build_date_gate");
    let config = UpdateadmConfig {
        min_image_build_date: [(
            "cnapi".to_string(),
            // deployed image is built 20240101
            "20240115".to_string(),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let error = PlanBuilder::new(&log, &fleet.inventory, &clients, &config)
        .build(vec![update_service("cnapi")], &PlanOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Update(UpdateError::ImageTooOld { .. })));
}

#[tokio::test]
async fn test_just_images_plan() {
    let fleet = simple_fleet();
    let sim = sim_for(&fleet);
    let newer =
        fleet.newer_image("cnapi", "master-20240201T000000Z-gaaaaaaa");
    sim.with_state(|state| {
        state.remote_images.insert(newer.uuid, newer.clone());
    });
    let clients = sim.clients();
    let plan = build_plan(
        &fleet,
        &clients,
        vec![update_service("cnapi")],
        PlanOptions { just_images: true, ..Default::default() },
    )
    .await
    .unwrap();
    assert!(plan.just_images);
    let kinds: Vec<_> = plan.procs.iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![ProcedureKind::DownloadImages]);
}
