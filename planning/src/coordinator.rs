// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mapping a plan's changes onto procedures
//!
//! An ordered pipeline of match-and-consume filters partitions the plan's
//! changes.  Each filter owns one procedure class; a change it matches but
//! whose topology it can't handle is *left in the remaining set* (with a
//! log entry saying why), so that unsupported topologies surface as a
//! planning error instead of being silently skipped.  The filter order is
//! part of the contract: later procedures rely on resources refreshed by
//! earlier ones (most importantly, images made local by the prefetch
//! stage, which is why that stage leads).
//!
//! The pipeline is deterministic: replaying it on a plan's changes always
//! yields the same procedures in the same order, which is what lets the
//! procedure list be recomputed when a plan is loaded from disk.

use slog::{info, o, warn, Logger};
use std::collections::BTreeSet;
use updateadm_common::error::UpdateError;
use updateadm_types::{
    ChangeKind, ChangeList, Inventory, NormalizedChange, Procedure,
    ProcedureKind, UpdatePlan,
};
use uuid::Uuid;

/// Headnode services simple enough to share one update strategy: single
/// zone, stateless (or state that survives reprovision), no ordering
/// dependencies beyond "image must be local".
pub const STATELESS_SERVICES: &[&str] = &[
    "adminui", "amon", "amonredis", "assets", "ca", "cloudapi", "cnapi",
    "dhcpd", "fwapi", "napi", "papi", "rabbitmq", "redis", "sdc", "vmapi",
    "workflow", "manta",
];

/// How a filter decides whether a change is its kind of change.
enum Matcher {
    /// any update change for a service in [`STATELESS_SERVICES`]
    StatelessSet,
    /// any update change for the named service
    Service(&'static str),
}

impl Matcher {
    fn matches(&self, change: &NormalizedChange) -> bool {
        let is_update = matches!(
            change.kind,
            ChangeKind::UpdateService | ChangeKind::UpdateInstance
        );
        is_update
            && match self {
                Matcher::StatelessSet => STATELESS_SERVICES
                    .contains(&change.service.name.as_str()),
                Matcher::Service(name) => change.service.name == *name,
            }
    }
}

/// The deployment shape a filter's strategy can handle.
enum Topology {
    /// any number of instances, anywhere
    Any,
    /// at most one instance, and it must be on the headnode
    AtMostOneOnHeadnode,
    /// exactly one instance, on the headnode
    ExactlyOneOnHeadnode,
}

struct FilterSpec {
    kind: ProcedureKind,
    matcher: Matcher,
    topology: Topology,
}

/// The filter pipeline, in contract order.  (The image-prefetch stage is
/// not in this table: it binds changes without consuming them, since a
/// prefetched change still needs its real update procedure.)
const FILTERS: &[FilterSpec] = &[
    FilterSpec {
        kind: ProcedureKind::UpdateStatelessServices,
        matcher: Matcher::StatelessSet,
        topology: Topology::AtMostOneOnHeadnode,
    },
    FilterSpec {
        kind: ProcedureKind::UpdateImgapi,
        matcher: Matcher::Service("imgapi"),
        topology: Topology::ExactlyOneOnHeadnode,
    },
    FilterSpec {
        kind: ProcedureKind::UpdateUfds,
        matcher: Matcher::Service("ufds"),
        topology: Topology::ExactlyOneOnHeadnode,
    },
    FilterSpec {
        kind: ProcedureKind::UpdateMoray,
        matcher: Matcher::Service("moray"),
        topology: Topology::Any,
    },
    FilterSpec {
        kind: ProcedureKind::UpdateSapi,
        matcher: Matcher::Service("sapi"),
        topology: Topology::ExactlyOneOnHeadnode,
    },
    FilterSpec {
        kind: ProcedureKind::UpdateManatee,
        matcher: Matcher::Service("manatee"),
        topology: Topology::Any,
    },
    FilterSpec {
        kind: ProcedureKind::UpdateBinder,
        matcher: Matcher::Service("binder"),
        topology: Topology::ExactlyOneOnHeadnode,
    },
    FilterSpec {
        kind: ProcedureKind::UpdateMahi,
        matcher: Matcher::Service("mahi"),
        topology: Topology::ExactlyOneOnHeadnode,
    },
];

/// Partition `plan.changes` into the ordered procedure list that realizes
/// them, or fail if any change has no supported strategy.
pub fn coordinate(
    log: &Logger,
    plan: &UpdatePlan,
    inventory: &Inventory,
    local_images: &BTreeSet<Uuid>,
) -> Result<Vec<Procedure>, UpdateError> {
    let log = log.new(o!("component" => "procedure-coordinator"));
    let mut procs = Vec::new();

    // Image prefetch leads: every later strategy assumes its target image
    // is already local.
    let need_download: Vec<NormalizedChange> = plan
        .changes
        .iter()
        .filter(|change| {
            change
                .image
                .as_ref()
                .is_some_and(|image| !local_images.contains(&image.uuid))
        })
        .cloned()
        .collect();
    if !need_download.is_empty() {
        info!(
            &log, "images to download";
            "count" => need_download.len(),
        );
        procs.push(Procedure {
            kind: ProcedureKind::DownloadImages,
            changes: need_download,
        });
    }

    let mut remaining: Vec<NormalizedChange> = plan.changes.clone();
    for filter in FILTERS {
        let mut handled = Vec::new();
        let mut rest = Vec::new();
        for change in remaining {
            if filter.matcher.matches(&change)
                && topology_ok(&log, filter, inventory, &change)
            {
                handled.push(change);
            } else {
                rest.push(change);
            }
        }
        remaining = rest;
        if !handled.is_empty() {
            procs.push(Procedure { kind: filter.kind, changes: handled });
        }
    }

    if !remaining.is_empty() {
        return Err(UpdateError::UnsupportedChanges(
            ChangeList(&remaining).to_string(),
        ));
    }

    if plan.just_images {
        procs.retain(|proc| proc.kind == ProcedureKind::DownloadImages);
    }

    Ok(procs)
}

fn topology_ok(
    log: &Logger,
    filter: &FilterSpec,
    inventory: &Inventory,
    change: &NormalizedChange,
) -> bool {
    let (max_required, exact) = match filter.topology {
        Topology::Any => return true,
        Topology::AtMostOneOnHeadnode => (1, false),
        Topology::ExactlyOneOnHeadnode => (1, true),
    };

    let instances: Vec<_> =
        inventory.instances_of(&change.service.name).collect();
    if instances.len() > max_required || (exact && instances.is_empty()) {
        info!(
            log, "skipping filter: unsupported instance count";
            "procedure" => %filter.kind,
            "service" => &change.service.name,
            "instances" => instances.len(),
        );
        return false;
    }

    let Some(headnode) = inventory.headnode() else {
        warn!(log, "no headnode in inventory");
        return false;
    };
    if instances.iter().any(|i| i.server_id != headnode.uuid) {
        info!(
            log, "skipping filter: instance not on headnode";
            "procedure" => %filter.kind,
            "service" => &change.service.name,
        );
        return false;
    }
    true
}
