// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Top-level operations
//!
//! These are the two mutating entry points a front-end calls.  Both take
//! the process-wide advisory lock for their whole duration (the guard
//! releases on every exit path, including errors) and both start from a
//! fresh inventory snapshot.

use chrono::Utc;
use slog::{o, warn, Logger};
use slog_error_chain::InlineErrorChain;
use std::collections::BTreeSet;
use std::sync::Arc;
use updateadm_clients::{Clients, ImageFilter};
use updateadm_common::error::{Error, InternalError, UpdateError};
use updateadm_common::progress::ProgressReporter;
use updateadm_common::UpdateadmConfig;
use updateadm_inventory::Collector;
use updateadm_planning::{coordinate, PlanBuilder, PlanOptions};
use updateadm_types::{
    parse_change_requests, HistoryRecord, Inventory, UpdatePlan,
    PLAN_FORMAT_VERSION,
};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::lock::UpdateLock;
use crate::procedures::executor_for;
use crate::workdir::WorkDir;

/// What the front-end wires up for us: configuration, collaborator
/// clients, logging, and the progress sink.
#[derive(Clone)]
pub struct Deps {
    pub log: Logger,
    pub clients: Clients,
    pub config: UpdateadmConfig,
    pub progress: Arc<dyn ProgressReporter>,
}

/// Validate raw change requests and build an update plan from a fresh
/// inventory snapshot.
pub async fn gen_update_plan(
    deps: &Deps,
    requests: &[serde_json::Value],
    options: &PlanOptions,
) -> Result<UpdatePlan, Error> {
    let requests = parse_change_requests(requests)?;
    let _lock = UpdateLock::acquire(
        &deps.log,
        &deps.config.lock_path,
        &*deps.progress,
    )
    .await?;
    let inventory = collect_inventory(deps).await?;
    PlanBuilder::new(&deps.log, &inventory, &deps.clients, &deps.config)
        .build(requests, options)
        .await
}

/// Execute a plan: serialize it to a fresh work directory, record
/// history, and run its procedures strictly in order.  The first failing
/// procedure aborts the rest; its error is attached to the history record
/// and the work directory is left intact for inspection.
pub async fn exec_update_plan(
    deps: &Deps,
    plan: &UpdatePlan,
) -> Result<(), ExecError> {
    if plan.v != PLAN_FORMAT_VERSION {
        return Err(ExecError::Update(UpdateError::BadPlanVersion {
            found: plan.v,
            expected: PLAN_FORMAT_VERSION,
        }));
    }

    let _lock = UpdateLock::acquire(
        &deps.log,
        &deps.config.lock_path,
        &*deps.progress,
    )
    .await?;
    let inventory = collect_inventory(deps).await?;

    // Plans loaded from disk carry no procedure list; recompute it.  The
    // pipeline is deterministic, so a plan that came straight from the
    // planner gets the same list back.
    let procs = if plan.procs.is_empty() && !plan.changes.is_empty() {
        let local = local_image_uuids(&deps.clients).await?;
        coordinate(&deps.log, plan, &inventory, &local)?
    } else {
        plan.procs.clone()
    };

    let workdir = WorkDir::create(&deps.config.work_root, Utc::now())?;
    workdir.write_plan(plan)?;

    // Provisioning jobs in flight are a sign someone else is mutating the
    // fleet; worth a warning, not a refusal.
    match deps.clients.workflows.list_jobs("running", 10).await {
        Ok(jobs) if !jobs.is_empty() => {
            deps.progress.message(&format!(
                "Note: {} provisioning job{} currently running",
                jobs.len(),
                if jobs.len() == 1 { " is" } else { "s are" },
            ));
        }
        Ok(_) => (),
        Err(error) => {
            warn!(deps.log, "could not check workflow jobs";
                InlineErrorChain::new(&error));
        }
    }

    let mut record = HistoryRecord::begin(plan.changes.clone());
    deps.clients.history.save_history(&record).await?;

    let ctx = ExecContext {
        log: deps.log.new(o!("component" => "executor")),
        clients: &deps.clients,
        inventory: &inventory,
        config: &deps.config,
        workdir: &workdir,
        progress: &*deps.progress,
    };

    let mut failure = None;
    for procedure in &procs {
        ctx.note(&procedure.summarize());
        match executor_for(procedure).execute(&ctx).await {
            Ok(()) => {
                if let Err(error) = workdir
                    .log_line(&format!("procedure {} done", procedure.kind))
                {
                    warn!(ctx.log, "could not append to install log";
                        InlineErrorChain::new(&error));
                }
            }
            Err(error) => {
                failure = Some(error);
                break;
            }
        }
    }

    record.finish(failure.as_ref().map(|e| e.to_string()));
    if let Err(error) = deps.clients.history.update_history(&record).await {
        // don't let a history hiccup mask the real outcome
        warn!(deps.log, "could not update history record";
            InlineErrorChain::new(&error));
    }

    match failure {
        Some(error) => {
            deps.progress.message(&format!(
                "Update failed; work directory retained at {}",
                workdir.path(),
            ));
            Err(error)
        }
        None => {
            deps.progress.message("Update completed successfully");
            Ok(())
        }
    }
}

async fn collect_inventory(deps: &Deps) -> Result<Inventory, Error> {
    let admin =
        deps.config.admin_account_uuid.ok_or_else(|| {
            Error::Internal(InternalError::UnexpectedState(
                "admin_account_uuid is not configured".to_string(),
            ))
        })?;
    let collector = Collector::new(&deps.log, &deps.clients, admin);
    Ok(collector.collect().await?)
}

async fn local_image_uuids(
    clients: &Clients,
) -> Result<BTreeSet<uuid::Uuid>, ExecError> {
    let images =
        clients.image_store.list_images(&ImageFilter::default()).await?;
    Ok(images.into_iter().map(|i| i.uuid).collect())
}
