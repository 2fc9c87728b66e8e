// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Updating the name service
//!
//! Everything in the datacenter resolves names through this zone, so
//! after the reprovision we insist on seeing it answer queries again
//! before declaring success.

use async_trait::async_trait;
use std::time::Duration;
use updateadm_common::poll::{self, CondCheckError, PollError, PollPolicy};
use updateadm_types::{Instance, NormalizedChange, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{
    single_change, the_one_zone_of, update_zone,
};
use crate::procedures::ProcedureExecutor;

const DNS_SETTLE: PollPolicy = PollPolicy::new(Duration::from_secs(5), 36);

pub(super) struct UpdateBinder {
    changes: Vec<NormalizedChange>,
}

impl UpdateBinder {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        UpdateBinder { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for UpdateBinder {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::UpdateBinder
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        let (change, image) = single_change(&self.changes, "binder")?;
        let instance = the_one_zone_of(ctx, "binder")?;
        ctx.note(&format!(
            "Updating \"binder\" to image {} ({}@{})",
            image.uuid, image.name, image.version,
        ));
        update_zone(ctx, change, instance, image).await?;
        wait_for_dns(ctx, instance).await
    }
}

async fn wait_for_dns(
    ctx: &ExecContext<'_>,
    instance: &Instance,
) -> Result<(), ExecError> {
    let Some(ip) = instance.admin_ip else {
        // without a known address there is nothing to query; the zone
        // image check above already passed
        return Ok(());
    };
    ctx.note("Waiting for name service to answer queries");
    let script =
        format!("dig +time=2 +tries=1 @{} . > /dev/null 2>&1 && echo up", ip);
    let server = instance.server_id;
    let result = poll::wait_for(DNS_SETTLE, || async {
        match ctx.clients.shell.exec_on(server, &script).await {
            Ok(result)
                if result.success()
                    && result.stdout_trimmed() == "up" =>
            {
                Ok(())
            }
            Ok(_) => Err(CondCheckError::NotYet),
            Err(error) => Err(CondCheckError::Failed(error)),
        }
    })
    .await;
    match result {
        Ok(()) => Ok(()),
        Err(PollError::TimedOut { attempts, .. }) => Err(ExecError::Timeout {
            what: "name service to answer queries".to_string(),
            attempts,
        }),
        Err(PollError::Permanent(error)) => Err(ExecError::Upstream(error)),
    }
}
