// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Updating the object index
//!
//! The only HA-capable strategy besides the replicated database: any
//! number of instances, reprovisioned strictly one at a time, each waited
//! back to service before the next is touched so at least n-1 stay up.

use async_trait::async_trait;
use std::time::Duration;
use updateadm_common::poll::{self, CondCheckError, PollError, PollPolicy};
use updateadm_types::{Instance, NormalizedChange, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{
    affected_instances, single_change, update_zone,
};
use crate::procedures::ProcedureExecutor;

/// How long one reprovisioned index zone gets to report its service
/// online again.
const SERVICE_SETTLE: PollPolicy =
    PollPolicy::new(Duration::from_secs(5), 60);

pub(super) struct UpdateMoray {
    changes: Vec<NormalizedChange>,
}

impl UpdateMoray {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        UpdateMoray { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for UpdateMoray {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::UpdateMoray
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        let (change, image) = single_change(&self.changes, "moray")?;
        let instances = affected_instances(ctx, change);
        ctx.note(&format!(
            "Updating {} \"moray\" instance{} to image {} ({}@{})",
            instances.len(),
            if instances.len() == 1 { "" } else { "s" },
            image.uuid,
            image.name,
            image.version,
        ));

        for instance in instances {
            if instance.image_id == image.uuid {
                ctx.note(&format!(
                    "Instance {} already on target image",
                    instance.alias.as_deref().unwrap_or(&instance.instance_id),
                ));
                continue;
            }
            update_zone(ctx, change, instance, image).await?;
            wait_for_service_online(ctx, instance).await?;
        }
        Ok(())
    }
}

async fn wait_for_service_online(
    ctx: &ExecContext<'_>,
    instance: &Instance,
) -> Result<(), ExecError> {
    ctx.note(&format!(
        "Waiting for {} to come back online",
        instance.alias.as_deref().unwrap_or(&instance.instance_id),
    ));
    let script = format!(
        "svcs -z {} -H -o state moray 2>/dev/null",
        instance.instance_id,
    );
    let server = instance.server_id;
    let result = poll::wait_for(SERVICE_SETTLE, || async {
        match ctx.clients.shell.exec_on(server, &script).await {
            Ok(result)
                if result.success()
                    && result
                        .stdout_trimmed()
                        .lines()
                        .all(|line| line == "online")
                    && !result.stdout_trimmed().is_empty() =>
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
            what: format!(
                "moray in zone {} to come online",
                instance.instance_id
            ),
            attempts,
        }),
        Err(PollError::Permanent(error)) => Err(ExecError::Upstream(error)),
    }
}
