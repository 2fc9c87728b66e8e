// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The common strategy for simple single-headnode-zone services.

use async_trait::async_trait;
use updateadm_types::{NormalizedChange, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{affected_instances, update_zone};
use crate::procedures::ProcedureExecutor;

pub(super) struct UpdateStatelessServices {
    changes: Vec<NormalizedChange>,
}

impl UpdateStatelessServices {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        UpdateStatelessServices { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for UpdateStatelessServices {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::UpdateStatelessServices
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        for change in &self.changes {
            let Some(image) = &change.image else {
                return Err(ExecError::Precondition(format!(
                    "change for \"{}\" has no resolved image",
                    change.service.name
                )));
            };
            ctx.note(&format!(
                "Updating \"{}\" to image {} ({}@{})",
                change.service.name, image.uuid, image.name, image.version,
            ));
            for instance in affected_instances(ctx, change) {
                if instance.image_id == image.uuid {
                    ctx.note(&format!(
                        "Instance {} already on target image",
                        instance
                            .alias
                            .as_deref()
                            .unwrap_or(&instance.instance_id),
                    ));
                    continue;
                }
                update_zone(ctx, change, instance, image).await?;
            }
        }
        Ok(())
    }
}
