// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Updating the service-API itself
//!
//! The registry is the thing being replaced, so the registry-record
//! refresh happens strictly before the reprovision, while the old zone
//! can still answer.

use async_trait::async_trait;
use updateadm_types::{NormalizedChange, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{
    ensure_image_local, refresh_service_record, reprovision_zone,
    save_instance_undo, single_change, the_one_zone_of, wait_for_zone_image,
};
use crate::procedures::ProcedureExecutor;

pub(super) struct UpdateSapi {
    changes: Vec<NormalizedChange>,
}

impl UpdateSapi {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        UpdateSapi { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for UpdateSapi {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::UpdateSapi
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        let (change, image) = single_change(&self.changes, "sapi")?;
        let instance = the_one_zone_of(ctx, "sapi")?;
        ctx.note(&format!(
            "Updating \"sapi\" to image {} ({}@{})",
            image.uuid, image.name, image.version,
        ));
        save_instance_undo(ctx, instance)?;
        ensure_image_local(ctx, image).await?;
        refresh_service_record(ctx, change, image, None).await?;
        reprovision_zone(ctx, instance, image).await?;
        wait_for_zone_image(ctx, instance, image).await
    }
}
