// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Updating the image store itself
//!
//! The store cannot serve its own replacement while its zone is being
//! reprovisioned, so both the image record and the image *file* are staged
//! before the zone is touched: the record into the local store, the file
//! into the work directory where the reprovision on the headnode can reach
//! it.

use async_trait::async_trait;
use updateadm_types::{NormalizedChange, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{
    ensure_image_local, refresh_service_record, reprovision_zone,
    save_instance_undo, single_change, the_one_zone_of, wait_for_zone_image,
};
use crate::procedures::ProcedureExecutor;

pub(super) struct UpdateImgapi {
    changes: Vec<NormalizedChange>,
}

impl UpdateImgapi {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        UpdateImgapi { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for UpdateImgapi {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::UpdateImgapi
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        let (change, image) = single_change(&self.changes, "imgapi")?;
        let instance = the_one_zone_of(ctx, "imgapi")?;
        ctx.note(&format!(
            "Updating \"imgapi\" to image {} ({}@{})",
            image.uuid, image.name, image.version,
        ));

        // Stage everything the reprovision will need while the store can
        // still answer.
        save_instance_undo(ctx, instance)?;
        ensure_image_local(ctx, image).await?;
        let staged = ctx.workdir.path().join(format!("{}.file", image.uuid));
        ctx.clients
            .image_store
            .get_image_file(image.uuid, &staged)
            .await?;
        ctx.note(&format!("Staged image file at {}", staged));

        refresh_service_record(ctx, change, image, None).await?;
        reprovision_zone(ctx, instance, image).await?;
        wait_for_zone_image(ctx, instance, image).await
    }
}
