// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Updating the auth cache, with its data directory snapshotted first.

use async_trait::async_trait;
use updateadm_types::{NormalizedChange, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{
    single_change, the_one_zone_of, update_zone,
};
use crate::procedures::ProcedureExecutor;

pub(super) struct UpdateMahi {
    changes: Vec<NormalizedChange>,
}

impl UpdateMahi {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        UpdateMahi { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for UpdateMahi {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::UpdateMahi
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        let (change, image) = single_change(&self.changes, "mahi")?;
        let instance = the_one_zone_of(ctx, "mahi")?;

        // The cache rebuilds itself from the directory service, but a
        // snapshot makes recovery instant if the rebuild goes sideways.
        ctx.note("Snapshotting auth cache data before update");
        let script = format!(
            "zfs snapshot zones/{}/data/mahi@updateadm-undo 2>/dev/null \
             || true",
            instance.instance_id,
        );
        ctx.exec_checked(instance.server_id, &script).await?;

        ctx.note(&format!(
            "Updating \"mahi\" to image {} ({}@{})",
            image.uuid, image.name, image.version,
        ));
        update_zone(ctx, change, instance, image).await
    }
}
