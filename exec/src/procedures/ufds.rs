// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Updating the directory service, with a pre-update directory dump.

use async_trait::async_trait;
use updateadm_common::error::InternalError;
use updateadm_types::{NormalizedChange, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{
    single_change, the_one_zone_of, update_zone,
};
use crate::procedures::ProcedureExecutor;

/// Root of the directory tree worth snapshotting before an update.
const DIRECTORY_BASE: &str = "o=smartdc";

pub(super) struct UpdateUfds {
    changes: Vec<NormalizedChange>,
}

impl UpdateUfds {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        UpdateUfds { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for UpdateUfds {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::UpdateUfds
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        let (change, image) = single_change(&self.changes, "ufds")?;
        let instance = the_one_zone_of(ctx, "ufds")?;

        ctx.note("Dumping directory tree before update");
        let entries = ctx
            .clients
            .directory
            .search(DIRECTORY_BASE, "(objectclass=*)")
            .await?;
        let dump =
            serde_json::to_vec_pretty(&entries).map_err(|source| {
                InternalError::Serialize {
                    context: "serializing directory dump".to_string(),
                    source,
                }
            })?;
        let path = ctx.workdir.write_artifact("ufds-dump.json", &dump)?;
        ctx.note(&format!(
            "Saved {} directory entries to {}",
            entries.len(),
            path,
        ));

        ctx.note(&format!(
            "Updating \"ufds\" to image {} ({}@{})",
            image.uuid, image.name, image.version,
        ));
        update_zone(ctx, change, instance, image).await
    }
}
