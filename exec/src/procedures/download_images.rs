// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image prefetch: make every target image local before anything touches
//! a zone.

use async_trait::async_trait;
use updateadm_types::{NormalizedChange, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;
use crate::procedures::zone_update::{distinct_images, ensure_image_local};
use crate::procedures::ProcedureExecutor;

pub(super) struct DownloadImages {
    changes: Vec<NormalizedChange>,
}

impl DownloadImages {
    pub(super) fn new(changes: Vec<NormalizedChange>) -> Self {
        DownloadImages { changes }
    }
}

#[async_trait]
impl ProcedureExecutor for DownloadImages {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::DownloadImages
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError> {
        let images = distinct_images(&self.changes);
        ctx.note(&format!(
            "Downloading {} image{}",
            images.len(),
            if images.len() == 1 { "" } else { "s" },
        ));
        for image in images {
            ensure_image_local(ctx, image).await?;
        }
        Ok(())
    }
}
