// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Procedure executors
//!
//! One executor per [`ProcedureKind`], dispatched by the explicit kind
//! discriminant.  Executors are constructed from a procedure's bound
//! changes and are otherwise stateless.

mod binder;
mod download_images;
mod imgapi;
mod mahi;
mod manatee;
mod moray;
mod sapi;
mod stateless;
mod ufds;
mod zone_update;

pub use manatee::{ReplState, ShardMode, ShardPeer, ShardStatus};

use async_trait::async_trait;
use updateadm_types::{Procedure, ProcedureKind};

use crate::context::ExecContext;
use crate::error::ExecError;

#[async_trait]
pub trait ProcedureExecutor: Send + Sync {
    fn kind(&self) -> ProcedureKind;

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<(), ExecError>;
}

/// Bind a procedure to its executor.
pub fn executor_for(procedure: &Procedure) -> Box<dyn ProcedureExecutor> {
    let changes = procedure.changes.clone();
    match procedure.kind {
        ProcedureKind::DownloadImages => {
            Box::new(download_images::DownloadImages::new(changes))
        }
        ProcedureKind::UpdateStatelessServices => {
            Box::new(stateless::UpdateStatelessServices::new(changes))
        }
        ProcedureKind::UpdateImgapi => {
            Box::new(imgapi::UpdateImgapi::new(changes))
        }
        ProcedureKind::UpdateUfds => Box::new(ufds::UpdateUfds::new(changes)),
        ProcedureKind::UpdateMoray => {
            Box::new(moray::UpdateMoray::new(changes))
        }
        ProcedureKind::UpdateSapi => Box::new(sapi::UpdateSapi::new(changes)),
        ProcedureKind::UpdateManatee => {
            Box::new(manatee::UpdateManatee::new(changes))
        }
        ProcedureKind::UpdateBinder => {
            Box::new(binder::UpdateBinder::new(changes))
        }
        ProcedureKind::UpdateMahi => Box::new(mahi::UpdateMahi::new(changes)),
    }
}
