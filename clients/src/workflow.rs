// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The workflow engine: job status queries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use updateadm_common::error::UpstreamError;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Job {
    pub uuid: Uuid,
    pub name: String,
    /// e.g. `running`, `succeeded`, `failed`
    pub execution: String,
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// List jobs in the given execution state, newest first, up to `limit`.
    async fn list_jobs(
        &self,
        execution: &str,
        limit: usize,
    ) -> Result<Vec<Job>, UpstreamError>;
}
