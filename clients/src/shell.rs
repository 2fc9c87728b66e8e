// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote shell fanout: broadcast-or-targeted script execution on servers
//!
//! The transport parses the remote side's structured envelope into
//! [`RemoteResult`]; a nonzero exit status is an answer, not a transport
//! error, so callers decide what failure means for their step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use updateadm_common::error::UpstreamError;
use uuid::Uuid;

/// The structured result of one script run on one server.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RemoteResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Stdout with surrounding whitespace trimmed, for parsing
    /// single-value outputs.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

#[async_trait]
pub trait RemoteShellFanout: Send + Sync {
    /// Run `script` on one server.
    async fn exec_on(
        &self,
        server: Uuid,
        script: &str,
    ) -> Result<RemoteResult, UpstreamError>;

    /// Run `script` on each listed server.  Results come back unordered;
    /// the call completes only when every server has answered.
    async fn exec_many(
        &self,
        servers: &[Uuid],
        script: &str,
    ) -> Result<Vec<(Uuid, RemoteResult)>, UpstreamError>;

    /// Run `script` on every server in the fleet.
    async fn broadcast(
        &self,
        script: &str,
    ) -> Result<Vec<(Uuid, RemoteResult)>, UpstreamError>;
}
