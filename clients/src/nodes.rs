// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The node inventory: physical servers, platforms, and per-server
//! command execution.

use async_trait::async_trait;
use serde_json::Value;
use updateadm_common::error::UpstreamError;
use updateadm_types::Server;
use uuid::Uuid;

use crate::shell::RemoteResult;

#[async_trait]
pub trait NodeInventory: Send + Sync {
    /// List all servers.  `extras` names the optional per-server datasets
    /// to include (e.g. `sysinfo`).
    async fn list_servers(
        &self,
        extras: &[&str],
    ) -> Result<Vec<Server>, UpstreamError>;

    /// Available platform versions, keyed by platform stamp.
    async fn list_platforms(
        &self,
    ) -> Result<Vec<String>, UpstreamError>;

    /// Run `script` on `server` through the node-inventory channel (as
    /// opposed to the shell fanout transport).
    async fn command_execute(
        &self,
        server: Uuid,
        script: &str,
    ) -> Result<RemoteResult, UpstreamError>;

    async fn set_boot_params(
        &self,
        server: Uuid,
        params: &Value,
    ) -> Result<(), UpstreamError>;
}
