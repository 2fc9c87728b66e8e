// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The directory service: LDAP-style searches, used to snapshot directory
//! data before updating the service that owns it.

use async_trait::async_trait;
use serde_json::Value;
use updateadm_common::error::UpstreamError;

#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Search `base` with an LDAP filter string, returning raw entries.
    async fn search(
        &self,
        base: &str,
        filter: &str,
    ) -> Result<Vec<Value>, UpstreamError>;
}
