// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The network registry: networks and NICs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use updateadm_common::error::UpstreamError;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Nic {
    pub ip: String,
    pub nic_tag: String,
    pub belongs_to_uuid: Uuid,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NicFilter {
    pub belongs_to_uuid: Option<Uuid>,
    pub nic_tag: Option<String>,
}

#[async_trait]
pub trait NetworkRegistry: Send + Sync {
    async fn list_networks(
        &self,
        filter: &Value,
    ) -> Result<Vec<Value>, UpstreamError>;

    async fn list_nics(
        &self,
        filter: &NicFilter,
    ) -> Result<Vec<Nic>, UpstreamError>;
}
