// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The VM manager: the authority on running zones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use updateadm_common::error::UpstreamError;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct VmNic {
    pub ip: String,
    pub nic_tag: String,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Vm {
    pub uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub state: String,
    pub image_uuid: Uuid,
    pub server_uuid: Uuid,
    #[serde(default)]
    pub tags: Value,
    #[serde(default)]
    pub nics: Vec<VmNic>,
}

impl Vm {
    /// The datacenter role recorded on the zone, if any.  Zones without a
    /// role are not service instances and are ignored by the collector.
    pub fn smartdc_role(&self) -> Option<&str> {
        self.tags.get("smartdc_role").and_then(Value::as_str)
    }

    /// The zone's IP on the admin network.
    pub fn admin_ip(&self) -> Option<&str> {
        self.nics
            .iter()
            .find(|nic| nic.nic_tag == "admin")
            .map(|nic| nic.ip.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VmFilter {
    pub owner_uuid: Option<Uuid>,
    /// VM states to include (e.g. `running`, `provisioning`)
    pub states: Vec<String>,
}

#[async_trait]
pub trait VmManager: Send + Sync {
    async fn list_vms(
        &self,
        filter: &VmFilter,
    ) -> Result<Vec<Vm>, UpstreamError>;

    /// Attach NICs on the named networks to a zone.
    async fn add_nics(
        &self,
        vm: Uuid,
        networks: &[Uuid],
    ) -> Result<(), UpstreamError>;
}
