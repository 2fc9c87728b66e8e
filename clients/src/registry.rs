// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The service registry: the catalog of applications, services, and
//! registered instances, and the authority for service parameters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use updateadm_common::error::UpstreamError;
use updateadm_types::ServiceType;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RegistryApplication {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RegistryService {
    pub uuid: Uuid,
    pub name: String,
    pub application_uuid: Uuid,
    #[serde(rename = "type")]
    pub kind: ServiceType,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub metadata: Value,
}

impl RegistryService {
    pub fn image_uuid(&self) -> Option<Uuid> {
        self.params
            .get("image_uuid")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RegistryInstance {
    pub uuid: String,
    pub service_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceFilter {
    pub kind: Option<ServiceType>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceFilter {
    pub kind: Option<ServiceType>,
    pub service_uuid: Option<Uuid>,
}

/// Fields of a service a caller may change.  Absent fields are untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceUpdate {
    pub image_uuid: Option<Uuid>,
    pub user_script: Option<String>,
}

/// The registry's operating mode.  In proto mode it does not require the
/// replicated database to be writable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryMode {
    Proto,
    Full,
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn list_applications(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<RegistryApplication>, UpstreamError>;

    async fn list_services(
        &self,
        filter: &ServiceFilter,
    ) -> Result<Vec<RegistryService>, UpstreamError>;

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<RegistryInstance>, UpstreamError>;

    async fn create_instance(
        &self,
        service_uuid: Uuid,
        params: &Value,
    ) -> Result<RegistryInstance, UpstreamError>;

    async fn update_service(
        &self,
        service_uuid: Uuid,
        update: &ServiceUpdate,
    ) -> Result<(), UpstreamError>;

    async fn set_mode(
        &self,
        mode: RegistryMode,
    ) -> Result<(), UpstreamError>;
}
