// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Services, instances, servers, and images

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use uuid::Uuid;

/// How a service's instances are materialized on a server.
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// a dedicated zone per instance
    Vm,
    /// a per-server agent process
    Agent,
}

/// Service-level parameters recorded in the service registry.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceParams {
    /// the image new instances are provisioned from; also the seed for
    /// image candidate resolution when no instances exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uuid: Option<Uuid>,
}

/// One service in the catalog.  `name` is globally unique.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ServiceType,
    /// registry uuid; synthetic services (see the inventory collector)
    /// have none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ServiceParams>,
}

impl Service {
    pub fn default_image_uuid(&self) -> Option<Uuid> {
        self.params.as_ref().and_then(|p| p.image_uuid)
    }
}

/// A running materialization of a service on one server.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Instance {
    #[serde(rename = "service")]
    pub service_name: String,
    #[serde(rename = "type")]
    pub kind: ServiceType,
    /// stable identifier: the zonename for vm instances, the registry id
    /// for agents, or a synthetic `server_id/service_name` for legacy
    /// agents the registry has no record of
    pub instance_id: String,
    pub image_id: Uuid,
    pub version: String,
    pub server_id: Uuid,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Instance {
    /// Synthetic id for a legacy agent instance the registry does not
    /// enumerate.
    pub fn synthetic_agent_id(server_id: Uuid, service_name: &str) -> String {
        format!("{}/{}", server_id, service_name)
    }
}

/// A physical host.  Exactly one server in the fleet is the headnode.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Server {
    pub uuid: Uuid,
    pub hostname: String,
    #[serde(rename = "headnode")]
    pub is_headnode: bool,
    pub current_platform: String,
    /// raw host-reported system description, including the enumerated
    /// on-host agents descriptor
    #[serde(default)]
    pub sysinfo: serde_json::Value,
}

/// An immutable image artifact.  Within one `name`, images are ordered by
/// `published_at`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Image {
    pub uuid: Uuid,
    pub name: String,
    pub version: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, serde_json::Value>,
}

impl Image {
    /// Extract the `YYYYMMDD` build date from a version of the usual
    /// `<channel>-<YYYYMMDD>T<HHMMSS>Z-<commit>` form.
    pub fn build_date(&self) -> Option<&str> {
        build_date_of_version(&self.version)
    }
}

/// Extract the `YYYYMMDD` build-date stamp from a version string, if it
/// carries one.
pub fn build_date_of_version(version: &str) -> Option<&str> {
    version.split('-').find_map(|part| {
        let bytes = part.as_bytes();
        if bytes.len() == 16
            && bytes[8] == b'T'
            && bytes[15] == b'Z'
            && part[..8].bytes().all(|b| b.is_ascii_digit())
            && part[9..15].bytes().all(|b| b.is_ascii_digit())
        {
            Some(&part[..8])
        } else {
            None
        }
    })
}

/// Name the image artifact a service is built from.  Almost always the
/// service's own name; the exceptions are services deployed from a
/// differently-named artifact.
pub fn image_name_for_service(service_name: &str) -> &str {
    match service_name {
        "manta" => "manta-deployment",
        other => other,
    }
}
