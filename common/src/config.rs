// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime configuration for the orchestrator
//!
//! Loading the configuration file is the front-end's concern; this is the
//! deserialized shape the orchestrator consumes.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Orchestrator-wide settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct UpdateadmConfig {
    /// name of the datacenter this process manages
    pub datacenter_name: Option<String>,

    /// the administrative account that owns all core-service zones; the
    /// collector only considers VMs owned by it
    pub admin_account_uuid: Option<Uuid>,

    /// path of the process-wide advisory lock file
    pub lock_path: Utf8PathBuf,

    /// root under which each update's work directory is created
    pub work_root: Utf8PathBuf,

    /// release channel constraint on candidate images: an image is a
    /// candidate only if its `version` contains this string
    pub version_channel: String,

    /// minimum server platform stamp required before a vm-type service on
    /// that server may be updated
    pub min_platform: Option<String>,

    /// per-service minimum build date (`YYYYMMDD` stamp) that a service's
    /// currently-deployed image must meet before it may be updated
    pub min_image_build_date: BTreeMap<String, String>,
}

impl Default for UpdateadmConfig {
    fn default() -> Self {
        UpdateadmConfig {
            datacenter_name: None,
            admin_account_uuid: None,
            lock_path: Utf8PathBuf::from("/var/run/updateadm.lock"),
            work_root: Utf8PathBuf::from("/var/updateadm/updates"),
            version_channel: String::from("master"),
            min_platform: None,
            min_image_build_date: BTreeMap::new(),
        }
    }
}

impl UpdateadmConfig {
    /// The single predicate applied to every candidate image's version.
    pub fn image_version_matches(&self, version: &str) -> bool {
        version.contains(&self.version_channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UpdateadmConfig::default();
        assert_eq!(config.lock_path, "/var/run/updateadm.lock");
        assert_eq!(config.work_root, "/var/updateadm/updates");
        assert!(config.image_version_matches("master-20240110T120000Z-g1234567"));
        assert!(!config.image_version_matches("release-20240110T120000Z-gabc"));
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: UpdateadmConfig = toml::from_str(
            r#"
            datacenter_name = "us-east-1"
            version_channel = "release"
            min_platform = "20230101T000000Z"

            [min_image_build_date]
            manatee = "20230601"
            "#,
        )
        .unwrap();
        assert_eq!(config.datacenter_name.as_deref(), Some("us-east-1"));
        assert_eq!(config.version_channel, "release");
        // unspecified fields keep their defaults
        assert_eq!(config.lock_path, "/var/run/updateadm.lock");
        assert_eq!(
            config.min_image_build_date.get("manatee").map(String::as_str),
            Some("20230601")
        );
    }
}
