// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-update work directory
//!
//! Each execution gets `<root>/<timestamp>/` holding the serialized plan,
//! a per-procedure log, and any undo artifacts the procedures stash
//! (previous user-scripts, directory dumps, instance metadata).  The
//! directory is retained after completion, successful or not: it is the
//! operator's record for audit and for manual recovery after a partial
//! failure.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::Write;
use updateadm_common::error::InternalError;
use updateadm_types::UpdatePlan;

pub struct WorkDir {
    path: Utf8PathBuf,
}

impl WorkDir {
    /// Create `<root>/<start-time>/`, timestamped to the second in UTC
    /// (e.g. `20240110T123456Z`).
    pub fn create(
        root: &Utf8Path,
        started: DateTime<Utc>,
    ) -> Result<WorkDir, InternalError> {
        let stamp = started
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .replace(['-', ':'], "");
        let path = root.join(stamp);
        std::fs::create_dir_all(&path).map_err(|source| {
            InternalError::io(
                format!("creating work directory {}", path),
                source,
            )
        })?;
        Ok(WorkDir { path })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Serialize the plan to `plan.json`.
    pub fn write_plan(&self, plan: &UpdatePlan) -> Result<(), InternalError> {
        let path = self.path.join("plan.json");
        let json = plan.to_json()?;
        std::fs::write(&path, json).map_err(|source| {
            InternalError::io(format!("writing {}", path), source)
        })
    }

    /// Append one timestamped line to `install.log`.
    pub fn log_line(&self, line: &str) -> Result<(), InternalError> {
        let path = self.path.join("install.log");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| {
                InternalError::io(format!("opening {}", path), source)
            })?;
        writeln!(
            file,
            "[{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            line,
        )
        .map_err(|source| {
            InternalError::io(format!("writing {}", path), source)
        })
    }

    /// Stash an undo/audit artifact, returning where it landed.
    pub fn write_artifact(
        &self,
        name: &str,
        contents: &[u8],
    ) -> Result<Utf8PathBuf, InternalError> {
        let path = self.path.join(name);
        std::fs::write(&path, contents).map_err(|source| {
            InternalError::io(format!("writing {}", path), source)
        })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_workdir_layout() {
        let root = std::env::temp_dir()
            .join(format!("updateadm-workdir-test-{}", std::process::id()));
        let root = Utf8PathBuf::from_path_buf(root).unwrap();
        let started = Utc.with_ymd_and_hms(2024, 1, 10, 12, 34, 56).unwrap();
        let workdir = WorkDir::create(&root, started).unwrap();
        assert_eq!(workdir.path(), root.join("20240110T123456Z"));

        let plan = UpdatePlan {
            v: updateadm_types::PLAN_FORMAT_VERSION,
            curr: Vec::new(),
            targ: Vec::new(),
            changes: Vec::new(),
            just_images: false,
            procs: Vec::new(),
        };
        workdir.write_plan(&plan).unwrap();
        let written =
            std::fs::read_to_string(workdir.path().join("plan.json"))
                .unwrap();
        assert!(written.contains("\"justImages\": false"));

        workdir.log_line("starting").unwrap();
        workdir.log_line("done").unwrap();
        let log =
            std::fs::read_to_string(workdir.path().join("install.log"))
                .unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().next().unwrap().ends_with("starting"));

        let artifact =
            workdir.write_artifact("old-user-script.sh", b"#!/bin/sh\n")
                .unwrap();
        assert!(artifact.as_str().ends_with("old-user-script.sh"));

        std::fs::remove_dir_all(&root).ok();
    }
}
