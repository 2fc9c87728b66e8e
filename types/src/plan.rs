// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Update plans and the procedures derived from them
//!
//! The serialized plan format is versioned (`v = 1`) and fixed to the
//! fields `{v, targ, changes, justImages}`.  The current-inventory snapshot
//! and the derived procedure list are runtime state: the snapshot is only
//! valid at planning time, and the procedure list is a deterministic
//! function of `changes`, recomputed when a plan is loaded.

use crate::fleet::{Image, Instance, Service};
use serde::{Deserialize, Serialize};
use std::fmt;
use updateadm_common::error::{InternalError, UpdateError};
use uuid::Uuid;

/// The operation a normalized change performs, independent of how the
/// request identified its target.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ChangeKind {
    UpdateService,
    UpdateInstance,
    CreateInstance,
    DeleteInstance,
    DeleteService,
}

impl ChangeKind {
    /// Service-level changes target the whole service; instance-level ones
    /// target (or create) a single instance.  The conflict rules pair each
    /// against the other.
    pub fn is_service_level(&self) -> bool {
        matches!(self, ChangeKind::UpdateService | ChangeKind::DeleteService)
    }

    pub fn is_instance_level(&self) -> bool {
        !self.is_service_level()
    }
}

/// A change request after normalization: names resolved to full objects,
/// image candidates attached, and (after dependency resolution) exactly
/// one target image chosen.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NormalizedChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub service: Service,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<Instance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<Uuid>,
    /// candidate images, oldest first; drained into `image` by dependency
    /// resolution and not part of the serialized plan
    #[serde(skip, default)]
    pub images: Vec<Image>,
    /// the resolved target image; present on every change in a built plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

impl NormalizedChange {
    /// One-line description used in diagnostics ("unsupported changes",
    /// conflict reports, progress output).
    pub fn describe(&self) -> String {
        match self.kind {
            ChangeKind::UpdateService
            | ChangeKind::DeleteService
            | ChangeKind::CreateInstance => {
                format!("{} \"{}\"", self.kind, self.service.name)
            }
            ChangeKind::UpdateInstance | ChangeKind::DeleteInstance => {
                match &self.instance {
                    Some(instance) => format!(
                        "{} \"{}\" ({})",
                        self.kind,
                        instance
                            .alias
                            .as_deref()
                            .unwrap_or(&instance.instance_id),
                        self.service.name,
                    ),
                    None => {
                        format!("{} \"{}\"", self.kind, self.service.name)
                    }
                }
            }
        }
    }
}

/// Classes of update strategy.  Each value selects one executor.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProcedureKind {
    /// make every target image present in the local image store
    DownloadImages,
    /// simple single-headnode-zone services with no special ordering needs
    UpdateStatelessServices,
    /// the image store itself
    UpdateImgapi,
    /// the directory service
    UpdateUfds,
    /// the object index; tolerates any instance count
    UpdateMoray,
    /// the service-API
    UpdateSapi,
    /// the replicated database
    UpdateManatee,
    /// the name-service quorum
    UpdateBinder,
    /// the auth cache
    UpdateMahi,
}

/// One unit of update logic: a strategy bound to the subset of a plan's
/// changes it will carry out.  Executors for each kind live in the exec
/// crate.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Procedure {
    pub kind: ProcedureKind,
    pub changes: Vec<NormalizedChange>,
}

impl Procedure {
    /// Human-readable summary of what executing this procedure will do.
    pub fn summarize(&self) -> String {
        match self.kind {
            ProcedureKind::DownloadImages => {
                let mut out = format!(
                    "download {} image{}:",
                    self.changes.len(),
                    if self.changes.len() == 1 { "" } else { "s" },
                );
                for change in &self.changes {
                    if let Some(image) = &change.image {
                        out.push_str(&format!(
                            "\n    image {} ({}@{})",
                            image.uuid, image.name, image.version
                        ));
                    }
                }
                out
            }
            _ => self
                .changes
                .iter()
                .map(|change| match (&change.image, change.kind) {
                    (Some(image), ChangeKind::UpdateService) => format!(
                        "update \"{}\" service to image {}\n    ({}@{})",
                        change.service.name,
                        image.uuid,
                        image.name,
                        image.version,
                    ),
                    (Some(image), _) => format!(
                        "{} to image {}\n    ({}@{})",
                        change.describe(),
                        image.uuid,
                        image.name,
                        image.version,
                    ),
                    (None, _) => change.describe(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// The serialized plan format version this code reads and writes.
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// A validated, conflict-free, dependency-ordered update plan.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct UpdatePlan {
    pub v: u32,
    /// inventory snapshot at planning time (runtime-only)
    #[serde(skip, default)]
    pub curr: Vec<Instance>,
    /// `curr` with each affected instance's image substituted
    pub targ: Vec<Instance>,
    pub changes: Vec<NormalizedChange>,
    #[serde(rename = "justImages")]
    pub just_images: bool,
    /// derived procedure list (runtime-only; recomputed on load)
    #[serde(skip, default)]
    pub procs: Vec<Procedure>,
}

impl UpdatePlan {
    /// Serialize to the on-disk `plan.json` form: 4-space indent, fields
    /// `{v, targ, changes, justImages}`.
    pub fn to_json(&self) -> Result<String, InternalError> {
        let mut buf = Vec::new();
        let formatter =
            serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser).map_err(|source| {
            InternalError::Serialize {
                context: "serializing update plan".to_string(),
                source,
            }
        })?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|_| {
            InternalError::UnexpectedState(
                "serialized plan was not UTF-8".to_string(),
            )
        })
    }

    /// Deserialize a plan, rejecting any format version other than
    /// [`PLAN_FORMAT_VERSION`].
    pub fn from_json(json: &str) -> Result<UpdatePlan, PlanReadError> {
        let plan: UpdatePlan = serde_json::from_str(json).map_err(|source| {
            PlanReadError::Parse(InternalError::Serialize {
                context: "parsing update plan".to_string(),
                source,
            })
        })?;
        if plan.v != PLAN_FORMAT_VERSION {
            return Err(PlanReadError::Version(
                UpdateError::BadPlanVersion {
                    found: plan.v,
                    expected: PLAN_FORMAT_VERSION,
                },
            ));
        }
        Ok(plan)
    }

    /// Render the plan's intent for operator confirmation: one summary per
    /// procedure, in execution order.
    pub fn summarize(&self) -> String {
        self.procs
            .iter()
            .map(Procedure::summarize)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanReadError {
    #[error(transparent)]
    Parse(InternalError),
    #[error(transparent)]
    Version(UpdateError),
}

/// Displays a list of changes as a comma-separated one-liner, for error
/// messages that must enumerate them.
pub struct ChangeList<'a>(pub &'a [NormalizedChange]);

impl fmt::Display for ChangeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for change in self.0 {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", change.describe())?;
        }
        Ok(())
    }
}
