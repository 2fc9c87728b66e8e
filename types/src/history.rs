// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable record of one planning/execution event

use crate::plan::NormalizedChange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What one run of the orchestrator did (or tried to do).  Saved before the
/// first procedure runs and updated on every exit path.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct HistoryRecord {
    pub uuid: Uuid,
    pub changes: Vec<NormalizedChange>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// single-line rendering of the error that aborted execution, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn begin(changes: Vec<NormalizedChange>) -> Self {
        HistoryRecord {
            uuid: Uuid::new_v4(),
            changes,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn finish(&mut self, error: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.error = error;
    }
}
