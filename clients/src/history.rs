// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable storage for history records.

use async_trait::async_trait;
use updateadm_common::error::UpstreamError;
use updateadm_types::HistoryRecord;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_history(
        &self,
        record: &HistoryRecord,
    ) -> Result<(), UpstreamError>;

    async fn update_history(
        &self,
        record: &HistoryRecord,
    ) -> Result<(), UpstreamError>;
}
