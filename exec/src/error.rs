// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution-time errors
//!
//! Execution can fail every way planning can, plus two ways of its own: a
//! remote command answering with a nonzero exit status, and a bounded wait
//! running out of attempts.  Either aborts the remaining procedures; the
//! work directory is left intact for inspection.

use thiserror::Error;
use updateadm_common::error::{
    InternalError, UpdateError, UpstreamError, ValidationError,
};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Internal(#[from] InternalError),

    #[error(
        "command on server {server} exited {exit_status}: {stderr}"
    )]
    RemoteCommand { server: Uuid, exit_status: i32, stderr: String },

    #[error("timed out waiting for {what} ({attempts} attempts)")]
    Timeout { what: String, attempts: usize },

    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl From<updateadm_common::Error> for ExecError {
    fn from(error: updateadm_common::Error) -> Self {
        match error {
            updateadm_common::Error::Validation(e) => ExecError::Validation(e),
            updateadm_common::Error::Update(e) => ExecError::Update(e),
            updateadm_common::Error::Upstream(e) => ExecError::Upstream(e),
            updateadm_common::Error::Internal(e) => ExecError::Internal(e),
        }
    }
}
