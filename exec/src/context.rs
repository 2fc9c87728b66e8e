// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution context handed to every procedure

use slog::{debug, Logger};
use updateadm_clients::{Clients, RemoteResult};
use updateadm_common::progress::ProgressReporter;
use updateadm_common::UpdateadmConfig;
use updateadm_types::Inventory;
use uuid::Uuid;

use crate::error::ExecError;
use crate::workdir::WorkDir;

/// Everything a procedure needs to act on the cluster.  Procedures hold no
/// state of their own across invocations; it all flows through here.
pub struct ExecContext<'a> {
    pub log: Logger,
    pub clients: &'a Clients,
    pub inventory: &'a Inventory,
    pub config: &'a UpdateadmConfig,
    pub workdir: &'a WorkDir,
    pub progress: &'a dyn ProgressReporter,
}

impl ExecContext<'_> {
    /// Stream a progress message and mirror it into the install log.  A
    /// failure to write the log is not worth aborting an update over.
    pub fn note(&self, message: &str) {
        self.progress.message(message);
        if let Err(error) = self.workdir.log_line(message) {
            debug!(self.log, "could not append to install log";
                "error" => %error);
        }
    }

    /// Run a script on a server and require exit status 0.
    pub async fn exec_checked(
        &self,
        server: Uuid,
        script: &str,
    ) -> Result<RemoteResult, ExecError> {
        let result = self.clients.shell.exec_on(server, script).await?;
        if !result.success() {
            return Err(ExecError::RemoteCommand {
                server,
                exit_status: result.exit_status,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}
