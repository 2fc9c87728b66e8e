// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plan execution
//!
//! Everything that touches the cluster lives here: the per-class procedure
//! executors (the replicated-database updater being the largest), the
//! process-wide advisory lock that serializes mutating operations, the
//! per-update work directory, history recording, and the top-level
//! [`gen_update_plan`] / [`exec_update_plan`] entry points a front-end
//! calls.

mod context;
mod error;
mod lock;
mod ops;
mod procedures;
mod workdir;

pub use context::ExecContext;
pub use error::ExecError;
pub use lock::UpdateLock;
pub use ops::exec_update_plan;
pub use ops::gen_update_plan;
pub use ops::Deps;
pub use procedures::executor_for;
pub use procedures::ProcedureExecutor;
pub use procedures::ReplState;
pub use procedures::ShardMode;
pub use procedures::ShardPeer;
pub use procedures::ShardStatus;
pub use workdir::WorkDir;
