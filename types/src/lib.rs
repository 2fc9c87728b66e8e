// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared data model for the update orchestrator
//!
//! These types cross every subsystem boundary: the inventory collector
//! produces them, the planner consumes and emits them, and the executors
//! are driven by them.  Keeping them here (rather than in the crates that
//! produce them) lets the planner depend on inventory *data* without
//! depending on inventory *collection*.

mod fleet;
mod history;
mod inventory;
mod plan;
mod requests;

pub use fleet::build_date_of_version;
pub use fleet::image_name_for_service;
pub use fleet::Image;
pub use fleet::Instance;
pub use fleet::Server;
pub use fleet::Service;
pub use fleet::ServiceParams;
pub use fleet::ServiceType;

pub use history::HistoryRecord;

pub use inventory::Inventory;

pub use plan::ChangeKind;
pub use plan::ChangeList;
pub use plan::NormalizedChange;
pub use plan::PlanReadError;
pub use plan::Procedure;
pub use plan::ProcedureKind;
pub use plan::UpdatePlan;
pub use plan::PLAN_FORMAT_VERSION;

pub use requests::parse_change_requests;
pub use requests::ChangeRequest;
