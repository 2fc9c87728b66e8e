// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Update planning
//!
//! Turns a caller's change requests into a validated [`UpdatePlan`]:
//!
//! 1. shape validation (in `updateadm-types`), then normalization against
//!    the inventory snapshot,
//! 2. candidate image resolution per service,
//! 3. conflict detection, no-op dropping, and dependency resolution,
//! 4. safety gates,
//! 5. target materialization and procedure coordination.
//!
//! Planning never touches the cluster: it reads the snapshot and the image
//! sources, and everything it produces is data.
//!
//! [`UpdatePlan`]: updateadm_types::UpdatePlan

mod coordinator;
mod images;
mod planner;

pub use coordinator::coordinate;
pub use coordinator::STATELESS_SERVICES;
pub use images::ImageResolver;
pub use planner::PlanBuilder;
pub use planner::PlanOptions;
