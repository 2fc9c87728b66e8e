// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fleet inventory collection
//!
//! [`Collector`] assembles the consistent snapshot planning runs against:
//! services, service instances (vm zones and per-server agents), and the
//! physical servers hosting them.  Collection is all-or-nothing: if any
//! upstream source fails, the whole snapshot fails with provenance; a
//! partial inventory is never returned.
//!
//! For separation of concerns the snapshot *types* live in
//! `updateadm-types`; this crate only knows how to gather and
//! cross-reference them.

mod builder;
mod collector;
pub mod examples;

pub use builder::InventoryBuilder;
pub use builder::InventoryError;
pub use collector::CollectError;
pub use collector::Collector;
pub use collector::KNOWN_AGENT_SERVICES;
