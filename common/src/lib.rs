// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities shared by every updateadm crate: the error taxonomy,
//! constant-interval polling, operator progress reporting, and runtime
//! configuration.

pub mod config;
pub mod error;
pub mod poll;
pub mod progress;
pub mod test_utils;

pub use config::UpdateadmConfig;
pub use error::Error;
