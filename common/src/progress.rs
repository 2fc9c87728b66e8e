// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator-facing progress reporting
//!
//! Progress is distinct from logging: the log records what happened for
//! later debugging, while progress messages stream to whoever is running
//! the update, in order, as each step happens.  The front-end supplies the
//! sink; everything in the orchestrator takes it as a trait object.

use std::sync::Mutex;

/// Receives human-readable progress messages, in order.
pub trait ProgressReporter: Send + Sync {
    fn message(&self, message: &str);
}

/// Prints each message to stdout.
pub struct PrintProgress;

impl ProgressReporter for PrintProgress {
    fn message(&self, message: &str) {
        println!("{}", message);
    }
}

/// Discards all messages.
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn message(&self, _message: &str) {}
}

/// Buffers messages for later inspection.  Used by the test suites to
/// assert on the exact message sequence a procedure emitted.
#[derive(Default)]
pub struct BufferedProgress {
    messages: Mutex<Vec<String>>,
}

impl BufferedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.messages.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressReporter for BufferedProgress {
    fn message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
