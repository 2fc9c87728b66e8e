// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for the test suites.  Not for production use.

use slog::Drain;

/// Build a logger that writes synchronously to stderr.  Test output stays
/// interleaved with assertion failures, which async drains would reorder.
pub fn test_logger(test_name: &str) -> slog::Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    slog::Logger::root(drain, slog::o!("test" => test_name.to_string()))
}
