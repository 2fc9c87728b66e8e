// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for updateadm
//!
//! Four classes cover everything the orchestrator can report:
//!
//! - [`ValidationError`]: malformed change requests, accumulated and
//!   reported together, before anything has been looked up or touched
//! - [`UpdateError`]: a semantically invalid plan (unknown names, change
//!   conflicts, unsupported topologies, tripped safety gates)
//! - [`UpstreamError`]: a failure from one of the external systems we
//!   consult, with provenance (which system, which call)
//! - [`InternalError`]: filesystem, lock, and unexpected-state failures
//!
//! Validation and update errors are produced before the cluster is touched.
//! Upstream "not found" is distinguished from transport failure because one
//! call site (image candidate lookup) tolerates it.

use std::fmt;
use thiserror::Error;

/// One problem found while validating a single change request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("change {index}: {message}")]
pub struct ValidationIssue {
    /// position of the offending change request in the submitted list
    pub index: usize,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        ValidationIssue { index, message: message.into() }
    }
}

/// The aggregate of every [`ValidationIssue`] found in a submitted list of
/// change requests.  No side effects have occurred when this is returned.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} invalid change request{}",
            self.issues.len(),
            if self.issues.len() == 1 { "" } else { "s" },
        )?;
        for issue in &self.issues {
            write!(f, "\n    {}", issue)?;
        }
        Ok(())
    }
}

/// A plan-level rejection: the change requests were well-formed but cannot
/// be turned into (or executed as) a valid plan.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("unknown service: \"{0}\"")]
    UnknownService(String),

    #[error("unknown instance: \"{0}\"")]
    UnknownInstance(String),

    #[error("unknown server: \"{0}\"")]
    UnknownServer(String),

    #[error("no image found for \"{service}\" matching \"{constraint}\"")]
    NoImageFound { service: String, constraint: String },

    #[error(
        "image {image} is \"{image_name}\", not the expected \
         \"{expected}\" for service \"{service}\""
    )]
    ImageNameMismatch {
        image: String,
        image_name: String,
        expected: String,
        service: String,
    },

    #[error("conflict: two changes target service \"{service}\"")]
    DuplicateServiceChange { service: String },

    #[error("conflict: two changes target instance \"{instance}\"")]
    DuplicateInstanceChange { instance: String },

    #[error(
        "conflict: changes target both service \"{service}\" and an \
         instance of that service"
    )]
    ServiceInstanceOverlap { service: String },

    #[error(
        "\"rabbitmq\" updates are disabled by default \
         (pass the force-rabbitmq option to update it anyway)"
    )]
    RabbitmqNotForced,

    #[error(
        "server {server} for \"{service}\" runs platform {platform}, \
         older than the required minimum {minimum}"
    )]
    PlatformTooOld {
        server: String,
        service: String,
        platform: String,
        minimum: String,
    },

    #[error(
        "instance {instance} of \"{service}\" runs an image built \
         {build_date}, older than the required minimum {minimum}"
    )]
    ImageTooOld {
        instance: String,
        service: String,
        build_date: String,
        minimum: String,
    },

    #[error("do not support the following changes: {0}")]
    UnsupportedChanges(String),

    #[error("HA setup error: {0}")]
    HaSetup(String),

    #[error("unsupported plan version {found} (expected {expected})")]
    BadPlanVersion { found: u32, expected: u32 },
}

/// A failure reported by (or while talking to) an external system.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The requested resource does not exist upstream.  This is the one
    /// "soft" class: some call sites treat it as an answer, not a failure.
    #[error("{system} {call}: resource not found")]
    NotFound { system: &'static str, call: String },

    #[error("{system} {call} failed")]
    Call {
        system: &'static str,
        call: String,
        #[source]
        source: anyhow::Error,
    },
}

impl UpstreamError {
    pub fn not_found(system: &'static str, call: impl Into<String>) -> Self {
        UpstreamError::NotFound { system, call: call.into() }
    }

    pub fn call(
        system: &'static str,
        call: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        UpstreamError::Call {
            system,
            call: call.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, UpstreamError::NotFound { .. })
    }
}

/// Failures in our own process: filesystem, lock, serialization, or state
/// that should have been impossible.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("acquiring lock {path}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}")]
    Serialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected state: {0}")]
    UnexpectedState(String),
}

impl InternalError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        InternalError::Io { context: context.into(), source }
    }
}

/// Top-level error for the orchestrator's entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError {
            issues: vec![
                ValidationIssue::new(0, "unknown type: \"frob\""),
                ValidationIssue::new(2, "\"service\" must be a string"),
            ],
        };
        assert_eq!(
            error.to_string(),
            "2 invalid change requests\
             \n    change 0: unknown type: \"frob\"\
             \n    change 2: \"service\" must be a string"
        );
    }

    #[test]
    fn test_not_found_is_soft() {
        let nf = UpstreamError::not_found("imgapi", "GetImage");
        assert!(nf.is_not_found());
        let hard = UpstreamError::call(
            "imgapi",
            "GetImage",
            anyhow::anyhow!("connection refused"),
        );
        assert!(!hard.is_not_found());
    }
}
